use super::{Http, HttpRequest, HttpResponse};
use crate::call::CallLayer;
use async_trait::async_trait;
use axum::Router;
use axum::routing::{MethodRouter, get};
use axum::{Json, http::StatusCode};
use core::future::IntoFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use strata_core::{
    Endpointer, Error, Health, Kind, Lifecycle, Middleware, Phase, Result, Server, ServerConfig,
    TransportInfo, chain,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use url::Url;

/// Liveness and readiness probe.
pub const HEALTHZ_PATH: &str = "/healthz";

/// JSON listing of every registered route.
pub const ROUTES_PATH: &str = "/_meta/routes";

/// HTTP engine settings.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpOptions {
    /// Answer CORS preflights and allow any origin.
    pub cors: bool,
}

#[derive(Serialize)]
struct RouteList {
    routes: Vec<String>,
}

pub struct HttpServerBuilder {
    config: ServerConfig,
    router: Router,
    routes: Vec<String>,
    middleware: Vec<Middleware<HttpRequest, HttpResponse>>,
    options: HttpOptions,
}

impl HttpServerBuilder {
    /// Registers `method_router` at `path`.
    ///
    /// # Panics
    ///
    /// Panics on an invalid or duplicate path, including the meta paths.
    pub fn route(mut self, path: &str, method_router: MethodRouter) -> Self {
        self.routes.push(path.to_string());
        self.router = self.router.route(path, method_router);
        self
    }

    /// Appends a middleware. The first one registered is outermost.
    pub fn middleware(mut self, middleware: Middleware<HttpRequest, HttpResponse>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn options(mut self, options: HttpOptions) -> Self {
        self.options = options;
        self
    }

    /// Installs the meta-services next to the user routes. Nothing is bound.
    pub fn build(self) -> HttpServer {
        let health = Health::new();
        let mut routes = self.routes;
        routes.push(HEALTHZ_PATH.to_string());
        routes.push(ROUTES_PATH.to_string());
        let routes = Arc::new(routes);

        let router = self
            .router
            .route(HEALTHZ_PATH, get({
                let health = health.clone();
                move || healthz(health.clone())
            }))
            .route(ROUTES_PATH, get({
                let routes = Arc::clone(&routes);
                move || list_routes(Arc::clone(&routes))
            }));

        HttpServer {
            lifecycle: Lifecycle::new(Kind::Http, self.config),
            router: Mutex::new(Some(router)),
            middleware: self.middleware,
            options: self.options,
            health,
            routes,
        }
    }
}

async fn healthz(health: Health) -> (StatusCode, &'static str) {
    let state = health.state();
    let status = if state.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, state.as_str())
}

async fn list_routes(routes: Arc<Vec<String>>) -> Json<RouteList> {
    Json(RouteList {
        routes: routes.to_vec(),
    })
}

/// An HTTP server driven by a [`Lifecycle`].
pub struct HttpServer {
    lifecycle: Lifecycle,
    router: Mutex<Option<Router>>,
    middleware: Vec<Middleware<HttpRequest, HttpResponse>>,
    options: HttpOptions,
    health: Health,
    routes: Arc<Vec<String>>,
}

impl HttpServer {
    pub fn builder(config: ServerConfig) -> HttpServerBuilder {
        HttpServerBuilder {
            config,
            router: Router::new(),
            routes: Vec::new(),
            middleware: Vec::new(),
            options: HttpOptions::default(),
        }
    }

    pub fn health(&self) -> &Health {
        &self.health
    }

    pub fn phase(&self) -> Phase {
        self.lifecycle.phase()
    }

    /// Registered paths, meta paths included.
    pub fn routes(&self) -> &[String] {
        &self.routes
    }
}

impl HttpServer {
    // The serve loop is over, whether `stop` asked for it or not.
    fn serve_finished(&self) {
        if self.health.shutdown() {
            tracing::warn!(parent: self.lifecycle.span(), "HTTP serve loop exited without stop");
        }
    }
}

impl Endpointer for HttpServer {
    fn endpoint(&self) -> Result<Url> {
        self.lifecycle.endpoint()
    }
}

#[async_trait]
impl Server for HttpServer {
    fn kind(&self) -> Kind {
        Kind::Http
    }

    async fn start(&self, ctx: CancellationToken) -> Result<()> {
        self.lifecycle.resolve().await?;
        let admission = self.lifecycle.admit(&ctx)?;
        let router = self.router.lock().take().ok_or(Error::AlreadyStarted)?;
        let span = self.lifecycle.span();

        let layer = CallLayer::<Http>::new(
            admission.scope.clone(),
            TransportInfo {
                kind: Kind::Http,
                endpoint: admission.endpoint.to_string(),
            },
            self.lifecycle.config().timeout(),
            chain(self.middleware.clone()),
            span.clone(),
        );
        let mut router = router.layer(layer);
        if self.options.cors {
            router = router.layer(CorsLayer::permissive());
        }

        self.health.resume();
        tracing::info!(
            parent: span,
            endpoint = %admission.endpoint,
            local_addr = %admission.local_addr,
            "HTTP server listening"
        );

        let serve = axum::serve(admission.listener, router)
            .with_graceful_shutdown(self.lifecycle.shutdown_signal())
            .into_future();
        let res = tokio::select! {
            res = serve => res.map_err(|e| Error::Serve { reason: e.to_string() }),
            () = self.lifecycle.abort_signal() => Ok(()),
        };
        self.serve_finished();
        drop(admission.guard);

        if let Err(err) = &res {
            tracing::error!(parent: span, error = %err, "HTTP server failed");
        }
        res
    }

    async fn stop(&self) -> Result<()> {
        if self.health.shutdown() {
            tracing::info!(parent: self.lifecycle.span(), "HTTP server stopping");
        }
        self.lifecycle.stop().await;
        Ok(())
    }
}
