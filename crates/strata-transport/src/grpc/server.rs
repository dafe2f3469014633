use super::{Grpc, GrpcOptions, GrpcRequest, GrpcResponse, Interceptor, interceptor};
use crate::call::CallLayer;
use async_trait::async_trait;
use axum::response::IntoResponse;
use core::convert::Infallible;
use parking_lot::Mutex;
use strata_core::{
    Endpointer, Error, Health, Kind, Lifecycle, Middleware, Phase, Result, Server, ServerConfig,
    TransportInfo, chain,
};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::body::Body;
use tonic::server::NamedService;
use tonic::service::{Routes, RoutesBuilder};
use tonic::transport::Server as TonicServer;
use tonic_health::ServingStatus;
use tonic_health::server::HealthReporter;
use tower::Service;
use url::Url;

pub struct GrpcServerBuilder {
    config: ServerConfig,
    routes: RoutesBuilder,
    services: Vec<String>,
    descriptors: Vec<&'static [u8]>,
    middleware: Vec<Middleware<GrpcRequest, GrpcResponse>>,
    interceptors: Vec<Interceptor>,
    options: GrpcOptions,
}

impl GrpcServerBuilder {
    /// Registers a generated tonic service. Its name is also reported by the
    /// health service.
    pub fn add_service<S>(mut self, service: S) -> Self
    where
        S: Service<http::Request<Body>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + Sync
            + 'static,
        S::Response: IntoResponse,
        S::Future: Send + 'static,
    {
        self.services.push(S::NAME.to_string());
        self.routes.add_service(service);
        self
    }

    /// Adds an encoded `FileDescriptorSet` to the reflection service.
    pub fn file_descriptor_set(mut self, encoded: &'static [u8]) -> Self {
        self.descriptors.push(encoded);
        self
    }

    /// Appends a middleware. The first one registered is outermost.
    pub fn middleware(mut self, middleware: Middleware<GrpcRequest, GrpcResponse>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Appends an interceptor. Interceptors run after all middleware.
    pub fn interceptor(mut self, interceptor: Interceptor) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn options(mut self, options: GrpcOptions) -> Self {
        self.options = options;
        self
    }

    /// Installs the health and reflection services next to the user
    /// services. Nothing is bound.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when a descriptor set cannot be
    /// decoded.
    pub fn build(self) -> Result<GrpcServer> {
        let (reporter, health_service) = tonic_health::server::health_reporter();

        let mut reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(tonic_health::pb::FILE_DESCRIPTOR_SET);
        for encoded in &self.descriptors {
            reflection = reflection.register_encoded_file_descriptor_set(encoded);
        }
        let reflection = reflection.build_v1().map_err(|e| Error::InvalidConfig {
            reason: format!("reflection descriptors: {e}"),
        })?;

        let mut routes = self.routes;
        routes.add_service(health_service).add_service(reflection);

        Ok(GrpcServer {
            lifecycle: Lifecycle::new(Kind::Grpc, self.config),
            routes: Mutex::new(Some(routes.routes())),
            services: self.services,
            middleware: self.middleware,
            interceptors: self.interceptors,
            options: self.options,
            health: Health::new(),
            reporter,
            publishing: tokio::sync::Mutex::new(()),
        })
    }
}

/// A gRPC server driven by a [`Lifecycle`].
///
/// The reporter behind `grpc.health.v1.Health` mirrors [`GrpcServer::health`]
/// for the overall server (`""`) and every registered service. It is first
/// published right before the serve loop starts, so no prober can reach it
/// earlier.
pub struct GrpcServer {
    lifecycle: Lifecycle,
    routes: Mutex<Option<Routes>>,
    services: Vec<String>,
    middleware: Vec<Middleware<GrpcRequest, GrpcResponse>>,
    interceptors: Vec<Interceptor>,
    options: GrpcOptions,
    health: Health,
    reporter: HealthReporter,
    publishing: tokio::sync::Mutex<()>,
}

impl GrpcServer {
    pub fn builder(config: ServerConfig) -> GrpcServerBuilder {
        GrpcServerBuilder {
            config,
            routes: RoutesBuilder::default(),
            services: Vec::new(),
            descriptors: Vec::new(),
            middleware: Vec::new(),
            interceptors: Vec::new(),
            options: GrpcOptions::default(),
        }
    }

    pub fn health(&self) -> &Health {
        &self.health
    }

    pub fn phase(&self) -> Phase {
        self.lifecycle.phase()
    }

    /// Names of the registered user services.
    pub fn services(&self) -> &[String] {
        &self.services
    }

    // Serialized so the last writer always publishes the latest state.
    async fn publish_health(&self) {
        let _publishing = self.publishing.lock().await;
        let status = if self.health.state().is_serving() {
            ServingStatus::Serving
        } else {
            ServingStatus::NotServing
        };
        self.reporter.set_service_status("", status).await;
        for service in &self.services {
            self.reporter.set_service_status(service, status).await;
        }
        tracing::debug!(parent: self.lifecycle.span(), state = %self.health.state(), "health published");
    }

    // The serve loop is over, whether `stop` asked for it or not.
    async fn serve_finished(&self) {
        if self.health.shutdown() {
            tracing::warn!(parent: self.lifecycle.span(), "gRPC serve loop exited without stop");
            self.publish_health().await;
        }
    }

    fn engine(&self) -> TonicServer {
        let options = self.options;
        let mut engine = TonicServer::builder()
            .accept_http1(options.accept_http1)
            .http2_adaptive_window(Some(options.http2_adaptive_window))
            .http2_keepalive_interval(options.http2_keepalive_interval);
        if let Some(limit) = options.concurrency_limit_per_connection {
            engine = engine.concurrency_limit_per_connection(limit);
        }
        engine
    }
}

impl Endpointer for GrpcServer {
    fn endpoint(&self) -> Result<Url> {
        self.lifecycle.endpoint()
    }
}

#[async_trait]
impl Server for GrpcServer {
    fn kind(&self) -> Kind {
        Kind::Grpc
    }

    async fn start(&self, ctx: CancellationToken) -> Result<()> {
        self.lifecycle.resolve().await?;
        let admission = self.lifecycle.admit(&ctx)?;
        let routes = self.routes.lock().take().ok_or(Error::AlreadyStarted)?;
        let span = self.lifecycle.span();

        let mut middleware = self.middleware.clone();
        middleware.push(interceptor::middleware(self.interceptors.clone()));
        let layer = CallLayer::<Grpc>::new(
            admission.scope.clone(),
            TransportInfo {
                kind: Kind::Grpc,
                endpoint: admission.endpoint.to_string(),
            },
            self.lifecycle.config().timeout(),
            chain(middleware),
            span.clone(),
        );

        let nodelay = self.options.tcp_nodelay;
        let incoming = TcpListenerStream::new(admission.listener).map(move |conn| {
            conn.and_then(|stream| {
                stream.set_nodelay(nodelay)?;
                Ok(stream)
            })
        });

        self.health.resume();
        self.publish_health().await;
        tracing::info!(
            parent: span,
            endpoint = %admission.endpoint,
            local_addr = %admission.local_addr,
            services = ?self.services,
            "gRPC server listening"
        );

        let serve = self
            .engine()
            .layer(layer)
            .add_routes(routes)
            .serve_with_incoming_shutdown(incoming, self.lifecycle.shutdown_signal());
        let res = tokio::select! {
            res = serve => res.map_err(|e| Error::Serve { reason: e.to_string() }),
            () = self.lifecycle.abort_signal() => Ok(()),
        };
        self.serve_finished().await;
        drop(admission.guard);

        if let Err(err) = &res {
            tracing::error!(parent: span, error = %err, "gRPC server failed");
        }
        res
    }

    async fn stop(&self) -> Result<()> {
        if self.health.shutdown() {
            tracing::info!(parent: self.lifecycle.span(), "gRPC server stopping");
            self.publish_health().await;
        }
        self.lifecycle.stop().await;
        Ok(())
    }
}
