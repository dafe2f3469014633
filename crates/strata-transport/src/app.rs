//! Runs a set of servers as one service instance.
//!
//! [`App::run`] resolves every server's endpoint, starts the servers,
//! publishes the instance to the registrar, then waits for Ctrl-C, SIGTERM,
//! [`App::shutdown_token`] being cancelled or a server failing. Shutdown runs
//! in reverse: deregister first so clients stop resolving this instance, then
//! stop every server.

use std::collections::BTreeMap;
use std::sync::Arc;
use strata_core::{Error, Registrar, Result, Server, ServiceInstance};
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct AppBuilder {
    id: String,
    name: String,
    version: String,
    metadata: BTreeMap<String, String>,
    servers: Vec<Arc<dyn Server>>,
    registrar: Option<Arc<dyn Registrar>>,
}

impl AppBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn server(mut self, server: Arc<dyn Server>) -> Self {
        self.servers.push(server);
        self
    }

    pub fn registrar(mut self, registrar: Arc<dyn Registrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    pub fn build(self) -> App {
        App {
            id: self.id,
            name: self.name,
            version: self.version,
            metadata: self.metadata,
            servers: self.servers,
            registrar: self.registrar,
            ctx: CancellationToken::new(),
        }
    }
}

pub struct App {
    id: String,
    name: String,
    version: String,
    metadata: BTreeMap<String, String>,
    servers: Vec<Arc<dyn Server>>,
    registrar: Option<Arc<dyn Registrar>>,
    ctx: CancellationToken,
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder::default()
    }

    /// Cancelling this token shuts the app down. It is also the process
    /// scope handed to every server's `start`.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.ctx.clone()
    }

    /// The instance published to the registrar, with one endpoint per server.
    ///
    /// The first call binds every listener and may block on DNS or the host
    /// address lookup. `run` calls it on the current task.
    ///
    /// # Errors
    ///
    /// The first server whose endpoint cannot be resolved.
    pub fn instance(&self) -> Result<ServiceInstance> {
        let endpoints = self
            .servers
            .iter()
            .map(|server| server.endpoint())
            .collect::<Result<Vec<_>>>()?;
        Ok(ServiceInstance {
            id: self.id.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            metadata: self.metadata.clone(),
            endpoints,
        })
    }

    /// Serves until shutdown is requested, then stops everything.
    ///
    /// # Errors
    ///
    /// Endpoint resolution, registration or the first server failure. Servers
    /// are stopped in every case.
    pub async fn run(&self) -> Result<()> {
        // Resolving binds listeners, so servers resolved before a failure
        // must still be released.
        let instance = match self.instance() {
            Ok(instance) => instance,
            Err(err) => {
                tracing::error!(error = %err, "failed to resolve server endpoints");
                self.stop_servers().await;
                return Err(err);
            }
        };

        let mut serving = JoinSet::new();
        for server in &self.servers {
            let server = Arc::clone(server);
            let ctx = self.ctx.clone();
            serving.spawn(async move { server.start(ctx).await });
        }

        let mut outcome = Ok(());
        if let Some(registrar) = &self.registrar {
            if let Err(err) = registrar.register(&instance).await {
                tracing::error!(error = %err, "failed to register instance");
                outcome = Err(err);
            }
        }

        if outcome.is_ok() {
            tracing::info!(
                id = %instance.id,
                name = %instance.name,
                endpoints = ?instance.endpoints.iter().map(|u| u.as_str()).collect::<Vec<_>>(),
                "app started"
            );
            tokio::select! {
                () = shutdown_signal() => {},
                () = self.ctx.cancelled() => {
                    tracing::info!("Shutdown requested");
                },
                Some(joined) = serving.join_next() => {
                    outcome = flatten(joined);
                    if let Err(err) = &outcome {
                        tracing::error!(error = %err, "server exited unexpectedly");
                    }
                }
            }

            if let Some(registrar) = &self.registrar {
                if let Err(err) = registrar.deregister(&instance).await {
                    tracing::warn!(error = %err, "failed to deregister instance");
                    outcome = outcome.and(Err(err));
                }
            }
        }

        self.stop_servers().await;

        while let Some(joined) = serving.join_next().await {
            // A server stopped before its start task ran reports `Stopped`.
            match flatten(joined) {
                Ok(()) | Err(Error::Stopped) => {}
                Err(err) => {
                    tracing::error!(error = %err, "server failed during shutdown");
                    outcome = outcome.and(Err(err));
                }
            }
        }

        tracing::info!("app stopped");
        outcome
    }

    async fn stop_servers(&self) {
        futures::future::join_all(self.servers.iter().map(|server| server.stop())).await;
        self.ctx.cancel();
    }
}

fn flatten(joined: core::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    joined.unwrap_or_else(|e| {
        Err(Error::Serve {
            reason: e.to_string(),
        })
    })
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpServer;
    use async_trait::async_trait;
    use axum::routing::get;
    use core::time::Duration;
    use parking_lot::Mutex;
    use strata_core::{Endpointer, Phase, ServerConfig};

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Registrar for Recording {
        async fn register(&self, instance: &ServiceInstance) -> Result<()> {
            self.events.lock().push(format!("register {}", instance.id));
            if self.fail {
                return Err(Error::Registry {
                    reason: "backend down".to_string(),
                });
            }
            Ok(())
        }

        async fn deregister(&self, instance: &ServiceInstance) -> Result<()> {
            self.events.lock().push(format!("deregister {}", instance.id));
            Ok(())
        }
    }

    fn http_server() -> Arc<HttpServer> {
        let config = ServerConfig::builder()
            .address("127.0.0.1:0")
            .build()
            .unwrap();
        server_with(config)
    }

    fn server_with(config: ServerConfig) -> Arc<HttpServer> {
        Arc::new(
            HttpServer::builder(config)
                .route("/ping", get(|| async { "pong" }))
                .build(),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn registers_serves_and_deregisters() {
        let server = http_server();
        let registrar = Arc::new(Recording::default());
        let app = Arc::new(
            App::builder()
                .id("instance-1")
                .name("helloworld")
                .version("v1")
                .server(server.clone())
                .registrar(registrar.clone())
                .build(),
        );

        let instance = app.instance().unwrap();
        assert_eq!(instance.endpoints, vec![server.endpoint().unwrap()]);

        let running = tokio::spawn({
            let app = Arc::clone(&app);
            async move { app.run().await }
        });

        tokio::time::timeout(Duration::from_secs(2), async {
            while registrar.events.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("instance should be registered");

        app.shutdown_token().cancel();
        tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .expect("app should stop")
            .unwrap()
            .unwrap();

        assert_eq!(
            *registrar.events.lock(),
            vec!["register instance-1", "deregister instance-1"]
        );
        assert_eq!(server.phase(), Phase::Stopped);
    }

    #[tokio::test]
    async fn registration_failure_stops_servers() {
        let server = http_server();
        let registrar = Arc::new(Recording {
            fail: true,
            ..Recording::default()
        });
        let app = App::builder()
            .id("instance-2")
            .server(server.clone())
            .registrar(registrar.clone())
            .build();

        let err = app.run().await.unwrap_err();
        assert!(matches!(err, Error::Registry { .. }));
        assert_eq!(*registrar.events.lock(), vec!["register instance-2"]);
        assert_eq!(server.phase(), Phase::Stopped);
    }

    #[tokio::test]
    async fn resolution_failure_releases_earlier_listeners() {
        let bound = http_server();
        let unroutable = server_with(
            ServerConfig::builder()
                .address(":0")
                .host_probe(|| Err(std::io::Error::other("no route to host")))
                .build()
                .unwrap(),
        );
        let registrar = Arc::new(Recording::default());
        let app = App::builder()
            .id("instance-3")
            .server(bound.clone())
            .server(unroutable.clone())
            .registrar(registrar.clone())
            .build();

        let err = app.run().await.unwrap_err();
        assert!(matches!(err, Error::Resolve { .. }), "{err}");
        assert!(registrar.events.lock().is_empty());
        assert_eq!(bound.phase(), Phase::Stopped);
        assert_eq!(unroutable.phase(), Phase::Stopped);
        assert!(app.shutdown_token().is_cancelled());
    }
}
