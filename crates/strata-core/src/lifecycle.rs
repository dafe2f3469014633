//! Listener ownership and the server state machine.
//!
//! [`Lifecycle`] is the protocol-independent half of a server. It owns the
//! do-once gate that binds the listener and resolves the endpoint, the current
//! [`Phase`], and the cancellation tokens that connect `start`, `stop` and
//! in-flight calls:
//!
//! ```text
//! Created -> EndpointResolved -> Serving -> Stopping -> Stopped
//!    |              |                                     ^
//!    +--------------+------------- stop ------------------+
//! ```
//!
//! The gate and the phase share one mutex. The first caller of
//! [`Lifecycle::endpoint`] (or [`Lifecycle::admit`]) binds and resolves while
//! holding it, so concurrent first callers wait for that single attempt and
//! all observe its outcome. A failed attempt is cached and returned to every
//! later caller.

use crate::endpoint;
use crate::{Error, Kind, Result, ServerConfig};
use core::fmt;
use parking_lot::Mutex;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::{Arc, OnceLock};
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use url::Url;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Created,
    EndpointResolved,
    Serving,
    Stopping,
    Stopped,
}

enum Bind {
    Pending,
    Ready {
        endpoint: Url,
        local_addr: SocketAddr,
        listener: Option<StdTcpListener>,
    },
    Failed(Error),
}

struct State {
    phase: Phase,
    bind: Bind,
    attempts: usize,
}

/// What `start` needs to begin serving, handed out exactly once.
pub struct Admission {
    pub listener: TcpListener,
    pub local_addr: SocketAddr,
    pub endpoint: Url,
    /// Process scope for calls: cancelled by the `start` context or by `stop`.
    pub scope: CancellationToken,
    /// Marks the lifecycle stopped when dropped. Keep it alive for as long as
    /// the serve loop runs.
    pub guard: ServeGuard,
}

/// Completes the `Serving -> Stopped` transition on drop.
pub struct ServeGuard {
    state: Arc<Mutex<State>>,
    scope: CancellationToken,
    finished: CancellationToken,
    span: tracing::Span,
}

impl Drop for ServeGuard {
    fn drop(&mut self) {
        self.state.lock().phase = Phase::Stopped;
        self.scope.cancel();
        self.finished.cancel();
        tracing::debug!(parent: &self.span, "serve loop finished");
    }
}

pub struct Lifecycle {
    kind: Kind,
    config: ServerConfig,
    span: tracing::Span,
    state: Arc<Mutex<State>>,
    scope: OnceLock<CancellationToken>,
    shutdown: CancellationToken,
    abort: CancellationToken,
    finished: CancellationToken,
}

impl Lifecycle {
    /// Creates a lifecycle in [`Phase::Created`]. Nothing is bound yet.
    pub fn new(kind: Kind, config: ServerConfig) -> Self {
        let span = config
            .span()
            .cloned()
            .unwrap_or_else(|| tracing::info_span!("strata.server", %kind));
        Self {
            kind,
            config,
            span,
            state: Arc::new(Mutex::new(State {
                phase: Phase::Created,
                bind: Bind::Pending,
                attempts: 0,
            })),
            scope: OnceLock::new(),
            shutdown: CancellationToken::new(),
            abort: CancellationToken::new(),
            finished: CancellationToken::new(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Span server events are recorded under.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Number of bind-and-resolve attempts made. Never exceeds one.
    pub fn bind_attempts(&self) -> usize {
        self.state.lock().attempts
    }

    /// Address the listener is bound to, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.state.lock().bind {
            Bind::Ready { local_addr, .. } => Some(*local_addr),
            Bind::Pending | Bind::Failed(_) => None,
        }
    }

    /// Returns the advertisable endpoint, binding the listener on first use.
    ///
    /// # Errors
    ///
    /// Returns the bind or resolution error of the first attempt, identically
    /// on every call, or [`Error::Stopped`] if the instance was stopped before
    /// anything was bound.
    pub fn endpoint(&self) -> Result<Url> {
        let mut state = self.state.lock();
        resolve_locked(self.kind, &self.config, &self.span, &mut state)
    }

    /// [`Lifecycle::endpoint`] run on the blocking pool.
    ///
    /// The first resolution may do DNS lookups and query the routing table.
    /// Async callers should go through this rather than `endpoint`, and
    /// servers call it before [`Lifecycle::admit`] so `start` never blocks a
    /// runtime worker.
    ///
    /// # Errors
    ///
    /// Same as [`Lifecycle::endpoint`].
    pub async fn resolve(&self) -> Result<Url> {
        let kind = self.kind;
        let config = self.config.clone();
        let span = self.span.clone();
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || {
            let mut state = state.lock();
            resolve_locked(kind, &config, &span, &mut state)
        })
        .await
        .unwrap_or_else(|e| {
            Err(Error::Resolve {
                address: self.config.address().to_string(),
                reason: e.to_string(),
            })
        })
    }

    /// Moves `EndpointResolved -> Serving` and hands the listener to the
    /// caller. Binds first if nothing has queried the endpoint yet; that bind
    /// blocks, so call [`Lifecycle::resolve`] beforehand from async code.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - The cached bind or resolution error.
    /// - [`Error::AlreadyStarted`] if the instance is already serving.
    /// - [`Error::Stopped`] if `stop` ran first.
    pub fn admit(&self, ctx: &CancellationToken) -> Result<Admission> {
        let mut state = self.state.lock();
        let endpoint = resolve_locked(self.kind, &self.config, &self.span, &mut state)?;

        match state.phase {
            Phase::EndpointResolved => {}
            Phase::Serving => return Err(Error::AlreadyStarted),
            Phase::Created | Phase::Stopping | Phase::Stopped => return Err(Error::Stopped),
        }

        let (listener, local_addr) = match &mut state.bind {
            Bind::Ready {
                listener,
                local_addr,
                ..
            } => (listener.take(), *local_addr),
            Bind::Pending | Bind::Failed(_) => return Err(Error::Stopped),
        };
        let listener = listener.ok_or(Error::AlreadyStarted)?;

        let listener = match TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(e) => {
                let err = Error::bind(self.config.address(), &e);
                state.bind = Bind::Failed(err.clone());
                return Err(err);
            }
        };

        let scope = self.scope.get_or_init(|| ctx.child_token()).clone();
        state.phase = Phase::Serving;

        Ok(Admission {
            listener,
            local_addr,
            endpoint,
            scope: scope.clone(),
            guard: ServeGuard {
                state: Arc::clone(&self.state),
                scope,
                finished: self.finished.clone(),
                span: self.span.clone(),
            },
        })
    }

    /// Process scope for calls. Before `start` this is a fresh, live token.
    pub fn scope(&self) -> CancellationToken {
        self.scope.get().cloned().unwrap_or_default()
    }

    /// Resolves when `stop` asks the serve loop to drain.
    pub fn shutdown_signal(&self) -> WaitForCancellationFutureOwned {
        self.shutdown.clone().cancelled_owned()
    }

    /// Resolves when the drain timeout elapsed and the serve loop must exit.
    pub fn abort_signal(&self) -> WaitForCancellationFutureOwned {
        self.abort.clone().cancelled_owned()
    }

    /// Stops the instance. Safe before `start` and safe to repeat.
    ///
    /// A serving instance is asked to drain: in-flight calls observe
    /// cancellation through their merged context, no new connections are
    /// accepted, and this returns once the serve loop has exited. With a
    /// shutdown timeout configured, the serve loop is aborted when draining
    /// takes longer.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            match state.phase {
                Phase::Created | Phase::EndpointResolved => {
                    state.phase = Phase::Stopped;
                    if let Bind::Ready { listener, .. } = &mut state.bind {
                        drop(listener.take());
                    }
                    self.finished.cancel();
                }
                Phase::Serving => state.phase = Phase::Stopping,
                Phase::Stopping | Phase::Stopped => {}
            }
        }

        if let Some(scope) = self.scope.get() {
            scope.cancel();
        }
        self.shutdown.cancel();

        match self.config.shutdown_timeout() {
            Some(limit) => {
                if tokio::time::timeout(limit, self.finished.cancelled())
                    .await
                    .is_err()
                {
                    tracing::warn!(
                        parent: &self.span,
                        timeout_ms = limit.as_millis() as u64,
                        "graceful drain timed out, aborting serve loop"
                    );
                    self.abort.cancel();
                    self.finished.cancelled().await;
                }
            }
            None => self.finished.cancelled().await,
        }
    }
}

fn resolve_locked(
    kind: Kind,
    config: &ServerConfig,
    span: &tracing::Span,
    state: &mut State,
) -> Result<Url> {
    match &state.bind {
        Bind::Ready { endpoint, .. } => return Ok(endpoint.clone()),
        Bind::Failed(err) => return Err(err.clone()),
        Bind::Pending => {}
    }
    if state.phase == Phase::Stopped {
        return Err(Error::Stopped);
    }

    state.attempts += 1;
    match bind_and_resolve(kind, config) {
        Ok((endpoint, local_addr, listener)) => {
            tracing::debug!(parent: span, %endpoint, %local_addr, "endpoint resolved");
            state.bind = Bind::Ready {
                endpoint: endpoint.clone(),
                local_addr,
                listener: Some(listener),
            };
            state.phase = Phase::EndpointResolved;
            Ok(endpoint)
        }
        Err(err) => {
            tracing::error!(parent: span, error = %err, "endpoint resolution failed");
            state.bind = Bind::Failed(err.clone());
            Err(err)
        }
    }
}

fn bind_and_resolve(kind: Kind, config: &ServerConfig) -> Result<(Url, SocketAddr, StdTcpListener)> {
    let address = config.address();
    let listener = endpoint::bind(config.network(), address)?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| Error::bind(address, &e))?;

    let endpoint = match config.endpoint() {
        Some(endpoint) => endpoint.clone(),
        None => {
            let host_port = endpoint::extract(address, local_addr, config.host_probe())?;
            endpoint::endpoint_url(kind, &host_port)?
        }
    };

    Ok((endpoint, local_addr, listener))
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("kind", &self.kind)
            .field("phase", &self.phase())
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}
