//! The operations every protocol binding exposes.
//!
//! Bindings own their protocol engine privately and forward to it; callers
//! only ever see [`Server::start`], [`Server::stop`] and
//! [`Endpointer::endpoint`].

use crate::{Kind, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Reports the advertisable endpoint of a server.
pub trait Endpointer {
    /// Binds the listener on first use and returns the cached endpoint.
    ///
    /// The first call may block on DNS and the host address lookup. Later
    /// calls only read the cache.
    ///
    /// # Errors
    ///
    /// The bind or resolution error of the first attempt, on every call.
    fn endpoint(&self) -> Result<Url>;
}

/// A startable, stoppable transport server.
#[async_trait]
pub trait Server: Endpointer + Send + Sync {
    fn kind(&self) -> Kind;

    /// Serves until [`Server::stop`] is called.
    ///
    /// `ctx` is the process scope every call context is merged with.
    /// Cancelling it cancels in-flight calls but keeps the listener open.
    ///
    /// # Errors
    ///
    /// Bind, resolution or lifecycle errors. Per-call failures never end the
    /// serve loop.
    async fn start(&self, ctx: CancellationToken) -> Result<()>;

    /// Marks the server as shutting down, drains in-flight calls and releases
    /// the listener. Later calls are no-ops, and a server stopped before
    /// `start` never serves.
    async fn stop(&self) -> Result<()>;
}
