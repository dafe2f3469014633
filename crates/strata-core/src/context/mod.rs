//! Per-call execution scope.
//!
//! Every inbound call runs inside a [`CallContext`]: a cancellation token that
//! merges the server's process scope with the call's own lifetime, an optional
//! deadline, and metadata describing the call ([`RequestServerInfo`]) and the
//! transport it arrived on ([`TransportInfo`]).
//!
//! ## Structure
//!
//! - [`merge`] - [`MergedToken`], the two-parent cancellation token.

mod merge;

pub use merge::MergedToken;

use crate::Error;
use core::fmt;
use core::time::Duration;
use std::sync::Arc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Wire protocol a server speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Grpc,
    Http,
}

impl Kind {
    /// URL scheme advertised for endpoints of this kind.
    pub const fn scheme(self) -> &'static str {
        match self {
            Self::Grpc => "grpc",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Which transport a call arrived on and where that server is advertised.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportInfo {
    pub kind: Kind,
    pub endpoint: String,
}

/// Per-call metadata middleware can inspect without protocol knowledge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestServerInfo {
    /// Owning service, e.g. `helloworld.Greeter` or the HTTP server name.
    pub service: String,
    /// Full method name, e.g. `/helloworld.Greeter/SayHello` or `GET /users`.
    pub full_method: String,
}

impl RequestServerInfo {
    pub fn new(service: impl Into<String>, full_method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            full_method: full_method.into(),
        }
    }
}

/// The merged, cancellable scope of a single call.
///
/// Cheap to clone; clones share cancellation and metadata.
#[derive(Clone, Debug)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    info: Arc<RequestServerInfo>,
    transport: Arc<TransportInfo>,
}

impl CallContext {
    pub fn new(
        token: CancellationToken,
        deadline: Option<Instant>,
        info: RequestServerInfo,
        transport: TransportInfo,
    ) -> Self {
        Self {
            token,
            deadline,
            info: Arc::new(info),
            transport: Arc::new(transport),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, `None` when the call is unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn info(&self) -> &RequestServerInfo {
        &self.info
    }

    pub fn transport(&self) -> &TransportInfo {
        &self.transport
    }

    /// Returns why the call is done, or `None` while it may still proceed.
    pub fn err(&self) -> Option<Error> {
        if self.token.is_cancelled() {
            return Some(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the call is cancelled or its deadline passes.
    pub async fn done(&self) -> Error {
        match self.deadline {
            Some(deadline) => tokio::select! {
                () = self.token.cancelled() => Error::Cancelled,
                () = sleep_until(deadline) => Error::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                Error::Cancelled
            }
        }
    }
}

/// Computes the deadline of a call dispatched at `start`.
///
/// A zero `server_timeout` adds no bound. When both bounds are present the
/// shorter one wins.
pub fn call_deadline(
    start: Instant,
    server_timeout: Duration,
    call_timeout: Option<Duration>,
) -> Option<Instant> {
    let server = (!server_timeout.is_zero()).then(|| start + server_timeout);
    let call = call_timeout.map(|timeout| start + timeout);
    match (server, call) {
        (Some(server), Some(call)) => Some(server.min(call)),
        (server, call) => server.or(call),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(token: CancellationToken, deadline: Option<Instant>) -> CallContext {
        CallContext::new(
            token,
            deadline,
            RequestServerInfo::new("test.Service", "/test.Service/Call"),
            TransportInfo {
                kind: Kind::Grpc,
                endpoint: "grpc://127.0.0.1:9000".to_string(),
            },
        )
    }

    #[test]
    fn deadline_takes_the_shorter_bound() {
        let start = Instant::now();
        let one = Duration::from_secs(1);
        let five = Duration::from_secs(5);

        assert_eq!(call_deadline(start, five, Some(one)), Some(start + one));
        assert_eq!(call_deadline(start, one, Some(five)), Some(start + one));
        assert_eq!(call_deadline(start, one, None), Some(start + one));
        assert_eq!(call_deadline(start, Duration::ZERO, Some(five)), Some(start + five));
        assert_eq!(call_deadline(start, Duration::ZERO, None), None);
    }

    #[tokio::test]
    async fn done_reports_deadline() {
        let ctx = context(
            CancellationToken::new(),
            Some(Instant::now() + Duration::from_millis(20)),
        );
        assert_eq!(ctx.err(), None);
        assert_eq!(ctx.done().await, Error::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(Error::DeadlineExceeded));
    }

    #[tokio::test]
    async fn done_reports_cancellation() {
        let token = CancellationToken::new();
        let ctx = context(token.clone(), None);
        assert!(ctx.remaining().is_none());

        token.cancel();
        assert_eq!(ctx.done().await, Error::Cancelled);
        assert_eq!(ctx.err(), Some(Error::Cancelled));
    }

    #[test]
    fn kind_schemes() {
        assert_eq!(Kind::Grpc.scheme(), "grpc");
        assert_eq!(Kind::Http.to_string(), "http");
    }
}
