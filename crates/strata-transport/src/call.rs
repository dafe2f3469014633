//! The per-call pipeline shared by every protocol binding.
//!
//! [`CallLayer`] wraps a protocol engine's routing service. For every request
//! it:
//!
//! 1. merges the server's process scope with a token owned by the call,
//! 2. computes the deadline from the server timeout and the call's own timeout,
//! 3. attaches a [`CallContext`] to the request extensions,
//! 4. runs the middleware chain around the wrapped service,
//! 5. turns an error from any of those steps into a protocol reply.
//!
//! The merged token is disposed on every exit path, including a deadline
//! firing, a panic unwinding out of the chain, or the connection dropping the
//! call future.

use core::convert::Infallible;
use core::marker::PhantomData;
use core::task::{Context, Poll};
use core::time::Duration;
use futures::future::BoxFuture;
use std::sync::Arc;
use strata_core::middleware::handler_fn;
use strata_core::{
    CallContext, Error, Handler, Kind, MergedToken, Middleware, RequestServerInfo, Result,
    TransportInfo, call_deadline,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service, ServiceExt};
use tracing::Instrument;

/// Request type seen by middleware of protocol `P`.
pub type CallRequest<P> = http::Request<<P as Protocol>::ReqBody>;

/// Reply type seen by middleware of protocol `P`.
pub type CallResponse<P> = http::Response<<P as Protocol>::ResBody>;

/// What the pipeline needs to know about a wire protocol.
pub trait Protocol: Send + Sync + 'static {
    type ReqBody: Send + 'static;
    type ResBody: Send + 'static;

    const KIND: Kind;

    /// Service and method a request addresses.
    fn request_info(req: &CallRequest<Self>) -> RequestServerInfo;

    /// Timeout the caller attached to the request, if any.
    fn call_timeout(req: &CallRequest<Self>) -> Option<Duration>;

    /// Splits an engine reply into success or a per-call error so middleware
    /// observes failures the engine encoded in the reply.
    fn classify(res: CallResponse<Self>) -> Result<CallResponse<Self>>;

    /// Encodes a per-call error as a reply.
    fn reject(err: Error) -> CallResponse<Self>;
}

struct Shared<P: Protocol> {
    scope: CancellationToken,
    transport: TransportInfo,
    timeout: Duration,
    middleware: Middleware<CallRequest<P>, CallResponse<P>>,
    span: tracing::Span,
    _protocol: PhantomData<fn() -> P>,
}

impl<P: Protocol> Shared<P> {
    async fn dispatch(
        &self,
        handler: Handler<CallRequest<P>, CallResponse<P>>,
        mut req: CallRequest<P>,
    ) -> CallResponse<P> {
        let start = Instant::now();
        let info = P::request_info(&req);
        let deadline = call_deadline(start, self.timeout, P::call_timeout(&req));

        // Cancelled when the call future is dropped, e.g. by a client reset.
        let call = CancellationToken::new();
        let _call_guard = call.clone().drop_guard();
        let merged = MergedToken::merge(&self.scope, &call);

        let span = tracing::debug_span!(
            parent: &self.span,
            "call",
            method = %info.full_method,
        );
        let ctx = CallContext::new(
            merged.token().clone(),
            deadline,
            info,
            self.transport.clone(),
        );
        req.extensions_mut().insert(ctx.clone());

        let fut = handler(ctx, req);
        let res = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .instrument(span)
                .await
                .unwrap_or(Err(Error::DeadlineExceeded)),
            None => fut.instrument(span).await,
        };
        merged.dispose();

        res.unwrap_or_else(P::reject)
    }
}

/// Tower layer installing the call pipeline around a protocol engine.
pub struct CallLayer<P: Protocol> {
    shared: Arc<Shared<P>>,
}

impl<P: Protocol> CallLayer<P> {
    /// `middleware` should already be composed, e.g. with
    /// [`strata_core::chain`].
    pub fn new(
        scope: CancellationToken,
        transport: TransportInfo,
        timeout: Duration,
        middleware: Middleware<CallRequest<P>, CallResponse<P>>,
        span: tracing::Span,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                scope,
                transport,
                timeout,
                middleware,
                span,
                _protocol: PhantomData,
            }),
        }
    }
}

impl<P: Protocol> Clone for CallLayer<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S, P> Layer<S> for CallLayer<P>
where
    P: Protocol,
    S: Service<CallRequest<P>, Response = CallResponse<P>, Error = Infallible>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
{
    type Service = CallService<P>;

    fn layer(&self, inner: S) -> Self::Service {
        let terminal = handler_fn(move |_ctx: CallContext, req: CallRequest<P>| {
            let inner = inner.clone();
            async move {
                let res = match inner.oneshot(req).await {
                    Ok(res) => res,
                    Err(never) => match never {},
                };
                P::classify(res)
            }
        });
        CallService {
            handler: (self.shared.middleware)(terminal),
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Service produced by [`CallLayer`].
pub struct CallService<P: Protocol> {
    shared: Arc<Shared<P>>,
    handler: Handler<CallRequest<P>, CallResponse<P>>,
}

impl<P: Protocol> Clone for CallService<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<P: Protocol> Service<CallRequest<P>> for CallService<P> {
    type Response = CallResponse<P>;
    type Error = Infallible;
    type Future = BoxFuture<'static, core::result::Result<Self::Response, Self::Error>>;

    // The wrapped engine is driven through `oneshot`, which waits for its
    // readiness per call.
    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<core::result::Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: CallRequest<P>) -> Self::Future {
        let shared = Arc::clone(&self.shared);
        let handler = Arc::clone(&self.handler);
        Box::pin(async move { Ok(shared.dispatch(handler, req).await) })
    }
}
