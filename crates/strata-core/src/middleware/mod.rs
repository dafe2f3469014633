//! Request-handling decorators applied uniformly to every inbound call.
//!
//! A [`Handler`] turns a request into a reply inside a [`CallContext`]. A
//! [`Middleware`] turns one handler into another. [`chain`] composes an ordered
//! list so that the first middleware is outermost: it observes the request
//! first and the reply last. Any middleware may short-circuit by returning
//! without calling the handler it wraps.
//!
//! Handlers and middleware are generic over the request and reply types so
//! each protocol binding plugs in its own while sharing the same contract.
//!
//! ## Structure
//!
//! - [`recovery`] - turns panics into per-call errors.
//! - [`logging`] - records method, latency and outcome of each call.

pub mod logging;
pub mod recovery;

use crate::{CallContext, Result};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Terminal or decorated request handler.
pub type Handler<Req, Res> =
    Arc<dyn Fn(CallContext, Req) -> BoxFuture<'static, Result<Res>> + Send + Sync>;

/// A function from the next handler to a new handler.
pub type Middleware<Req, Res> = Arc<dyn Fn(Handler<Req, Res>) -> Handler<Req, Res> + Send + Sync>;

/// Wraps an async closure as a [`Handler`].
pub fn handler_fn<Req, Res, F, Fut>(f: F) -> Handler<Req, Res>
where
    F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Res>> + Send + 'static,
{
    Arc::new(move |ctx: CallContext, req: Req| -> BoxFuture<'static, Result<Res>> {
        Box::pin(f(ctx, req))
    })
}

/// Wraps a handler transform as a [`Middleware`].
pub fn middleware_fn<Req, Res, F>(f: F) -> Middleware<Req, Res>
where
    F: Fn(Handler<Req, Res>) -> Handler<Req, Res> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Composes `middleware` so that `chain([m1, m2, m3])(h) == m1(m2(m3(h)))`.
///
/// An empty list yields the identity transform.
pub fn chain<Req, Res>(
    middleware: impl IntoIterator<Item = Middleware<Req, Res>>,
) -> Middleware<Req, Res>
where
    Req: 'static,
    Res: 'static,
{
    let middleware: Vec<_> = middleware.into_iter().collect();
    Arc::new(move |next: Handler<Req, Res>| {
        middleware
            .iter()
            .rev()
            .fold(next, |handler, m| m(handler))
    })
}
