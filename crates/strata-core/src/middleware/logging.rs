//! Per-call logging.

use super::{Handler, Middleware, handler_fn, middleware_fn};
use crate::CallContext;
use std::sync::Arc;
use std::time::Instant;

/// Middleware that emits one event per call with its latency and outcome.
///
/// Successful calls log at `debug`, failed calls at `warn`.
pub fn logging<Req, Res>() -> Middleware<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    middleware_fn(|next: Handler<Req, Res>| {
        handler_fn(move |ctx: CallContext, req: Req| {
            let next = Arc::clone(&next);
            async move {
                let start = Instant::now();
                let kind = ctx.transport().kind;
                let operation = ctx.info().full_method.clone();
                let res = next(ctx, req).await;
                let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                match &res {
                    Ok(_) => tracing::debug!(%kind, %operation, latency_ms, "call completed"),
                    Err(err) => tracing::warn!(
                        %kind,
                        %operation,
                        latency_ms,
                        code = ?err.code(),
                        reason = %err,
                        "call failed"
                    ),
                }
                res
            }
        })
    })
}
