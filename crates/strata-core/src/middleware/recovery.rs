//! Panic recovery.
//!
//! [`recovery`] catches a panic raised anywhere below it in the chain, either
//! while building the inner future or while polling it, and turns it into an
//! [`Error::Panicked`] for that call alone. The server keeps running and other
//! in-flight calls are unaffected.

use super::{Handler, Middleware, handler_fn, middleware_fn};
use crate::{CallContext, Error};
use core::any::Any;
use futures::FutureExt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Middleware that converts panics into per-call errors.
///
/// Register it first so it is outermost and covers every other middleware.
pub fn recovery<Req, Res>() -> Middleware<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    middleware_fn(|next: Handler<Req, Res>| {
        handler_fn(move |ctx: CallContext, req: Req| {
            let next = Arc::clone(&next);
            let method = ctx.info().full_method.clone();
            async move {
                let fut = match panic::catch_unwind(AssertUnwindSafe(|| next(ctx, req))) {
                    Ok(fut) => fut,
                    Err(payload) => return Err(recovered(&method, payload.as_ref())),
                };
                match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(res) => res,
                    Err(payload) => Err(recovered(&method, payload.as_ref())),
                }
            }
        })
    })
}

fn recovered(method: &str, payload: &(dyn Any + Send)) -> Error {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(method, panic = %message, "recovered from handler panic");
    Error::Panicked { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::chain;
    use crate::{Kind, RequestServerInfo, Result, TransportInfo};
    use futures::future::BoxFuture;
    use tokio_util::sync::CancellationToken;

    fn context() -> CallContext {
        CallContext::new(
            CancellationToken::new(),
            None,
            RequestServerInfo::new("test.Service", "/test.Service/Boom"),
            TransportInfo {
                kind: Kind::Http,
                endpoint: "http://127.0.0.1:0".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn panic_while_polling_becomes_error() {
        let boom: Handler<u32, u32> = handler_fn(|_ctx, n: u32| async move {
            if n > 1 {
                panic!("too big: {n}");
            }
            Ok(n)
        });
        let handler = chain([recovery()])(boom);

        assert_eq!(handler(context(), 1).await, Ok(1));
        assert_eq!(
            handler(context(), 7).await,
            Err(Error::Panicked {
                message: "too big: 7".to_string()
            })
        );
    }

    #[tokio::test]
    async fn panic_while_building_future_becomes_error() {
        let boom: Handler<(), ()> =
            Arc::new(|_ctx: CallContext, (): ()| -> BoxFuture<'static, Result<()>> {
                panic!("eager")
            });
        let handler = chain([recovery()])(boom);

        assert_eq!(
            handler(context(), ()).await,
            Err(Error::Panicked {
                message: "eager".to_string()
            })
        );
    }
}
