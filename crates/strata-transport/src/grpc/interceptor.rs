//! gRPC interceptors.
//!
//! Interceptors inspect or rewrite request metadata and may reject a call
//! with a [`Status`]. They run after every registered middleware, right
//! before the call reaches the service.

use super::{GrpcRequest, GrpcResponse};
use core::mem;
use std::sync::Arc;
use strata_core::middleware::{handler_fn, middleware_fn};
use strata_core::{CallContext, Handler, Middleware};
use tonic::Status;
use tonic::metadata::MetadataMap;

pub type Interceptor =
    Arc<dyn Fn(&CallContext, &mut MetadataMap) -> Result<(), Status> + Send + Sync>;

/// Wraps a closure as an [`Interceptor`].
pub fn interceptor_fn<F>(f: F) -> Interceptor
where
    F: Fn(&CallContext, &mut MetadataMap) -> Result<(), Status> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Runs `interceptors` in order as a single middleware. The first rejection
/// ends the call.
pub fn middleware(interceptors: Vec<Interceptor>) -> Middleware<GrpcRequest, GrpcResponse> {
    let interceptors: Arc<[Interceptor]> = interceptors.into();
    middleware_fn(move |next: Handler<GrpcRequest, GrpcResponse>| {
        let interceptors = Arc::clone(&interceptors);
        handler_fn(move |ctx: CallContext, mut req: GrpcRequest| {
            let next = Arc::clone(&next);
            let interceptors = Arc::clone(&interceptors);
            async move {
                if !interceptors.is_empty() {
                    let mut metadata = MetadataMap::from_headers(mem::take(req.headers_mut()));
                    for interceptor in interceptors.iter() {
                        interceptor(&ctx, &mut metadata)?;
                    }
                    *req.headers_mut() = metadata.into_headers();
                }
                next(ctx, req).await
            }
        })
    })
}
