//! gRPC binding on `tonic`.
//!
//! ## Structure
//!
//! - [`server`] - [`GrpcServer`], its builder and the health and reflection
//!   meta-services.
//! - [`options`] - [`GrpcOptions`], engine knobs forwarded to tonic.
//! - [`interceptor`] - metadata interceptors run innermost in the chain.

pub mod interceptor;
mod options;
mod server;

pub use interceptor::Interceptor;
pub use options::GrpcOptions;
pub use server::{GrpcServer, GrpcServerBuilder};

use crate::call::{CallRequest, CallResponse, Protocol};
use core::time::Duration;
use strata_core::{Error, Kind, RequestServerInfo, Result};
use tonic::body::Body;
use tonic::{Code, Status};

pub type GrpcRequest = http::Request<Body>;
pub type GrpcResponse = http::Response<Body>;

/// Header carrying the caller's deadline.
pub const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Marker for the gRPC wire protocol.
#[derive(Clone, Copy, Debug)]
pub struct Grpc;

impl Protocol for Grpc {
    type ReqBody = Body;
    type ResBody = Body;

    const KIND: Kind = Kind::Grpc;

    fn request_info(req: &CallRequest<Self>) -> RequestServerInfo {
        let path = req.uri().path();
        let service = path
            .trim_start_matches('/')
            .split_once('/')
            .map_or("", |(service, _)| service);
        RequestServerInfo::new(service, path)
    }

    fn call_timeout(req: &CallRequest<Self>) -> Option<Duration> {
        req.headers()
            .get(GRPC_TIMEOUT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_timeout)
    }

    // Unary failures come back trailers-only, with the status in the headers.
    // The parsed status keeps details and custom metadata for `reject`.
    fn classify(res: CallResponse<Self>) -> Result<CallResponse<Self>> {
        match Status::from_header_map(res.headers()) {
            Some(status) if status.code() != Code::Ok => Err(status.into()),
            _ => Ok(res),
        }
    }

    fn reject(err: Error) -> CallResponse<Self> {
        Status::from(err).into_http()
    }
}

/// Parses a `grpc-timeout` value: up to eight digits followed by one of
/// `H`, `M`, `S`, `m`, `u` or `n`.
pub fn parse_timeout(value: &str) -> Option<Duration> {
    if !value.is_ascii() || value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    let timeout = match unit {
        "H" => Duration::from_secs(amount * 3600),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallLayer;
    use core::convert::Infallible;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use strata_core::middleware::{handler_fn, middleware_fn};
    use strata_core::{CallContext, Handler, Middleware, TransportInfo, chain};
    use tokio_util::sync::CancellationToken;
    use tower::{Layer, ServiceExt};

    fn request(path: &str) -> GrpcRequest {
        http::Request::post(path).body(Body::empty()).unwrap()
    }

    #[test]
    fn parses_grpc_timeouts() {
        assert_eq!(parse_timeout("1H"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_timeout("2M"), Some(Duration::from_secs(120)));
        assert_eq!(parse_timeout("3S"), Some(Duration::from_secs(3)));
        assert_eq!(parse_timeout("250m"), Some(Duration::from_millis(250)));
        assert_eq!(parse_timeout("10u"), Some(Duration::from_micros(10)));
        assert_eq!(parse_timeout("99999999n"), Some(Duration::from_nanos(99_999_999)));

        assert_eq!(parse_timeout("S"), None);
        assert_eq!(parse_timeout("100"), None);
        assert_eq!(parse_timeout("123456789S"), None);
        assert_eq!(parse_timeout("-1S"), None);
        assert_eq!(parse_timeout("5x"), None);
    }

    #[test]
    fn request_info_splits_service_and_method() {
        let info = Grpc::request_info(&request("/helloworld.Greeter/SayHello"));
        assert_eq!(info.service, "helloworld.Greeter");
        assert_eq!(info.full_method, "/helloworld.Greeter/SayHello");
    }

    #[test]
    fn call_timeout_reads_header() {
        let mut req = request("/a.B/C");
        assert_eq!(Grpc::call_timeout(&req), None);
        req.headers_mut()
            .insert(GRPC_TIMEOUT_HEADER, "50m".parse().unwrap());
        assert_eq!(Grpc::call_timeout(&req), Some(Duration::from_millis(50)));
    }

    #[test]
    fn trailers_only_errors_are_classified() {
        let res: GrpcResponse = Status::not_found("missing").into_http();
        let err = Grpc::classify(res).unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
        assert_eq!(err.to_string(), "NotFound: missing");

        let ok: GrpcResponse = http::Response::new(Body::empty());
        assert!(Grpc::classify(ok).is_ok());
    }

    #[test]
    fn rejection_carries_status() {
        let res = Grpc::reject(Error::DeadlineExceeded);
        let status = Status::from_header_map(res.headers()).unwrap();
        assert_eq!(status.code(), Code::DeadlineExceeded);
    }

    #[tokio::test]
    async fn handler_statuses_pass_through_unchanged() {
        let inner = tower::service_fn(|_req: GrpcRequest| async {
            let mut status =
                Status::with_details(Code::FailedPrecondition, "quota", b"rich-detail"[..].into());
            status
                .metadata_mut()
                .insert("x-retry-after", "5".parse().unwrap());
            Ok::<_, Infallible>(status.into_http())
        });
        let codes: Arc<Mutex<Vec<Code>>> = Arc::default();
        let observe: Middleware<GrpcRequest, GrpcResponse> = {
            let codes = Arc::clone(&codes);
            middleware_fn(move |next: Handler<GrpcRequest, GrpcResponse>| {
                let codes = Arc::clone(&codes);
                handler_fn(move |ctx: CallContext, req: GrpcRequest| {
                    let next = Arc::clone(&next);
                    let codes = Arc::clone(&codes);
                    async move {
                        let res = next(ctx, req).await;
                        if let Err(err) = &res {
                            codes.lock().push(err.code());
                        }
                        res
                    }
                })
            })
        };
        let svc = CallLayer::<Grpc>::new(
            CancellationToken::new(),
            TransportInfo {
                kind: Kind::Grpc,
                endpoint: "grpc://127.0.0.1:9000".to_string(),
            },
            Duration::from_secs(5),
            chain([observe]),
            tracing::Span::none(),
        )
        .layer(inner);

        let res = svc.oneshot(request("/quota.Service/Reserve")).await.unwrap();
        let status = Status::from_header_map(res.headers()).unwrap();
        assert_eq!(status.code(), Code::FailedPrecondition);
        assert_eq!(status.message(), "quota");
        assert_eq!(status.details(), b"rich-detail");
        assert_eq!(res.headers()["x-retry-after"], "5");
        assert_eq!(*codes.lock(), vec![Code::FailedPrecondition]);
    }

    #[tokio::test]
    async fn handler_deadline_message_is_kept() {
        let inner = tower::service_fn(|_req: GrpcRequest| async {
            Ok::<_, Infallible>(Status::deadline_exceeded("db query slow").into_http())
        });
        let svc = CallLayer::<Grpc>::new(
            CancellationToken::new(),
            TransportInfo {
                kind: Kind::Grpc,
                endpoint: "grpc://127.0.0.1:9000".to_string(),
            },
            Duration::ZERO,
            chain(Vec::<Middleware<GrpcRequest, GrpcResponse>>::new()),
            tracing::Span::none(),
        )
        .layer(inner);

        let res = svc.oneshot(request("/db.Store/Query")).await.unwrap();
        let status = Status::from_header_map(res.headers()).unwrap();
        assert_eq!(status.code(), Code::DeadlineExceeded);
        assert_eq!(status.message(), "db query slow");
    }
}
