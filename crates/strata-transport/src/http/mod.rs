//! HTTP binding on `axum`.
//!
//! ## Structure
//!
//! - [`server`] - [`HttpServer`] and its builder, plus the `/healthz` and
//!   `/_meta/routes` meta-services.

mod server;

pub use server::{HttpOptions, HttpServer, HttpServerBuilder};

use crate::call::{CallRequest, CallResponse, Protocol};
use axum::body::Body;
use axum::extract::MatchedPath;
use axum::response::IntoResponse;
use core::time::Duration;
use http::StatusCode;
use strata_core::{Error, Kind, RequestServerInfo, Result};
use tonic::Code;

pub type HttpRequest = http::Request<Body>;
pub type HttpResponse = http::Response<Body>;

/// Marker for the HTTP wire protocol.
#[derive(Clone, Copy, Debug)]
pub struct Http;

impl Protocol for Http {
    type ReqBody = Body;
    type ResBody = Body;

    const KIND: Kind = Kind::Http;

    fn request_info(req: &CallRequest<Self>) -> RequestServerInfo {
        let route = req
            .extensions()
            .get::<MatchedPath>()
            .map_or_else(|| req.uri().path(), MatchedPath::as_str);
        RequestServerInfo::new(route, format!("{} {route}", req.method()))
    }

    fn call_timeout(_req: &CallRequest<Self>) -> Option<Duration> {
        None
    }

    fn classify(res: CallResponse<Self>) -> Result<CallResponse<Self>> {
        Ok(res)
    }

    fn reject(err: Error) -> CallResponse<Self> {
        let status = status_code(err.code());
        let message = match err {
            Error::Call { message, .. } => message,
            Error::Status(status) => status.get().message().to_string(),
            Error::Panicked { .. } => "Internal server error".to_string(),
            other => other.to_string(),
        };
        (status, message).into_response()
    }
}

/// Maps a per-call status code onto the closest HTTP status.
pub fn status_code(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => {
            StatusCode::BAD_REQUEST
        }
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists | Code::Aborted => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::Unknown | Code::Internal | Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_codes_like_a_gateway() {
        assert_eq!(status_code(Code::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_code(Code::DeadlineExceeded), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_code(Code::Cancelled).as_u16(), 499);
        assert_eq!(status_code(Code::Unavailable), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn request_info_uses_method_and_path() {
        let req = http::Request::post("/users/7").body(Body::empty()).unwrap();
        let info = Http::request_info(&req);
        assert_eq!(info.service, "/users/7");
        assert_eq!(info.full_method, "POST /users/7");
    }

    #[test]
    fn panics_are_not_exposed() {
        let res = Http::reject(Error::Panicked {
            message: "secret".to_string(),
        });
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
