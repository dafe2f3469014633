#![doc = include_str!("../README.md")]

pub mod app;
pub mod call;
pub mod grpc;
pub mod http;

pub use app::{App, AppBuilder};
pub use call::{CallLayer, CallService, Protocol};
pub use grpc::{GrpcOptions, GrpcServer, GrpcServerBuilder};
pub use self::http::{HttpOptions, HttpServer, HttpServerBuilder};
pub use strata_core;
