#![doc = include_str!("../README.md")]

pub mod config;
pub mod context;
pub mod endpoint;
mod error;
pub mod health;
pub mod lifecycle;
pub mod middleware;
pub mod registry;
pub mod transport;

pub use config::{Network, ServerConfig, ServerConfigBuilder};
pub use context::{CallContext, Kind, MergedToken, RequestServerInfo, TransportInfo, call_deadline};
pub use error::{Error, ReplyStatus, Result};
pub use health::{Health, HealthState};
pub use lifecycle::{Admission, Lifecycle, Phase, ServeGuard};
pub use middleware::{Handler, Middleware, chain};
pub use registry::{Discovery, Registrar, ServiceInstance, Target, Watcher};
pub use transport::{Endpointer, Server};
