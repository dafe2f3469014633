use core::time::Duration;

/// Engine settings forwarded to the tonic server.
#[derive(Clone, Copy, Debug)]
pub struct GrpcOptions {
    /// Serve HTTP/1.1 requests as well, e.g. for gRPC-web proxies.
    pub accept_http1: bool,
    pub http2_adaptive_window: bool,
    /// Bounds concurrent requests per connection.
    pub concurrency_limit_per_connection: Option<usize>,
    pub tcp_nodelay: bool,
    pub http2_keepalive_interval: Option<Duration>,
}

impl Default for GrpcOptions {
    fn default() -> Self {
        Self {
            accept_http1: true,
            http2_adaptive_window: true,
            concurrency_limit_per_connection: None,
            tcp_nodelay: true,
            http2_keepalive_interval: None,
        }
    }
}
