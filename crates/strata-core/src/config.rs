use crate::endpoint::{self, HostProbe};
use crate::{Error, Result};
use core::fmt;
use core::str::FromStr;
use core::time::Duration;
use std::sync::Arc;
use url::Url;

/// Default per-request timeout applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default bind address: every interface, ephemeral port.
pub const DEFAULT_ADDRESS: &str = ":0";

/// Stream network a server listens on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Network {
    /// IPv4 or IPv6, whichever the address resolves to first.
    #[default]
    Tcp,
    Tcp4,
    Tcp6,
}

impl Network {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Tcp4 => "tcp4",
            Self::Tcp6 => "tcp6",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "tcp4" => Ok(Self::Tcp4),
            "tcp6" => Ok(Self::Tcp6),
            other => Err(Error::UnsupportedNetwork(other.to_string())),
        }
    }
}

/// Validated, immutable settings shared by every protocol binding.
///
/// Built once through [`ServerConfig::builder`] and consumed when the server is
/// constructed. Protocol-specific settings (middleware, interceptors, engine
/// options) live on each binding's own builder.
#[derive(Clone)]
pub struct ServerConfig {
    network: Network,
    address: String,
    timeout: Duration,
    shutdown_timeout: Option<Duration>,
    endpoint: Option<Url>,
    host_probe: HostProbe,
    span: Option<tracing::Span>,
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Per-request timeout. Zero means calls are not bounded by the server.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// How long `stop` waits for in-flight calls before aborting the serve loop.
    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.shutdown_timeout
    }

    /// Explicit advertised endpoint, bypassing address resolution.
    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    pub fn host_probe(&self) -> &HostProbe {
        &self.host_probe
    }

    /// Span every server event is recorded under, if one was supplied.
    pub fn span(&self) -> Option<&tracing::Span> {
        self.span.as_ref()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: Network::Tcp,
            address: DEFAULT_ADDRESS.to_string(),
            timeout: DEFAULT_TIMEOUT,
            shutdown_timeout: None,
            endpoint: None,
            host_probe: Arc::new(endpoint::routable_host),
            span: None,
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("network", &self.network)
            .field("address", &self.address)
            .field("timeout", &self.timeout)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("endpoint", &self.endpoint.as_ref().map(Url::as_str))
            .finish_non_exhaustive()
    }
}

/// Builder for [`ServerConfig`]. Values are checked in [`build`].
///
/// [`build`]: ServerConfigBuilder::build
#[derive(Default)]
pub struct ServerConfigBuilder {
    network: Option<String>,
    address: Option<String>,
    timeout: Option<Duration>,
    shutdown_timeout: Option<Duration>,
    endpoint: Option<Url>,
    host_probe: Option<HostProbe>,
    span: Option<tracing::Span>,
}

impl ServerConfigBuilder {
    /// `tcp`, `tcp4` or `tcp6`.
    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    /// `host:port`; either part may be empty or a wildcard.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    pub fn endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Replaces the routable-host lookup used for wildcard binds.
    pub fn host_probe<F>(mut self, probe: F) -> Self
    where
        F: Fn() -> std::io::Result<std::net::IpAddr> + Send + Sync + 'static,
    {
        self.host_probe = Some(Arc::new(probe));
        self
    }

    pub fn span(mut self, span: tracing::Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Validates the collected values.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedNetwork`] for an unknown network.
    /// - [`Error::InvalidConfig`] for a malformed address or an endpoint
    ///   override without a host.
    pub fn build(self) -> Result<ServerConfig> {
        let defaults = ServerConfig::default();

        let network = match self.network {
            Some(network) => network.parse()?,
            None => defaults.network,
        };

        let address = self.address.unwrap_or(defaults.address);
        let (_, port) = endpoint::split_host_port(&address)?;
        if !port.is_empty() && port.parse::<u16>().is_err() {
            return Err(Error::InvalidConfig {
                reason: format!("invalid port in address {address:?}"),
            });
        }

        if let Some(endpoint) = &self.endpoint {
            if endpoint.host_str().is_none_or(str::is_empty) {
                return Err(Error::InvalidConfig {
                    reason: format!("endpoint {endpoint} has no host"),
                });
            }
        }

        Ok(ServerConfig {
            network,
            address,
            timeout: self.timeout.unwrap_or(defaults.timeout),
            shutdown_timeout: self.shutdown_timeout,
            endpoint: self.endpoint,
            host_probe: self.host_probe.unwrap_or(defaults.host_probe),
            span: self.span,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::builder().build().unwrap();
        assert_eq!(config.network(), Network::Tcp);
        assert_eq!(config.address(), ":0");
        assert_eq!(config.timeout(), DEFAULT_TIMEOUT);
        assert!(config.shutdown_timeout().is_none());
        assert!(config.endpoint().is_none());
    }

    #[test]
    fn rejects_unknown_network() {
        let err = ServerConfig::builder().network("udp").build().unwrap_err();
        assert_eq!(err, Error::UnsupportedNetwork("udp".to_string()));
    }

    #[test]
    fn rejects_bad_port() {
        let err = ServerConfig::builder()
            .address("127.0.0.1:http")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));

        let err = ServerConfig::builder()
            .address("127.0.0.1")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn accepts_wildcards() {
        for address in [":0", "0.0.0.0:9000", "[::]:0", "localhost:", ":8080"] {
            ServerConfig::builder()
                .address(address)
                .build()
                .unwrap_or_else(|e| panic!("{address}: {e}"));
        }
    }

    #[test]
    fn rejects_hostless_endpoint() {
        let err = ServerConfig::builder()
            .endpoint(Url::parse("unix:/tmp/sock").unwrap())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn zero_timeout_is_allowed() {
        let config = ServerConfig::builder()
            .timeout(Duration::ZERO)
            .build()
            .unwrap();
        assert!(config.timeout().is_zero());
    }
}
