//! Registrar and discovery boundary.
//!
//! Concrete backends (consul, etcd, ...) live outside this crate. A server's
//! endpoints are published through a [`Registrar`]; a client resolves a logical
//! service name back into endpoint URLs through a [`Discovery`]. Both sides
//! exchange [`ServiceInstance`] values whose endpoints have the same
//! `scheme://host:port` shape that servers advertise.

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// One running instance of a logical service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub endpoints: Vec<Url>,
}

impl ServiceInstance {
    /// First endpoint using `scheme`, e.g. `"grpc"`.
    pub fn endpoint(&self, scheme: &str) -> Option<&Url> {
        self.endpoints.iter().find(|url| url.scheme() == scheme)
    }
}

/// Publishes instances for discovery.
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn register(&self, instance: &ServiceInstance) -> Result<()>;
    async fn deregister(&self, instance: &ServiceInstance) -> Result<()>;
}

/// Resolves service names into instances.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn get_service(&self, name: &str) -> Result<Vec<ServiceInstance>>;
    async fn watch(&self, name: &str) -> Result<Box<dyn Watcher>>;
}

/// Stream of instance-set updates for one service.
#[async_trait]
pub trait Watcher: Send {
    /// Waits for the next change and returns the full current set.
    async fn next(&mut self) -> Result<Vec<ServiceInstance>>;
    async fn stop(&mut self) -> Result<()>;
}

/// Collects the endpoints with `scheme` across every instance of `name`.
///
/// # Errors
///
/// Propagates the discovery error, or returns [`Error::Registry`] when no
/// instance exposes an endpoint with `scheme`.
pub async fn resolve_endpoints(
    discovery: &dyn Discovery,
    name: &str,
    scheme: &str,
) -> Result<Vec<Url>> {
    let endpoints: Vec<Url> = discovery
        .get_service(name)
        .await?
        .iter()
        .filter_map(|instance| instance.endpoint(scheme).cloned())
        .collect();
    if endpoints.is_empty() {
        return Err(Error::Registry {
            reason: format!("no {scheme} endpoints for service {name:?}"),
        });
    }
    Ok(endpoints)
}

/// A client dial target such as `discovery:///helloworld` or
/// `direct:///127.0.0.1:9000`.
///
/// A bare `host:port` is treated as a direct target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    pub authority: String,
    pub endpoint: String,
}

impl Target {
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when the endpoint part is empty.
    pub fn parse(target: &str) -> Result<Self> {
        let parsed = match target.split_once("://") {
            Some((scheme, rest)) => {
                let (authority, endpoint) = rest.split_once('/').unwrap_or((rest, ""));
                Self {
                    scheme: scheme.to_string(),
                    authority: authority.to_string(),
                    endpoint: endpoint.to_string(),
                }
            }
            None => Self {
                scheme: "direct".to_string(),
                authority: String::new(),
                endpoint: target.to_string(),
            },
        };
        if parsed.endpoint.is_empty() {
            return Err(Error::InvalidConfig {
                reason: format!("target {target:?} has no endpoint"),
            });
        }
        Ok(parsed)
    }

    pub fn is_discovery(&self) -> bool {
        self.scheme == "discovery"
    }
}
