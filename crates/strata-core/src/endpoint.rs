//! Listener binding and advertisable endpoint resolution.
//!
//! A server is configured with a bind address such as `:0`, `0.0.0.0:9000` or
//! `[::]:50051`. None of those can be handed to a client. This module turns the
//! configured address plus the socket the listener actually bound into a URL
//! of the form `scheme://host:port`:
//!
//! - A concrete configured host is kept as written.
//! - A wildcard host (empty, `0.0.0.0`, `::`) is replaced by a routable local
//!   address obtained from a [`HostProbe`].
//! - The port always comes from the bound socket, so `:0` advertises the
//!   ephemeral port the kernel picked.

use crate::{Error, Kind, Network, Result};
use std::io;
use std::net::{
    IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, ToSocketAddrs, UdpSocket,
};
use std::sync::Arc;
use url::Url;

/// Looks up a host address other machines can use to reach this one.
pub type HostProbe = Arc<dyn Fn() -> io::Result<IpAddr> + Send + Sync>;

// Documentation-range targets. Connecting a UDP socket only performs a route
// lookup; nothing is sent.
const PROBE_V4: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 9);
const PROBE_V6: SocketAddr = SocketAddr::new(
    IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1)),
    9,
);

/// Splits `host:port`, accepting `[v6]:port`, `:port` and `host:`.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] when the port separator is missing or an
/// IPv6 host is not bracketed.
pub fn split_host_port(address: &str) -> Result<(&str, &str)> {
    let invalid = |reason: &str| Error::InvalidConfig {
        reason: format!("address {address:?}: {reason}"),
    };

    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| invalid("missing ']' in address"))?;
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| invalid("missing port"))?;
        return Ok((host, port));
    }

    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| invalid("missing port"))?;
    if host.contains(':') {
        return Err(invalid("too many colons"));
    }
    Ok((host, port))
}

/// Joins a host and port, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Returns `true` when `host` binds every interface.
pub fn is_wildcard(host: &str) -> bool {
    matches!(host, "" | "0.0.0.0" | "::" | "[::]")
}

/// Binds a non-blocking listener for `address` on `network`.
///
/// # Errors
///
/// Returns [`Error::Bind`] when the host does not resolve to an address of the
/// requested family or the socket cannot be bound.
pub fn bind(network: Network, address: &str) -> Result<TcpListener> {
    let (host, port) = split_host_port(address)?;
    let port = if port.is_empty() {
        0
    } else {
        port.parse::<u16>().map_err(|_| Error::InvalidConfig {
            reason: format!("invalid port in address {address:?}"),
        })?
    };

    let candidates: Vec<SocketAddr> = if is_wildcard(host) {
        match (network, host) {
            (Network::Tcp6, _) | (Network::Tcp, "::" | "[::]") => {
                vec![SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port)]
            }
            _ => vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)],
        }
    } else {
        (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::bind(address, &e))?
            .filter(|addr| match network {
                Network::Tcp => true,
                Network::Tcp4 => addr.is_ipv4(),
                Network::Tcp6 => addr.is_ipv6(),
            })
            .collect()
    };

    if candidates.is_empty() {
        return Err(Error::Bind {
            address: address.to_string(),
            kind: io::ErrorKind::AddrNotAvailable,
            message: format!("no {network} address for host {host:?}"),
        });
    }

    let listener = TcpListener::bind(&candidates[..]).map_err(|e| Error::bind(address, &e))?;
    listener
        .set_nonblocking(true)
        .map_err(|e| Error::bind(address, &e))?;
    Ok(listener)
}

/// Computes the advertisable `host:port` for a listener bound at `bound`.
///
/// # Errors
///
/// Returns [`Error::Resolve`] when the bound port is zero or the configured
/// host is a wildcard and `probe` finds no usable address.
pub fn extract(configured: &str, bound: SocketAddr, probe: &HostProbe) -> Result<String> {
    let (host, _) = split_host_port(configured)?;
    let resolve_err = |reason: String| Error::Resolve {
        address: configured.to_string(),
        reason,
    };

    let port = bound.port();
    if port == 0 {
        return Err(resolve_err("listener reported port 0".to_string()));
    }

    if !is_wildcard(host) {
        return Ok(join_host_port(host, port));
    }

    let ip = probe().map_err(|e| resolve_err(e.to_string()))?;
    if ip.is_unspecified() {
        return Err(resolve_err(format!("probe returned unspecified address {ip}")));
    }
    Ok(join_host_port(&ip.to_string(), port))
}

/// Builds the endpoint URL for a server of `kind` reachable at `host_port`.
///
/// # Errors
///
/// Returns [`Error::Resolve`] when the pair does not form a valid URL.
pub fn endpoint_url(kind: Kind, host_port: &str) -> Result<Url> {
    Url::parse(&format!("{}://{host_port}", kind.scheme())).map_err(|e| Error::Resolve {
        address: host_port.to_string(),
        reason: e.to_string(),
    })
}

/// Default [`HostProbe`]: the local address of the interface holding the
/// default route, IPv4 first.
///
/// # Errors
///
/// Fails when neither address family has a route to a non-local destination.
pub fn routable_host() -> io::Result<IpAddr> {
    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no routable interface");

    for (local, target) in [
        (SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0), PROBE_V4),
        (SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0), PROBE_V6),
    ] {
        let probed = UdpSocket::bind(local)
            .and_then(|socket| socket.connect(target).map(|()| socket))
            .and_then(|socket| socket.local_addr());
        match probed {
            Ok(addr) if !addr.ip().is_loopback() && !addr.ip().is_unspecified() => {
                return Ok(addr.ip());
            }
            Ok(addr) => {
                last_err = io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("only found non-routable address {}", addr.ip()),
                );
            }
            Err(e) => last_err = e,
        }
    }

    Err(last_err)
}
