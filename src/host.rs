/*
 * Copyright 2019 Joyent, Inc.
 */

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::ops::Deref;
use std::rc::Rc;
use std::sync::Arc;

use derive_more::{Display, Into};

use crate::error::Error;

/// The port number for a host. This is a type alias for u16.
pub type HostPort = u16;

/// The canonical textual form of a host socket address, `a.b.c.d:port` for
/// IPv4 and `[v6]:port` for IPv6. Used as the key of the per-thread address
/// registry.
#[derive(
    Clone, Debug, Display, Eq, Hash, Into, Ord, PartialOrd, PartialEq,
)]
pub struct HostAddress(String);

impl From<SocketAddr> for HostAddress {
    fn from(address: SocketAddr) -> Self {
        HostAddress(address.to_string())
    }
}

impl From<&SocketAddr> for HostAddress {
    fn from(address: &SocketAddr) -> Self {
        HostAddress(address.to_string())
    }
}

impl AsRef<str> for HostAddress {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

/// Health of a host as last reported by the cluster.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

impl Default for HealthStatus {
    fn default() -> Self {
        HealthStatus::Unknown
    }
}

/// Where a host lives. Empty for hosts the pool synthesizes itself.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Locality {
    pub region: String,
    pub zone: String,
    pub sub_zone: String,
}

/// A backend endpoint. Identity is the network address; everything else is
/// metadata owned by whoever constructed the record.
#[derive(Clone, Debug)]
pub struct Host {
    address: SocketAddr,
    hostname: String,
    locality: Locality,
    health: HealthStatus,
    priority: u32,
    weight: u32,
}

impl Host {
    /// Return a new `Host` for `address` with default metadata.
    pub fn new(address: SocketAddr) -> Self {
        Host {
            address,
            hostname: String::new(),
            locality: Locality::default(),
            health: HealthStatus::Unknown,
            priority: 0,
            weight: 1,
        }
    }

    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.hostname = hostname.to_string();
        self
    }

    pub fn with_locality(mut self, locality: Locality) -> Self {
        self.locality = locality;
        self
    }

    pub fn with_health(mut self, health: HealthStatus) -> Self {
        self.health = health;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn address(&self) -> &SocketAddr {
        &self.address
    }

    /// The registry key for this host.
    pub fn host_address(&self) -> HostAddress {
        HostAddress::from(&self.address)
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn locality(&self) -> &Locality {
        &self.locality
    }

    pub fn health(&self) -> HealthStatus {
        self.health
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }
}

/// A reference to a host held by a thread-local pool.
///
/// Cluster hosts are shared with the cluster and with every other worker
/// thread. Synthetic hosts are created by a pool for ad-hoc addresses and
/// never leave the thread that created them. Equality and hashing use the
/// identity of the referenced record, not its address.
#[derive(Clone)]
pub enum HostHandle {
    Cluster(Arc<Host>),
    Synthetic(Rc<Host>),
}

impl HostHandle {
    pub fn is_synthetic(&self) -> bool {
        match self {
            HostHandle::Cluster(_) => false,
            HostHandle::Synthetic(_) => true,
        }
    }

    fn as_ptr(&self) -> *const Host {
        match self {
            HostHandle::Cluster(host) => Arc::as_ptr(host),
            HostHandle::Synthetic(host) => Rc::as_ptr(host),
        }
    }

    /// Whether this handle refers to the given cluster host record.
    pub fn is_cluster_host(&self, host: &Arc<Host>) -> bool {
        self.as_ptr() == Arc::as_ptr(host)
    }
}

impl Deref for HostHandle {
    type Target = Host;

    fn deref(&self) -> &Host {
        match self {
            HostHandle::Cluster(host) => host,
            HostHandle::Synthetic(host) => host,
        }
    }
}

impl PartialEq for HostHandle {
    fn eq(&self, other: &HostHandle) -> bool {
        self.as_ptr() == other.as_ptr()
    }
}

impl Eq for HostHandle {}

impl Hash for HostHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_ptr().hash(state)
    }
}

impl fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = if self.is_synthetic() { "synthetic" } else { "cluster" };
        f.debug_struct("HostHandle")
            .field("kind", &kind)
            .field("address", self.address())
            .finish()
    }
}

/// Parse `ip:port` text naming a host outside the cluster.
///
/// The rightmost colon separates the port. If the text left of it contains
/// another colon the ip is read as an IPv6 literal, without brackets,
/// otherwise as IPv4. `::1:6379` is therefore `[::1]:6379`, while
/// `[::1]:6379` is rejected.
pub fn parse_host_address(text: &str) -> Result<SocketAddr, Error> {
    let colon = match text.rfind(':') {
        Some(pos) if pos + 1 < text.len() => pos,
        _ => return Err(Error::MalformedAddress(text.to_string())),
    };

    let (ip, port) = (&text[..colon], &text[colon + 1..]);
    let port: HostPort = port
        .parse()
        .map_err(|_| Error::MalformedAddress(text.to_string()))?;

    let ip: Result<IpAddr, _> = if ip.contains(':') {
        ip.parse::<Ipv6Addr>().map(IpAddr::V6)
    } else {
        ip.parse::<Ipv4Addr>().map(IpAddr::V4)
    };

    ip.map(|ip| SocketAddr::new(ip, port))
        .map_err(|e| Error::AddressConstruction {
            address: text.to_string(),
            reason: e.to_string(),
        })
}
