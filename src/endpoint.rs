//! Target endpoints: the virtual service address probes connect to.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::Error;

/// IP address family of a target
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

impl IpFamily {
    /// Family of an address
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }

    /// Short label used in unit names and log fields
    pub fn label(&self) -> &'static str {
        match self {
            Self::V4 => "v4",
            Self::V6 => "v6",
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which address families a run probes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamilyPolicy {
    /// IPv4 only
    #[default]
    V4,
    /// IPv6 only
    V6,
    /// One target per family
    #[serde(alias = "dual")]
    DualStack,
}

impl IpFamilyPolicy {
    /// Families required by this policy, IPv4 first
    pub fn families(&self) -> &'static [IpFamily] {
        match self {
            Self::V4 => &[IpFamily::V4],
            Self::V6 => &[IpFamily::V6],
            Self::DualStack => &[IpFamily::V4, IpFamily::V6],
        }
    }
}

impl std::str::FromStr for IpFamilyPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v4" | "ipv4" => Ok(Self::V4),
            "v6" | "ipv6" => Ok(Self::V6),
            "dual" | "dualstack" | "dual-stack" => Ok(Self::DualStack),
            other => Err(Error::config(format!(
                "unknown IP family '{}', expected v4, v6 or dual",
                other
            ))),
        }
    }
}

/// A virtual service address plus port, fixed for one harness run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetEndpoint {
    /// Virtual IP
    pub addr: IpAddr,
    /// Service port
    pub port: u16,
}

impl TargetEndpoint {
    /// Create a new target
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self { addr, port }
    }

    /// Address family of the target
    pub fn family(&self) -> IpFamily {
        IpFamily::of(&self.addr)
    }
}

impl fmt::Display for TargetEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr {
            IpAddr::V4(v4) => write!(f, "{}:{}", v4, self.port),
            IpAddr::V6(v6) => write!(f, "[{}]:{}", v6, self.port),
        }
    }
}

/// Resolve a target's endpoint string into socket addresses
pub async fn resolve(target: &TargetEndpoint) -> Result<Vec<SocketAddr>, Error> {
    let endpoint = target.to_string();
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(endpoint.as_str())
        .await
        .map_err(|e| Error::resolve(&endpoint, e.to_string()))?
        .collect();

    if addrs.is_empty() {
        return Err(Error::resolve(endpoint, "no addresses returned"));
    }
    Ok(addrs)
}

/// Pick one target per family required by `policy`
///
/// The first address of each family wins. Fails if a required family has no
/// address among `addresses`.
pub fn select_targets(
    addresses: &[IpAddr],
    port: u16,
    policy: IpFamilyPolicy,
) -> Result<Vec<TargetEndpoint>, Error> {
    policy
        .families()
        .iter()
        .map(|family| {
            addresses
                .iter()
                .find(|a| IpFamily::of(a) == *family)
                .map(|a| TargetEndpoint::new(*a, port))
                .ok_or_else(|| {
                    Error::resolve(
                        format!("port {}", port),
                        format!("service has no {} ingress address", family),
                    )
                })
        })
        .collect()
}
