//! Core types: domain identifiers, service addressing and clock helpers.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Largest AS number rendered in plain decimal (BGP-compatible range).
const MAX_BGP_AS: u64 = u32::MAX as u64;
/// AS numbers are 48 bits wide.
const MAX_AS: u64 = (1 << 48) - 1;

/// Network-domain identifier (`ISD-AS`), e.g. `1-ff00:0:110`.
///
/// A domain anchors a trust chain: its certificates are issued under the
/// roots of trust of its ISD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DomainId {
    isd: u16,
    asn: u64,
}

impl DomainId {
    /// `0-0`: matches any domain in topology queries.
    pub const WILDCARD: DomainId = DomainId { isd: 0, asn: 0 };

    /// Create a domain identifier from its ISD and AS numbers.
    pub fn new(isd: u16, asn: u64) -> Result<Self, CoreError> {
        if asn > MAX_AS {
            return Err(CoreError::InvalidIdentifier {
                value: format!("{isd}-{asn}"),
                reason: "AS number exceeds 48 bits".to_string(),
            });
        }
        Ok(Self { isd, asn })
    }

    /// Isolation domain this AS belongs to.
    pub fn isd(&self) -> u16 {
        self.isd
    }

    /// AS number within the ISD.
    pub fn asn(&self) -> u64 {
        self.asn
    }

    /// Wildcard identifiers (zero ISD or zero AS) never name a concrete domain.
    pub fn is_wildcard(&self) -> bool {
        self.isd == 0 || self.asn == 0
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.asn <= MAX_BGP_AS {
            write!(f, "{}-{}", self.isd, self.asn)
        } else {
            write!(
                f,
                "{}-{:x}:{:x}:{:x}",
                self.isd,
                (self.asn >> 32) & 0xffff,
                (self.asn >> 16) & 0xffff,
                self.asn & 0xffff
            )
        }
    }
}

impl FromStr for DomainId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| CoreError::InvalidIdentifier {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let (isd, asn) = s.split_once('-').ok_or_else(|| invalid("missing '-'"))?;
        let isd: u16 = isd.parse().map_err(|_| invalid("bad ISD number"))?;

        let asn = if asn.contains(':') {
            let groups: Vec<&str> = asn.split(':').collect();
            if groups.len() != 3 {
                return Err(invalid("AS must have three ':'-separated groups"));
            }
            let mut value = 0u64;
            for group in groups {
                let part =
                    u16::from_str_radix(group, 16).map_err(|_| invalid("bad AS hex group"))?;
                value = (value << 16) | u64::from(part);
            }
            value
        } else {
            let value: u64 = asn.parse().map_err(|_| invalid("bad AS number"))?;
            if value > MAX_BGP_AS {
                return Err(invalid("decimal AS numbers must fit in 32 bits"));
            }
            value
        };

        DomainId::new(isd, asn)
    }
}

impl TryFrom<String> for DomainId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DomainId> for String {
    fn from(value: DomainId) -> Self {
        value.to_string()
    }
}

/// Service roles reachable inside a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// Mapping aggregator that originates entries
    Aggregator,
    /// Gossip relay that stores and re-gossips entries
    Relay,
    /// Registry that serves gossip membership
    Registry,
    /// Certificate authority serving chains and roots of trust
    CertificateAuthority,
}

impl ServiceKind {
    fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Aggregator => "aggregator",
            ServiceKind::Relay => "relay",
            ServiceKind::Registry => "registry",
            ServiceKind::CertificateAuthority => "ca",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aggregator" => Ok(ServiceKind::Aggregator),
            "relay" => Ok(ServiceKind::Relay),
            "registry" => Ok(ServiceKind::Registry),
            "ca" => Ok(ServiceKind::CertificateAuthority),
            other => Err(CoreError::InvalidIdentifier {
                value: other.to_string(),
                reason: "unknown service kind".to_string(),
            }),
        }
    }
}

/// Logical address of a service instance: a domain plus the role inside it.
///
/// Resolving this to a socket address is the transport's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddress {
    pub domain: DomainId,
    pub service: ServiceKind,
}

impl PeerAddress {
    pub fn new(domain: DomainId, service: ServiceKind) -> Self {
        Self { domain, service }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.service)
    }
}

impl FromStr for PeerAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (domain, service) = s.split_once('/').ok_or_else(|| CoreError::InvalidIdentifier {
            value: s.to_string(),
            reason: "expected <domain>/<service>".to_string(),
        })?;
        Ok(Self {
            domain: domain.parse()?,
            service: service.parse()?,
        })
    }
}

/// Current time as Unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
