//! Replica-set member and topology types.

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::UpgradeError;

/// Machine identity of a replica-set member, e.g. `0` or `1/lxc/2`.
///
/// Accepts both the bare id and the tag form (`machine-1-lxc-2`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let id = match raw.strip_prefix("machine-") {
            Some(tagged) => tagged.replace('-', "/"),
            None => raw.to_string(),
        };

        let segments: Vec<&str> = id.split('/').collect();
        let valid = !id.is_empty()
            && segments.len() % 2 == 1
            && segments.iter().enumerate().all(|(i, segment)| {
                if i % 2 == 0 {
                    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit())
                } else {
                    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_lowercase())
                }
            });

        if valid {
            Ok(Self(id))
        } else {
            Err(format!("invalid machine identity {:?}", raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Tag form used by the host-local agent, e.g. `machine-1-lxc-2`.
    pub fn tag(&self) -> String {
        format!("machine-{}", self.0.replace('/', "-"))
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Replica-set role at discovery time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Secondary,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "Primary"),
            Self::Secondary => write!(f, "Secondary"),
        }
    }
}

/// Last-known health reported by the membership authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MemberHealth {
    Healthy,
    Unhealthy(String),
    Unknown,
}

impl MemberHealth {
    pub fn from_status(status: Option<&str>) -> Self {
        match status.map(str::trim) {
            None | Some("") => Self::Unknown,
            Some(s) => match s.to_ascii_lowercase().as_str() {
                "healthy" | "ok" | "started" | "up" => Self::Healthy,
                _ => Self::Unhealthy(s.to_string()),
            },
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl fmt::Display for MemberHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy(status) => write!(f, "{}", status),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A single replica-set member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub id: MemberId,
    pub address: String,
    pub series: String,
    pub role: Role,
    pub health: MemberHealth,
}

/// Validate a transport address: an IP literal or a DNS hostname.
pub fn parse_address(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty address".to_string());
    }

    if let Ok(ip) = trimmed.parse::<IpAddr>() {
        return Ok(ip.to_string());
    }

    let valid_hostname = trimmed.len() <= 253
        && trimmed.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        });

    if valid_hostname {
        Ok(trimmed.to_ascii_lowercase())
    } else {
        Err(format!("invalid address {:?}", raw))
    }
}

/// Snapshot of the replica set: one primary plus secondaries in discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topology {
    primary: Member,
    secondaries: Vec<Member>,
}

impl Topology {
    /// Build a topology, enforcing roles and address/identity uniqueness.
    pub fn new(primary: Member, secondaries: Vec<Member>) -> Result<Self, UpgradeError> {
        if primary.role != Role::Primary {
            return Err(UpgradeError::Discovery(format!(
                "{} is not a primary",
                primary.id
            )));
        }
        if let Some(m) = secondaries.iter().find(|m| m.role != Role::Secondary) {
            return Err(UpgradeError::Discovery(format!(
                "{} listed as secondary but has role {}",
                m.id, m.role
            )));
        }

        let mut addresses = HashSet::new();
        let mut ids = HashSet::new();
        for member in std::iter::once(&primary).chain(secondaries.iter()) {
            if !addresses.insert(member.address.as_str()) {
                return Err(UpgradeError::Discovery(format!(
                    "address {} is shared by more than one member",
                    member.address
                )));
            }
            if !ids.insert(&member.id) {
                return Err(UpgradeError::Discovery(format!(
                    "{} appears more than once",
                    member.id
                )));
            }
        }

        Ok(Self {
            primary,
            secondaries,
        })
    }

    pub fn primary(&self) -> &Member {
        &self.primary
    }

    pub fn secondaries(&self) -> &[Member] {
        &self.secondaries
    }

    /// All members, primary first, then secondaries in discovery order.
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        std::iter::once(&self.primary).chain(self.secondaries.iter())
    }

    pub fn len(&self) -> usize {
        1 + self.secondaries.len()
    }

    pub fn is_single_member(&self) -> bool {
        self.secondaries.is_empty()
    }

    pub fn member(&self, id: &MemberId) -> Option<&Member> {
        self.members().find(|m| &m.id == id)
    }
}
