//! Topology discovery against the cluster's membership authority.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::types::{Member, MemberHealth, MemberId, Role, Topology, parse_address};
use super::version::EngineVersion;
use crate::error::UpgradeError;

/// One member as reported by the membership authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MemberDescriptor {
    /// Machine id or tag (`0`, `machine-0`).
    pub tag: String,
    pub address: String,
    #[serde(default)]
    pub series: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Structured response of the membership authority, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipResponse {
    #[serde(default)]
    pub members: Vec<MemberDescriptor>,
}

/// Source of replica-set membership.
#[async_trait]
pub trait MembershipAuthority: Send + Sync {
    /// Return the state-server members taking part in an upgrade to `target`.
    async fn members(&self, target: &EngineVersion) -> Result<MembershipResponse>;

    fn name(&self) -> &str;
}

/// Queries the membership authority once and validates the answer.
pub struct Discoverer {
    authority: Arc<dyn MembershipAuthority>,
}

impl Discoverer {
    pub fn new(authority: Arc<dyn MembershipAuthority>) -> Self {
        Self { authority }
    }

    /// Discover the topology. No retries: a failed query is reported as is.
    pub async fn discover(&self, target: &EngineVersion) -> Result<Topology, UpgradeError> {
        debug!(
            "Querying membership authority {} for upgrade to {}",
            self.authority.name(),
            target
        );

        let response = self.authority.members(target).await.map_err(|e| {
            UpgradeError::Discovery(format!(
                "membership authority {} unreachable: {:#}",
                self.authority.name(),
                e
            ))
        })?;

        let topology = topology_from_response(response)?;

        info!(
            "Discovered primary {} ({}) and {} secondaries",
            topology.primary().id,
            topology.primary().address,
            topology.secondaries().len()
        );
        for member in topology.members().filter(|m| !m.health.is_healthy()) {
            warn!(
                "{} ({}) last reported health: {}",
                member.id, member.address, member.health
            );
        }

        Ok(topology)
    }
}

/// Convert a raw response into a validated topology.
pub fn topology_from_response(response: MembershipResponse) -> Result<Topology, UpgradeError> {
    let members = response
        .members
        .iter()
        .map(member_from_descriptor)
        .collect::<Result<Vec<_>, _>>()?;

    let primaries = members.iter().filter(|m| m.role == Role::Primary).count();
    if primaries != 1 {
        return Err(UpgradeError::Discovery(format!(
            "expected exactly one primary, found {} among {} members",
            primaries,
            members.len()
        )));
    }

    let (mut primary, secondaries): (Vec<Member>, Vec<Member>) =
        members.into_iter().partition(|m| m.role == Role::Primary);

    match primary.pop() {
        Some(primary) => Topology::new(primary, secondaries),
        None => Err(UpgradeError::Discovery("no primary reported".to_string())),
    }
}

fn member_from_descriptor(descriptor: &MemberDescriptor) -> Result<Member, UpgradeError> {
    let id = MemberId::parse(&descriptor.tag).map_err(UpgradeError::Discovery)?;
    let address = parse_address(&descriptor.address)
        .map_err(|e| UpgradeError::Discovery(format!("{}: {}", id, e)))?;

    Ok(Member {
        id,
        address,
        series: descriptor.series.trim().to_string(),
        role: descriptor.role,
        health: MemberHealth::from_status(descriptor.status.as_deref()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(tag: &str, address: &str, role: Role) -> MemberDescriptor {
        MemberDescriptor {
            tag: tag.to_string(),
            address: address.to_string(),
            series: "trusty".to_string(),
            role,
            status: Some("started".to_string()),
        }
    }

    struct FixedAuthority(Result<MembershipResponse, String>);

    #[async_trait]
    impl MembershipAuthority for FixedAuthority {
        async fn members(&self, _target: &EngineVersion) -> Result<MembershipResponse> {
            self.0.clone().map_err(|e| anyhow::anyhow!(e))
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[test]
    fn test_topology_from_response_preserves_order() {
        let response = MembershipResponse {
            members: vec![
                descriptor("machine-2", "10.0.0.3", Role::Secondary),
                descriptor("machine-0", "10.0.0.1", Role::Primary),
                descriptor("machine-1", "10.0.0.2", Role::Secondary),
            ],
        };
        let topology = topology_from_response(response).unwrap();
        assert_eq!(topology.primary().id.as_str(), "0");
        let secondaries: Vec<&str> = topology
            .secondaries()
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(secondaries, vec!["2", "1"]);
    }

    #[test]
    fn test_topology_from_response_no_primary() {
        let response = MembershipResponse {
            members: vec![descriptor("1", "10.0.0.2", Role::Secondary)],
        };
        let err = topology_from_response(response).unwrap_err();
        assert!(err.to_string().contains("exactly one primary, found 0"));
    }

    #[test]
    fn test_topology_from_response_two_primaries() {
        let response = MembershipResponse {
            members: vec![
                descriptor("0", "10.0.0.1", Role::Primary),
                descriptor("1", "10.0.0.2", Role::Primary),
            ],
        };
        let err = topology_from_response(response).unwrap_err();
        assert!(err.to_string().contains("found 2"));
    }

    #[test]
    fn test_topology_from_response_empty() {
        assert!(topology_from_response(MembershipResponse::default()).is_err());
    }

    #[test]
    fn test_topology_from_response_bad_address() {
        let response = MembershipResponse {
            members: vec![descriptor("0", "not an address", Role::Primary)],
        };
        let err = topology_from_response(response).unwrap_err();
        assert!(matches!(err, UpgradeError::Discovery(_)));
        assert!(err.to_string().contains("machine-0"));
    }

    #[test]
    fn test_topology_from_response_bad_identity() {
        let response = MembershipResponse {
            members: vec![descriptor("unit-mysql-0", "10.0.0.1", Role::Primary)],
        };
        assert!(matches!(
            topology_from_response(response),
            Err(UpgradeError::Discovery(_))
        ));
    }

    #[test]
    fn test_descriptor_deserialize_kebab_case() {
        let json = r#"{"members":[{"tag":"machine-0","address":"10.0.0.1","series":"xenial","role":"primary"}]}"#;
        let response: MembershipResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.members[0].role, Role::Primary);
        assert_eq!(response.members[0].status, None);
    }

    #[tokio::test]
    async fn test_discover_unreachable_authority() {
        let discoverer = Discoverer::new(Arc::new(FixedAuthority(Err(
            "connection refused".to_string(),
        ))));
        let err = discoverer
            .discover(&EngineVersion::new(3, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, UpgradeError::Discovery(_)));
        assert!(err.to_string().contains("connection refused"));
        assert!(err.to_string().contains("fixed"));
    }

    #[tokio::test]
    async fn test_discover_success() {
        let discoverer = Discoverer::new(Arc::new(FixedAuthority(Ok(MembershipResponse {
            members: vec![
                descriptor("0", "10.0.0.1", Role::Primary),
                descriptor("1", "10.0.0.2", Role::Secondary),
            ],
        }))));
        let topology = discoverer.discover(&EngineVersion::new(3, 2)).await.unwrap();
        assert_eq!(topology.len(), 2);
    }
}
