//! Replica-set topology: member types, engine versions and discovery.

pub mod authority;
pub mod discover;
pub mod types;
pub mod version;

pub use discover::{Discoverer, MemberDescriptor, MembershipAuthority, MembershipResponse};
pub use types::{Member, MemberHealth, MemberId, Role, Topology};
pub use version::EngineVersion;
