//! Builder VM domain model
//!
//! Represents a provisioned builder machine leased from the pool.

use serde::{Deserialize, Serialize};

/// Identifier of a builder group (usually one per architecture)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u32);

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A leased builder machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmHandle {
    /// Unique name of the machine inside the pool
    pub name: String,

    /// Network address the build executor connects to
    pub address: String,

    /// Builder group the machine belongs to
    pub group: GroupId,

    /// Who currently holds the lease, if anybody
    pub holder: Option<String>,

    /// Pool-assigned id of the acquisition this handle belongs to; zero when
    /// not leased
    #[serde(default)]
    pub lease_id: u64,
}

impl VmHandle {
    pub fn new(name: impl Into<String>, address: impl Into<String>, group: GroupId) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            group,
            holder: None,
            lease_id: 0,
        }
    }
}
