//! Registry of replicated record types.
//!
//! A static table of which record types are replicated and, for each, who is
//! authoritative for its `status` section. The table is fixed at build time;
//! there is no runtime mutation.
//!
//! | Resource | Group | Policy |
//! |----------|-------|--------|
//! | `resourceslices` | `sharing.crd-replicator.io` | `Shared` |
//! | `networkconfigs` | `net.crd-replicator.io` | `Shared` |
//! | `tenants` | `core.crd-replicator.io` | `Local` |
//! | `identityrequests` | `auth.crd-replicator.io` | `Local` |

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Identifies a record type by API group, version and plural resource name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordType {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl RecordType {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}/{}", self.resource, self.group, self.version)
    }
}

/// Which side is authoritative for a record's `status` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnershipPolicy {
    /// The local cluster computes status; it is pushed to the mirror.
    Local,
    /// The remote cluster computes status; it is pulled into the local record.
    Shared,
}

impl std::fmt::Display for OwnershipPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnershipPolicy::Local => write!(f, "Local"),
            OwnershipPolicy::Shared => write!(f, "Shared"),
        }
    }
}

/// Returned when parsing an ownership policy that does not exist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown ownership policy: {0}")]
pub struct UnknownPolicy(pub String);

impl FromStr for OwnershipPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Local" => Ok(OwnershipPolicy::Local),
            "Shared" => Ok(OwnershipPolicy::Shared),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

/// One entry of the registry table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisteredType {
    pub group: &'static str,
    pub version: &'static str,
    pub resource: &'static str,
    pub ownership: OwnershipPolicy,
}

impl RegisteredType {
    pub fn record_type(&self) -> RecordType {
        RecordType::new(self.group, self.version, self.resource)
    }
}

/// Record types replicated between clusters.
pub const REFLECTED_TYPES: &[RegisteredType] = &[
    RegisteredType {
        group: "sharing.crd-replicator.io",
        version: "v1alpha1",
        resource: "resourceslices",
        ownership: OwnershipPolicy::Shared,
    },
    RegisteredType {
        group: "net.crd-replicator.io",
        version: "v1alpha1",
        resource: "networkconfigs",
        ownership: OwnershipPolicy::Shared,
    },
    RegisteredType {
        group: "core.crd-replicator.io",
        version: "v1alpha1",
        resource: "tenants",
        ownership: OwnershipPolicy::Local,
    },
    RegisteredType {
        group: "auth.crd-replicator.io",
        version: "v1alpha1",
        resource: "identityrequests",
        ownership: OwnershipPolicy::Local,
    },
];

/// All registered types as `RecordType`s.
pub fn record_types() -> Vec<RecordType> {
    REFLECTED_TYPES.iter().map(RegisteredType::record_type).collect()
}

/// Look up a registry entry in `table`.
pub fn lookup<'a>(table: &'a [RegisteredType], resource: &RecordType) -> Option<&'a RegisteredType> {
    table.iter().find(|t| {
        t.group == resource.group && t.version == resource.version && t.resource == resource.resource
    })
}

/// Ownership policy of a type from the built-in table.
pub fn policy_for(resource: &RecordType) -> Option<OwnershipPolicy> {
    lookup(REFLECTED_TYPES, resource).map(|t| t.ownership)
}
