//! Strongly-typed identifiers used across the subsystem.
//!
//! Both identifiers are opaque strings: `query_id` is caller- or
//! system-generated (stream producers are free to use non-UUID ids), and
//! workspace ids are whatever the surrounding platform's authorization layer
//! hands us.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Correlation key of a job across ingress, execution, and status retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(String);

/// Identifier of a workspace (the multi-tenant boundary).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(String);

macro_rules! impl_opaque_id {
    ($t:ty, $name:literal) => {
        impl $t {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(DomainError::invalid_field($name, "must not be empty"));
                }
                Ok(Self(trimmed.to_string()))
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }
    };
}

impl_opaque_id!(QueryId, "query_id");
impl_opaque_id!(WorkspaceId, "workspace_id");

impl QueryId {
    /// Generate a fresh system-assigned id.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer passing ids explicitly in tests
    /// for determinism.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_blank_ids() {
        assert!("".parse::<QueryId>().is_err());
        assert!("   ".parse::<WorkspaceId>().is_err());
    }

    #[test]
    fn trims_surrounding_whitespace() {
        let id: QueryId = " abc ".parse().unwrap();
        assert_eq!(id.as_str(), "abc");
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(QueryId::generate(), QueryId::generate());
    }
}
