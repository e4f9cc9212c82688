//! Typed identifiers. Each wraps a string so an agent id cannot be passed
//! where a brand id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! newtype_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Generate a fresh random identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

newtype_id!(
    /// Stable identifier of an autonomous agent.
    AgentId
);

newtype_id!(
    /// Stable identifier of a brand served by the agent population.
    BrandId
);

newtype_id!(
    /// Identifier of a dispatched work item.
    JobId
);

newtype_id!(
    /// Identifier of a proposal produced by an agent.
    ///
    /// Work items created by the orchestrator carry the proposal id, which is
    /// how published outcomes are traced back to the agent and strategy.
    ProposalId
);

newtype_id!(
    /// Identifier of an archived gene pool entry.
    GeneEntryId
);

/// Kind of content a proposal (and the resulting work item) produces.
///
/// Reels and posts have separate per-brand quotas and are generated in two
/// sequential burst phases, reels first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Reel,
    Post,
}

impl ContentType {
    /// Burst phase order.
    pub const PHASES: [ContentType; 2] = [ContentType::Reel, ContentType::Post];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reel => "reel",
            Self::Post => "post",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = AgentId::generate();
        let b = AgentId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_id_serializes_transparently() {
        let id = JobId::new("job-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"job-1\"");
    }

    #[test]
    fn test_content_type_phase_order() {
        assert_eq!(ContentType::PHASES[0], ContentType::Reel);
        assert_eq!(serde_json::to_string(&ContentType::Post).unwrap(), "\"post\"");
    }
}
