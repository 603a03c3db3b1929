//! Containment Rules
//!
//! Abstract block rules. Identity is (kind, target); the manager's live set
//! is deduplicated on it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    BlockIp,
    BlockPort,
    BlockProcess,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::BlockIp => "block_ip",
            RuleKind::BlockPort => "block_port",
            RuleKind::BlockProcess => "block_process",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outbound,
    Inbound,
}

/// One abstract block rule. Exists only while deployed; the external rule
/// surface decides what it means on the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainmentRule {
    #[serde(rename = "type")]
    pub kind: RuleKind,
    pub target: String,
    pub direction: Direction,
    pub reason: String,
}

impl ContainmentRule {
    pub fn new(kind: RuleKind, target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            direction: Direction::Outbound,
            reason: reason.into(),
        }
    }

    pub fn identity(&self) -> (RuleKind, &str) {
        (self.kind, &self.target)
    }
}

impl std::fmt::Display for ContainmentRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind.as_str(), self.target)
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
