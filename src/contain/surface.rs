//! Rule Surface
//!
//! Narrow contract for the OS rule-control collaborator. The core never
//! branches on platform; command construction lives entirely behind this
//! trait.

use super::rules::ContainmentRule;

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug, Clone)]
pub enum SurfaceError {
    /// The rule is not present on the surface. Removal treats this as a
    /// no-op, never an error.
    NotFound,
    Apply { reason: String },
    Remove { reason: String },
}

impl std::fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SurfaceError::NotFound => write!(f, "Rule not present on surface"),
            SurfaceError::Apply { reason } => write!(f, "Failed to apply rule: {}", reason),
            SurfaceError::Remove { reason } => write!(f, "Failed to remove rule: {}", reason),
        }
    }
}

impl std::error::Error for SurfaceError {}

// ============================================================================
// COLLABORATOR TRAIT
// ============================================================================

pub trait RuleSurface: Send + Sync {
    fn apply(&self, rule: &ContainmentRule) -> Result<(), SurfaceError>;

    fn remove(&self, rule: &ContainmentRule) -> Result<(), SurfaceError>;

    /// Capability check for the init stage.
    fn self_test(&self) -> bool {
        true
    }
}

// ============================================================================
// DRY-RUN SURFACE
// ============================================================================

/// Logs what it would do and reports success. The shipped default; a real
/// deployment substitutes a platform-backed surface.
pub struct DryRunSurface;

impl RuleSurface for DryRunSurface {
    fn apply(&self, rule: &ContainmentRule) -> Result<(), SurfaceError> {
        log::info!("Would apply rule: {} ({})", rule, rule.reason);
        Ok(())
    }

    fn remove(&self, rule: &ContainmentRule) -> Result<(), SurfaceError> {
        log::info!("Would remove rule: {}", rule);
        Ok(())
    }
}
