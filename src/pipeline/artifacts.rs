//! Stage Artifacts
//!
//! Persisted JSON documents forming the stage-to-stage contract. Loads are
//! strict: a missing file is a missing prerequisite, a file that parses but
//! fails structural validation is malformed, and either aborts the stage
//! before it writes anything.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::analyze::OriginRecord;
use crate::detect::types::DetectionReport;
use crate::neutralize::InjectionResult;

pub const DETECTION_REPORT: &str = "detection_report.json";
pub const ANALYSIS_REPORT: &str = "analysis_report.json";
pub const DEFENSE_RESULTS: &str = "defense_results.json";
pub const VERIFICATION_REPORT: &str = "verification_report.json";

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug)]
pub enum ArtifactError {
    MissingPrerequisite { path: PathBuf },
    Malformed { path: PathBuf, reason: String },
    Io { path: PathBuf, message: String },
}

impl std::fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactError::MissingPrerequisite { path } => {
                write!(f, "Missing prerequisite artifact: {}", path.display())
            }
            ArtifactError::Malformed { path, reason } => {
                write!(f, "Malformed artifact {}: {}", path.display(), reason)
            }
            ArtifactError::Io { path, message } => {
                write!(f, "Artifact I/O error on {}: {}", path.display(), message)
            }
        }
    }
}

impl std::error::Error for ArtifactError {}

// ============================================================================
// DEFENSE ENTRY
// ============================================================================

/// One defense artifact entry, summarizing an `InjectionResult`. The field
/// names are the compatibility surface; the per-strategy attempt log stays
/// in process logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefenseEntry {
    pub threat_id: String,
    pub injection_success: bool,
    pub method_used: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<&InjectionResult> for DefenseEntry {
    fn from(result: &InjectionResult) -> Self {
        Self {
            threat_id: result.threat_id.clone(),
            injection_success: result.success,
            method_used: result.method.clone(),
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// ARTIFACT STORE
// ============================================================================

/// Artifact directory handle. Every stage reads and writes through this.
pub struct Artifacts {
    dir: PathBuf,
}

impl Artifacts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn load_raw<T: DeserializeOwned>(&self, path: &Path) -> Result<T, ArtifactError> {
        if !path.exists() {
            return Err(ArtifactError::MissingPrerequisite {
                path: path.to_path_buf(),
            });
        }
        let content = fs::read_to_string(path).map_err(|e| ArtifactError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| ArtifactError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<(), ArtifactError> {
        let path = self.path(name);
        let json = serde_json::to_string_pretty(value).map_err(|e| ArtifactError::Io {
            path: path.clone(),
            message: e.to_string(),
        })?;
        fs::write(&path, json).map_err(|e| ArtifactError::Io {
            path,
            message: e.to_string(),
        })?;
        log::debug!("Saved artifact {}", name);
        Ok(())
    }

    /// Load and structurally validate a detection report. Used both for the
    /// default artifact and for an explicit `--input` path.
    pub fn load_report_from(&self, path: &Path) -> Result<DetectionReport, ArtifactError> {
        let report: DetectionReport = self.load_raw(path)?;
        report.validate().map_err(|reason| ArtifactError::Malformed {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(report)
    }

    pub fn load_report(&self) -> Result<DetectionReport, ArtifactError> {
        self.load_report_from(&self.path(DETECTION_REPORT))
    }

    pub fn load_analysis(&self) -> Result<Vec<OriginRecord>, ArtifactError> {
        let path = self.path(ANALYSIS_REPORT);
        let records: Vec<OriginRecord> = self.load_raw(&path)?;
        for record in &records {
            record.validate().map_err(|reason| ArtifactError::Malformed {
                path: path.clone(),
                reason,
            })?;
        }
        Ok(records)
    }

    pub fn load_defense(&self) -> Result<Vec<DefenseEntry>, ArtifactError> {
        let path = self.path(DEFENSE_RESULTS);
        let entries: Vec<DefenseEntry> = self.load_raw(&path)?;
        for entry in &entries {
            if entry.threat_id.is_empty() {
                return Err(ArtifactError::Malformed {
                    path,
                    reason: "defense entry with empty threat_id".to_string(),
                });
            }
        }
        Ok(entries)
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
