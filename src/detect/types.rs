//! Detection Types
//!
//! Core types for threat detection. Data structures only, no scan logic.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

// ============================================================================
// THREAT VECTOR
// ============================================================================

/// Detection technique category a threat was found through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreatVector {
    Behavioral,
    Network,
    Process,
    Log,
    /// Anything a collaborator reported that is not one of the four vectors.
    Unknown,
}

impl ThreatVector {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatVector::Behavioral => "behavioral",
            ThreatVector::Network => "network",
            ThreatVector::Process => "process",
            ThreatVector::Log => "log",
            ThreatVector::Unknown => "unknown",
        }
    }

    /// Parse a vector label. Unrecognized labels map to `Unknown` rather
    /// than failing, so records from outside collaborators stay loadable.
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "behavioral" => ThreatVector::Behavioral,
            "network" => ThreatVector::Network,
            "process" => ThreatVector::Process,
            "log" => ThreatVector::Log,
            _ => ThreatVector::Unknown,
        }
    }
}

impl std::fmt::Display for ThreatVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for ThreatVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ThreatVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(ThreatVector::from_label(&label))
    }
}

// ============================================================================
// THREAT LEVEL
// ============================================================================

/// Discretized threat level for a whole report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    /// Bucket the maximum severity found in a scan. Pure and total:
    /// severity >= 8 is critical, >= 6 high, >= 4 medium, anything else low;
    /// no threats at all is none.
    pub fn from_severities<I>(severities: I) -> Self
    where
        I: IntoIterator<Item = u8>,
    {
        match severities.into_iter().max() {
            None => ThreatLevel::None,
            Some(s) if s >= 8 => ThreatLevel::Critical,
            Some(s) if s >= 6 => ThreatLevel::High,
            Some(s) if s >= 4 => ThreatLevel::Medium,
            Some(_) => ThreatLevel::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::None => "none",
            ThreatLevel::Low => "low",
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
            ThreatLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// EVIDENCE KEYS
// ============================================================================

/// Evidence field names. These are part of the artifact surface and must not
/// drift between the scanners, the containment manager, and the channels.
pub mod evidence {
    pub const REMOTE_IP: &str = "remote_ip";
    pub const REMOTE_PORT: &str = "remote_port";
    pub const PROCESS_NAME: &str = "process_name";
    pub const PROCESS_ID: &str = "process_id";
    pub const SERVICE: &str = "service";
    pub const COMMAND_LINE: &str = "command_line";
    pub const PATTERN_MATCHED: &str = "pattern_matched";
    pub const START_TIME: &str = "start_time";
    pub const LOG_FILE: &str = "log_file";
    pub const LINE_NUMBER: &str = "line_number";
    pub const PATTERN: &str = "pattern";
    pub const EXCERPT: &str = "excerpt";
}

// ============================================================================
// THREAT RECORD
// ============================================================================

/// One detected threat. Immutable once created; the id is derived from
/// stable evidence content so an unchanged threat re-detects under the
/// same id and verification can match it across scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub vector: ThreatVector,
    pub description: String,
    pub severity: u8,
    #[serde(default)]
    pub evidence: BTreeMap<String, serde_json::Value>,
    #[serde(rename = "timestamp")]
    pub detected_at: DateTime<Utc>,
}

impl ThreatRecord {
    pub fn new(
        id: String,
        vector: ThreatVector,
        description: String,
        severity: u8,
        evidence: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id,
            vector,
            description,
            severity: severity.clamp(1, 10),
            evidence,
            detected_at: Utc::now(),
        }
    }

    pub fn evidence_str(&self, key: &str) -> Option<&str> {
        self.evidence.get(key).and_then(|v| v.as_str())
    }

    pub fn evidence_u64(&self, key: &str) -> Option<u64> {
        self.evidence.get(key).and_then(|v| v.as_u64())
    }
}

/// Derive a stable 8-char hex threat id from identifying material.
pub fn derive_threat_id(material: &str) -> String {
    let digest = Sha256::digest(material.as_bytes());
    hex::encode(digest)[..8].to_string()
}

// ============================================================================
// DETECTION REPORT
// ============================================================================

/// Aggregated output of one scan cycle. Produced once, read-only thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionReport {
    pub timestamp: DateTime<Utc>,
    pub threats_detected: bool,
    pub threat_level: ThreatLevel,
    pub agent_count: usize,
    pub detections: Vec<ThreatRecord>,
    pub summary: String,
}

impl DetectionReport {
    /// Assemble a report from merged scanner output. Duplicate ids are
    /// dropped keeping the first occurrence so ids stay unique per report.
    pub fn from_threats(mut threats: Vec<ThreatRecord>) -> Self {
        let mut seen = std::collections::HashSet::new();
        threats.retain(|t| seen.insert(t.id.clone()));

        let threat_level = ThreatLevel::from_severities(threats.iter().map(|t| t.severity));
        let agent_count = threats.len();
        let summary = if threats.is_empty() {
            "No hostile AI agents detected".to_string()
        } else {
            format!(
                "Detected {} hostile AI agent(s) with {} threat level",
                agent_count, threat_level
            )
        };

        Self {
            timestamp: Utc::now(),
            threats_detected: !threats.is_empty(),
            threat_level,
            agent_count,
            detections: threats,
            summary,
        }
    }

    /// Structural validation for reports loaded from disk. Stages must
    /// refuse to run on a report that fails this.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for t in &self.detections {
            if t.id.is_empty() {
                return Err("detection with empty id".to_string());
            }
            if !seen.insert(t.id.as_str()) {
                return Err(format!("duplicate threat id {}", t.id));
            }
            if !(1..=10).contains(&t.severity) {
                return Err(format!("threat {} severity {} out of range", t.id, t.severity));
            }
        }
        if self.agent_count != self.detections.len() {
            return Err(format!(
                "agent_count {} does not match {} detections",
                self.agent_count,
                self.detections.len()
            ));
        }
        if self.threats_detected != !self.detections.is_empty() {
            return Err("threats_detected flag inconsistent with detections".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
