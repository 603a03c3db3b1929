//! Behavioral Scanner
//!
//! Drives the threat-classification service over a snapshot of recent host
//! activity. The activity buffer is owned by the caller and passed in, it is
//! never module state.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use super::classifier::ThreatClassifier;
use super::inspect::ProcessSource;
use super::types::{derive_threat_id, ThreatRecord, ThreatVector};
use super::ScanError;

// ============================================================================
// ACTIVITY WINDOW
// ============================================================================

#[derive(Debug, Clone)]
pub struct ActivityEntry {
    pub name: String,
    pub pid: u32,
    pub time: DateTime<Utc>,
}

/// Bounded buffer of recent process activity. Bounded both by entry count
/// and by time window; pushing past either bound evicts the oldest entries.
#[derive(Debug)]
pub struct ActivityWindow {
    entries: VecDeque<ActivityEntry>,
    max_entries: usize,
    window: Duration,
}

impl ActivityWindow {
    pub fn new(window_minutes: i64, max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries,
            window: Duration::minutes(window_minutes),
        }
    }

    pub fn push(&mut self, entry: ActivityEntry) {
        self.entries.push_back(entry);
        self.prune();
    }

    /// Load entries for processes started within the window.
    pub fn fill_from(&mut self, source: &dyn ProcessSource) -> Result<(), super::inspect::InspectError> {
        let cutoff = (Utc::now() - self.window).timestamp();
        for sample in source.processes()? {
            if sample.start_time as i64 >= cutoff {
                self.push(ActivityEntry {
                    name: sample.name,
                    pid: sample.pid,
                    time: DateTime::from_timestamp(sample.start_time as i64, 0)
                        .unwrap_or_else(Utc::now),
                });
            }
        }
        Ok(())
    }

    fn prune(&mut self) {
        let cutoff = Utc::now() - self.window;
        while let Some(front) = self.entries.front() {
            if front.time < cutoff {
                self.entries.pop_front();
            } else {
                break;
            }
        }
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Activity snapshot in the shape the classification prompt expects.
    pub fn snapshot(&self) -> Value {
        let processes_started: Vec<Value> = self
            .entries
            .iter()
            .map(|e| {
                json!({
                    "name": e.name,
                    "pid": e.pid,
                    "time": e.time.to_rfc3339(),
                })
            })
            .collect();

        json!({
            "api_calls": [],
            "processes_started": processes_started,
            "network_connections": [],
            "file_operations": [],
        })
    }
}

// ============================================================================
// SCANNER
// ============================================================================

fn build_prompt(activity: &Value) -> String {
    format!(
        "Analyze the following system activity for signs of hostile AI agents.\n\
         Look for:\n\
         1. Rapid API calls to AI services\n\
         2. Attempts to download or execute models\n\
         3. Suspicious prompt patterns\n\
         4. Data exfiltration attempts\n\
         5. Process spawning patterns typical of AI agents\n\n\
         System Activity:\n{}\n\n\
         Respond with a JSON array of detected threats, each with:\n\
         - id: unique identifier\n\
         - type: behavioral\n\
         - description: what was detected\n\
         - severity: 1-10\n\
         - evidence: specific indicators\n\
         - timestamp: when detected",
        serde_json::to_string_pretty(activity).unwrap_or_else(|_| "{}".to_string())
    )
}

/// Run the behavioral vector: snapshot -> prompt -> candidates -> records.
/// Candidates without a description are dropped; severities clamp to 1-10;
/// missing ids are derived from the description so re-detections match.
pub async fn scan_behavioral(
    activity: Value,
    classifier: &dyn ThreatClassifier,
) -> Result<Vec<ThreatRecord>, ScanError> {
    let prompt = build_prompt(&activity);
    let candidates = classifier
        .classify(&prompt)
        .await
        .map_err(|e| ScanError(e.to_string()))?;

    let mut threats = Vec::new();
    for candidate in candidates {
        let description = match candidate.description {
            Some(d) if !d.is_empty() => d,
            _ => {
                log::warn!("Dropping behavioral candidate without a description");
                continue;
            }
        };

        let severity = candidate.severity.unwrap_or(5).clamp(1, 10) as u8;
        let id = candidate
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| derive_threat_id(&description));
        let evidence: BTreeMap<String, Value> = candidate.evidence.unwrap_or_default();

        threats.push(ThreatRecord::new(
            id,
            ThreatVector::Behavioral,
            description,
            severity,
            evidence,
        ));
    }

    Ok(threats)
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::classifier::{ClassifierError, ThreatCandidate};
    use async_trait::async_trait;

    struct ScriptedClassifier {
        content: &'static str,
    }

    #[async_trait]
    impl ThreatClassifier for ScriptedClassifier {
        async fn classify(&self, _prompt: &str) -> Result<Vec<ThreatCandidate>, ClassifierError> {
            let items: Vec<serde_json::Value> = serde_json::from_str(self.content).unwrap();
            Ok(items
                .into_iter()
                .filter_map(|v| serde_json::from_value(v).ok())
                .collect())
        }

        async fn healthcheck(&self) -> Result<(), ClassifierError> {
            Ok(())
        }
    }

    #[test]
    fn test_window_bounds_by_entry_count() {
        let mut window = ActivityWindow::new(60, 3);
        for pid in 0..10 {
            window.push(ActivityEntry {
                name: format!("proc{}", pid),
                pid,
                time: Utc::now(),
            });
        }
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn test_window_evicts_old_entries() {
        let mut window = ActivityWindow::new(30, 100);
        window.push(ActivityEntry {
            name: "stale".to_string(),
            pid: 1,
            time: Utc::now() - Duration::hours(2),
        });
        window.push(ActivityEntry {
            name: "fresh".to_string(),
            pid: 2,
            time: Utc::now(),
        });
        assert_eq!(window.len(), 1);
        assert_eq!(window.snapshot()["processes_started"][0]["name"], "fresh");
    }

    #[tokio::test]
    async fn test_scan_normalizes_candidates() {
        let classifier = ScriptedClassifier {
            content: r#"[
                {"id": "cafe0123", "description": "rapid API calls", "severity": 7},
                {"description": "model download burst", "severity": 99},
                {"severity": 5}
            ]"#,
        };

        let window = ActivityWindow::new(30, 16);
        let threats = scan_behavioral(window.snapshot(), &classifier).await.unwrap();

        // The description-less candidate is dropped.
        assert_eq!(threats.len(), 2);
        assert_eq!(threats[0].id, "cafe0123");
        assert_eq!(threats[0].vector, ThreatVector::Behavioral);
        // Out-of-range severity clamps.
        assert_eq!(threats[1].severity, 10);
        // Missing id derives from the description, stably.
        assert_eq!(threats[1].id, derive_threat_id("model download burst"));
    }
}
