//! Process Scanner
//!
//! Matches running command lines against the AI process patterns and scores
//! matched processes by resource usage and model-file references.

use std::collections::BTreeMap;

use chrono::DateTime;
use serde_json::json;

use super::inspect::{ProcessSample, ProcessSource};
use super::signatures::{MODEL_FILE_PATTERNS, PROCESS_PATTERNS};
use super::types::{derive_threat_id, evidence, ThreatRecord, ThreatVector};
use super::ScanError;

const GIB: u64 = 1024 * 1024 * 1024;
const COMMAND_LINE_EXCERPT: usize = 200;

/// Score a matched process 0-10. Zero means the match alone is not enough
/// to report.
fn score_process(sample: &ProcessSample) -> u8 {
    let mut score: u8 = 0;
    if sample.memory_bytes > GIB {
        score += 2;
    }
    if sample.cpu_percent > 50.0 {
        score += 1;
    }
    if MODEL_FILE_PATTERNS
        .iter()
        .any(|p| p.is_match(&sample.command_line))
    {
        score += 3;
    }
    score.min(10)
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        text.chars().take(limit).collect()
    }
}

/// Run the process vector.
pub fn scan_processes(source: &dyn ProcessSource) -> Result<Vec<ThreatRecord>, ScanError> {
    let samples = source.processes().map_err(|e| ScanError(e.to_string()))?;

    let mut threats = Vec::new();
    for sample in samples {
        let pattern = match PROCESS_PATTERNS
            .iter()
            .find(|p| p.is_match(&sample.command_line))
        {
            Some(pattern) => pattern,
            None => continue,
        };

        let severity = score_process(&sample);
        if severity == 0 {
            continue;
        }

        let start_time = DateTime::from_timestamp(sample.start_time as i64, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();

        let mut evidence_map = BTreeMap::new();
        evidence_map.insert(evidence::PROCESS_NAME.to_string(), json!(sample.name));
        evidence_map.insert(evidence::PROCESS_ID.to_string(), json!(sample.pid));
        evidence_map.insert(
            evidence::COMMAND_LINE.to_string(),
            json!(truncate(&sample.command_line, COMMAND_LINE_EXCERPT)),
        );
        evidence_map.insert(evidence::PATTERN_MATCHED.to_string(), json!(pattern.as_str()));
        evidence_map.insert(evidence::START_TIME.to_string(), json!(start_time));

        threats.push(ThreatRecord::new(
            derive_threat_id(&format!("{}{}", sample.pid, sample.name)),
            ThreatVector::Process,
            format!("Suspicious AI process detected: {}", sample.name),
            severity,
            evidence_map,
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
    use crate::detect::inspect::InspectError;

    struct FixtureProcessSource {
        samples: Vec<ProcessSample>,
    }

    impl ProcessSource for FixtureProcessSource {
        fn processes(&self) -> Result<Vec<ProcessSample>, InspectError> {
            Ok(self.samples.clone())
        }
    }

    fn sample(name: &str, command_line: &str, cpu: f32, memory: u64) -> ProcessSample {
        ProcessSample {
            pid: 4242,
            name: name.to_string(),
            command_line: command_line.to_string(),
            cpu_percent: cpu,
            memory_bytes: memory,
            start_time: 1_700_000_000,
        }
    }

    #[test]
    fn test_matched_heavy_process_is_scored() {
        let source = FixtureProcessSource {
            samples: vec![sample("ollama", "/usr/bin/ollama serve", 80.0, 3 * GIB)],
        };
        let threats = scan_processes(&source).unwrap();
        assert_eq!(threats.len(), 1);
        // +2 memory, +1 cpu.
        assert_eq!(threats[0].severity, 3);
        assert_eq!(threats[0].evidence_str(evidence::PROCESS_NAME), Some("ollama"));
    }

    #[test]
    fn test_model_file_reference_raises_score() {
        let source = FixtureProcessSource {
            samples: vec![sample(
                "llama-server",
                "llama.cpp/llama-server -m ./models/llama3.gguf",
                10.0,
                2 * GIB,
            )],
        };
        let threats = scan_processes(&source).unwrap();
        // +2 memory, +3 model file.
        assert_eq!(threats[0].severity, 5);
    }

    #[test]
    fn test_idle_match_is_dropped() {
        // Pattern matches but no resource or model-file signal: score 0.
        let source = FixtureProcessSource {
            samples: vec![sample("python3", "python3 -c 'import openai'", 1.0, 64 * 1024 * 1024)],
        };
        assert!(scan_processes(&source).unwrap().is_empty());
    }

    #[test]
    fn test_unmatched_processes_are_ignored() {
        let source = FixtureProcessSource {
            samples: vec![sample("sshd", "/usr/sbin/sshd -D", 90.0, 2 * GIB)],
        };
        assert!(scan_processes(&source).unwrap().is_empty());
    }

    #[test]
    fn test_command_line_is_truncated() {
        let long = format!("python3 -m transformers {}", "x".repeat(500));
        let source = FixtureProcessSource {
            samples: vec![sample("python3", &long, 0.0, 2 * GIB)],
        };
        let threats = scan_processes(&source).unwrap();
        let excerpt = threats[0].evidence_str(evidence::COMMAND_LINE).unwrap();
        assert_eq!(excerpt.len(), COMMAND_LINE_EXCERPT);
    }
}
