//! Log Scanner
//!
//! Tails configured log files and matches lines against the AI API endpoint
//! patterns. A file that is missing or unreadable is skipped, never fatal.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;

use super::signatures::API_ENDPOINT_PATTERNS;
use super::types::{derive_threat_id, evidence, ThreatRecord, ThreatVector};
use super::ScanError;

const TAIL_LINES: usize = 1000;
const LINE_EXCERPT: usize = 200;
const LOG_HIT_SEVERITY: u8 = 3;

fn scan_one_file(path: &Path) -> Vec<ThreatRecord> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            log::debug!("Skipping log file {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    let lines: Vec<&str> = content.lines().collect();
    let skipped = lines.len().saturating_sub(TAIL_LINES);

    let mut threats = Vec::new();
    for (offset, line) in lines.iter().skip(skipped).enumerate() {
        let pattern = match API_ENDPOINT_PATTERNS.iter().find(|p| p.is_match(line)) {
            Some(pattern) => pattern,
            None => continue,
        };

        let line_number = skipped + offset;
        let excerpt: String = line.trim().chars().take(LINE_EXCERPT).collect();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let mut evidence_map = BTreeMap::new();
        evidence_map.insert(evidence::LOG_FILE.to_string(), json!(path.display().to_string()));
        evidence_map.insert(evidence::LINE_NUMBER.to_string(), json!(line_number));
        evidence_map.insert(evidence::PATTERN.to_string(), json!(pattern.as_str()));
        evidence_map.insert(evidence::EXCERPT.to_string(), json!(excerpt));

        threats.push(ThreatRecord::new(
            derive_threat_id(&format!("{}{}{}", path.display(), line_number, pattern)),
            ThreatVector::Log,
            format!("AI API access detected in {}", file_name),
            LOG_HIT_SEVERITY,
            evidence_map,
        ));
    }

    threats
}

/// Run the log vector across the configured files.
pub fn scan_logs(log_files: &[PathBuf]) -> Result<Vec<ThreatRecord>, ScanError> {
    let mut threats = Vec::new();
    for path in log_files {
        if path.exists() {
            threats.extend(scan_one_file(path));
        }
    }
    Ok(threats)
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_api_hits_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "GET /index.html 200").unwrap();
        writeln!(file, "POST https://api.openai.com/v1/chat/completions 200").unwrap();
        writeln!(file, "GET https://api.anthropic.com/v1/messages 200").unwrap();

        let threats = scan_logs(&[path.clone()]).unwrap();
        assert_eq!(threats.len(), 2);
        assert_eq!(threats[0].severity, LOG_HIT_SEVERITY);
        assert_eq!(threats[0].evidence_u64(evidence::LINE_NUMBER), Some(1));
        assert_eq!(
            threats[0].evidence_str(evidence::LOG_FILE),
            Some(path.display().to_string().as_str())
        );
    }

    #[test]
    fn test_only_the_tail_is_scanned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.log");
        let mut file = fs::File::create(&path).unwrap();
        // One hit far outside the tail, one inside.
        writeln!(file, "hit early openai.com/v1").unwrap();
        for _ in 0..TAIL_LINES {
            writeln!(file, "filler line").unwrap();
        }
        writeln!(file, "hit late openai.com/v1").unwrap();

        let threats = scan_logs(&[path]).unwrap();
        assert_eq!(threats.len(), 1);
        assert_eq!(
            threats[0].evidence_u64(evidence::LINE_NUMBER),
            Some(TAIL_LINES as u64 + 1)
        );
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let threats = scan_logs(&[PathBuf::from("/no/such/file.log")]).unwrap();
        assert!(threats.is_empty());
    }
}
