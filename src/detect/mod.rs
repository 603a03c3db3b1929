//! Detection Aggregator
//!
//! Runs the four vector scanners as independent concurrent tasks and merges
//! their outputs into one report. A scanner that fails, panics, or times out
//! contributes an empty result; its siblings are never aborted. The merge
//! itself is pure: identical scanner outputs always produce the same report.

pub mod behavioral;
pub mod classifier;
pub mod inspect;
pub mod logs;
pub mod network;
pub mod process;
pub mod signatures;
pub mod types;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use behavioral::ActivityWindow;
use classifier::ThreatClassifier;
use inspect::{ConnectionSource, ProcessSource};
use types::{DetectionReport, ThreatRecord};

use crate::config::ScanConfig;

// ============================================================================
// ERROR HANDLING
// ============================================================================

/// Failure of one vector scan. Always isolated by the aggregator.
#[derive(Debug, Clone)]
pub struct ScanError(pub String);

impl std::fmt::Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ScanError: {}", self.0)
    }
}

impl std::error::Error for ScanError {}

// ============================================================================
// AGGREGATOR
// ============================================================================

pub struct DetectionAggregator {
    processes: Arc<dyn ProcessSource>,
    connections: Arc<dyn ConnectionSource>,
    classifier: Arc<dyn ThreatClassifier>,
    log_files: Vec<PathBuf>,
    scanner_timeout: Duration,
}

impl DetectionAggregator {
    pub fn new(
        processes: Arc<dyn ProcessSource>,
        connections: Arc<dyn ConnectionSource>,
        classifier: Arc<dyn ThreatClassifier>,
        config: &ScanConfig,
    ) -> Self {
        Self {
            processes,
            connections,
            classifier,
            log_files: config.log_files.clone(),
            scanner_timeout: Duration::from_secs(config.scanner_timeout_secs),
        }
    }

    /// Run one full scan cycle. Merge order is fixed: behavioral, network,
    /// process, log.
    pub async fn scan(&self, window: &ActivityWindow) -> DetectionReport {
        let activity = window.snapshot();
        let classifier = Arc::clone(&self.classifier);
        let behavioral = self.run_scanner("behavioral", async move {
            behavioral::scan_behavioral(activity, classifier.as_ref()).await
        });

        let connections = Arc::clone(&self.connections);
        let network = self.run_scanner("network", async move {
            tokio::task::spawn_blocking(move || network::scan_network(connections.as_ref()))
                .await
                .map_err(|e| ScanError(e.to_string()))?
        });

        let processes = Arc::clone(&self.processes);
        let process = self.run_scanner("process", async move {
            tokio::task::spawn_blocking(move || process::scan_processes(processes.as_ref()))
                .await
                .map_err(|e| ScanError(e.to_string()))?
        });

        let log_files = self.log_files.clone();
        let log = self.run_scanner("log", async move {
            tokio::task::spawn_blocking(move || logs::scan_logs(&log_files))
                .await
                .map_err(|e| ScanError(e.to_string()))?
        });

        let (behavioral, network, process, log) = tokio::join!(behavioral, network, process, log);

        let mut threats: Vec<ThreatRecord> = behavioral;
        threats.extend(network);
        threats.extend(process);
        threats.extend(log);

        let report = DetectionReport::from_threats(threats);
        log::info!("{}", report.summary);
        report
    }

    /// Wrap one scanner in a task and a timeout, settling every failure mode
    /// to an empty result.
    async fn run_scanner<F>(&self, vector: &'static str, scan: F) -> Vec<ThreatRecord>
    where
        F: Future<Output = Result<Vec<ThreatRecord>, ScanError>> + Send + 'static,
    {
        match tokio::time::timeout(self.scanner_timeout, tokio::spawn(scan)).await {
            Ok(Ok(Ok(threats))) => {
                log::debug!("{} scanner found {} threat(s)", vector, threats.len());
                threats
            }
            Ok(Ok(Err(e))) => {
                log::warn!("{} scanner failed: {}", vector, e);
                Vec::new()
            }
            Ok(Err(e)) => {
                log::warn!("{} scanner task died: {}", vector, e);
                Vec::new()
            }
            Err(_) => {
                log::warn!(
                    "{} scanner timed out after {}s",
                    vector,
                    self.scanner_timeout.as_secs()
                );
                Vec::new()
            }
        }
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
