//! Defense Pipeline
//!
//! Sequences the response stages: Init, Detect, Analyze, ContainDeploy,
//! Defend, Verify, ContainRemove. Every stage is independently invocable
//! from the CLI and communicates only through persisted artifacts; a stage
//! whose prerequisite is missing or malformed fails fast and writes nothing.

pub mod artifacts;

use std::path::Path;
use std::sync::Arc;

use artifacts::{Artifacts, ArtifactError, DefenseEntry};

use crate::analyze::{OriginAnalyzer, OriginRecord};
use crate::config::DefenseConfig;
use crate::contain::surface::{DryRunSurface, RuleSurface};
use crate::contain::ContainmentManager;
use crate::detect::behavioral::ActivityWindow;
use crate::detect::classifier::{OpenAiClassifier, ThreatClassifier};
use crate::detect::inspect::{
    ConnectionSource, HostConnectionSource, HostProcessSource, ProcessSource,
};
use crate::detect::types::DetectionReport;
use crate::detect::DetectionAggregator;
use crate::neutralize::NeutralizationEngine;
use crate::verify::{VerificationRecord, Verifier};

pub struct DefensePipeline {
    config: DefenseConfig,
    artifacts: Artifacts,
    processes: Arc<dyn ProcessSource>,
    connections: Arc<dyn ConnectionSource>,
    classifier: Arc<dyn ThreatClassifier>,
    surface: Arc<dyn RuleSurface>,
    aggregator: Arc<DetectionAggregator>,
    analyzer: OriginAnalyzer,
    containment: ContainmentManager,
    engine: NeutralizationEngine,
    verifier: Verifier,
}

impl DefensePipeline {
    /// Pipeline wired with the production collaborators.
    pub fn build(config: DefenseConfig) -> Self {
        let classifier = Arc::new(OpenAiClassifier::new(&config.classifier));
        Self::with_collaborators(
            config,
            Arc::new(HostProcessSource::new()),
            Arc::new(HostConnectionSource),
            classifier,
            Arc::new(DryRunSurface),
        )
    }

    /// Pipeline wired with caller-provided collaborators. Tests inject
    /// fixtures and scripted doubles here.
    pub fn with_collaborators(
        config: DefenseConfig,
        processes: Arc<dyn ProcessSource>,
        connections: Arc<dyn ConnectionSource>,
        classifier: Arc<dyn ThreatClassifier>,
        surface: Arc<dyn RuleSurface>,
    ) -> Self {
        let aggregator = Arc::new(DetectionAggregator::new(
            Arc::clone(&processes),
            Arc::clone(&connections),
            Arc::clone(&classifier),
            &config.scan,
        ));
        let containment =
            ContainmentManager::new(Arc::clone(&surface), &config.containment, config.rules_path());
        let engine = NeutralizationEngine::new(&config.injection);
        let verifier = Verifier::new(Arc::clone(&aggregator), &config.verification);
        let artifacts = Artifacts::new(config.artifacts_dir.clone());

        Self {
            config,
            artifacts,
            processes,
            connections,
            classifier,
            surface,
            aggregator,
            analyzer: OriginAnalyzer::new(),
            containment,
            engine,
            verifier,
        }
    }

    /// Swap the neutralization engine. Tests script delivery outcomes here.
    pub fn set_engine(&mut self, engine: NeutralizationEngine) {
        self.engine = engine;
    }

    fn activity_window(&self) -> ActivityWindow {
        let mut window = ActivityWindow::new(
            self.config.scan.activity_window_minutes,
            self.config.scan.activity_window_entries,
        );
        if let Err(e) = window.fill_from(self.processes.as_ref()) {
            log::warn!("Failed to fill activity window: {}", e);
        }
        window
    }

    // ------------------------------------------------------------------
    // STAGES
    // ------------------------------------------------------------------

    /// Check every component before first use. Returns true only when all
    /// components pass.
    pub async fn init(&self, verbose: bool) -> bool {
        log::info!("Initializing AI Defense System...");

        if let Err(e) = self.classifier.healthcheck().await {
            log::error!("Failed to verify classifier credentials: {}", e);
            return false;
        }

        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        log::info!("Host under protection: {}", host);

        let components = [
            ("Detector", self.detector_self_test()),
            ("Analyzer", true),
            ("Firewall", self.surface.self_test()),
            ("Injector", self.engine.self_test()),
        ];

        if verbose {
            for (component, status) in &components {
                log::info!("{}: {}", component, if *status { "ok" } else { "failed" });
            }
        }

        components.iter().all(|(_, status)| *status)
    }

    fn detector_self_test(&self) -> bool {
        if let Err(e) = self.processes.processes() {
            log::warn!("Process source self-test failed: {}", e);
            return false;
        }
        if let Err(e) = self.connections.connections() {
            log::warn!("Connection source self-test failed: {}", e);
            return false;
        }
        // Artifact directory must be writable before any stage runs.
        let probe = self.config.artifacts_dir.join(".ai_defense_selftest");
        if let Err(e) = std::fs::write(&probe, b"ok") {
            log::warn!("Artifact directory is not writable: {}", e);
            return false;
        }
        let _ = std::fs::remove_file(&probe);
        true
    }

    /// Run one scan cycle and persist the detection report.
    pub async fn detect(&self) -> Result<DetectionReport, ArtifactError> {
        log::info!("Starting threat detection scan...");
        let window = self.activity_window();
        let report = self.aggregator.scan(&window).await;
        self.artifacts.save(artifacts::DETECTION_REPORT, &report)?;
        Ok(report)
    }

    /// Trace origins for every threat in a detection report. A report with
    /// no threats writes an empty list so downstream stages keep a
    /// well-formed input.
    pub fn analyze(&self, input: &Path) -> Result<Vec<OriginRecord>, ArtifactError> {
        log::info!("Analyzing threat origins...");
        let report = self.artifacts.load_report_from(input)?;

        let records: Vec<OriginRecord> = report
            .detections
            .iter()
            .map(|threat| self.analyzer.analyze(threat))
            .collect();

        self.artifacts.save(artifacts::ANALYSIS_REPORT, &records)?;
        log::info!("Analyzed {} threat(s)", records.len());
        Ok(records)
    }

    /// Deploy containment rules from the persisted detection report.
    pub fn contain_deploy(&self) -> Result<usize, ArtifactError> {
        log::info!("Deploying firewall...");
        let report = self.artifacts.load_report()?;

        // Origin analysis is context, not a prerequisite for containment.
        match self.artifacts.load_analysis() {
            Ok(analysis) => log::debug!("{} origin record(s) available", analysis.len()),
            Err(ArtifactError::MissingPrerequisite { .. }) => {
                log::debug!("No analysis report present, deploying from detections only")
            }
            Err(e) => log::warn!("Ignoring unusable analysis report: {}", e),
        }

        let deployed = self.containment.deploy(&report);
        log::info!("Deployed {} firewall rule(s)", deployed);
        Ok(deployed)
    }

    /// Run the neutralization engine against every detected threat and
    /// persist the defense results.
    pub fn defend(&mut self) -> Result<Vec<DefenseEntry>, ArtifactError> {
        log::info!("Executing defensive measures...");
        let report = self.artifacts.load_report()?;

        let mut entries = Vec::new();
        for threat in &report.detections {
            let result = self.engine.neutralize(threat);
            entries.push(DefenseEntry::from(&result));
        }

        self.artifacts.save(artifacts::DEFENSE_RESULTS, &entries)?;
        let succeeded = entries.iter().filter(|e| e.injection_success).count();
        log::info!("Successfully neutralized {}/{} threat(s)", succeeded, entries.len());
        Ok(entries)
    }

    /// Re-scan to confirm absence of every threat whose injection succeeded.
    pub async fn verify(&self) -> Result<Vec<VerificationRecord>, ArtifactError> {
        log::info!("Verifying neutralization...");
        let defense = self.artifacts.load_defense()?;

        let window = self.activity_window();
        let mut records = Vec::new();
        for entry in defense.iter().filter(|e| e.injection_success) {
            records.push(self.verifier.verify(&entry.threat_id, &window).await);
        }

        self.artifacts.save(artifacts::VERIFICATION_REPORT, &records)?;
        let neutralized = records.iter().filter(|r| r.neutralized).count();
        log::info!("Verified {}/{} neutralization(s)", neutralized, records.len());
        Ok(records)
    }

    /// Tear down every tracked containment rule.
    pub fn contain_remove(&self) -> usize {
        log::info!("Removing firewall...");
        let removed = self.containment.remove_all();
        log::info!("Removed {} firewall rule(s)", removed);
        removed
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
