//! Containment Manager
//!
//! Turns threat evidence into block rules, deploys them against the rule
//! surface, and tracks the live set. The tracked set is the single source of
//! truth for what is ours to remove; it is mutated under one mutex and
//! persisted so a later invocation can reconcile and tear down.

pub mod rules;
pub mod surface;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use rules::{ContainmentRule, RuleKind};
use surface::{RuleSurface, SurfaceError};

use crate::config::ContainmentConfig;
use crate::detect::types::{evidence, DetectionReport, ThreatRecord};

pub struct ContainmentManager {
    surface: Arc<dyn RuleSurface>,
    live: Mutex<Vec<ContainmentRule>>,
    rules_path: PathBuf,
    port_watchlist: Vec<u16>,
}

impl ContainmentManager {
    pub fn new(surface: Arc<dyn RuleSurface>, config: &ContainmentConfig, rules_path: PathBuf) -> Self {
        Self {
            surface,
            live: Mutex::new(Vec::new()),
            rules_path,
            port_watchlist: config.port_watchlist.clone(),
        }
    }

    /// Candidate rules for one threat, in the fixed evidence inspection
    /// order: remote ip, then watchlisted remote port, then process name.
    /// At most one rule per matched field.
    fn candidate_rules(&self, threat: &ThreatRecord) -> Vec<ContainmentRule> {
        let mut candidates = Vec::new();

        if let Some(ip) = threat.evidence_str(evidence::REMOTE_IP) {
            candidates.push(ContainmentRule::new(
                RuleKind::BlockIp,
                ip,
                threat.description.clone(),
            ));
        }

        if let Some(port) = threat.evidence_u64(evidence::REMOTE_PORT) {
            if self.port_watchlist.iter().any(|w| u64::from(*w) == port) {
                candidates.push(ContainmentRule::new(
                    RuleKind::BlockPort,
                    port.to_string(),
                    threat.description.clone(),
                ));
            }
        }

        if let Some(name) = threat.evidence_str(evidence::PROCESS_NAME) {
            candidates.push(ContainmentRule::new(
                RuleKind::BlockProcess,
                name,
                threat.description.clone(),
            ));
        }

        candidates
    }

    /// Deploy rules for every threat in the report. Returns the number of
    /// rules actually applied and added to the live set: a rule whose apply
    /// hook fails is neither tracked nor counted, and a rule whose identity
    /// is already live is skipped without re-applying.
    pub fn deploy(&self, report: &DetectionReport) -> usize {
        let mut deployed = 0;

        for threat in &report.detections {
            for rule in self.candidate_rules(threat) {
                let mut live = self.live.lock();
                if live.iter().any(|r| r.identity() == rule.identity()) {
                    log::debug!("Rule {} already live, skipping", rule);
                    continue;
                }

                match self.surface.apply(&rule) {
                    Ok(()) => {
                        live.push(rule);
                        deployed += 1;
                    }
                    Err(e) => {
                        log::warn!("Apply hook failed for {}: {}", rule, e);
                    }
                }
            }
        }

        self.persist();
        deployed
    }

    /// Remove every tracked rule. A rule the surface no longer knows is
    /// cleared without counting; other removal failures keep the rule
    /// tracked. Calling this twice in a row is a no-op the second time.
    pub fn remove_all(&self) -> usize {
        self.reconcile();

        let mut removed = 0;
        let mut live = self.live.lock();
        live.retain(|rule| match self.surface.remove(rule) {
            Ok(()) => {
                removed += 1;
                false
            }
            Err(SurfaceError::NotFound) => {
                log::debug!("Rule {} already absent", rule);
                false
            }
            Err(e) => {
                log::warn!("Remove hook failed for {}: {}", rule, e);
                true
            }
        });
        drop(live);

        self.persist();
        removed
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    /// Load the persisted rule list when the in-memory set is empty, so a
    /// fresh invocation can tear down rules deployed by an earlier one.
    fn reconcile(&self) {
        let mut live = self.live.lock();
        if !live.is_empty() || !self.rules_path.exists() {
            return;
        }

        match fs::read_to_string(&self.rules_path) {
            Ok(content) => match serde_json::from_str::<Vec<ContainmentRule>>(&content) {
                Ok(persisted) => {
                    log::info!(
                        "Reconciled {} persisted rule(s) from {}",
                        persisted.len(),
                        self.rules_path.display()
                    );
                    *live = persisted;
                }
                Err(e) => log::warn!("Ignoring malformed rule list: {}", e),
            },
            Err(e) => log::warn!("Failed to read rule list: {}", e),
        }
    }

    fn persist(&self) {
        let live = self.live.lock();
        match serde_json::to_string_pretty(&*live) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.rules_path, json) {
                    log::error!("Failed to persist rule list: {}", e);
                }
            }
            Err(e) => log::error!("Failed to serialize rule list: {}", e),
        }
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
