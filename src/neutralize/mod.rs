//! Neutralization Engine
//!
//! Tries the configured strategies against a threat, in order, until one
//! succeeds or all are exhausted. Every strategy tried leaves an attempt
//! entry; a strategy with no payloads leaves an explicit failed attempt,
//! never a silent skip. No strategy is retried within one call.

pub mod channels;

use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use channels::{Delivery, DeliveryChannel, NetworkChannel, ProcessChannel, TimingChannel};

use crate::config::{InjectionConfig, PayloadPolicy};
use crate::detect::types::{ThreatRecord, ThreatVector};

// ============================================================================
// ATTEMPT LOG
// ============================================================================

/// One attempt against one strategy. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionAttempt {
    pub strategy: String,
    pub success: bool,
    /// Channel-specific mechanism label, absent when delivery never ran.
    pub method: Option<String>,
    pub detail: Value,
}

/// Outcome of one `neutralize` call. `attempts` holds one entry per strategy
/// tried, in configured order, truncated at the first success; `method` is
/// the winning strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionResult {
    pub threat_id: String,
    pub success: bool,
    pub method: Option<String>,
    pub attempts: Vec<InjectionAttempt>,
}

// ============================================================================
// PAYLOAD SELECTION
// ============================================================================

/// Explicit selection policy state. Round-robin keeps one counter per
/// strategy; seeded draws from its own RNG, independent of the channels'.
enum SelectionState {
    RoundRobin { counters: HashMap<String, usize> },
    Seeded { rng: StdRng },
}

impl SelectionState {
    fn new(policy: PayloadPolicy, seed: u64) -> Self {
        match policy {
            PayloadPolicy::RoundRobin => SelectionState::RoundRobin {
                counters: HashMap::new(),
            },
            PayloadPolicy::Seeded => SelectionState::Seeded {
                rng: StdRng::seed_from_u64(seed),
            },
        }
    }

    fn select<'a>(&mut self, strategy: &str, payloads: &'a [String]) -> &'a str {
        match self {
            SelectionState::RoundRobin { counters } => {
                let counter = counters.entry(strategy.to_string()).or_insert(0);
                let payload = &payloads[*counter % payloads.len()];
                *counter += 1;
                payload
            }
            SelectionState::Seeded { rng } => &payloads[rng.gen_range(0..payloads.len())],
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct NeutralizationEngine {
    strategies: Vec<String>,
    payloads: BTreeMap<String, Vec<String>>,
    selection: SelectionState,
    network: Box<dyn DeliveryChannel>,
    process: Box<dyn DeliveryChannel>,
    timing: Box<dyn DeliveryChannel>,
}

impl NeutralizationEngine {
    /// Engine with the built-in simulated channels.
    pub fn new(config: &InjectionConfig) -> Self {
        Self::with_channels(
            config,
            Box::new(NetworkChannel::new(config.simulation_seed)),
            Box::new(ProcessChannel::new(config.simulation_seed)),
            Box::new(TimingChannel::new(config.simulation_seed)),
        )
    }

    /// Engine with caller-provided channels. Tests script outcomes here.
    pub fn with_channels(
        config: &InjectionConfig,
        network: Box<dyn DeliveryChannel>,
        process: Box<dyn DeliveryChannel>,
        timing: Box<dyn DeliveryChannel>,
    ) -> Self {
        Self {
            strategies: config.strategies.clone(),
            payloads: config.payloads.clone(),
            selection: SelectionState::new(config.payload_policy, config.selection_seed),
            network,
            process,
            timing,
        }
    }

    /// Configuration check for the init stage.
    pub fn self_test(&self) -> bool {
        !self.strategies.is_empty() && !self.payloads.is_empty()
    }

    fn channel_for(&mut self, vector: ThreatVector) -> Option<&mut Box<dyn DeliveryChannel>> {
        match vector {
            ThreatVector::Network => Some(&mut self.network),
            ThreatVector::Process => Some(&mut self.process),
            ThreatVector::Behavioral => Some(&mut self.timing),
            ThreatVector::Log | ThreatVector::Unknown => None,
        }
    }

    /// Run the ordered strategies against one threat. Stops at the first
    /// successful attempt; the winning strategy becomes the result method.
    pub fn neutralize(&mut self, threat: &ThreatRecord) -> InjectionResult {
        let mut result = InjectionResult {
            threat_id: threat.id.clone(),
            success: false,
            method: None,
            attempts: Vec::new(),
        };

        let strategies = self.strategies.clone();
        for strategy in strategies {
            log::info!("Attempting {} injection on threat {}", strategy, threat.id);

            let payload = match self.payloads.get(&strategy) {
                Some(payloads) if !payloads.is_empty() => {
                    self.selection.select(&strategy, payloads).to_string()
                }
                _ => {
                    result.attempts.push(InjectionAttempt {
                        strategy: strategy.clone(),
                        success: false,
                        method: None,
                        detail: json!({ "reason": "no payload configured" }),
                    });
                    continue;
                }
            };

            let attempt = match self.channel_for(threat.vector) {
                Some(channel) => {
                    let Delivery {
                        outcome,
                        method,
                        detail,
                    } = channel.deliver(threat, &strategy, &payload);
                    InjectionAttempt {
                        strategy: strategy.clone(),
                        success: outcome.is_success(),
                        method,
                        detail,
                    }
                }
                None => InjectionAttempt {
                    strategy: strategy.clone(),
                    success: false,
                    method: None,
                    detail: json!({
                        "reason": "no delivery channel",
                        "vector": threat.vector.as_str(),
                    }),
                },
            };

            let succeeded = attempt.success;
            result.attempts.push(attempt);

            if succeeded {
                result.success = true;
                result.method = Some(strategy);
                break;
            }
        }

        if !result.success {
            log::warn!(
                "Failed to neutralize threat {} after {} attempt(s)",
                threat.id,
                result.attempts.len()
            );
        }
        result
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use super::channels::DeliveryOutcome;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Channel that replays a scripted outcome sequence.
    struct ScriptedChannel {
        outcomes: VecDeque<DeliveryOutcome>,
        payloads_seen: Arc<parking_lot::Mutex<Vec<String>>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedChannel {
        fn new(outcomes: Vec<DeliveryOutcome>) -> Self {
            Self {
                outcomes: outcomes.into(),
                payloads_seen: Arc::new(parking_lot::Mutex::new(Vec::new())),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl DeliveryChannel for ScriptedChannel {
        fn deliver(&mut self, _threat: &ThreatRecord, _strategy: &str, payload: &str) -> Delivery {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.payloads_seen.lock().push(payload.to_string());
            Delivery {
                outcome: self.outcomes.pop_front().unwrap_or(DeliveryOutcome::Failure),
                method: Some("scripted".to_string()),
                detail: json!({}),
            }
        }
    }

    fn network_threat() -> ThreatRecord {
        let mut map = std::collections::BTreeMap::new();
        map.insert(
            crate::detect::types::evidence::SERVICE.to_string(),
            json!("openai"),
        );
        ThreatRecord::new(
            "aa11bb22".to_string(),
            ThreatVector::Network,
            "test".to_string(),
            7,
            map,
        )
    }

    fn config_with_strategies(strategies: &[&str]) -> InjectionConfig {
        let mut payloads = BTreeMap::new();
        for s in strategies {
            payloads.insert(s.to_string(), vec![format!("{} payload", s)]);
        }
        InjectionConfig {
            strategies: strategies.iter().map(|s| s.to_string()).collect(),
            payloads,
            ..InjectionConfig::default()
        }
    }

    fn engine_with_network(
        config: &InjectionConfig,
        network: ScriptedChannel,
    ) -> NeutralizationEngine {
        NeutralizationEngine::with_channels(
            config,
            Box::new(network),
            Box::new(ScriptedChannel::new(vec![])),
            Box::new(ScriptedChannel::new(vec![])),
        )
    }

    #[test]
    fn test_stops_at_first_success() {
        let config = config_with_strategies(&["alpha", "beta", "gamma"]);
        let channel = ScriptedChannel::new(vec![
            DeliveryOutcome::Failure,
            DeliveryOutcome::Success,
            DeliveryOutcome::Success,
        ]);
        let calls = channel.calls.clone();
        let mut engine = engine_with_network(&config, channel);

        let result = engine.neutralize(&network_threat());
        assert!(result.success);
        assert_eq!(result.method.as_deref(), Some("beta"));
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_exhaustion_reports_every_attempt() {
        let config = config_with_strategies(&["alpha", "beta"]);
        let channel =
            ScriptedChannel::new(vec![DeliveryOutcome::Failure, DeliveryOutcome::Failure]);
        let mut engine = engine_with_network(&config, channel);

        let result = engine.neutralize(&network_threat());
        assert!(!result.success);
        assert!(result.method.is_none());
        assert_eq!(result.attempts.len(), 2);
        assert!(result.attempts.iter().all(|a| !a.success));
    }

    #[test]
    fn test_channel_error_counts_as_failed_attempt() {
        let config = config_with_strategies(&["alpha", "beta"]);
        let channel = ScriptedChannel::new(vec![
            DeliveryOutcome::ChannelError("endpoint unreachable".to_string()),
            DeliveryOutcome::Success,
        ]);
        let mut engine = engine_with_network(&config, channel);

        let result = engine.neutralize(&network_threat());
        assert!(result.success);
        assert_eq!(result.method.as_deref(), Some("beta"));
        assert_eq!(result.attempts.len(), 2);
        assert!(!result.attempts[0].success);
    }

    #[test]
    fn test_missing_payloads_leave_a_recorded_attempt() {
        let mut config = config_with_strategies(&["alpha", "beta"]);
        config.payloads.remove("alpha");

        let channel = ScriptedChannel::new(vec![DeliveryOutcome::Success]);
        let calls = channel.calls.clone();
        let mut engine = engine_with_network(&config, channel);

        let result = engine.neutralize(&network_threat());
        assert!(result.success);
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(result.attempts[0].detail["reason"], "no payload configured");
        // Only beta reached the channel.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_log_vector_has_no_channel() {
        let config = config_with_strategies(&["alpha"]);
        let mut engine = engine_with_network(&config, ScriptedChannel::new(vec![]));

        let threat = ThreatRecord::new(
            "dd44ee55".to_string(),
            ThreatVector::Log,
            "log hit".to_string(),
            3,
            std::collections::BTreeMap::new(),
        );
        let result = engine.neutralize(&threat);
        assert!(!result.success);
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(result.attempts[0].detail["reason"], "no delivery channel");
    }

    #[test]
    fn test_round_robin_walks_the_payload_list() {
        let mut config = config_with_strategies(&["alpha"]);
        config.payloads.insert(
            "alpha".to_string(),
            vec!["one".to_string(), "two".to_string()],
        );
        config.payload_policy = PayloadPolicy::RoundRobin;

        let channel = ScriptedChannel::new(vec![
            DeliveryOutcome::Failure,
            DeliveryOutcome::Failure,
            DeliveryOutcome::Failure,
        ]);
        let seen = channel.payloads_seen.clone();
        let mut engine = engine_with_network(&config, channel);

        let threat = network_threat();
        engine.neutralize(&threat);
        engine.neutralize(&threat);
        engine.neutralize(&threat);

        assert_eq!(*seen.lock(), vec!["one", "two", "one"]);
    }

    #[test]
    fn test_seeded_selection_is_reproducible() {
        let mut config = config_with_strategies(&["alpha"]);
        config.payloads.insert(
            "alpha".to_string(),
            (0..10).map(|i| format!("payload-{}", i)).collect(),
        );
        config.payload_policy = PayloadPolicy::Seeded;
        config.selection_seed = 99;

        let run = || {
            let channel = ScriptedChannel::new(vec![DeliveryOutcome::Failure; 5]);
            let seen = channel.payloads_seen.clone();
            let mut engine = engine_with_network(&config, channel);
            let threat = network_threat();
            for _ in 0..5 {
                engine.neutralize(&threat);
            }
            let picks = seen.lock().clone();
            picks
        };

        assert_eq!(run(), run());
    }
}
