//! Delivery Channels
//!
//! Per-vector payload delivery behind a narrow contract. Every channel
//! returns an explicit outcome; the simulated implementations draw from a
//! seeded RNG owned by the channel, never a hidden coin flip in the engine.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

use crate::detect::signatures::AiService;
use crate::detect::types::{evidence, ThreatRecord};

// ============================================================================
// OUTCOMES
// ============================================================================

/// Explicit result of one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Success,
    Failure,
    /// The channel could not attempt delivery at all (malformed evidence,
    /// unreachable endpoint). Distinct from a delivered-but-ineffective
    /// payload.
    ChannelError(String),
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Success)
    }
}

/// One channel response: the outcome plus the channel-specific mechanism
/// label and detail payload that go into the attempt log.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub outcome: DeliveryOutcome,
    pub method: Option<String>,
    pub detail: Value,
}

impl Delivery {
    fn failed(reason: &str) -> Self {
        Self {
            outcome: DeliveryOutcome::Failure,
            method: None,
            detail: json!({ "reason": reason }),
        }
    }

    fn errored(reason: String) -> Self {
        Self {
            outcome: DeliveryOutcome::ChannelError(reason.clone()),
            method: None,
            detail: json!({ "error": reason }),
        }
    }
}

// ============================================================================
// COLLABORATOR TRAIT
// ============================================================================

pub trait DeliveryChannel: Send {
    fn deliver(&mut self, threat: &ThreatRecord, strategy: &str, payload: &str) -> Delivery;
}

// ============================================================================
// SIMULATED OUTCOMES
// ============================================================================

/// Seeded outcome source shared by the simulated channels. Success rates
/// come from the per-strategy and per-target tables below; the draw itself
/// is reproducible for a given seed.
struct SimulatedOutcomes {
    rng: StdRng,
}

impl SimulatedOutcomes {
    fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn decide(&mut self, success_rate: f64) -> DeliveryOutcome {
        if self.rng.gen::<f64>() < success_rate {
            DeliveryOutcome::Success
        } else {
            DeliveryOutcome::Failure
        }
    }

    fn pick<'a>(&mut self, options: &[&'a str]) -> &'a str {
        options[self.rng.gen_range(0..options.len())]
    }
}

fn strategy_success_rate(strategy: &str) -> f64 {
    match strategy {
        "confusion" => 0.7,
        "redirection" => 0.8,
        "overload" => 0.6,
        "shutdown" => 0.5,
        _ => 0.5,
    }
}

fn preview(payload: &str) -> String {
    let excerpt: String = payload.chars().take(100).collect();
    format!("{}...", excerpt)
}

// ============================================================================
// NETWORK CHANNEL
// ============================================================================

/// Delivers through the detected service's API endpoint.
pub struct NetworkChannel {
    sim: SimulatedOutcomes,
}

impl NetworkChannel {
    pub fn new(seed: u64) -> Self {
        Self {
            sim: SimulatedOutcomes::new(seed),
        }
    }
}

impl DeliveryChannel for NetworkChannel {
    fn deliver(&mut self, threat: &ThreatRecord, strategy: &str, payload: &str) -> Delivery {
        let service_label = match threat.evidence_str(evidence::SERVICE) {
            Some(label) => label,
            None => return Delivery::errored("threat carries no service evidence".to_string()),
        };
        let service = match AiService::from_label(service_label) {
            Some(service) => service,
            None => {
                return Delivery::errored(format!("unknown service \"{}\"", service_label));
            }
        };
        let endpoint = match service.delivery_endpoint() {
            Some(endpoint) => endpoint,
            None => return Delivery::failed("no delivery endpoint for service"),
        };

        log::info!("Delivering {} payload to {}", strategy, endpoint);
        Delivery {
            outcome: self.sim.decide(strategy_success_rate(strategy)),
            method: Some("network_api".to_string()),
            detail: json!({
                "target": endpoint,
                "payload_preview": preview(payload),
            }),
        }
    }
}

// ============================================================================
// PROCESS CHANNEL
// ============================================================================

/// Delivers through a process-level channel chosen by process name.
pub struct ProcessChannel {
    sim: SimulatedOutcomes,
}

impl ProcessChannel {
    pub fn new(seed: u64) -> Self {
        Self {
            sim: SimulatedOutcomes::new(seed),
        }
    }
}

const PYTHON_VECTORS: [&str; 3] = ["env_var", "shared_memory", "debug_port"];
const OLLAMA_API: &str = "http://localhost:11434/api/generate";

impl DeliveryChannel for ProcessChannel {
    fn deliver(&mut self, threat: &ThreatRecord, strategy: &str, payload: &str) -> Delivery {
        let name = match threat.evidence_str(evidence::PROCESS_NAME) {
            Some(name) => name.to_ascii_lowercase(),
            None => return Delivery::errored("threat carries no process evidence".to_string()),
        };
        let pid = threat.evidence_u64(evidence::PROCESS_ID).unwrap_or(0);

        log::info!("Delivering {} payload to process {} (PID {})", strategy, name, pid);

        if name.contains("ollama") {
            return Delivery {
                outcome: self.sim.decide(0.75),
                method: Some("ollama_api_injection".to_string()),
                detail: json!({
                    "target_pid": pid,
                    "api_endpoint": OLLAMA_API,
                    "payload_preview": preview(payload),
                }),
            };
        }

        if name.contains("python") {
            let vector = self.sim.pick(&PYTHON_VECTORS);
            return Delivery {
                outcome: self.sim.decide(0.7),
                method: Some(format!("python_{}_injection", vector)),
                detail: json!({
                    "target_pid": pid,
                    "injection_vector": vector,
                }),
            };
        }

        if name.contains("llama.cpp") || name.contains("llama-server") {
            return Delivery {
                outcome: self.sim.decide(0.65),
                method: Some("llama_cpp_stream_injection".to_string()),
                detail: json!({
                    "target_pid": pid,
                    "stream": "stdin",
                }),
            };
        }

        Delivery::failed("unknown process type")
    }
}

// ============================================================================
// TIMING CHANNEL
// ============================================================================

/// Behavioral interception: queues the payload for the target's next
/// activity burst.
pub struct TimingChannel {
    sim: SimulatedOutcomes,
}

impl TimingChannel {
    pub fn new(seed: u64) -> Self {
        Self {
            sim: SimulatedOutcomes::new(seed),
        }
    }
}

impl DeliveryChannel for TimingChannel {
    fn deliver(&mut self, _threat: &ThreatRecord, strategy: &str, payload: &str) -> Delivery {
        log::info!("Behavioral interception with {} strategy", strategy);
        Delivery {
            outcome: self.sim.decide(0.65),
            method: Some("behavioral_interception".to_string()),
            detail: json!({
                "timing": "next_api_call",
                "payload_preview": preview(payload),
            }),
        }
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::types::ThreatVector;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn network_threat(service: &str) -> ThreatRecord {
        let mut map = BTreeMap::new();
        map.insert(evidence::SERVICE.to_string(), json!(service));
        ThreatRecord::new(
            "aa11bb22".to_string(),
            ThreatVector::Network,
            "test".to_string(),
            5,
            map,
        )
    }

    fn process_threat(name: &str) -> ThreatRecord {
        let mut map = BTreeMap::new();
        map.insert(evidence::PROCESS_NAME.to_string(), json!(name));
        map.insert(evidence::PROCESS_ID.to_string(), json!(4242));
        ThreatRecord::new(
            "cc33dd44".to_string(),
            ThreatVector::Process,
            "test".to_string(),
            5,
            map,
        )
    }

    #[test]
    fn test_network_channel_is_reproducible_for_a_seed() {
        let threat = network_threat("openai");
        let run = |seed| {
            let mut channel = NetworkChannel::new(seed);
            channel.deliver(&threat, "confusion", "payload").outcome
        };
        assert_eq!(run(7), run(7));
    }

    #[test]
    fn test_network_channel_without_endpoint_fails_explicitly() {
        let mut channel = NetworkChannel::new(1);
        let delivery = channel.deliver(&network_threat("google_ai"), "confusion", "payload");
        assert_eq!(delivery.outcome, DeliveryOutcome::Failure);
        assert!(delivery.method.is_none());
    }

    #[test]
    fn test_network_channel_with_missing_evidence_is_a_channel_error() {
        let mut channel = NetworkChannel::new(1);
        let threat = ThreatRecord::new(
            "ee55ff66".to_string(),
            ThreatVector::Network,
            "test".to_string(),
            5,
            BTreeMap::new(),
        );
        let delivery = channel.deliver(&threat, "confusion", "payload");
        assert!(matches!(delivery.outcome, DeliveryOutcome::ChannelError(_)));
    }

    #[test]
    fn test_process_channel_dispatches_on_name() {
        let mut channel = ProcessChannel::new(3);

        let delivery = channel.deliver(&process_threat("ollama"), "confusion", "p");
        assert_eq!(delivery.method.as_deref(), Some("ollama_api_injection"));

        let delivery = channel.deliver(&process_threat("python3"), "confusion", "p");
        assert!(delivery.method.unwrap().starts_with("python_"));

        let delivery = channel.deliver(&process_threat("node"), "confusion", "p");
        assert_eq!(delivery.outcome, DeliveryOutcome::Failure);
    }

    #[test]
    fn test_timing_channel_labels_interception() {
        let mut channel = TimingChannel::new(5);
        let delivery = channel.deliver(&network_threat("openai"), "overload", "p");
        assert_eq!(delivery.method.as_deref(), Some("behavioral_interception"));
        assert_eq!(delivery.detail["timing"], "next_api_call");
    }
}
