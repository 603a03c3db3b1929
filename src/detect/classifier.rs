//! Threat Classification Service
//!
//! Narrow contract for the language-model collaborator behind the behavioral
//! scanner: structured prompt in, JSON array of threat candidates out. The
//! shipped implementation talks to an OpenAI-compatible chat-completions
//! endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::ClassifierConfig;

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug)]
pub enum ClassifierError {
    /// `OPENAI_API_KEY` is not set.
    MissingCredentials,
    Http { message: String },
    BadResponse { message: String },
}

impl std::fmt::Display for ClassifierError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassifierError::MissingCredentials => {
                write!(f, "OPENAI_API_KEY is not set")
            }
            ClassifierError::Http { message } => write!(f, "Classifier request failed: {}", message),
            ClassifierError::BadResponse { message } => {
                write!(f, "Classifier returned an unusable response: {}", message)
            }
        }
    }
}

impl std::error::Error for ClassifierError {}

// ============================================================================
// CANDIDATES
// ============================================================================

/// One threat candidate as emitted by the classification service. Lenient on
/// purpose: the behavioral scanner normalizes these into `ThreatRecord`s and
/// drops anything without a description.
#[derive(Debug, Clone, Deserialize)]
pub struct ThreatCandidate {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub severity: Option<i64>,
    #[serde(default)]
    pub evidence: Option<BTreeMap<String, Value>>,
}

// ============================================================================
// COLLABORATOR TRAIT
// ============================================================================

#[async_trait]
pub trait ThreatClassifier: Send + Sync {
    /// Analyze an activity prompt and return zero or more candidates.
    async fn classify(&self, prompt: &str) -> Result<Vec<ThreatCandidate>, ClassifierError>;

    /// Cheap credential/reachability check for the init stage.
    async fn healthcheck(&self) -> Result<(), ClassifierError>;
}

// ============================================================================
// OPENAI-COMPATIBLE CLIENT
// ============================================================================

pub struct OpenAiClassifier {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

const SYSTEM_PROMPT: &str =
    "You are an AI security expert analyzing system behavior for hostile AI agents.";

impl OpenAiClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }

    fn api_key(&self) -> Result<&str, ClassifierError> {
        self.api_key
            .as_deref()
            .ok_or(ClassifierError::MissingCredentials)
    }
}

/// Unwrap either a bare JSON array or a `{"threats": [...]}` wrapper into
/// candidates. Elements that fail to parse are logged and skipped.
fn parse_candidates(content: &str) -> Result<Vec<ThreatCandidate>, ClassifierError> {
    let value: Value = serde_json::from_str(content).map_err(|e| ClassifierError::BadResponse {
        message: e.to_string(),
    })?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("threats") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(ClassifierError::BadResponse {
                    message: format!("\"threats\" is not an array: {}", other),
                })
            }
            None => Vec::new(),
        },
        other => {
            return Err(ClassifierError::BadResponse {
                message: format!("expected array or object, got {}", other),
            })
        }
    };

    let mut candidates = Vec::new();
    for item in items {
        match serde_json::from_value::<ThreatCandidate>(item) {
            Ok(candidate) => candidates.push(candidate),
            Err(e) => log::warn!("Skipping malformed threat candidate: {}", e),
        }
    }
    Ok(candidates)
}

#[async_trait]
impl ThreatClassifier for OpenAiClassifier {
    async fn classify(&self, prompt: &str) -> Result<Vec<ThreatCandidate>, ClassifierError> {
        let key = self.api_key()?;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClassifierError::Http {
                message: e.to_string(),
            })?
            .error_for_status()
            .map_err(|e| ClassifierError::Http {
                message: e.to_string(),
            })?;

        let body: ChatResponse = response.json().await.map_err(|e| ClassifierError::BadResponse {
            message: e.to_string(),
        })?;

        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| ClassifierError::BadResponse {
                message: "response carried no choices".to_string(),
            })?;

        parse_candidates(content)
    }

    async fn healthcheck(&self) -> Result<(), ClassifierError> {
        let key = self.api_key()?;

        self.client
            .get(format!("{}/models", self.api_base))
            .bearer_auth(key)
            .send()
            .await
            .map_err(|e| ClassifierError::Http {
                message: e.to_string(),
            })?
            .error_for_status()
            .map_err(|e| ClassifierError::Http {
                message: e.to_string(),
            })?;

        Ok(())
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_array() {
        let content = r#"[{"id": "aa11bb22", "description": "rapid API calls", "severity": 7}]"#;
        let candidates = parse_candidates(content).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id.as_deref(), Some("aa11bb22"));
        assert_eq!(candidates[0].severity, Some(7));
    }

    #[test]
    fn test_parse_threats_wrapper() {
        let content = r#"{"threats": [{"description": "model download burst", "severity": 4},
                                       {"description": "prompt probing", "severity": 6}]}"#;
        let candidates = parse_candidates(content).unwrap();
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn test_parse_empty_object_is_no_threats() {
        assert!(parse_candidates("{}").unwrap().is_empty());
        assert!(parse_candidates("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(parse_candidates("no threats found").is_err());
        assert!(parse_candidates("\"just a string\"").is_err());
    }

    #[test]
    fn test_malformed_element_is_skipped_not_fatal() {
        let content = r#"[{"description": "ok", "severity": 5}, "not an object"]"#;
        let candidates = parse_candidates(content).unwrap();
        assert_eq!(candidates.len(), 1);
    }
}
