//! Detection Signatures
//!
//! Closed signature tables for AI-agent indicators. The scanners, the
//! containment manager, and the delivery channels all key off the same
//! `AiService` table so a detected service resolves to one block target
//! and one delivery endpoint.

use once_cell::sync::Lazy;
use regex::Regex;

// ============================================================================
// PATTERN TABLES
// ============================================================================

/// AI API endpoints as they appear in log lines and URLs.
pub static API_ENDPOINT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"openai\.com/v1",
        r"api\.anthropic\.com",
        r"generativelanguage\.googleapis\.com",
        r"huggingface\.co/api",
        r"replicate\.com/api",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid endpoint pattern"))
    .collect()
});

/// Command lines typical of locally-running AI agents.
pub static PROCESS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)python.*transformers",
        r"(?i)python.*openai",
        r"(?i)python.*langchain",
        r"(?i)ollama",
        r"(?i)llama\.cpp",
        r"(?i)vllm",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid process pattern"))
    .collect()
});

/// Model artifact files referenced on a command line.
pub static MODEL_FILE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"\.gguf\b", r"\.safetensors\b", r"model\.bin\b", r"tokenizer\.json\b"]
        .iter()
        .map(|p| Regex::new(p).expect("invalid model file pattern"))
        .collect()
});

// ============================================================================
// AI SERVICE TABLE
// ============================================================================

/// Known AI services a host process may be talking to. Closed set; anything
/// not in the table is simply not classified as a service connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiService {
    OpenAi,
    Anthropic,
    HuggingFace,
    GoogleAi,
}

pub const ALL_SERVICES: [AiService; 4] = [
    AiService::OpenAi,
    AiService::Anthropic,
    AiService::HuggingFace,
    AiService::GoogleAi,
];

impl AiService {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiService::OpenAi => "openai",
            AiService::Anthropic => "anthropic",
            AiService::HuggingFace => "huggingface",
            AiService::GoogleAi => "google_ai",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "openai" => Some(AiService::OpenAi),
            "anthropic" => Some(AiService::Anthropic),
            "huggingface" => Some(AiService::HuggingFace),
            "google_ai" => Some(AiService::GoogleAi),
            _ => None,
        }
    }

    pub fn domains(&self) -> &'static [&'static str] {
        match self {
            AiService::OpenAi => &["api.openai.com", "openai.com"],
            AiService::Anthropic => &["api.anthropic.com", "anthropic.com"],
            AiService::HuggingFace => &["huggingface.co", "hf.co"],
            AiService::GoogleAi => &["generativelanguage.googleapis.com"],
        }
    }

    pub fn ports(&self) -> &'static [u16] {
        match self {
            AiService::OpenAi => &[443, 80],
            AiService::Anthropic => &[443],
            AiService::HuggingFace => &[443],
            AiService::GoogleAi => &[443],
        }
    }

    /// Severity of a detected connection to this service.
    pub fn severity(&self) -> u8 {
        match self {
            AiService::OpenAi => 5,
            AiService::Anthropic => 5,
            AiService::HuggingFace => 4,
            AiService::GoogleAi => 5,
        }
    }

    /// Delivery endpoint for the network channel. Not every service exposes
    /// one; a connection can be detected but not reachable for delivery.
    pub fn delivery_endpoint(&self) -> Option<&'static str> {
        match self {
            AiService::OpenAi => Some("https://api.openai.com/v1/chat/completions"),
            AiService::Anthropic => Some("https://api.anthropic.com/v1/complete"),
            AiService::HuggingFace => Some("https://api-inference.huggingface.co/models"),
            AiService::GoogleAi => None,
        }
    }

    /// Classify a remote endpoint against the table. The hostname must
    /// contain one of the service's domains and the port must be listed.
    pub fn classify(hostname: &str, port: u16) -> Option<Self> {
        ALL_SERVICES.into_iter().find(|service| {
            service.ports().contains(&port)
                && service.domains().iter().any(|d| hostname.contains(d))
        })
    }
}

impl std::fmt::Display for AiService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
