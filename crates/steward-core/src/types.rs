//! Core message, response and identifier types

use serde::{Deserialize, Serialize};

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message (instructions)
    System,
    /// User message (human input)
    User,
    /// Assistant message (AI response)
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A message in a chat-shaped request. Order is preserved; system messages
/// semantically precede user/assistant turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender
    pub role: MessageRole,
    /// Content of the message
    pub content: String,
    /// Optional image attachment, makes the request vision-bearing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl ChatMessage {
    /// Create a new system message
    pub fn system<S: Into<String>>(content: S) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            image_url: None,
        }
    }

    /// Create a new user message
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            image_url: None,
        }
    }

    /// Create a new user message carrying an image
    pub fn user_with_image<S: Into<String>, U: Into<String>>(content: S, image_url: U) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            image_url: Some(image_url.into()),
        }
    }

    /// Create a new assistant message
    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            image_url: None,
        }
    }
}

/// Whether any message in the request carries an image
pub fn requires_vision(messages: &[ChatMessage]) -> bool {
    messages.iter().any(|m| m.image_url.is_some())
}

/// Business purpose of a request. Selects the provider hierarchy, routing
/// model tier and cache TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Long-form tax Q&A
    TaxConsultation,
    /// Structured extraction from receipt images
    ReceiptExtraction,
    /// Spending/saving analysis
    FinancialInsight,
    /// Free-form conversation
    Chat,
    /// Transaction categorization
    Categorization,
    /// Regulatory compliance checks
    ComplianceCheck,
    /// Tax optimization suggestions
    TaxOptimization,
}

impl OperationType {
    /// All known operation types
    pub const ALL: [OperationType; 7] = [
        OperationType::TaxConsultation,
        OperationType::ReceiptExtraction,
        OperationType::FinancialInsight,
        OperationType::Chat,
        OperationType::Categorization,
        OperationType::ComplianceCheck,
        OperationType::TaxOptimization,
    ];

    /// Stable string form, used in cache keys and usage records
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::TaxConsultation => "tax_consultation",
            OperationType::ReceiptExtraction => "receipt_extraction",
            OperationType::FinancialInsight => "financial_insight",
            OperationType::Chat => "chat",
            OperationType::Categorization => "categorization",
            OperationType::ComplianceCheck => "compliance_check",
            OperationType::TaxOptimization => "tax_optimization",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tax_consultation" => Ok(OperationType::TaxConsultation),
            "receipt_extraction" => Ok(OperationType::ReceiptExtraction),
            "financial_insight" => Ok(OperationType::FinancialInsight),
            "chat" => Ok(OperationType::Chat),
            "categorization" => Ok(OperationType::Categorization),
            "compliance_check" => Ok(OperationType::ComplianceCheck),
            "tax_optimization" => Ok(OperationType::TaxOptimization),
            other => Err(format!("unknown operation type: {other}")),
        }
    }
}

/// An external AI vendor endpoint. An explicit tag, never inferred from
/// model-name substrings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// OpenAI (GPT models)
    OpenAi,
    /// Anthropic (Claude models)
    Anthropic,
    /// Google (Gemini models)
    Google,
    /// Custom provider, adapter supplied by the caller
    Custom(String),
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderId::OpenAi => write!(f, "openai"),
            ProviderId::Anthropic => write!(f, "anthropic"),
            ProviderId::Google => write!(f, "google"),
            ProviderId::Custom(name) => write!(f, "{}", name),
        }
    }
}

impl std::str::FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ProviderId::OpenAi),
            "anthropic" => Ok(ProviderId::Anthropic),
            "google" => Ok(ProviderId::Google),
            other => Ok(ProviderId::Custom(other.to_string())),
        }
    }
}

/// Token counts for a single exchange
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input (prompt) tokens
    pub input: u32,
    /// Output (completion) tokens
    pub output: u32,
    /// Total tokens
    pub total: u32,
}

impl TokenUsage {
    /// Create token usage from input/output counts
    pub fn new(input: u32, output: u32) -> Self {
        Self {
            input,
            output,
            total: input + output,
        }
    }
}

/// Normalized response returned to callers regardless of vendor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResponse {
    /// Generated content
    pub content: String,
    /// Provider that produced the response
    pub provider: ProviderId,
    /// Model that produced the response
    pub model: String,
    /// Token usage for the exchange
    pub usage: TokenUsage,
    /// Cost in USD for this exchange
    pub cost: f64,
    /// Wall-clock time of the provider call in milliseconds
    pub response_time_ms: u64,
    /// Whether the response was served from cache
    pub cached: bool,
}

impl AiResponse {
    /// Re-stamp a stored response as a cache hit.
    ///
    /// Upholds the invariant `cached == true ⇒ cost == 0 ∧ response_time_ms == 0`.
    pub fn into_cached(mut self) -> Self {
        self.cached = true;
        self.cost = 0.0;
        self.response_time_ms = 0;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_type_round_trips() {
        for op in OperationType::ALL {
            let parsed: OperationType = op.as_str().parse().expect("parse back");
            assert_eq!(parsed, op);
        }
    }

    #[test]
    fn provider_id_parses_known_and_custom() {
        assert_eq!("openai".parse::<ProviderId>(), Ok(ProviderId::OpenAi));
        assert_eq!("ANTHROPIC".parse::<ProviderId>(), Ok(ProviderId::Anthropic));
        assert_eq!(
            "mistral".parse::<ProviderId>(),
            Ok(ProviderId::Custom("mistral".to_string()))
        );
    }

    #[test]
    fn cached_responses_cost_nothing() {
        let response = AiResponse {
            content: "hi".to_string(),
            provider: ProviderId::OpenAi,
            model: "gpt-4o-mini".to_string(),
            usage: TokenUsage::new(10, 5),
            cost: 0.12,
            response_time_ms: 340,
            cached: false,
        };
        let cached = response.into_cached();
        assert!(cached.cached);
        assert_eq!(cached.cost, 0.0);
        assert_eq!(cached.response_time_ms, 0);
    }

    #[test]
    fn vision_detection() {
        let plain = vec![ChatMessage::user("hello")];
        assert!(!requires_vision(&plain));

        let with_image = vec![
            ChatMessage::system("extract the receipt"),
            ChatMessage::user_with_image("here", "https://example.com/receipt.jpg"),
        ];
        assert!(requires_vision(&with_image));
    }
}
