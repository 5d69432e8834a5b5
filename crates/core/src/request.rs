use std::fmt;
use std::str::FromStr;

use devmate_provider::{Message, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MAX_PROMPT_CHARS: usize = 4000;
pub const MAX_SYSTEM_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelId {
    #[default]
    #[serde(rename = "gpt-4o")]
    Gpt4o,
    #[serde(rename = "gpt-4o-mini")]
    Gpt4oMini,
}

impl ModelId {
    pub const ALL: [ModelId; 2] = [ModelId::Gpt4o, ModelId::Gpt4oMini];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::Gpt4o => "gpt-4o",
            ModelId::Gpt4oMini => "gpt-4o-mini",
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelId::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or(ValidationError::UnknownModel)
    }
}

/// First violated constraint of an incoming chat request, in check order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid input")]
    NotAnObject,
    #[error("Prompt is required")]
    PromptRequired,
    #[error("Prompt must be 4000 characters or less")]
    PromptTooLong,
    #[error("System message must be 2000 characters or less")]
    SystemTooLong,
    #[error("Model must be one of: gpt-4o, gpt-4o-mini")]
    UnknownModel,
    #[error("Expected {expected} for {field}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

/// A validated chat request. Defaults are already applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    prompt: String,
    system: Option<String>,
    model: ModelId,
    stream: bool,
}

impl ChatRequest {
    /// Parses and validates a raw request body.
    pub fn from_json(body: &[u8]) -> Result<Self, ValidationError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|_| ValidationError::NotAnObject)?;
        Self::from_value(&value)
    }

    /// Fields are checked in declaration order, so the error is always the
    /// first violated constraint.
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        let obj = value.as_object().ok_or(ValidationError::NotAnObject)?;

        let prompt = match obj.get("prompt") {
            None | Some(Value::Null) => return Err(ValidationError::PromptRequired),
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(wrong_type("prompt", "string")),
        };
        check_prompt(&prompt)?;

        let system = match obj.get("system") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(wrong_type("system", "string")),
        };
        check_system(system.as_deref())?;

        let model = match obj.get("model") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.parse::<ModelId>()?),
            Some(_) => return Err(ValidationError::UnknownModel),
        };

        let stream = match obj.get("stream") {
            None | Some(Value::Null) => None,
            Some(Value::Bool(b)) => Some(*b),
            Some(_) => return Err(wrong_type("stream", "boolean")),
        };

        Ok(Self::with_defaults(prompt, system, model, stream))
    }

    fn with_defaults(
        prompt: String,
        system: Option<String>,
        model: Option<ModelId>,
        stream: Option<bool>,
    ) -> Self {
        Self {
            prompt,
            system: system.filter(|s| !s.is_empty()),
            model: model.unwrap_or_default(),
            stream: stream.unwrap_or(true),
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    pub fn model(&self) -> ModelId {
        self.model
    }

    pub fn stream(&self) -> bool {
        self.stream
    }

    /// System message first when present, then the user prompt.
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(self.prompt.clone()));
        messages
    }
}

fn check_prompt(prompt: &str) -> Result<(), ValidationError> {
    match prompt.chars().count() {
        0 => Err(ValidationError::PromptRequired),
        n if n > MAX_PROMPT_CHARS => Err(ValidationError::PromptTooLong),
        _ => Ok(()),
    }
}

fn check_system(system: Option<&str>) -> Result<(), ValidationError> {
    match system {
        Some(s) if s.chars().count() > MAX_SYSTEM_CHARS => Err(ValidationError::SystemTooLong),
        _ => Ok(()),
    }
}

fn wrong_type(field: &'static str, expected: &'static str) -> ValidationError {
    ValidationError::WrongType { field, expected }
}

/// Body of a `POST /chat` call as the caller sends it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequestBody {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(rename = "latencyMs")]
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatStats {
    pub latency_ms: u64,
    pub approximate_tokens: u64,
}

impl ChatResponse {
    /// Prefers the provider's token count over the length estimate.
    pub fn stats(&self) -> ChatStats {
        ChatStats {
            latency_ms: self.latency_ms,
            approximate_tokens: self
                .usage
                .as_ref()
                .map(|u| u.total_tokens as u64)
                .filter(|n| *n > 0)
                .unwrap_or_else(|| estimate_tokens(&self.content)),
        }
    }
}

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}
