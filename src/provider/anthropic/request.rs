use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::types::{CompletionRequest, Role};

/// Used when the request does not bound the output; the Messages API requires a value.
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Builds the Messages API body.
///
/// System messages are folded into the top-level `system` field, everything else
/// goes to `messages` in order.
pub(crate) fn build_anthropic_body(
    model: &str,
    request: &CompletionRequest,
    stream: bool,
) -> Result<Value, LLMError> {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .filter(|message| message.role != Role::System)
        .map(|message| json!({"role": message.role.as_str(), "content": message.content}))
        .collect();

    if messages.is_empty() {
        return Err(LLMError::Validation {
            message: "Anthropic requests need at least one user or assistant message".to_string(),
        });
    }

    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert("messages".to_string(), Value::Array(messages));
    body.insert(
        "max_tokens".to_string(),
        Value::from(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
    );
    if let Some(system) = request.system_prompt() {
        body.insert("system".to_string(), Value::String(system));
    }
    if let Some(temperature) = request.temperature {
        body.insert("temperature".to_string(), Value::from(temperature));
    }
    if stream {
        body.insert("stream".to_string(), Value::Bool(true));
    }

    Ok(Value::Object(body))
}
