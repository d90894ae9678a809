use crate::error::LLMError;
use crate::types::{CompletionRequest, Message, Role};

use super::types::{GeminiContent, GenerateContentRequest, GenerationConfig};

/// Gemini names the assistant side `model`.
fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::Assistant => "model",
        Role::User | Role::System => "user",
    }
}

/// Converts a conversation into `contents`, lifting system messages into
/// `systemInstruction`.
pub(crate) fn build_contents(messages: &[Message]) -> (Vec<GeminiContent>, Option<GeminiContent>) {
    let mut system = Vec::new();
    let mut contents = Vec::new();
    for message in messages {
        match message.role {
            Role::System => system.push(message.content.as_str()),
            role => contents.push(GeminiContent::text(
                Some(gemini_role(role)),
                message.content.clone(),
            )),
        }
    }
    let instruction = (!system.is_empty()).then(|| GeminiContent::text(None, system.join("\n\n")));
    (contents, instruction)
}

pub(crate) fn build_gemini_body(
    request: &CompletionRequest,
) -> Result<GenerateContentRequest, LLMError> {
    let (contents, system_instruction) = build_contents(&request.messages);
    if contents.is_empty() {
        return Err(LLMError::Validation {
            message: "Gemini requests need at least one user or assistant message".to_string(),
        });
    }

    let generation_config = (request.max_tokens.is_some() || request.temperature.is_some())
        .then(|| GenerationConfig {
            max_output_tokens: request.max_tokens,
            temperature: request.temperature,
        });

    Ok(GenerateContentRequest {
        contents,
        system_instruction,
        generation_config,
    })
}

/// Body for one chat turn: the session history followed by the new message.
pub(crate) fn build_chat_body(history: &[Message], message: &str) -> GenerateContentRequest {
    let (mut contents, system_instruction) = build_contents(history);
    contents.push(GeminiContent::text(Some("user"), message));
    GenerateContentRequest {
        contents,
        system_instruction,
        generation_config: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_roles_and_system_instruction() {
        let request = CompletionRequest::new(
            "googlegemini/gemini-1.5-flash",
            vec![
                Message::system("Reply in French."),
                Message::user("Hello"),
                Message::assistant("Bonjour"),
                Message::user("Thanks"),
            ],
        )
        .with_temperature(0.25);
        let body = serde_json::to_value(build_gemini_body(&request).expect("body"))
            .expect("serialize");

        assert_eq!(
            body,
            json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "Hello"}]},
                    {"role": "model", "parts": [{"text": "Bonjour"}]},
                    {"role": "user", "parts": [{"text": "Thanks"}]}
                ],
                "systemInstruction": {"parts": [{"text": "Reply in French."}]},
                "generationConfig": {"temperature": 0.25}
            })
        );
    }

    #[test]
    fn chat_body_appends_new_turn_to_history() {
        let history = vec![Message::user("Hi"), Message::assistant("Hello!")];
        let body = serde_json::to_value(build_chat_body(&history, "How are you?"))
            .expect("serialize");
        let contents = body["contents"].as_array().expect("contents");
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[2]["role"], "user");
        assert_eq!(contents[2]["parts"][0]["text"], "How are you?");
        assert!(body.get("generationConfig").is_none());
    }
}
