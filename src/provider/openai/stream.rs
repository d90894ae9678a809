use serde_json::Value;

use crate::error::LLMError;
use crate::stream::{Decoded, FrameHandler, StreamEvent};
use crate::types::UsageAccumulator;

use super::PROVIDER_NAME;

/// Decodes Chat Completions SSE events.
///
/// Text arrives in `choices[0].delta.content`. With `include_usage` the backend sends
/// one extra event with an empty `choices` array and a `usage` object just before
/// `[DONE]`, so usage is folded in and reported on the terminal chunk.
#[derive(Debug, Default)]
pub(crate) struct OpenAiFrameHandler {
    usage: UsageAccumulator,
}

impl FrameHandler for OpenAiFrameHandler {
    type Frame = StreamEvent;

    fn handle(&mut self, frame: StreamEvent) -> Result<Decoded, LLMError> {
        let data = match frame {
            StreamEvent::Done => return Ok(Decoded::done()),
            StreamEvent::Data(data) => data,
        };
        let value: Value = serde_json::from_str(&data)
            .map_err(|err| LLMError::decode(PROVIDER_NAME, format!("invalid stream event: {err}")))?;

        if let Some(usage) = value.get("usage").filter(|usage| usage.is_object()) {
            self.usage.record(
                usage.get("prompt_tokens").and_then(Value::as_u64),
                usage.get("completion_tokens").and_then(Value::as_u64),
            );
        }

        let text = value
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(Decoded::text(text))
    }

    fn usage(&self) -> &UsageAccumulator {
        &self.usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Usage;

    fn data(json: &str) -> StreamEvent {
        StreamEvent::Data(json.to_string())
    }

    #[test]
    fn text_delta_and_role_only_events() {
        let mut handler = OpenAiFrameHandler::default();
        let role_only = handler
            .handle(data(r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#))
            .expect("decoded");
        assert_eq!(role_only, Decoded::skip());

        let delta = handler
            .handle(data(r#"{"choices":[{"index":0,"delta":{"content":"Hel"}}]}"#))
            .expect("decoded");
        assert_eq!(delta.text.as_deref(), Some("Hel"));
        assert!(!delta.done);
    }

    #[test]
    fn choice_less_usage_event_is_folded_not_emitted() {
        let mut handler = OpenAiFrameHandler::default();
        let decoded = handler
            .handle(data(
                r#"{"choices":[],"usage":{"prompt_tokens":9,"completion_tokens":4,"total_tokens":13}}"#,
            ))
            .expect("decoded");
        assert_eq!(decoded, Decoded::skip());
        assert_eq!(handler.usage().snapshot(), Some(Usage::new(9, 4)));

        assert_eq!(handler.handle(StreamEvent::Done).expect("done"), Decoded::done());
    }

    #[test]
    fn gemini_shaped_usage_is_ignored() {
        let mut handler = OpenAiFrameHandler::default();
        handler
            .handle(data(
                r#"{"choices":[{"delta":{"content":"x"}}],"usageMetadata":{"promptTokenCount":5}}"#,
            ))
            .expect("decoded");
        assert!(handler.usage().is_empty());
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let mut handler = OpenAiFrameHandler::default();
        let err = handler.handle(data("{not json")).unwrap_err();
        assert!(matches!(err, LLMError::Decode { provider: "openai", .. }));
    }
}
