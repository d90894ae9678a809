use crate::error::LLMError;
use crate::stream::{Decoded, FrameHandler};
use crate::types::UsageAccumulator;

use super::types::GenerateContentResponse;

/// Normalizes items pulled from [`super::client::GenerateContentStream`].
///
/// Each item may carry text and an updated `usageMetadata`; the stream is complete
/// when the iterator runs dry.
#[derive(Debug, Default)]
pub(crate) struct GeminiFrameHandler {
    usage: UsageAccumulator,
}

impl FrameHandler for GeminiFrameHandler {
    type Frame = GenerateContentResponse;

    fn handle(&mut self, frame: GenerateContentResponse) -> Result<Decoded, LLMError> {
        if let Some(usage) = frame.usage_metadata {
            self.usage
                .record(usage.prompt_token_count, usage.candidates_token_count);
        }
        Ok(frame.first_text().map(Decoded::text).unwrap_or_default())
    }

    fn finish(&mut self) -> Result<Decoded, LLMError> {
        Ok(Decoded::done())
    }

    fn usage(&self) -> &UsageAccumulator {
        &self.usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Usage;

    fn response(json: &str) -> GenerateContentResponse {
        serde_json::from_str(json).expect("response json")
    }

    #[test]
    fn text_and_usage_metadata_are_extracted() {
        let mut handler = GeminiFrameHandler::default();
        let decoded = handler
            .handle(response(
                r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"},{"text":"lo"}]}}],
                    "usageMetadata":{"promptTokenCount":4,"candidatesTokenCount":2,"totalTokenCount":6}}"#,
            ))
            .expect("decoded");
        assert_eq!(decoded.text.as_deref(), Some("Hello"));
        assert_eq!(handler.usage().snapshot(), Some(Usage::new(4, 2)));
    }

    #[test]
    fn candidate_less_item_only_updates_usage() {
        let mut handler = GeminiFrameHandler::default();
        let decoded = handler
            .handle(response(r#"{"usageMetadata":{"promptTokenCount":4,"candidatesTokenCount":9}}"#))
            .expect("decoded");
        assert_eq!(decoded, Decoded::skip());
        assert_eq!(handler.usage().total(), Usage::new(4, 9));
        assert_eq!(handler.finish().expect("finish"), Decoded::done());
    }
}
