use serde_json::Value;

use crate::error::LLMError;
use crate::stream::{Decoded, FrameHandler, StreamEvent};
use crate::types::UsageAccumulator;

use super::PROVIDER_NAME;

/// Decodes Messages API SSE events by their `type` field.
///
/// | event | effect |
/// |---|---|
/// | `message_start` | prompt tokens from `message.usage.input_tokens` |
/// | `content_block_delta` | text from `delta.text` |
/// | `message_delta` | completion tokens from `usage.output_tokens` |
/// | `message_stop` | done |
/// | `error` | ends the stream with [`LLMError::Backend`] |
///
/// Other events (`ping`, `content_block_start`, ...) are ignored.
#[derive(Debug)]
pub(crate) struct AnthropicFrameHandler {
    status: u16,
    usage: UsageAccumulator,
}

impl AnthropicFrameHandler {
    /// `status` is the accepted response status, reported with in-stream errors.
    pub(crate) fn new(status: u16) -> Self {
        Self {
            status,
            usage: UsageAccumulator::new(),
        }
    }
}

impl FrameHandler for AnthropicFrameHandler {
    type Frame = StreamEvent;

    fn handle(&mut self, frame: StreamEvent) -> Result<Decoded, LLMError> {
        let data = match frame {
            StreamEvent::Data(data) => data,
            // Not part of this protocol; message_stop is the done signal.
            StreamEvent::Done => return Ok(Decoded::skip()),
        };
        let event: Value = serde_json::from_str(&data)
            .map_err(|err| LLMError::decode(PROVIDER_NAME, format!("invalid stream event: {err}")))?;
        let kind = event
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| LLMError::decode(PROVIDER_NAME, "stream event without a type"))?;

        match kind {
            "message_start" => {
                if let Some(tokens) = event
                    .pointer("/message/usage/input_tokens")
                    .and_then(Value::as_u64)
                {
                    self.usage.record_prompt(tokens);
                }
                Ok(Decoded::skip())
            }
            "content_block_delta" => Ok(Decoded::text(
                event
                    .pointer("/delta/text")
                    .and_then(Value::as_str)
                    .unwrap_or_default(),
            )),
            "message_delta" => {
                if let Some(tokens) = event
                    .pointer("/usage/output_tokens")
                    .and_then(Value::as_u64)
                {
                    self.usage.record_completion(tokens);
                }
                Ok(Decoded::skip())
            }
            "message_stop" => Ok(Decoded::done()),
            "error" => Err(LLMError::Backend {
                provider: PROVIDER_NAME,
                status: self.status,
                body: data,
            }),
            _ => Ok(Decoded::skip()),
        }
    }

    fn usage(&self) -> &UsageAccumulator {
        &self.usage
    }
}
