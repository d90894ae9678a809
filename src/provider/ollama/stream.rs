use serde_json::Value;

use crate::error::LLMError;
use crate::stream::{Decoded, FrameHandler};
use crate::types::UsageAccumulator;

use super::PROVIDER_NAME;

/// Decodes `/api/generate` NDJSON lines.
///
/// Each line carries a `response` fragment; the final one has `"done": true` together
/// with `prompt_eval_count` and `eval_count`.
#[derive(Debug)]
pub(crate) struct OllamaFrameHandler {
    status: u16,
    usage: UsageAccumulator,
}

impl OllamaFrameHandler {
    pub(crate) fn new(status: u16) -> Self {
        Self {
            status,
            usage: UsageAccumulator::new(),
        }
    }
}

impl FrameHandler for OllamaFrameHandler {
    type Frame = String;

    fn handle(&mut self, line: String) -> Result<Decoded, LLMError> {
        let value: Value = serde_json::from_str(&line)
            .map_err(|err| LLMError::decode(PROVIDER_NAME, format!("invalid stream line: {err}")))?;

        if value.get("error").is_some() {
            return Err(LLMError::Backend {
                provider: PROVIDER_NAME,
                status: self.status,
                body: line,
            });
        }

        self.usage.record(
            value.get("prompt_eval_count").and_then(Value::as_u64),
            value.get("eval_count").and_then(Value::as_u64),
        );
        let done = value.get("done").and_then(Value::as_bool).unwrap_or(false);
        let text = value
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or_default();

        Ok(Decoded::text(text).finishing(done))
    }

    fn usage(&self) -> &UsageAccumulator {
        &self.usage
    }
}
