use crate::error::LLMError;
use crate::types::CompletionRequest;

use super::types::{GenerateBody, GenerateOptions};

/// Maps a request onto `/api/generate`.
///
/// The endpoint is prompt-based: only the most recent user message is sent as the
/// prompt, and system messages travel in `system`. Earlier turns are not replayed.
pub(crate) fn build_generate_body<'a>(
    model: &'a str,
    request: &'a CompletionRequest,
    stream: bool,
) -> Result<GenerateBody<'a>, LLMError> {
    let prompt = request
        .last_user_content()
        .ok_or_else(|| LLMError::Validation {
            message: "Ollama requests need a user message to use as the prompt".to_string(),
        })?;

    let options = (request.max_tokens.is_some() || request.temperature.is_some()).then(|| {
        GenerateOptions {
            num_predict: request.max_tokens,
            temperature: request.temperature,
        }
    });

    Ok(GenerateBody {
        model,
        prompt,
        system: request.system_prompt(),
        stream,
        options,
    })
}
