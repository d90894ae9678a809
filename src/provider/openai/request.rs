use crate::types::CompletionRequest;

use super::types::{ChatCompletionBody, StreamOptions, WireMessage};

/// Maps a request onto the Chat Completions body.
///
/// Streaming bodies ask for a trailing usage chunk via `stream_options`.
pub(crate) fn build_chat_body<'a>(
    model: &'a str,
    request: &'a CompletionRequest,
    stream: bool,
) -> ChatCompletionBody<'a> {
    ChatCompletionBody {
        model,
        messages: request
            .messages
            .iter()
            .map(|message| WireMessage {
                role: message.role.as_str(),
                content: &message.content,
            })
            .collect(),
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        stream,
        stream_options: stream.then_some(StreamOptions {
            include_usage: true,
        }),
    }
}
