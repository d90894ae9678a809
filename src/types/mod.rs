//! Shared data structures modeling completion requests, results and stream chunks.
//!
//! These types normalize provider-specific payloads so the rest of the crate can stay
//! agnostic of individual API differences.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::ProviderKind;

pub mod usage;

pub use usage::{Usage, UsageAccumulator};

/// Chat role understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One role-tagged text message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Provider-agnostic completion request.
///
/// `model` holds the combined `provider/model` identifier when the request goes
/// through [`crate::client::LLMClient`]; adapters receive the bare model name
/// separately. The request is built once with the consuming `with_*` methods and
/// is not mutated afterwards.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use unillm::types::{CompletionRequest, Message};
///
/// let request = CompletionRequest::new("ollama/llama3.1", vec![Message::user("Hi")])
///     .with_max_tokens(64)
///     .with_temperature(0.2)
///     .with_deadline(Duration::from_secs(30));
/// assert_eq!(request.max_tokens, Some(64));
/// assert!(!request.stream);
/// ```
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Informational only. The wire-level streaming flag follows the method called:
    /// `generate_completion` always buffers and `generate_completion_stream` always
    /// streams.
    pub stream: bool,
    /// Caller-owned cancellation signal observed by the transport and decode loop.
    pub cancellation: Option<CancellationToken>,
    /// Maximum duration of the whole call, measured from when it starts.
    pub deadline: Option<Duration>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
            temperature: None,
            stream: false,
            cancellation: None,
            deadline: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Content of the most recent user message, used by prompt-style backends.
    pub fn last_user_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
    }

    /// System messages joined by blank lines, or `None` when there are none.
    pub fn system_prompt(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|message| message.role == Role::System)
            .map(|message| message.content.as_str())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }
}

/// Fully buffered result of a synchronous completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResult {
    pub text: String,
    pub usage: Option<Usage>,
    /// Name of the provider that produced the text, such as `anthropic`.
    pub provider: String,
}

/// One normalized element of a streamed completion.
///
/// Streams yield `Result<Chunk, LLMError>`; an `Err` item plays the role of the error
/// chunk and, like a chunk with `is_terminal` set, is always the last item.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Text delta, empty for chunks that only carry the terminal signal.
    pub text: String,
    pub is_terminal: bool,
    /// Usage known so far; on the terminal chunk this is the final accounting.
    pub usage: Option<Usage>,
    pub provider: &'static str,
}

impl Chunk {
    pub fn delta(provider: &'static str, text: impl Into<String>, usage: Option<Usage>) -> Self {
        Self {
            text: text.into(),
            is_terminal: false,
            usage,
            provider,
        }
    }

    pub fn terminal(provider: &'static str, text: impl Into<String>, usage: Usage) -> Self {
        Self {
            text: text.into(),
            is_terminal: true,
            usage: Some(usage),
            provider,
        }
    }
}

/// Provider-tagged multi-turn chat handle.
///
/// The session remembers which backend created it so the client can refuse to hand
/// it to a different provider, and it carries the conversation so far.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSession {
    provider: ProviderKind,
    model: String,
    history: Vec<Message>,
}

impl ChatSession {
    pub(crate) fn new(provider: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            history: Vec::new(),
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.history.push(message);
    }
}
