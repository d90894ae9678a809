use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Aggregates every failure mode exposed by the unified completion client.
///
/// Configuration and routing failures surface synchronously from the client calls.
/// Once a stream is open, transport, decode and cancellation failures arrive as the
/// final `Err` item of that stream instead.
#[derive(Debug, Error)]
pub enum LLMError {
    /// A provider is unavailable because its environment configuration is missing.
    #[error("provider {provider} is not configured: {missing} not set")]
    Configuration {
        /// Provider name such as `openai`.
        provider: String,
        /// Environment variable that was absent or empty.
        missing: &'static str,
    },
    /// The combined identifier is not of the shape `provider/model`.
    #[error("invalid provider/model identifier: {identifier:?}")]
    MalformedIdentifier { identifier: String },
    /// No adapter exists for the requested provider name.
    #[error("unsupported provider: {provider}")]
    UnsupportedProvider { provider: String },
    /// A default-provider operation was requested before any provider was designated.
    #[error("no default provider set")]
    NoDefaultProvider,
    /// Represents transport-layer or networking failures.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// The backend answered with a non-success HTTP status.
    #[error("{provider} returned status {status}: {}", summarize_error_body(.body))]
    Backend {
        provider: &'static str,
        status: u16,
        /// Raw response body, kept verbatim for debugging.
        body: String,
    },
    /// The backend payload did not match the expected shape.
    #[error("failed to decode {provider} payload: {message}")]
    Decode {
        provider: &'static str,
        message: String,
    },
    /// Declares that a capability is not offered by the selected provider.
    #[error("{capability} is not supported by provider {provider}")]
    NotSupported {
        capability: &'static str,
        provider: &'static str,
    },
    /// Signals validation failures in the request itself.
    #[error("invalid request: {message}")]
    Validation { message: String },
    /// Cancellation or deadline expiry observed while a call was in flight.
    #[error("request aborted: {message}")]
    Aborted { message: String },
    /// Signals that a stream ended before the backend delivered its done signal.
    #[error("stream closed unexpectedly: {message}")]
    StreamClosed { message: String },
    /// A chat session was handed to a provider other than the one that created it.
    #[error("chat session belongs to {found}, not {expected}")]
    SessionMismatch { expected: String, found: String },
    /// Attaches the routed provider name to an error raised while serving a call.
    #[error("provider {provider}: {source}")]
    WithProvider {
        provider: String,
        #[source]
        source: Box<LLMError>,
    },
}

impl LLMError {
    /// Creates an [`LLMError::Transport`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use unillm::error::LLMError;
    ///
    /// let err = LLMError::transport("dns lookup failed");
    /// assert!(matches!(err, LLMError::Transport { .. }));
    /// ```
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Decode`] for the given provider.
    ///
    /// # Examples
    ///
    /// ```
    /// use unillm::error::LLMError;
    ///
    /// let err = LLMError::decode("openai", "missing choices");
    /// assert!(matches!(err, LLMError::Decode { provider: "openai", .. }));
    /// ```
    pub fn decode<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::Decode {
            provider,
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::NotSupported`] naming the capability and provider.
    pub fn not_supported(capability: &'static str, provider: &'static str) -> Self {
        Self::NotSupported {
            capability,
            provider,
        }
    }

    pub fn aborted<T: Into<String>>(message: T) -> Self {
        Self::Aborted {
            message: message.into(),
        }
    }

    /// Wraps `self` so its chain names the provider that served the call.
    ///
    /// Errors that already carry the same provider context are returned untouched.
    pub fn for_provider(self, provider: &str) -> Self {
        match self {
            Self::WithProvider {
                provider: existing,
                source,
            } if existing == provider => Self::WithProvider {
                provider: existing,
                source,
            },
            other => Self::WithProvider {
                provider: provider.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Returns the innermost error, skipping any provider context wrappers.
    ///
    /// # Examples
    ///
    /// ```
    /// use unillm::error::LLMError;
    ///
    /// let err = LLMError::transport("reset").for_provider("ollama");
    /// assert!(matches!(err.root(), LLMError::Transport { .. }));
    /// ```
    pub fn root(&self) -> &LLMError {
        let mut current = self;
        while let Self::WithProvider { source, .. } = current {
            current = source;
        }
        current
    }

    /// Returns the provider attached by [`LLMError::for_provider`], if any.
    pub fn provider_context(&self) -> Option<&str> {
        match self {
            Self::WithProvider { provider, .. } => Some(provider),
            _ => None,
        }
    }
}

/// Pulls the human-readable message out of a backend error body.
///
/// Backends disagree on the shape: OpenAI, Anthropic and Gemini nest it under
/// `error.message`, while Ollama sends `{"error": "..."}`. Anything else is returned
/// trimmed and verbatim.
pub(crate) fn summarize_error_body(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<Value>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        match parsed.error {
            Some(Value::String(message)) => return message,
            Some(Value::Object(inner)) => {
                if let Some(message) = inner.get("message").and_then(Value::as_str) {
                    return match inner
                        .get("type")
                        .or_else(|| inner.get("status"))
                        .and_then(Value::as_str)
                    {
                        Some(kind) => format!("{message} ({kind})"),
                        None => message.to_string(),
                    };
                }
            }
            _ => {}
        }
    }
    body.trim().to_string()
}
