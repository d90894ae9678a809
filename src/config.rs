use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::provider::DynProvider;
use crate::provider::anthropic::AnthropicProvider;
use crate::provider::google_gemini::GoogleGeminiProvider;
use crate::provider::ollama::OllamaProvider;
use crate::provider::openai::OpenAiProvider;

/// Backends this crate ships an adapter for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    GoogleGemini,
    Ollama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::GoogleGemini,
        ProviderKind::Ollama,
    ];

    /// Name used in `provider/model` identifiers.
    pub fn name(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::GoogleGemini => "googlegemini",
            ProviderKind::Ollama => "ollama",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Environment variable that must be set before the adapter can be built.
    pub fn required_var(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::GoogleGemini => "GEMINI_API_KEY",
            ProviderKind::Ollama => "OLLAMA_BASE_URL",
        }
    }

    fn base_url_var(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_BASE_URL",
            ProviderKind::Anthropic => "ANTHROPIC_BASE_URL",
            ProviderKind::GoogleGemini => "GEMINI_BASE_URL",
            ProviderKind::Ollama => "OLLAMA_BASE_URL",
        }
    }

    fn embedding_model_var(self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("OPENAI_EMBEDDING_MODEL"),
            ProviderKind::Ollama => Some("OLLAMA_EMBEDDING_MODEL"),
            ProviderKind::Anthropic | ProviderKind::GoogleGemini => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Source of configuration values.
///
/// `Process` reads the live process environment; `Fixed` is a snapshot, which keeps
/// tests away from the process-global environment. Empty values count as absent.
///
/// # Examples
///
/// ```
/// use unillm::config::Environment;
///
/// let env = Environment::from_pairs([("OPENAI_API_KEY", "sk-test"), ("GEMINI_API_KEY", " ")]);
/// assert_eq!(env.get("OPENAI_API_KEY").as_deref(), Some("sk-test"));
/// assert_eq!(env.get("GEMINI_API_KEY"), None);
/// ```
#[derive(Debug, Clone, Default)]
pub enum Environment {
    #[default]
    Process,
    Fixed(HashMap<String, String>),
}

impl Environment {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Fixed(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let value = match self {
            Environment::Process => std::env::var(key).ok(),
            Environment::Fixed(values) => values.get(key).cloned(),
        };
        value.filter(|value| !value.trim().is_empty())
    }
}

/// Values needed to construct one adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    /// Content of [`ProviderKind::required_var`].
    pub credential: String,
    pub base_url: Option<String>,
    pub embedding_model: Option<String>,
}

impl ProviderSettings {
    /// Reads the settings for `kind` from `env`.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Configuration`] naming the missing variable.
    pub fn from_env(kind: ProviderKind, env: &Environment) -> Result<Self, LLMError> {
        let required = kind.required_var();
        let credential = env.get(required).ok_or_else(|| LLMError::Configuration {
            provider: kind.name().to_string(),
            missing: required,
        })?;

        Ok(Self {
            kind,
            credential,
            base_url: env.get(kind.base_url_var()),
            embedding_model: kind.embedding_model_var().and_then(|var| env.get(var)),
        })
    }
}

/// Builds adapters on demand for the registry.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    /// Names attempted by eager registration.
    fn known(&self) -> Vec<String>;

    /// Constructs the adapter registered under `name`.
    ///
    /// # Errors
    ///
    /// [`LLMError::UnsupportedProvider`] for unknown names and
    /// [`LLMError::Configuration`] when the adapter cannot be configured.
    async fn build(&self, name: &str) -> Result<DynProvider, LLMError>;
}

/// Thread-safe factory handle.
pub type DynProviderFactory = Arc<dyn ProviderFactory>;

/// Default factory: reads settings from an [`Environment`] and shares one transport
/// between every adapter it builds.
pub struct EnvProviderFactory {
    env: Environment,
    transport: DynHttpTransport,
}

impl EnvProviderFactory {
    pub fn new(env: Environment, transport: DynHttpTransport) -> Self {
        Self { env, transport }
    }

    /// Builds the adapter for `kind` without going through a name lookup.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Configuration`] when the required variable is not set.
    pub fn build_kind(&self, kind: ProviderKind) -> Result<DynProvider, LLMError> {
        let settings = ProviderSettings::from_env(kind, &self.env)?;
        let transport = self.transport.clone();

        let provider: DynProvider = match kind {
            ProviderKind::OpenAi => {
                let mut provider = OpenAiProvider::new(transport, settings.credential);
                if let Some(base_url) = settings.base_url {
                    provider = provider.with_base_url(base_url);
                }
                if let Some(model) = settings.embedding_model {
                    provider = provider.with_embedding_model(model);
                }
                Arc::new(provider)
            }
            ProviderKind::Anthropic => {
                let mut provider = AnthropicProvider::new(transport, settings.credential);
                if let Some(base_url) = settings.base_url {
                    provider = provider.with_base_url(base_url);
                }
                Arc::new(provider)
            }
            ProviderKind::GoogleGemini => {
                let mut provider = GoogleGeminiProvider::new(transport, settings.credential);
                if let Some(base_url) = settings.base_url {
                    provider = provider.with_base_url(base_url);
                }
                Arc::new(provider)
            }
            ProviderKind::Ollama => {
                let mut provider = OllamaProvider::new(transport, settings.credential);
                if let Some(model) = settings.embedding_model {
                    provider = provider.with_embedding_model(model);
                }
                Arc::new(provider)
            }
        };

        tracing::debug!(provider = kind.name(), "provider constructed");
        Ok(provider)
    }
}

#[async_trait]
impl ProviderFactory for EnvProviderFactory {
    fn known(&self) -> Vec<String> {
        ProviderKind::ALL
            .iter()
            .map(|kind| kind.name().to_string())
            .collect()
    }

    async fn build(&self, name: &str) -> Result<DynProvider, LLMError> {
        let kind = ProviderKind::from_name(name).ok_or_else(|| LLMError::UnsupportedProvider {
            provider: name.to_string(),
        })?;
        self.build_kind(kind)
    }
}
