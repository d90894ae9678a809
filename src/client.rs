use std::sync::Arc;

use futures_util::StreamExt;

use crate::config::{DynProviderFactory, EnvProviderFactory, Environment};
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::http::reqwest::default_dyn_transport;
use crate::logging::{LogLevel, client_log};
use crate::provider::DynProvider;
use crate::registry::ProviderRegistry;
use crate::stream::ChunkStream;
use crate::types::{ChatSession, CompletionRequest, CompletionResult};

/// Splits a `"provider/model"` identifier on its first `/`.
///
/// Everything after the first slash is the model, so model names may contain slashes
/// themselves.
///
/// # Errors
///
/// [`LLMError::MalformedIdentifier`] when there is no slash or either half is empty.
///
/// # Examples
///
/// ```
/// use unillm::client::parse_identifier;
///
/// assert_eq!(
///     parse_identifier("ollama/library/llama3").ok(),
///     Some(("ollama", "library/llama3"))
/// );
/// assert!(parse_identifier("gpt-4o").is_err());
/// ```
pub fn parse_identifier(identifier: &str) -> Result<(&str, &str), LLMError> {
    match identifier.split_once('/') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            Ok((provider, model))
        }
        _ => Err(LLMError::MalformedIdentifier {
            identifier: identifier.to_string(),
        }),
    }
}

/// Entry point that routes requests to the provider named in the model identifier.
///
/// Providers are constructed on first use and shared by every later call. Calls that
/// carry no identifier (embeddings and chat) go to the default provider.
pub struct LLMClient {
    registry: Arc<ProviderRegistry>,
    log_level: LogLevel,
}

impl LLMClient {
    pub fn builder() -> LLMClientBuilder {
        LLMClientBuilder::default()
    }

    /// Wraps an existing registry, e.g. one shared with another client.
    pub fn from_registry(registry: Arc<ProviderRegistry>, log_level: LogLevel) -> Self {
        Self {
            registry,
            log_level,
        }
    }

    /// Generates a complete response for `request.model` (`"provider/model"`).
    pub async fn generate_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, LLMError> {
        let (name, model) = self.parse(&request.model)?;
        let provider = self.resolve(name).await?;

        client_log!(self.log_level, Debug, provider = name, model, "generating completion");
        provider.generate(model, request).await.map_err(|err| {
            client_log!(self.log_level, Error, provider = name, error = %err, "completion failed");
            err.for_provider(name)
        })
    }

    /// Opens a streamed completion for `request.model`.
    ///
    /// Failures before the backend accepted the request are returned here; once the
    /// stream is open every failure arrives as its final item.
    pub async fn generate_completion_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<ChunkStream, LLMError> {
        let (name, model) = self.parse(&request.model)?;
        let provider = self.resolve(name).await?;

        client_log!(self.log_level, Debug, provider = name, model, "opening completion stream");
        let stream = provider.stream(model, request).await.map_err(|err| {
            client_log!(self.log_level, Error, provider = name, error = %err, "stream rejected");
            err.for_provider(name)
        })?;

        if !self.log_level.enables(LogLevel::Debug) {
            return Ok(stream);
        }
        let name = name.to_string();
        Ok(Box::pin(stream.inspect(move |item| match item {
            Ok(chunk) => tracing::debug!(
                provider = %name,
                text = %chunk.text,
                terminal = chunk.is_terminal,
                usage = ?chunk.usage,
                "stream chunk"
            ),
            Err(err) => tracing::debug!(provider = %name, error = %err, "stream error"),
        })))
    }

    /// Embeds `text` with the default provider.
    pub async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, LLMError> {
        let (name, provider) = self.default_route().await?;
        client_log!(self.log_level, Debug, provider = %name, "generating embedding");
        provider.embed(text).await.map_err(|err| {
            client_log!(self.log_level, Error, provider = %name, error = %err, "embedding failed");
            err.for_provider(&name)
        })
    }

    /// Starts a chat session on the default provider.
    pub async fn start_chat(&self, model: &str) -> Result<ChatSession, LLMError> {
        let (name, provider) = self.default_route().await?;
        client_log!(self.log_level, Debug, provider = %name, model, "starting chat session");
        provider.start_chat(model).map_err(|err| err.for_provider(&name))
    }

    /// Sends one turn of `session` through the default provider.
    ///
    /// # Errors
    ///
    /// [`LLMError::SessionMismatch`] when the session was started by another provider.
    pub async fn send_chat_message(
        &self,
        session: &mut ChatSession,
        message: &str,
    ) -> Result<CompletionResult, LLMError> {
        let (name, provider) = self.default_route().await?;
        if session.provider().name() != name {
            return Err(LLMError::SessionMismatch {
                expected: name,
                found: session.provider().name().to_string(),
            });
        }

        client_log!(self.log_level, Debug, provider = %name, "sending chat message");
        provider
            .send_chat_message(session, message)
            .await
            .map_err(|err| {
                client_log!(self.log_level, Error, provider = %name, error = %err, "chat message failed");
                err.for_provider(&name)
            })
    }

    /// Adds a caller-built adapter under `name`; other names keep resolving through
    /// the factory.
    ///
    /// # Errors
    ///
    /// [`LLMError::Validation`] when `name` already holds an adapter.
    pub fn register_provider(&self, name: &str, provider: DynProvider) -> Result<(), LLMError> {
        self.registry.register(name, provider)?;
        client_log!(self.log_level, Info, provider = name, "registered provider");
        Ok(())
    }

    /// Closes every constructed provider and returns the last failure, if any.
    pub async fn close(&self) -> Result<(), LLMError> {
        client_log!(self.log_level, Debug, "closing all providers");
        let result = self.registry.close_all().await;
        client_log!(self.log_level, Debug, "all providers closed");
        result
    }

    pub fn default_provider(&self) -> Option<&str> {
        self.registry.default_provider()
    }

    /// Names of the providers constructed so far.
    pub fn registered(&self) -> Vec<String> {
        self.registry.registered()
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    fn parse<'a>(&self, identifier: &'a str) -> Result<(&'a str, &'a str), LLMError> {
        parse_identifier(identifier).inspect_err(|err| {
            client_log!(self.log_level, Error, error = %err, "failed to parse provider/model");
        })
    }

    async fn resolve(&self, name: &str) -> Result<DynProvider, LLMError> {
        let provider = self.registry.resolve(name).await.inspect_err(|err| {
            client_log!(self.log_level, Error, provider = name, error = %err, "failed to initialize provider");
        })?;
        client_log!(self.log_level, Debug, provider = name, "provider ready");
        Ok(provider)
    }

    async fn default_route(&self) -> Result<(String, DynProvider), LLMError> {
        let Some(name) = self.registry.default_provider().map(str::to_string) else {
            client_log!(self.log_level, Error, "no default provider set");
            return Err(LLMError::NoDefaultProvider);
        };
        match self.registry.resolve(&name).await {
            Ok(provider) => Ok((name, provider)),
            Err(err) => {
                client_log!(self.log_level, Error, provider = %name, error = %err, "default provider unavailable");
                Err(LLMError::UnsupportedProvider { provider: name })
            }
        }
    }
}

/// Configures how an [`LLMClient`] finds its providers.
#[derive(Default)]
pub struct LLMClientBuilder {
    default_provider: Option<String>,
    log_level: LogLevel,
    environment: Option<Environment>,
    transport: Option<DynHttpTransport>,
    factory: Option<DynProviderFactory>,
    providers: Vec<(String, DynProvider)>,
    eager: bool,
}

impl LLMClientBuilder {
    /// Designates the provider used by embeddings and chat.
    ///
    /// Without it the first provider that resolves successfully becomes the default.
    pub fn default_provider(mut self, name: impl Into<String>) -> Self {
        self.default_provider = Some(name.into());
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Reads provider settings from `environment` instead of the process.
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Shares `transport` between every provider built from the environment.
    pub fn transport(mut self, transport: DynHttpTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the environment-driven factory entirely.
    ///
    /// `environment` and `transport` are ignored when a factory is set.
    pub fn factory(mut self, factory: DynProviderFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Installs a caller-built adapter under `name` when the client is built.
    pub fn provider(mut self, name: impl Into<String>, provider: DynProvider) -> Self {
        self.providers.push((name.into(), provider));
        self
    }

    /// Registers every configured provider during [`build`](Self::build) instead of
    /// on first use.
    pub fn eager(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Fails when the default HTTP client cannot be created, when two adapters are
    /// installed under one name or, with [`eager`](Self::eager), when a configured
    /// provider fails to construct.
    pub async fn build(self) -> Result<LLMClient, LLMError> {
        let factory = match self.factory {
            Some(factory) => factory,
            None => {
                let transport = match self.transport {
                    Some(transport) => transport,
                    None => default_dyn_transport()?,
                };
                Arc::new(EnvProviderFactory::new(
                    self.environment.unwrap_or_default(),
                    transport,
                ))
            }
        };

        let registry = match self.default_provider {
            Some(name) => ProviderRegistry::with_default(factory, name),
            None => ProviderRegistry::new(factory),
        };

        for (name, provider) in self.providers {
            registry.register(&name, provider)?;
        }

        if self.eager {
            let registered = registry.register_all().await?;
            client_log!(self.log_level, Info, providers = ?registered, "providers registered");
        }

        Ok(LLMClient::from_registry(Arc::new(registry), self.log_level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use crate::provider::testing::{StubFactory, StubProvider};
    use crate::types::Message;

    async fn client(factory: &Arc<StubFactory>, default: Option<&str>) -> LLMClient {
        let mut builder = LLMClient::builder()
            .factory(factory.clone())
            .log_level(LogLevel::Debug);
        if let Some(name) = default {
            builder = builder.default_provider(name);
        }
        builder.build().await.expect("client")
    }

    fn request(model: &str) -> CompletionRequest {
        CompletionRequest::new(model, vec![Message::user("Hi")])
    }

    #[test]
    fn identifiers_split_on_first_slash() {
        assert_eq!(
            parse_identifier("openai/gpt-4o").ok(),
            Some(("openai", "gpt-4o"))
        );
        assert_eq!(
            parse_identifier("ollama/hf.co/org/model:Q4").ok(),
            Some(("ollama", "hf.co/org/model:Q4"))
        );
        for malformed in ["gpt-4o", "/gpt-4o", "openai/", ""] {
            assert!(
                matches!(
                    parse_identifier(malformed),
                    Err(LLMError::MalformedIdentifier { ref identifier }) if identifier == malformed
                ),
                "{malformed:?} should be malformed"
            );
        }
    }

    #[tokio::test]
    async fn malformed_identifier_touches_no_provider() {
        let factory = Arc::new(StubFactory::new(&["openai"]));
        let client = client(&factory, None).await;

        let err = client
            .generate_completion(&request("gpt-4o"))
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::MalformedIdentifier { .. }));
        assert!(client.generate_completion_stream(&request("openai")).await.is_err());
        assert_eq!(factory.builds("openai"), 0);
        assert!(client.registered().is_empty());
    }

    #[tokio::test]
    async fn completion_routes_to_named_provider() {
        let factory = Arc::new(StubFactory::new(&["anthropic", "ollama"]));
        let client = client(&factory, None).await;

        let result = client
            .generate_completion(&request("anthropic/claude-3-5-haiku"))
            .await
            .expect("completion");
        assert_eq!(result.text, "claude-3-5-haiku via anthropic");
        assert_eq!(client.default_provider(), Some("anthropic"));

        let result = client
            .generate_completion(&request("ollama/llama3"))
            .await
            .expect("completion");
        assert_eq!(result.provider, "ollama");
        assert_eq!(client.registered(), vec!["anthropic", "ollama"]);
    }

    #[tokio::test]
    async fn provider_errors_name_the_provider() {
        let factory = Arc::new(StubFactory::new(&["openai"]));
        let client = client(&factory, None).await;

        let err = client
            .generate_completion(&request("openai/fail"))
            .await
            .unwrap_err();
        assert_eq!(err.provider_context(), Some("openai"));
        assert!(matches!(err.root(), LLMError::Backend { status: 500, .. }));

        let err = client
            .generate_completion(&request("anthropic/claude"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LLMError::Configuration {
                missing: "ANTHROPIC_API_KEY",
                ..
            }
        ));

        let err = client
            .generate_completion(&request("mistral/large"))
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::UnsupportedProvider { .. }));
    }

    #[tokio::test]
    async fn stream_is_passed_through_with_debug_logging() {
        let factory = Arc::new(StubFactory::new(&["ollama"]));
        let client = client(&factory, None).await;

        let chunks: Vec<_> = client
            .generate_completion_stream(&request("ollama/llama3"))
            .await
            .expect("stream")
            .map(|item| item.expect("chunk"))
            .collect()
            .await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "llama3");
        assert!(chunks[1].is_terminal);
    }

    #[tokio::test]
    async fn default_routes_need_a_default_provider() {
        let client = client(&Arc::new(StubFactory::new(&["ollama"])), None).await;
        assert!(matches!(
            client.generate_embedding("text").await,
            Err(LLMError::NoDefaultProvider)
        ));
        assert!(matches!(
            client.start_chat("gemini-1.5-flash").await,
            Err(LLMError::NoDefaultProvider)
        ));
    }

    #[tokio::test]
    async fn unknown_default_provider_is_unsupported() {
        let client = client(&Arc::new(StubFactory::new(&["ollama"])), Some("mistral")).await;
        assert!(matches!(
            client.generate_embedding("text").await,
            Err(LLMError::UnsupportedProvider { .. })
        ));
    }

    #[tokio::test]
    async fn unconfigured_default_provider_is_unsupported() {
        let factory = Arc::new(StubFactory::new(&["ollama"]));
        let client = client(&factory, Some("openai")).await;

        match client.generate_embedding("text").await {
            Err(LLMError::UnsupportedProvider { provider }) => assert_eq!(provider, "openai"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(matches!(
            client.start_chat("gpt-4o").await,
            Err(LLMError::UnsupportedProvider { .. })
        ));
        let mut session = ChatSession::new(ProviderKind::OpenAi, "gpt-4o");
        assert!(matches!(
            client.send_chat_message(&mut session, "Hello").await,
            Err(LLMError::UnsupportedProvider { .. })
        ));
        assert_eq!(factory.builds("openai"), 3);
    }

    #[tokio::test]
    async fn caller_built_adapter_sits_next_to_factory_providers() {
        let factory = Arc::new(StubFactory::new(&["anthropic"]));
        let custom = Arc::new(StubProvider::new(ProviderKind::Ollama, false));
        let client = LLMClient::builder()
            .factory(factory.clone())
            .provider("ollama", custom.clone())
            .build()
            .await
            .expect("client");

        let result = client
            .generate_completion(&request("ollama/llama3"))
            .await
            .expect("registered adapter");
        assert_eq!(result.text, "llama3 via ollama");
        assert_eq!(factory.builds("ollama"), 0);
        assert_eq!(client.default_provider(), Some("ollama"));

        client
            .generate_completion(&request("anthropic/claude"))
            .await
            .expect("factory adapter");
        assert!(
            client
                .register_provider("ollama", Arc::new(StubProvider::new(ProviderKind::Ollama, false)))
                .is_err()
        );

        client.close().await.expect("close");
        assert_eq!(custom.closes.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn default_provider_reports_missing_capabilities() {
        let client = client(&Arc::new(StubFactory::new(&["ollama"])), Some("ollama")).await;
        let err = client.generate_embedding("text").await.unwrap_err();
        assert_eq!(err.provider_context(), Some("ollama"));
        assert!(matches!(
            err.root(),
            LLMError::NotSupported {
                capability: "embed",
                provider: "ollama"
            }
        ));
    }

    #[tokio::test]
    async fn chat_session_from_another_provider_is_rejected() {
        let client = client(&Arc::new(StubFactory::new(&["ollama"])), Some("ollama")).await;
        let mut session = ChatSession::new(ProviderKind::GoogleGemini, "gemini-1.5-flash");

        match client.send_chat_message(&mut session, "Hello").await {
            Err(LLMError::SessionMismatch { expected, found }) => {
                assert_eq!(expected, "ollama");
                assert_eq!(found, "googlegemini");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn eager_build_registers_configured_providers() {
        let factory = Arc::new(StubFactory::new(&["openai", "ollama"]));
        let client = LLMClient::builder()
            .factory(factory.clone())
            .eager(true)
            .build()
            .await
            .expect("client");

        assert_eq!(client.registered(), vec!["ollama", "openai"]);
        assert_eq!(client.default_provider(), Some("openai"));
        client.close().await.expect("close");
        for provider in factory.built.lock().iter() {
            assert_eq!(provider.closes.load(std::sync::atomic::Ordering::SeqCst), 1);
        }
    }
}
