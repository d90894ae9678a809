//! Name → adapter map with lazy, concurrent, at-most-once construction.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::config::DynProviderFactory;
use crate::error::LLMError;
use crate::provider::DynProvider;

type Entry = Arc<OnceCell<DynProvider>>;

/// Concurrency-safe store of resolved providers.
///
/// The map lock only guards fetching or inserting an entry cell. Construction runs
/// inside the cell, so concurrent resolutions of one name build it exactly once while
/// different names build in parallel. A failed construction leaves the cell empty and
/// the next resolution tries again.
pub struct ProviderRegistry {
    factory: DynProviderFactory,
    entries: Mutex<HashMap<String, Entry>>,
    default_provider: OnceLock<String>,
}

impl ProviderRegistry {
    pub fn new(factory: DynProviderFactory) -> Self {
        Self {
            factory,
            entries: Mutex::new(HashMap::new()),
            default_provider: OnceLock::new(),
        }
    }

    /// Creates a registry whose default provider is fixed up front.
    pub fn with_default(factory: DynProviderFactory, default_provider: impl Into<String>) -> Self {
        Self {
            default_provider: OnceLock::from(default_provider.into()),
            ..Self::new(factory)
        }
    }

    fn entry(&self, name: &str) -> Entry {
        self.entries
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    async fn initialize(&self, name: &str) -> Result<DynProvider, LLMError> {
        let entry = self.entry(name);
        let result = entry
            .get_or_try_init(|| async {
                tracing::debug!(provider = name, "initializing provider");
                self.factory.build(name).await
            })
            .await
            .cloned();
        if result.is_err() {
            self.discard_empty(name, &entry);
        }
        result
    }

    /// Drops a cell left empty by a failed construction so unknown or unconfigured
    /// names do not accumulate. A cell another caller still holds is kept, since that
    /// caller may be constructing into it.
    fn discard_empty(&self, name: &str, entry: &Entry) {
        let mut entries = self.entries.lock();
        let unused = entries.get(name).is_some_and(|current| {
            Arc::ptr_eq(current, entry) && !current.initialized() && Arc::strong_count(entry) == 2
        });
        if unused {
            entries.remove(name);
        }
    }

    /// Installs a caller-built adapter under `name`, next to the ones the factory builds.
    ///
    /// The adapter becomes the default provider when none is designated yet. Names the
    /// factory does not know are accepted and resolve to this adapter.
    ///
    /// # Errors
    ///
    /// [`LLMError::Validation`] when `name` already holds an adapter or is being
    /// constructed.
    pub fn register(&self, name: &str, provider: DynProvider) -> Result<(), LLMError> {
        self.entry(name)
            .set(provider)
            .map_err(|_| LLMError::Validation {
                message: format!("provider {name} is already registered"),
            })?;
        tracing::debug!(provider = name, "provider registered");
        self.claim_default(name);
        Ok(())
    }

    /// Returns the adapter for `name`, constructing it on first use.
    ///
    /// The first successful resolution becomes the default provider unless one is
    /// already designated.
    ///
    /// # Errors
    ///
    /// Whatever the factory reports: [`LLMError::UnsupportedProvider`] for unknown names,
    /// [`LLMError::Configuration`] when the environment lacks the required variable.
    pub async fn resolve(&self, name: &str) -> Result<DynProvider, LLMError> {
        let provider = self.initialize(name).await?;
        self.claim_default(name);
        Ok(provider)
    }

    /// Returns an already constructed adapter without building one.
    pub fn get(&self, name: &str) -> Option<DynProvider> {
        self.entries
            .lock()
            .get(name)
            .and_then(|entry| entry.get().cloned())
    }

    fn claim_default(&self, name: &str) {
        if self.default_provider.set(name.to_string()).is_ok() {
            tracing::debug!(provider = name, "default provider designated");
        }
    }

    /// Resolves every provider the factory knows about, concurrently.
    ///
    /// Providers that are simply not configured are skipped. Every attempt runs to
    /// completion; afterwards the first non-configuration failure, if any, is returned.
    /// When no default was designated, the first registered name in factory order
    /// becomes the default.
    pub async fn register_all(&self) -> Result<Vec<String>, LLMError> {
        let names = self.factory.known();
        let results = join_all(names.iter().map(|name| self.initialize(name))).await;

        let mut registered = Vec::new();
        let mut first_error = None;
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(_) => registered.push(name),
                Err(err @ LLMError::Configuration { .. }) => {
                    tracing::debug!(provider = %name, reason = %err, "skipping unconfigured provider");
                }
                Err(err) => {
                    tracing::warn!(provider = %name, error = %err, "provider registration failed");
                    first_error.get_or_insert(err.for_provider(&name));
                }
            }
        }

        if let Some(name) = registered.first() {
            self.claim_default(name);
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(registered),
        }
    }

    /// Name of the default provider, if one has been designated.
    pub fn default_provider(&self) -> Option<&str> {
        self.default_provider.get().map(String::as_str)
    }

    /// Names of the constructed adapters, sorted.
    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, entry)| entry.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Closes every constructed adapter concurrently.
    ///
    /// Each adapter is attempted exactly once and every failure is logged; the last
    /// failure in name order is returned.
    pub async fn close_all(&self) -> Result<(), LLMError> {
        let mut providers: Vec<(String, DynProvider)> = self
            .entries
            .lock()
            .iter()
            .filter_map(|(name, entry)| entry.get().map(|provider| (name.clone(), provider.clone())))
            .collect();
        providers.sort_by(|(left, _), (right, _)| left.cmp(right));

        let results = join_all(providers.iter().map(|(_, provider)| provider.close())).await;

        let mut last_error = None;
        for ((name, _), result) in providers.iter().zip(results) {
            if let Err(err) = result {
                tracing::warn!(provider = %name, error = %err, "failed to close provider");
                last_error = Some(err.for_provider(name));
            }
        }
        last_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::config::ProviderKind;
    use crate::provider::testing::{StubFactory, StubProvider};

    fn registry(factory: &Arc<StubFactory>) -> ProviderRegistry {
        ProviderRegistry::new(factory.clone())
    }

    #[tokio::test]
    async fn concurrent_resolutions_construct_once() {
        let factory = Arc::new(StubFactory::new(&["ollama"]));
        let registry = registry(&factory);

        let results = join_all((0..16).map(|_| registry.resolve("ollama"))).await;
        let providers: Vec<DynProvider> = results
            .into_iter()
            .map(|result| result.expect("provider"))
            .collect();

        assert_eq!(factory.builds("ollama"), 1);
        assert!(
            providers
                .windows(2)
                .all(|pair| Arc::ptr_eq(&pair[0], &pair[1]))
        );
        assert_eq!(registry.registered(), vec!["ollama".to_string()]);
    }

    #[tokio::test]
    async fn failed_construction_is_retried_later() {
        let factory = Arc::new(StubFactory::new(&[]));
        let registry = registry(&factory);

        for _ in 0..2 {
            let err = registry.resolve("openai").await.err().expect("not configured");
            assert!(matches!(err, LLMError::Configuration { missing: "OPENAI_API_KEY", .. }));
        }
        assert_eq!(factory.builds("openai"), 2);
        assert!(registry.registered().is_empty());
        assert!(registry.default_provider().is_none());
    }

    #[tokio::test]
    async fn unknown_names_are_unsupported() {
        let registry = registry(&Arc::new(StubFactory::new(&["openai"])));
        match registry.resolve("mistral").await {
            Err(LLMError::UnsupportedProvider { provider }) => assert_eq!(provider, "mistral"),
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("unknown provider resolved"),
        }
    }

    #[tokio::test]
    async fn first_successful_resolution_becomes_default() {
        let registry = registry(&Arc::new(StubFactory::new(&["anthropic", "ollama"])));
        registry.resolve("ollama").await.expect("ollama");
        registry.resolve("anthropic").await.expect("anthropic");
        assert_eq!(registry.default_provider(), Some("ollama"));
    }

    #[tokio::test]
    async fn preconfigured_default_is_kept() {
        let factory = Arc::new(StubFactory::new(&["anthropic", "ollama"]));
        let registry = ProviderRegistry::with_default(factory, "anthropic");
        registry.resolve("ollama").await.expect("ollama");
        assert_eq!(registry.default_provider(), Some("anthropic"));
    }

    #[tokio::test]
    async fn register_all_skips_unconfigured_providers() {
        let factory = Arc::new(StubFactory::new(&["anthropic", "ollama"]));
        let registry = registry(&factory);

        let registered = registry.register_all().await.expect("registered");
        assert_eq!(registered, vec!["anthropic".to_string(), "ollama".to_string()]);
        assert_eq!(registry.default_provider(), Some("anthropic"));
        for name in ["openai", "anthropic", "googlegemini", "ollama"] {
            assert_eq!(factory.builds(name), 1, "{name} attempted once");
        }
    }

    #[tokio::test]
    async fn register_all_reports_other_failures_after_every_attempt() {
        let factory = Arc::new(StubFactory::new(&["openai", "ollama"]).broken("openai"));
        let registry = registry(&factory);

        let err = registry.register_all().await.unwrap_err();
        assert_eq!(err.provider_context(), Some("openai"));
        assert!(matches!(err.root(), LLMError::Transport { .. }));
        assert_eq!(registry.registered(), vec!["ollama".to_string()]);
    }

    #[tokio::test]
    async fn close_all_attempts_everyone_and_returns_the_failure() {
        let factory = Arc::new(
            StubFactory::new(&["anthropic", "googlegemini", "ollama"]).failing_close("googlegemini"),
        );
        let registry = registry(&factory);
        registry.register_all().await.expect("registered");

        let err = registry.close_all().await.unwrap_err();
        assert_eq!(err.provider_context(), Some("googlegemini"));
        assert!(matches!(err.root(), LLMError::Transport { .. }));

        let built = factory.built.lock();
        assert_eq!(built.len(), 3);
        for provider in built.iter() {
            assert_eq!(provider.closes.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn close_all_without_providers_is_ok() {
        let registry = registry(&Arc::new(StubFactory::new(&[])));
        registry.close_all().await.expect("nothing to close");
    }

    #[tokio::test]
    async fn failed_resolutions_leave_no_entries_behind() {
        let registry = registry(&Arc::new(StubFactory::new(&[])));
        for i in 0..100 {
            assert!(registry.resolve(&format!("bogus{i}")).await.is_err());
        }
        assert!(registry.resolve("anthropic").await.is_err());

        assert!(registry.entries.lock().is_empty());
        assert!(registry.registered().is_empty());
    }

    #[tokio::test]
    async fn registered_adapter_is_resolved_and_closed() {
        let factory = Arc::new(StubFactory::new(&["ollama"]));
        let registry = registry(&factory);
        let custom = Arc::new(StubProvider::new(ProviderKind::OpenAi, false));
        registry
            .register("openai", custom.clone())
            .expect("registered");

        let resolved = registry.resolve("openai").await.expect("openai");
        let expected: DynProvider = custom.clone();
        assert!(Arc::ptr_eq(&resolved, &expected));
        assert_eq!(factory.builds("openai"), 0);
        assert_eq!(registry.default_provider(), Some("openai"));

        let duplicate = Arc::new(StubProvider::new(ProviderKind::OpenAi, false));
        assert!(matches!(
            registry.register("openai", duplicate),
            Err(LLMError::Validation { .. })
        ));

        registry.resolve("ollama").await.expect("ollama");
        registry.close_all().await.expect("closed");
        assert_eq!(custom.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn custom_names_resolve_to_registered_adapters() {
        let registry = registry(&Arc::new(StubFactory::new(&[])));
        registry
            .register("local-proxy", Arc::new(StubProvider::new(ProviderKind::OpenAi, false)))
            .expect("registered");
        assert!(registry.resolve("local-proxy").await.is_ok());
        assert_eq!(registry.registered(), vec!["local-proxy".to_string()]);
    }
}
