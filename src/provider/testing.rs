//! Test doubles shared by the unit tests: an in-memory transport and a scripted
//! provider factory.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use parking_lot::Mutex;

use crate::config::{ProviderFactory, ProviderKind};
use crate::error::LLMError;
use crate::http::{HttpBodyStream, HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport};
use crate::provider::{DynProvider, LLMProvider};
use crate::stream::ChunkStream;
use crate::types::{Chunk, CompletionRequest, CompletionResult, Usage};

/// Replays canned responses in order and records every request it sees.
#[derive(Default)]
pub(crate) struct MockTransport {
    responses: Mutex<VecDeque<(u16, Vec<Vec<u8>>)>>,
    pub(crate) requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues a response whose body arrives as the given pieces.
    pub(crate) fn respond(self, status: u16, pieces: &[&str]) -> Self {
        self.responses.lock().push_back((
            status,
            pieces.iter().map(|piece| piece.as_bytes().to_vec()).collect(),
        ));
        self
    }

    pub(crate) fn last_body(&self) -> serde_json::Value {
        let requests = self.requests.lock();
        let request = requests.last().expect("a request was sent");
        serde_json::from_slice(request.body.as_deref().unwrap_or_default()).expect("json body")
    }

    pub(crate) fn last_url(&self) -> String {
        self.requests
            .lock()
            .last()
            .expect("a request was sent")
            .url
            .clone()
    }

    pub(crate) fn last_header(&self, name: &str) -> Option<String> {
        self.requests
            .lock()
            .last()
            .and_then(|request| request.headers.get(name).cloned())
    }

    fn next(&self, request: HttpRequest) -> (u16, Vec<Vec<u8>>) {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .expect("mock response queued")
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        let (status, pieces) = self.next(request);
        Ok(HttpResponse {
            status,
            headers: HashMap::new(),
            body: pieces.concat(),
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        let (status, pieces) = self.next(request);
        let body: HttpBodyStream = Box::pin(stream::iter(pieces.into_iter().map(Ok)));
        Ok(HttpStreamResponse {
            status,
            headers: HashMap::new(),
            body,
        })
    }
}

/// Provider that answers with `"<model> via <name>"` and counts `close` calls.
pub(crate) struct StubProvider {
    kind: ProviderKind,
    fail_close: bool,
    pub(crate) closes: AtomicUsize,
}

impl StubProvider {
    pub(crate) fn new(kind: ProviderKind, fail_close: bool) -> Self {
        Self {
            kind,
            fail_close,
            closes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LLMProvider for StubProvider {
    async fn generate(
        &self,
        model: &str,
        _request: &CompletionRequest,
    ) -> Result<CompletionResult, LLMError> {
        if model == "fail" {
            return Err(LLMError::Backend {
                provider: self.name(),
                status: 500,
                body: "boom".to_string(),
            });
        }
        Ok(CompletionResult {
            text: format!("{model} via {}", self.name()),
            usage: Some(Usage::new(1, 1)),
            provider: self.name().to_string(),
        })
    }

    async fn stream(
        &self,
        model: &str,
        _request: &CompletionRequest,
    ) -> Result<ChunkStream, LLMError> {
        let provider = self.name();
        let items = vec![
            Ok(Chunk::delta(provider, model.to_string(), None)),
            Ok(Chunk::terminal(provider, "", Usage::new(1, 1))),
        ];
        Ok(Box::pin(stream::iter(items)))
    }

    async fn close(&self) -> Result<(), LLMError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            Err(LLMError::transport(format!("{} refused to close", self.name())))
        } else {
            Ok(())
        }
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }
}

/// Factory with scripted outcomes per provider name.
///
/// Names outside `configured` fail with [`LLMError::Configuration`]; names in `broken`
/// fail with a transport error. Construction yields once so that concurrent callers
/// really overlap.
pub(crate) struct StubFactory {
    configured: HashSet<&'static str>,
    broken: HashSet<&'static str>,
    fail_close: HashSet<&'static str>,
    builds: Mutex<HashMap<String, usize>>,
    pub(crate) built: Mutex<Vec<Arc<StubProvider>>>,
}

impl StubFactory {
    pub(crate) fn new(configured: &[&'static str]) -> Self {
        Self {
            configured: configured.iter().copied().collect(),
            broken: HashSet::new(),
            fail_close: HashSet::new(),
            builds: Mutex::new(HashMap::new()),
            built: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn broken(mut self, name: &'static str) -> Self {
        self.broken.insert(name);
        self
    }

    pub(crate) fn failing_close(mut self, name: &'static str) -> Self {
        self.fail_close.insert(name);
        self
    }

    pub(crate) fn builds(&self, name: &str) -> usize {
        self.builds.lock().get(name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ProviderFactory for StubFactory {
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
        *self.builds.lock().entry(name.to_string()).or_default() += 1;
        tokio::time::sleep(Duration::from_millis(5)).await;

        if !self.configured.contains(kind.name()) {
            return Err(LLMError::Configuration {
                provider: name.to_string(),
                missing: kind.required_var(),
            });
        }
        if self.broken.contains(kind.name()) {
            return Err(LLMError::transport(format!("{name} handshake failed")));
        }

        let provider = Arc::new(StubProvider::new(
            kind,
            self.fail_close.contains(kind.name()),
        ));
        self.built.lock().push(provider.clone());
        Ok(provider)
    }
}
