use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_core::Stream;
use futures_util::{StreamExt, stream};

use crate::error::LLMError;
use crate::http::{DynHttpTransport, post_json_stream_with_headers, post_json_with_headers};
use crate::provider::{parse_json, success_body, success_stream};
use crate::stream::{StreamDecoder, StreamEvent};

use super::PROVIDER_NAME;
use super::types::{GenerateContentRequest, GenerateContentResponse};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Thin Generative Language API client.
///
/// It owns the connection settings and the closed flag; the adapter layers request
/// mapping and chunk normalization on top of it.
pub(crate) struct GeminiClient {
    transport: DynHttpTransport,
    base_url: String,
    api_key: String,
    closed: AtomicBool,
}

impl GeminiClient {
    pub(crate) fn new(transport: DynHttpTransport, api_key: String) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_base_url(&mut self, base_url: String) {
        self.base_url = base_url;
    }

    fn url(&self, model: &str, method: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let model_path = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        if base.ends_with("/v1beta") {
            format!("{base}/{model_path}:{method}")
        } else {
            format!("{base}/v1beta/{model_path}:{method}")
        }
    }

    fn headers(&self) -> HashMap<String, String> {
        HashMap::from([("x-goog-api-key".to_string(), self.api_key.clone())])
    }

    pub(crate) fn ensure_open(&self) -> Result<(), LLMError> {
        if self.closed.load(Ordering::Acquire) {
            Err(LLMError::transport("client closed"))
        } else {
            Ok(())
        }
    }

    /// Marks the client closed. Returns `false` when it already was.
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) async fn generate_content(
        &self,
        model: &str,
        body: &GenerateContentRequest,
        timeout: Option<Duration>,
    ) -> Result<GenerateContentResponse, LLMError> {
        self.ensure_open()?;
        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.url(model, "generateContent"),
            self.headers(),
            body,
            timeout,
        )
        .await?;
        let text = success_body(PROVIDER_NAME, response)?;
        parse_json(PROVIDER_NAME, &text)
    }

    /// Opens `streamGenerateContent` over SSE and returns an iterator over its events.
    pub(crate) async fn generate_content_stream(
        &self,
        model: &str,
        body: &GenerateContentRequest,
        timeout: Option<Duration>,
    ) -> Result<GenerateContentStream, LLMError> {
        self.ensure_open()?;
        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            self.url(model, "streamGenerateContent?alt=sse"),
            self.headers(),
            body,
            timeout,
        )
        .await?;
        let body = success_stream(PROVIDER_NAME, response).await?;
        Ok(GenerateContentStream {
            events: StreamDecoder::new(body, PROVIDER_NAME),
        })
    }
}

/// Pull iterator over streamed GenerateContent responses.
///
/// `next` yields `None` once the server has sent everything; exhaustion is the
/// completion signal for this backend.
pub(crate) struct GenerateContentStream {
    events: StreamDecoder,
}

impl GenerateContentStream {
    pub(crate) async fn next(&mut self) -> Option<Result<GenerateContentResponse, LLMError>> {
        loop {
            match self.events.next().await? {
                Ok(StreamEvent::Data(data)) => return Some(parse_json(PROVIDER_NAME, &data)),
                Ok(StreamEvent::Done) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
    }

    /// Adapts the iterator to a `Stream` for the decode loop.
    pub(crate) fn into_frames(
        self,
    ) -> impl Stream<Item = Result<GenerateContentResponse, LLMError>> + Send + 'static {
        stream::unfold(self, |mut iter| async move {
            let item = iter.next().await?;
            Some((item, iter))
        })
    }
}
