use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::ProviderKind;
use crate::error::LLMError;
use crate::http::{DynHttpTransport, post_json_stream_with_headers, post_json_with_headers};
use crate::provider::{LLMProvider, ensure_messages, parse_json, success_body, success_stream};
use crate::stream::{ChunkStream, Interrupt, StreamDecoder, spawn_decode_loop};
use crate::types::{CompletionRequest, CompletionResult, Usage};

use super::PROVIDER_NAME;
use super::request::build_chat_body;
use super::stream::OpenAiFrameHandler;
use super::types::{ChatCompletionResponse, EmbeddingBody, EmbeddingResponse};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// OpenAI Chat Completions adapter.
///
/// Works against any OpenAI-compatible server through [`OpenAiProvider::with_base_url`].
pub struct OpenAiProvider {
    transport: DynHttpTransport,
    base_url: String,
    api_key: String,
    embedding_model: String,
}

impl OpenAiProvider {
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }

    /// Overrides the base URL; both `https://host` and `https://host/v1` are accepted.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/{path}")
        } else {
            format!("{base}/v1/{path}")
        }
    }

    fn build_headers(&self) -> HashMap<String, String> {
        HashMap::from([
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.api_key),
            ),
            ("Accept".to_string(), "application/json".to_string()),
        ])
    }
}

#[async_trait]
impl LLMProvider for OpenAiProvider {
    async fn generate(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, LLMError> {
        ensure_messages(request)?;
        let interrupt = Interrupt::for_request(request);
        let body = build_chat_body(model, request, false);
        tracing::debug!(provider = PROVIDER_NAME, model, "sending completion request");

        let response = interrupt
            .guard(post_json_with_headers(
                self.transport.as_ref(),
                self.endpoint("chat/completions"),
                self.build_headers(),
                &body,
                interrupt.remaining(),
            ))
            .await?;
        let text = success_body(PROVIDER_NAME, response)?;
        let parsed: ChatCompletionResponse = parse_json(PROVIDER_NAME, &text)?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .ok_or_else(|| LLMError::decode(PROVIDER_NAME, "response contains no message"))?;
        let usage = parsed.usage.map(|usage| {
            Usage::new(
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
            )
        });

        Ok(CompletionResult {
            text: content,
            usage,
            provider: PROVIDER_NAME.to_string(),
        })
    }

    async fn stream(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<ChunkStream, LLMError> {
        ensure_messages(request)?;
        let interrupt = Interrupt::for_request(request);
        let body = build_chat_body(model, request, true);
        tracing::debug!(provider = PROVIDER_NAME, model, "opening completion stream");

        let response = interrupt
            .guard(post_json_stream_with_headers(
                self.transport.as_ref(),
                self.endpoint("chat/completions"),
                self.build_headers(),
                &body,
                interrupt.remaining(),
            ))
            .await?;
        let body = interrupt.guard(success_stream(PROVIDER_NAME, response)).await?;

        Ok(spawn_decode_loop(
            PROVIDER_NAME,
            StreamDecoder::new(body, PROVIDER_NAME),
            OpenAiFrameHandler::default(),
            interrupt,
        ))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LLMError> {
        let body = EmbeddingBody {
            model: &self.embedding_model,
            input: text,
        };
        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint("embeddings"),
            self.build_headers(),
            &body,
            None,
        )
        .await?;
        let text = success_body(PROVIDER_NAME, response)?;
        let parsed: EmbeddingResponse = parse_json(PROVIDER_NAME, &text)?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| LLMError::decode(PROVIDER_NAME, "embedding response contains no data"))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }
}
