use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::ProviderKind;
use crate::error::LLMError;
use crate::http::{DynHttpTransport, post_json_stream_with_headers, post_json_with_headers};
use crate::provider::{
    LLMProvider, ensure_messages, join_url, parse_json, success_body, success_stream,
};
use crate::stream::{ChunkStream, Interrupt, LineDecoder, spawn_decode_loop};
use crate::types::{CompletionRequest, CompletionResult, Usage};

use super::PROVIDER_NAME;
use super::request::build_generate_body;
use super::stream::OllamaFrameHandler;
use super::types::{EmbeddingBody, EmbeddingResponse, GenerateResponse};

const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

/// Adapter for a self-hosted Ollama server.
///
/// There is no credential; the base URL itself is the required configuration.
pub struct OllamaProvider {
    transport: DynHttpTransport,
    base_url: String,
    embedding_model: String,
}

impl OllamaProvider {
    pub fn new(transport: DynHttpTransport, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    fn endpoint(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    async fn generate(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, LLMError> {
        ensure_messages(request)?;
        let interrupt = Interrupt::for_request(request);
        let body = build_generate_body(model, request, false)?;
        tracing::debug!(provider = PROVIDER_NAME, model, "sending completion request");

        let response = interrupt
            .guard(post_json_with_headers(
                self.transport.as_ref(),
                self.endpoint("api/generate"),
                HashMap::new(),
                &body,
                interrupt.remaining(),
            ))
            .await?;
        let text = success_body(PROVIDER_NAME, response)?;
        let parsed: GenerateResponse = parse_json(PROVIDER_NAME, &text)?;

        let usage = (parsed.prompt_eval_count.is_some() || parsed.eval_count.is_some()).then(|| {
            Usage::new(
                parsed.prompt_eval_count.unwrap_or(0),
                parsed.eval_count.unwrap_or(0),
            )
        });
        Ok(CompletionResult {
            text: parsed.response,
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
        let body = build_generate_body(model, request, true)?;
        tracing::debug!(provider = PROVIDER_NAME, model, "opening completion stream");

        let response = interrupt
            .guard(post_json_stream_with_headers(
                self.transport.as_ref(),
                self.endpoint("api/generate"),
                HashMap::new(),
                &body,
                interrupt.remaining(),
            ))
            .await?;
        let status = response.status;
        let body = interrupt.guard(success_stream(PROVIDER_NAME, response)).await?;

        Ok(spawn_decode_loop(
            PROVIDER_NAME,
            LineDecoder::new(body, PROVIDER_NAME),
            OllamaFrameHandler::new(status),
            interrupt,
        ))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LLMError> {
        let body = EmbeddingBody {
            model: &self.embedding_model,
            prompt: text,
        };
        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint("api/embeddings"),
            HashMap::new(),
            &body,
            None,
        )
        .await?;
        let text = success_body(PROVIDER_NAME, response)?;
        let parsed: EmbeddingResponse = parse_json(PROVIDER_NAME, &text)?;
        Ok(parsed.embedding)
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }
}
