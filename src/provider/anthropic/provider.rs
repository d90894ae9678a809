use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::ProviderKind;
use crate::error::LLMError;
use crate::http::{DynHttpTransport, post_json_stream_with_headers, post_json_with_headers};
use crate::provider::{LLMProvider, ensure_messages, parse_json, success_body, success_stream};
use crate::stream::{ChunkStream, Interrupt, StreamDecoder, spawn_decode_loop};
use crate::types::{CompletionRequest, CompletionResult, Usage};

use super::PROVIDER_NAME;
use super::request::build_anthropic_body;
use super::stream::AnthropicFrameHandler;
use super::types::AnthropicMessageResponse;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_VERSION: &str = "2023-06-01";

/// Anthropic Messages API adapter.
pub struct AnthropicProvider {
    transport: DynHttpTransport,
    base_url: String,
    api_key: String,
    version: String,
}

impl AnthropicProvider {
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            version: DEFAULT_VERSION.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the `anthropic-version` header.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/messages")
        } else {
            format!("{base}/v1/messages")
        }
    }

    fn build_headers(&self) -> HashMap<String, String> {
        HashMap::from([
            ("x-api-key".to_string(), self.api_key.clone()),
            ("anthropic-version".to_string(), self.version.clone()),
        ])
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn generate(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, LLMError> {
        ensure_messages(request)?;
        let interrupt = Interrupt::for_request(request);
        let body = build_anthropic_body(model, request, false)?;

        let response = interrupt
            .guard(post_json_with_headers(
                self.transport.as_ref(),
                self.endpoint(),
                self.build_headers(),
                &body,
                interrupt.remaining(),
            ))
            .await?;
        let text = success_body(PROVIDER_NAME, response)?;
        let parsed: AnthropicMessageResponse = parse_json(PROVIDER_NAME, &text)?;

        if parsed.content.is_empty() {
            return Err(LLMError::decode(PROVIDER_NAME, "response contains no content"));
        }
        let text = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<String>();
        let usage = parsed.usage.map(|usage| {
            Usage::new(
                usage.input_tokens.unwrap_or(0),
                usage.output_tokens.unwrap_or(0),
            )
        });

        Ok(CompletionResult {
            text,
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
        let body = build_anthropic_body(model, request, true)?;
        tracing::debug!(provider = PROVIDER_NAME, model, "opening completion stream");

        let response = interrupt
            .guard(post_json_stream_with_headers(
                self.transport.as_ref(),
                self.endpoint(),
                self.build_headers(),
                &body,
                interrupt.remaining(),
            ))
            .await?;
        let status = response.status;
        let body = interrupt.guard(success_stream(PROVIDER_NAME, response)).await?;

        Ok(spawn_decode_loop(
            PROVIDER_NAME,
            StreamDecoder::new(body, PROVIDER_NAME),
            AnthropicFrameHandler::new(status),
            interrupt,
        ))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }
}
