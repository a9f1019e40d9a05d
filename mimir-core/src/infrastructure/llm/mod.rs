// mimir-core/src/infrastructure/llm/mod.rs
//
// LLM client adapters for schema inference's low-confidence fallback
// (§6). No real HTTP client is wired yet — `NoopLLMClient` answers
// `LlmUnavailable` uniformly so the schema-inference service's fallback
// path degrades to "no boost" rather than panicking when no provider is
// configured.

use crate::domain::error::DomainError;
use crate::ports::llm::{CompletionRequest, CompletionResponse, LLMClient};
use async_trait::async_trait;

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLLMClient;

#[async_trait]
impl LLMClient for NoopLLMClient {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, DomainError> {
        Err(DomainError::LlmUnavailable(
            "no LLM provider configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_client_always_reports_unavailable() {
        let client = NoopLLMClient;
        let err = client
            .complete(CompletionRequest {
                messages: vec![],
                temperature: 0.0,
                max_tokens: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::LlmUnavailable(_)));
    }
}
