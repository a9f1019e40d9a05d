// mimir-core/src/application/schema_service.rs
//
// Orchestrates the Schema-Inference/FK Detector (§4.H): runs the pure
// `infer_column`/`detect_foreign_keys` domain logic over a row sample,
// then asks the optional LLM client to re-classify any column whose
// inferred confidence fell below `ai_confidence_threshold` rather than
// leaving it as a best-effort guess.

use crate::domain::error::DomainError;
use crate::domain::schema_inference::{detect_foreign_keys, infer_column, ColumnSample, DataSchema, DataType, FkDetectionConfig};
use crate::ports::llm::{ChatMessage, CompletionRequest, LLMClient};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};

#[derive(Debug, Clone)]
pub struct SchemaInferenceConfig {
    pub fk: FkDetectionConfig,
    /// Columns whose majority-type confidence is below this are sent to
    /// the LLM fallback (§9 `AI_CONFIDENCE_BOOST`/confidence threshold).
    pub ai_confidence_threshold: f64,
    /// Added to the LLM's self-reported confidence, clamped to 1.0, since
    /// a model call that agrees with the heuristic should end up more
    /// confident than either alone.
    pub ai_confidence_boost: f64,
}

impl Default for SchemaInferenceConfig {
    fn default() -> Self {
        Self {
            fk: FkDetectionConfig::default(),
            ai_confidence_threshold: 0.8,
            ai_confidence_boost: 0.15,
        }
    }
}

impl SchemaInferenceConfig {
    pub fn from_engine_config(engine: &crate::infrastructure::config::EngineConfig) -> Self {
        Self {
            fk: FkDetectionConfig {
                fk_min_confidence: engine.fk_min_confidence,
            },
            ai_confidence_threshold: 0.8,
            ai_confidence_boost: engine.ai_confidence_boost,
        }
    }
}

pub struct SchemaInferenceService {
    llm: Arc<dyn LLMClient>,
    config: SchemaInferenceConfig,
}

impl SchemaInferenceService {
    pub fn new(llm: Arc<dyn LLMClient>, config: SchemaInferenceConfig) -> Self {
        Self { llm, config }
    }

    /// Infers a full `DataSchema` from a row sample: `rows` is a JSON
    /// object per row, `name` is the resulting schema's name (typically
    /// the source table or file name), `pk_hint` optionally names the
    /// primary-key column rather than relying on uniqueness alone.
    #[instrument(skip(self, rows))]
    pub async fn infer_schema(&self, name: &str, rows: &[Value], pk_hint: Option<&str>) -> Result<DataSchema, DomainError> {
        let columns_by_name = columnar(rows);

        let mut columns = Vec::new();
        for (column_name, values) in &columns_by_name {
            let sample = ColumnSample {
                name: column_name.clone(),
                values: values.clone(),
            };
            let (mut column, confidence) = infer_column(&sample);
            if pk_hint == Some(column_name.as_str()) {
                column.is_pk = true;
            }
            if confidence < self.config.ai_confidence_threshold {
                match self.classify_with_llm(column_name, values).await {
                    Ok((data_type, llm_confidence)) => {
                        column.data_type = data_type;
                        column.ai_enhanced = true;
                        column.ai_confidence = Some((llm_confidence + self.config.ai_confidence_boost).min(1.0));
                    }
                    Err(e) => {
                        warn!(column = column_name, error = %e, "LLM fallback unavailable, keeping heuristic inference");
                    }
                }
            }
            columns.push(column);
        }

        if pk_hint.is_none() && !columns.iter().any(|c| c.is_pk) {
            infer_pk_by_uniqueness(&mut columns);
        }

        let foreign_keys = detect_foreign_keys(&mut columns, &columns_by_name, &self.config.fk);
        let relationships = foreign_keys
            .iter()
            .map(|fk| crate::domain::schema_inference::Relationship {
                source: fk.source.clone(),
                target: fk.target.clone(),
            })
            .collect();

        Ok(DataSchema {
            name: name.to_string(),
            columns,
            foreign_keys,
            relationships,
            metadata: HashMap::new(),
        })
    }

    async fn classify_with_llm(&self, column_name: &str, values: &[Value]) -> Result<(DataType, f64), DomainError> {
        let sample_preview: Vec<Value> = values.iter().take(10).cloned().collect();
        let prompt = format!(
            "Column '{column_name}' has sample values {sample_preview:?}. \
             Reply with a single JSON object: {{\"data_type\": one of \
             \"integer\"|\"float\"|\"string\"|\"boolean\"|\"date\", \"confidence\": 0.0-1.0}}."
        );
        let response = self
            .llm
            .complete(CompletionRequest {
                messages: vec![ChatMessage {
                    role: "user".to_string(),
                    content: prompt,
                }],
                temperature: 0.0,
                max_tokens: 64,
            })
            .await?;
        parse_llm_classification(&response.content)
    }
}

/// Tolerates a markdown-fenced response (```json ... ```) as well as bare
/// JSON, since LLM providers are inconsistent about wrapping output.
fn parse_llm_classification(content: &str) -> Result<(DataType, f64), DomainError> {
    let trimmed = content.trim();
    let json_body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed)
        .strip_suffix("```")
        .unwrap_or(trimmed)
        .trim();

    let parsed: Value = serde_json::from_str(json_body)
        .map_err(|e| DomainError::LlmUnavailable(format!("could not parse LLM response as JSON: {e}")))?;
    let data_type_str = parsed
        .get("data_type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| DomainError::LlmUnavailable("LLM response missing 'data_type'".to_string()))?;
    let data_type = match data_type_str {
        "integer" => DataType::Integer,
        "float" => DataType::Float,
        "boolean" => DataType::Boolean,
        "date" => DataType::Date,
        "string" => DataType::String,
        other => {
            return Err(DomainError::LlmUnavailable(format!(
                "LLM returned unknown data_type '{other}'"
            )))
        }
    };
    let confidence = parsed.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.5);
    Ok((data_type, confidence))
}

fn columnar(rows: &[Value]) -> HashMap<String, Vec<Value>> {
    let mut columns: HashMap<String, Vec<Value>> = HashMap::new();
    for row in rows {
        let Some(obj) = row.as_object() else { continue };
        for (key, value) in obj {
            columns.entry(key.clone()).or_default().push(value.clone());
        }
    }
    columns
}

/// Falls back to "smallest cardinality_percent among unique, required
/// columns" when no explicit PK hint was given.
fn infer_pk_by_uniqueness(columns: &mut [crate::domain::schema_inference::ColumnSchema]) {
    let best = columns
        .iter()
        .filter(|c| c.is_unique && c.is_required)
        .min_by(|a, b| a.cardinality_percent.partial_cmp(&b.cardinality_percent).unwrap_or(std::cmp::Ordering::Equal))
        .map(|c| c.name.clone());
    if let Some(name) = best
        && let Some(col) = columns.iter_mut().find(|c| c.name == name)
    {
        col.is_pk = true;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::error::DomainError;
    use crate::ports::llm::CompletionResponse;
    use async_trait::async_trait;
    use serde_json::json;

    struct StubLLM {
        response: String,
    }

    #[async_trait]
    impl LLMClient for StubLLM {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, DomainError> {
            Ok(CompletionResponse {
                content: self.response.clone(),
                finish_reason: "stop".to_string(),
                model: "stub".to_string(),
            })
        }
    }

    struct AlwaysFailsLLM;

    #[async_trait]
    impl LLMClient for AlwaysFailsLLM {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, DomainError> {
            Err(DomainError::LlmUnavailable("no provider configured".to_string()))
        }
    }

    fn rows() -> Vec<Value> {
        vec![
            json!({"id": 1, "user_id": 10, "amount": 50}),
            json!({"id": 2, "user_id": 11, "amount": 75}),
            json!({"id": 3, "user_id": 10, "amount": 30}),
            json!({"id": 4, "user_id": 12, "amount": 120}),
        ]
    }

    #[tokio::test]
    async fn infers_schema_and_flags_foreign_key() {
        let service = SchemaInferenceService::new(Arc::new(AlwaysFailsLLM), SchemaInferenceConfig::default());
        let schema = service.infer_schema("transactions", &rows(), Some("id")).await.unwrap();
        assert_eq!(schema.columns.len(), 3);
        let id_col = schema.columns.iter().find(|c| c.name == "id").unwrap();
        assert!(id_col.is_pk);
        assert!(schema.foreign_keys.iter().any(|fk| fk.source == "user_id"));
    }

    #[tokio::test]
    async fn low_confidence_column_falls_back_to_llm() {
        let llm = StubLLM {
            response: "```json\n{\"data_type\": \"date\", \"confidence\": 0.9}\n```".to_string(),
        };
        let mixed_rows = vec![
            json!({"id": 1, "mystery": "2026-01-01"}),
            json!({"id": 2, "mystery": "not-a-date-at-all"}),
        ];
        let config = SchemaInferenceConfig {
            ai_confidence_threshold: 0.9,
            ..SchemaInferenceConfig::default()
        };
        let service = SchemaInferenceService::new(Arc::new(llm), config);
        let schema = service.infer_schema("demo", &mixed_rows, Some("id")).await.unwrap();
        let mystery = schema.columns.iter().find(|c| c.name == "mystery").unwrap();
        assert!(mystery.ai_enhanced);
        assert_eq!(mystery.data_type, DataType::Date);
        assert!(mystery.ai_confidence.unwrap() > 0.9);
    }

    #[tokio::test]
    async fn llm_failure_keeps_heuristic_inference() {
        let service = SchemaInferenceService::new(Arc::new(AlwaysFailsLLM), SchemaInferenceConfig {
            ai_confidence_threshold: 1.1,
            ..SchemaInferenceConfig::default()
        });
        let schema = service.infer_schema("demo", &rows(), Some("id")).await.unwrap();
        assert!(schema.columns.iter().all(|c| !c.ai_enhanced));
    }

    #[test]
    fn parses_bare_json_without_markdown_fence() {
        let (data_type, confidence) = parse_llm_classification(r#"{"data_type": "boolean", "confidence": 0.8}"#).unwrap();
        assert_eq!(data_type, DataType::Boolean);
        assert_eq!(confidence, 0.8);
    }
}
