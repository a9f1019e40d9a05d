// mimir-core/src/domain/schema_inference/infer.rs
//
// Per-column type inference with confidence (§4.H). Pure, deterministic;
// the LLM fallback for low-confidence columns is an application-layer
// concern (it needs the `LLMClient` port, which is I/O).

use super::{ColumnSchema, DataType};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;

static DATE_PATTERNS: LazyLock<Vec<regex::Regex>> = LazyLock::new(|| {
    vec![
        regex::Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static date pattern"),
        regex::Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}").expect("static date pattern"),
        regex::Regex::new(r"^\d{2}/\d{2}/\d{4}$").expect("static date pattern"),
        regex::Regex::new(r"^\d{2}-\d{2}-\d{4}$").expect("static date pattern"),
    ]
});

pub struct ColumnSample {
    pub name: String,
    pub values: Vec<Value>,
}

fn classify(value: &Value) -> Option<DataType> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(DataType::Boolean),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                Some(DataType::Integer)
            } else {
                Some(DataType::Float)
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.eq_ignore_ascii_case("true") || trimmed.eq_ignore_ascii_case("false") {
                return Some(DataType::Boolean);
            }
            if !trimmed.contains('.') && trimmed.parse::<i64>().is_ok() {
                return Some(DataType::Integer);
            }
            if trimmed.parse::<f64>().is_ok() {
                return Some(DataType::Float);
            }
            if DATE_PATTERNS.iter().any(|re| re.is_match(trimmed)) {
                return Some(DataType::Date);
            }
            Some(DataType::String)
        }
        Value::Array(_) | Value::Object(_) => Some(DataType::String),
    }
}

/// Infers a `ColumnSchema` from sampled values. `is_pk`/`is_fk` default to
/// false; those are set by the caller once FK detection has run.
pub fn infer_column(sample: &ColumnSample) -> (ColumnSchema, f64) {
    let total_non_null = sample.values.iter().filter(|v| !v.is_null()).count();
    let mut counts: [usize; 5] = [0; 5];
    for value in &sample.values {
        if let Some(t) = classify(value) {
            counts[type_index(t)] += 1;
        }
    }
    let (majority_idx, majority_count) = counts
        .iter()
        .enumerate()
        .max_by_key(|(_, count)| **count)
        .map(|(i, c)| (i, *c))
        .unwrap_or((type_index(DataType::String), 0));
    let data_type = index_type(majority_idx);
    let confidence = if total_non_null == 0 {
        0.0
    } else {
        majority_count as f64 / total_non_null as f64
    };

    let distinct: HashSet<String> = sample
        .values
        .iter()
        .filter(|v| !v.is_null())
        .map(|v| v.to_string())
        .collect();
    let cardinality = distinct.len() as u64;
    let cardinality_percent = if sample.values.is_empty() {
        0.0
    } else {
        cardinality as f64 / sample.values.len() as f64
    };
    let is_required = sample.values.iter().all(|v| !v.is_null());
    let is_unique = !sample.values.is_empty() && cardinality as usize == sample.values.len();

    let schema = ColumnSchema {
        name: sample.name.clone(),
        data_type,
        is_pk: false,
        is_fk: false,
        is_required,
        is_unique,
        cardinality,
        cardinality_percent,
        sample_values: sample.values.iter().take(5).cloned().collect(),
        constraints: Vec::new(),
        fk_metadata: None,
        ai_enhanced: false,
        ai_confidence: None,
    };
    (schema, confidence)
}

fn type_index(t: DataType) -> usize {
    match t {
        DataType::Integer => 0,
        DataType::Float => 1,
        DataType::String => 2,
        DataType::Boolean => 3,
        DataType::Date => 4,
    }
}

fn index_type(i: usize) -> DataType {
    match i {
        0 => DataType::Integer,
        1 => DataType::Float,
        3 => DataType::Boolean,
        4 => DataType::Date,
        _ => DataType::String,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn infers_integer_column_with_full_confidence() {
        let sample = ColumnSample {
            name: "id".into(),
            values: vec![Value::from(1), Value::from(2), Value::from(3)],
        };
        let (schema, confidence) = infer_column(&sample);
        assert_eq!(schema.data_type, DataType::Integer);
        assert_eq!(confidence, 1.0);
    }

    #[test]
    fn confidence_matches_majority_fraction() {
        let sample = ColumnSample {
            name: "mixed".into(),
            values: vec![
                Value::from("abc"),
                Value::from(123),
                Value::from("def"),
                Value::from(456),
            ],
        };
        let (schema, confidence) = infer_column(&sample);
        assert_eq!(schema.data_type, DataType::String);
        assert_eq!(confidence, 0.5);
    }

    #[test]
    fn detects_iso_dates() {
        let sample = ColumnSample {
            name: "created_at".into(),
            values: vec![Value::from("2026-01-01"), Value::from("2026-02-01")],
        };
        let (schema, confidence) = infer_column(&sample);
        assert_eq!(schema.data_type, DataType::Date);
        assert_eq!(confidence, 1.0);
    }

    #[test]
    fn null_values_excluded_from_confidence_denominator() {
        let sample = ColumnSample {
            name: "maybe".into(),
            values: vec![Value::from(1), Value::Null, Value::from(2)],
        };
        let (schema, confidence) = infer_column(&sample);
        assert_eq!(schema.data_type, DataType::Integer);
        assert_eq!(confidence, 1.0);
        assert!(!schema.is_required);
    }
}
