// mimir-core/src/domain/schema_inference/fk.rs
//
// Foreign-key detection: three independent detectors (name pattern,
// cardinality, value overlap) whose applicable confidences are averaged
// against `fk_min_confidence` (§4.H). Value-sets are precomputed once per
// column, not recomputed per candidate pair (§9).

use super::{ColumnSchema, ForeignKey};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct FkDetectionConfig {
    pub fk_min_confidence: f64,
}

impl Default for FkDetectionConfig {
    fn default() -> Self {
        Self {
            fk_min_confidence: 0.8,
        }
    }
}

fn name_pattern_confidence(column_name: &str, pk_exists: bool) -> Option<f64> {
    let lower = column_name.to_ascii_lowercase();
    if lower.starts_with("fk_") {
        Some(0.8)
    } else if lower.ends_with("_id") {
        Some(if pk_exists { 0.9 } else { 0.7 })
    } else if lower.ends_with("_ref") {
        Some(0.7)
    } else if lower.contains("_fk_") {
        Some(0.7)
    } else {
        None
    }
}

fn cardinality_confidence(cardinality_percent: f64) -> Option<f64> {
    if (0.20..=0.60).contains(&cardinality_percent) {
        Some(0.7)
    } else if (0.05..0.20).contains(&cardinality_percent) || (0.60..=0.80).contains(&cardinality_percent) {
        Some(0.5)
    } else {
        None
    }
}

/// `|source ∩ target| / |source|`; `None` unless the overlap is ≥ 0.70, in
/// which case the ratio itself is the confidence.
fn value_overlap_confidence(
    source_values: &HashSet<String>,
    target_values: &HashSet<String>,
) -> Option<(f64, u64, u64)> {
    if source_values.is_empty() {
        return None;
    }
    let matched = source_values.intersection(target_values).count() as u64;
    let total = source_values.len() as u64;
    let ratio = matched as f64 / total as f64;
    if ratio >= 0.70 {
        Some((ratio, matched, total))
    } else {
        None
    }
}

fn value_set(samples: &[serde_json::Value]) -> HashSet<String> {
    samples
        .iter()
        .filter(|v| !v.is_null())
        .map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect()
}

/// Detects FK relationships from `source` column onto `target` column
/// ("self" or single-table detection, per scenario 3). Mutates
/// `source.is_fk`/`fk_metadata` in place when a candidate is confirmed.
pub fn detect_foreign_keys(
    columns: &mut [ColumnSchema],
    value_samples: &std::collections::HashMap<String, Vec<serde_json::Value>>,
    config: &FkDetectionConfig,
) -> Vec<ForeignKey> {
    let pk_name = columns.iter().find(|c| c.is_pk).map(|c| c.name.clone());
    let value_sets: std::collections::HashMap<String, HashSet<String>> = value_samples
        .iter()
        .map(|(name, values)| (name.clone(), value_set(values)))
        .collect();

    let mut found = Vec::new();
    let candidate_names: Vec<String> = columns
        .iter()
        .filter(|c| !c.is_pk)
        .map(|c| c.name.clone())
        .collect();

    for source_name in candidate_names {
        let Some(target_name) = pk_name.clone().filter(|t| t != &source_name) else {
            continue;
        };

        let mut confidences = Vec::new();
        let mut methods = Vec::new();

        let pk_exists = pk_name.is_some();
        if let Some(c) = name_pattern_confidence(&source_name, pk_exists) {
            confidences.push(c);
            methods.push("name_pattern".to_string());
        }

        let cardinality_percent = columns
            .iter()
            .find(|c| c.name == source_name)
            .map(|c| c.cardinality_percent)
            .unwrap_or(0.0);
        if let Some(c) = cardinality_confidence(cardinality_percent) {
            confidences.push(c);
            methods.push("cardinality".to_string());
        }

        let mut referential_integrity = 0.0;
        let mut matched_values = 0;
        let mut total_values = 0;
        if let (Some(source_values), Some(target_values)) =
            (value_sets.get(&source_name), value_sets.get(&target_name))
            && let Some((ratio, matched, total)) = value_overlap_confidence(source_values, target_values)
        {
            confidences.push(ratio);
            methods.push("value_overlap".to_string());
            referential_integrity = ratio;
            matched_values = matched;
            total_values = total;
        }

        if confidences.is_empty() {
            continue;
        }
        let average = confidences.iter().sum::<f64>() / confidences.len() as f64;
        if average >= config.fk_min_confidence {
            if let Some(col) = columns.iter_mut().find(|c| c.name == source_name) {
                col.is_fk = true;
                col.fk_metadata = Some(super::FkMetadata {
                    target: target_name.clone(),
                    confidence: average,
                    detection_methods: methods.clone(),
                });
            }
            found.push(ForeignKey {
                source: source_name,
                target: target_name,
                confidence: average,
                referential_integrity,
                matched_values,
                total_values,
                detection_methods: methods,
            });
        }
    }
    found
}
