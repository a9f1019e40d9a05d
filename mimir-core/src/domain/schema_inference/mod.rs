// mimir-core/src/domain/schema_inference/mod.rs
//
// Converts a sample of rows into a `DataSchema`: per-column type
// inference with confidence, plus foreign-key detection by combining
// name-pattern, cardinality, and value-overlap heuristics (§4.H).

mod fk;
mod infer;

pub use fk::{detect_foreign_keys, FkDetectionConfig};
pub use infer::{infer_column, ColumnSample};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Integer,
    Float,
    String,
    Boolean,
    Date,
}

impl DataType {
    /// The `xsd:*` ontology type ontology generation downstream expects
    /// (§4.H, "the core only guarantees the schema is sufficient for it").
    pub fn ontology_type(&self) -> &'static str {
        match self {
            Self::Integer => "xsd:integer",
            Self::Float => "xsd:double",
            Self::String => "xsd:string",
            Self::Boolean => "xsd:boolean",
            Self::Date => "xsd:date",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FkMetadata {
    pub target: String,
    pub confidence: f64,
    pub detection_methods: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: DataType,
    pub is_pk: bool,
    pub is_fk: bool,
    pub is_required: bool,
    pub is_unique: bool,
    pub cardinality: u64,
    pub cardinality_percent: f64,
    pub sample_values: Vec<serde_json::Value>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub fk_metadata: Option<FkMetadata>,
    #[serde(default)]
    pub ai_enhanced: bool,
    #[serde(default)]
    pub ai_confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub source: String,
    pub target: String,
    pub confidence: f64,
    pub referential_integrity: f64,
    pub matched_values: u64,
    pub total_values: u64,
    pub detection_methods: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DataSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    pub foreign_keys: Vec<ForeignKey>,
    pub relationships: Vec<Relationship>,
    pub metadata: HashMap<String, serde_json::Value>,
}
