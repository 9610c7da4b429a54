use std::fmt;

use serde::{Deserialize, Serialize};

/// Snapshot of a workspace file taken at ingestion time.
#[derive(Debug, Clone)]
pub struct Document {
    /// Path relative to the workspace root, `/`-separated.
    pub path: String,
    pub content: String,
    /// blake3 hex digest of `content`.
    pub fingerprint: String,
}

impl Document {
    #[must_use]
    pub fn new(path: impl Into<String>, content: String) -> Self {
        let fingerprint = blake3::hash(content.as_bytes()).to_hex().to_string();
        Self {
            path: path.into(),
            content,
            fingerprint,
        }
    }
}

/// A bounded slice of a document. Offsets count chars, `end` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub path: String,
    pub ordinal: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl Chunk {
    /// Deterministic record id for this chunk position.
    #[must_use]
    pub fn record_id(&self) -> String {
        record_id(&self.path, self.ordinal)
    }
}

/// UUIDv5 over `"{path}#{ordinal}"`.
///
/// Identity is positional: a changed chunk overwrites the record it replaces.
#[must_use]
pub fn record_id(path: &str, ordinal: usize) -> String {
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_URL, format!("{path}#{ordinal}").as_bytes())
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub path: String,
    pub ordinal: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: RecordMetadata,
}

impl VectorRecord {
    #[must_use]
    pub fn from_chunk(chunk: Chunk, vector: Vec<f32>) -> Self {
        Self {
            id: chunk.record_id(),
            vector,
            metadata: RecordMetadata {
                path: chunk.path,
                ordinal: chunk.ordinal,
                text: chunk.text,
                start: chunk.start,
                end: chunk.end,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub id: String,
    pub score: f32,
    pub metadata: RecordMetadata,
}

/// Conjunction of field conditions applied to record metadata.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub must: Vec<FieldCondition>,
}

impl RecordFilter {
    #[must_use]
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            must: vec![FieldCondition {
                field: "path".into(),
                value: FieldValue::Text(path.into()),
            }],
        }
    }

    #[must_use]
    pub fn matches(&self, meta: &RecordMetadata) -> bool {
        self.must.iter().all(|cond| match (&*cond.field, &cond.value) {
            ("path", FieldValue::Text(p)) => meta.path == *p,
            ("ordinal", FieldValue::Integer(n)) => {
                i64::try_from(meta.ordinal).is_ok_and(|o| o == *n)
            }
            _ => false,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FieldCondition {
    pub field: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone)]
pub enum FieldValue {
    Integer(i64),
    Text(String),
}

/// Which retrieval channel produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Exact,
    Semantic,
}

impl SourceKind {
    /// Lower ranks first on score ties.
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::Exact => 0,
            Self::Semantic => 1,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Exact => "exact",
            Self::Semantic => "semantic",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub path: String,
    pub ordinal: usize,
    pub score: f32,
    pub source: SourceKind,
    /// 1-based line of the match for exact hits.
    pub line: Option<usize>,
    pub snippet: String,
}
