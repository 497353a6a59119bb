//! Stream-to-term maps read from a source type's Avro schema.
//!
//! Each record field that carries a `stream_id` (or `streamId`) attribute
//! names the term that stream is calibrated for.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::StageError;

/// `stream-id -> term-name` for one source type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamTerms {
    terms: HashMap<String, String>,
}

impl StreamTerms {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            terms: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse an Avro record schema.
    pub fn parse(path: &Path, text: &str) -> Result<Self, StageError> {
        let bad = |reason: String| StageError::BadSchema {
            path: path.to_path_buf(),
            reason,
        };
        let schema: Value = serde_json::from_str(text).map_err(|e| bad(e.to_string()))?;
        let fields = schema
            .get("fields")
            .and_then(Value::as_array)
            .ok_or_else(|| bad("schema has no 'fields' array".into()))?;

        let mut terms = HashMap::new();
        for field in fields {
            let Some(name) = field.get("name").and_then(Value::as_str) else {
                return Err(bad("field without a name".into()));
            };
            let stream = field.get("stream_id").or_else(|| field.get("streamId"));
            let stream = match stream {
                None => continue,
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                Some(other) => return Err(bad(format!("field {name} has stream id {other}"))),
            };
            terms.insert(stream, name.to_string());
        }
        Ok(Self { terms })
    }

    /// Read `<schema_root>/<source_type>.avsc`.
    pub async fn read(schema_root: &Path, source_type: &str) -> Result<Self, StageError> {
        let path = schema_path(schema_root, source_type);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StageError::MissingInput { path });
            }
            Err(source) => return Err(StageError::Io { path, source }),
        };
        Self::parse(&path, &text)
    }

    pub fn term(&self, stream_id: &str) -> Option<&str> {
        self.terms.get(stream_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

pub fn schema_path(schema_root: &Path, source_type: &str) -> PathBuf {
    schema_root.join(format!("{source_type}.avsc"))
}
