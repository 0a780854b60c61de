use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Catalog records
// =============================================================================

/// Human-facing attributes of a catalog record.
///
/// `extra` carries catalog-specific fields such as `url` or `resource_type`
/// and is flattened into the record on the wire.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayFields {
    #[serde(alias = "skill_name", alias = "title")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One catalog entry (a skill or a learning resource).
///
/// `id` is stable and unique within its catalog. Records are immutable once
/// embedded; changing one requires a rebuild.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(alias = "skill_id", alias = "resource_id")]
    pub id: i64,
    #[serde(flatten)]
    pub display: DisplayFields,
}

impl Record {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            display: DisplayFields {
                name: name.into(),
                ..Default::default()
            },
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.display.description = Some(description.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.display.extra.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.display.name
    }

    /// Text fed to the embedder: `name. description`, or `name` alone when
    /// the description is missing or blank.
    pub fn embedding_text(&self) -> String {
        match self.display.description.as_deref().map(str::trim) {
            Some(desc) if !desc.is_empty() => format!("{}. {}", self.display.name, desc),
            _ => self.display.name.clone(),
        }
    }
}

// =============================================================================
// Query results and statistics
// =============================================================================

/// A ranked match returned by the search service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub record_id: i64,
    pub display_fields: DisplayFields,
    /// `1 / (1 + distance)`, in (0, 1].
    pub similarity_score: f64,
    /// Squared Euclidean distance between the query and the record vector.
    pub distance: f32,
}

/// Read-only snapshot of a catalog's size.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub catalog: String,
    pub record_count: usize,
    pub dimension: usize,
    pub model: String,
}

// =============================================================================
// Tests
// =============================================================================
