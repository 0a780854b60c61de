//! Search service: free-text query to ranked catalog records.
//!
//! Embeds the query with the shared embedder, scans the catalog snapshot's
//! flat index, joins hits to metadata by slot and converts distances to
//! similarity scores with `1 / (1 + distance)`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use skillmatch_core::error::{Result, SkillmatchError};
use skillmatch_core::types::{DisplayFields, SearchResult};

use crate::catalog::CatalogSnapshot;
use crate::context::SkillmatchContext;
use crate::embedding::check_dimension;

/// Exact-match constraints on a record's extra display fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub fields: BTreeMap<String, Value>,
}

impl SearchFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when every filter field is present and equal. A string filter
    /// also matches a non-string field with the same rendering, so
    /// `level=3` from a command line matches a numeric `3`.
    pub fn matches(&self, display: &DisplayFields) -> bool {
        self.fields
            .iter()
            .all(|(key, want)| match (display.extra.get(key), want) {
                (Some(have), _) if have == want => true,
                (Some(have), Value::String(w)) if !have.is_string() => have.to_string() == *w,
                _ => false,
            })
    }
}

/// Convert a squared L2 distance to a similarity in (0, 1].
pub fn similarity_from_distance(distance: f32) -> f64 {
    1.0 / (1.0 + f64::from(distance.max(0.0)))
}

/// Public query entry point over a [`SkillmatchContext`].
#[derive(Debug, Clone)]
pub struct SearchService {
    ctx: Arc<SkillmatchContext>,
}

impl SearchService {
    pub fn new(ctx: Arc<SkillmatchContext>) -> Self {
        Self { ctx }
    }

    /// Rank the `k` records of `catalog` closest to `query`.
    ///
    /// Unknown or empty catalogs yield an empty list. `k` must be positive;
    /// at most `min(k, catalog size)` results come back, further capped by
    /// `search.max_k` when one is configured.
    pub async fn search(&self, catalog: &str, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        let k = self.effective_k(k)?;
        let Some(snapshot) = self.snapshot(catalog) else {
            return Ok(Vec::new());
        };
        self.ranked(&snapshot, catalog, query, k).await
    }

    /// Like [`search`](Self::search), keeping only records whose extra
    /// fields match `filters`.
    ///
    /// Fetches `k * filter_overfetch` candidates first, so fewer than `k`
    /// results may come back when matches are rare.
    pub async fn search_filtered(
        &self,
        catalog: &str,
        query: &str,
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchResult>> {
        if filters.is_empty() {
            return self.search(catalog, query, k).await;
        }
        let k = self.effective_k(k)?;
        let Some(snapshot) = self.snapshot(catalog) else {
            return Ok(Vec::new());
        };

        let fetch = k.saturating_mul(self.ctx.search_config().filter_overfetch.max(1));
        let candidates = self.ranked(&snapshot, catalog, query, fetch).await?;
        let candidate_count = candidates.len();

        let results: Vec<SearchResult> = candidates
            .into_iter()
            .filter(|r| filters.matches(&r.display_fields))
            .take(k)
            .collect();

        debug!(
            catalog,
            candidates = candidate_count,
            matched = results.len(),
            "Filtered search"
        );
        Ok(results)
    }

    /// Records matching a user's current skills and optional career goal.
    ///
    /// The skills and goal are joined with spaces into a single query.
    pub async fn recommend(
        &self,
        catalog: &str,
        skills: &[String],
        career_goal: Option<&str>,
        k: usize,
    ) -> Result<Vec<SearchResult>> {
        let query = skills
            .iter()
            .map(String::as_str)
            .chain(career_goal)
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if query.is_empty() {
            return Ok(Vec::new());
        }
        self.search(catalog, &query, k).await
    }

    /// Service-layer search: any failure becomes an empty list plus a
    /// warning.
    pub async fn search_or_empty(&self, catalog: &str, query: &str, k: usize) -> Vec<SearchResult> {
        match self.search(catalog, query, k).await {
            Ok(results) => results,
            Err(e) => {
                warn!(catalog, error = %e, "Search failed, returning no results");
                Vec::new()
            }
        }
    }

    fn effective_k(&self, k: usize) -> Result<usize> {
        if k == 0 {
            return Err(SkillmatchError::InvalidArgument(
                "k must be a positive integer".to_string(),
            ));
        }
        Ok(match self.ctx.search_config().max_k {
            Some(max) => k.min(max.max(1)),
            None => k,
        })
    }

    fn snapshot(&self, catalog: &str) -> Option<Arc<CatalogSnapshot>> {
        match self.ctx.catalog(catalog) {
            Some(c) => {
                let snapshot = c.snapshot();
                if snapshot.is_empty() {
                    debug!(catalog, "Search on empty catalog");
                    None
                } else {
                    Some(snapshot)
                }
            }
            None => {
                warn!(catalog, "Search on unknown catalog");
                None
            }
        }
    }

    async fn ranked(
        &self,
        snapshot: &CatalogSnapshot,
        catalog: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<SearchResult>> {
        let query_vec = self.ctx.embedder().embed_boxed(query).await?;
        check_dimension(&query_vec, snapshot.index().dimension())?;

        let hits = snapshot.index().search(&query_vec, k)?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(record) = snapshot.metadata().get(hit.slot) else {
                debug_assert!(false, "slot {} has no metadata", hit.slot);
                return Err(SkillmatchError::InvariantViolation(format!(
                    "catalog '{}' slot {} has no metadata ({} entries)",
                    catalog,
                    hit.slot,
                    snapshot.metadata().len()
                )));
            };
            results.push(SearchResult {
                record_id: record.id,
                display_fields: record.display.clone(),
                similarity_score: similarity_from_distance(hit.distance),
                distance: hit.distance,
            });
        }

        debug!(catalog, k, returned = results.len(), "Search complete");
        Ok(results)
    }
}
