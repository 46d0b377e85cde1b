//! Semantic retrieval over the content index.
//!
//! Ranking happens in process: candidates come from the index scoped to
//! the owner, then get scored by cosine similarity against the query
//! embedding and cut to the top K. An owner with nothing indexed gets an
//! empty result list, not an error.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::cosine_similarity;
use crate::models::{ContentKind, IndexedContent, RetrievalFilter, RetrievalResult, Sensitivity};
use crate::sensitivity::max_sensitivity;

/// Read side of the content index.
#[async_trait]
pub trait ContentIndex: Send + Sync {
    /// Indexed records for an owner, narrowed by the filter where the
    /// backend can push it down. Backends may over-return; the search
    /// path re-checks every filter in process.
    async fn candidates(
        &self,
        owner_id: i64,
        filter: Option<&RetrievalFilter>,
    ) -> Result<Vec<IndexedContent>>;
}

/// True when `content` satisfies every set field of `filter`. Tags are
/// any-match; everything else composes conjunctively. Records without a
/// reference date never match a date-bounded filter.
pub fn matches_filter(content: &IndexedContent, filter: &RetrievalFilter) -> bool {
    if !filter.kinds.is_empty() && !filter.kinds.contains(&content.kind) {
        return false;
    }
    if !filter.sensitivities.is_empty() && !filter.sensitivities.contains(&content.sensitivity) {
        return false;
    }
    if !filter.content_types.is_empty() && !filter.content_types.contains(&content.content_type) {
        return false;
    }
    if !filter.tags.is_empty() && !filter.tags.iter().any(|t| content.tags.contains(t)) {
        return false;
    }
    if let Some(from) = filter.date_from {
        match content.reference_date {
            Some(d) if d >= from => {}
            _ => return false,
        }
    }
    if let Some(to) = filter.date_to {
        match content.reference_date {
            Some(d) if d <= to => {}
            _ => return false,
        }
    }
    true
}

pub struct RetrievalService {
    index: Arc<dyn ContentIndex>,
    config: RetrievalConfig,
}

impl RetrievalService {
    pub fn new(index: Arc<dyn ContentIndex>, config: RetrievalConfig) -> Self {
        Self { index, config }
    }

    /// Top-K most similar indexed records, ordered by ascending distance.
    /// `top_k` is clamped to the configured maximum.
    pub async fn search(
        &self,
        owner_id: i64,
        query_embedding: &[f32],
        filters: Option<&RetrievalFilter>,
        top_k: Option<usize>,
    ) -> Result<Vec<RetrievalResult>> {
        let top_k = top_k
            .unwrap_or(self.config.default_top_k)
            .min(self.config.max_top_k);

        let candidates = self.index.candidates(owner_id, filters).await?;

        let mut results: Vec<RetrievalResult> = candidates
            .into_iter()
            .filter(|c| c.is_indexed && !c.embedding.is_empty())
            .filter(|c| filters.map(|f| matches_filter(c, f)).unwrap_or(true))
            .map(|c| {
                let score = cosine_similarity(query_embedding, &c.embedding);
                RetrievalResult::from_distance(c, 1.0 - score)
            })
            .collect();

        results.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
        results.truncate(top_k);

        debug!(owner_id, count = results.len(), "retrieval complete");
        Ok(results)
    }

    /// Search narrowed to a single content kind.
    pub async fn search_by_kind(
        &self,
        owner_id: i64,
        query_embedding: &[f32],
        kind: ContentKind,
        top_k: Option<usize>,
    ) -> Result<Vec<RetrievalResult>> {
        let filter = RetrievalFilter {
            kinds: vec![kind],
            ..Default::default()
        };
        self.search(owner_id, query_embedding, Some(&filter), top_k)
            .await
    }

    /// Search that never returns high-sensitivity records. Used when the
    /// context is destined for a remote provider.
    pub async fn search_excluding_sensitive(
        &self,
        owner_id: i64,
        query_embedding: &[f32],
        top_k: Option<usize>,
    ) -> Result<Vec<RetrievalResult>> {
        let filter = RetrievalFilter {
            sensitivities: vec![Sensitivity::Low, Sensitivity::Medium],
            ..Default::default()
        };
        self.search(owner_id, query_embedding, Some(&filter), top_k)
            .await
    }

    /// Counts by kind and sensitivity for a result set, for logs and the
    /// status endpoint.
    pub fn content_summary(&self, results: &[RetrievalResult]) -> serde_json::Value {
        let mut by_kind: BTreeMap<&str, usize> = BTreeMap::new();
        let mut by_sensitivity: BTreeMap<&str, usize> = BTreeMap::new();
        for r in results {
            *by_kind.entry(r.content.kind.as_str()).or_insert(0) += 1;
            *by_sensitivity
                .entry(r.content.sensitivity.as_str())
                .or_insert(0) += 1;
        }
        serde_json::json!({
            "total": results.len(),
            "by_kind": by_kind,
            "by_sensitivity": by_sensitivity,
            "max_sensitivity": max_sensitivity(results).as_str(),
            "has_security": results.iter().any(|r| r.content.kind == ContentKind::Security),
        })
    }
}

/// In-memory content index: backs the test suite and embedded use
/// without a database.
#[derive(Default)]
pub struct MemoryIndex {
    records: std::sync::Mutex<Vec<IndexedContent>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, content: IndexedContent) {
        if let Ok(mut records) = self.records.lock() {
            records.retain(|c| {
                !(c.owner_id == content.owner_id
                    && c.content_type == content.content_type
                    && c.content_id == content.content_id)
            });
            records.push(content);
        }
    }

    pub fn remove(&self, owner_id: i64, content_type: &str, content_id: i64) {
        if let Ok(mut records) = self.records.lock() {
            records.retain(|c| {
                !(c.owner_id == owner_id
                    && c.content_type == content_type
                    && c.content_id == content_id)
            });
        }
    }

    pub fn get(&self, owner_id: i64, content_type: &str, content_id: i64) -> Option<IndexedContent> {
        self.records.lock().ok().and_then(|records| {
            records
                .iter()
                .find(|c| {
                    c.owner_id == owner_id
                        && c.content_type == content_type
                        && c.content_id == content_id
                })
                .cloned()
        })
    }

    /// Remove every record matching the given scope; `None` matches
    /// any. Returns how many were removed.
    pub fn remove_where(&self, owner_id: Option<i64>, content_type: Option<&str>) -> usize {
        if let Ok(mut records) = self.records.lock() {
            let before = records.len();
            records.retain(|c| {
                let owner_hit = owner_id.map(|o| c.owner_id == o).unwrap_or(true);
                let type_hit = content_type.map(|t| c.content_type == t).unwrap_or(true);
                !(owner_hit && type_hit)
            });
            before - records.len()
        } else {
            0
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContentIndex for MemoryIndex {
    async fn candidates(
        &self,
        owner_id: i64,
        filter: Option<&RetrievalFilter>,
    ) -> Result<Vec<IndexedContent>> {
        let records = self
            .records
            .lock()
            .map_err(|e| anyhow::anyhow!("index lock poisoned: {e}"))?;
        Ok(records
            .iter()
            .filter(|c| c.owner_id == owner_id)
            .filter(|c| filter.map(|f| matches_filter(c, f)).unwrap_or(true))
            .cloned()
            .collect())
    }
}
