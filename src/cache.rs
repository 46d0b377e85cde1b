//! Two-tier response cache: exact hash keys plus a per-owner semantic
//! index, with an embedding cache on the side.
//!
//! Caching is an optimization, never a correctness dependency. Every
//! store error is recoverable as a miss; the orchestrator logs and moves
//! on. All keys are namespaced under `ai:` and owner-scoped so entries
//! can never leak across owners.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::embedding::cosine_similarity;
use crate::error::CacheError;
use crate::models::{ChatResponse, RetrievalFilter};

// ============ Keys ============

fn short_hash(data: &str) -> String {
    let digest = Sha256::digest(data.as_bytes());
    hex::encode(digest)[..16].to_string()
}

fn filters_signature(filters: Option<&RetrievalFilter>) -> String {
    filters.map(|f| f.signature()).unwrap_or_default()
}

/// Short per-request hash of the filter set; semantic entries only match
/// when this is identical.
fn filters_hash(filters: Option<&RetrievalFilter>) -> String {
    let sig = filters_signature(filters);
    if sig.is_empty() {
        return String::new();
    }
    short_hash(&sig)[..8].to_string()
}

/// Key for an exact response: hash of the normalized question, owner,
/// and filter signature.
pub fn query_key(query: &str, owner_id: i64, filters: Option<&RetrievalFilter>) -> String {
    let normalized = query.to_lowercase().trim().to_string();
    let key_data = format!("{normalized}:{owner_id}:{}", filters_signature(filters));
    format!("ai:query:{owner_id}:{}", short_hash(&key_data))
}

/// Key for a cached embedding, scoped by model so a model change never
/// serves stale vectors.
pub fn embedding_key(text: &str, model: &str) -> String {
    format!("ai:emb:{model}:{}", short_hash(text))
}

/// Key holding an owner's semantic index list.
pub fn semantic_index_key(owner_id: i64) -> String {
    format!("ai:sem_idx:{owner_id}")
}

/// Pattern matching all of an owner's exact entries.
pub fn owner_pattern(owner_id: i64) -> String {
    format!("ai:*:{owner_id}:*")
}

/// Short-lived marker recording that a content record changed.
pub fn invalidation_key(content_type: &str, content_id: i64, owner_id: i64) -> String {
    format!("ai:inv:{owner_id}:{content_type}:{content_id}")
}

// ============ Store seam ============

/// Keyed cache store with TTLs. Pattern delete is best effort: stores
/// without it return 0 and rely on natural expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError>;
}

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// In-process store. The default when no external cache is wired in;
/// also what the test suite runs against.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Glob match supporting `*` only: ordered substring containment with
/// anchored first and last segments.
fn glob_match(pattern: &str, key: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    for (i, seg) in segments.iter().enumerate() {
        if seg.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(seg) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return rest.ends_with(seg);
        } else {
            match rest.find(seg) {
                Some(pos) => rest = &rest[pos + seg.len()..],
                None => return false,
            }
        }
    }
    true
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| CacheError::Store(e.to_string()))?;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| CacheError::Store(e.to_string()))?;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| CacheError::Store(e.to_string()))?;
        entries.remove(key);
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| CacheError::Store(e.to_string()))?;
        let matching: Vec<String> = entries
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        let count = matching.len() as u64;
        for key in matching {
            entries.remove(&key);
        }
        Ok(count)
    }
}

// ============ Semantic index ============

/// One entry in an owner's semantic index list.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SemanticEntry {
    query: String,
    embedding: Vec<f32>,
    response: ChatResponse,
    #[serde(default)]
    filters_hash: String,
}

// ============ Service ============

/// Unified cache: exact responses, semantic responses, embeddings, and
/// invalidation markers.
pub struct CacheService {
    store: std::sync::Arc<dyn CacheStore>,
    config: CacheConfig,
}

impl CacheService {
    pub fn new(store: std::sync::Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    /// Probe both tiers: exact first (cheaper), then semantic. A hit
    /// comes back with its cache markers filled in.
    pub async fn get(
        &self,
        query: &str,
        query_embedding: &[f32],
        owner_id: i64,
        filters: Option<&RetrievalFilter>,
    ) -> Result<Option<ChatResponse>, CacheError> {
        if !self.config.enabled {
            return Ok(None);
        }

        if let Some(response) = self.get_exact(query, owner_id, filters).await? {
            return Ok(Some(response));
        }

        if let Some((mut response, score)) =
            self.get_semantic(query_embedding, owner_id, filters).await?
        {
            response.cached = true;
            response.cache_type = Some("semantic".to_string());
            response.similarity = Some(score);
            return Ok(Some(response));
        }

        Ok(None)
    }

    /// Exact-tier lookup. A corrupt stored payload counts as a miss.
    pub async fn get_exact(
        &self,
        query: &str,
        owner_id: i64,
        filters: Option<&RetrievalFilter>,
    ) -> Result<Option<ChatResponse>, CacheError> {
        let key = query_key(query, owner_id, filters);
        let Some(data) = self.store.get(&key).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<ChatResponse>(&data) {
            Ok(mut response) => {
                response.cached = true;
                response.cache_type = Some("exact".to_string());
                debug!(owner_id, "exact cache hit");
                Ok(Some(response))
            }
            Err(e) => {
                warn!(key, error = %e, "failed to parse cached response");
                Ok(None)
            }
        }
    }

    /// Semantic-tier lookup: linear scan of the owner's index, filter
    /// signature must match exactly, similarity must reach the
    /// threshold. The strictly-greater comparison keeps the first entry
    /// seen among equal scores.
    pub async fn get_semantic(
        &self,
        query_embedding: &[f32],
        owner_id: i64,
        filters: Option<&RetrievalFilter>,
    ) -> Result<Option<(ChatResponse, f32)>, CacheError> {
        let index = self.load_index(owner_id).await?;
        if index.is_empty() {
            return Ok(None);
        }

        let wanted_hash = filters_hash(filters);
        let mut best: Option<(&SemanticEntry, f32)> = None;

        for entry in &index {
            if entry.filters_hash != wanted_hash {
                continue;
            }
            let score = cosine_similarity(query_embedding, &entry.embedding);
            if score >= self.config.semantic_threshold
                && best.map(|(_, s)| score > s).unwrap_or(true)
            {
                best = Some((entry, score));
            }
        }

        match best {
            Some((entry, score)) => {
                debug!(owner_id, score, "semantic cache hit");
                Ok(Some((entry.response.clone(), score)))
            }
            None => Ok(None),
        }
    }

    /// Write a response to both tiers. Cache markers are stripped before
    /// storage so a later hit reports its own provenance.
    pub async fn set(
        &self,
        query: &str,
        query_embedding: &[f32],
        response: &ChatResponse,
        owner_id: i64,
        filters: Option<&RetrievalFilter>,
    ) -> Result<(), CacheError> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut stored = response.clone();
        stored.cached = false;
        stored.cache_type = None;
        stored.similarity = None;

        let key = query_key(query, owner_id, filters);
        let payload = serde_json::to_string(&stored)?;
        self.store
            .set(&key, &payload, Duration::from_secs(self.config.exact_ttl_secs))
            .await?;

        let mut index = self.load_index(owner_id).await?;
        let normalized = query.to_lowercase().trim().to_string();
        index.retain(|e| e.query.to_lowercase().trim() != normalized);
        index.push(SemanticEntry {
            query: query.to_string(),
            embedding: query_embedding.to_vec(),
            response: stored,
            filters_hash: filters_hash(filters),
        });
        self.save_index(owner_id, index).await?;

        debug!(owner_id, "cached response");
        Ok(())
    }

    async fn load_index(&self, owner_id: i64) -> Result<Vec<SemanticEntry>, CacheError> {
        let key = semantic_index_key(owner_id);
        let Some(data) = self.store.get(&key).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&data) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(owner_id, error = %e, "failed to parse semantic index");
                Ok(Vec::new())
            }
        }
    }

    async fn save_index(&self, owner_id: i64, mut entries: Vec<SemanticEntry>) -> Result<(), CacheError> {
        // Trim to the most recent entries.
        let cap = self.config.max_entries_per_owner;
        if entries.len() > cap {
            entries.drain(..entries.len() - cap);
        }
        let key = semantic_index_key(owner_id);
        let payload = serde_json::to_string(&entries)?;
        self.store
            .set(
                &key,
                &payload,
                Duration::from_secs(self.config.semantic_ttl_secs),
            )
            .await
    }

    /// Cached embedding for `text` under `model`, if present.
    pub async fn get_embedding(
        &self,
        text: &str,
        model: &str,
    ) -> Result<Option<Vec<f32>>, CacheError> {
        if !self.config.enabled {
            return Ok(None);
        }
        let key = embedding_key(text, model);
        let Some(data) = self.store.get(&key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&data) {
            Ok(vec) => Ok(Some(vec)),
            Err(_) => Ok(None),
        }
    }

    pub async fn set_embedding(
        &self,
        text: &str,
        embedding: &[f32],
        model: &str,
    ) -> Result<(), CacheError> {
        if !self.config.enabled {
            return Ok(());
        }
        let key = embedding_key(text, model);
        let payload = serde_json::to_string(embedding)?;
        self.store
            .set(
                &key,
                &payload,
                Duration::from_secs(self.config.embedding_ttl_secs),
            )
            .await
    }

    /// Drop every cached response for an owner: the semantic index
    /// explicitly, exact entries by pattern where the store supports it.
    pub async fn invalidate_owner(&self, owner_id: i64) -> Result<u64, CacheError> {
        self.store.delete(&semantic_index_key(owner_id)).await?;
        let deleted = self.store.delete_pattern(&owner_pattern(owner_id)).await?;
        debug!(owner_id, deleted, "invalidated owner cache");
        Ok(deleted)
    }

    /// Record that a content record changed and clear the owner's
    /// semantic index. Coarse on purpose: similarity hits cannot be
    /// selectively revoked, so any content change clears them all.
    pub async fn invalidate_content(
        &self,
        content_type: &str,
        content_id: i64,
        owner_id: i64,
    ) -> Result<(), CacheError> {
        let marker = invalidation_key(content_type, content_id, owner_id);
        self.store
            .set(&marker, "1", Duration::from_secs(300))
            .await?;
        self.store.delete(&semantic_index_key(owner_id)).await?;
        debug!(content_type, content_id, owner_id, "invalidated content");
        Ok(())
    }

    /// Round-trip probe of the underlying store.
    pub async fn health_check(&self) -> bool {
        let probe = self
            .store
            .set("ai:health", "1", Duration::from_secs(10))
            .await;
        if probe.is_err() {
            return false;
        }
        matches!(self.store.get("ai:health").await, Ok(Some(v)) if v == "1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn service_with(config: CacheConfig) -> CacheService {
        CacheService::new(Arc::new(MemoryStore::new()), config)
    }

    fn service() -> CacheService {
        service_with(CacheConfig::default())
    }

    fn response(answer: &str) -> ChatResponse {
        ChatResponse {
            answer: answer.to_string(),
            sources: vec![],
            routing_decision: "local".to_string(),
            provider: "ollama".to_string(),
            cached: false,
            cache_type: None,
            similarity: None,
            execution_mode: "rag".to_string(),
            sql_query: None,
            sql_explanation: None,
            data_rows: None,
            visualization: None,
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn test_query_key_normalizes_question() {
        let a = query_key("  How Much did I SPEND? ", 7, None);
        let b = query_key("how much did i spend?", 7, None);
        assert_eq!(a, b);
        assert!(a.starts_with("ai:query:7:"));
        // Different owner, different key.
        assert_ne!(a, query_key("how much did i spend?", 8, None));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("ai:*:7:*", "ai:query:7:abcd"));
        assert!(!glob_match("ai:*:7:*", "ai:sem_idx:7"));
        assert!(!glob_match("ai:*:7:*", "ai:query:8:abcd"));
        assert!(glob_match("ai:health", "ai:health"));
    }

    #[tokio::test]
    async fn test_exact_roundtrip() {
        let cache = service();
        cache
            .set("how much did I spend?", &[1.0, 0.0], &response("a lot"), 7, None)
            .await
            .unwrap();

        let hit = cache
            .get("How much did I spend?", &[0.0, 1.0], 7, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.answer, "a lot");
        assert!(hit.cached);
        assert_eq!(hit.cache_type.as_deref(), Some("exact"));
    }

    #[tokio::test]
    async fn test_semantic_hit_at_threshold_boundary() {
        // 24/25 cosine between [3,4] and [4,3]; the threshold is built
        // from the same division so the comparison is exact.
        let threshold = 24.0f32 / 25.0f32;
        let config = CacheConfig {
            semantic_threshold: threshold,
            ..CacheConfig::default()
        };
        let cache = service_with(config);
        cache
            .set("spending this month", &[3.0, 4.0], &response("cached"), 7, None)
            .await
            .unwrap();

        // Equal to the threshold: hit.
        let hit = cache
            .get_semantic(&[4.0, 3.0], 7, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.0.answer, "cached");
        assert_eq!(hit.1, threshold);

        // Below the threshold: miss. cos([3,4],[1,0]) = 0.6.
        assert!(cache
            .get_semantic(&[1.0, 0.0], 7, None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_semantic_tie_keeps_first_entry() {
        let cache = service();
        cache
            .set("first question", &[1.0, 0.0], &response("first"), 7, None)
            .await
            .unwrap();
        cache
            .set("second question", &[1.0, 0.0], &response("second"), 7, None)
            .await
            .unwrap();

        let (hit, score) = cache
            .get_semantic(&[1.0, 0.0], 7, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(score, 1.0);
        assert_eq!(hit.answer, "first");
    }

    #[tokio::test]
    async fn test_semantic_replaces_same_question() {
        let cache = service();
        cache
            .set("my question", &[1.0, 0.0], &response("old"), 7, None)
            .await
            .unwrap();
        cache
            .set("My Question", &[1.0, 0.0], &response("new"), 7, None)
            .await
            .unwrap();

        let (hit, _) = cache
            .get_semantic(&[1.0, 0.0], 7, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.answer, "new");

        let index = cache.load_index(7).await.unwrap();
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_semantic_index_trims_to_cap() {
        let config = CacheConfig {
            max_entries_per_owner: 2,
            ..CacheConfig::default()
        };
        let cache = service_with(config);
        for (i, q) in ["q one", "q two", "q three"].iter().enumerate() {
            cache
                .set(q, &[i as f32 + 1.0, 0.0], &response(q), 7, None)
                .await
                .unwrap();
        }
        let index = cache.load_index(7).await.unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index[0].query, "q two");
        assert_eq!(index[1].query, "q three");
    }

    #[tokio::test]
    async fn test_semantic_requires_matching_filters() {
        let cache = service();
        let filters = RetrievalFilter {
            tags: vec!["pets".to_string()],
            ..Default::default()
        };
        cache
            .set("filtered", &[1.0, 0.0], &response("with filters"), 7, Some(&filters))
            .await
            .unwrap();

        // Same embedding, no filters: the signatures differ, so miss.
        assert!(cache
            .get_semantic(&[1.0, 0.0], 7, None)
            .await
            .unwrap()
            .is_none());
        assert!(cache
            .get_semantic(&[1.0, 0.0], 7, Some(&filters))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_invalidate_content_clears_semantic_index() {
        let cache = service();
        cache
            .set("q", &[1.0, 0.0], &response("r"), 7, None)
            .await
            .unwrap();
        cache.invalidate_content("expense", 42, 7).await.unwrap();

        assert!(cache
            .get_semantic(&[1.0, 0.0], 7, None)
            .await
            .unwrap()
            .is_none());
        // The invalidation marker is present.
        let marker = cache
            .store
            .get(&invalidation_key("expense", 42, 7))
            .await
            .unwrap();
        assert_eq!(marker.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_embedding_cache_roundtrip() {
        let cache = service();
        let vec = vec![0.25f32, -0.5, 0.75];
        cache
            .set_embedding("some text", &vec, "all-MiniLM-L6-v2")
            .await
            .unwrap();
        let hit = cache
            .get_embedding("some text", "all-MiniLM-L6-v2")
            .await
            .unwrap();
        assert_eq!(hit, Some(vec));
        // A different model never sees it.
        assert!(cache
            .get_embedding("some text", "other-model")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_disabled_cache_is_inert() {
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let cache = service_with(config);
        cache
            .set("q", &[1.0, 0.0], &response("r"), 7, None)
            .await
            .unwrap();
        assert!(cache.get("q", &[1.0, 0.0], 7, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_health_check() {
        let cache = service();
        assert!(cache.health_check().await);
    }
}
