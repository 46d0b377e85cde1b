use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sql: SqlConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding service.
    #[serde(default = "default_embedding_url")]
    pub url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_embed_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            model: default_embedding_model(),
            dims: default_dims(),
            timeout_secs: default_embed_timeout_secs(),
            max_retries: default_embed_max_retries(),
        }
    }
}

fn default_embedding_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_embed_timeout_secs() -> u64 {
    30
}
fn default_embed_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    10
}
fn default_max_top_k() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Minimum cosine similarity for a semantic cache hit.
    #[serde(default = "default_semantic_threshold")]
    pub semantic_threshold: f32,
    /// Per-owner cap on semantic cache entries (evicted oldest first).
    #[serde(default = "default_max_entries")]
    pub max_entries_per_owner: usize,
    #[serde(default = "default_exact_ttl")]
    pub exact_ttl_secs: u64,
    #[serde(default = "default_semantic_ttl")]
    pub semantic_ttl_secs: u64,
    #[serde(default = "default_embedding_ttl")]
    pub embedding_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            semantic_threshold: default_semantic_threshold(),
            max_entries_per_owner: default_max_entries(),
            exact_ttl_secs: default_exact_ttl(),
            semantic_ttl_secs: default_semantic_ttl(),
            embedding_ttl_secs: default_embedding_ttl(),
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}
fn default_semantic_threshold() -> f32 {
    0.92
}
fn default_max_entries() -> usize {
    100
}
fn default_exact_ttl() -> u64 {
    3600
}
fn default_semantic_ttl() -> u64 {
    1800
}
fn default_embedding_ttl() -> u64 {
    86400
}

#[derive(Debug, Deserialize, Clone)]
pub struct SqlConfig {
    /// Per-statement timeout enforced server-side.
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
    /// Hard cap on rows returned to the caller.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    #[serde(default = "default_sql_max_retries")]
    pub max_retries: u32,
    /// Which provider generates SQL and summaries: "remote" or "local".
    #[serde(default = "default_sql_provider")]
    pub provider: String,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            statement_timeout_ms: default_statement_timeout_ms(),
            max_rows: default_max_rows(),
            max_retries: default_sql_max_retries(),
            provider: default_sql_provider(),
        }
    }
}

fn default_statement_timeout_ms() -> u64 {
    10_000
}
fn default_max_rows() -> usize {
    500
}
fn default_sql_max_retries() -> u32 {
    2
}
fn default_sql_provider() -> String {
    "remote".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub local: LocalProviderConfig,
    #[serde(default)]
    pub remote: RemoteProviderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocalProviderConfig {
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_local_model")]
    pub model: String,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LocalProviderConfig {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            model: default_local_model(),
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_local_model() -> String {
    "llama3.1:8b".to_string()
}
fn default_provider_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteProviderConfig {
    #[serde(default = "default_remote_url")]
    pub url: String,
    #[serde(default = "default_remote_model")]
    pub model: String,
    /// Environment variable holding the API key. Empty key means the
    /// remote provider is not configured.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemoteProviderConfig {
    fn default() -> Self {
        Self {
            url: default_remote_url(),
            model: default_remote_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

fn default_remote_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_remote_model() -> String {
    "llama-3.1-70b-versatile".to_string()
}
fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    /// Token budget for the retrieval context handed to the provider.
    #[serde(default = "default_context_tokens")]
    pub max_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_context_tokens(),
        }
    }
}

fn default_context_tokens() -> usize {
    4000
}

impl Config {
    /// Minimal configuration for tests and tooling that never touch the
    /// database or the network.
    pub fn minimal() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/query_harness".to_string(),
                max_connections: default_max_connections(),
            },
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            cache: CacheConfig::default(),
            sql: SqlConfig::default(),
            providers: ProvidersConfig::default(),
            context: ContextConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate retrieval
    if config.retrieval.default_top_k == 0 {
        anyhow::bail!("retrieval.default_top_k must be >= 1");
    }
    if config.retrieval.max_top_k < config.retrieval.default_top_k {
        anyhow::bail!("retrieval.max_top_k must be >= retrieval.default_top_k");
    }

    // Validate cache
    if !(0.0..=1.0).contains(&config.cache.semantic_threshold) {
        anyhow::bail!("cache.semantic_threshold must be in [0.0, 1.0]");
    }
    if config.cache.max_entries_per_owner == 0 {
        anyhow::bail!("cache.max_entries_per_owner must be >= 1");
    }

    // Validate embedding
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.model.is_empty() {
        anyhow::bail!("embedding.model must not be empty");
    }

    // Validate SQL engine
    if config.sql.statement_timeout_ms == 0 {
        anyhow::bail!("sql.statement_timeout_ms must be > 0");
    }
    if config.sql.max_rows == 0 {
        anyhow::bail!("sql.max_rows must be > 0");
    }
    match config.sql.provider.as_str() {
        "remote" | "local" => {}
        other => anyhow::bail!("Unknown sql.provider: '{}'. Must be remote or local.", other),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_minimal_config() {
        let file = write_config(
            r#"
[database]
url = "postgres://localhost/assistant"
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.retrieval.default_top_k, 10);
        assert_eq!(config.retrieval.max_top_k, 50);
        assert_eq!(config.cache.semantic_threshold, 0.92);
        assert_eq!(config.sql.statement_timeout_ms, 10_000);
        assert_eq!(config.sql.max_rows, 500);
        assert_eq!(config.embedding.dims, 384);
    }

    #[test]
    fn test_load_full_config() {
        let file = write_config(
            r#"
[database]
url = "postgres://db:5432/assistant"
max_connections = 10

[embedding]
url = "http://embeddings:8080"
model = "all-MiniLM-L6-v2"
dims = 384

[retrieval]
default_top_k = 5
max_top_k = 20

[cache]
semantic_threshold = 0.9
max_entries_per_owner = 50

[sql]
statement_timeout_ms = 5000
max_rows = 100
provider = "local"

[providers.local]
url = "http://ollama:11434"
model = "mistral:7b"

[providers.remote]
model = "llama-3.1-70b-versatile"
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.retrieval.default_top_k, 5);
        assert_eq!(config.cache.max_entries_per_owner, 50);
        assert_eq!(config.sql.provider, "local");
        assert_eq!(config.providers.local.model, "mistral:7b");
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let file = write_config(
            r#"
[database]
url = "postgres://localhost/assistant"

[cache]
semantic_threshold = 1.5
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("semantic_threshold"));
    }

    #[test]
    fn test_top_k_ordering_rejected() {
        let file = write_config(
            r#"
[database]
url = "postgres://localhost/assistant"

[retrieval]
default_top_k = 30
max_top_k = 20
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("max_top_k"));
    }

    #[test]
    fn test_unknown_sql_provider_rejected() {
        let file = write_config(
            r#"
[database]
url = "postgres://localhost/assistant"

[sql]
provider = "other"
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("sql.provider"));
    }

    #[test]
    fn test_missing_database_section_rejected() {
        let file = write_config("[cache]\nenabled = true\n");
        assert!(load_config(file.path()).is_err());
    }
}
