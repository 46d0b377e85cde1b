use anyhow::Result;
use sqlx::PgPool;

/// Create the content-index table and its indexes. Idempotent. Domain
/// tables belong to their own applications and are never touched here.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_index (
            id UUID PRIMARY KEY,
            owner_id BIGINT NOT NULL,
            content_type TEXT NOT NULL,
            content_id BIGINT NOT NULL,
            kind TEXT NOT NULL,
            sensitivity TEXT NOT NULL,
            searchable_text TEXT NOT NULL,
            embedding BYTEA NOT NULL,
            metadata JSONB NOT NULL DEFAULT '{}',
            tags JSONB NOT NULL DEFAULT '[]',
            reference_date DATE,
            is_indexed BOOLEAN NOT NULL DEFAULT FALSE,
            indexed_at TIMESTAMPTZ,
            embedding_model TEXT NOT NULL,
            UNIQUE(owner_id, content_type, content_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_content_index_owner \
         ON content_index(owner_id, is_indexed)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_content_index_owner_kind \
         ON content_index(owner_id, kind)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
