use anyhow::Result;
use sqlx::SqlitePool;

/// Create the nomenclature and catalog tables. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nomenclature (
            ncm_code TEXT PRIMARY KEY,
            description TEXT NOT NULL,
            section TEXT NOT NULL DEFAULT '',
            chapter TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nomenclature_vectors (
            ncm_code TEXT PRIMARY KEY,
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            FOREIGN KEY (ncm_code) REFERENCES nomenclature(ncm_code)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            provider_id TEXT NOT NULL,
            sku TEXT NOT NULL,
            customs_description TEXT NOT NULL,
            ncm_code TEXT NOT NULL,
            use_count INTEGER NOT NULL DEFAULT 0,
            last_used_at INTEGER NOT NULL DEFAULT 0,
            UNIQUE(provider_id, sku)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='nomenclature_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE nomenclature_fts USING fts5(
                ncm_code UNINDEXED,
                description,
                tokenize = 'porter unicode61'
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_catalog_provider_sku ON catalog_entries(provider_id, sku)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_nomenclature_chapter ON nomenclature(chapter)")
        .execute(pool)
        .await?;

    Ok(())
}
