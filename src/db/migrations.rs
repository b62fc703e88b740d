use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    if current_version < 2 {
        debug!("Running migration v2");
        run_migration_v2(pool).await?;
        set_schema_version(pool, 2).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM _schema_version")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: creating screenshots table");

    // Set-valued fields are stored as JSON arrays.
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS screenshots (
            id TEXT PRIMARY KEY NOT NULL,
            workspace_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            url TEXT NOT NULL,
            selector TEXT,
            width INTEGER NOT NULL,
            height INTEGER NOT NULL,
            is_mobile INTEGER NOT NULL DEFAULT 0,
            is_landscape INTEGER NOT NULL DEFAULT 0,
            has_touch INTEGER NOT NULL DEFAULT 0,
            device_scale_factor REAL NOT NULL DEFAULT 1,
            format TEXT NOT NULL DEFAULT 'jpeg',
            block_ads INTEGER NOT NULL DEFAULT 0,
            block_cookie_banners INTEGER NOT NULL DEFAULT 0,
            block_trackers INTEGER NOT NULL DEFAULT 0,
            block_requests TEXT NOT NULL DEFAULT '[]',
            block_resources TEXT NOT NULL DEFAULT '[]',
            prefers_color_scheme TEXT NOT NULL DEFAULT 'light',
            prefers_reduced_motion TEXT NOT NULL DEFAULT 'no-preference',
            is_cached INTEGER NOT NULL DEFAULT 0,
            cache_ttl INTEGER NOT NULL DEFAULT 3600,
            cache_key TEXT,
            duration REAL,
            error_message TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create screenshots table")?;

    Ok(())
}

async fn run_migration_v2(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v2: adding lookup index");

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_screenshots_lookup
        ON screenshots(workspace_id, url, status, created_at)
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create screenshots lookup index")?;

    Ok(())
}
