//! Storage layer: SQLite pool setup, schema migrations and row models
//! for the persisted vector index.

pub mod models;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let mut url = database_url.to_string();
    if !database_url.starts_with("sqlite:") {
        let path = std::path::PathBuf::from(database_url);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let norm = path.to_string_lossy().replace('\\', "/");
        if path.is_absolute() {
            url = format!("sqlite:///{}", norm.trim_start_matches('/'));
        } else {
            url = format!("sqlite://{}", norm);
        }
    }
    let in_memory = url.contains("memory");
    let mut options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
    if !in_memory {
        // WAL lets query-time readers proceed while another connection writes.
        options = options.journal_mode(SqliteJournalMode::Wal);
    }
    let mut opts = SqlitePoolOptions::new();
    if in_memory {
        opts = opts.max_connections(1);
    } else {
        opts = opts.max_connections(5);
    }
    let pool = opts.connect_with(options).await?;
    tracing::debug!(url = %url, "sqlite pool ready");
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    // Idempotent; applies crates/storage/migrations.
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
