//! SQLite mirror of the session state and the admin token.
//!
//! Entities are stored as JSON payloads with their position in the source
//! collection, so a restored store projects queues in the same order.
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::{debug, instrument};

use crate::store::{Entity, Snapshot};

pub type Pool = SqlitePool;

const TOKEN_KEY: &str = "api_token";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database URL {}", database_url))?
        .create_if_missing(true);

    if normalized.starts_with("sqlite::memory") {
        // Every in-memory connection is its own database: keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        return Ok(pool);
    }

    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous=FULL;").execute(&pool).await?;
    Ok(pool)
}

/// Expand a leading `~/` in a file-backed SQLite URL and create its parent
/// directory. In-memory and non-sqlite URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{}?{}", path, q),
        None => format!("sqlite://{}", path),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

async fn replace_rows<T: Entity + Serialize>(
    tx: &mut Transaction<'_, Sqlite>,
    table: &'static str,
    items: &[T],
) -> Result<()> {
    sqlx::query(&format!("DELETE FROM {}", table))
        .execute(&mut **tx)
        .await?;
    let insert = format!(
        "INSERT INTO {} (id, position, payload) VALUES (?, ?, ?)",
        table
    );
    for (position, item) in items.iter().enumerate() {
        sqlx::query(&insert)
            .bind(item.id())
            .bind(position as i64)
            .bind(serde_json::to_string(item)?)
            .execute(&mut **tx)
            .await
            .with_context(|| format!("failed to cache {} row {}", table, item.id()))?;
    }
    Ok(())
}

async fn read_rows<T: DeserializeOwned>(pool: &Pool, table: &'static str) -> Result<Vec<T>> {
    let payloads = sqlx::query_scalar::<_, String>(&format!(
        "SELECT payload FROM {} ORDER BY position",
        table
    ))
    .fetch_all(pool)
    .await?;
    payloads
        .iter()
        .map(|p| serde_json::from_str(p).with_context(|| format!("corrupt {} row", table)))
        .collect()
}

/// Replace the cached state with `snapshot` in one transaction.
#[instrument(skip_all)]
pub async fn save_snapshot(pool: &Pool, snapshot: &Snapshot) -> Result<()> {
    let mut tx = pool.begin().await?;
    replace_rows(&mut tx, "caddies", &snapshot.caddies).await?;
    replace_rows(&mut tx, "turns", &snapshot.turns).await?;
    replace_rows(&mut tx, "attendance", &snapshot.attendance).await?;

    sqlx::query("DELETE FROM list_settings")
        .execute(&mut *tx)
        .await?;
    for settings in &snapshot.settings {
        sqlx::query("INSERT INTO list_settings (list_number, payload) VALUES (?, ?)")
            .bind(i64::from(settings.list_number.get()))
            .bind(serde_json::to_string(settings)?)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    debug!(
        caddies = snapshot.caddies.len(),
        turns = snapshot.turns.len(),
        attendance = snapshot.attendance.len(),
        "snapshot cached"
    );
    Ok(())
}

/// The cached state, or `None` when nothing has been cached yet.
#[instrument(skip_all)]
pub async fn load_snapshot(pool: &Pool) -> Result<Option<Snapshot>> {
    let snapshot = Snapshot {
        caddies: read_rows(pool, "caddies").await?,
        turns: read_rows(pool, "turns").await?,
        attendance: read_rows(pool, "attendance").await?,
        settings: {
            let payloads = sqlx::query_scalar::<_, String>(
                "SELECT payload FROM list_settings ORDER BY list_number",
            )
            .fetch_all(pool)
            .await?;
            payloads
                .iter()
                .map(|p| serde_json::from_str(p).context("corrupt list_settings row"))
                .collect::<Result<Vec<_>>>()?
        },
    };
    if snapshot == Snapshot::default() {
        return Ok(None);
    }
    Ok(Some(snapshot))
}

pub async fn save_token(pool: &Pool, token: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO session_kv (key, value) VALUES (?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(TOKEN_KEY)
    .bind(token)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_token(pool: &Pool) -> Result<Option<String>> {
    let token = sqlx::query_scalar::<_, String>("SELECT value FROM session_kv WHERE key = ?")
        .bind(TOKEN_KEY)
        .fetch_optional(pool)
        .await?;
    Ok(token)
}

/// Forget everything: cached entities, settings and the token.
#[instrument(skip_all)]
pub async fn clear(pool: &Pool) -> Result<()> {
    let mut tx = pool.begin().await?;
    for table in ["caddies", "turns", "attendance", "list_settings", "session_kv"] {
        sqlx::query(&format!("DELETE FROM {}", table))
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_urls_pass_through() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("postgres://localhost/db"),
            "postgres://localhost/db"
        );
    }

    #[test]
    fn file_urls_are_normalized_and_parent_created() {
        let td = tempfile::tempdir().unwrap();
        let file = td.path().join("nested").join("cache.db");
        let url = format!("sqlite:{}?mode=rwc", file.display());
        let prepared = prepare_sqlite_url(&url);
        assert_eq!(prepared, format!("sqlite://{}?mode=rwc", file.display()));
        assert!(td.path().join("nested").is_dir());
    }
}
