pub mod migrations;

use std::sync::Arc;

use anyhow::Context;
use rusqlite::Connection;

use crate::store::memory::MemoryStore;
use crate::store::postgres::PostgresStore;
use crate::store::sqlite::SqliteStore;
use crate::store::Store;

pub fn init_db(path: &str) -> anyhow::Result<Connection> {
    let conn = Connection::open(path).context("failed to open database")?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")
        .context("failed to set database pragmas")?;

    migrations::run_migrations(&conn)?;

    Ok(conn)
}

/// Opens the backend named by `url`: `postgres://` and `postgresql://` select
/// PostgreSQL, `memory` the in-process store, anything else a SQLite file.
pub async fn connect(url: &str) -> anyhow::Result<Arc<dyn Store>> {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let store = PostgresStore::connect(url).await?;
        return Ok(Arc::new(store));
    }
    if url == "memory" {
        return Ok(Arc::new(MemoryStore::new()));
    }

    let path = url.strip_prefix("sqlite://").unwrap_or(url);
    let conn = init_db(path)?;
    Ok(Arc::new(SqliteStore::new(conn)))
}
