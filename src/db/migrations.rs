use anyhow::Context;
use rusqlite::Connection;

use crate::store::DEFAULT_RULES;

/// A named schema step. Applied once per database, tracked in `_migrations`.
pub struct Migration {
    pub name: &'static str,
    pub sql: String,
}

const DEFAULT_RULES_MIGRATION: &str = "002_default_rules";

pub fn sqlite_migrations() -> Vec<Migration> {
    vec![
        Migration {
            name: "001_schema",
            sql: include_str!("../../migrations/sqlite/001_schema.sql").to_string(),
        },
        Migration {
            name: DEFAULT_RULES_MIGRATION,
            sql: default_rules_sql(),
        },
    ]
}

pub fn postgres_migrations() -> Vec<Migration> {
    vec![
        Migration {
            name: "001_schema",
            sql: include_str!("../../migrations/postgres/001_schema.sql").to_string(),
        },
        Migration {
            name: DEFAULT_RULES_MIGRATION,
            sql: default_rules_sql(),
        },
    ]
}

/// Seed statement shared by both SQL dialects.
fn default_rules_sql() -> String {
    let values: Vec<String> = DEFAULT_RULES
        .iter()
        .map(|(day_type, name, start, end, is_blocked)| {
            format!(
                "('{}', '{}', '{}', '{}', {})",
                day_type.as_str(),
                name.replace('\'', "''"),
                start,
                end,
                if *is_blocked { "TRUE" } else { "FALSE" }
            )
        })
        .collect();
    format!(
        "INSERT INTO booking_time_rules (day_type, name, start_time, end_time, is_blocked) VALUES {};",
        values.join(", ")
    )
}

pub fn run_migrations(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .context("failed to create migrations table")?;

    for migration in sqlite_migrations() {
        let name = migration.name;

        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .context("failed to check migration status")?;

        if already_applied {
            continue;
        }

        conn.execute_batch(&migration.sql)
            .with_context(|| format!("failed to apply migration: {name}"))?;

        conn.execute("INSERT INTO _migrations (name) VALUES (?1)", [name])
            .with_context(|| format!("failed to record migration: {name}"))?;

        tracing::info!("applied migration: {name}");
    }

    Ok(())
}
