//! Versioned schema migrations for the store.

use std::fs;

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::runtime::ResolvedPaths;
use crate::store::open_connection;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

impl Migration {
    fn label(&self) -> String {
        format!("v{:03}_{}", self.version, self.name)
    }
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "baseline",
        sql: include_str!("migrations/v001_baseline.sql"),
    },
    Migration {
        version: 2,
        name: "sort_indexes",
        sql: include_str!("migrations/v002_sort_indexes.sql"),
    },
];

const LEDGER_DDL: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
);";

#[derive(Debug, Clone)]
pub struct MigrateReport {
    pub applied: Vec<AppliedMigration>,
    pub current_version: u32,
}

#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub version: u32,
    pub name: String,
}

/// Opens (creating if needed) the database at `paths.db_path` and brings it
/// to the latest schema.
pub fn run_migrations(paths: &ResolvedPaths) -> Result<MigrateReport> {
    let parent = paths
        .db_path
        .parent()
        .ok_or_else(|| anyhow!("{} has no parent directory", paths.db_path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    migrate_connection(&open_connection(&paths.db_path)?)
}

pub fn migrate_connection(connection: &Connection) -> Result<MigrateReport> {
    connection
        .execute_batch(LEDGER_DDL)
        .context("failed to create schema_migrations")?;

    let starting = current_version(connection)?;
    let mut applied = Vec::new();
    for migration in pending(starting) {
        apply(connection, migration)
            .with_context(|| format!("migration {} failed", migration.label()))?;
        info!(migration = %migration.label(), "applied migration");
        applied.push(AppliedMigration {
            version: migration.version,
            name: migration.name.to_string(),
        });
    }

    let current_version = current_version(connection)?;
    debug!(starting, current_version, "schema up to date");
    Ok(MigrateReport {
        applied,
        current_version,
    })
}

/// Migrations not yet applied to the database at `paths.db_path`. A missing
/// database counts every migration.
pub fn pending_migration_count(paths: &ResolvedPaths) -> Result<usize> {
    if !paths.db_path.is_file() {
        return Ok(MIGRATIONS.len());
    }
    let connection = open_connection(&paths.db_path)?;
    let ledger_exists = connection
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
            [],
            |_| Ok(()),
        )
        .optional()
        .context("failed to look up schema_migrations")?
        .is_some();
    if !ledger_exists {
        return Ok(MIGRATIONS.len());
    }
    Ok(pending(current_version(&connection)?).count())
}

/// Highest applied migration version, or 0 on a fresh database.
pub fn current_version(connection: &Connection) -> Result<u32> {
    let version: i64 = connection
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .context("failed to read schema version")?;
    u32::try_from(version).with_context(|| format!("schema version {version} out of range"))
}

fn pending(current: u32) -> impl Iterator<Item = &'static Migration> {
    MIGRATIONS
        .iter()
        .filter(move |migration| migration.version > current)
}

/// Runs one migration and its ledger row in a single transaction.
fn apply(connection: &Connection, migration: &Migration) -> Result<()> {
    let transaction = connection.unchecked_transaction()?;
    transaction.execute_batch(migration.sql)?;
    transaction.execute(
        "INSERT INTO schema_migrations (version, name, applied_at)
         VALUES (?1, ?2, strftime('%Y%m%d%H%M%S', 'now'))",
        params![migration.version, migration.name],
    )?;
    transaction.commit()?;
    Ok(())
}
