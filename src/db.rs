//! Local SQLite layer for the ledger engine.
//!
//! Uses rusqlite with WAL mode. Sale and service documents are stored as full
//! JSON blobs (`record_json`) whose field names are the wire contract with
//! the remote document store, alongside normalized columns for the query
//! contract (equality on date and status, ordered by `timestamp`). Provides
//! schema migrations, settings helpers, and the sync-outbox enqueue used by
//! every state-changing operation.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{EngineError, EngineResult};

/// Shared state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Lock the connection, mapping a poisoned mutex to a store error.
    pub(crate) fn lock(&self) -> EngineResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| EngineError::store(format!("connection lock poisoned: {e}")))
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Initialize the database at `{data_dir}/ledger.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> EngineResult<DbState> {
    fs::create_dir_all(data_dir)
        .map_err(|e| EngineError::store(format!("create data dir: {e}")))?;

    let db_path = data_dir.join("ledger.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                // Also remove WAL/SHM files if present
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)
                .map_err(|e| EngineError::store(format!("database open failed after retry: {e}")))?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> EngineResult<Connection> {
    let conn =
        Connection::open(path).map_err(|e| EngineError::store(format!("sqlite open: {e}")))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| EngineError::store(format!("pragma setup: {e}")))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> EngineResult<()> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| EngineError::store(format!("create schema_version: {e}")))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Migration v1: settings, sales, and the sync outbox.
fn migrate_v1(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(
        "
        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        -- sales: one row per completed transaction, wire document in record_json
        CREATE TABLE IF NOT EXISTS sales (
            id TEXT PRIMARY KEY,
            category TEXT NOT NULL CHECK (category IN ('device', 'accessory')),
            sale_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'completed',
            transaction_type TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            balance_unpaid INTEGER NOT NULL DEFAULT 0,
            record_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- sync_queue (append-only outbox drained by the sync collaborator)
        CREATE TABLE IF NOT EXISTS sync_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            payload TEXT NOT NULL,
            idempotency_key TEXT UNIQUE NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            retry_count INTEGER DEFAULT 0,
            last_error TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            synced_at TEXT
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_sales_date_status ON sales(sale_date, status);
        CREATE INDEX IF NOT EXISTS idx_sales_category ON sales(category);
        CREATE INDEX IF NOT EXISTS idx_sales_balance_unpaid ON sales(balance_unpaid);
        CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status);
        CREATE INDEX IF NOT EXISTS idx_local_settings_cat_key ON local_settings(setting_category, setting_key);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        EngineError::store(format!("migration v1: {e}"))
    })?;

    info!("Applied migration v1 (settings, sales, sync_queue)");
    Ok(())
}

/// Migration v2: service ledger and daily reconciliation snapshots.
fn migrate_v2(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(
        "
        -- service_entries: credit/debit ledger rows feeding reconciliation
        CREATE TABLE IF NOT EXISTS service_entries (
            id TEXT PRIMARY KEY,
            entry_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'completed',
            entry_type TEXT NOT NULL CHECK (entry_type IN ('credit', 'debit')),
            amount REAL NOT NULL DEFAULT 0,
            timestamp INTEGER NOT NULL,
            record_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        -- daily_summaries: one snapshot per calendar date, full overwrite on re-save
        CREATE TABLE IF NOT EXISTS daily_summaries (
            report_date TEXT PRIMARY KEY,
            display_date TEXT NOT NULL,
            generated_at TEXT NOT NULL,
            generated_by TEXT NOT NULL,
            -- Normalized totals for efficient queries
            transaction_count INTEGER NOT NULL DEFAULT 0,
            total_product_sales REAL NOT NULL DEFAULT 0,
            total_revenue REAL NOT NULL DEFAULT 0,
            total_receivables REAL NOT NULL DEFAULT 0,
            -- Full wire document
            report_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_service_entries_date_status
            ON service_entries(entry_date, status);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        EngineError::store(format!("migration v2: {e}"))
    })?;

    info!("Applied migration v2 (service_entries, daily_summaries)");
    Ok(())
}

/// Migration v3: manual sort rank on sales. 0 means unranked, so existing
/// rows need no backfill.
fn migrate_v3(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(
        "
        ALTER TABLE sales ADD COLUMN sort_order INTEGER NOT NULL DEFAULT 0;

        CREATE INDEX IF NOT EXISTS idx_sales_date_sort
            ON sales(sale_date, sort_order);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (3);
        ",
    )
    .map_err(|e| {
        error!("Migration v3 failed: {e}");
        EngineError::store(format!("migration v3: {e}"))
    })?;

    info!("Applied migration v3 (sales.sort_order)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(
    conn: &Connection,
    category: &str,
    key: &str,
    value: &str,
) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| EngineError::store(format!("set_setting: {e}")))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Sync outbox
// ---------------------------------------------------------------------------

/// Enqueue a wire document for the sync collaborator. Callers invoke this
/// inside the same transaction as the local write so the outbox never drifts
/// from table state.
pub(crate) fn enqueue_sync(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
    operation: &str,
    payload: &serde_json::Value,
    idempotency_key: &str,
) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO sync_queue (entity_type, entity_id, operation, payload, idempotency_key)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            entity_type,
            entity_id,
            operation,
            payload.to_string(),
            idempotency_key
        ],
    )
    .map_err(|e| EngineError::store(format!("enqueue {entity_type} sync: {e}")))?;
    Ok(())
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

/// Open an in-memory store with pragmas and migrations applied (test helper).
#[cfg(test)]
pub(crate) fn test_db() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    run_migrations_for_test(&conn);
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
