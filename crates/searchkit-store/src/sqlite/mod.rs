//! SQLite-backed implementation of every store trait.
//!
//! One [`SqliteStore`] owns one connection behind a mutex; clones share it.
//! Separate stores opened on the same file coordinate through SQLite itself:
//! claimers take `BEGIN IMMEDIATE` write transactions and wait on the busy
//! timeout, which serialises leasing across processes.

mod backfill;
mod dirty;
mod documents;
mod models;
mod tasks;
mod vectors;

use crate::normalize::{BasicNormalizer, TextNormalizer};
use crate::records::StoreStats;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use searchkit_core::{Clock, SearchkitError, SearchkitResult, StoreConfig, SystemClock};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};

const SCHEMA_VERSION: i64 = 2;

/// SQLite store for tasks, vectors, documents and pipeline state.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
    normalizer: Arc<dyn TextNormalizer>,
    fts5: Arc<OnceLock<bool>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("clock", &self.clock)
            .field("normalizer", &self.normalizer)
            .field("fts5", &self.fts5.get())
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open the database described by `config`, creating and migrating it.
    pub fn open(config: &StoreConfig) -> SearchkitResult<Self> {
        let busy = Duration::from_millis(config.busy_timeout_ms);
        if config.path.as_os_str() == ":memory:" {
            return Self::from_connection(open_memory()?, busy);
        }
        Self::open_path(&config.path, busy)
    }

    /// Open a database file.
    pub fn open_path(path: &Path, busy_timeout: Duration) -> SearchkitResult<Self> {
        let conn = Connection::open(path).map_err(|e| {
            SearchkitError::Store(format!("open sqlite store '{}': {e}", path.display()))
        })?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |r| r.get::<_, String>(0))
            .map_err(map_sqlite_err)?;
        Self::from_connection(conn, busy_timeout)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> SearchkitResult<Self> {
        Self::from_connection(open_memory()?, Duration::from_secs(5))
    }

    fn from_connection(conn: Connection, busy_timeout: Duration) -> SearchkitResult<Self> {
        conn.busy_timeout(busy_timeout).map_err(map_sqlite_err)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            clock: Arc::new(SystemClock),
            normalizer: Arc::new(BasicNormalizer),
            fts5: Arc::new(OnceLock::new()),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Use `clock` for every timestamp the store writes or compares.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `normalizer` for documents and keyword/trigram queries.
    pub fn with_normalizer(mut self, normalizer: Arc<dyn TextNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Whether this SQLite build has FTS5. Probed once per store.
    pub fn has_fts5(&self) -> bool {
        let conn = self.conn.lock();
        self.fts5_with(&conn)
    }

    fn fts5_with(&self, conn: &Connection) -> bool {
        *self.fts5.get_or_init(|| {
            let available = conn
                .query_row(
                    "SELECT sqlite_compileoption_used('ENABLE_FTS5')",
                    [],
                    |r| r.get::<_, i64>(0),
                )
                .map(|v| v == 1)
                .unwrap_or(false);
            if !available {
                tracing::warn!("SQLite build lacks FTS5; keyword search falls back to a table scan");
            }
            available
        })
    }

    /// Row counts for operators.
    pub fn stats(&self) -> SearchkitResult<StoreStats> {
        let now = self.now_ms();
        self.with_conn(|conn| {
            let count = |sql: &str| -> SearchkitResult<usize> {
                conn.query_row(sql, [], |r| r.get::<_, i64>(0))
                    .map(|n| n.max(0) as usize)
                    .map_err(map_sqlite_err)
            };
            let due_tasks = conn
                .query_row(
                    "SELECT COUNT(*) FROM embedding_tasks WHERE next_run_at_ms <= ?1",
                    params![now],
                    |r| r.get::<_, i64>(0),
                )
                .map_err(map_sqlite_err)?;
            Ok(StoreStats {
                tasks: count("SELECT COUNT(*) FROM embedding_tasks")?,
                due_tasks: due_tasks.max(0) as usize,
                dead_letters: count("SELECT COUNT(*) FROM embedding_dead_letters")?,
                vectors: count("SELECT COUNT(*) FROM embedding_vectors")?,
                documents: count("SELECT COUNT(*) FROM search_documents")?,
                dirty_markers: count("SELECT COUNT(*) FROM dirty_markers")?,
                models: count("SELECT COUNT(*) FROM embedding_models")?,
            })
        })
    }

    /// Run `f` on the connection. On a multi-threaded tokio runtime the lock
    /// wait and the SQLite call run under `block_in_place`, so a busy store
    /// does not hold up other tasks scheduled on the same worker.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> SearchkitResult<T>,
    ) -> SearchkitResult<T> {
        let run = || {
            let mut conn = self.conn.lock();
            f(&mut conn)
        };
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(run)
            }
            _ => run(),
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn now_ms(&self) -> i64 {
        dt_to_ms(self.clock.now())
    }

    pub(crate) fn normalizer(&self) -> &dyn TextNormalizer {
        self.normalizer.as_ref()
    }

    fn ensure_schema(&self) -> SearchkitResult<()> {
        let conn = self.conn.lock();
        ensure_migration_table(&conn)?;
        let current = current_schema_version(&conn)?;
        if current > SCHEMA_VERSION {
            return Err(SearchkitError::Store(format!(
                "sqlite schema version {current} is newer than supported {SCHEMA_VERSION}"
            )));
        }
        if current < 1 {
            apply_migration_v1(&conn)?;
            record_migration(&conn, 1, "pipeline_state_tables")?;
        }
        if current < 2 {
            apply_migration_v2(&conn)?;
            record_migration(&conn, 2, "vectors_and_documents")?;
        }
        if self.fts5_with(&conn) {
            ensure_fts_table(&conn)?;
        }
        tracing::debug!(version = SCHEMA_VERSION, "SQLite schema ready");
        Ok(())
    }
}

fn open_memory() -> SearchkitResult<Connection> {
    Connection::open_in_memory()
        .map_err(|e| SearchkitError::Store(format!("open in-memory sqlite store: {e}")))
}

pub(crate) fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub(crate) fn ms_to_dt(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub(crate) fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// `BEGIN IMMEDIATE`: the write lock is taken up front and waits on the busy
/// timeout, instead of a later read-to-write upgrade failing with `SQLITE_BUSY`.
pub(crate) fn write_tx(conn: &mut Connection) -> SearchkitResult<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(map_sqlite_err)
}

pub(crate) fn map_sqlite_err(err: rusqlite::Error) -> SearchkitError {
    SearchkitError::Store(format!("sqlite: {err}"))
}

/// `?{start}, ?{start+1}, ...` for `n` parameters.
pub(crate) fn placeholders(start: usize, n: usize) -> String {
    (start..start + n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn ensure_migration_table(conn: &Connection) -> SearchkitResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS searchkit_schema_migrations (
          version INTEGER PRIMARY KEY,
          name TEXT NOT NULL,
          applied_at_ms INTEGER NOT NULL
        );
        "#,
    )
    .map_err(|e| SearchkitError::Store(format!("init migration table: {e}")))
}

fn current_schema_version(conn: &Connection) -> SearchkitResult<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM searchkit_schema_migrations",
        [],
        |r| r.get(0),
    )
    .map_err(|e| SearchkitError::Store(format!("read schema version: {e}")))
}

fn record_migration(conn: &Connection, version: i64, name: &str) -> SearchkitResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO searchkit_schema_migrations(version, name, applied_at_ms)
         VALUES (?1, ?2, ?3)",
        params![version, name, dt_to_ms(Utc::now())],
    )
    .map_err(|e| SearchkitError::Store(format!("record migration {version}: {e}")))?;
    Ok(())
}

fn apply_migration_v1(conn: &Connection) -> SearchkitResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_tasks (
          entity_type TEXT NOT NULL,
          entity_id TEXT NOT NULL,
          model TEXT NOT NULL,
          language TEXT NOT NULL,
          reason TEXT NOT NULL,
          attempts INTEGER NOT NULL DEFAULT 0,
          next_run_at_ms INTEGER NOT NULL,
          started_at_ms INTEGER NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          PRIMARY KEY (entity_type, entity_id, model, language)
        );
        CREATE INDEX IF NOT EXISTS idx_embedding_tasks_due
          ON embedding_tasks(next_run_at_ms, entity_type, entity_id, model, language);
        CREATE INDEX IF NOT EXISTS idx_embedding_tasks_model
          ON embedding_tasks(model);

        CREATE TABLE IF NOT EXISTS embedding_dead_letters (
          entity_type TEXT NOT NULL,
          entity_id TEXT NOT NULL,
          model TEXT NOT NULL,
          language TEXT NOT NULL,
          reason TEXT NOT NULL,
          error TEXT NOT NULL,
          attempts INTEGER NOT NULL,
          failed_at_ms INTEGER NOT NULL,
          PRIMARY KEY (entity_type, entity_id, model, language)
        );

        CREATE TABLE IF NOT EXISTS embedding_models (
          name TEXT PRIMARY KEY,
          dims INTEGER NOT NULL,
          modality TEXT NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS vector_backfill_state (
          model TEXT NOT NULL,
          entity_type TEXT NOT NULL,
          language TEXT NOT NULL,
          cursor TEXT NOT NULL DEFAULT '',
          state TEXT NOT NULL,
          last_error TEXT NULL,
          updated_at_ms INTEGER NOT NULL,
          PRIMARY KEY (model, entity_type, language)
        );

        CREATE TABLE IF NOT EXISTS document_backfill_state (
          entity_type TEXT NOT NULL,
          language TEXT NOT NULL,
          cursor TEXT NOT NULL DEFAULT '',
          state TEXT NOT NULL,
          last_error TEXT NULL,
          updated_at_ms INTEGER NOT NULL,
          PRIMARY KEY (entity_type, language)
        );

        CREATE TABLE IF NOT EXISTS dirty_markers (
          entity_type TEXT NOT NULL,
          entity_id TEXT NOT NULL,
          language TEXT NOT NULL,
          is_deleted INTEGER NOT NULL DEFAULT 0,
          reason TEXT NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          PRIMARY KEY (entity_type, entity_id, language)
        );
        CREATE INDEX IF NOT EXISTS idx_dirty_markers_order
          ON dirty_markers(updated_at_ms, entity_type, entity_id, language);
        "#,
    )
    .map_err(|e| SearchkitError::Store(format!("apply migration v1: {e}")))
}

fn apply_migration_v2(conn: &Connection) -> SearchkitResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_vectors (
          entity_type TEXT NOT NULL,
          entity_id TEXT NOT NULL,
          model TEXT NOT NULL,
          language TEXT NOT NULL,
          dims INTEGER NOT NULL,
          embedding BLOB NOT NULL,
          quantized BLOB NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          PRIMARY KEY (entity_type, entity_id, model, language)
        );
        CREATE INDEX IF NOT EXISTS idx_embedding_vectors_partition
          ON embedding_vectors(model, entity_type, language);

        CREATE TABLE IF NOT EXISTS search_documents (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          entity_type TEXT NOT NULL,
          entity_id TEXT NOT NULL,
          language TEXT NOT NULL,
          raw_document TEXT NOT NULL,
          document TEXT NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          UNIQUE (entity_type, entity_id, language)
        );
        CREATE INDEX IF NOT EXISTS idx_search_documents_language
          ON search_documents(language, entity_type);
        "#,
    )
    .map_err(|e| SearchkitError::Store(format!("apply migration v2: {e}")))
}

/// Creates the FTS5 mirror of `search_documents` and fills it from existing
/// rows when it is new.
fn ensure_fts_table(conn: &Connection) -> SearchkitResult<()> {
    let exists: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'search_documents_fts'",
            [],
            |r| r.get(0),
        )
        .map_err(map_sqlite_err)?;
    if exists > 0 {
        return Ok(());
    }
    conn.execute_batch(
        r#"
        CREATE VIRTUAL TABLE search_documents_fts USING fts5(document);
        INSERT INTO search_documents_fts(rowid, document)
          SELECT id, document FROM search_documents;
        "#,
    )
    .map_err(|e| SearchkitError::Store(format!("create fts table: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_migrates() {
        let store = SqliteStore::open_in_memory().unwrap();
        let version = store
            .with_conn(|conn| current_schema_version(conn))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
        let stats = store.stats().unwrap();
        assert_eq!(stats, StoreStats::default());
    }

    #[test]
    fn test_bundled_sqlite_has_fts5() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.has_fts5());
    }

    #[test]
    fn test_reopen_file_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("search.db");
        drop(SqliteStore::open_path(&path, Duration::from_secs(1)).unwrap());
        let store = SqliteStore::open_path(&path, Duration::from_secs(1)).unwrap();
        let version = store
            .with_conn(|conn| current_schema_version(conn))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_open_from_config_memory_path() {
        let config = StoreConfig {
            path: ":memory:".into(),
            busy_timeout_ms: 100,
        };
        assert!(SqliteStore::open(&config).is_ok());
    }

    #[test]
    fn test_ms_conversion_roundtrip() {
        let now = Utc::now();
        assert_eq!(dt_to_ms(ms_to_dt(dt_to_ms(now))), dt_to_ms(now));
        assert_eq!(placeholders(3, 2), "?3, ?4");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_blocked_connection_does_not_stall_other_tasks() {
        let store = SqliteStore::open_in_memory().unwrap();
        let holder_store = store.clone();
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _conn = holder_store.conn.lock();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(400));
        });
        locked_rx.recv().unwrap();

        // Occupies the only worker until the holder releases the connection.
        let waiting = tokio::spawn({
            let store = store.clone();
            async move { store.stats() }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        tokio::spawn(async {}).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(200));

        assert_eq!(waiting.await.unwrap().unwrap(), StoreStats::default());
        holder.join().unwrap();
    }
}
