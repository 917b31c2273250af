// Durable record store: JSONL logs per scope with a SQLite cache

use crate::filter::Filter;
use crate::jsonl::{self, Entry, LogMark};
use crate::models::now_ms;
use crate::record::{IndexValue, Record, Scope};
use eyre::{Context, Result, eyre};
use fs2::FileExt;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const CURRENT_VERSION: u32 = 1;
const DB_FILE: &str = "pomotrack.db";
const LOCK_FILE: &str = ".lock";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Persistent record store with a SQLite cache and JSONL source of truth
///
/// Every write goes through [`Store::transaction`], which serializes writers of
/// the same scope across threads and processes with an exclusive file lock and
/// commits the SQLite cache only after the JSONL log is on disk. A commit that
/// fails part way cuts every log it touched back to its previous length.
pub struct Store {
    base_path: PathBuf,
    db: Connection,
}

impl Store {
    /// Open or create a store rooted at the given directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();

        for scope in [Scope::Sync, Scope::Local] {
            fs::create_dir_all(base_path.join(scope.dir_name())).context("Failed to create store directory")?;
        }

        let db_path = base_path.join(DB_FILE);
        let db = Connection::open(&db_path).context("Failed to open SQLite database")?;
        db.busy_timeout(BUSY_TIMEOUT)?;

        let store = Self { base_path, db };
        store.create_schema()?;
        store.write_version()?;

        debug!(path = ?store.base_path, "Opened store");
        Ok(store)
    }

    /// Get the root directory of this store
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn create_schema(&self) -> Result<()> {
        debug!("Creating database schema");

        self.db.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (collection, id)
            );

            CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection);

            CREATE TABLE IF NOT EXISTS record_indexes (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                field_name TEXT NOT NULL,
                field_value_str TEXT,
                field_value_int INTEGER,
                field_value_bool INTEGER,
                PRIMARY KEY (collection, id, field_name)
            );

            CREATE INDEX IF NOT EXISTS idx_record_indexes_field_str ON record_indexes(collection, field_name, field_value_str);
            CREATE INDEX IF NOT EXISTS idx_record_indexes_field_int ON record_indexes(collection, field_name, field_value_int);

            -- File mtimes seen at the last write or rebuild, for staleness detection
            CREATE TABLE IF NOT EXISTS sync_metadata (
                collection TEXT PRIMARY KEY,
                last_sync_time INTEGER NOT NULL,
                file_mtime INTEGER NOT NULL
            );

            -- Highest updated_at written to each log, so stamps never run backwards
            CREATE TABLE IF NOT EXISTS log_stamps (
                collection TEXT PRIMARY KEY,
                high_water INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(())
    }

    fn write_version(&self) -> Result<()> {
        let version_path = self.base_path.join(".version");
        if !version_path.exists() {
            fs::write(version_path, CURRENT_VERSION.to_string())?;
        }
        Ok(())
    }

    fn collection_path(&self, scope: Scope, collection: &str) -> PathBuf {
        self.base_path.join(scope.dir_name()).join(format!("{}.jsonl", collection))
    }

    /// Take the exclusive write lock of a scope. Released when the file drops.
    fn lock_scope(&self, scope: Scope) -> Result<File> {
        let lock_path = self.base_path.join(scope.dir_name()).join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;
        file.lock_exclusive().context("Failed to acquire scope lock")?;
        Ok(file)
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Run a read-modify-write over one scope atomically
    ///
    /// The closure sees a consistent view and its writes are all-or-nothing: if
    /// it returns an error nothing reaches the JSONL log or the cache.
    pub fn transaction<R, F>(&mut self, scope: Scope, f: F) -> Result<R>
    where
        F: FnOnce(&mut Txn<'_>) -> Result<R>,
    {
        let _lock = self.lock_scope(scope)?;
        let base_path = &self.base_path;
        let tx = self
            .db
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin store transaction")?;

        let mut txn = Txn {
            tx,
            base_path,
            scope,
            pending: Vec::new(),
            last_stamp: 0,
        };

        let result = f(&mut txn)?;
        txn.commit()?;
        Ok(result)
    }

    // ========================================================================
    // Record API
    // ========================================================================

    /// Get a record by ID
    pub fn get<T: Record>(&self, id: &str) -> Result<Option<T>> {
        fetch(&self.db, id)
    }

    /// List records with optional filtering, ordered by ID
    pub fn list<T: Record>(&self, filters: &[Filter]) -> Result<Vec<T>> {
        query(&self.db, filters)
    }

    /// Create or replace a record
    pub fn put<T: Record>(&mut self, record: &T) -> Result<()> {
        self.transaction(T::scope(), |txn| txn.put(record))
    }

    /// Delete a record. Returns false if it did not exist.
    pub fn delete<T: Record>(&mut self, id: &str) -> Result<bool> {
        self.transaction(T::scope(), |txn| txn.delete::<T>(id))
    }

    /// Read a record, transform it and write the result back atomically
    pub fn modify<T, F>(&mut self, id: &str, f: F) -> Result<T>
    where
        T: Record,
        F: FnOnce(Option<T>) -> Result<T>,
    {
        self.transaction(T::scope(), |txn| {
            let current = txn.get::<T>(id)?;
            let next = f(current)?;
            txn.put(&next)?;
            Ok(next)
        })
    }

    // ========================================================================
    // Sync operations
    // ========================================================================

    /// Check whether a collection's JSONL log changed behind the cache's back
    pub fn is_stale<T: Record>(&self) -> Result<bool> {
        let collection = T::collection_name();
        let path = self.collection_path(T::scope(), collection);
        if !path.exists() {
            return Ok(false);
        }

        let file_mtime = file_mtime_ms(&path)?;
        let stored_mtime: Option<i64> = self
            .db
            .query_row(
                "SELECT file_mtime FROM sync_metadata WHERE collection = ?1",
                [collection],
                |row| row.get(0),
            )
            .optional()?;

        Ok(match stored_mtime {
            None => true,
            Some(mtime) => file_mtime > mtime,
        })
    }

    /// Rebuild a collection from its log if it is stale. Returns true if it was.
    pub fn refresh<T: Record>(&mut self) -> Result<bool> {
        if !self.is_stale::<T>()? {
            return Ok(false);
        }
        info!(collection = T::collection_name(), "Cache is stale, rebuilding from JSONL");
        self.sync_collection::<T>()?;
        Ok(true)
    }

    /// Rebuild the cached rows and indexes of one collection from its JSONL log
    ///
    /// Entries that don't deserialize to `T` are skipped with a warning.
    /// Returns the number of live records loaded.
    pub fn sync_collection<T: Record>(&mut self) -> Result<usize> {
        let collection = T::collection_name();
        validate_collection_name(collection)?;
        let path = self.collection_path(T::scope(), collection);

        self.transaction(T::scope(), |txn| {
            txn.tx
                .execute("DELETE FROM record_indexes WHERE collection = ?1", [collection])?;
            txn.tx.execute("DELETE FROM records WHERE collection = ?1", [collection])?;

            let entries = jsonl::read_latest(&path)?;
            let high_water = entries.values().map(|entry| entry.updated_at).max().unwrap_or(0);
            txn.tx.execute(
                "INSERT OR REPLACE INTO log_stamps (collection, high_water) VALUES (?1, ?2)",
                rusqlite::params![collection, high_water],
            )?;

            let mut count = 0;
            for (id, entry) in entries {
                if entry.deleted {
                    continue;
                }

                let record: T = match serde_json::from_value(entry.data.clone()) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(
                            collection = collection,
                            id = &id,
                            error = ?e,
                            "Skipping entry that doesn't match type"
                        );
                        continue;
                    }
                };

                upsert_row(
                    &txn.tx,
                    collection,
                    &id,
                    &entry.data.to_string(),
                    entry.updated_at,
                    &record.indexed_fields(),
                )?;
                count += 1;
            }

            record_sync_metadata(&txn.tx, collection, &path)?;
            debug!(collection, count, "Rebuilt collection");
            Ok(count)
        })
    }
}

/// An open read-modify-write transaction over one scope
pub struct Txn<'a> {
    tx: Transaction<'a>,
    base_path: &'a Path,
    scope: Scope,
    pending: Vec<(&'static str, Entry)>,
    last_stamp: i64,
}

impl Txn<'_> {
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Reads are not restricted to the transaction's scope
    pub fn get<T: Record>(&self, id: &str) -> Result<Option<T>> {
        fetch(&self.tx, id)
    }

    pub fn list<T: Record>(&self, filters: &[Filter]) -> Result<Vec<T>> {
        query(&self.tx, filters)
    }

    pub fn put<T: Record>(&mut self, record: &T) -> Result<()> {
        self.check_scope::<T>()?;
        let collection = T::collection_name();
        validate_collection_name(collection)?;

        let id = record.id();
        validate_id(&id)?;

        let data = serde_json::to_value(record).context("Failed to serialize record")?;
        let updated_at = self.stamp(collection)?;

        upsert_row(
            &self.tx,
            collection,
            &id,
            &data.to_string(),
            updated_at,
            &record.indexed_fields(),
        )?;
        self.pending.push((collection, Entry::live(id, updated_at, data)));
        Ok(())
    }

    pub fn delete<T: Record>(&mut self, id: &str) -> Result<bool> {
        self.check_scope::<T>()?;
        let collection = T::collection_name();

        let existed = remove_row(&self.tx, collection, id)?;
        if existed {
            let updated_at = self.stamp(collection)?;
            self.pending.push((collection, Entry::tombstone(id.to_string(), updated_at)));
        }
        Ok(existed)
    }

    fn check_scope<T: Record>(&self) -> Result<()> {
        if T::scope() != self.scope {
            return Err(eyre!(
                "Cannot write {} ({} scope) inside a {} scope transaction",
                T::collection_name(),
                T::scope(),
                self.scope
            ));
        }
        Ok(())
    }

    // Strictly above anything already in the collection's log, even if the wall clock stepped back
    fn stamp(&mut self, collection: &str) -> Result<i64> {
        let high_water: Option<i64> = self
            .tx
            .query_row(
                "SELECT high_water FROM log_stamps WHERE collection = ?1",
                [collection],
                |row| row.get(0),
            )
            .optional()?;

        let stamp = now_ms()
            .max(self.last_stamp + 1)
            .max(high_water.map_or(0, |h| h + 1));
        self.tx.execute(
            "INSERT OR REPLACE INTO log_stamps (collection, high_water) VALUES (?1, ?2)",
            rusqlite::params![collection, stamp],
        )?;
        self.last_stamp = stamp;
        Ok(stamp)
    }

    fn commit(self) -> Result<()> {
        let Txn {
            tx,
            base_path,
            scope,
            pending,
            ..
        } = self;

        let mut by_collection: Vec<(&'static str, Vec<Entry>)> = Vec::new();
        for (collection, entry) in pending {
            match by_collection.iter_mut().find(|(c, _)| *c == collection) {
                Some((_, entries)) => entries.push(entry),
                None => by_collection.push((collection, vec![entry])),
            }
        }

        let mut marks = Vec::with_capacity(by_collection.len());
        let result = append_logs(&tx, base_path, scope, &by_collection, &mut marks)
            .and_then(|()| tx.commit().context("Failed to commit store transaction"));

        if let Err(e) = result {
            for mark in marks.iter().rev() {
                if let Err(rewind_err) = mark.rewind() {
                    warn!(file = ?mark.path(), error = ?rewind_err, "Failed to rewind log after aborted commit");
                }
            }
            warn!(%scope, logs = marks.len(), "Commit failed, rewound logs");
            return Err(e);
        }
        Ok(())
    }
}

/// Append each collection's entries, marking every log before it is touched
fn append_logs(
    tx: &Transaction<'_>,
    base_path: &Path,
    scope: Scope,
    by_collection: &[(&'static str, Vec<Entry>)],
    marks: &mut Vec<LogMark>,
) -> Result<()> {
    for (collection, entries) in by_collection {
        let path = base_path.join(scope.dir_name()).join(format!("{}.jsonl", collection));
        marks.push(LogMark::take(&path)?);
        jsonl::append_entries(&path, entries)?;
        record_sync_metadata(tx, collection, &path)?;
    }
    Ok(())
}

// ============================================================================
// Row helpers (shared by the store and open transactions)
// ============================================================================

fn fetch<T: Record>(conn: &Connection, id: &str) -> Result<Option<T>> {
    let collection = T::collection_name();

    let json: Option<String> = conn
        .query_row(
            "SELECT data_json FROM records WHERE collection = ?1 AND id = ?2",
            rusqlite::params![collection, id],
            |row| row.get(0),
        )
        .optional()?;

    match json {
        Some(json) => {
            let record: T = serde_json::from_str(&json).context("Failed to deserialize record from database")?;
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

fn query<T: Record>(conn: &Connection, filters: &[Filter]) -> Result<Vec<T>> {
    let collection = T::collection_name();

    let mut sql = String::from(
        "SELECT r.data_json
         FROM records r
         WHERE r.collection = ?1",
    );

    for (i, filter) in filters.iter().enumerate() {
        validate_field_name(&filter.field)?;

        let alias = format!("idx{}", i);
        let column = match filter.value {
            IndexValue::String(_) => "field_value_str",
            IndexValue::Int(_) => "field_value_int",
            IndexValue::Bool(_) => "field_value_bool",
        };
        sql.push_str(&format!(
            " AND EXISTS (
                SELECT 1 FROM record_indexes {a}
                WHERE {a}.collection = r.collection
                  AND {a}.id = r.id
                  AND {a}.field_name = ?{name_param}
                  AND {a}.{column} {op} ?{value_param})",
            a = alias,
            name_param = i + 2,
            column = column,
            op = filter.op.to_sql(),
            value_param = i + 2 + filters.len(),
        ));
    }

    sql.push_str(" ORDER BY r.id ASC");

    // Bind parameters: collection, then field names, then values
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    params.push(Box::new(collection.to_string()));
    for filter in filters {
        params.push(Box::new(filter.field.clone()));
    }
    for filter in filters {
        match &filter.value {
            IndexValue::String(s) => params.push(Box::new(s.clone())),
            IndexValue::Int(i) => params.push(Box::new(*i)),
            IndexValue::Bool(b) => params.push(Box::new(*b as i64)),
        }
    }
    let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_refs.as_slice(), |row| row.get::<_, String>(0))?;

    let mut results = Vec::new();
    for row_result in rows {
        let data_json = row_result?;
        let record: T = serde_json::from_str(&data_json).context("Failed to deserialize record")?;
        results.push(record);
    }

    Ok(results)
}

fn upsert_row(
    conn: &Connection,
    collection: &str,
    id: &str,
    data_json: &str,
    updated_at: i64,
    fields: &HashMap<String, IndexValue>,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO records (collection, id, data_json, updated_at)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![collection, id, data_json, updated_at],
    )?;

    conn.execute(
        "DELETE FROM record_indexes WHERE collection = ?1 AND id = ?2",
        rusqlite::params![collection, id],
    )?;

    for (field_name, value) in fields {
        validate_field_name(field_name)?;

        let (s, i, b): (Option<&str>, Option<i64>, Option<i64>) = match value {
            IndexValue::String(s) => (Some(s.as_str()), None, None),
            IndexValue::Int(i) => (None, Some(*i), None),
            IndexValue::Bool(b) => (None, None, Some(*b as i64)),
        };
        conn.execute(
            "INSERT INTO record_indexes (collection, id, field_name, field_value_str, field_value_int, field_value_bool)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![collection, id, field_name, s, i, b],
        )?;
    }

    Ok(())
}

fn remove_row(conn: &Connection, collection: &str, id: &str) -> Result<bool> {
    conn.execute(
        "DELETE FROM record_indexes WHERE collection = ?1 AND id = ?2",
        rusqlite::params![collection, id],
    )?;
    let removed = conn.execute(
        "DELETE FROM records WHERE collection = ?1 AND id = ?2",
        rusqlite::params![collection, id],
    )?;
    Ok(removed > 0)
}

fn record_sync_metadata(conn: &Connection, collection: &str, path: &Path) -> Result<()> {
    let file_mtime = if path.exists() { file_mtime_ms(path)? } else { 0 };
    conn.execute(
        "INSERT OR REPLACE INTO sync_metadata (collection, last_sync_time, file_mtime)
         VALUES (?1, ?2, ?3)",
        rusqlite::params![collection, now_ms(), file_mtime],
    )?;
    Ok(())
}

fn file_mtime_ms(path: &Path) -> Result<i64> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0))
}

fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(eyre!("Collection name cannot be empty"));
    }
    if name.len() > 64 {
        return Err(eyre!("Collection name too long: {} (max 64 chars)", name));
    }
    if !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
        return Err(eyre!(
            "Invalid collection name: {} (must be alphanumeric with _/-)",
            name
        ));
    }
    Ok(())
}

fn validate_field_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(eyre!("Field name cannot be empty"));
    }
    if name.len() > 64 {
        return Err(eyre!("Field name too long: {} (max 64 chars)", name));
    }
    if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(eyre!("Invalid field name: {} (must be alphanumeric with _)", name));
    }
    Ok(())
}

fn validate_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(eyre!("Record ID cannot be empty or whitespace-only"));
    }
    if id.len() > 256 {
        return Err(eyre!("Record ID too long: {} chars (max 256)", id.len()));
    }
    Ok(())
}
