//! Engine facade: the one place that knows about tables and indexes
//! together.
//!
//! The facade exposes the public API, keeps declared indexes consistent
//! with the base tables on every write, recognizes an applicable index on
//! the read path, and owns the undo log backing the single-transaction
//! primitive. It assumes serialized calls; the buffer pool underneath is
//! shared behind one lock taken per operation.

use btree::{BPTreeIndex, IndexKey, DEFAULT_ORDER};
use buffer::{BufferPool, PoolStats};
use catalog::{Column, TableSchema};
use predicate::{exact_match, CompareOp, Filter};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use storage::PageStore;
use table::{TableInfo, TableManager};
use tracing::{debug, info, warn};

pub use btree::IndexManager;
pub use common::prelude::*;
pub use predicate::Condition;

/// Options for `select`: projection, filter, row limit, and whether the
/// facade may consult an index.
#[derive(Clone, Debug)]
pub struct SelectOptions {
    pub columns: Option<Vec<String>>,
    pub filter: Option<Filter>,
    pub limit: Option<usize>,
    pub use_index: bool,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            columns: None,
            filter: None,
            limit: None,
            use_index: true,
        }
    }
}

impl SelectOptions {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn use_index(mut self, use_index: bool) -> Self {
        self.use_index = use_index;
        self
    }
}

/// Operation counters kept by the facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct EngineStats {
    pub queries_executed: u64,
    pub records_inserted: u64,
    pub records_updated: u64,
    pub records_deleted: u64,
    pub uptime: Duration,
}

/// One inverse operation captured while a transaction is active.
#[derive(Clone, Debug)]
enum UndoEntry {
    /// Inverse of an insert: delete the exact captured record.
    Delete { table: String, matching: Filter },
    /// Inverse of a delete: re-insert the captured record.
    Insert { table: String, record: RowMap },
    /// Inverse of an update: delete by the update's filter, then re-insert
    /// the captured pre-image.
    Restore {
        table: String,
        original: RowMap,
        matching: Option<Filter>,
    },
}

impl UndoEntry {
    fn table(&self) -> &str {
        match self {
            UndoEntry::Delete { table, .. }
            | UndoEntry::Insert { table, .. }
            | UndoEntry::Restore { table, .. } => table,
        }
    }
}

/// A single-writer storage engine over one data directory.
pub struct Engine {
    config: Config,
    pool: buffer::SharedPool,
    tables: TableManager,
    indexes: IndexManager,
    tx_active: bool,
    undo_log: Vec<UndoEntry>,
    stats: EngineStats,
    started_at: Instant,
}

impl Engine {
    /// Opens (or initializes) an engine over `config.data_dir`.
    pub fn open(config: Config) -> DbResult<Self> {
        let store = PageStore::open(&config.data_dir)?;
        let pool = BufferPool::new(store, config.buffer_frames, config.eviction).into_shared();
        let tables = TableManager::open(&config.data_dir, pool.clone())?;
        let indexes = IndexManager::open(&config.data_dir, pool.clone())?;
        info!(data_dir = %config.data_dir.display(), "engine opened");
        Ok(Self {
            config,
            pool,
            tables,
            indexes,
            tx_active: false,
            undo_log: Vec::new(),
            stats: EngineStats::default(),
            started_at: Instant::now(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ---- DDL ----

    pub fn create_table(&mut self, name: &str, columns: Vec<Column>) -> DbResult<()> {
        let mut schema = TableSchema::try_new(name, columns)?;
        schema.created_at = unix_now();
        self.tables.create_table(schema)
    }

    /// Drops the table and every index declared over it.
    pub fn drop_table(&mut self, name: &str) -> DbResult<()> {
        self.tables.drop_table(name)?;
        self.indexes.drop_table_indexes(name)
    }

    pub fn add_column(&mut self, table: &str, column: Column) -> DbResult<()> {
        self.tables.add_column(table, column)
    }

    /// Drops the column; indexes covering it are dropped as well.
    pub fn drop_column(&mut self, table: &str, column: &str) -> DbResult<()> {
        for name in self.indexes.names_for_table(table) {
            let covers = self
                .indexes
                .get(&name)
                .is_some_and(|index| index.columns().iter().any(|c| c == column));
            if covers {
                warn!(index = %name, column, "dropping index with dropped column");
                self.indexes.drop_index(&name)?;
            }
        }
        self.tables.drop_column(table, column)
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.tables.list_tables()
    }

    pub fn table_info(&self, table: &str) -> DbResult<TableInfo> {
        self.tables.table_info(table)
    }

    // ---- DML ----

    /// Validates, places, and indexes one record. Unique indexes are
    /// checked before anything is written.
    pub fn insert(&mut self, table: &str, record: RowMap) -> DbResult<()> {
        let record = self.tables.prepare_record(table, record)?;

        let index_names = self.indexes.names_for_table(table);
        for name in &index_names {
            let index = self.indexes.get(name).expect("listed index exists");
            if index.is_unique() {
                let key = index.key_for(&record);
                if !index.search(&key)?.is_empty() {
                    return Err(DbError::Conflict(format!(
                        "duplicate key for unique index '{name}'"
                    )));
                }
            }
        }

        let rid = RecordId(self.tables.record_count(table)? as u64);
        self.tables.insert_prepared(table, &record)?;

        for name in &index_names {
            let index = self.indexes.get_mut(name).expect("listed index exists");
            let key = index.key_for(&record);
            index.insert(key, rid)?;
        }
        if !index_names.is_empty() {
            self.indexes.save()?;
        }

        if self.tx_active {
            self.undo_log.push(UndoEntry::Delete {
                table: table.to_string(),
                matching: exact_match(&record),
            });
        }
        self.stats.records_inserted += 1;
        Ok(())
    }

    /// Scan, filter, project, and limit. With `use_index`, an index whose
    /// leading column appears in the filter is recognized and surfaced;
    /// the read path still executes a filtered scan (the hook is for a
    /// later planner).
    pub fn select(&mut self, table: &str, options: SelectOptions) -> DbResult<Vec<RowMap>> {
        self.stats.queries_executed += 1;

        if options.use_index {
            if let Some(filter) = &options.filter {
                if let Some((index, column, op)) = self.pick_index(table, filter) {
                    debug!(%index, %column, op = op.symbol(), "index recognized for filter");
                }
            }
        }

        let mut rows = self.tables.select(
            table,
            options.filter.as_ref(),
            options.columns.as_deref(),
        )?;
        if let Some(limit) = options.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    /// Overwrites matching rows with the given values; affected indexes
    /// are rebuilt from the table afterwards. Returns the update count.
    pub fn update(
        &mut self,
        table: &str,
        values: RowMap,
        filter: Option<Filter>,
    ) -> DbResult<usize> {
        let before = if self.tx_active {
            self.tables.select(table, filter.as_ref(), None)?
        } else {
            Vec::new()
        };

        let updated = self.tables.update(table, &values, filter.as_ref())?;
        self.stats.records_updated += updated as u64;

        if self.tx_active {
            for original in before {
                self.undo_log.push(UndoEntry::Restore {
                    table: table.to_string(),
                    original,
                    matching: filter.clone(),
                });
            }
        }
        if updated > 0 {
            self.rebuild_indexes(table)?;
        }
        Ok(updated)
    }

    /// Removes matching rows; affected indexes are rebuilt from the table
    /// afterwards. Returns the delete count.
    pub fn delete(&mut self, table: &str, filter: Option<Filter>) -> DbResult<usize> {
        let before = if self.tx_active {
            self.tables.select(table, filter.as_ref(), None)?
        } else {
            Vec::new()
        };

        let deleted = self.tables.delete(table, filter.as_ref())?;
        self.stats.records_deleted += deleted as u64;

        if self.tx_active {
            for record in before {
                self.undo_log.push(UndoEntry::Insert {
                    table: table.to_string(),
                    record,
                });
            }
        }
        if deleted > 0 {
            self.rebuild_indexes(table)?;
        }
        Ok(deleted)
    }

    // ---- indexes ----

    /// Creates a B+tree index and bulk-loads every existing row, so the
    /// index is consistent with the base table from the start.
    pub fn create_index(
        &mut self,
        name: &str,
        table: &str,
        columns: &[&str],
        unique: bool,
    ) -> DbResult<()> {
        if columns.is_empty() {
            return Err(DbError::SchemaViolation(
                "index must reference at least one column".into(),
            ));
        }
        let schema = self.tables.schema(table)?;
        for column in columns {
            if !schema.has_column(column) {
                return Err(DbError::NotFound(format!(
                    "unknown column '{column}' on table '{table}'"
                )));
            }
        }

        let rows = self.tables.scan(table)?;
        let owned: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        self.indexes
            .create_index(name, table, owned, unique, DEFAULT_ORDER)?;

        let mut failure = None;
        {
            let index = self.indexes.get_mut(name).expect("index was just created");
            for (ordinal, row) in rows.iter().enumerate() {
                let key = index.key_for(row);
                if let Err(err) = index.insert(key, RecordId(ordinal as u64)) {
                    failure = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = failure {
            // undo the half-built index so the catalog stays clean
            self.indexes.drop_index(name)?;
            return Err(err);
        }
        self.indexes.save()?;
        debug!(index = name, table, "index created");
        Ok(())
    }

    pub fn drop_index(&mut self, name: &str) -> DbResult<()> {
        self.indexes.drop_index(name)
    }

    pub fn list_indexes(&self) -> Vec<String> {
        self.indexes.list()
    }

    pub fn index(&self, name: &str) -> Option<&BPTreeIndex> {
        self.indexes.get(name)
    }

    pub fn index_mut(&mut self, name: &str) -> Option<&mut BPTreeIndex> {
        self.indexes.get_mut(name)
    }

    /// Finds an index over the table whose leading column appears in the
    /// filter with a recognized operator.
    fn pick_index(&self, table: &str, filter: &Filter) -> Option<(String, String, CompareOp)> {
        for name in self.indexes.names_for_table(table) {
            let index = self.indexes.get(&name)?;
            let leading = index.columns().first()?;
            if let Some(condition) = filter.get(leading) {
                return Some((name, leading.clone(), condition.leading_op()));
            }
        }
        None
    }

    /// Rebuilds every index on the table from a fresh scan. Record ids are
    /// scan ordinals; they are opaque and never dereferenced on reads.
    fn rebuild_indexes(&mut self, table: &str) -> DbResult<()> {
        let names = self.indexes.names_for_table(table);
        if names.is_empty() {
            return Ok(());
        }
        let rows = self.tables.scan(table)?;
        for name in names {
            let index = self.indexes.get_mut(&name).expect("listed index exists");
            let entries: Vec<(IndexKey, RecordId)> = rows
                .iter()
                .enumerate()
                .map(|(ordinal, row)| (index.key_for(row), RecordId(ordinal as u64)))
                .collect();
            index.rebuild(entries)?;
        }
        self.indexes.save()
    }

    // ---- transactions ----

    /// Starts the single transaction; clears any stale undo entries.
    pub fn begin_transaction(&mut self) {
        self.tx_active = true;
        self.undo_log.clear();
        debug!("transaction started");
    }

    /// Makes the transaction's writes final by discarding the undo log.
    pub fn commit_transaction(&mut self) {
        self.tx_active = false;
        self.undo_log.clear();
        debug!("transaction committed");
    }

    /// Applies the undo log in LIFO order, restoring the state observed at
    /// `begin_transaction`. A no-op without an active transaction.
    pub fn rollback_transaction(&mut self) -> DbResult<()> {
        if !self.tx_active {
            return Ok(());
        }
        self.tx_active = false;

        let mut touched: Vec<String> = Vec::new();
        while let Some(entry) = self.undo_log.pop() {
            let table = entry.table().to_string();
            if !touched.contains(&table) {
                touched.push(table);
            }
            match entry {
                UndoEntry::Delete { table, matching } => {
                    self.tables.delete(&table, Some(&matching))?;
                }
                UndoEntry::Insert { table, record } => {
                    self.tables.insert_record(&table, record)?;
                }
                UndoEntry::Restore {
                    table,
                    original,
                    matching,
                } => {
                    self.tables.delete(&table, matching.as_ref())?;
                    self.tables.insert_record(&table, original)?;
                }
            }
        }
        for table in touched {
            self.rebuild_indexes(&table)?;
        }
        debug!("transaction rolled back");
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.tx_active
    }

    // ---- maintenance ----

    /// Writes every dirty frame back; returns how many pages were written.
    pub fn flush_all(&self) -> DbResult<usize> {
        self.pool.lock().flush_all()
    }

    /// Flushes everything and persists the index catalog, consuming the
    /// engine.
    pub fn shutdown(self) -> DbResult<()> {
        let written = self.flush_all()?;
        self.indexes.save()?;
        info!(pages_written = written, "engine shut down");
        Ok(())
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            uptime: self.started_at.elapsed(),
            ..self.stats
        }
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.lock().stats()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
