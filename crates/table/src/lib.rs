//! Table manager: schemas, record validation, and record placement across
//! data pages.
//!
//! Records are JSON-encoded column→value maps packed into fixed pages with
//! length-prefix framing. Insertion walks the table's page list first-fit;
//! updates and deletes repack a page wholesale whenever any of its records
//! changed. Every page access goes through the shared buffer pool, locked
//! once per operation.


use buffer::{BufferPool, SharedPool};
use catalog::{Catalog, Column, TableSchema};
use common::{DbError, DbResult, PageId, RowMap};
use predicate::{matches_record, Filter};
use std::path::{Path, PathBuf};
use storage::{PageKind, DATA_SIZE, RECORD_PREFIX};
use tracing::{debug, warn};

const SCHEMA_FILE: &str = "table_schemas.json";

/// Summary returned by `table_info`.
#[derive(Clone, Debug)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Option<String>,
    pub page_count: usize,
    pub record_count: usize,
    pub created_at: u64,
}

/// Owns the catalog and executes record-level operations against the pool.
#[derive(Debug)]
pub struct TableManager {
    catalog: Catalog,
    catalog_path: PathBuf,
    pool: SharedPool,
}

impl TableManager {
    /// Loads the catalog side-file from `data_dir` (empty when absent).
    pub fn open(data_dir: &Path, pool: SharedPool) -> DbResult<Self> {
        let catalog_path = data_dir.join(SCHEMA_FILE);
        let catalog = Catalog::load(&catalog_path)?;
        Ok(Self {
            catalog,
            catalog_path,
            pool,
        })
    }

    pub fn schema(&self, table: &str) -> DbResult<&TableSchema> {
        self.catalog.table(table)
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.catalog.table_names()
    }

    fn save_catalog(&self) -> DbResult<()> {
        self.catalog.save(&self.catalog_path)
    }

    /// Registers the schema and eagerly creates the table's first data page.
    pub fn create_table(&mut self, schema: TableSchema) -> DbResult<()> {
        let name = schema.name.clone();
        self.catalog.create_table(schema)?;

        let mut pool = self.pool.lock();
        let first = pool.create_page(PageKind::Data)?.id();
        pool.unpin_page(first, true);
        drop(pool);

        self.catalog.push_page(&name, first)?;
        self.save_catalog()?;
        debug!(table = %name, page = first.0, "created table");
        Ok(())
    }

    /// Detaches the table from the catalog. Page files are left behind;
    /// their ids are never reused.
    pub fn drop_table(&mut self, table: &str) -> DbResult<()> {
        self.catalog.drop_table(table)?;
        self.save_catalog()
    }

    /// Validates the record against the schema and fills declared defaults,
    /// without writing anything.
    pub fn prepare_record(&self, table: &str, record: RowMap) -> DbResult<RowMap> {
        let schema = self.catalog.table(table)?;
        let mut record = record;
        schema.apply_defaults(&mut record);
        schema.validate_record(&record)?;
        Ok(record)
    }

    /// Validates, defaults, places, and returns the stored record.
    pub fn insert_record(&mut self, table: &str, record: RowMap) -> DbResult<RowMap> {
        let record = self.prepare_record(table, record)?;
        self.insert_prepared(table, &record)?;
        Ok(record)
    }

    /// Places an already-validated record: first page with enough free
    /// space wins, otherwise a new page is appended to the table.
    pub fn insert_prepared(&mut self, table: &str, record: &RowMap) -> DbResult<()> {
        let bytes = encode_record(record)?;
        let needed = bytes.len() + RECORD_PREFIX;
        if needed > DATA_SIZE {
            return Err(DbError::Capacity(format!(
                "record of {} bytes cannot fit in any page",
                bytes.len()
            )));
        }

        let page_ids: Vec<PageId> = self.catalog.pages(table)?.to_vec();
        let mut pool = self.pool.lock();

        let mut target = None;
        for pid in page_ids {
            let page = pool.get_page(pid)?;
            let fits = page.free_space() >= needed;
            pool.unpin_page(pid, false);
            if fits {
                target = Some(pid);
                break;
            }
        }

        let pid = match target {
            Some(pid) => pid,
            None => {
                let pid = pool.create_page(PageKind::Data)?.id();
                pool.unpin_page(pid, true);
                drop(pool);
                self.catalog.push_page(table, pid)?;
                self.save_catalog()?;
                pool = self.pool.lock();
                pid
            }
        };

        let page = pool.get_page(pid)?;
        let added = page.add_record(&bytes);
        pool.unpin_page(pid, added);
        if !added {
            return Err(DbError::Capacity(format!(
                "page {} rejected a record that was measured to fit",
                pid.0
            )));
        }
        Ok(())
    }

    /// Scans the table's page list in order, applying the filter and the
    /// optional column projection.
    pub fn select(
        &self,
        table: &str,
        filter: Option<&Filter>,
        columns: Option<&[String]>,
    ) -> DbResult<Vec<RowMap>> {
        let page_ids: Vec<PageId> = self.catalog.pages(table)?.to_vec();
        let mut pool = self.pool.lock();
        let mut results = Vec::new();

        for pid in page_ids {
            let page = pool.get_page(pid)?;
            for record in decode_records(page.records(), pid) {
                if filter.is_none_or(|f| matches_record(f, &record)) {
                    results.push(match columns {
                        Some(cols) => project(&record, cols),
                        None => record,
                    });
                }
            }
            pool.unpin_page(pid, false);
        }
        Ok(results)
    }

    /// Full scan without filter or projection, in page-list order.
    pub fn scan(&self, table: &str) -> DbResult<Vec<RowMap>> {
        self.select(table, None, None)
    }

    /// Overwrites matching records with the given column values. Merged
    /// records that fail revalidation are skipped; only successful updates
    /// are counted. Touched pages are repacked and marked dirty.
    pub fn update(
        &mut self,
        table: &str,
        values: &RowMap,
        filter: Option<&Filter>,
    ) -> DbResult<usize> {
        let schema = self.catalog.table(table)?.clone();
        let page_ids: Vec<PageId> = self.catalog.pages(table)?.to_vec();
        let mut pool = self.pool.lock();
        let mut updated = 0;

        for pid in page_ids {
            let page = pool.get_page(pid)?;
            let mut records = decode_records(page.records(), pid);
            let mut changed = false;

            for record in records.iter_mut() {
                if !filter.is_none_or(|f| matches_record(f, record)) {
                    continue;
                }
                let mut merged = record.clone();
                merged.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
                match schema.validate_record(&merged) {
                    Ok(()) => {
                        *record = merged;
                        updated += 1;
                        changed = true;
                    }
                    Err(err) => warn!(table, %err, "skipping invalid update"),
                }
            }

            if changed {
                repack(&mut pool, pid, &records)?;
                pool.unpin_page(pid, true);
            } else {
                pool.unpin_page(pid, false);
            }
        }
        Ok(updated)
    }

    /// Removes matching records, repacking each touched page with the
    /// survivors. Returns how many records were removed.
    pub fn delete(&mut self, table: &str, filter: Option<&Filter>) -> DbResult<usize> {
        let page_ids: Vec<PageId> = self.catalog.pages(table)?.to_vec();
        let mut pool = self.pool.lock();
        let mut deleted = 0;

        for pid in page_ids {
            let page = pool.get_page(pid)?;
            let records = decode_records(page.records(), pid);
            let survivors: Vec<RowMap> = records
                .iter()
                .filter(|r| !filter.is_none_or(|f| matches_record(f, r)))
                .cloned()
                .collect();

            if survivors.len() != records.len() {
                deleted += records.len() - survivors.len();
                repack(&mut pool, pid, &survivors)?;
                pool.unpin_page(pid, true);
            } else {
                pool.unpin_page(pid, false);
            }
        }
        Ok(deleted)
    }

    /// Appends the column to the schema and backfills existing records:
    /// the declared default where present, the type's zero value for a
    /// non-nullable column, explicit null otherwise.
    pub fn add_column(&mut self, table: &str, column: Column) -> DbResult<()> {
        self.catalog.table_mut(table)?.add_column(column.clone())?;

        let fill = match (&column.default_value, column.nullable) {
            (Some(default), _) => default.clone(),
            (None, false) => column.zero_value(),
            (None, true) => types::Value::Null,
        };

        let page_ids: Vec<PageId> = self.catalog.pages(table)?.to_vec();
        let mut pool = self.pool.lock();
        for pid in page_ids {
            let page = pool.get_page(pid)?;
            let mut records = decode_records(page.records(), pid);
            let mut changed = false;
            for record in records.iter_mut() {
                if !record.contains_key(&column.name) {
                    record.insert(column.name.clone(), fill.clone());
                    changed = true;
                }
            }
            if changed {
                repack(&mut pool, pid, &records)?;
                pool.unpin_page(pid, true);
            } else {
                pool.unpin_page(pid, false);
            }
        }
        drop(pool);
        self.save_catalog()
    }

    /// Removes the column from the schema and repacks every page without it.
    pub fn drop_column(&mut self, table: &str, column: &str) -> DbResult<()> {
        self.catalog.table_mut(table)?.remove_column(column)?;

        let page_ids: Vec<PageId> = self.catalog.pages(table)?.to_vec();
        let mut pool = self.pool.lock();
        for pid in page_ids {
            let page = pool.get_page(pid)?;
            let mut records = decode_records(page.records(), pid);
            let mut changed = false;
            for record in records.iter_mut() {
                changed |= record.remove(column).is_some();
            }
            if changed {
                repack(&mut pool, pid, &records)?;
                pool.unpin_page(pid, true);
            } else {
                pool.unpin_page(pid, false);
            }
        }
        drop(pool);
        self.save_catalog()
    }

    /// Total records in the table, summed from page headers.
    pub fn record_count(&self, table: &str) -> DbResult<usize> {
        let page_ids: Vec<PageId> = self.catalog.pages(table)?.to_vec();
        let mut pool = self.pool.lock();
        let mut count = 0;
        for pid in page_ids {
            let page = pool.get_page(pid)?;
            count += page.record_count();
            pool.unpin_page(pid, false);
        }
        Ok(count)
    }

    pub fn table_info(&self, table: &str) -> DbResult<TableInfo> {
        let schema = self.catalog.table(table)?;
        let info = TableInfo {
            name: schema.name.clone(),
            columns: schema.columns.clone(),
            primary_key: schema.primary_key.clone(),
            page_count: self.catalog.pages(table)?.len(),
            record_count: 0,
            created_at: schema.created_at,
        };
        let record_count = self.record_count(table)?;
        Ok(TableInfo {
            record_count,
            ..info
        })
    }
}

fn encode_record(record: &RowMap) -> DbResult<Vec<u8>> {
    serde_json::to_vec(record)
        .map_err(|err| DbError::Corruption(format!("record encode failed: {err}")))
}

/// Decodes a page's raw records, skipping any that fail to parse.
fn decode_records(raw: Vec<&[u8]>, pid: PageId) -> Vec<RowMap> {
    raw.into_iter()
        .filter_map(|bytes| match serde_json::from_slice(bytes) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(page = pid.0, %err, "skipping undecodable record");
                None
            }
        })
        .collect()
}

/// Clears the page and re-adds the given records in order. A record that no
/// longer fits after growth is dropped with a warning.
fn repack(pool: &mut BufferPool, pid: PageId, records: &[RowMap]) -> DbResult<()> {
    let page = pool.get_page(pid)?;
    page.clear_records();
    for record in records {
        let bytes = encode_record(record)?;
        if !page.add_record(&bytes) {
            warn!(page = pid.0, "record no longer fits after repack, dropping");
        }
    }
    pool.unpin_page(pid, true);
    Ok(())
}

fn project(record: &RowMap, columns: &[String]) -> RowMap {
    columns
        .iter()
        .filter_map(|col| record.get(col).map(|v| (col.clone(), v.clone())))
        .collect()
}
