//! B+tree secondary indexes persisted through the buffer pool.
//!
//! Each node lives as a single JSON record inside an INDEX page, so the
//! tree is rebuilt node-by-node from pages on demand and never persists a
//! pointer graph. Leaves are chained left-to-right for range scans.
//!
//! Descent always takes the first child whose separator is ≥ the probe key;
//! point lookups then walk the leaf chain while equal keys continue, so
//! duplicate runs and entries moved right by splits stay reachable.

mod node;


pub use node::{compare_keys, compare_values, BTreeNode, IndexKey};

use ahash::RandomState;
use buffer::{BufferPool, SharedPool};
use common::{DbError, DbResult, PageId, RecordId, RowMap};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};
use std::{fs, path::Path, path::PathBuf};
use storage::PageKind;
use tracing::{debug, warn};
use types::Value;

type Map<K, V> = HashMap<K, V, RandomState>;

/// Maximum keys per node before it splits.
pub const DEFAULT_ORDER: usize = 4;

const INDEX_FILE: &str = "indexes.json";

/// Persisted description of one index, kept in `indexes.json`. The tree
/// itself lives inside INDEX pages; this is only the catalog entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexMeta {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub order: usize,
    pub unique: bool,
    pub root_page_id: PageId,
    pub leaf_head_page_id: PageId,
    pub created_at: u64,
}

/// An ordered key→record-id index stored in INDEX pages.
#[derive(Debug)]
pub struct BPTreeIndex {
    meta: IndexMeta,
    pool: SharedPool,
}

impl BPTreeIndex {
    /// Creates an empty index whose root is a fresh leaf page.
    pub fn create(
        name: impl Into<String>,
        table: impl Into<String>,
        columns: Vec<String>,
        order: usize,
        unique: bool,
        pool: SharedPool,
    ) -> DbResult<Self> {
        let root = {
            let mut guard = pool.lock();
            alloc_node(&mut guard, &BTreeNode::new_leaf())?
        };
        Ok(Self {
            meta: IndexMeta {
                name: name.into(),
                table: table.into(),
                columns,
                order,
                unique,
                root_page_id: root,
                leaf_head_page_id: root,
                created_at: unix_now(),
            },
            pool,
        })
    }

    /// Re-attaches a persisted index to its pages.
    pub fn from_meta(meta: IndexMeta, pool: SharedPool) -> Self {
        Self { meta, pool }
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn table(&self) -> &str {
        &self.meta.table
    }

    pub fn columns(&self) -> &[String] {
        &self.meta.columns
    }

    pub fn is_unique(&self) -> bool {
        self.meta.unique
    }

    pub fn root_page_id(&self) -> PageId {
        self.meta.root_page_id
    }

    /// Extracts this index's key from a record; columns missing from the
    /// record key as explicit nulls.
    pub fn key_for(&self, record: &RowMap) -> IndexKey {
        self.meta
            .columns
            .iter()
            .map(|col| record.get(col).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Inserts one entry. A unique index rejects an already-present key
    /// with `DbError::Conflict`.
    pub fn insert(&mut self, key: IndexKey, rid: RecordId) -> DbResult<()> {
        if self.meta.unique && !self.search(&key)?.is_empty() {
            return Err(DbError::Conflict(format!(
                "duplicate key in unique index '{}'",
                self.meta.name
            )));
        }
        self.insert_entry(key, rid)
    }

    /// Inserts without the unique pre-check; used by bulk rebuilds where
    /// the caller vouches for the entries.
    fn insert_entry(&mut self, key: IndexKey, rid: RecordId) -> DbResult<()> {
        let pool = self.pool.clone();
        let mut guard = pool.lock();
        let pool = &mut *guard;

        if let Some((separator, new_child)) =
            self.insert_recursive(pool, self.meta.root_page_id, key, rid)?
        {
            // root split: a fresh root holds the two halves
            let new_root = BTreeNode::Internal {
                keys: vec![separator],
                children: vec![self.meta.root_page_id, new_child],
            };
            self.meta.root_page_id = alloc_node(pool, &new_root)?;
            debug!(
                index = %self.meta.name,
                root = self.meta.root_page_id.0,
                "root split"
            );
        }
        Ok(())
    }

    /// Collects every record id whose key equals the probe, walking the
    /// leaf chain while equal keys continue.
    pub fn search(&self, key: &[Value]) -> DbResult<Vec<RecordId>> {
        let mut guard = self.pool.lock();
        let pool = &mut *guard;

        let mut leaf_id = self.find_leaf(pool, key)?;
        let mut out = Vec::new();
        loop {
            let node = load_node(pool, leaf_id)?;
            let BTreeNode::Leaf { entries, next_leaf } = node else {
                return Err(DbError::Corruption(
                    "index descent ended at an internal node".into(),
                ));
            };
            for (k, rid) in &entries {
                match compare_keys(k, key) {
                    Ordering::Less => {}
                    Ordering::Equal => out.push(*rid),
                    Ordering::Greater => return Ok(out),
                }
            }
            match next_leaf {
                Some(next) => leaf_id = next,
                None => break,
            }
        }
        Ok(out)
    }

    /// Emits every record id with `lo <= key <= hi`, in ascending key
    /// order, by walking the leaf chain from the lower bound's leaf.
    pub fn range_search(&self, lo: &[Value], hi: &[Value]) -> DbResult<Vec<RecordId>> {
        let mut guard = self.pool.lock();
        let pool = &mut *guard;

        let mut leaf_id = self.find_leaf(pool, lo)?;
        let mut out = Vec::new();
        loop {
            let node = load_node(pool, leaf_id)?;
            let BTreeNode::Leaf { entries, next_leaf } = node else {
                return Err(DbError::Corruption(
                    "index descent ended at an internal node".into(),
                ));
            };
            for (k, rid) in &entries {
                if compare_keys(k, hi) == Ordering::Greater {
                    return Ok(out);
                }
                if compare_keys(k, lo) != Ordering::Less {
                    out.push(*rid);
                }
            }
            match next_leaf {
                Some(next) => leaf_id = next,
                None => break,
            }
        }
        Ok(out)
    }

    /// Every entry in leaf-chain order.
    pub fn scan_all(&self) -> DbResult<Vec<(IndexKey, RecordId)>> {
        let mut guard = self.pool.lock();
        let pool = &mut *guard;

        let mut leaf_id = self.meta.leaf_head_page_id;
        let mut out = Vec::new();
        loop {
            let node = load_node(pool, leaf_id)?;
            let BTreeNode::Leaf { entries, next_leaf } = node else {
                return Err(DbError::Corruption("leaf chain hit an internal node".into()));
            };
            out.extend(entries);
            match next_leaf {
                Some(next) => leaf_id = next,
                None => break,
            }
        }
        Ok(out)
    }

    /// Removes every entry matching the key (and the record id, when
    /// given), walking the chain across duplicate runs. Underflowed nodes
    /// are left as they are; delete does not rebalance.
    pub fn delete(&mut self, key: &[Value], rid: Option<RecordId>) -> DbResult<bool> {
        let mut guard = self.pool.lock();
        let pool = &mut *guard;

        let mut leaf_id = self.find_leaf(pool, key)?;
        let mut removed = false;
        loop {
            let mut node = load_node(pool, leaf_id)?;
            let (changed, next, done) = match &mut node {
                BTreeNode::Leaf { entries, next_leaf } => {
                    let had_greater = entries
                        .iter()
                        .any(|(k, _)| compare_keys(k, key) == Ordering::Greater);
                    let before = entries.len();
                    entries.retain(|(k, r)| {
                        !(compare_keys(k, key) == Ordering::Equal
                            && rid.is_none_or(|want| *r == want))
                    });
                    (entries.len() != before, *next_leaf, had_greater)
                }
                BTreeNode::Internal { .. } => {
                    return Err(DbError::Corruption(
                        "index descent ended at an internal node".into(),
                    ));
                }
            };
            if changed {
                save_node(pool, leaf_id, &node)?;
                removed = true;
            }
            if done {
                break;
            }
            match next {
                Some(next) => leaf_id = next,
                None => break,
            }
        }
        Ok(removed)
    }

    /// Re-keys one entry: delete the old key then insert the new one.
    pub fn update(&mut self, old_key: &[Value], new_key: IndexKey, rid: RecordId) -> DbResult<()> {
        self.delete(old_key, Some(rid))?;
        self.insert(new_key, rid)
    }

    /// Discards the current tree and bulk-loads the given entries into a
    /// fresh root. Old pages are orphaned; page ids are never reused.
    pub fn rebuild(&mut self, entries: Vec<(IndexKey, RecordId)>) -> DbResult<()> {
        let root = {
            let mut guard = self.pool.lock();
            alloc_node(&mut guard, &BTreeNode::new_leaf())?
        };
        self.meta.root_page_id = root;
        self.meta.leaf_head_page_id = root;
        for (key, rid) in entries {
            self.insert_entry(key, rid)?;
        }
        Ok(())
    }

    /// Levels from root to leaf, inclusive.
    pub fn height(&self) -> DbResult<usize> {
        let mut guard = self.pool.lock();
        let pool = &mut *guard;

        let mut levels = 1;
        let mut page_id = self.meta.root_page_id;
        loop {
            match load_node(pool, page_id)? {
                BTreeNode::Internal { children, .. } => {
                    page_id = *children.first().ok_or_else(|| {
                        DbError::Corruption("internal node has no children".into())
                    })?;
                    levels += 1;
                }
                BTreeNode::Leaf { .. } => return Ok(levels),
            }
        }
    }

    // ---- descent and splits ----

    /// Walks to the leaf for `key`: at each internal node, the first child
    /// whose separator is ≥ the key (the last child when none is).
    fn find_leaf(&self, pool: &mut BufferPool, key: &[Value]) -> DbResult<PageId> {
        let mut current = self.meta.root_page_id;
        loop {
            match load_node(pool, current)? {
                BTreeNode::Internal { keys, children } => {
                    let idx = keys.partition_point(|k| compare_keys(k, key) == Ordering::Less);
                    current = *children.get(idx).ok_or_else(|| {
                        DbError::Corruption("internal node is missing a child".into())
                    })?;
                }
                BTreeNode::Leaf { .. } => return Ok(current),
            }
        }
    }

    /// Returns the separator and new right sibling when this subtree split.
    fn insert_recursive(
        &self,
        pool: &mut BufferPool,
        page_id: PageId,
        key: IndexKey,
        rid: RecordId,
    ) -> DbResult<Option<(IndexKey, PageId)>> {
        match load_node(pool, page_id)? {
            BTreeNode::Internal {
                mut keys,
                mut children,
            } => {
                let idx = keys.partition_point(|k| compare_keys(k, &key) == Ordering::Less);
                let child = *children.get(idx).ok_or_else(|| {
                    DbError::Corruption("internal node is missing a child".into())
                })?;

                let Some((separator, new_child)) = self.insert_recursive(pool, child, key, rid)?
                else {
                    return Ok(None);
                };

                let pos =
                    keys.partition_point(|k| compare_keys(k, &separator) == Ordering::Less);
                keys.insert(pos, separator);
                children.insert(pos + 1, new_child);

                if keys.len() <= self.meta.order {
                    save_node(pool, page_id, &BTreeNode::Internal { keys, children })?;
                    return Ok(None);
                }

                // split: promote the median; it appears in neither half
                let mid = self.meta.order.div_ceil(2);
                let promoted = keys[mid].clone();
                let right_keys = keys.split_off(mid + 1);
                keys.truncate(mid);
                let right_children = children.split_off(mid + 1);

                save_node(pool, page_id, &BTreeNode::Internal { keys, children })?;
                let right_page = alloc_node(
                    pool,
                    &BTreeNode::Internal {
                        keys: right_keys,
                        children: right_children,
                    },
                )?;
                Ok(Some((promoted, right_page)))
            }
            BTreeNode::Leaf {
                mut entries,
                next_leaf,
            } => {
                let pos = entries
                    .partition_point(|(k, _)| compare_keys(k, &key) != Ordering::Greater);
                entries.insert(pos, (key, rid));

                if entries.len() <= self.meta.order {
                    save_node(pool, page_id, &BTreeNode::Leaf { entries, next_leaf })?;
                    return Ok(None);
                }

                // split: the first ceil(m/2) entries stay, the rest move to
                // a new leaf linked into the chain
                let mid = self.meta.order.div_ceil(2);
                let right_entries = entries.split_off(mid);
                let separator = right_entries[0].0.clone();

                let right_page = alloc_node(
                    pool,
                    &BTreeNode::Leaf {
                        entries: right_entries,
                        next_leaf,
                    },
                )?;
                save_node(
                    pool,
                    page_id,
                    &BTreeNode::Leaf {
                        entries,
                        next_leaf: Some(right_page),
                    },
                )?;
                Ok(Some((separator, right_page)))
            }
        }
    }
}

// ---- node persistence ----

fn load_node(pool: &mut BufferPool, page_id: PageId) -> DbResult<BTreeNode> {
    let page = pool.get_page(page_id)?;
    let decoded = page
        .records()
        .first()
        .ok_or_else(|| {
            DbError::Corruption(format!("index page {} holds no node record", page_id.0))
        })
        .and_then(|bytes| {
            serde_json::from_slice(bytes).map_err(|err| {
                DbError::Corruption(format!("bad index node on page {}: {err}", page_id.0))
            })
        });
    pool.unpin_page(page_id, false);
    decoded
}

/// Reserializes a node into its page as the page's single record.
fn save_node(pool: &mut BufferPool, page_id: PageId, node: &BTreeNode) -> DbResult<()> {
    let bytes = serde_json::to_vec(node)
        .map_err(|err| DbError::Corruption(format!("node encode failed: {err}")))?;
    let page = pool.get_page(page_id)?;
    page.clear_records();
    let added = page.add_record(&bytes);
    pool.unpin_page(page_id, added);
    if !added {
        return Err(DbError::Capacity(format!(
            "index node of {} bytes does not fit in page {}",
            bytes.len(),
            page_id.0
        )));
    }
    Ok(())
}

fn alloc_node(pool: &mut BufferPool, node: &BTreeNode) -> DbResult<PageId> {
    let page_id = pool.create_page(PageKind::Index)?.id();
    pool.unpin_page(page_id, true);
    save_node(pool, page_id, node)?;
    Ok(page_id)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Owns every declared index and the `indexes.json` catalog.
#[derive(Debug)]
pub struct IndexManager {
    path: PathBuf,
    pool: SharedPool,
    indexes: Map<String, BPTreeIndex>,
}

impl IndexManager {
    /// Loads the index catalog and re-attaches each persisted index.
    pub fn open(data_dir: &Path, pool: SharedPool) -> DbResult<Self> {
        let path = data_dir.join(INDEX_FILE);
        let mut indexes = Map::default();
        if path.exists() {
            let raw = fs::read_to_string(&path)?;
            match serde_json::from_str::<Map<String, IndexMeta>>(&raw) {
                Ok(metas) => {
                    for (name, meta) in metas {
                        indexes.insert(name, BPTreeIndex::from_meta(meta, pool.clone()));
                    }
                }
                Err(err) => warn!(%err, "index catalog is invalid, starting empty"),
            }
        }
        Ok(Self {
            path,
            pool,
            indexes,
        })
    }

    /// Rewrites `indexes.json` from the current metadata. Called after any
    /// operation that can move an index's root.
    pub fn save(&self) -> DbResult<()> {
        let metas: Map<&String, &IndexMeta> = self
            .indexes
            .iter()
            .map(|(name, index)| (name, index.meta()))
            .collect();
        let raw = serde_json::to_string_pretty(&metas)
            .map_err(|err| DbError::Corruption(format!("index catalog encode failed: {err}")))?;
        fs::write(&self.path, raw)?;
        Ok(())
    }

    /// Registers and persists a new empty index.
    pub fn create_index(
        &mut self,
        name: &str,
        table: &str,
        columns: Vec<String>,
        unique: bool,
        order: usize,
    ) -> DbResult<&mut BPTreeIndex> {
        if self.indexes.contains_key(name) {
            return Err(DbError::Conflict(format!("index '{name}' already exists")));
        }
        let index = BPTreeIndex::create(name, table, columns, order, unique, self.pool.clone())?;
        self.indexes.insert(name.to_string(), index);
        self.save()?;
        Ok(self.indexes.get_mut(name).expect("index was just inserted"))
    }

    pub fn drop_index(&mut self, name: &str) -> DbResult<()> {
        self.indexes
            .remove(name)
            .ok_or_else(|| DbError::NotFound(format!("unknown index '{name}'")))?;
        self.save()
    }

    pub fn get(&self, name: &str) -> Option<&BPTreeIndex> {
        self.indexes.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut BPTreeIndex> {
        self.indexes.get_mut(name)
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of every index declared over the given table.
    pub fn names_for_table(&self, table: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .indexes
            .values()
            .filter(|index| index.table() == table)
            .map(|index| index.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Drops every index declared over the given table.
    pub fn drop_table_indexes(&mut self, table: &str) -> DbResult<()> {
        let names = self.names_for_table(table);
        if names.is_empty() {
            return Ok(());
        }
        for name in names {
            self.indexes.remove(&name);
        }
        self.save()
    }
}
