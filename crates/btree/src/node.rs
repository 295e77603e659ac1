//! B+tree node definitions and key ordering.

use common::{PageId, RecordId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use types::Value;

/// Composite index key: one `Value` per indexed column.
pub type IndexKey = Vec<Value>;

/// A B+tree node, reconstructed from a single record inside an INDEX page.
///
/// Internal nodes hold separator keys and child page ids; leaves hold
/// key→record-id entries plus the forward link of the leaf chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum BTreeNode {
    Internal {
        keys: Vec<IndexKey>,
        children: Vec<PageId>,
    },
    Leaf {
        entries: Vec<(IndexKey, RecordId)>,
        next_leaf: Option<PageId>,
    },
}

impl BTreeNode {
    pub fn new_leaf() -> Self {
        Self::Leaf {
            entries: Vec::new(),
            next_leaf: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf { .. })
    }

    /// Number of keys (internal) or entries (leaf).
    pub fn len(&self) -> usize {
        match self {
            Self::Internal { keys, .. } => keys.len(),
            Self::Leaf { entries, .. } => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Total order over scalars: natural order within a type, numeric across
/// `Int`/`Float`, and a fixed variant rank as the cross-type fallback so
/// keys always sort deterministically.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    a.cmp_same_type(b)
        .unwrap_or_else(|| variant_rank(a).cmp(&variant_rank(b)))
}

fn variant_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) | Value::Float(_) => 2,
        Value::Text(_) => 3,
    }
}

/// Lexicographic comparison of composite keys.
pub fn compare_keys(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        match compare_values(x, y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}
