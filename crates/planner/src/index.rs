//! Single-field secondary indexes
//!
//! Each index is an ordered map from field value to the set of document
//! ids holding it, plus a reverse map so an update or delete can unindex
//! the previous value without consulting the old document.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

use tessera_core::{Document, DocumentId, KeyValue};

use crate::filter::{CmpOp, Filter};

#[derive(Debug, Default)]
struct FieldIndex {
    entries: BTreeMap<KeyValue, BTreeSet<DocumentId>>,
    indexed_value: HashMap<DocumentId, KeyValue>,
}

impl FieldIndex {
    fn insert(&mut self, id: DocumentId, value: KeyValue) {
        if let Some(old) = self.indexed_value.insert(id.clone(), value.clone()) {
            if let Some(set) = self.entries.get_mut(&old) {
                set.remove(&id);
                if set.is_empty() {
                    self.entries.remove(&old);
                }
            }
        }
        self.entries.entry(value).or_default().insert(id);
    }

    fn remove(&mut self, id: &DocumentId) {
        if let Some(old) = self.indexed_value.remove(id) {
            if let Some(set) = self.entries.get_mut(&old) {
                set.remove(id);
                if set.is_empty() {
                    self.entries.remove(&old);
                }
            }
        }
    }

    /// Ids whose indexed value lies in the bounds, in value order.
    fn scan(&self, min: Bound<&KeyValue>, max: Bound<&KeyValue>) -> Vec<DocumentId> {
        self.entries
            .range((min, max))
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }
}

/// All secondary indexes of one collection.
#[derive(Debug, Default)]
pub struct CollectionIndexes {
    indexes: RwLock<HashMap<String, FieldIndex>>,
}

impl CollectionIndexes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an index on `field` and backfill it from `docs`. Recreating
    /// an existing index rebuilds it.
    pub fn create_index(&self, field: &str, docs: &[Document]) {
        let mut index = FieldIndex::default();
        for doc in docs {
            if let Some(value) = doc.get_key(field) {
                index.insert(doc.id(), value);
            }
        }
        self.indexes.write().insert(field.to_string(), index);
    }

    pub fn drop_index(&self, field: &str) -> bool {
        self.indexes.write().remove(field).is_some()
    }

    pub fn indexed_fields(&self) -> Vec<String> {
        self.indexes.read().keys().cloned().collect()
    }

    pub fn has_index(&self, field: &str) -> bool {
        self.indexes.read().contains_key(field)
    }

    /// Maintain every index for a written document (insert or update).
    pub fn on_write(&self, doc: &Document) {
        let mut indexes = self.indexes.write();
        let id = doc.id();
        for (field, index) in indexes.iter_mut() {
            match doc.get_key(field) {
                Some(value) => index.insert(id.clone(), value),
                // The field vanished from the document.
                None => index.remove(&id),
            }
        }
    }

    pub fn on_delete(&self, id: &DocumentId) {
        let mut indexes = self.indexes.write();
        for index in indexes.values_mut() {
            index.remove(id);
        }
    }

    /// Index lookup for a filter: ids in bound order for `field`, using
    /// every clause of the filter that constrains it.
    pub fn scan_ids(&self, field: &str, filter: &Filter) -> Option<Vec<DocumentId>> {
        let indexes = self.indexes.read();
        let index = indexes.get(field)?;
        let (min, max) = bounds_for(field, filter);
        Some(index.scan(as_bound(&min), as_bound(&max)))
    }
}

enum BoundSpec {
    Unbounded,
    Included(KeyValue),
    Excluded(KeyValue),
}

fn as_bound(spec: &BoundSpec) -> Bound<&KeyValue> {
    match spec {
        BoundSpec::Unbounded => Bound::Unbounded,
        BoundSpec::Included(v) => Bound::Included(v),
        BoundSpec::Excluded(v) => Bound::Excluded(v),
    }
}

/// Tightest scan bounds the filter implies for `field`.
fn bounds_for(field: &str, filter: &Filter) -> (BoundSpec, BoundSpec) {
    let mut min = BoundSpec::Unbounded;
    let mut max = BoundSpec::Unbounded;
    for clause in filter.clauses.iter().filter(|c| c.field == field) {
        match clause.op {
            CmpOp::Eq => {
                min = BoundSpec::Included(clause.value.clone());
                max = BoundSpec::Included(clause.value.clone());
            }
            CmpOp::Gt => min = tighter_min(min, BoundSpec::Excluded(clause.value.clone())),
            CmpOp::Gte => min = tighter_min(min, BoundSpec::Included(clause.value.clone())),
            CmpOp::Lt => max = tighter_max(max, BoundSpec::Excluded(clause.value.clone())),
            CmpOp::Lte => max = tighter_max(max, BoundSpec::Included(clause.value.clone())),
        }
    }
    (min, max)
}

fn bound_value(spec: &BoundSpec) -> Option<&KeyValue> {
    match spec {
        BoundSpec::Unbounded => None,
        BoundSpec::Included(v) | BoundSpec::Excluded(v) => Some(v),
    }
}

fn tighter_min(current: BoundSpec, candidate: BoundSpec) -> BoundSpec {
    match (bound_value(&current), bound_value(&candidate)) {
        (None, _) => candidate,
        (_, None) => current,
        (Some(a), Some(b)) => {
            if b > a || (b == a && matches!(candidate, BoundSpec::Excluded(_))) {
                candidate
            } else {
                current
            }
        }
    }
}

fn tighter_max(current: BoundSpec, candidate: BoundSpec) -> BoundSpec {
    match (bound_value(&current), bound_value(&candidate)) {
        (None, _) => candidate,
        (_, None) => current,
        (Some(a), Some(b)) => {
            if b < a || (b == a && matches!(candidate, BoundSpec::Excluded(_))) {
                candidate
            } else {
                current
            }
        }
    }
}
