//! Plan cache

use dashmap::DashMap;

use crate::filter::QueryShape;
use crate::plan::Plan;

/// A trial winner and the works it took to win.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPlan {
    pub plan: Plan,
    /// Works consumed when this plan won its trial. The replanning
    /// threshold is a multiple of this.
    pub works: u64,
}

/// Shape-keyed cache of winning plans.
#[derive(Debug, Default)]
pub struct PlanCache {
    entries: DashMap<QueryShape, CachedPlan>,
}

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, shape: &QueryShape) -> Option<CachedPlan> {
        self.entries.get(shape).map(|e| e.clone())
    }

    pub fn insert(&self, shape: QueryShape, plan: CachedPlan) {
        self.entries.insert(shape, plan);
    }

    pub fn remove(&self, shape: &QueryShape) {
        self.entries.remove(shape);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop every entry whose shape touches `field`. Called when an index
    /// on the field is created or dropped; either way the old ranking no
    /// longer holds.
    pub fn invalidate_field(&self, field: &str) {
        self.entries.retain(|shape, _| !shape.uses_field(field));
    }
}
