//! Candidate plans, trial ranking, and the planner front door
//!
//! A work unit is one document (or index entry) examined. Candidates run
//! round-robin until one completes or every candidate exhausts the trial
//! budget; the most productive candidate wins and is cached with the
//! works it consumed. Executing a cached plan keeps counting works, and
//! blowing past `works * eviction_ratio` without finishing evicts the
//! entry and reruns the trial.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tessera_core::{Document, DocumentId, PlannerConfig};
use tracing::debug;

use crate::cache::{CachedPlan, PlanCache};
use crate::filter::Filter;
use crate::index::CollectionIndexes;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plan {
    CollScan,
    IxScan { field: String },
}

/// One candidate mid-trial.
struct Execution<'a> {
    plan: Plan,
    docs: &'a [Document],
    by_id: &'a HashMap<DocumentId, &'a Document>,
    /// Index entries to visit, for `IxScan`.
    ids: Vec<DocumentId>,
    cursor: usize,
    works: u64,
    results: Vec<Document>,
}

impl<'a> Execution<'a> {
    fn start(
        plan: Plan,
        docs: &'a [Document],
        by_id: &'a HashMap<DocumentId, &'a Document>,
        indexes: &CollectionIndexes,
        filter: &Filter,
    ) -> Self {
        let ids = match &plan {
            Plan::CollScan => Vec::new(),
            Plan::IxScan { field } => indexes.scan_ids(field, filter).unwrap_or_default(),
        };
        Self {
            plan,
            docs,
            by_id,
            ids,
            cursor: 0,
            works: 0,
            results: Vec::new(),
        }
    }

    fn done(&self) -> bool {
        match self.plan {
            Plan::CollScan => self.cursor >= self.docs.len(),
            Plan::IxScan { .. } => self.cursor >= self.ids.len(),
        }
    }

    /// Examine one document. Every step costs one work unit.
    fn step(&mut self, filter: &Filter) {
        self.works += 1;
        match &self.plan {
            Plan::CollScan => {
                let doc = &self.docs[self.cursor];
                if filter.matches(doc) {
                    self.results.push(doc.clone());
                }
            }
            Plan::IxScan { .. } => {
                if let Some(doc) = self.by_id.get(&self.ids[self.cursor]) {
                    // The index bounded the scan; the full filter still
                    // applies as a residual.
                    if filter.matches(doc) {
                        self.results.push((*doc).clone());
                    }
                }
            }
        }
        self.cursor += 1;
    }

    /// Results per work unit.
    fn productivity(&self) -> f64 {
        if self.works == 0 {
            return 0.0;
        }
        self.results.len() as f64 / self.works as f64
    }

    /// Run to the end, or until `limit` works. Returns the results, or
    /// `None` when the limit was hit first.
    fn run_to_completion(mut self, filter: &Filter, limit: Option<u64>) -> Option<Vec<Document>> {
        while !self.done() {
            if let Some(limit) = limit {
                if self.works >= limit {
                    return None;
                }
            }
            self.step(filter);
        }
        Some(self.results)
    }
}

/// Planner front door: shape lookup, trial ranking, replanning.
pub struct QueryPlanner {
    cache: PlanCache,
    config: PlannerConfig,
}

impl QueryPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            cache: PlanCache::new(),
            config,
        }
    }

    pub fn cache(&self) -> &PlanCache {
        &self.cache
    }

    /// Execute `filter` over the collection snapshot.
    ///
    /// `docs` is the full collection in id order; `indexes` its secondary
    /// indexes. Uses the cached plan for the filter's shape when one
    /// exists and still performs, otherwise trial-ranks the candidates.
    pub fn find(
        &self,
        docs: &[Document],
        indexes: &CollectionIndexes,
        filter: &Filter,
    ) -> Vec<Document> {
        let by_id: HashMap<DocumentId, &Document> =
            docs.iter().map(|d| (d.id(), d)).collect();
        let shape = filter.shape();

        if let Some(cached) = self.cache.get(&shape) {
            let threshold = cached
                .works
                .saturating_mul(self.config.eviction_ratio)
                .max(1);
            let execution =
                Execution::start(cached.plan.clone(), docs, &by_id, indexes, filter);
            match execution.run_to_completion(filter, Some(threshold)) {
                Some(results) => return apply_sort(results, filter),
                None => {
                    debug!(plan = ?cached.plan, threshold, "cached plan degraded, replanning");
                    self.cache.remove(&shape);
                }
            }
        }

        let winner = self.rank(docs, &by_id, indexes, filter);
        let plan = winner.plan.clone();
        let works = winner.works.max(1);
        self.cache.insert(shape, CachedPlan { plan: plan.clone(), works });

        let results = Execution::start(plan, docs, &by_id, indexes, filter)
            .run_to_completion(filter, None)
            .expect("unlimited execution always completes");
        apply_sort(results, filter)
    }

    /// Round-robin trial over the candidate plans.
    fn rank<'a>(
        &self,
        docs: &'a [Document],
        by_id: &'a HashMap<DocumentId, &'a Document>,
        indexes: &CollectionIndexes,
        filter: &Filter,
    ) -> Execution<'a> {
        let mut candidates = vec![Execution::start(
            Plan::CollScan,
            docs,
            by_id,
            indexes,
            filter,
        )];
        for field in indexes.indexed_fields() {
            if filter.clauses.iter().any(|c| c.field == field) {
                candidates.push(Execution::start(
                    Plan::IxScan { field },
                    docs,
                    by_id,
                    indexes,
                    filter,
                ));
            }
        }

        'trial: loop {
            let mut all_exhausted = true;
            for candidate in candidates.iter_mut() {
                if candidate.done() {
                    // First finisher wins outright.
                    break 'trial;
                }
                if candidate.works < self.config.trial_works_budget {
                    candidate.step(filter);
                    all_exhausted = false;
                }
            }
            if all_exhausted {
                break;
            }
        }

        let winner = candidates
            .into_iter()
            .max_by(|a, b| {
                (a.done(), a.productivity())
                    .partial_cmp(&(b.done(), b.productivity()))
                    .expect("productivity is never NaN")
            })
            .expect("at least the collection scan is a candidate");
        debug!(plan = ?winner.plan, works = winner.works, "trial winner");
        winner
    }
}

fn apply_sort(mut results: Vec<Document>, filter: &Filter) -> Vec<Document> {
    if let Some(field) = &filter.sort {
        results.sort_by(|a, b| a.get_key(field).cmp(&b.get_key(field)));
    }
    results
}
