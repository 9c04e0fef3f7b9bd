//! Query planning: filters, secondary indexes, plan cache, replanning
//!
//! Queries are conjunctions of single-field comparisons. For each query
//! the planner builds candidate plans (a collection scan plus one index
//! scan per usable index), trial-runs them under a works budget, and
//! caches the winner keyed by the query's shape. A cached plan that
//! degrades past its recorded cost is evicted and the candidates are
//! ranked again.

pub mod cache;
pub mod filter;
pub mod index;
pub mod plan;

pub use cache::{CachedPlan, PlanCache};
pub use filter::{Clause, CmpOp, Filter, QueryShape};
pub use index::CollectionIndexes;
pub use plan::{Plan, QueryPlanner};
