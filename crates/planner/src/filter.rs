//! Filters and query shapes

use serde::{Deserialize, Serialize};
use tessera_core::{Document, KeyValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// One field comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    pub field: String,
    pub op: CmpOp,
    pub value: KeyValue,
}

impl Clause {
    pub fn new(field: impl Into<String>, op: CmpOp, value: KeyValue) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        let Some(actual) = doc.get_key(&self.field) else {
            return false;
        };
        match self.op {
            CmpOp::Eq => actual == self.value,
            CmpOp::Gt => actual > self.value,
            CmpOp::Gte => actual >= self.value,
            CmpOp::Lt => actual < self.value,
            CmpOp::Lte => actual <= self.value,
        }
    }
}

/// Conjunction of clauses, with an optional single-field ascending sort.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub clauses: Vec<Clause>,
    pub sort: Option<String>,
}

impl Filter {
    pub fn new(clauses: Vec<Clause>) -> Self {
        Self {
            clauses,
            sort: None,
        }
    }

    pub fn sorted_by(mut self, field: impl Into<String>) -> Self {
        self.sort = Some(field.into());
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses.iter().all(|c| c.matches(doc))
    }

    /// The normalized skeleton: fields and operators, constants stripped.
    ///
    /// Structurally identical filters with different constants map to the
    /// same shape, so they share one plan cache entry.
    pub fn shape(&self) -> QueryShape {
        let mut clauses: Vec<(String, CmpOp)> = self
            .clauses
            .iter()
            .map(|c| (c.field.clone(), c.op))
            .collect();
        clauses.sort();
        QueryShape {
            clauses,
            sort: self.sort.clone(),
        }
    }
}

/// Plan cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryShape {
    clauses: Vec<(String, CmpOp)>,
    sort: Option<String>,
}

impl QueryShape {
    /// True when the shape constrains `field`.
    pub fn uses_field(&self, field: &str) -> bool {
        self.clauses.iter().any(|(f, _)| f == field) || self.sort.as_deref() == Some(field)
    }
}
