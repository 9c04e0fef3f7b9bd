//! Retryable-write session history.
//!
//! Each logical session runs at most one retryable transaction number at a
//! time. Statement results are recorded so a retried statement returns the
//! original result instead of executing twice. History is exportable so a
//! chunk migration can carry it to the recipient shard.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use tessera_core::{Error, Result, SessionId, StmtId, TxnNumber};

#[derive(Debug, Clone, Default)]
struct SessionState {
    active_txn: TxnNumber,
    results: HashMap<StmtId, Value>,
}

/// One exported statement record, as carried between shards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHistoryEntry {
    pub lsid: SessionId,
    pub txn_number: TxnNumber,
    pub stmt_id: StmtId,
    pub result: Value,
}

/// Per-shard registry of executed retryable statements.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded result if this exact statement already ran.
    ///
    /// A transaction number below the session's active one can no longer be
    /// retried; its statement results have been superseded.
    pub fn check_retry(
        &self,
        lsid: SessionId,
        txn_number: TxnNumber,
        stmt_id: StmtId,
    ) -> Result<Option<Value>> {
        match self.sessions.get(&lsid) {
            None => Ok(None),
            Some(state) => {
                if txn_number < state.active_txn {
                    return Err(Error::IncompleteTransactionHistory(format!(
                        "session {lsid} already advanced past transaction {txn_number}"
                    )));
                }
                if txn_number > state.active_txn {
                    return Ok(None);
                }
                Ok(state.results.get(&stmt_id).cloned())
            }
        }
    }

    /// Records the result of an executed statement. A higher transaction
    /// number supersedes the previous one and drops its results.
    pub fn record(&self, lsid: SessionId, txn_number: TxnNumber, stmt_id: StmtId, result: Value) {
        let mut state = self.sessions.entry(lsid).or_default();
        if txn_number > state.active_txn {
            state.active_txn = txn_number;
            state.results.clear();
        }
        if txn_number == state.active_txn {
            state.results.insert(stmt_id, result);
        }
    }

    /// Snapshot of all recorded statements, for migration transfer.
    pub fn export(&self) -> Vec<SessionHistoryEntry> {
        let mut out = Vec::new();
        for entry in self.sessions.iter() {
            let lsid = *entry.key();
            for (&stmt_id, result) in &entry.value().results {
                out.push(SessionHistoryEntry {
                    lsid,
                    txn_number: entry.value().active_txn,
                    stmt_id,
                    result: result.clone(),
                });
            }
        }
        out
    }

    /// Merges transferred history. Entries older than a session's active
    /// transaction are ignored.
    pub fn import(&self, entries: Vec<SessionHistoryEntry>) {
        for e in entries {
            self.record(e.lsid, e.txn_number, e.stmt_id, e.result);
        }
    }
}
