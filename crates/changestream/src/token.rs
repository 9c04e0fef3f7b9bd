//! Resume tokens
//!
//! A token names a position in the cluster-wide event order:
//! `(cluster_time, collection uuid, document id)`. The derived ordering of
//! the fields IS the event order, which is what makes merged cluster
//! streams and exact resume work.
//!
//! Clients see tokens as opaque hex strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use tessera_core::{ClusterTime, DocumentId, Error, Result};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResumeToken {
    pub cluster_time: ClusterTime,
    pub collection_uuid: Uuid,
    pub id: Option<DocumentId>,
}

impl ResumeToken {
    pub fn new(cluster_time: ClusterTime, collection_uuid: Uuid, id: Option<DocumentId>) -> Self {
        Self {
            cluster_time,
            collection_uuid,
            id,
        }
    }

    /// Opaque client form.
    pub fn encode(&self) -> String {
        let bytes = rmp_serde::to_vec(self).expect("token encoding is infallible");
        let mut out = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }

    pub fn decode(text: &str) -> Result<Self> {
        if text.len() % 2 != 0 {
            return Err(Error::InvalidResumeToken("odd-length hex".into()));
        }
        let mut bytes = Vec::with_capacity(text.len() / 2);
        for i in (0..text.len()).step_by(2) {
            let pair = text
                .get(i..i + 2)
                .ok_or_else(|| Error::InvalidResumeToken("non-ascii hex".into()))?;
            let byte = u8::from_str_radix(pair, 16)
                .map_err(|_| Error::InvalidResumeToken(format!("bad hex pair {pair:?}")))?;
            bytes.push(byte);
        }
        rmp_serde::from_slice(&bytes)
            .map_err(|e| Error::InvalidResumeToken(format!("undecodable payload: {e}")))
    }
}

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
