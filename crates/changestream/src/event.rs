//! Change events

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tessera_core::{ClusterTime, Document, DocumentId, NamespaceId};

use crate::token::ResumeToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Insert,
    Update,
    Delete,
    /// Collection dropped. Ends collection-scoped streams.
    Drop,
}

/// Which fields an update touched, diffed from the pre- and post-images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateDescription {
    pub updated_fields: Map<String, Value>,
    pub removed_fields: Vec<String>,
}

impl UpdateDescription {
    /// Top-level field diff of two document images.
    pub fn diff(pre: &Document, post: &Document) -> Self {
        let empty = Map::new();
        let pre_fields = pre.as_json().as_object().unwrap_or(&empty);
        let post_fields = post.as_json().as_object().unwrap_or(&empty);

        let mut updated_fields = Map::new();
        for (field, value) in post_fields {
            if pre_fields.get(field) != Some(value) {
                updated_fields.insert(field.clone(), value.clone());
            }
        }
        let removed_fields = pre_fields
            .keys()
            .filter(|field| !post_fields.contains_key(*field))
            .cloned()
            .collect();
        Self {
            updated_fields,
            removed_fields,
        }
    }
}

/// One emitted stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: EventKind,
    pub ns: NamespaceId,
    pub id: Option<DocumentId>,
    /// Insert: the inserted document. Update: the post-image.
    pub full_doc: Option<Document>,
    pub update_desc: Option<UpdateDescription>,
    /// Before-image for updates and deletes, when the write recorded one.
    pub pre_image: Option<Document>,
    /// Uuid of the dropped collection on `Drop` events, under the current
    /// feature compatibility version only.
    pub dropped_uuid: Option<uuid::Uuid>,
    pub cluster_time: ClusterTime,
    pub token: ResumeToken,
}
