//! The in-memory document model: a doc-key, the document's current field
//! values, and the dirty/lifecycle state the collection engine (F) drives
//! through the CRDT layer.

use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};
use serde_json::Value;

use crate::error::{CResult, Error};
use crate::schema::{RelationType, SchemaDescription, KEY_FIELD_NAME};

/// Lifecycle state of a document, tracked alongside its primary marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentState {
    Absent,
    Active,
    Deleted,
}

/// One-byte primary markers stored at `/data/{cid}/{dockey}`.
pub const MARKER_ACTIVE: u8 = 0x01;
pub const MARKER_DELETED: u8 = 0x02;

impl DocumentState {
    pub fn from_marker(byte: u8) -> Self {
        match byte {
            MARKER_DELETED => DocumentState::Deleted,
            _ => DocumentState::Active,
        }
    }

    pub fn marker(self) -> u8 {
        match self {
            DocumentState::Active => MARKER_ACTIVE,
            DocumentState::Deleted => MARKER_DELETED,
            DocumentState::Absent => MARKER_ACTIVE,
        }
    }
}

/// A document in flight through the collection engine: its key, its current
/// field values, and which fields have been mutated since the last commit.
#[derive(Clone, Debug)]
pub struct Document {
    pub collection_id: u32,
    pub doc_key: String,
    pub state: DocumentState,
    pub fields: HashMap<String, Value>,
    pub dirty: HashSet<String>,
    pub head_cid: Option<Vec<u8>>,
}

impl Document {
    /// Builds a document from a set of field values, all marked dirty. The
    /// doc-key is left empty; callers derive it against a schema via
    /// [`derive_doc_key`] before the document can be created or looked up.
    pub fn new(collection_id: u32, fields: HashMap<String, Value>) -> Self {
        let dirty = fields.keys().cloned().collect();
        Document {
            collection_id,
            doc_key: String::new(),
            state: DocumentState::Absent,
            fields,
            dirty,
            head_cid: None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set_field(&mut self, name: &str, value: Value) {
        self.fields.insert(name.to_string(), value);
        self.dirty.insert(name.to_string());
    }

    pub fn mark_clean(&mut self) {
        self.dirty.clear();
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }
}

fn keying_fields(schema: &SchemaDescription) -> impl Iterator<Item = &crate::schema::FieldDescription> {
    schema.fields.iter().filter(|f| {
        f.name != KEY_FIELD_NAME && !f.relation_type.contains(RelationType::INTERNAL_ID)
    })
}

/// Derives a document's stable doc-key from its collection id and the
/// current values of the schema's actual data fields, in schema field
/// order (excluding the `_key` sentinel and the synthetic `_id` companion
/// fields, which have no value at creation time). Two documents with
/// identical field values under the same collection always derive the same
/// key.
pub fn derive_doc_key(
    collection_id: u32,
    schema: &SchemaDescription,
    fields: &HashMap<String, Value>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(collection_id.to_be_bytes());
    for field in keying_fields(schema) {
        hasher.update(field.name.as_bytes());
        hasher.update([0u8]);
        if let Some(value) = fields.get(&field.name) {
            hasher.update(value.to_string().as_bytes());
        }
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Verifies that `doc_key` matches the key re-derived from `fields` under
/// `schema`. `create` rejects a caller-supplied key that doesn't match its
/// own field values rather than silently trusting it.
pub fn verify_doc_key(
    doc_key: &str,
    collection_id: u32,
    schema: &SchemaDescription,
    fields: &HashMap<String, Value>,
) -> CResult<()> {
    let derived = derive_doc_key(collection_id, schema, fields);
    if doc_key != derived {
        return Err(Error::DocVerification(doc_key.to_string()));
    }
    Ok(())
}
