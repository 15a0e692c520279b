//! A minimal selection plan: a linear scan over a collection's primary keys
//! filtered by equality/inequality predicates. Not a general query engine —
//! the collection engine (F) uses this only to check one-one relation
//! uniqueness before linking a new document.

use serde_json::Value;

use crate::description::CollectionDescription;
use crate::document::{Document, DocumentState};
use crate::error::{CResult, Error};
use crate::key::{Key, KeyPrefix};
use crate::mvcc::Transaction;
use crate::schema::SchemaDescription;
use crate::storage::engine::Engine;

/// A single-field equality/inequality predicate evaluated against one
/// document's field map.
pub enum Predicate {
    Eq(String, Value),
    Ne(String, Value),
}

impl Predicate {
    fn matches(&self, doc: &Document) -> bool {
        match self {
            Predicate::Eq(field, value) => doc.fields.get(field) == Some(value),
            Predicate::Ne(field, value) => doc.fields.get(field) != Some(value),
        }
    }
}

fn decode_value(bytes: &[u8]) -> CResult<Value> {
    ciborium::from_reader(bytes).map_err(|e| Error::Encoding(e.to_string()))
}

/// Loads a document's full field map and lifecycle state from the store.
/// Returns `Ok(None)` if no primary marker exists for `doc_key`.
pub fn load_document<E: Engine>(
    txn: &Transaction<E>,
    collection: &CollectionDescription,
    schema: &SchemaDescription,
    doc_key: &str,
) -> CResult<Option<Document>> {
    let marker_key = Key::Primary(collection.id, doc_key.to_string()).encode();
    let Some(marker) = txn.get(&marker_key)? else {
        return Ok(None);
    };
    let state = DocumentState::from_marker(*marker.first().unwrap_or(&0));

    let mut fields = std::collections::HashMap::new();
    for item in txn.scan_prefix(&KeyPrefix::Value(collection.id, doc_key.to_string()).encode())? {
        let (key, bytes) = item?;
        if let Key::Value(_, _, field_id) = Key::decode(&key)? {
            if let Some(field) = schema.fields.iter().find(|f| f.id == field_id) {
                fields.insert(field.name.clone(), decode_value(&bytes)?);
            }
        }
    }

    let mut doc = Document::new(collection.id, fields);
    doc.doc_key = doc_key.to_string();
    doc.state = state;
    doc.mark_clean();
    Ok(Some(doc))
}

/// Linear scan of every live document of a collection, filtered by
/// `predicates` (all must hold for a document to be yielded).
pub struct SelectionPlan<'a, E: Engine> {
    txn: &'a Transaction<E>,
    collection: &'a CollectionDescription,
    schema: &'a SchemaDescription,
    predicates: Vec<Predicate>,
    exclude_doc_key: Option<String>,
    doc_keys: Vec<String>,
    cursor: usize,
    current: Option<Document>,
}

impl<'a, E: Engine> SelectionPlan<'a, E> {
    pub fn new(
        txn: &'a Transaction<E>,
        collection: &'a CollectionDescription,
        schema: &'a SchemaDescription,
        predicates: Vec<Predicate>,
    ) -> Self {
        SelectionPlan {
            txn,
            collection,
            schema,
            predicates,
            exclude_doc_key: None,
            doc_keys: Vec::new(),
            cursor: 0,
            current: None,
        }
    }

    /// Excludes `doc_key` itself from the scan, e.g. to check "does some
    /// *other* document hold this value".
    pub fn exclude(mut self, doc_key: impl Into<String>) -> Self {
        self.exclude_doc_key = Some(doc_key.into());
        self
    }

    /// Loads the ordered list of doc-keys for this collection, in datastore
    /// order.
    pub fn init(&mut self) -> CResult<()> {
        self.doc_keys.clear();
        self.cursor = 0;
        for item in self.txn.scan_prefix(&KeyPrefix::Primary(self.collection.id).encode())? {
            let (key, _) = item?;
            if let Key::Primary(_, doc_key) = Key::decode(&key)? {
                self.doc_keys.push(doc_key);
            }
        }
        Ok(())
    }

    pub fn start(&mut self) {
        self.cursor = 0;
    }

    /// Advances to the next matching, `Active` document. Returns `false`
    /// once the scan is exhausted.
    pub fn next(&mut self) -> CResult<bool> {
        while self.cursor < self.doc_keys.len() {
            let doc_key = self.doc_keys[self.cursor].clone();
            self.cursor += 1;
            if self.exclude_doc_key.as_deref() == Some(doc_key.as_str()) {
                continue;
            }
            let Some(doc) = load_document(self.txn, self.collection, self.schema, &doc_key)? else {
                continue;
            };
            if doc.state != DocumentState::Active {
                continue;
            }
            if self.predicates.iter().all(|p| p.matches(&doc)) {
                self.current = Some(doc);
                return Ok(true);
            }
        }
        self.current = None;
        Ok(false)
    }

    pub fn value(&self) -> Option<&Document> {
        self.current.as_ref()
    }

    pub fn close(&mut self) {
        self.doc_keys.clear();
        self.cursor = 0;
        self.current = None;
    }
}

/// Returns true iff some other live document in `collection` already has
/// `field_name == value`, excluding `exclude_doc_key`. Used to enforce
/// one-one relation uniqueness.
pub fn any_other_doc_has_value<E: Engine>(
    txn: &Transaction<E>,
    collection: &CollectionDescription,
    schema: &SchemaDescription,
    field_name: &str,
    value: &Value,
    exclude_doc_key: &str,
) -> CResult<bool> {
    let mut plan = SelectionPlan::new(
        txn,
        collection,
        schema,
        vec![Predicate::Eq(field_name.to_string(), value.clone())],
    )
    .exclude(exclude_doc_key);
    plan.init()?;
    plan.start();
    plan.next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::lww;
    use crate::schema::{CrdtKind, FieldDescription, FieldKind, RelationType, KEY_FIELD_NAME};
    use crate::storage::memory::Memory;
    use std::sync::{Arc, Mutex};

    fn schema() -> SchemaDescription {
        SchemaDescription {
            name: "Profile".into(),
            root: "r1".into(),
            version_id: "v1".into(),
            fields: vec![
                FieldDescription {
                    id: 0,
                    name: KEY_FIELD_NAME.into(),
                    kind: FieldKind::DocKey,
                    crdt_type: CrdtKind::LwwRegister,
                    relation_type: RelationType::NONE,
                    relation_name: None,
                    schema: None,
                },
                FieldDescription::primitive(1, "profile_id"),
            ],
        }
    }

    fn write_doc<E: Engine>(txn: &Transaction<E>, collection_id: u32, doc_key: &str, profile_id: &str) {
        let marker_key = Key::Primary(collection_id, doc_key.to_string()).encode();
        txn.set(&marker_key, vec![crate::document::MARKER_ACTIVE]).unwrap();
        let mut buf = Vec::new();
        ciborium::into_writer(&Value::String(profile_id.to_string()), &mut buf).unwrap();
        lww::set(txn, collection_id, doc_key, 1, &buf).unwrap();
    }

    #[test]
    fn detects_existing_owner_of_the_same_value() {
        let engine = Arc::new(Mutex::new(Memory::new()));
        let txn = Transaction::begin(engine).unwrap();
        let collection = CollectionDescription {
            id: 1,
            name: "Profile".into(),
            schema_version_id: "v1".into(),
            indexes: Vec::new(),
        };
        let schema = schema();

        write_doc(&txn, 1, "doc-a", "shared-profile");

        let taken = any_other_doc_has_value(
            &txn,
            &collection,
            &schema,
            "profile_id",
            &Value::String("shared-profile".into()),
            "doc-b",
        )
        .unwrap();
        assert!(taken);

        let free = any_other_doc_has_value(
            &txn,
            &collection,
            &schema,
            "profile_id",
            &Value::String("other-profile".into()),
            "doc-b",
        )
        .unwrap();
        assert!(!free);
    }
}
