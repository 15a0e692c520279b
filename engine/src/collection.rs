//! The collection engine (F): the public document contract — create, update,
//! save, delete, existence checks, doc-key verification — orchestrating the
//! schema registry, CRDT layer, index maintainer and event bus under a
//! single transaction envelope.

use std::collections::HashMap;

use serde_json::Value;

use crate::crdt::{composite, lww, node::Link};
use crate::description::{self, CollectionDescription};
use crate::document::{self, Document, DocumentState};
use crate::error::{CResult, Error};
use crate::events::{EventBus, UpdateEvent};
use crate::index;
use crate::key::Key;
use crate::mvcc::{Transaction, MVCC, MVCCDef};
use crate::query;
use crate::schema::{FieldKind, RelationType, SchemaDescription};
use crate::storage::engine::Engine;

fn encode_value(value: &Value) -> CResult<Vec<u8>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| Error::Encoding(e.to_string()))?;
    Ok(buf)
}

fn encode_field_map(fields: &HashMap<String, Value>) -> CResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(fields, &mut buf).map_err(|e| Error::Encoding(e.to_string()))?;
    Ok(buf)
}

/// The engine's transaction scope: either the caller's own handle, threaded
/// through explicitly, or an implicit one opened and committed-or-discarded
/// around a single public operation.
pub enum TxnScope<'a, E: Engine> {
    Explicit(&'a Transaction<E>),
    Implicit,
}

/// A handle to one collection: its description, the schema version it's
/// currently pinned to, and shared access to the MVCC store and event bus.
/// Cheap to clone; every clone shares the same underlying store and
/// subscribers, so each caller should pair a clone with its own transaction
/// scope.
pub struct Collection<E: Engine> {
    mvcc: MVCC<E>,
    events: EventBus,
    collection: CollectionDescription,
    schema: SchemaDescription,
}

impl<E: Engine> Clone for Collection<E> {
    fn clone(&self) -> Self {
        Collection {
            mvcc: self.mvcc.clone(),
            events: self.events.clone(),
            collection: self.collection.clone(),
            schema: self.schema.clone(),
        }
    }
}

impl<E: Engine> Collection<E> {
    pub fn new(
        mvcc: MVCC<E>,
        events: EventBus,
        collection: CollectionDescription,
        schema: SchemaDescription,
    ) -> Self {
        Collection { mvcc, events, collection, schema }
    }

    pub fn description(&self) -> &CollectionDescription {
        &self.collection
    }

    pub fn schema(&self) -> &SchemaDescription {
        &self.schema
    }

    /// Opens-commits-or-discards an implicit transaction around `f`, or runs
    /// `f` directly against the caller's explicit one. On success, any
    /// returned [`UpdateEvent`] is published — after commit, in the implicit
    /// case.
    fn with_tx<T>(
        &self,
        scope: TxnScope<'_, E>,
        f: impl FnOnce(&Transaction<E>) -> CResult<(T, Vec<UpdateEvent>)>,
    ) -> CResult<T> {
        match scope {
            TxnScope::Explicit(txn) => {
                let (value, events) = f(txn)?;
                for event in events {
                    self.events.publish(event);
                }
                Ok(value)
            }
            TxnScope::Implicit => {
                let txn = self.mvcc.begin()?;
                match f(&txn) {
                    Ok((value, events)) => {
                        txn.commit()?;
                        for event in events {
                            self.events.publish(event);
                        }
                        Ok(value)
                    }
                    Err(err) => {
                        let _ = txn.rollback();
                        Err(err)
                    }
                }
            }
        }
    }

    /// Creates a new document. Fails with `DocumentAlreadyExists` if the
    /// derived doc-key is already `Active`, or `DocumentDeleted` if it's a
    /// tombstone.
    pub fn create(&self, doc: Document, scope: TxnScope<'_, E>) -> CResult<Document> {
        self.with_tx(scope, move |txn| {
            let (doc, event) = self.create_in_txn(txn, doc)?;
            Ok((doc, event.into_iter().collect()))
        })
    }

    /// All-or-nothing: either every document in `docs` is created, or none
    /// are (the whole batch shares one transaction).
    pub fn create_many(&self, docs: Vec<Document>, scope: TxnScope<'_, E>) -> CResult<Vec<Document>> {
        self.with_tx(scope, move |txn| {
            let mut created = Vec::with_capacity(docs.len());
            let mut events = Vec::new();
            for doc in docs {
                let (doc, event) = self.create_in_txn(txn, doc)?;
                events.extend(event);
                created.push(doc);
            }
            Ok((created, events))
        })
    }

    fn create_in_txn(&self, txn: &Transaction<E>, mut doc: Document) -> CResult<(Document, Option<UpdateEvent>)> {
        let derived = document::derive_doc_key(self.collection.id, &self.schema, &doc.fields);
        if doc.doc_key.is_empty() {
            doc.doc_key = derived;
        } else {
            document::verify_doc_key(&doc.doc_key, self.collection.id, &self.schema, &doc.fields)?;
        }

        let marker_key = Key::Primary(self.collection.id, doc.doc_key.clone()).encode();
        if let Some(marker) = txn.get(&marker_key)? {
            return Err(match DocumentState::from_marker(*marker.first().unwrap_or(&0)) {
                DocumentState::Deleted => Error::DocumentDeleted(doc.doc_key.clone()),
                _ => Error::DocumentAlreadyExists(doc.doc_key.clone()),
            });
        }

        txn.set(&marker_key, vec![document::MARKER_ACTIVE])?;
        doc.state = DocumentState::Active;

        if !doc.is_dirty() {
            index::index_new_doc(txn, &self.collection, &doc)?;
            doc.mark_clean();
            return Ok((doc, None));
        }

        let event = self.save_dirty_fields(txn, &mut doc)?;
        index::index_new_doc(txn, &self.collection, &doc)?;
        doc.mark_clean();
        Ok((doc, Some(event)))
    }

    /// Updates an existing document. Fails with `DocumentNotFound` if
    /// absent, `DocumentDeleted` if tombstoned.
    pub fn update(&self, doc: Document, scope: TxnScope<'_, E>) -> CResult<Document> {
        self.with_tx(scope, move |txn| {
            let (doc, event) = self.update_in_txn(txn, doc)?;
            Ok((doc, event.into_iter().collect()))
        })
    }

    /// Upsert: creates if absent, updates if present, rejects if deleted.
    pub fn save(&self, doc: Document, scope: TxnScope<'_, E>) -> CResult<Document> {
        self.with_tx(scope, move |txn| {
            let marker_key =
                Key::Primary(self.collection.id, non_empty_key(&self.collection, &self.schema, &doc)).encode();
            let (doc, event) = match txn.get(&marker_key)? {
                None => self.create_in_txn(txn, doc)?,
                Some(marker)
                    if DocumentState::from_marker(*marker.first().unwrap_or(&0))
                        == DocumentState::Deleted =>
                {
                    return Err(Error::DocumentDeleted(doc.doc_key.clone()));
                }
                Some(_) => self.update_in_txn(txn, doc)?,
            };
            Ok((doc, event.into_iter().collect()))
        })
    }

    fn update_in_txn(&self, txn: &Transaction<E>, mut doc: Document) -> CResult<(Document, Option<UpdateEvent>)> {
        if doc.doc_key.is_empty() {
            doc.doc_key = document::derive_doc_key(self.collection.id, &self.schema, &doc.fields);
        }
        let marker_key = Key::Primary(self.collection.id, doc.doc_key.clone()).encode();
        let Some(marker) = txn.get(&marker_key)? else {
            return Err(Error::DocumentNotFound(doc.doc_key.clone()));
        };
        if DocumentState::from_marker(*marker.first().unwrap_or(&0)) == DocumentState::Deleted {
            return Err(Error::DocumentDeleted(doc.doc_key.clone()));
        }
        doc.state = DocumentState::Active;

        if !doc.is_dirty() {
            doc.mark_clean();
            return Ok((doc, None));
        }

        let previous = query::load_document(txn, &self.collection, &self.schema, &doc.doc_key)?
            .map(|d| d.fields)
            .unwrap_or_default();
        let event = self.save_dirty_fields(txn, &mut doc)?;
        index::update_indexed_doc(txn, &self.collection, &doc, &previous)?;
        doc.mark_clean();
        Ok((doc, Some(event)))
    }

    /// Runs the per-field save algorithm over `doc`'s dirty fields, writes
    /// the composite-DAG node, and stamps `doc`'s new head CID.
    fn save_dirty_fields(&self, txn: &Transaction<E>, doc: &mut Document) -> CResult<UpdateEvent> {
        let links = self.save_fields(txn, doc)?;
        let payload = encode_field_map(&doc.fields)?;
        let (cid, priority, block) = composite::set(txn, self.collection.id, &doc.doc_key, payload, links)?;
        doc.head_cid = Some(cid.to_bytes());
        Ok(UpdateEvent {
            doc_key: doc.doc_key.clone(),
            cid: cid.to_bytes(),
            schema_root: self.schema.root.clone(),
            block,
            priority,
        })
    }

    fn save_fields(&self, txn: &Transaction<E>, doc: &mut Document) -> CResult<Vec<(Link, u64)>> {
        let mut links = Vec::new();
        let dirty: Vec<String> = doc.dirty.iter().cloned().collect();

        for field_name in dirty {
            let field_desc = self
                .schema
                .field_by_name(&field_name)
                .cloned()
                .ok_or_else(|| Error::FieldNotExist(field_name.clone()))?;

            // An `_id` companion field whose object field is a one-one
            // relation: the secondary side never stores its own id, it
            // delegates to the primary side's companion field instead. The
            // primary side owns the value directly and must check
            // uniqueness before writing it.
            let mut is_primary_one_one_id = false;
            if field_desc.kind == FieldKind::DocKey
                && field_desc.relation_type.contains(RelationType::INTERNAL_ID)
            {
                if let Some(owner) = field_desc.relation_name.as_deref().and_then(|relation_name| {
                    self.schema.fields.iter().find(|f| {
                        f.kind == FieldKind::ForeignObject
                            && f.relation_type.contains(RelationType::ONE_ONE)
                            && f.relation_name.as_deref() == Some(relation_name)
                    })
                }) {
                    if owner.relation_type.contains(RelationType::PRIMARY) {
                        is_primary_one_one_id = true;
                    } else {
                        self.patch_partner_companion(txn, owner, &field_name, doc)?;
                        continue;
                    }
                }
            }

            let value = doc.fields.get(&field_name).cloned().unwrap_or(Value::Null);

            if is_primary_one_one_id && !value.is_null() {
                let taken = query::any_other_doc_has_value(
                    txn,
                    &self.collection,
                    &self.schema,
                    &field_name,
                    &value,
                    &doc.doc_key,
                )?;
                if taken {
                    return Err(Error::OneOneAlreadyLinked(field_name.clone()));
                }
            }

            let bytes = encode_value(&value)?;
            let (cid, priority) = lww::set(txn, self.collection.id, &doc.doc_key, field_desc.id, &bytes)?;
            links.push((Link { name: field_name.clone(), cid: cid.to_bytes() }, priority));
            doc.fields.insert(field_name, value);
        }

        Ok(links)
    }

    /// Delegates a secondary relation-id write to the primary side's own
    /// document: the non-primary side of a one-one relation never stores
    /// its own companion id, only the primary side does. Called only for
    /// the non-primary side; `owner_field` is the local `ForeignObject`
    /// field that isn't `PRIMARY`.
    fn patch_partner_companion(
        &self,
        txn: &Transaction<E>,
        owner_field: &crate::schema::FieldDescription,
        this_field_name: &str,
        doc: &Document,
    ) -> CResult<()> {
        let Some(linked_doc_key) = doc.fields.get(this_field_name).and_then(|v| v.as_str()) else {
            return Ok(());
        };
        let Some(partner_schema_name) = owner_field.schema.as_deref() else {
            return Ok(());
        };
        let Some(partner_collection) = description::get_by_name(txn, partner_schema_name)? else {
            return Ok(());
        };
        let Some(partner_schema) =
            crate::schema::registry::get_schema_version(txn, &partner_collection.schema_version_id)?
        else {
            return Ok(());
        };
        let Some(partner_companion) = partner_schema.fields.iter().find(|f| {
            f.relation_name.as_deref() == owner_field.relation_name.as_deref()
                && f.kind == FieldKind::DocKey
                && f.relation_type.contains(RelationType::INTERNAL_ID)
        }) else {
            return Ok(());
        };

        let value = Value::String(doc.doc_key.clone());
        let bytes = encode_value(&value)?;
        lww::set(txn, partner_collection.id, linked_doc_key, partner_companion.id, &bytes)?;
        Ok(())
    }

    /// Writes a composite tombstone and flips the primary marker to
    /// `Deleted`. Returns `DocumentNotFound` if absent or already deleted.
    pub fn delete(&self, doc_key: &str, scope: TxnScope<'_, E>) -> CResult<bool> {
        let doc_key = doc_key.to_string();
        self.with_tx(scope, move |txn| {
            let marker_key = Key::Primary(self.collection.id, doc_key.clone()).encode();
            match txn.get(&marker_key)? {
                None => return Err(Error::DocumentNotFound(doc_key.clone())),
                Some(marker)
                    if DocumentState::from_marker(*marker.first().unwrap_or(&0))
                        == DocumentState::Deleted =>
                {
                    return Err(Error::DocumentNotFound(doc_key.clone()));
                }
                Some(_) => {}
            }

            txn.set(&marker_key, vec![document::MARKER_DELETED])?;
            let (cid, priority, block) = composite::delete(txn, self.collection.id, &doc_key, Vec::new())?;
            let event = UpdateEvent {
                doc_key: doc_key.clone(),
                cid: cid.to_bytes(),
                schema_root: self.schema.root.clone(),
                block,
                priority,
            };
            Ok((true, vec![event]))
        })
    }

    /// True iff the primary marker is present and not `Deleted`.
    pub fn exists(&self, doc_key: &str, scope: TxnScope<'_, E>) -> CResult<bool> {
        let run = |txn: &Transaction<E>| -> CResult<bool> {
            let marker_key = Key::Primary(self.collection.id, doc_key.to_string()).encode();
            Ok(match txn.get(&marker_key)? {
                Some(marker) => {
                    DocumentState::from_marker(*marker.first().unwrap_or(&0)) != DocumentState::Deleted
                }
                None => false,
            })
        };
        match scope {
            TxnScope::Explicit(txn) => run(txn),
            TxnScope::Implicit => {
                let txn = self.mvcc.begin_read_only()?;
                let result = run(&txn);
                txn.commit()?;
                result
            }
        }
    }

    /// All doc-keys in this collection, in datastore order. Materialised
    /// eagerly and exposed as a one-shot stream (mirrors the eager
    /// materialisation the MVCC scan layer itself uses).
    pub fn get_all_doc_keys(&self) -> CResult<impl tokio_stream::Stream<Item = String>> {
        let txn = self.mvcc.begin_read_only()?;
        let mut keys = Vec::new();
        for item in txn.scan_prefix(&crate::key::KeyPrefix::Primary(self.collection.id).encode())? {
            let (key, _) = item?;
            if let Key::Primary(_, doc_key) = Key::decode(&key)? {
                keys.push(doc_key);
            }
        }
        txn.commit()?;
        Ok(tokio_stream::iter(keys))
    }
}

fn non_empty_key(collection: &CollectionDescription, schema: &SchemaDescription, doc: &Document) -> String {
    if !doc.doc_key.is_empty() {
        return doc.doc_key.clone();
    }
    document::derive_doc_key(collection.id, schema, &doc.fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::registry::create_schema_version;
    use crate::schema::{CrdtKind, FieldDescription, FieldKind, KEY_FIELD_NAME};
    use crate::storage::memory::Memory;

    fn user_schema() -> SchemaDescription {
        SchemaDescription {
            name: "User".into(),
            root: String::new(),
            version_id: String::new(),
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
                FieldDescription::primitive(1, "name"),
                FieldDescription::primitive(2, "age"),
            ],
        }
    }

    fn build() -> Collection<Memory> {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let schema = create_schema_version(&txn, user_schema()).unwrap();
        let desc = description::save_collection(&txn, "User", &schema.version_id).unwrap();
        txn.commit().unwrap();
        Collection::new(mvcc, EventBus::new(), desc, schema)
    }

    fn doc(name: &str, age: i64) -> Document {
        let mut fields = HashMap::new();
        fields.insert("name".to_string(), Value::String(name.to_string()));
        fields.insert("age".to_string(), Value::from(age));
        Document::new(1, fields)
    }

    #[test]
    fn create_then_exists_and_read_back() {
        let coll = build();
        let created = coll.create(doc("John", 21), TxnScope::Implicit).unwrap();
        assert!(coll.exists(&created.doc_key, TxnScope::Implicit).unwrap());
        assert_eq!(created.fields.get("name"), Some(&Value::String("John".into())));
    }

    #[test]
    fn create_twice_with_same_key_fails() {
        let coll = build();
        let d = doc("John", 21);
        coll.create(d.clone(), TxnScope::Implicit).unwrap();
        let err = coll.create(d, TxnScope::Implicit).unwrap_err();
        assert!(matches!(err, Error::DocumentAlreadyExists(_)));
    }

    #[test]
    fn delete_then_recreate_fails_as_deleted() {
        let coll = build();
        let created = coll.create(doc("John", 21), TxnScope::Implicit).unwrap();
        assert!(coll.delete(&created.doc_key, TxnScope::Implicit).unwrap());
        assert!(!coll.exists(&created.doc_key, TxnScope::Implicit).unwrap());

        let err = coll.create(doc("John", 21), TxnScope::Implicit).unwrap_err();
        assert!(matches!(err, Error::DocumentDeleted(_)));
    }

    #[test]
    fn delete_twice_is_document_not_found() {
        let coll = build();
        let created = coll.create(doc("John", 21), TxnScope::Implicit).unwrap();
        assert!(coll.delete(&created.doc_key, TxnScope::Implicit).unwrap());
        let err = coll.delete(&created.doc_key, TxnScope::Implicit).unwrap_err();
        assert!(matches!(err, Error::DocumentNotFound(_)));
    }

    #[test]
    fn update_changes_a_field_and_keeps_the_key() {
        let coll = build();
        let created = coll.create(doc("John", 21), TxnScope::Implicit).unwrap();

        let mut to_update = Document::new(1, HashMap::new());
        to_update.doc_key = created.doc_key.clone();
        to_update.set_field("age", Value::from(22));
        let updated = coll.update(to_update, TxnScope::Implicit).unwrap();

        assert_eq!(updated.fields.get("age"), Some(&Value::from(22)));
    }

    #[test]
    fn update_on_absent_key_fails() {
        let coll = build();
        let mut missing = Document::new(1, HashMap::new());
        missing.doc_key = "does-not-exist".into();
        missing.set_field("age", Value::from(1));
        let err = coll.update(missing, TxnScope::Implicit).unwrap_err();
        assert!(matches!(err, Error::DocumentNotFound(_)));
    }

    #[test]
    fn publishes_one_event_per_create() {
        let coll = build();
        let mut rx = coll_events(&coll);
        coll.create(doc("John", 21), TxnScope::Implicit).unwrap();
        assert!(rx.try_recv().is_ok());
    }

    fn coll_events(coll: &Collection<Memory>) -> tokio::sync::broadcast::Receiver<UpdateEvent> {
        coll.events.subscribe()
    }

    fn user_schema_with_primary_one_one() -> SchemaDescription {
        SchemaDescription {
            name: "User".into(),
            root: String::new(),
            version_id: String::new(),
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
                FieldDescription::primitive(1, "name"),
                FieldDescription {
                    id: 2,
                    name: "profile".into(),
                    kind: FieldKind::ForeignObject,
                    crdt_type: CrdtKind::LwwRegister,
                    relation_type: RelationType::ONE | RelationType::ONE_ONE | RelationType::PRIMARY,
                    relation_name: Some("user_profile".into()),
                    schema: Some("Profile".into()),
                },
                FieldDescription {
                    id: 3,
                    name: "profile_id".into(),
                    kind: FieldKind::DocKey,
                    crdt_type: CrdtKind::LwwRegister,
                    relation_type: RelationType::INTERNAL_ID,
                    relation_name: Some("user_profile".into()),
                    schema: None,
                },
            ],
        }
    }

    fn build_with_primary_one_one() -> Collection<Memory> {
        let mvcc = MVCC::new(Memory::new());
        let txn = mvcc.begin().unwrap();
        let schema = create_schema_version(&txn, user_schema_with_primary_one_one()).unwrap();
        let desc = description::save_collection(&txn, "User", &schema.version_id).unwrap();
        txn.commit().unwrap();
        Collection::new(mvcc, EventBus::new(), desc, schema)
    }

    #[test]
    fn primary_side_one_one_id_is_persisted() {
        let coll = build_with_primary_one_one();
        let mut alice = Document::new(1, HashMap::new());
        alice.set_field("name", Value::String("Alice".into()));
        alice.set_field("profile_id", Value::String("profile-a".into()));
        let created = coll.create(alice, TxnScope::Implicit).unwrap();
        assert_eq!(
            created.fields.get("profile_id"),
            Some(&Value::String("profile-a".into()))
        );
    }

    #[test]
    fn primary_side_one_one_id_enforces_uniqueness() {
        let coll = build_with_primary_one_one();
        let mut alice = Document::new(1, HashMap::new());
        alice.set_field("name", Value::String("Alice".into()));
        alice.set_field("profile_id", Value::String("profile-a".into()));
        coll.create(alice, TxnScope::Implicit).unwrap();

        let mut bob = Document::new(1, HashMap::new());
        bob.set_field("name", Value::String("Bob".into()));
        bob.set_field("profile_id", Value::String("profile-a".into()));
        let err = coll.create(bob, TxnScope::Implicit).unwrap_err();
        assert!(matches!(err, Error::OneOneAlreadyLinked(_)));
    }
}
