//! Secondary index maintenance: keeps `index(collection, field, value) ->
//! doc_key` mappings in step with the fields a collection's description
//! marks as indexed.

use std::collections::HashMap;

use serde_json::Value;

use crate::description::CollectionDescription;
use crate::document::{Document, DocumentState};
use crate::error::{CResult, Error};
use crate::key::{Key, KeyPrefix};
use crate::mvcc::Transaction;
use crate::storage::engine::Engine;

fn encode_value(value: &Value) -> CResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| Error::Encoding(e.to_string()))?;
    Ok(buf)
}

fn write_index_entry<E: Engine>(
    txn: &Transaction<E>,
    collection_id: u32,
    field_name: &str,
    value: &Value,
    doc_key: &str,
) -> CResult<()> {
    let key = Key::Index(collection_id, field_name.to_string(), encode_value(value)?).encode();
    txn.set(&key, doc_key.as_bytes().to_vec())
}

fn delete_index_entry<E: Engine>(
    txn: &Transaction<E>,
    collection_id: u32,
    field_name: &str,
    value: &Value,
) -> CResult<()> {
    let key = Key::Index(collection_id, field_name.to_string(), encode_value(value)?).encode();
    txn.delete(&key)
}

/// Writes index entries for every indexed field present on a freshly created,
/// `Active` document.
pub fn index_new_doc<E: Engine>(
    txn: &Transaction<E>,
    collection: &CollectionDescription,
    doc: &Document,
) -> CResult<()> {
    if doc.state != DocumentState::Active {
        return Ok(());
    }
    for field_name in &collection.indexes {
        if let Some(value) = doc.fields.get(field_name) {
            write_index_entry(txn, collection.id, field_name, value, &doc.doc_key)?;
        }
    }
    Ok(())
}

/// Rewrites index entries for indexed fields that changed on `doc`, removing
/// the stale entry under `previous`'s value before writing the new one.
pub fn update_indexed_doc<E: Engine>(
    txn: &Transaction<E>,
    collection: &CollectionDescription,
    doc: &Document,
    previous: &HashMap<String, Value>,
) -> CResult<()> {
    for field_name in &collection.indexes {
        if !doc.dirty.contains(field_name) {
            continue;
        }
        if let Some(old_value) = previous.get(field_name) {
            delete_index_entry(txn, collection.id, field_name, old_value)?;
        }
        if doc.state == DocumentState::Active {
            if let Some(new_value) = doc.fields.get(field_name) {
                write_index_entry(txn, collection.id, field_name, new_value, &doc.doc_key)?;
            }
        }
    }
    Ok(())
}

/// Looks up the doc-key stored under an indexed field's value, if any.
pub fn lookup<E: Engine>(
    txn: &Transaction<E>,
    collection_id: u32,
    field_name: &str,
    value: &Value,
) -> CResult<Option<String>> {
    let key = Key::Index(collection_id, field_name.to_string(), encode_value(value)?).encode();
    match txn.get(&key)? {
        Some(bytes) => Ok(Some(String::from_utf8(bytes).map_err(|e| Error::Encoding(e.to_string()))?)),
        None => Ok(None),
    }
}

/// All doc-keys currently indexed under `field_name` for `collection_id`.
pub fn scan_field<E: Engine>(
    txn: &Transaction<E>,
    collection_id: u32,
    field_name: &str,
) -> CResult<Vec<String>> {
    let mut out = Vec::new();
    for item in txn.scan_prefix(&KeyPrefix::Index(collection_id, field_name.to_string()).encode())? {
        let (_, value) = item?;
        out.push(String::from_utf8(value).map_err(|e| Error::Encoding(e.to_string()))?);
    }
    Ok(out)
}
