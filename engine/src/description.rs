//! Persists [`CollectionDescription`]s and keeps the by-name, by-schema-root
//! and by-schema-version-id secondary indexes in step with every save.

use serde_derive::{Deserialize, Serialize};

use crate::error::{CResult, Error};
use crate::key::Key;
use crate::mvcc::Transaction;
use crate::seq;
use crate::storage::engine::Engine;

/// A named, versioned materialisation of a schema version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectionDescription {
    pub id: u32,
    pub name: String,
    pub schema_version_id: String,
    #[serde(default)]
    pub indexes: Vec<String>,
}

fn encode_cbor<T: serde::Serialize>(value: &T) -> CResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| Error::Encoding(e.to_string()))?;
    Ok(buf)
}

fn decode_cbor<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> CResult<T> {
    ciborium::from_reader(bytes).map_err(|e| Error::Encoding(e.to_string()))
}

pub fn has_collection_by_name<E: Engine>(txn: &Transaction<E>, name: &str) -> CResult<bool> {
    Ok(txn.get(&Key::CollectionByName(name.to_string()).encode())?.is_some())
}

pub fn get_by_name<E: Engine>(
    txn: &Transaction<E>,
    name: &str,
) -> CResult<Option<CollectionDescription>> {
    let Some(cid_bytes) = txn.get(&Key::CollectionByName(name.to_string()).encode())? else {
        return Ok(None);
    };
    let cid: u32 =
        bincode::deserialize(&cid_bytes).map_err(|e| Error::Encoding(e.to_string()))?;
    get_by_id(txn, cid)
}

pub fn get_by_id<E: Engine>(
    txn: &Transaction<E>,
    id: u32,
) -> CResult<Option<CollectionDescription>> {
    match txn.get(&Key::CollectionById(id).encode())? {
        Some(bytes) => Ok(Some(decode_cbor(&bytes)?)),
        None => Ok(None),
    }
}

pub fn get_by_schema_version_id<E: Engine>(
    txn: &Transaction<E>,
    version_id: &str,
) -> CResult<Vec<CollectionDescription>> {
    let Some(bytes) = txn.get(&Key::CollectionBySchemaVersion(version_id.to_string()).encode())?
    else {
        return Ok(Vec::new());
    };
    let ids: Vec<u32> = bincode::deserialize(&bytes).map_err(|e| Error::Encoding(e.to_string()))?;
    ids.into_iter().filter_map(|id| get_by_id(txn, id).transpose()).collect()
}

pub fn get_by_schema_root<E: Engine>(
    txn: &Transaction<E>,
    root: &str,
) -> CResult<Vec<CollectionDescription>> {
    let mut out = Vec::new();
    for version_id in crate::schema::registry::get_versions_by_root(txn, root)? {
        out.extend(get_by_schema_version_id(txn, &version_id)?);
    }
    Ok(out)
}

pub fn list_all<E: Engine>(txn: &Transaction<E>) -> CResult<Vec<CollectionDescription>> {
    // `CollectionById` keys all share the same one-byte tag; scanning on it
    // yields every collection regardless of id.
    let tag = Key::CollectionById(0).encode()[0..1].to_vec();
    let mut out = Vec::new();
    for item in txn.scan_prefix(&tag)? {
        let (_, value) = item?;
        out.push(decode_cbor(&value)?);
    }
    Ok(out)
}

/// Creates a new collection for `name` pinned to `schema_version_id`,
/// assigning a fresh id from the `"collection"` sequence. Idempotent: saving
/// an identical description a second time is a no-op on the secondary
/// indexes (they're simply overwritten with the same values).
pub fn save_collection<E: Engine>(
    txn: &Transaction<E>,
    name: &str,
    schema_version_id: &str,
) -> CResult<CollectionDescription> {
    if let Some(existing) = get_by_name(txn, name)? {
        if existing.schema_version_id == schema_version_id {
            return Ok(existing);
        }
        return set_default_schema_version(txn, &existing.name, schema_version_id);
    }
    if name.is_empty() {
        return Err(Error::SchemaNameEmpty);
    }

    let id = seq::next_u32(txn, "collection")?;
    let desc = CollectionDescription {
        id,
        name: name.to_string(),
        schema_version_id: schema_version_id.to_string(),
        indexes: Vec::new(),
    };
    persist(txn, &desc)?;
    Ok(desc)
}

/// Repoints an existing collection at a new schema version (e.g. after a
/// schema update produced a new version under the same root).
pub fn set_default_schema_version<E: Engine>(
    txn: &Transaction<E>,
    name: &str,
    schema_version_id: &str,
) -> CResult<CollectionDescription> {
    let mut desc = get_by_name(txn, name)?.ok_or_else(|| Error::CollectionNotFound(name.to_string()))?;
    desc.schema_version_id = schema_version_id.to_string();
    persist(txn, &desc)?;
    Ok(desc)
}

fn persist<E: Engine>(txn: &Transaction<E>, desc: &CollectionDescription) -> CResult<()> {
    txn.set(&Key::CollectionById(desc.id).encode(), encode_cbor(desc)?)?;
    txn.set(
        &Key::CollectionByName(desc.name.clone()).encode(),
        bincode::serialize(&desc.id).map_err(|e| Error::Encoding(e.to_string()))?,
    )?;

    let version_key = Key::CollectionBySchemaVersion(desc.schema_version_id.clone()).encode();
    let mut ids: Vec<u32> = match txn.get(&version_key)? {
        Some(bytes) => bincode::deserialize(&bytes).map_err(|e| Error::Encoding(e.to_string()))?,
        None => Vec::new(),
    };
    if !ids.contains(&desc.id) {
        ids.push(desc.id);
    }
    txn.set(&version_key, bincode::serialize(&ids).map_err(|e| Error::Encoding(e.to_string()))?)?;
    Ok(())
}
