//! Deterministic, order-preserving key encoding for every namespace the
//! collection engine writes to: collection descriptions, schema versions,
//! sequence counters, primary document markers, field values, and CRDT
//! heads. Built on [`crate::keycode`] so that a prefix scan over the raw
//! store returns results in the same order as the decoded key tuple.

use crate::error::{CResult, Error};
use crate::keycode;

/// A fully-qualified key into the underlying store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    /// `/collection/id/{cid}` -> CollectionDescription (CBOR)
    CollectionById(u32),
    /// `/collection/name/{name}` -> cid
    CollectionByName(String),
    /// `/collection/schema_version/{vid}` -> cid list
    CollectionBySchemaVersion(String),
    /// `/schema/version/{vid}` -> SchemaDescription (CBOR)
    SchemaVersion(String),
    /// `/schema/root/{root}/{vid}` -> marker
    SchemaRoot(String, String),
    /// `/seq/{namespace}` -> u64 big-endian
    Sequence(String),
    /// `/data/{cid}/{dockey}` -> object marker
    Primary(u32, String),
    /// `/data/{cid}/{dockey}/{field_id}` -> raw field bytes
    Value(u32, String, u32),
    /// `/heads/{cid}/{dockey}` -> composite head CID list
    HeadComposite(u32, String),
    /// `/heads/{cid}/{dockey}/{field_id}` -> field head CID list
    HeadField(u32, String, u32),
    /// `/block/{cid}` -> block bytes
    Block(Vec<u8>),
    /// `/index/{cid}/{field_name}/{value}` -> doc_key
    Index(u32, String, Vec<u8>),
}

/// The tag byte identifying each [`Key`] variant, also used by [`KeyPrefix`].
mod tag {
    pub const COLLECTION_BY_ID: u8 = 0;
    pub const COLLECTION_BY_NAME: u8 = 1;
    pub const COLLECTION_BY_SCHEMA_VERSION: u8 = 2;
    pub const SCHEMA_VERSION: u8 = 3;
    pub const SCHEMA_ROOT: u8 = 4;
    pub const SEQUENCE: u8 = 5;
    pub const PRIMARY: u8 = 6;
    pub const VALUE: u8 = 7;
    pub const HEAD_COMPOSITE: u8 = 8;
    pub const HEAD_FIELD: u8 = 9;
    pub const BLOCK: u8 = 10;
    pub const INDEX: u8 = 11;
}

impl Key {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Key::CollectionById(cid) => {
                keycode::concat(&[vec![tag::COLLECTION_BY_ID], keycode::encode_u32(*cid)])
            }
            Key::CollectionByName(name) => keycode::concat(&[
                vec![tag::COLLECTION_BY_NAME],
                keycode::encode_bytes_raw(name.as_bytes()),
            ]),
            Key::CollectionBySchemaVersion(vid) => keycode::concat(&[
                vec![tag::COLLECTION_BY_SCHEMA_VERSION],
                keycode::encode_bytes_raw(vid.as_bytes()),
            ]),
            Key::SchemaVersion(vid) => keycode::concat(&[
                vec![tag::SCHEMA_VERSION],
                keycode::encode_bytes_raw(vid.as_bytes()),
            ]),
            Key::SchemaRoot(root, vid) => keycode::concat(&[
                vec![tag::SCHEMA_ROOT],
                keycode::encode_bytes(root.as_bytes()),
                keycode::encode_bytes_raw(vid.as_bytes()),
            ]),
            Key::Sequence(ns) => keycode::concat(&[
                vec![tag::SEQUENCE],
                keycode::encode_bytes_raw(ns.as_bytes()),
            ]),
            Key::Primary(cid, dockey) => keycode::concat(&[
                vec![tag::PRIMARY],
                keycode::encode_u32(*cid),
                keycode::encode_bytes_raw(dockey.as_bytes()),
            ]),
            Key::Value(cid, dockey, field_id) => keycode::concat(&[
                vec![tag::VALUE],
                keycode::encode_u32(*cid),
                keycode::encode_bytes(dockey.as_bytes()),
                keycode::encode_u32(*field_id),
            ]),
            Key::HeadComposite(cid, dockey) => keycode::concat(&[
                vec![tag::HEAD_COMPOSITE],
                keycode::encode_u32(*cid),
                keycode::encode_bytes_raw(dockey.as_bytes()),
            ]),
            Key::HeadField(cid, dockey, field_id) => keycode::concat(&[
                vec![tag::HEAD_FIELD],
                keycode::encode_u32(*cid),
                keycode::encode_bytes(dockey.as_bytes()),
                keycode::encode_u32(*field_id),
            ]),
            Key::Block(cid_bytes) => {
                keycode::concat(&[vec![tag::BLOCK], keycode::encode_bytes_raw(cid_bytes)])
            }
            Key::Index(cid, field_name, value) => keycode::concat(&[
                vec![tag::INDEX],
                keycode::encode_u32(*cid),
                keycode::encode_bytes(field_name.as_bytes()),
                keycode::encode_bytes_raw(value),
            ]),
        }
    }

    pub fn decode(bytes: &[u8]) -> CResult<Self> {
        let (t, rest) = bytes
            .split_first()
            .ok_or_else(|| Error::Encoding("empty key".into()))?;
        let utf8 = |b: Vec<u8>| -> CResult<String> {
            String::from_utf8(b).map_err(|e| Error::Encoding(e.to_string()))
        };
        Ok(match *t {
            tag::COLLECTION_BY_ID => {
                let (cid, _) = keycode::decode_u32(rest)?;
                Key::CollectionById(cid)
            }
            tag::COLLECTION_BY_NAME => Key::CollectionByName(utf8(rest.to_vec())?),
            tag::COLLECTION_BY_SCHEMA_VERSION => {
                Key::CollectionBySchemaVersion(utf8(rest.to_vec())?)
            }
            tag::SCHEMA_VERSION => Key::SchemaVersion(utf8(rest.to_vec())?),
            tag::SCHEMA_ROOT => {
                let (root, rest) = keycode::decode_bytes(rest)?;
                Key::SchemaRoot(utf8(root)?, utf8(rest.to_vec())?)
            }
            tag::SEQUENCE => Key::Sequence(utf8(rest.to_vec())?),
            tag::PRIMARY => {
                let (cid, rest) = keycode::decode_u32(rest)?;
                Key::Primary(cid, utf8(rest.to_vec())?)
            }
            tag::VALUE => {
                let (cid, rest) = keycode::decode_u32(rest)?;
                let (dockey, rest) = keycode::decode_bytes(rest)?;
                let (field_id, _) = keycode::decode_u32(rest)?;
                Key::Value(cid, utf8(dockey)?, field_id)
            }
            tag::HEAD_COMPOSITE => {
                let (cid, rest) = keycode::decode_u32(rest)?;
                Key::HeadComposite(cid, utf8(rest.to_vec())?)
            }
            tag::HEAD_FIELD => {
                let (cid, rest) = keycode::decode_u32(rest)?;
                let (dockey, rest) = keycode::decode_bytes(rest)?;
                let (field_id, _) = keycode::decode_u32(rest)?;
                Key::HeadField(cid, utf8(dockey)?, field_id)
            }
            tag::BLOCK => Key::Block(rest.to_vec()),
            tag::INDEX => {
                let (cid, rest) = keycode::decode_u32(rest)?;
                let (field_name, rest) = keycode::decode_bytes(rest)?;
                Key::Index(cid, utf8(field_name)?, rest.to_vec())
            }
            n => return Err(Error::Encoding(format!("unknown key tag {n}"))),
        })
    }
}

/// A key prefix, used to scan all keys sharing a common lead, e.g. all
/// document keys of a collection, or all field values of one document.
#[derive(Debug, Clone)]
pub enum KeyPrefix {
    Primary(u32),
    Value(u32, String),
    SchemaRoot(String),
    Index(u32, String),
}

impl KeyPrefix {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            KeyPrefix::Primary(cid) => {
                keycode::concat(&[vec![tag::PRIMARY], keycode::encode_u32(*cid)])
            }
            KeyPrefix::Value(cid, dockey) => keycode::concat(&[
                vec![tag::VALUE],
                keycode::encode_u32(*cid),
                keycode::encode_bytes(dockey.as_bytes()),
            ]),
            KeyPrefix::SchemaRoot(root) => keycode::concat(&[
                vec![tag::SCHEMA_ROOT],
                keycode::encode_bytes(root.as_bytes()),
            ]),
            KeyPrefix::Index(cid, field_name) => keycode::concat(&[
                vec![tag::INDEX],
                keycode::encode_u32(*cid),
                keycode::encode_bytes(field_name.as_bytes()),
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let keys = vec![
            Key::CollectionById(7),
            Key::CollectionByName("User".into()),
            Key::SchemaVersion("v1".into()),
            Key::SchemaRoot("root1".into(), "v1".into()),
            Key::Sequence("collection".into()),
            Key::Primary(1, "doc-a".into()),
            Key::Value(1, "doc-a".into(), 3),
            Key::HeadComposite(1, "doc-a".into()),
            Key::HeadField(1, "doc-a".into(), 3),
            Key::Block(vec![1, 2, 3]),
            Key::Index(1, "name".into(), b"john".to_vec()),
        ];
        for key in keys {
            let encoded = key.encode();
            assert_eq!(Key::decode(&encoded).unwrap(), key);
        }
    }

    #[test]
    fn field_id_orders_numerically_not_lexicographically() {
        let low = Key::Value(1, "a".into(), 3).encode();
        let high = Key::Value(1, "a".into(), 10).encode();
        assert!(low < high, "field 3 must sort before field 10");
    }

    #[test]
    fn value_prefix_scan_matches_full_key_prefix() {
        let prefix = KeyPrefix::Value(1, "doc-a".into()).encode();
        let full = Key::Value(1, "doc-a".into(), 3).encode();
        assert!(full.starts_with(&prefix));
    }

    #[test]
    fn primary_prefix_orders_by_collection_then_dockey() {
        let a = Key::Primary(1, "doc-a".into()).encode();
        let b = Key::Primary(1, "doc-b".into()).encode();
        let c = Key::Primary(2, "doc-a".into()).encode();
        assert!(a < b);
        assert!(b < c);
    }
}
