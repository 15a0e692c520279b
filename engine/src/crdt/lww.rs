//! Field CRDT: a last-writer-wins register per field, chained to its
//! previous head so history can be walked back.

use crate::blockstore;
use crate::crdt::cid::{compute_cid, Codec};
use crate::crdt::node::{resolve_head, FieldNode, HeadEntry};
use crate::crdt::{encode_cbor, read_heads, write_heads};
use crate::error::CResult;
use crate::key::Key;
use crate::mvcc::Transaction;
use crate::storage::engine::Engine;

/// Writes a new value for one field, returning its node CID and the
/// priority it was written at.
pub fn set<E: Engine>(
    txn: &Transaction<E>,
    collection_id: u32,
    doc_key: &str,
    field_id: u32,
    bytes: &[u8],
) -> CResult<(cid::Cid, u64)> {
    let head_key = Key::HeadField(collection_id, doc_key.to_string(), field_id).encode();
    let heads = read_heads(txn, &head_key)?;
    let previous = resolve_head(&heads);
    let priority = previous.map(|h| h.priority + 1).unwrap_or(1);
    let previous_cid = previous.map(|h| h.cid.clone());

    let node = FieldNode { payload: bytes.to_vec(), priority, previous: previous_cid };
    let node_bytes = encode_cbor(&node)?;
    let node_cid = compute_cid(Codec::Raw, &node_bytes)?;
    blockstore::put(txn, &node_cid, &node_bytes)?;

    write_heads(txn, &head_key, vec![HeadEntry { cid: node_cid.to_bytes(), priority }])?;

    let value_key = Key::Value(collection_id, doc_key.to_string(), field_id).encode();
    txn.set(&value_key, bytes.to_vec())?;

    Ok((node_cid, priority))
}
