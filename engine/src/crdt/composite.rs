//! Composite-DAG aggregation: links a document's just-written field nodes
//! (plus any previous composite head) into a single head per document.

use crate::blockstore;
use crate::crdt::cid::{compute_cid, Codec};
use crate::crdt::node::{CompositeNode, HeadEntry, Link};
use crate::crdt::{encode_cbor, read_heads, write_heads};
use crate::error::CResult;
use crate::key::Key;
use crate::mvcc::Transaction;
use crate::storage::engine::Engine;

fn write_node<E: Engine>(
    txn: &Transaction<E>,
    collection_id: u32,
    doc_key: &str,
    payload: Vec<u8>,
    field_links: Vec<(Link, u64)>,
    deleted: bool,
) -> CResult<(cid::Cid, u64, Vec<u8>)> {
    let head_key = Key::HeadComposite(collection_id, doc_key.to_string()).encode();
    let prev_heads = read_heads(txn, &head_key)?;

    let mut links: Vec<Link> = field_links.iter().map(|(l, _)| l.clone()).collect();
    for head in &prev_heads {
        links.push(Link { name: "_head".to_string(), cid: head.cid.clone() });
    }

    let priority = field_links
        .iter()
        .map(|(_, p)| *p)
        .chain(prev_heads.iter().map(|h| h.priority))
        .max()
        .unwrap_or(0)
        + 1;

    let node = CompositeNode { payload, priority, links, deleted };
    let node_bytes = encode_cbor(&node)?;
    let node_cid = compute_cid(Codec::DagCbor, &node_bytes)?;
    blockstore::put(txn, &node_cid, &node_bytes)?;

    write_heads(txn, &head_key, vec![HeadEntry { cid: node_cid.to_bytes(), priority }])?;
    Ok((node_cid, priority, node_bytes))
}

/// Writes a new composite node over the document's current field map,
/// linking the fields just written and any previous composite head(s).
/// Returns the node's CID, its priority, and the node's encoded bytes (the
/// `block` an [`crate::events::UpdateEvent`] carries).
pub fn set<E: Engine>(
    txn: &Transaction<E>,
    collection_id: u32,
    doc_key: &str,
    canonical_field_map_cbor: Vec<u8>,
    field_links: Vec<(Link, u64)>,
) -> CResult<(cid::Cid, u64, Vec<u8>)> {
    write_node(txn, collection_id, doc_key, canonical_field_map_cbor, field_links, false)
}

/// Writes a tombstone composite node marking the document deleted.
pub fn delete<E: Engine>(
    txn: &Transaction<E>,
    collection_id: u32,
    doc_key: &str,
    field_links: Vec<(Link, u64)>,
) -> CResult<(cid::Cid, u64, Vec<u8>)> {
    write_node(txn, collection_id, doc_key, Vec::new(), field_links, true)
}
