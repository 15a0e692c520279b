//! Per-field LWW-Register writes and the composite-DAG aggregation that
//! links them into one document head.

pub mod cid;
pub mod composite;
pub mod lww;
pub mod node;

use crate::error::{CResult, Error};
use crate::mvcc::Transaction;
use crate::storage::engine::Engine;
use node::HeadEntry;

pub(crate) fn encode_cbor<T: serde::Serialize>(value: &T) -> CResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| Error::Encoding(e.to_string()))?;
    Ok(buf)
}

pub(crate) fn read_heads<E: Engine>(txn: &Transaction<E>, key: &[u8]) -> CResult<Vec<HeadEntry>> {
    match txn.get(key)? {
        Some(bytes) => bincode::deserialize(&bytes).map_err(|e| Error::Encoding(e.to_string())),
        None => Ok(Vec::new()),
    }
}

pub(crate) fn write_heads<E: Engine>(
    txn: &Transaction<E>,
    key: &[u8],
    heads: Vec<HeadEntry>,
) -> CResult<()> {
    let bytes = bincode::serialize(&heads).map_err(|e| Error::Encoding(e.to_string()))?;
    txn.set(key, bytes)
}
