//! A thin content-addressed layer over the transaction's key/value store.
//! Blocks are immutable, so `put` is a no-op when the block already exists.

use cid::Cid;

use crate::error::CResult;
use crate::key::Key;
use crate::mvcc::Transaction;
use crate::storage::engine::Engine;

pub fn put<E: Engine>(txn: &Transaction<E>, cid: &Cid, bytes: &[u8]) -> CResult<()> {
    let key = Key::Block(cid.to_bytes()).encode();
    if txn.get(&key)?.is_none() {
        txn.set(&key, bytes.to_vec())?;
    }
    Ok(())
}

pub fn get<E: Engine>(txn: &Transaction<E>, cid: &Cid) -> CResult<Option<Vec<u8>>> {
    let key = Key::Block(cid.to_bytes()).encode();
    txn.get(&key)
}
