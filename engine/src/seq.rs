//! Monotonic per-namespace sequence counters, allocated transactionally.
//!
//! Each namespace (e.g. `"collection"`, `"schema"`) has its own independent
//! u64 counter stored under [`crate::key::Key::Sequence`]. Allocating a
//! value reads the counter, increments it, and writes it back within the
//! caller's transaction, so the underlying MVCC conflict detection is what
//! guarantees two concurrent allocations in the same namespace never hand
//! out the same value.

use crate::error::CResult;
use crate::key::Key;
use crate::mvcc::Transaction;
use crate::storage::engine::Engine;

/// Allocates and returns the next value in `namespace`, starting at 1.
pub fn next<E: Engine>(txn: &Transaction<E>, namespace: &str) -> CResult<u64> {
    let key = Key::Sequence(namespace.to_string()).encode();
    let current = match txn.get(&key)? {
        Some(bytes) => bincode::deserialize::<u64>(&bytes)
            .map_err(|e| crate::error::Error::Encoding(e.to_string()))?,
        None => 0,
    };
    let next = current + 1;
    let encoded =
        bincode::serialize(&next).map_err(|e| crate::error::Error::Encoding(e.to_string()))?;
    txn.set(&key, encoded)?;
    Ok(next)
}

/// Like [`next`], but returns the allocated value as a `u32`, failing loudly
/// (rather than truncating) if the sequence has outgrown that range.
pub fn next_u32<E: Engine>(txn: &Transaction<E>, namespace: &str) -> CResult<u32> {
    let value = next(txn, namespace)?;
    u32::try_from(value).map_err(|_| {
        crate::error::Error::Encoding(format!(
            "sequence {namespace} overflowed u32 at {value}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::Memory;
    use std::sync::{Arc, Mutex};

    #[test]
    fn allocates_monotonically_within_one_txn() {
        let engine = Arc::new(Mutex::new(Memory::new()));
        let txn = Transaction::begin(engine).unwrap();
        assert_eq!(next(&txn, "collection").unwrap(), 1);
        assert_eq!(next(&txn, "collection").unwrap(), 2);
        assert_eq!(next(&txn, "collection").unwrap(), 3);
        txn.commit().unwrap();
    }

    #[test]
    fn namespaces_are_independent() {
        let engine = Arc::new(Mutex::new(Memory::new()));
        let txn = Transaction::begin(engine).unwrap();
        assert_eq!(next(&txn, "collection").unwrap(), 1);
        assert_eq!(next(&txn, "schema").unwrap(), 1);
        assert_eq!(next(&txn, "collection").unwrap(), 2);
        txn.commit().unwrap();
    }

    #[test]
    fn persists_across_transactions() {
        let engine = Arc::new(Mutex::new(Memory::new()));
        let t1 = Transaction::begin(engine.clone()).unwrap();
        assert_eq!(next(&t1, "collection").unwrap(), 1);
        t1.commit().unwrap();

        let t2 = Transaction::begin(engine).unwrap();
        assert_eq!(next(&t2, "collection").unwrap(), 2);
        t2.commit().unwrap();
    }

    #[test]
    fn concurrent_allocation_conflicts() {
        let engine = Arc::new(Mutex::new(Memory::new()));
        let t1 = Transaction::begin(engine.clone()).unwrap();
        let t2 = Transaction::begin(engine).unwrap();
        assert_eq!(next(&t1, "collection").unwrap(), 1);
        t1.commit().unwrap();
        assert!(next(&t2, "collection").is_err());
    }
}
