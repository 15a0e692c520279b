use std::collections::{Bound, VecDeque};
use std::sync::MutexGuard;

use crate::error::{CResult, Error};
use crate::mvcc::mvcc::{Key, KeyPrefix};
use crate::mvcc::transaction::TransactionState;
use crate::storage::engine::Engine;

fn deserialize_value(bytes: &[u8]) -> CResult<Option<Vec<u8>>> {
    bincode::deserialize(bytes).map_err(|e| Error::Encoding(e.to_string()))
}

/// A scan over the keys visible to a transaction, in the given range or
/// prefix. Values are materialized eagerly against the held engine lock, so
/// the guard does not need to outlive the iteration.
pub struct Scan<'a, E: Engine + 'a> {
    items: VecDeque<(Vec<u8>, Vec<u8>)>,
    _marker: std::marker::PhantomData<&'a E>,
}

impl<'a, E: Engine + 'a> Scan<'a, E> {
    /// Creates a new range scan over already MVCC-encoded key bounds.
    pub(crate) fn new(
        mut engine: MutexGuard<'a, E>,
        txn: &TransactionState,
        start: Bound<Vec<u8>>,
        end: Bound<Vec<u8>>,
    ) -> CResult<Self> {
        let items = Self::materialize(&mut engine, txn, (start, end))?;
        Ok(Self { items, _marker: std::marker::PhantomData })
    }

    /// Creates a new prefix scan over raw (undecoded) document keys.
    pub(crate) fn new_prefix(
        mut engine: MutexGuard<'a, E>,
        txn: &TransactionState,
        prefix: &[u8],
    ) -> CResult<Self> {
        let start = Bound::Included(KeyPrefix::Version(prefix.into()).encode()?);
        let end = match prefix.iter().rposition(|b| *b != 0xff) {
            Some(i) => {
                let mut bumped = prefix[..i].to_vec();
                bumped.push(prefix[i] + 1);
                Bound::Excluded(KeyPrefix::Version(bumped.into()).encode()?)
            }
            None => Bound::Excluded(KeyPrefix::NextVersion.encode()?),
        };
        let items = Self::materialize(&mut engine, txn, (start, end))?;
        Ok(Self { items, _marker: std::marker::PhantomData })
    }

    fn materialize(
        engine: &mut MutexGuard<'a, E>,
        txn: &TransactionState,
        range: (Bound<Vec<u8>>, Bound<Vec<u8>>),
    ) -> CResult<VecDeque<(Vec<u8>, Vec<u8>)>> {
        let raw: Vec<(Vec<u8>, Vec<u8>)> =
            engine.scan_dyn(range).collect::<CResult<Vec<_>>>()?;

        let mut out = VecDeque::new();
        let mut current: Option<(Vec<u8>, Option<Vec<u8>>)> = None;
        for (k, v) in raw {
            let (raw_key, version) = match Key::decode(&k)? {
                Key::Version(key, version) => (key.into_owned(), version),
                other => {
                    return Err(Error::Store(format!("expected Version key, got {other:?}")))
                }
            };
            if !txn.is_visible(version) {
                continue;
            }
            let value = deserialize_value(&v)?;
            match &mut current {
                Some((ck, cv)) if *ck == raw_key => *cv = value,
                _ => {
                    if let Some((ck, Some(cv))) = current.take() {
                        out.push_back((ck, cv));
                    }
                    current = Some((raw_key, value));
                }
            }
        }
        if let Some((ck, Some(cv))) = current.take() {
            out.push_back((ck, cv));
        }
        Ok(out)
    }
}

impl<'a, E: Engine + 'a> Iterator for Scan<'a, E> {
    type Item = CResult<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.pop_front().map(Ok)
    }
}

impl<'a, E: Engine + 'a> DoubleEndedIterator for Scan<'a, E> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.items.pop_back().map(Ok)
    }
}
