use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_derive::{Deserialize, Serialize};

use crate::error::{CResult, Error};
use crate::mvcc::mvcc::{Key, KeyPrefix};
use crate::mvcc::scan::Scan;
use crate::mvcc::Version;
use crate::storage::engine::Engine;

fn serialize<T: serde::Serialize>(value: &T) -> CResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::Encoding(e.to_string()))
}

fn deserialize<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> CResult<T> {
    bincode::deserialize(bytes).map_err(|e| Error::Encoding(e.to_string()))
}

fn lock<E: Engine>(engine: &Arc<Mutex<E>>) -> CResult<MutexGuard<'_, E>> {
    engine.lock().map_err(|_| Error::Store("mutex poisoned".into()))
}

/// An MVCC transaction.
pub struct Transaction<E: Engine> {
    /// The underlying engine, shared by all transactions.
    engine: Arc<Mutex<E>>,

    /// The transaction state.
    st: TransactionState,
}

/// The state that identifies a transaction and allows resuming it, e.g.
/// across a connection restart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionState {
    /// The version this transaction is running at.
    /// Only one read-write transaction can run at a given version, since this identifies its writes.
    pub version: Version,

    /// If true, the transaction is read only.
    pub read_only: bool,

    /// The set of concurrent active (uncommitted) transactions, as of the start of this transaction.
    /// Their writes should be invisible to this transaction even if they're writing at a lower version,
    /// since they're not committed yet.
    pub active: HashSet<Version>,
}

impl TransactionState {
    /// Checks whether the given version is visible to this transaction.
    pub fn is_visible(&self, version: Version) -> bool {
        version <= self.version && !self.active.contains(&version)
    }
}

impl<E: Engine> Transaction<E> {
    /// Begins a new read-write transaction.
    pub fn begin(engine: Arc<Mutex<E>>) -> CResult<Self> {
        let mut session = lock(&engine)?;

        let version = match session.get(&Key::NextVersion.encode()?)? {
            Some(ref v) => deserialize(v)?,
            None => 1,
        };
        session.set(&Key::NextVersion.encode()?, serialize(&(version + 1))?)?;

        let active = Self::scan_active(&mut session)?;
        if !active.is_empty() {
            session.set(&Key::TxnActiveSnapshot(version).encode()?, serialize(&active)?)?;
        }
        session.set(&Key::TxnActive(version).encode()?, vec![])?;
        drop(session);

        Ok(Self { engine, st: TransactionState { version, read_only: false, active } })
    }

    /// Begins a new read-only transaction. If `as_of` is given, the
    /// transaction is a time-travel view as of that version, otherwise it
    /// sees the latest committed state.
    pub fn begin_read_only(engine: Arc<Mutex<E>>, as_of: Option<Version>) -> CResult<Self> {
        let mut session = lock(&engine)?;

        let mut version = match session.get(&Key::NextVersion.encode()?)? {
            Some(ref v) => deserialize(v)?,
            None => 1,
        };
        let mut active = HashSet::new();
        if let Some(as_of) = as_of {
            version = as_of;
            if let Some(value) = session.get(&Key::TxnActiveSnapshot(version).encode()?)? {
                active = deserialize(&value)?;
            }
        } else {
            active = Self::scan_active(&mut session)?;
        }
        drop(session);

        Ok(Self { engine, st: TransactionState { version, read_only: true, active } })
    }

    /// Resumes a transaction from serialized state.
    pub fn resume(engine: Arc<Mutex<E>>, st: TransactionState) -> CResult<Self> {
        if !st.read_only {
            let mut session = lock(&engine)?;
            if session.get(&Key::TxnActive(st.version).encode()?)?.is_none() {
                return Err(Error::Store(format!(
                    "no active transaction at version {}",
                    st.version
                )));
            }
        }
        Ok(Self { engine, st })
    }

    fn scan_active(session: &mut MutexGuard<'_, E>) -> CResult<HashSet<Version>> {
        let mut active = HashSet::new();
        let mut scan = session.scan_prefix(&KeyPrefix::TxnActive.encode()?);
        while let Some((key, _)) = scan.next().transpose()? {
            match Key::decode(&key)? {
                Key::TxnActive(version) => {
                    active.insert(version);
                }
                k => return Err(Error::Store(format!("expected TxnActive key, got {k:?}"))),
            }
        }
        Ok(active)
    }

    /// The version this transaction is running at.
    pub fn version(&self) -> Version {
        self.st.version
    }

    /// Whether this transaction is read-only.
    pub fn read_only(&self) -> bool {
        self.st.read_only
    }

    /// The serializable state of this transaction, for resuming it later.
    pub fn state(&self) -> &TransactionState {
        &self.st
    }

    /// Commits the transaction, making its writes visible to later
    /// transactions. No-op for read-only transactions.
    pub fn commit(self) -> CResult<()> {
        if self.st.read_only {
            return Ok(());
        }
        let mut session = lock(&self.engine)?;
        let remove = session
            .scan_prefix(&KeyPrefix::TxnWrite(self.st.version).encode()?)
            .map(|r| r.map(|(k, _)| k))
            .collect::<CResult<Vec<_>>>()?;
        for key in remove {
            session.delete(&key)?;
        }
        session.delete(&Key::TxnActive(self.st.version).encode()?)?;
        Ok(())
    }

    /// Rolls back the transaction, undoing any writes it made.
    pub fn rollback(self) -> CResult<()> {
        if self.st.read_only {
            return Ok(());
        }
        let mut session = lock(&self.engine)?;
        let mut rollback = Vec::new();
        let mut scan = session.scan_prefix(&KeyPrefix::TxnWrite(self.st.version).encode()?);
        while let Some((key, _)) = scan.next().transpose()? {
            match Key::decode(&key)? {
                Key::TxnWrite(_, written) => {
                    rollback.push(Key::Version(written, self.st.version).encode()?)
                }
                k => return Err(Error::Store(format!("expected TxnWrite key, got {k:?}"))),
            }
            rollback.push(key);
        }
        drop(scan);
        for key in rollback {
            session.delete(&key)?;
        }
        session.delete(&Key::TxnActive(self.st.version).encode()?)?;
        Ok(())
    }

    /// Sets a value for a key.
    pub fn set(&self, key: &[u8], value: Vec<u8>) -> CResult<()> {
        self.write(key, Some(value))
    }

    /// Deletes a key.
    pub fn delete(&self, key: &[u8]) -> CResult<()> {
        self.write(key, None)
    }

    fn write(&self, key: &[u8], value: Option<Vec<u8>>) -> CResult<()> {
        if self.st.read_only {
            return Err(Error::ReadOnly);
        }
        let mut session = lock(&self.engine)?;

        let from = Key::Version(
            key.into(),
            self.st.active.iter().min().copied().unwrap_or(self.st.version + 1),
        )
        .encode()?;
        let to = Key::Version(key.into(), u64::MAX).encode()?;
        if let Some((k, _)) = session.scan(from..=to).last().transpose()? {
            match Key::decode(&k)? {
                Key::Version(_, version) => {
                    if !self.st.is_visible(version) {
                        return Err(Error::StoreConflict);
                    }
                }
                k => return Err(Error::Store(format!("expected Version key, got {k:?}"))),
            }
        }

        session.set(&Key::TxnWrite(self.st.version, key.into()).encode()?, vec![])?;
        session.set(&Key::Version(key.into(), self.st.version).encode()?, serialize(&value)?)?;
        Ok(())
    }

    /// Fetches a key's value, as visible at this transaction's version.
    pub fn get(&self, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        let mut session = lock(&self.engine)?;
        let from = Key::Version(key.into(), 0).encode()?;
        let to = Key::Version(key.into(), self.st.version).encode()?;
        let mut scan = session.scan(from..=to);
        while let Some((k, v)) = scan.next_back().transpose()? {
            match Key::decode(&k)? {
                Key::Version(_, version) => {
                    if self.st.is_visible(version) {
                        return deserialize(&v);
                    }
                }
                k => return Err(Error::Store(format!("expected Version key, got {k:?}"))),
            }
        }
        Ok(None)
    }

    /// Iterates over a key range, at this transaction's version.
    pub fn scan(&self, range: impl std::ops::RangeBounds<Vec<u8>>) -> CResult<Scan<'_, E>> {
        use std::collections::Bound;

        let start = match range.start_bound() {
            Bound::Included(k) => Bound::Included(Key::Version(k.as_slice().into(), 0).encode()?),
            Bound::Excluded(k) => {
                Bound::Excluded(Key::Version(k.as_slice().into(), u64::MAX).encode()?)
            }
            Bound::Unbounded => Bound::Included(KeyPrefix::Version(vec![].into()).encode()?),
        };
        let end = match range.end_bound() {
            Bound::Included(k) => {
                Bound::Included(Key::Version(k.as_slice().into(), u64::MAX).encode()?)
            }
            Bound::Excluded(k) => Bound::Excluded(Key::Version(k.as_slice().into(), 0).encode()?),
            Bound::Unbounded => Bound::Excluded(KeyPrefix::NextVersion.encode()?),
        };
        Scan::new(lock(&self.engine)?, &self.st, start, end)
    }

    /// Iterates over all keys with the given prefix, at this transaction's
    /// version.
    pub fn scan_prefix(&self, prefix: &[u8]) -> CResult<Scan<'_, E>> {
        Scan::new_prefix(lock(&self.engine)?, &self.st, prefix)
    }
}
