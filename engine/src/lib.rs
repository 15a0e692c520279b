#![allow(non_camel_case_types)]

//! `collection-engine` implements the storage and CRDT layer of a
//! peer-to-peer, schema-aware document database: MVCC transactions over a
//! pluggable key/value engine, order-preserving key encoding, a schema
//! registry with append-only evolution, and a Merkle-CRDT document model
//! (LWW registers per field, composite DAG per document) addressed by
//! content ID. [Author fengyang]
//!
//! ## Getting started
//!
//! ```rust
//! use collection_engine::storage::engine::Engine;
//! use collection_engine::storage::memory::Memory;
//!
//! let mut engine = Memory::new();
//! engine.set(b"b", vec![0x01]).unwrap();
//! engine.set(b"b", vec![0x02]).unwrap();
//!
//! engine.set(b"e", vec![0x05]).unwrap();
//! engine.delete(b"e").unwrap();
//!
//! engine.set(b"c", vec![0x00]).unwrap();
//! engine.delete(b"c").unwrap();
//! engine.set(b"c", vec![0x03]).unwrap();
//!
//! engine.set(b"a", vec![0x01]).unwrap();
//!
//! // Make sure the scan yields the expected results.
//! assert_eq!(
//!     vec![
//!         (b"a".to_vec(), vec![0x01]),
//!         (b"b".to_vec(), vec![0x02]),
//!         (b"c".to_vec(), vec![0x03]),
//!     ],
//!     engine.scan(..).collect::<Result<Vec<_>, _>>().unwrap(),
//! );
//! ```

pub mod error;
pub mod keycode;
pub mod storage;
pub mod mvcc;
pub mod seq;
pub mod key;
pub mod schema;
pub mod description;
pub mod crdt;
pub mod blockstore;
pub mod document;
pub mod index;
pub mod events;
pub mod query;
pub mod collection;
