//! The IPLD node shapes written by the CRDT layer.

use serde_derive::{Deserialize, Serialize};

/// A named link from a composite node to a child node's CID.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub name: String,
    pub cid: Vec<u8>,
}

/// A single entry in a headstore record: the CID of a current head and the
/// priority it was written at. Normally there is exactly one, but the shape
/// allows for multiple concurrent heads pending a future merge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeadEntry {
    pub cid: Vec<u8>,
    pub priority: u64,
}

/// Picks the winning head among concurrent candidates: highest priority
/// wins; ties broken by the lexicographically smaller CID.
pub fn resolve_head(heads: &[HeadEntry]) -> Option<&HeadEntry> {
    heads.iter().max_by(|a, b| {
        a.priority.cmp(&b.priority).then_with(|| b.cid.cmp(&a.cid))
    })
}

/// A field node: an LWW-Register payload linking back to its previous head.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldNode {
    pub payload: Vec<u8>,
    pub priority: u64,
    #[serde(default)]
    pub previous: Option<Vec<u8>>,
}

/// A composite node: the canonical CBOR of the document's current field map,
/// linking the per-field nodes written in this operation plus any previous
/// composite head(s).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompositeNode {
    pub payload: Vec<u8>,
    pub priority: u64,
    pub links: Vec<Link>,
    #[serde(default)]
    pub deleted: bool,
}
