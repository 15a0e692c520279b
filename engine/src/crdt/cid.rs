//! CIDv1 computation: a SHA-256 multihash over a block's canonical bytes,
//! tagged with the IPLD codec (`raw` for field nodes, `dag-cbor` for
//! composite nodes) so peers can tell the two apart without decoding.

use cid::Cid;
use multihash::Multihash;
use sha2::{Digest, Sha256};

use crate::error::{CResult, Error};

const SHA2_256: u64 = 0x12;

/// The IPLD multicodec tag embedded in a CID, distinguishing a raw field
/// payload from a dag-cbor composite node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    /// `raw` (0x55): an opaque field value.
    Raw,
    /// `dag-cbor` (0x71): a composite node's canonical CBOR payload.
    DagCbor,
}

impl Codec {
    fn code(self) -> u64 {
        match self {
            Codec::Raw => 0x55,
            Codec::DagCbor => 0x71,
        }
    }
}

/// Computes the CIDv1 of `bytes` under `codec`.
pub fn compute_cid(codec: Codec, bytes: &[u8]) -> CResult<Cid> {
    let digest = Sha256::digest(bytes);
    let hash = Multihash::<64>::wrap(SHA2_256, &digest).map_err(|e| Error::Cid(e.to_string()))?;
    Ok(Cid::new_v1(codec.code(), hash))
}
