//! Core value types for relay validation

use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Hash type: 256-bit hash in natural (little-endian wire) byte order
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Block header, the fixed 80-byte wire structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

/// Reference to a previous transaction output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash,
    pub vout: u32,
}

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub prevout: OutPoint,
    pub script_sig: ByteString,
    pub sequence: u32,
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: u64,
    pub script_pubkey: ByteString,
}

/// A transaction decoded from raw bytes.
///
/// Scripts are opaque byte strings; the relay never interprets opcodes.
/// `witness` holds one stack per input and is empty when `has_witness`
/// is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedTransaction {
    pub version: i32,
    pub has_witness: bool,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub witness: Vec<Vec<ByteString>>,
    pub lock_time: u32,
}

/// Merkle inclusion proof for a single leaf.
///
/// `index` is the leaf position in the block; its bits, least significant
/// first, select the concatenation order at each level of `siblings`.
/// All hashes are in natural byte order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf: Hash,
    pub siblings: Vec<Hash>,
    pub index: u64,
}

/// A block header enriched with its position in the stored chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredHeader {
    pub header: BlockHeader,
    /// Header id in natural byte order
    pub hash: Hash,
    pub height: u64,
    /// Cumulative work from the relay's genesis up to and including this header
    pub chain_work: U256,
}
