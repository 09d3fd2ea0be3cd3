//! Block header codec: the fixed 80-byte wire form and its identifier.
//!
//! Hashes move through the relay in natural (little-endian wire) byte
//! order. Explorers, RPC interfaces and humans use the reversed form;
//! every function that crosses that boundary says so. The reversal is
//! done by a single primitive, `reverse_byte_order`, everywhere.

use crate::constants::{HEADER_SIZE, UNROUNDED_MAX_TARGET};
use crate::error::{RelayError, Result};
use crate::retarget;
use crate::types::{BlockHeader, Hash};
use primitive_types::U256;
use sha2::{Digest, Sha256};

/// Double SHA256 over arbitrary bytes, returned in natural byte order
pub fn sha256d(bytes: &[u8]) -> Hash {
    let first = Sha256::digest(bytes);
    let second = Sha256::digest(&first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

/// Decode an 80-byte serialized block header.
///
/// Fails with `MalformedHeader` unless the input is exactly 80 bytes.
/// All integer fields are little-endian on the wire.
pub fn decode(bytes: &[u8]) -> Result<BlockHeader> {
    if bytes.len() != HEADER_SIZE {
        return Err(RelayError::MalformedHeader(bytes.len()));
    }

    let mut prev_block_hash = [0u8; 32];
    prev_block_hash.copy_from_slice(&bytes[4..36]);
    let mut merkle_root = [0u8; 32];
    merkle_root.copy_from_slice(&bytes[36..68]);

    Ok(BlockHeader {
        version: i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        prev_block_hash,
        merkle_root,
        timestamp: u32::from_le_bytes([bytes[68], bytes[69], bytes[70], bytes[71]]),
        bits: u32::from_le_bytes([bytes[72], bytes[73], bytes[74], bytes[75]]),
        nonce: u32::from_le_bytes([bytes[76], bytes[77], bytes[78], bytes[79]]),
    })
}

/// Serialize a block header to its 80-byte wire form.
///
/// Exact inverse of [`decode`]: round-trips are byte-for-byte.
pub fn encode(header: &BlockHeader) -> [u8; HEADER_SIZE] {
    let mut bytes = [0u8; HEADER_SIZE];
    bytes[0..4].copy_from_slice(&header.version.to_le_bytes());
    bytes[4..36].copy_from_slice(&header.prev_block_hash);
    bytes[36..68].copy_from_slice(&header.merkle_root);
    bytes[68..72].copy_from_slice(&header.timestamp.to_le_bytes());
    bytes[72..76].copy_from_slice(&header.bits.to_le_bytes());
    bytes[76..80].copy_from_slice(&header.nonce.to_le_bytes());
    bytes
}

/// Header identifier: double SHA256 of the wire form, natural byte order
pub fn id(header: &BlockHeader) -> Hash {
    sha256d(&encode(header))
}

/// Decode the header's own proof-of-work target from its `bits` field
pub fn target(header: &BlockHeader) -> Result<U256> {
    retarget::decode_target(header.bits)
}

/// Check the header's proof of work: its id, read as a little-endian
/// 256-bit integer, must not exceed the target its `bits` encode.
pub fn check_proof_of_work(header: &BlockHeader) -> Result<bool> {
    let target = target(header)?;
    let hash_value = U256::from_little_endian(&id(header));
    Ok(hash_value <= target)
}

/// Work contributed by one header: `max_target / target`.
///
/// Targets easier than the network maximum (test configurations) still
/// count one unit, so ordering by cumulative work stays monotone in
/// chain length. A zero target contributes nothing; such a header can
/// never satisfy its own proof of work.
pub fn work(header: &BlockHeader) -> Result<U256> {
    let target = target(header)?;
    if target.is_zero() {
        return Ok(U256::zero());
    }
    let ratio = UNROUNDED_MAX_TARGET / target;
    if ratio.is_zero() {
        return Ok(U256::one());
    }
    Ok(ratio)
}

/// Reverse the byte order of a hash
pub fn reverse_byte_order(hash: &Hash) -> Hash {
    let mut out = *hash;
    out.reverse();
    out
}

/// Render a natural-order hash in the reversed hex form used by
/// explorers and RPC interfaces
pub fn to_display_hex(hash: &Hash) -> String {
    hex::encode(reverse_byte_order(hash))
}

/// Parse a display-order (explorer) hex string into a natural-order hash.
///
/// Fails with `MalformedHash` on non-hex input or any length other than
/// 64 characters.
pub fn from_display_hex(s: &str) -> Result<Hash> {
    let bytes = hex::decode(s).map_err(|e| RelayError::MalformedHash(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(RelayError::MalformedHash(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    Ok(reverse_byte_order(&hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Mainnet genesis block header
    const GENESIS_HEX: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c";

    // Mainnet block 125552
    const BLOCK_125552_HEX: &str = "0100000081cd02ab7e569e8bcd9317e2fe99f2de44d49ab2b8851ba4a308000000000000e320b6c2fffc8d750423db8b1eb942ae710e951ed797f7affc8892b0f1fc122bc7f5d74df2b9441a42a14695";

    #[test]
    fn test_decode_genesis_fields() {
        let raw = hex::decode(GENESIS_HEX).unwrap();
        let header = decode(&raw).unwrap();

        assert_eq!(header.version, 1);
        assert_eq!(header.prev_block_hash, [0u8; 32]);
        assert_eq!(header.timestamp, 1231006505);
        assert_eq!(header.bits, 0x1d00ffff);
        assert_eq!(header.nonce, 2083236893);
        assert_eq!(
            to_display_hex(&header.merkle_root),
            "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
        );
    }

    #[test]
    fn test_genesis_id() {
        let raw = hex::decode(GENESIS_HEX).unwrap();
        let header = decode(&raw).unwrap();

        assert_eq!(
            to_display_hex(&id(&header)),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
    }

    #[test]
    fn test_block_125552_id() {
        let raw = hex::decode(BLOCK_125552_HEX).unwrap();
        let header = decode(&raw).unwrap();

        assert_eq!(
            to_display_hex(&id(&header)),
            "00000000000000001e8d6829a8a21adc5d38d0a473b144b6765798e61f98bd1d"
        );
    }

    #[test]
    fn test_encode_round_trip() {
        for hex_header in [GENESIS_HEX, BLOCK_125552_HEX] {
            let raw = hex::decode(hex_header).unwrap();
            let header = decode(&raw).unwrap();
            assert_eq!(encode(&header).to_vec(), raw);
        }
    }

    #[test]
    fn test_decode_wrong_length() {
        assert_eq!(decode(&[0u8; 79]), Err(RelayError::MalformedHeader(79)));
        assert_eq!(decode(&[0u8; 81]), Err(RelayError::MalformedHeader(81)));
        assert_eq!(decode(&[]), Err(RelayError::MalformedHeader(0)));
    }

    #[test]
    fn test_check_proof_of_work_real_headers() {
        for hex_header in [GENESIS_HEX, BLOCK_125552_HEX] {
            let raw = hex::decode(hex_header).unwrap();
            let header = decode(&raw).unwrap();
            assert!(check_proof_of_work(&header).unwrap());
        }
    }

    #[test]
    fn test_check_proof_of_work_failure() {
        let raw = hex::decode(GENESIS_HEX).unwrap();
        let mut header = decode(&raw).unwrap();
        // changing the nonce invalidates the found solution
        header.nonce = 0;
        assert!(!check_proof_of_work(&header).unwrap());
    }

    #[test]
    fn test_reverse_byte_order_involution() {
        let mut hash = [0u8; 32];
        for (i, byte) in hash.iter_mut().enumerate() {
            *byte = i as u8;
        }
        assert_eq!(reverse_byte_order(&reverse_byte_order(&hash)), hash);
        assert_eq!(reverse_byte_order(&hash)[0], 31);
    }

    #[test]
    fn test_display_hex_round_trip() {
        let display = "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f";
        let hash = from_display_hex(display).unwrap();
        assert_eq!(to_display_hex(&hash), display);
        // natural order puts the leading zeros of the display form last
        assert_eq!(hash[31], 0x00);
        assert_eq!(hash[0], 0x6f);
    }

    #[test]
    fn test_from_display_hex_rejects_bad_input() {
        assert!(matches!(
            from_display_hex("zz"),
            Err(RelayError::MalformedHash(_))
        ));
        assert!(matches!(
            from_display_hex("abcd"),
            Err(RelayError::MalformedHash(_))
        ));
    }

    #[test]
    fn test_work_at_max_target() {
        let header = BlockHeader {
            version: 1,
            prev_block_hash: [0; 32],
            merkle_root: [0; 32],
            timestamp: 0,
            bits: crate::constants::MAX_TARGET_BITS,
            nonce: 0,
        };
        // the easiest mainnet target contributes exactly one unit
        assert_eq!(work(&header).unwrap(), U256::one());
    }
}
