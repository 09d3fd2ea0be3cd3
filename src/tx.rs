//! Transaction codec: raw byte stream to structured fields and back.
//!
//! Scripts are opaque byte strings here; nothing in the relay interprets
//! opcodes. The codec understands both the legacy layout and the segwit
//! layout (BIP 144 marker/flag, one witness stack per input).

use crate::error::{RelayError, Result};
use crate::header::sha256d;
use crate::types::{
    ByteString, Hash, OutPoint, ParsedTransaction, TransactionInput, TransactionOutput,
};

/// Segwit marker byte, in place of a zero input count
const SEGWIT_MARKER: u8 = 0x00;

/// The only defined segwit flag value
const SEGWIT_FLAG: u8 = 0x01;

/// Bounds-checked reader over a raw transaction buffer
struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        ByteReader { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.remaining() < count {
            return Err(RelayError::TruncatedTransaction {
                offset: self.pos,
                needed: count - self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u64_le(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }

    fn read_hash(&mut self) -> Result<Hash> {
        let bytes = self.take(32)?;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(bytes);
        Ok(hash)
    }

    /// Variable-length integer: 1, 3, 5 or 9 bytes by leading byte
    fn read_varint(&mut self) -> Result<u64> {
        match self.read_u8()? {
            0xfd => {
                let bytes = self.take(2)?;
                Ok(u16::from_le_bytes([bytes[0], bytes[1]]) as u64)
            }
            0xfe => Ok(self.read_u32_le()? as u64),
            0xff => self.read_u64_le(),
            small => Ok(small as u64),
        }
    }

    fn read_bytes(&mut self, count: u64) -> Result<ByteString> {
        // counts come from attacker-controlled varints; let the bounds
        // check fire before any allocation sized by them
        if (count as usize) > self.remaining() {
            return Err(RelayError::TruncatedTransaction {
                offset: self.pos,
                needed: count as usize - self.remaining(),
            });
        }
        Ok(self.take(count as usize)?.to_vec())
    }
}

fn write_varint(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x10000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

fn read_input(reader: &mut ByteReader) -> Result<TransactionInput> {
    let txid = reader.read_hash()?;
    let vout = reader.read_u32_le()?;
    let script_length = reader.read_varint()?;
    let script_sig = reader.read_bytes(script_length)?;
    let sequence = reader.read_u32_le()?;
    Ok(TransactionInput {
        prevout: OutPoint { txid, vout },
        script_sig,
        sequence,
    })
}

fn read_output(reader: &mut ByteReader) -> Result<TransactionOutput> {
    let value = reader.read_u64_le()?;
    let script_length = reader.read_varint()?;
    let script_pubkey = reader.read_bytes(script_length)?;
    Ok(TransactionOutput {
        value,
        script_pubkey,
    })
}

/// Parse a raw transaction.
///
/// Recognizes the segwit marker/flag pair immediately after the version;
/// a marker with any flag other than 0x01 fails with
/// `UnsupportedEncoding`. Any declared length running past the buffer
/// fails with `TruncatedTransaction`; bytes left over after the locktime
/// fail with `TrailingBytes`.
pub fn parse(raw: &[u8]) -> Result<ParsedTransaction> {
    let mut reader = ByteReader::new(raw);

    let version = reader.read_u32_le()? as i32;

    let has_witness = if reader.peek() == Some(SEGWIT_MARKER) {
        reader.read_u8()?;
        let flag = reader.read_u8()?;
        if flag != SEGWIT_FLAG {
            return Err(RelayError::UnsupportedEncoding(flag));
        }
        true
    } else {
        false
    };

    let input_count = reader.read_varint()?;
    let mut inputs = Vec::new();
    for _ in 0..input_count {
        inputs.push(read_input(&mut reader)?);
    }

    let output_count = reader.read_varint()?;
    let mut outputs = Vec::new();
    for _ in 0..output_count {
        outputs.push(read_output(&mut reader)?);
    }

    let mut witness = Vec::new();
    if has_witness {
        for _ in 0..input_count {
            let item_count = reader.read_varint()?;
            let mut stack = Vec::new();
            for _ in 0..item_count {
                let item_length = reader.read_varint()?;
                stack.push(reader.read_bytes(item_length)?);
            }
            witness.push(stack);
        }
    }

    let lock_time = reader.read_u32_le()?;

    if reader.remaining() != 0 {
        return Err(RelayError::TrailingBytes(reader.remaining()));
    }

    Ok(ParsedTransaction {
        version,
        has_witness,
        inputs,
        outputs,
        witness,
        lock_time,
    })
}

/// Serialize a transaction. With `include_witness` false (or on a
/// transaction without witness data) the legacy layout is produced.
/// Exact inverse of [`parse`] for the layout the flags select.
pub fn serialize(tx: &ParsedTransaction, include_witness: bool) -> Vec<u8> {
    let segwit = include_witness && tx.has_witness;
    let mut out = Vec::new();

    out.extend_from_slice(&tx.version.to_le_bytes());
    if segwit {
        out.push(SEGWIT_MARKER);
        out.push(SEGWIT_FLAG);
    }

    write_varint(&mut out, tx.inputs.len() as u64);
    for input in &tx.inputs {
        out.extend_from_slice(&input.prevout.txid);
        out.extend_from_slice(&input.prevout.vout.to_le_bytes());
        write_varint(&mut out, input.script_sig.len() as u64);
        out.extend_from_slice(&input.script_sig);
        out.extend_from_slice(&input.sequence.to_le_bytes());
    }

    write_varint(&mut out, tx.outputs.len() as u64);
    for output in &tx.outputs {
        out.extend_from_slice(&output.value.to_le_bytes());
        write_varint(&mut out, output.script_pubkey.len() as u64);
        out.extend_from_slice(&output.script_pubkey);
    }

    if segwit {
        for stack in &tx.witness {
            write_varint(&mut out, stack.len() as u64);
            for item in stack {
                write_varint(&mut out, item.len() as u64);
                out.extend_from_slice(item);
            }
        }
    }

    out.extend_from_slice(&tx.lock_time.to_le_bytes());
    out
}

/// Transaction id over the witness-stripped serialization, natural byte
/// order. Identical whether or not the source bytes carried a witness
/// section; txid is defined over the legacy layout.
pub fn legacy_txid(tx: &ParsedTransaction) -> Hash {
    sha256d(&serialize(tx, false))
}

/// Witness transaction id over the full serialization. Equals
/// [`legacy_txid`] for a transaction without witness data.
pub fn wtxid(tx: &ParsedTransaction) -> Hash {
    sha256d(&serialize(tx, true))
}
