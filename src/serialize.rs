//! Canonical byte encodings: headers, transactions and the integer codecs
//! used by the wire format (CompactSize) and by persisted index records
//! (MSB base-128 VARINT).

use bitcoin_hashes::{sha256d, Hash as BitcoinHash, HashEngine};

use crate::error::{ConsensusError, Result};
use crate::types::*;

/// Size of an encoded block header
pub const HEADER_SIZE: usize = 80;

/// Double SHA-256
pub fn sha256d(data: &[u8]) -> Hash {
    let mut engine = sha256d::Hash::engine();
    engine.input(data);
    let result = sha256d::Hash::from_engine(engine);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Write a CompactSize length prefix
pub fn write_compact_size(out: &mut Vec<u8>, value: u64) {
    if value < 0xfd {
        out.push(value as u8);
    } else if value <= 0xffff {
        out.push(0xfd);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= 0xffff_ffff {
        out.push(0xfe);
        out.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// Encoded length of a CompactSize prefix
pub fn compact_size_len(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Write an MSB base-128 VARINT. Each continuation byte carries an implicit
/// +1 so every value has exactly one encoding.
pub fn write_varint(out: &mut Vec<u8>, value: u64) {
    let mut tmp = [0u8; 10];
    let mut len = 0;
    let mut n = value;
    loop {
        tmp[len] = (n & 0x7f) as u8 | if len > 0 { 0x80 } else { 0x00 };
        if n <= 0x7f {
            break;
        }
        n = (n >> 7) - 1;
        len += 1;
    }
    for i in (0..=len).rev() {
        out.push(tmp[i]);
    }
}

/// Serialize a block header: version, prev hash, merkle root, time, bits, nonce
pub fn serialize_header(header: &BlockHeader) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE);
    write_header(&mut bytes, header);
    bytes
}

pub fn write_header(out: &mut Vec<u8>, header: &BlockHeader) {
    out.extend_from_slice(&header.version.to_le_bytes());
    out.extend_from_slice(&header.prev_block_hash);
    out.extend_from_slice(&header.merkle_root);
    out.extend_from_slice(&header.timestamp.to_le_bytes());
    out.extend_from_slice(&header.bits.to_le_bytes());
    out.extend_from_slice(&header.nonce.to_le_bytes());
}

/// Serialize a transaction in the legacy (non-witness) encoding
pub fn serialize_transaction(tx: &Transaction) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&tx.version.to_le_bytes());

    write_compact_size(&mut bytes, tx.inputs.len() as u64);
    for input in &tx.inputs {
        bytes.extend_from_slice(&input.prevout.hash);
        bytes.extend_from_slice(&input.prevout.index.to_le_bytes());
        write_compact_size(&mut bytes, input.script_sig.len() as u64);
        bytes.extend_from_slice(&input.script_sig);
        bytes.extend_from_slice(&input.sequence.to_le_bytes());
    }

    write_compact_size(&mut bytes, tx.outputs.len() as u64);
    for output in &tx.outputs {
        bytes.extend_from_slice(&output.value.to_le_bytes());
        write_compact_size(&mut bytes, output.script_pubkey.len() as u64);
        bytes.extend_from_slice(&output.script_pubkey);
    }

    bytes.extend_from_slice(&tx.lock_time.to_le_bytes());
    bytes
}

/// Serialized block size without materializing the whole block
pub fn block_serialized_size(block: &Block) -> usize {
    let tx_bytes: usize = block
        .transactions
        .iter()
        .map(|tx| tx.serialized_size())
        .sum();
    HEADER_SIZE + compact_size_len(block.transactions.len() as u64) + tx_bytes
}

/// Cursor over an encoded byte slice
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ConsensusError::Serialization(format!(
                "unexpected end of data: wanted {} bytes at offset {}, {} left",
                len,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.read_bytes(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.read_bytes(4)?);
        Ok(i32::from_le_bytes(buf))
    }

    pub fn read_hash(&mut self) -> Result<Hash> {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(self.read_bytes(32)?);
        Ok(hash)
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let mut n: u64 = 0;
        loop {
            let byte = self.read_u8()?;
            if n > (u64::MAX >> 7) {
                return Err(ConsensusError::Serialization("VARINT too large".to_string()));
            }
            n = (n << 7) | u64::from(byte & 0x7f);
            if byte & 0x80 != 0 {
                n = n
                    .checked_add(1)
                    .ok_or_else(|| ConsensusError::Serialization("VARINT too large".to_string()))?;
            } else {
                return Ok(n);
            }
        }
    }

    pub fn read_header(&mut self) -> Result<BlockHeader> {
        Ok(BlockHeader {
            version: self.read_i32_le()?,
            prev_block_hash: self.read_hash()?,
            merkle_root: self.read_hash()?,
            timestamp: self.read_u32_le()?,
            bits: self.read_u32_le()?,
            nonce: self.read_u32_le()?,
        })
    }
}
