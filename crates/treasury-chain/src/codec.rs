//! C1: bit-exact little-endian serialization of the two on-disk record
//! types (§4.1). The codec is stateless, infallible apart from the two
//! named error kinds, and never touches I/O — it only knows how to turn a
//! record into bytes and back, the same separation of concerns the
//! teacher keeps between `consensus_encode` (pure) and the store that
//! calls it.

use std::io::Cursor;

use bitcoin::consensus::Decodable;
use bitcoin::consensus::Encodable;
use bitcoin::hashes::Hash;
use bitcoin::BlockHash;
use treasury_common::limits::MAX_DELTAS_PER_BLOCK;

use crate::error::DeserializeError;
use crate::error::SerializeError;

/// Per-block accounting row (§3). `balance` is the treasury balance as of
/// this block; `deltas` is every add/spend line appearing in the block's
/// stake tree, in block order, positive for inflows and negative for
/// outflows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TreasuryRecord {
    pub balance: i64,
    pub deltas: Vec<i64>,
}

impl TreasuryRecord {
    pub fn new(balance: i64, deltas: Vec<i64>) -> Self {
        TreasuryRecord { balance, deltas }
    }

    /// Encodes this record to its fixed little-endian wire layout:
    /// `int64 balance, int64 n, int64 deltas[n]`.
    ///
    /// Fails if `balance` is negative or `deltas.len()` exceeds
    /// [`MAX_DELTAS_PER_BLOCK`] — a treasury balance and block content that
    /// could never arise from valid chain state should never be written.
    pub fn encode(&self) -> Result<Vec<u8>, SerializeError> {
        if self.balance < 0 {
            return Err(SerializeError::NegativeBalance(self.balance));
        }
        if self.deltas.len() > MAX_DELTAS_PER_BLOCK {
            return Err(SerializeError::TooManyDeltas(self.deltas.len()));
        }
        let mut buf = Vec::with_capacity(16 + self.deltas.len() * 8);
        self.balance
            .consensus_encode(&mut buf)
            .expect("writing to a Vec never fails");
        (self.deltas.len() as i64)
            .consensus_encode(&mut buf)
            .expect("writing to a Vec never fails");
        for delta in &self.deltas {
            delta
                .consensus_encode(&mut buf)
                .expect("writing to a Vec never fails");
        }
        Ok(buf)
    }

    /// Decodes a record previously produced by [`Self::encode`].
    ///
    /// In strict mode (the default — see [`decode`]), any bytes left over
    /// after a fully-decoded record is an error; the non-strict path is
    /// exposed via [`decode_relaxed`] for embedders that intentionally
    /// pack additional data after the record.
    pub fn decode(bytes: &[u8]) -> Result<Self, DeserializeError> {
        decode(bytes)
    }
}

/// Decodes with strict mode on: trailing bytes after the record are an error.
pub fn decode(bytes: &[u8]) -> Result<TreasuryRecord, DeserializeError> {
    let (record, consumed) = decode_prefix(bytes)?;
    if consumed != bytes.len() {
        return Err(DeserializeError::TrailingBytes(bytes.len() - consumed));
    }
    Ok(record)
}

/// Decodes ignoring any trailing bytes (strict mode off).
pub fn decode_relaxed(bytes: &[u8]) -> Result<TreasuryRecord, DeserializeError> {
    Ok(decode_prefix(bytes)?.0)
}

fn decode_prefix(bytes: &[u8]) -> Result<(TreasuryRecord, usize), DeserializeError> {
    let mut cursor = Cursor::new(bytes);
    let balance =
        i64::consensus_decode(&mut cursor).map_err(|_| DeserializeError::UnexpectedEof)?;
    let n = i64::consensus_decode(&mut cursor).map_err(|_| DeserializeError::UnexpectedEof)?;
    if n < 0 {
        return Err(DeserializeError::NegativeCount(n));
    }
    if n as usize > MAX_DELTAS_PER_BLOCK {
        return Err(DeserializeError::TooManyDeltas(n));
    }
    let mut deltas = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let delta =
            i64::consensus_decode(&mut cursor).map_err(|_| DeserializeError::UnexpectedEof)?;
        deltas.push(delta);
    }
    Ok((
        TreasuryRecord { balance, deltas },
        cursor.position() as usize,
    ))
}

/// History of every block that has included a given spend transaction
/// (§3). Deliberately non-deduplicated: see `append_tspend` in the store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TSpendMinedRecord {
    pub blocks: Vec<BlockHash>,
}

impl TSpendMinedRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.blocks.len() * 32);
        (self.blocks.len() as i64)
            .consensus_encode(&mut buf)
            .expect("writing to a Vec never fails");
        for hash in &self.blocks {
            buf.extend_from_slice(hash.as_byte_array());
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DeserializeError> {
        let mut cursor = Cursor::new(bytes);
        let n = i64::consensus_decode(&mut cursor).map_err(|_| DeserializeError::UnexpectedEof)?;
        if n < 0 {
            return Err(DeserializeError::NegativeCount(n));
        }
        if n as usize > MAX_DELTAS_PER_BLOCK {
            return Err(DeserializeError::TooManyDeltas(n));
        }
        let mut blocks = Vec::with_capacity(n as usize);
        let remaining = &bytes[cursor.position() as usize..];
        if remaining.len() < n as usize * 32 {
            return Err(DeserializeError::UnexpectedEof);
        }
        for i in 0..n as usize {
            let chunk = &remaining[i * 32..i * 32 + 32];
            let mut arr = [0u8; 32];
            arr.copy_from_slice(chunk);
            blocks.push(BlockHash::from_byte_array(arr));
        }
        let consumed = cursor.position() as usize + n as usize * 32;
        if consumed != bytes.len() {
            return Err(DeserializeError::TrailingBytes(bytes.len() - consumed));
        }
        Ok(TSpendMinedRecord { blocks })
    }
}
