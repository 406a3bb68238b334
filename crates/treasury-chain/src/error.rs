//! Closed error taxonomy for the treasury subsystem (§7).
//!
//! Each component owns a leaf enum; [`TreasuryError`] wraps them the way
//! the teacher's `BlockchainError` wraps `BlockValidationErrors` (see
//! `consensus.rs`) so call sites can propagate with `?` while the
//! block-validation driver still branches on the specific kind.
//! `MissingKey` from §4.3 is deliberately *not* a variant here — it is
//! represented as `Option::None` at the store API, since the spec calls it
//! "a recoverable signal, not an error".

use thiserror::Error;

/// C1 codec failures on encode.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum SerializeError {
    #[error("treasury record balance is negative: {0}")]
    NegativeBalance(i64),
    #[error("treasury record carries {0} deltas, exceeding the per-block limit")]
    TooManyDeltas(usize),
}

/// C1 codec failures on decode.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum DeserializeError {
    #[error("unexpected end of input while decoding a treasury record")]
    UnexpectedEof,
    #[error("decoded delta count {0} exceeds the per-block limit")]
    TooManyDeltas(i64),
    #[error("decoded delta count is negative: {0}")]
    NegativeCount(i64),
    #[error("{0} trailing bytes after a fully-decoded treasury record")]
    TrailingBytes(usize),
}

/// C2's closed script-classification enumeration (§4.2).
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ScriptError {
    #[error("transaction version is not the treasury version")]
    InvalidTxVersion,
    #[error("wrong number of inputs or outputs for this transaction shape")]
    InvalidCount,
    #[error("output is not at the consensus script version")]
    InvalidVersion,
    #[error("script length is out of bounds")]
    InvalidScriptLength,
    #[error("fixed-length field has the wrong length")]
    InvalidLength,
    #[error("unrecognized or misplaced opcode")]
    InvalidOpcode,
    #[error("signature script does not have the expected token count")]
    InvalidTokenCount,
    #[error("signature token is not a validly encoded signature")]
    InvalidSignature,
    #[error("public key token is not a validly encoded compressed public key")]
    InvalidPubkey,
    #[error("transaction does not match any treasury shape")]
    InvalidTransaction,
    #[error("payout output does not begin with the treasury-generate opcode")]
    InvalidTGen,
    #[error("spend transaction's null-data output is malformed")]
    InvalidSpendScript,
    #[error("stake-change output is malformed")]
    InvalidChange,
    #[error("first output is not the treasury-add opcode")]
    InvalidOpcode0,
    #[error("second output is not the expected opcode sequence")]
    InvalidOpcode1,
    #[error("does not match any recognized treasury transaction shape")]
    Invalid,
}

/// C3 store failures. `MissingKey` is intentionally absent: see module docs.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Serialize(#[from] SerializeError),
    #[error(transparent)]
    Deserialize(#[from] DeserializeError),
    #[error("treasury store backend error: {0}")]
    Backend(String),
}

/// C6 admission failures (§4.6/§7), supplemented with `MultipleTreasuryBases`,
/// `UnknownPiKey` and `InvalidPiSignature` per `SPEC_FULL.md` §C.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("spend transaction included outside a TVI-boundary block")]
    NotTVI,
    #[error("spend transaction's expiry does not align to a TVI boundary")]
    InvalidTSpendWindow,
    #[error("spend transaction did not reach quorum or approval threshold")]
    NotEnoughTSpendVotes,
    #[error("spend transaction already mined on this branch")]
    TSpendExists,
    #[error("spend would deplete the treasury or exceed the policy-window cap")]
    InvalidExpenditure,
    #[error("spend transaction's expiry has already passed")]
    Expired,
    #[error("spend transaction's public key is not a known Pi key")]
    UnknownPiKey,
    #[error("spend transaction's signature does not verify against its Pi key")]
    InvalidPiSignature,
    #[error("block's stake tree contains more than one treasury-base transaction")]
    MultipleTreasuryBases,
    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// Crate-wide error, wrapping every component's leaf enum.
#[derive(Debug, Error)]
pub enum TreasuryError {
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Admission(#[from] AdmissionError),
}
