//! C2: the script classifier. Recognizes the three treasury transaction
//! shapes (§4.2) and extracts the fields the other components need,
//! without ever reaching for a signature-verification engine — that is
//! C6's job, once a Pi key is actually on hand.
//!
//! The teacher's `Consensus::verify_block_transactions` validates a block
//! by looping over outputs/inputs and returning a typed error the moment
//! something doesn't fit (see `consensus.rs`); C2 follows the same shape,
//! one Check function per transaction class.

use bitcoin::Amount;
use bitcoin::OutPoint;
use bitcoin::ScriptBuf;
use bitcoin::Transaction;
use bitcoin::TxOut;
use treasury_common::opcodes;
use treasury_common::NetworkParams;

use crate::error::ScriptError;

/// The extracted, typed result of classifying a treasury-shaped transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// A user deposit. `amount` is the value of `outputs[0]`; an optional
    /// stake-change output, if present, is ignored by the treasury
    /// accounting (§4.4 step 2).
    TAdd { amount: Amount },

    /// A block-reward deposit. `extra_nonce` is the block height carried
    /// in the trailing `OP_RETURN` push.
    TreasuryBase { amount: Amount, extra_nonce: u32 },

    /// A signed, vote-gated disbursement.
    TSpend {
        /// The compressed public key from the signature script, strict
        /// encoding (33 bytes, leading byte 0x02 or 0x03).
        pubkey: [u8; 33],
        /// The raw signature token, including its trailing sighash-type
        /// byte, exactly as carried in the signature script. Verification
        /// against `pubkey` is C6's job, not C2's.
        signature: Vec<u8>,
        /// The 32-byte nonce from the leading null-data output.
        nonce: [u8; 32],
        /// Every payout output's value, in output order.
        payouts: Vec<Amount>,
    },
}

impl Classification {
    /// The declared spend value. `bitcoin::Transaction` carries no
    /// separate declared-input-value field (unlike the wire format this
    /// subsystem was distilled from); we define a spend's declared value
    /// as the sum of its payout amounts, i.e. a zero-fee model — see
    /// `DESIGN.md`.
    pub fn declared_value(&self) -> Amount {
        match self {
            Classification::TSpend { payouts, .. } => {
                payouts.iter().copied().fold(Amount::ZERO, |a, b| a + b)
            }
            _ => Amount::ZERO,
        }
    }
}

fn check_version(tx: &Transaction, params: &NetworkParams) -> Result<(), ScriptError> {
    if tx.version.0 != params.treasury_tx_version {
        return Err(ScriptError::InvalidTxVersion);
    }
    Ok(())
}

fn script_ok(out: &TxOut) -> bool {
    // `bitcoin::TxOut` carries no separate script-version tag (a concept
    // from the wire format this was distilled from); we require only a
    // non-empty, standard-sized script here.
    !out.script_pubkey.is_empty() && out.script_pubkey.len() <= 10_000
}

fn is_stake_change_script(script: &ScriptBuf) -> bool {
    script.is_p2pkh() || script.is_p2sh()
}

/// Classifies `tx` as one of the three treasury shapes, or fails with the
/// most specific error available. Transactions of any other version are
/// rejected immediately with `InvalidTxVersion` before any shape is tried.
pub fn classify(tx: &Transaction, params: &NetworkParams) -> Result<Classification, ScriptError> {
    check_version(tx, params)?;

    // TreasuryBase has the most distinctive input shape (a null outpoint),
    // so it is tried first; TSpend's signature-script token grammar is
    // tried next; TAdd, the most permissive shape, is the fallback.
    if let Ok(c) = check_treasury_base(tx) {
        return Ok(c);
    }
    if let Ok(c) = check_tspend(tx) {
        return Ok(c);
    }
    check_tadd(tx)
}

/// `Is-TAdd`.
pub fn is_tadd(tx: &Transaction, params: &NetworkParams) -> bool {
    check_version(tx, params).is_ok() && check_tadd(tx).is_ok()
}

/// `Is-TreasuryBase`.
pub fn is_treasury_base(tx: &Transaction, params: &NetworkParams) -> bool {
    check_version(tx, params).is_ok() && check_treasury_base(tx).is_ok()
}

/// `Is-TSpend`.
pub fn is_tspend(tx: &Transaction, params: &NetworkParams) -> bool {
    check_version(tx, params).is_ok() && check_tspend(tx).is_ok()
}

/// Validates the `TAdd` shape (§4.2 "Add (`TAdd`)"). Does not check
/// `tx.version`; callers go through [`classify`] or [`check_version`] first.
pub fn check_tadd(tx: &Transaction) -> Result<Classification, ScriptError> {
    if tx.input.is_empty() {
        return Err(ScriptError::InvalidCount);
    }
    if tx.output.is_empty() || tx.output.len() > 2 {
        return Err(ScriptError::InvalidCount);
    }
    for out in &tx.output {
        if !script_ok(out) {
            return Err(ScriptError::InvalidVersion);
        }
    }
    let first = &tx.output[0].script_pubkey;
    if first.as_bytes() != [opcodes::TREASURY_ADD] {
        return Err(ScriptError::InvalidOpcode0);
    }
    if let Some(change) = tx.output.get(1) {
        if !is_stake_change_script(&change.script_pubkey) {
            return Err(ScriptError::InvalidChange);
        }
    }
    Ok(Classification::TAdd {
        amount: tx.output[0].value,
    })
}

/// Validates the `TreasuryBase` shape (§4.2 "TreasuryBase").
pub fn check_treasury_base(tx: &Transaction) -> Result<Classification, ScriptError> {
    if tx.input.len() != 1 {
        return Err(ScriptError::InvalidCount);
    }
    let input = &tx.input[0];
    if input.previous_output != OutPoint::null() {
        return Err(ScriptError::InvalidTransaction);
    }
    if !input.script_sig.is_empty() {
        return Err(ScriptError::InvalidTransaction);
    }
    if tx.output.len() != 2 {
        return Err(ScriptError::InvalidCount);
    }
    for out in &tx.output {
        if !script_ok(out) {
            return Err(ScriptError::InvalidVersion);
        }
    }
    let add_script = &tx.output[0].script_pubkey;
    if add_script.as_bytes() != [opcodes::TREASURY_ADD] {
        return Err(ScriptError::InvalidOpcode0);
    }
    let nonce_script = tx.output[1].script_pubkey.as_bytes();
    // OP_RETURN, then a direct 4-byte push: 6 bytes total.
    if nonce_script.len() != 6 {
        return Err(ScriptError::InvalidScriptLength);
    }
    if nonce_script[0] != bitcoin::opcodes::all::OP_RETURN.to_u8() || nonce_script[1] != 4 {
        return Err(ScriptError::InvalidOpcode1);
    }
    let mut extra_nonce_bytes = [0u8; 4];
    extra_nonce_bytes.copy_from_slice(&nonce_script[2..6]);
    Ok(Classification::TreasuryBase {
        amount: tx.output[0].value,
        extra_nonce: u32::from_le_bytes(extra_nonce_bytes),
    })
}

/// Validates the `TSpend` shape (§4.2 "Spend (`TSpend`)").
pub fn check_tspend(tx: &Transaction) -> Result<Classification, ScriptError> {
    if tx.input.len() != 1 {
        return Err(ScriptError::InvalidCount);
    }
    if tx.output.len() < 2 {
        return Err(ScriptError::InvalidCount);
    }
    for out in &tx.output {
        if !script_ok(out) {
            return Err(ScriptError::InvalidVersion);
        }
    }

    let (pubkey, signature) = parse_tspend_sig_script(&tx.input[0].script_sig)?;
    let nonce = parse_tspend_nonce_output(&tx.output[0])?;

    let mut payouts = Vec::with_capacity(tx.output.len() - 1);
    for out in &tx.output[1..] {
        payouts.push(parse_tspend_payout(out)?);
    }

    Ok(Classification::TSpend {
        pubkey,
        signature,
        nonce,
        payouts,
    })
}

/// Parses the three-token signature script: `(sig|sighash)`, `(pubkey)`,
/// `OP_TSPEND`. Returns the extracted compressed public key and the raw
/// signature token (including its trailing sighash-type byte).
fn parse_tspend_sig_script(script_sig: &ScriptBuf) -> Result<([u8; 33], Vec<u8>), ScriptError> {
    let mut instructions = script_sig.instructions();

    let sig_instr = instructions
        .next()
        .ok_or(ScriptError::InvalidTokenCount)?
        .map_err(|_| ScriptError::InvalidSignature)?;
    let sig_bytes = sig_instr
        .push_bytes()
        .ok_or(ScriptError::InvalidSignature)?;
    // A Schnorr signature plus a trailing sighash-type byte.
    if sig_bytes.is_empty() || sig_bytes.len() > 65 {
        return Err(ScriptError::InvalidSignature);
    }
    let signature = sig_bytes.as_bytes().to_vec();

    let pubkey_instr = instructions
        .next()
        .ok_or(ScriptError::InvalidTokenCount)?
        .map_err(|_| ScriptError::InvalidPubkey)?;
    let pubkey_bytes = pubkey_instr
        .push_bytes()
        .ok_or(ScriptError::InvalidPubkey)?;
    if pubkey_bytes.len() != 33 {
        return Err(ScriptError::InvalidPubkey);
    }
    let pubkey_bytes = pubkey_bytes.as_bytes();
    if pubkey_bytes[0] != 0x02 && pubkey_bytes[0] != 0x03 {
        return Err(ScriptError::InvalidPubkey);
    }
    let mut pubkey = [0u8; 33];
    pubkey.copy_from_slice(pubkey_bytes);

    let opcode_instr = instructions
        .next()
        .ok_or(ScriptError::InvalidTokenCount)?
        .map_err(|_| ScriptError::InvalidOpcode)?;
    let opcode = match opcode_instr {
        bitcoin::script::Instruction::Op(op) => op.to_u8(),
        bitcoin::script::Instruction::PushBytes(_) => return Err(ScriptError::InvalidOpcode),
    };
    if opcode != opcodes::TREASURY_SPEND {
        return Err(ScriptError::InvalidOpcode);
    }

    if instructions.next().is_some() {
        return Err(ScriptError::InvalidTokenCount);
    }

    Ok((pubkey, signature))
}

/// Validates `outputs[0]`: strict null-data with exactly a 32-byte push.
fn parse_tspend_nonce_output(out: &TxOut) -> Result<[u8; 32], ScriptError> {
    let mut instructions = out.script_pubkey.instructions();
    let op = instructions.next().ok_or(ScriptError::InvalidSpendScript)?;
    match op.map_err(|_| ScriptError::InvalidSpendScript)? {
        bitcoin::script::Instruction::Op(op) if op == bitcoin::opcodes::all::OP_RETURN => {}
        _ => return Err(ScriptError::InvalidSpendScript),
    }
    let push = instructions
        .next()
        .ok_or(ScriptError::InvalidSpendScript)?
        .map_err(|_| ScriptError::InvalidSpendScript)?;
    let bytes = push.push_bytes().ok_or(ScriptError::InvalidSpendScript)?;
    if bytes.len() != 32 {
        return Err(ScriptError::InvalidLength);
    }
    if instructions.next().is_some() {
        return Err(ScriptError::InvalidSpendScript);
    }
    let mut nonce = [0u8; 32];
    nonce.copy_from_slice(bytes.as_bytes());
    Ok(nonce)
}

/// Validates a payout output: `OP_TGEN` followed by a standard P2PKH/P2SH.
fn parse_tspend_payout(out: &TxOut) -> Result<Amount, ScriptError> {
    let bytes = out.script_pubkey.as_bytes();
    let (first, rest) = bytes.split_first().ok_or(ScriptError::InvalidTGen)?;
    if *first != opcodes::TREASURY_GENERATE {
        return Err(ScriptError::InvalidTGen);
    }
    let inner = ScriptBuf::from_bytes(rest.to_vec());
    if !inner.is_p2pkh() && !inner.is_p2sh() {
        return Err(ScriptError::InvalidTGen);
    }
    Ok(out.value)
}

#[cfg(test)]
mod tests {
    use bitcoin::absolute::LockTime;
    use bitcoin::hashes::Hash;
    use bitcoin::transaction::Version;
    use bitcoin::Sequence;
    use bitcoin::Txid;
    use bitcoin::Witness;

    use super::*;

    const PARAMS: NetworkParams = NetworkParams::mainnet_like();

    fn base_tx(inputs: Vec<bitcoin::TxIn>, outputs: Vec<TxOut>) -> Transaction {
        Transaction {
            version: Version(PARAMS.treasury_tx_version),
            lock_time: LockTime::ZERO,
            input: inputs,
            output: outputs,
        }
    }

    fn arbitrary_input() -> bitcoin::TxIn {
        bitcoin::TxIn {
            previous_output: OutPoint::new(Txid::from_byte_array([7u8; 32]), 0),
            script_sig: ScriptBuf::from_bytes(vec![0x00]),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }
    }

    fn tadd_output(amount: u64) -> TxOut {
        TxOut {
            value: Amount::from_sat(amount),
            script_pubkey: ScriptBuf::from_bytes(vec![opcodes::TREASURY_ADD]),
        }
    }

    #[test]
    fn classifies_tadd_single_output() {
        let tx = base_tx(vec![arbitrary_input()], vec![tadd_output(500)]);
        assert_eq!(
            classify(&tx, &PARAMS).unwrap(),
            Classification::TAdd {
                amount: Amount::from_sat(500)
            }
        );
        assert!(is_tadd(&tx, &PARAMS));
    }

    #[test]
    fn classifies_tadd_with_stake_change() {
        let change = TxOut {
            value: Amount::from_sat(10),
            script_pubkey: ScriptBuf::new_p2pkh(&bitcoin::PubkeyHash::from_byte_array([1u8; 20])),
        };
        let tx = base_tx(vec![arbitrary_input()], vec![tadd_output(500), change]);
        assert!(matches!(
            classify(&tx, &PARAMS),
            Ok(Classification::TAdd { .. })
        ));
    }

    #[test]
    fn tadd_rejects_bad_change_script() {
        let bogus_change = TxOut {
            value: Amount::from_sat(10),
            script_pubkey: ScriptBuf::from_bytes(vec![0xAB, 0xCD]),
        };
        let tx = base_tx(vec![arbitrary_input()], vec![tadd_output(500), bogus_change]);
        assert_eq!(check_tadd(&tx), Err(ScriptError::InvalidChange));
    }

    #[test]
    fn wrong_version_rejected() {
        let mut tx = base_tx(vec![arbitrary_input()], vec![tadd_output(500)]);
        tx.version = Version(1);
        assert_eq!(classify(&tx, &PARAMS), Err(ScriptError::InvalidTxVersion));
    }

    fn treasury_base_tx(height: u32) -> Transaction {
        let input = bitcoin::TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        };
        let nonce_script = {
            let mut b = vec![bitcoin::opcodes::all::OP_RETURN.to_u8(), 4];
            b.extend_from_slice(&height.to_le_bytes());
            ScriptBuf::from_bytes(b)
        };
        base_tx(
            vec![input],
            vec![
                tadd_output(3_000_000_000),
                TxOut {
                    value: Amount::ZERO,
                    script_pubkey: nonce_script,
                },
            ],
        )
    }

    #[test]
    fn classifies_treasury_base() {
        let tx = treasury_base_tx(12345);
        assert_eq!(
            classify(&tx, &PARAMS).unwrap(),
            Classification::TreasuryBase {
                amount: Amount::from_sat(3_000_000_000),
                extra_nonce: 12345
            }
        );
    }

    #[test]
    fn treasury_base_rejects_nonempty_sigscript() {
        let mut tx = treasury_base_tx(1);
        tx.input[0].script_sig = ScriptBuf::from_bytes(vec![0x51]);
        assert_eq!(check_treasury_base(&tx), Err(ScriptError::InvalidTransaction));
    }

    fn tspend_tx(payout_count: usize) -> Transaction {
        let pubkey = {
            let mut p = [0x02u8; 33];
            p[0] = 0x02;
            p
        };
        let mut sig_script_bytes = Vec::new();
        sig_script_bytes.push(64); // push 64 bytes
        sig_script_bytes.extend_from_slice(&[0xAAu8; 64]);
        sig_script_bytes.push(33); // push 33 bytes
        sig_script_bytes.extend_from_slice(&pubkey);
        sig_script_bytes.push(opcodes::TREASURY_SPEND);
        let input = bitcoin::TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::from_bytes(sig_script_bytes),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        };

        let mut nonce_bytes = vec![bitcoin::opcodes::all::OP_RETURN.to_u8(), 32];
        nonce_bytes.extend_from_slice(&[0x11u8; 32]);
        let nonce_out = TxOut {
            value: Amount::ZERO,
            script_pubkey: ScriptBuf::from_bytes(nonce_bytes),
        };

        let mut outputs = vec![nonce_out];
        for i in 0..payout_count {
            let mut script = vec![opcodes::TREASURY_GENERATE];
            script.extend_from_slice(
                ScriptBuf::new_p2pkh(&bitcoin::PubkeyHash::from_byte_array([i as u8; 20]))
                    .as_bytes(),
            );
            outputs.push(TxOut {
                value: Amount::from_sat(1000 * (i as u64 + 1)),
                script_pubkey: ScriptBuf::from_bytes(script),
            });
        }
        base_tx(vec![input], outputs)
    }

    #[test]
    fn classifies_tspend() {
        let tx = tspend_tx(2);
        let c = classify(&tx, &PARAMS).unwrap();
        match c {
            Classification::TSpend { payouts, nonce, .. } => {
                assert_eq!(payouts, vec![Amount::from_sat(1000), Amount::from_sat(2000)]);
                assert_eq!(nonce, [0x11u8; 32]);
            }
            _ => panic!("expected TSpend"),
        }
    }

    #[test]
    fn tspend_rejects_wrong_token_count() {
        let mut tx = tspend_tx(1);
        // Drop the trailing opcode token, leaving only 2 tokens.
        let bytes = tx.input[0].script_sig.as_bytes();
        let trimmed = &bytes[..bytes.len() - 1];
        tx.input[0].script_sig = ScriptBuf::from_bytes(trimmed.to_vec());
        assert_eq!(check_tspend(&tx), Err(ScriptError::InvalidTokenCount));
    }

    #[test]
    fn tspend_rejects_bad_pubkey_prefix() {
        let mut tx = tspend_tx(1);
        let mut bytes = tx.input[0].script_sig.as_bytes().to_vec();
        // Pubkey push begins right after the 1-byte len + 64-byte sig push.
        bytes[1 + 64 + 1] = 0x04;
        tx.input[0].script_sig = ScriptBuf::from_bytes(bytes);
        assert_eq!(check_tspend(&tx), Err(ScriptError::InvalidPubkey));
    }

    #[test]
    fn tspend_rejects_short_nonce_push() {
        let mut tx = tspend_tx(1);
        let mut nonce_bytes = vec![bitcoin::opcodes::all::OP_RETURN.to_u8(), 31];
        nonce_bytes.extend_from_slice(&[0x11u8; 31]);
        tx.output[0].script_pubkey = ScriptBuf::from_bytes(nonce_bytes);
        assert_eq!(check_tspend(&tx), Err(ScriptError::InvalidLength));
    }

    #[test]
    fn tspend_rejects_payout_missing_tgen() {
        let mut tx = tspend_tx(1);
        let p2pkh = ScriptBuf::new_p2pkh(&bitcoin::PubkeyHash::from_byte_array([9u8; 20]));
        tx.output[1].script_pubkey = p2pkh;
        assert_eq!(check_tspend(&tx), Err(ScriptError::InvalidTGen));
    }

    #[test]
    fn declared_value_sums_payouts() {
        let tx = tspend_tx(3);
        let c = classify(&tx, &PARAMS).unwrap();
        assert_eq!(c.declared_value(), Amount::from_sat(1000 + 2000 + 3000));
    }
}
