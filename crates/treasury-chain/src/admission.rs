//! C6: spend admission (§4.6), the component that ties every other one
//! together at block-connect time. Mirrors the teacher's
//! `verify_block_transactions` in shape: one pass validating shared
//! preconditions, then a per-transaction loop, each step returning a typed
//! error the instant something doesn't hold.
//!
//! A `TSpend`'s declared expiry is carried on `tx.lock_time` as a height
//! lock — `bitcoin::Transaction` has no separate expiry field the way the
//! wire format this was distilled from does, and block-height locktime is
//! the closest existing concept (see `DESIGN.md`).

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::Amount;
use bitcoin::Transaction;
use treasury_common::BlockIndex;
use treasury_common::BlockNode;
use treasury_common::NetworkParams;

use crate::balance;
use crate::error::AdmissionError;
use crate::error::ScriptError;
use crate::error::TreasuryError;
use crate::pi_key::PiKeyring;
use crate::script;
use crate::script::Classification;
use crate::store::StoreTxn;
use crate::votes;
use crate::votes::VoteSource;

fn declared_expiry(tx: &Transaction) -> Result<u32, AdmissionError> {
    match tx.lock_time {
        LockTime::Blocks(height) => Ok(height.to_consensus_u32()),
        LockTime::Seconds(_) => Err(AdmissionError::InvalidTSpendWindow),
    }
}

/// Connects block `node` (whose stake-tree transactions are `stake_transactions`,
/// previous node `prev`): runs every admission check (§4.6 steps 1-7), then
/// writes the block's treasury record (step 8). Returns the new balance.
#[allow(clippy::too_many_arguments)]
#[tracing::instrument(skip_all, fields(height = node.height()))]
pub fn connect_block<N, I, V>(
    txn: &mut StoreTxn<'_>,
    stake_transactions: &[Transaction],
    node: &N,
    prev: &N,
    params: &NetworkParams,
    index: &I,
    pi_keyring: &dyn PiKeyring,
    vote_source: &V,
) -> Result<i64, TreasuryError>
where
    N: BlockNode,
    I: BlockIndex<N>,
    V: VoteSource<N>,
{
    // Step 1: partition the stake tree.
    let mut classifications = Vec::with_capacity(stake_transactions.len());
    let mut spends: Vec<&Transaction> = Vec::new();
    let mut treasury_base_count = 0usize;

    for tx in stake_transactions {
        match script::classify(tx, params) {
            Ok(c @ Classification::TreasuryBase { .. }) => {
                treasury_base_count += 1;
                classifications.push(c);
            }
            Ok(c @ Classification::TAdd { .. }) => classifications.push(c),
            Ok(c @ Classification::TSpend { .. }) => {
                spends.push(tx);
                classifications.push(c);
            }
            Err(ScriptError::InvalidTxVersion) => {
                // Not treasury-shaped: some other stake-tree transaction
                // (a ticket purchase, a plain vote), outside this
                // component's concern.
            }
            Err(e) => {
                // Treasury-versioned but matches no valid shape: a block
                // rejection, not a silent drop (§7).
                return Err(e.into());
            }
        }
    }

    if treasury_base_count > 1 {
        return Err(AdmissionError::MultipleTreasuryBases.into());
    }

    // Step 2: nothing to admit.
    if spends.is_empty() {
        let balance = balance::write_block_record(txn, node, params, &classifications)?;
        return Ok(balance);
    }

    // Step 3: TVI-boundary check.
    if node.height() % params.tvi != 0 {
        return Err(AdmissionError::NotTVI.into());
    }

    // Step 4: declared outlay.
    let mut want_spend = Amount::ZERO;
    for tx in &spends {
        let classification = script::check_tspend(tx)?;
        want_spend += classification.declared_value();
    }

    // Step 5: anti-depletion.
    let treasury_balance = balance::compute_balance(txn, prev, params)?;
    if treasury_balance < want_spend.to_sat() as i64 {
        return Err(AdmissionError::InvalidExpenditure.into());
    }

    // Step 6: policy-window expenditure cap.
    let add_total = policy_window_inflow(txn, prev, params)?;
    let allowed = add_total + add_total / 2;
    if want_spend.to_sat() as i64 > allowed {
        return Err(AdmissionError::InvalidExpenditure.into());
    }

    // Step 7: per-spend checks.
    for tx in &spends {
        let classification = script::check_tspend(tx)?;
        let (pubkey, signature) = match &classification {
            Classification::TSpend {
                pubkey, signature, ..
            } => (pubkey, signature),
            _ => unreachable!("check_tspend only returns Classification::TSpend"),
        };

        if !pi_keyring.is_known(pubkey) {
            return Err(AdmissionError::UnknownPiKey.into());
        }
        let message = tx.compute_txid();
        if !pi_keyring.verify(pubkey, message.as_ref(), signature) {
            return Err(AdmissionError::InvalidPiSignature.into());
        }

        let expiry = declared_expiry(tx)?;
        if node.height() >= expiry {
            return Err(AdmissionError::Expired.into());
        }

        let spend_hash = tx.compute_txid();
        let tally = votes::count_votes(prev, spend_hash, expiry, params, vote_source)?;
        if !tally.approved(params) {
            return Err(AdmissionError::NotEnoughTSpendVotes.into());
        }

        if let Some(record) = txn.get_tspend(&spend_hash)? {
            for mined_hash in &record.blocks {
                if let Some(mined_node) = index.resolve(*mined_hash) {
                    if let Some(anc) = prev.ancestor_at(mined_node.height()) {
                        if anc.hash() == mined_node.hash() {
                            return Err(AdmissionError::TSpendExists.into());
                        }
                    }
                }
            }
        }

        txn.append_tspend(spend_hash, node.hash())?;
    }

    // Step 8.
    let balance = balance::write_block_record(txn, node, params, &classifications)?;
    Ok(balance)
}

/// Sums positive deltas (`add = Σ max(0, δ)`) over the `POLICY·TVI·MUL + 1`
/// blocks ending at `prev`, inclusive (§4.6 step 6). Per the spec's own
/// flagged open question, only `add` feeds the 150% cap — prior spends are
/// not subtracted first, reproducing the source's behavior exactly.
fn policy_window_inflow<N: BlockNode>(
    txn: &StoreTxn<'_>,
    prev: &N,
    params: &NetworkParams,
) -> Result<i64, TreasuryError> {
    let window_len = params.policy_window_len();
    let mut add_total: i64 = 0;
    let mut cur = Some(prev.clone());
    let mut visited = 0u32;
    while let Some(cur_node) = cur {
        if visited >= window_len {
            break;
        }
        if let Some(record) = txn.get_treasury(&cur_node.hash())? {
            add_total += record.deltas.iter().filter(|d| **d > 0).sum::<i64>();
        }
        visited += 1;
        cur = cur_node.parent();
    }
    Ok(add_total)
}

/// Disconnects block `node`: removes its treasury record and trims each of
/// its spends from the `tspend-mined` history (§6 `disconnect_block`,
/// `SPEC_FULL.md` §C).
pub fn disconnect_block<N: BlockNode>(
    txn: &mut StoreTxn<'_>,
    stake_transactions: &[Transaction],
    node: &N,
    params: &NetworkParams,
) -> Result<(), TreasuryError> {
    for tx in stake_transactions {
        if let Ok(Classification::TSpend { .. }) = script::classify(tx, params) {
            txn.remove_tspend(tx.compute_txid(), node.hash())?;
        }
    }
    txn.remove_treasury(node.hash());
    Ok(())
}
