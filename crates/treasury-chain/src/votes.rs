//! C5: window derivation and vote tally (§4.5).
//!
//! The subsystem never owns block or transaction storage (§9 "no ownership
//! of the graph"); the caller supplies the stake-vote transactions for a
//! given node through [`VoteSource`], the same externally-injected-capability
//! shape as [`BlockNode`] itself.

use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::OP_RETURN;
use bitcoin::script::Instruction;
use bitcoin::Transaction;
use bitcoin::Txid;
use treasury_common::BlockNode;
use treasury_common::NetworkParams;

use crate::error::AdmissionError;

/// A single ticket-holder's vote on a pending spend, extracted from a
/// stake-vote transaction's trailing `OP_RETURN` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteTuple {
    pub spend_tx_hash: Txid,
    pub choice: VoteChoice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteChoice {
    Yes,
    No,
    Abstain,
}

/// Supplies the stake-vote transactions included in the block `node`
/// represents. Implemented by the embedder; this subsystem only parses
/// what comes back.
pub trait VoteSource<N: BlockNode> {
    fn stake_vote_transactions(&self, node: &N) -> Vec<Transaction>;
}

/// The result of a tally over one spend's voting window (§6's `count_votes`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteTally {
    pub window_start: u32,
    pub window_end: u32,
    pub yes: u64,
    pub no: u64,
}

impl VoteTally {
    /// `approved ⇔ (yes + no) ≥ quorum ∧ yes ≥ required`.
    pub fn approved(&self, params: &NetworkParams) -> bool {
        let span = (self.window_end - self.window_start) as u64;
        let max_votes = params.tickets_per_block as u64 * span;
        let quorum = max_votes * params.quorum_n / params.quorum_d;
        let counted = self.yes + self.no;
        let required = counted * params.approve_n / params.approve_d;
        counted >= quorum && self.yes >= required
    }
}

/// Derives `(window_start, window_end)` from a spend's `expiry`.
///
/// `window_end = expiry - 2`; `window_start = window_end - TVI*MUL`. Both
/// must exist (no underflow) and `window_end` must land on a TVI boundary.
pub fn vote_window(expiry: u32, params: &NetworkParams) -> Result<(u32, u32), AdmissionError> {
    let window_end = expiry
        .checked_sub(2)
        .ok_or(AdmissionError::InvalidTSpendWindow)?;
    let window_start = window_end
        .checked_sub(params.vote_window_len())
        .ok_or(AdmissionError::InvalidTSpendWindow)?;
    if window_end % params.tvi != 0 {
        return Err(AdmissionError::InvalidTSpendWindow);
    }
    Ok((window_start, window_end))
}

/// Tallies votes for `spend_hash` by walking backward from `prev` (not yet
/// connected block `B`'s previous node) through every block whose height is
/// at least `window_start`.
#[tracing::instrument(skip(params, source), fields(spend = %spend_hash))]
pub fn count_votes<N, S>(
    prev: &N,
    spend_hash: Txid,
    expiry: u32,
    params: &NetworkParams,
    source: &S,
) -> Result<VoteTally, AdmissionError>
where
    N: BlockNode,
    S: VoteSource<N>,
{
    let (window_start, window_end) = vote_window(expiry, params)?;

    let mut yes = 0u64;
    let mut no = 0u64;
    let mut cur = Some(prev.clone());
    while let Some(node) = cur {
        if node.height() < window_start {
            break;
        }
        for tx in source.stake_vote_transactions(&node) {
            for tuple in extract_votes(&tx) {
                if tuple.spend_tx_hash != spend_hash {
                    continue;
                }
                match tuple.choice {
                    VoteChoice::Yes => yes += 1,
                    VoteChoice::No => no += 1,
                    VoteChoice::Abstain => {}
                }
            }
        }
        cur = node.parent();
    }

    Ok(VoteTally {
        window_start,
        window_end,
        yes,
        no,
    })
}

/// Parses the trailing treasury-vote `OP_RETURN` payload: zero or more
/// 33-byte tuples, each a 32-byte spend hash followed by a one-byte choice
/// (0 = Yes, 1 = No, 2 = Abstain). Anything else — a malformed payload, or
/// an unrecognized choice byte — is logged and ignored, per §4.5 step 2.
fn extract_votes(tx: &Transaction) -> Vec<VoteTuple> {
    let Some(last) = tx.output.last() else {
        return Vec::new();
    };
    let mut instructions = last.script_pubkey.instructions();
    match instructions.next() {
        Some(Ok(Instruction::Op(op))) if op == OP_RETURN => {}
        _ => return Vec::new(),
    }
    let data = match instructions.next() {
        Some(Ok(Instruction::PushBytes(data))) => data,
        _ => return Vec::new(),
    };
    let bytes = data.as_bytes();
    if bytes.is_empty() || bytes.len() % 33 != 0 {
        return Vec::new();
    }
    bytes
        .chunks_exact(33)
        .filter_map(|chunk| {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&chunk[..32]);
            let choice = match chunk[32] {
                0 => VoteChoice::Yes,
                1 => VoteChoice::No,
                2 => VoteChoice::Abstain,
                other => {
                    tracing::warn!(choice = other, "unrecognized vote choice, ignoring");
                    return None;
                }
            };
            Some(VoteTuple {
                spend_tx_hash: Txid::from_byte_array(hash),
                choice,
            })
        })
        .collect()
}
