//! Consensus-critical treasury subsystem: recognizes the three treasury
//! transaction shapes, maintains a coinbase-maturity-delayed balance,
//! tallies ticket-holder votes on proposed spends, enforces anti-depletion
//! and policy-window expenditure limits, and persists all of it so
//! reorganizations reproduce identical state.
//!
//! [`TreasurySubsystem`] is the facade the chain-validation driver talks
//! to; the six components (`codec`, `script`, `store`, `balance`, `votes`,
//! `admission`) are exposed as modules for callers that need finer control
//! (e.g. querying `balance_at` without a block to connect).

pub mod admission;
pub mod balance;
pub mod codec;
pub mod error;
pub mod pi_key;
pub mod script;
pub mod store;
pub mod votes;

use bitcoin::BlockHash;
use bitcoin::Transaction;
use bitcoin::Txid;
use treasury_common::BlockIndex;
use treasury_common::BlockNode;
use treasury_common::NetworkParams;

pub use codec::TSpendMinedRecord;
pub use codec::TreasuryRecord;
pub use error::TreasuryError;
pub use pi_key::PiKeyring;
pub use script::Classification;
pub use store::TreasuryStore;
pub use votes::VoteSource;
pub use votes::VoteTally;

/// The snapshot returned by [`TreasurySubsystem::balance_at`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceSnapshot {
    pub hash: BlockHash,
    pub height: u32,
    pub balance: i64,
    pub deltas: Vec<i64>,
}

/// Ties the six components together behind the external contract the
/// chain-validation driver talks to (§6).
pub struct TreasurySubsystem {
    params: NetworkParams,
}

impl TreasurySubsystem {
    pub fn new(params: NetworkParams) -> Self {
        TreasurySubsystem { params }
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    /// `classify(tx)`.
    pub fn classify(&self, tx: &Transaction) -> Result<Classification, error::ScriptError> {
        script::classify(tx, &self.params)
    }

    /// `connect_block(txn, block, prev_node)`: runs C6 then C4, returning
    /// the new balance on success.
    #[allow(clippy::too_many_arguments)]
    pub fn connect_block<N, I, V>(
        &self,
        txn: &mut store::StoreTxn<'_>,
        stake_transactions: &[Transaction],
        node: &N,
        prev: &N,
        index: &I,
        pi_keyring: &dyn PiKeyring,
        vote_source: &V,
    ) -> Result<i64, TreasuryError>
    where
        N: BlockNode,
        I: BlockIndex<N>,
        V: VoteSource<N>,
    {
        admission::connect_block(
            txn,
            stake_transactions,
            node,
            prev,
            &self.params,
            index,
            pi_keyring,
            vote_source,
        )
    }

    /// `disconnect_block(txn, block)`: removes this block's treasury record
    /// and trims each of its spends from the tspend-mined history.
    pub fn disconnect_block<N: BlockNode>(
        &self,
        txn: &mut store::StoreTxn<'_>,
        stake_transactions: &[Transaction],
        node: &N,
    ) -> Result<(), TreasuryError> {
        admission::disconnect_block(txn, stake_transactions, node, &self.params)
    }

    /// `balance_at(hash?)`: returns the balance snapshot for `node`.
    /// Resolving "best block when hash is null" and mapping to
    /// `NotKnown`/`NotActive` is the caller's responsibility, since this
    /// subsystem does not track chain tips (§1: agenda activation is a
    /// caller decision).
    pub fn balance_at<N: BlockNode>(
        &self,
        txn: &store::StoreTxn<'_>,
        node: &N,
    ) -> Result<BalanceSnapshot, error::StoreError> {
        let record = txn.get_treasury(&node.hash())?.unwrap_or_default();
        Ok(BalanceSnapshot {
            hash: node.hash(),
            height: node.height(),
            balance: record.balance,
            deltas: record.deltas,
        })
    }

    /// `tspend_inclusions(spend_hash)`.
    pub fn tspend_inclusions(
        &self,
        txn: &store::StoreTxn<'_>,
        spend_hash: &Txid,
    ) -> Result<Vec<BlockHash>, error::StoreError> {
        Ok(txn
            .get_tspend(spend_hash)?
            .map(|r| r.blocks)
            .unwrap_or_default())
    }

    /// `count_votes(block_hdr, prev_node, spend)`.
    pub fn count_votes<N, V>(
        &self,
        prev: &N,
        spend_hash: Txid,
        expiry: u32,
        vote_source: &V,
    ) -> Result<VoteTally, error::AdmissionError>
    where
        N: BlockNode,
        V: VoteSource<N>,
    {
        votes::count_votes(prev, spend_hash, expiry, &self.params, vote_source)
    }
}
