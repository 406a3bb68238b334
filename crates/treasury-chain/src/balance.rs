//! C4: the coinbase-maturity-delayed balance engine (§4.4).
//!
//! `balance(B) = balance(parent(B)) + deltas(matured ancestor)`, where the
//! matured ancestor sits `COINBASE_MATURITY` blocks behind `B`. Genesis and
//! any block too young to have a matured ancestor contribute zero deltas —
//! not an error, since the chain simply hasn't run long enough yet.

use bitcoin::Amount;
use treasury_common::relative_ancestor;
use treasury_common::BlockNode;
use treasury_common::NetworkParams;

use crate::codec::TreasuryRecord;
use crate::error::StoreError;
use crate::script::Classification;
use crate::store::StoreTxn;

/// Computes the treasury balance as of `node`, reading the parent's stored
/// record and adding the matured ancestor's deltas (§4.4 steps 1-4).
///
/// Step order matters and is followed exactly: if the matured ancestor is
/// undefined (too early in the chain), return `0` without consulting the
/// store at all. Otherwise a `MissingKey` on *either* the parent's record or
/// the matured ancestor's record resets the whole computation to `0`, not
/// just that term — a record that used to exist and was since pruned (see
/// `StoreTxn::prune_treasury_except`) must not silently read back as "no
/// contribution from that term", since that understates what pruning
/// actually discarded.
#[tracing::instrument(skip(txn, params), fields(height = node.height()))]
pub fn compute_balance<N: BlockNode>(
    txn: &StoreTxn<'_>,
    node: &N,
    params: &NetworkParams,
) -> Result<i64, StoreError> {
    let matured = match relative_ancestor(node, params.coinbase_maturity) {
        Some(matured) => matured,
        None => return Ok(0),
    };

    let parent_balance = match node.parent() {
        Some(parent) => match txn.get_treasury(&parent.hash())? {
            Some(record) => record.balance,
            None => return Ok(0),
        },
        None => 0,
    };

    let delta_sum: i64 = match txn.get_treasury(&matured.hash())? {
        Some(record) => record.deltas.iter().sum(),
        None => return Ok(0),
    };

    Ok(parent_balance + delta_sum)
}

/// Builds and stages the record for `node`, given the block's treasury-tree
/// deltas (one signed `i64` per `TAdd`/`TreasuryBase`/`TSpend` transaction,
/// already resolved by the caller via [`crate::script::classify`]) and the
/// matured-ancestor balance computed by [`compute_balance`] (§4.4 step 2/3).
pub fn deltas_for_classifications(classifications: &[Classification]) -> Vec<i64> {
    classifications
        .iter()
        .map(|c| match c {
            Classification::TAdd { amount } | Classification::TreasuryBase { amount, .. } => {
                amount.to_sat() as i64
            }
            Classification::TSpend { .. } => -(c.declared_value().to_sat() as i64),
        })
        .collect()
}

/// Writes `node`'s treasury record: the balance of `node` itself (i.e. the
/// parent's balance plus the matured ancestor's deltas), paired with this
/// block's own deltas for future blocks to mature against.
pub fn write_block_record<N: BlockNode>(
    txn: &mut StoreTxn<'_>,
    node: &N,
    params: &NetworkParams,
    classifications: &[Classification],
) -> Result<i64, StoreError> {
    let balance = compute_balance(txn, node, params)?;
    let deltas = deltas_for_classifications(classifications);
    let record = TreasuryRecord::new(balance, deltas);
    txn.put_treasury(node.hash(), &record)?;
    Ok(balance)
}

/// The balance at `node`, in whole satoshis, as an [`Amount`] for display
/// and for the policy-window arithmetic in C6.
pub fn balance_amount(balance: i64) -> Amount {
    Amount::from_sat(balance.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use treasury_common::testing::MemChain;

    use super::*;

    fn params() -> NetworkParams {
        let mut p = NetworkParams::mainnet_like();
        p.coinbase_maturity = 3;
        p
    }

    #[test]
    fn genesis_balance_is_zero() {
        let chain = MemChain::new();
        let nodes = chain.extend(0);
        let genesis = &nodes[0];
        let dir = tempfile::tempdir().unwrap();
        let store = crate::store::TreasuryStore::open(dir.path()).unwrap();
        let txn = store.begin();
        assert_eq!(compute_balance(&txn, genesis, &params()).unwrap(), 0);
    }

    #[test]
    fn immature_ancestor_contributes_nothing() {
        let chain = MemChain::new();
        let nodes = chain.extend(2);
        let dir = tempfile::tempdir().unwrap();
        let store = crate::store::TreasuryStore::open(dir.path()).unwrap();
        let mut txn = store.begin();
        // Block 0 has deltas, but height 2 is only 2 blocks ahead of it,
        // short of the maturity window of 3.
        txn.put_treasury(nodes[0].hash(), &TreasuryRecord::new(0, vec![500]))
            .unwrap();
        assert_eq!(compute_balance(&txn, &nodes[2], &params()).unwrap(), 0);
    }

    #[test]
    fn matured_ancestor_deltas_accumulate_forward() {
        let chain = MemChain::new();
        let nodes = chain.extend(5);
        let dir = tempfile::tempdir().unwrap();
        let store = crate::store::TreasuryStore::open(dir.path()).unwrap();
        let mut txn = store.begin();

        // Height 0 (genesis) deposits 1000; it matures at height 3.
        txn.put_treasury(nodes[0].hash(), &TreasuryRecord::new(0, vec![1000]))
            .unwrap();
        txn.put_treasury(nodes[1].hash(), &TreasuryRecord::new(0, vec![]))
            .unwrap();
        txn.put_treasury(nodes[2].hash(), &TreasuryRecord::new(0, vec![]))
            .unwrap();
        let bal3 = compute_balance(&txn, &nodes[3], &params()).unwrap();
        assert_eq!(bal3, 1000);
        txn.put_treasury(nodes[3].hash(), &TreasuryRecord::new(bal3, vec![]))
            .unwrap();

        let bal4 = compute_balance(&txn, &nodes[4], &params()).unwrap();
        assert_eq!(bal4, 1000);
    }

    #[test]
    fn deltas_sum_tadd_and_tspend() {
        let classifications = vec![
            Classification::TAdd {
                amount: Amount::from_sat(500),
            },
            Classification::TSpend {
                pubkey: [0u8; 33],
                signature: vec![0u8; 64],
                nonce: [0u8; 32],
                payouts: vec![Amount::from_sat(100), Amount::from_sat(50)],
            },
        ];
        assert_eq!(deltas_for_classifications(&classifications), vec![500, -150]);
    }
}
