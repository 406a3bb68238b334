/// Network-wide constants the treasury subsystem is parameterized over.
///
/// The core never hardcodes these (beyond the opcode bytes and
/// [`crate::limits::MAX_DELTAS_PER_BLOCK`], which are fixed independent of
/// network): every caller constructs one `NetworkParams` per chain and
/// passes it by reference into C4/C5/C6, the same way the teacher
/// constructs a single `ChainParams` per network and threads it through
/// `Consensus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkParams {
    /// The transaction version that marks a transaction as treasury-shaped.
    /// Any transaction of a different version is rejected outright with
    /// `InvalidTxVersion` before classification is attempted.
    pub treasury_tx_version: i32,

    /// Number of blocks a coinbase output (and, by extension, a treasury
    /// add/spend) must age before it is reflected in the treasury balance.
    pub coinbase_maturity: u32,

    /// Number of stake votes cast per block.
    pub tickets_per_block: u32,

    /// Treasury Vote Interval: spend transactions may only appear in blocks
    /// whose height is a multiple of this value, and it is the alignment
    /// unit for vote windows.
    pub tvi: u32,

    /// Multiplier applied to `tvi` to get the length of a vote window.
    pub mul: u32,

    /// Number of `tvi * mul` windows that make up the policy (expenditure
    /// cap) window.
    pub policy: u32,

    /// Quorum threshold numerator/denominator: `(yes + no) >= maxVotes * quorum_n / quorum_d`.
    pub quorum_n: u64,
    pub quorum_d: u64,

    /// Approval threshold numerator/denominator: `yes >= (yes + no) * approve_n / approve_d`.
    pub approve_n: u64,
    pub approve_d: u64,
}

impl NetworkParams {
    /// A representative set of constants used throughout this crate's
    /// tests and doctests. Not tied to any particular deployed network;
    /// callers embedding this crate construct their own `NetworkParams`
    /// from their chain's actual consensus rules.
    pub const fn mainnet_like() -> Self {
        NetworkParams {
            treasury_tx_version: 3,
            coinbase_maturity: 256,
            tickets_per_block: 5,
            tvi: 288,
            mul: 4,
            policy: 6,
            quorum_n: 1,
            quorum_d: 5,
            approve_n: 3,
            approve_d: 5,
        }
    }

    /// Number of blocks spanned by a single vote window (`tvi * mul`).
    pub const fn vote_window_len(&self) -> u32 {
        self.tvi * self.mul
    }

    /// Number of blocks spanned by the policy (expenditure cap) window,
    /// `policy * tvi * mul + 1`, inclusive of the boundary block.
    pub const fn policy_window_len(&self) -> u32 {
        self.policy * self.tvi * self.mul + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_lengths() {
        let p = NetworkParams::mainnet_like();
        assert_eq!(p.vote_window_len(), 288 * 4);
        assert_eq!(p.policy_window_len(), 6 * 288 * 4 + 1);
    }
}
