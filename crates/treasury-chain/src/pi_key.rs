//! The Pi-key signature-verification seam (`SPEC_FULL.md` §C).
//!
//! Signing a spend proposal is the wallet's job and stays out of scope
//! (§1); but C6 still has to check that a `TSpend`'s declared public key is
//! one of the network's current Pi keys and that the signature over the
//! proposal actually verifies against it. `PiKeyring` is the capability the
//! embedder supplies for both; this crate never stores or rotates keys
//! itself.

/// A set of currently-authorized Pi keys, and the ability to verify a
/// signature against one of them.
pub trait PiKeyring {
    /// Whether `pubkey` (33-byte compressed encoding) is a currently
    /// recognized Pi key.
    fn is_known(&self, pubkey: &[u8; 33]) -> bool;

    /// Verifies `signature` (including its trailing sighash-type byte) over
    /// `message` under `pubkey`. Only called after [`is_known`](Self::is_known)
    /// has returned `true`.
    fn verify(&self, pubkey: &[u8; 33], message: &[u8], signature: &[u8]) -> bool;
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use std::collections::HashSet;

    use super::PiKeyring;

    /// A keyring that recognizes a fixed set of keys and accepts every
    /// signature as valid — useful for exercising C6's admission wiring
    /// without a real signature scheme.
    pub struct AcceptAllKeyring {
        pub known: HashSet<[u8; 33]>,
    }

    impl AcceptAllKeyring {
        pub fn new(known: impl IntoIterator<Item = [u8; 33]>) -> Self {
            AcceptAllKeyring {
                known: known.into_iter().collect(),
            }
        }
    }

    impl PiKeyring for AcceptAllKeyring {
        fn is_known(&self, pubkey: &[u8; 33]) -> bool {
            self.known.contains(pubkey)
        }

        fn verify(&self, _pubkey: &[u8; 33], _message: &[u8], _signature: &[u8]) -> bool {
            true
        }
    }
}
