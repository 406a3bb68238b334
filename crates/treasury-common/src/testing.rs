//! An in-memory arena implementing [`BlockNode`], used by this crate's own
//! tests and (via the `test-utils` feature) by `treasury-chain`'s test
//! suite. Not part of the public consensus API.

use std::cell::RefCell;
use std::rc::Rc;

use bitcoin::hashes::Hash;
use bitcoin::BlockHash;

use crate::BlockIndex;
use crate::BlockNode;

struct NodeData {
    hash: BlockHash,
    height: u32,
    parent: Option<usize>,
}

/// A single node in a [`MemChain`]. Cloning is an `Rc` bump, not a deep copy.
#[derive(Clone)]
pub struct MemNode {
    arena: Rc<RefCell<Vec<NodeData>>>,
    index: usize,
}

impl MemNode {
    fn data(&self) -> std::cell::Ref<'_, NodeData> {
        std::cell::Ref::map(self.arena.borrow(), |v| &v[self.index])
    }
}

impl BlockNode for MemNode {
    fn hash(&self) -> BlockHash {
        self.data().hash
    }

    fn height(&self) -> u32 {
        self.data().height
    }

    fn parent(&self) -> Option<Self> {
        let parent_idx = self.data().parent?;
        Some(MemNode {
            arena: self.arena.clone(),
            index: parent_idx,
        })
    }

    fn ancestor_at(&self, height: u32) -> Option<Self> {
        if height > self.height() {
            return None;
        }
        let mut cur = self.clone();
        while cur.height() > height {
            cur = cur.parent()?;
        }
        Some(cur)
    }
}

/// A chain of [`MemNode`]s for tests, able to hold more than one branch off
/// a shared ancestor. Deterministic: the hash of the node at arena index
/// `i` is `sha256d(i.to_le_bytes())`, so fixtures are reproducible without
/// relying on `rand` — and unique per node regardless of how many branches
/// share a height, which a height-keyed hash would not guarantee.
pub struct MemChain {
    arena: Rc<RefCell<Vec<NodeData>>>,
}

impl MemChain {
    /// A chain containing only the genesis node at height 0.
    pub fn new() -> Self {
        let genesis = NodeData {
            hash: node_hash(0),
            height: 0,
            parent: None,
        };
        MemChain {
            arena: Rc::new(RefCell::new(vec![genesis])),
        }
    }

    /// Extends the chain with `n` additional blocks on top of genesis and
    /// returns every node from height 0 to height `n`, inclusive, indexed
    /// by height.
    pub fn extend(&self, n: u32) -> Vec<MemNode> {
        let mut arena = self.arena.borrow_mut();
        for _ in 1..=n {
            let parent = arena.len() - 1;
            let index = arena.len();
            let height = arena[parent].height + 1;
            arena.push(NodeData {
                hash: node_hash(index),
                height,
                parent: Some(parent),
            });
        }
        drop(arena);
        (0..=n)
            .map(|h| MemNode {
                arena: self.arena.clone(),
                index: h as usize,
            })
            .collect()
    }

    /// Branches `n` new blocks off `parent`, diverging from whatever chain
    /// `parent` already belongs to — for exercising branch-scoped
    /// invariants (e.g. `TSpendExists`) where two blocks at the same height
    /// must resolve to distinct nodes. Returns only the new blocks, in
    /// height order; `parent` itself is not included.
    pub fn branch_from(&self, parent: &MemNode, n: u32) -> Vec<MemNode> {
        let mut arena = self.arena.borrow_mut();
        let mut parent_idx = parent.index;
        let mut indices = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let height = arena[parent_idx].height + 1;
            let index = arena.len();
            arena.push(NodeData {
                hash: node_hash(index),
                height,
                parent: Some(parent_idx),
            });
            indices.push(index);
            parent_idx = index;
        }
        drop(arena);
        indices
            .into_iter()
            .map(|index| MemNode {
                arena: self.arena.clone(),
                index,
            })
            .collect()
    }
}

impl Default for MemChain {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockIndex<MemNode> for MemChain {
    fn resolve(&self, hash: BlockHash) -> Option<MemNode> {
        let arena = self.arena.borrow();
        let index = arena.iter().position(|n| n.hash == hash)?;
        Some(MemNode {
            arena: self.arena.clone(),
            index,
        })
    }
}

fn node_hash(index: usize) -> BlockHash {
    let mut buf = [0u8; 32];
    buf[..8].copy_from_slice(&(index as u64).to_le_bytes());
    BlockHash::from_byte_array(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_chain_ancestor_walk() {
        let chain = MemChain::new();
        let nodes = chain.extend(20);
        let tip = nodes.last().unwrap();
        assert_eq!(tip.height(), 20);
        let anc = tip.ancestor_at(5).unwrap();
        assert_eq!(anc.height(), 5);
        assert_eq!(anc.hash(), nodes[5].hash());
        assert!(tip.ancestor_at(25).is_none());
    }

    #[test]
    fn parent_chain_matches_ancestor_at() {
        let chain = MemChain::new();
        let nodes = chain.extend(8);
        let mut cur = nodes[8].clone();
        for expected_height in (0..8).rev() {
            cur = cur.parent().unwrap();
            assert_eq!(cur.height(), expected_height);
        }
        assert!(cur.parent().is_none());
    }

    #[test]
    fn branch_diverges_with_distinct_hashes_at_same_height() {
        let chain = MemChain::new();
        let trunk = chain.extend(3);
        let fork_a = chain.branch_from(&trunk[3], 2);
        let fork_b = chain.branch_from(&trunk[3], 2);

        assert_eq!(fork_a[0].height(), fork_b[0].height());
        assert_ne!(fork_a[0].hash(), fork_b[0].hash());
        assert_eq!(fork_a[1].height(), fork_b[1].height());
        assert_ne!(fork_a[1].hash(), fork_b[1].hash());

        assert_eq!(fork_a[0].parent().unwrap().hash(), trunk[3].hash());
        assert_eq!(fork_b[0].parent().unwrap().hash(), trunk[3].hash());

        // Each branch is only resolvable to its own node at a shared height.
        assert_eq!(chain.resolve(fork_a[0].hash()).unwrap().hash(), fork_a[0].hash());
        assert_eq!(chain.resolve(fork_b[0].hash()).unwrap().hash(), fork_b[0].hash());
    }
}
