use bitcoin::BlockHash;

/// An abstract capability over the block index's ancestor graph.
///
/// The treasury subsystem never owns the block index; it borrows this
/// capability from whatever arena the chain driver uses to store nodes
/// (see Design Notes: "implementations should model nodes as
/// arena-allocated entries referenced by stable identifiers, not by
/// owning pointers"). `Clone` is expected to be cheap (an index or an
/// `Rc`/`Arc`-backed handle), not a deep copy of the graph.
pub trait BlockNode: Clone {
    /// This node's block hash.
    fn hash(&self) -> BlockHash;

    /// This node's height.
    fn height(&self) -> u32;

    /// The immediate parent, or `None` for genesis.
    fn parent(&self) -> Option<Self>;

    /// The ancestor at the given absolute height, or `None` if `height` is
    /// greater than this node's height (there is no such ancestor yet) or
    /// the chain does not extend back that far.
    fn ancestor_at(&self, height: u32) -> Option<Self>;
}

/// Resolves a bare block hash back to a node.
///
/// The block index is read-only from this subsystem's perspective and used
/// only "to resolve hashes to nodes and walk ancestors"; this trait is that
/// resolution capability, separate from [`BlockNode`] itself because a
/// hash recorded in a `TSpendMinedRecord` carries no node handle of its own.
pub trait BlockIndex<N: BlockNode> {
    fn resolve(&self, hash: BlockHash) -> Option<N>;
}

/// The ancestor exactly `depth` blocks behind `node`, or `None` if `node`
/// is not yet `depth` blocks deep (too early in the chain).
///
/// This is the `relative_ancestor` helper referenced by §4.4: callers use
/// it to find the coinbase-maturity ancestor without reimplementing the
/// underflow check at every call site.
pub fn relative_ancestor<N: BlockNode>(node: &N, depth: u32) -> Option<N> {
    let height = node.height().checked_sub(depth)?;
    node.ancestor_at(height)
}
