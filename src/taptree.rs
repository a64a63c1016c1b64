//! # Taproot Tree Assembler
//!
//! Builds the commitment tree for an ordered list of tapscript leaves using a
//! fixed pairing order, so that the Merkle path of every leaf is identical
//! whether it is computed for address derivation or at spend time.
//!
//! ## Pairing
//!
//! 1. Leaves are paired sequentially: `(0,1) (2,3) ...`. With an odd count the
//!    trailing leaf is merged into the last branch.
//! 2. The first two remaining branches are combined and the result is appended
//!    to the end of the queue, until a single root remains.
//!
//! A single leaf is the root itself. The output key commits to the tree under
//! an unspendable internal key; there is no key-path spend.

use std::collections::VecDeque;

use bitcoin::{
    key::TweakedPublicKey,
    secp256k1::Secp256k1,
    taproot::{ControlBlock, LeafVersion, TapLeafHash, TapNodeHash, TaprootBuilder, TaprootSpendInfo},
    ScriptBuf, XOnlyPublicKey,
};

use crate::{
    config::protocol,
    error::{ArkError, ArkResult},
};

/// A node of the owned commitment tree; leaves index into the leaf list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapNode {
    Leaf(usize),
    Branch(Box<TapNode>, Box<TapNode>),
}

impl TapNode {
    fn branch(left: TapNode, right: TapNode) -> Self {
        TapNode::Branch(Box::new(left), Box::new(right))
    }

    /// Assemble the tree shape for `count` leaves
    pub fn assemble(count: usize) -> Option<TapNode> {
        match count {
            0 => None,
            1 => Some(TapNode::Leaf(0)),
            _ => {
                let mut queue: VecDeque<TapNode> = (0..count / 2)
                    .map(|i| TapNode::branch(TapNode::Leaf(2 * i), TapNode::Leaf(2 * i + 1)))
                    .collect();
                if count % 2 == 1 {
                    if let Some(last) = queue.pop_back() {
                        queue.push_back(TapNode::branch(last, TapNode::Leaf(count - 1)));
                    }
                }
                while queue.len() > 1 {
                    if let (Some(left), Some(right)) = (queue.pop_front(), queue.pop_front()) {
                        queue.push_back(TapNode::branch(left, right));
                    }
                }
                queue.pop_front()
            }
        }
    }

    /// Leaf indices with their depth, in depth-first left-to-right order
    pub fn leaf_depths(&self) -> Vec<(usize, u8)> {
        let mut out = Vec::new();
        self.collect_depths(0, &mut out);
        out
    }

    fn collect_depths(&self, depth: u8, out: &mut Vec<(usize, u8)>) {
        match self {
            TapNode::Leaf(index) => out.push((*index, depth)),
            TapNode::Branch(left, right) => {
                left.collect_depths(depth + 1, out);
                right.collect_depths(depth + 1, out);
            }
        }
    }

    /// Merkle hash of this node over `leaves`
    pub fn node_hash(&self, leaves: &[ScriptBuf]) -> ArkResult<TapNodeHash> {
        match self {
            TapNode::Leaf(index) => leaves
                .get(*index)
                .map(|script| TapNodeHash::from(TapLeafHash::from_script(script, LeafVersion::TapScript)))
                .ok_or_else(|| ArkError::argument(format!("leaf index {} out of range", index))),
            TapNode::Branch(left, right) => Ok(TapNodeHash::from_node_hashes(
                left.node_hash(leaves)?,
                right.node_hash(leaves)?,
            )),
        }
    }
}

/// The unspendable internal key shared by every Ark output
pub fn unspendable_key() -> ArkResult<XOnlyPublicKey> {
    XOnlyPublicKey::from_slice(&protocol::UNSPENDABLE_INTERNAL_KEY)
        .map_err(|e| ArkError::argument(format!("invalid internal key: {}", e)))
}

/// Assembled tree with its ordered leaves
#[derive(Debug, Clone)]
pub struct ArkSpendInfo {
    leaves: Vec<ScriptBuf>,
    tree: TapNode,
    spend_info: TaprootSpendInfo,
}

impl ArkSpendInfo {
    /// Build the commitment tree for `leaves` in the given order
    pub fn new(leaves: Vec<ScriptBuf>) -> ArkResult<Self> {
        let tree = TapNode::assemble(leaves.len())
            .ok_or_else(|| ArkError::argument("a taproot tree needs at least one leaf"))?;

        let mut builder = TaprootBuilder::new();
        for (index, depth) in tree.leaf_depths() {
            builder = builder.add_leaf(depth, leaves[index].clone())?;
        }

        let secp = Secp256k1::new();
        let spend_info = builder
            .finalize(&secp, unspendable_key()?)
            .map_err(|_| ArkError::argument("taproot tree is incomplete"))?;

        let expected = tree.node_hash(&leaves)?;
        if spend_info.merkle_root() != Some(expected) {
            return Err(ArkError::argument("taproot merkle root does not match leaf pairing"));
        }

        log::debug!("Assembled taproot tree over {} leaves", leaves.len());

        Ok(Self {
            leaves,
            tree,
            spend_info,
        })
    }

    /// Leaves in their original order
    pub fn leaves(&self) -> &[ScriptBuf] {
        &self.leaves
    }

    pub fn tree(&self) -> &TapNode {
        &self.tree
    }

    pub fn spend_info(&self) -> &TaprootSpendInfo {
        &self.spend_info
    }

    /// Tweaked output key committed to by addresses and script pubkeys
    pub fn output_key(&self) -> TweakedPublicKey {
        self.spend_info.output_key()
    }

    pub fn merkle_root(&self) -> Option<TapNodeHash> {
        self.spend_info.merkle_root()
    }

    /// Control block proving `script` is part of this tree
    pub fn control_block(&self, script: &ScriptBuf) -> ArkResult<ControlBlock> {
        self.spend_info
            .control_block(&(script.clone(), LeafVersion::TapScript))
            .ok_or_else(|| ArkError::argument("script is not a leaf of this contract"))
    }
}
