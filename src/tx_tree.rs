//! # Settlement Tree
//!
//! The operator hands out a batch's settlement graph as a flat, unordered set
//! of chunks: one PSBT each, plus a map from output index to the txid of the
//! child spending it. [`TxTree::from_chunks`] rebuilds the owned tree and
//! [`TxTree::validate`] checks that every edge is consistent.

use std::collections::{BTreeMap, HashMap, HashSet};

use bitcoin::{secp256k1::PublicKey, Amount, OutPoint, Psbt, Txid};

use crate::{
    error::{ArkError, ArkResult},
    psbt_fields,
    scripts::RelativeTimelock,
};

/// One transaction of the flat representation
#[derive(Debug, Clone, PartialEq)]
pub struct TxTreeChunk {
    pub txid: Txid,
    pub tx: Psbt,
    pub children: BTreeMap<u32, Txid>,
}

/// A node of the settlement graph owning the subtrees spending its outputs
#[derive(Debug, Clone, PartialEq)]
pub struct TxTree {
    pub root: Psbt,
    pub children: BTreeMap<u32, TxTree>,
}

impl TxTree {
    pub fn new(root: Psbt) -> Self {
        Self {
            root,
            children: BTreeMap::new(),
        }
    }

    pub fn txid(&self) -> Txid {
        self.root.unsigned_tx.compute_txid()
    }

    /// Rebuild the tree from an unordered chunk set
    pub fn from_chunks(chunks: Vec<TxTreeChunk>) -> ArkResult<Self> {
        let count = chunks.len();
        let referenced: HashSet<Txid> = chunks
            .iter()
            .flat_map(|chunk| chunk.children.values().copied())
            .collect();

        let mut by_txid = HashMap::with_capacity(count);
        for chunk in chunks {
            if chunk.tx.unsigned_tx.compute_txid() != chunk.txid {
                return Err(ArkError::format(
                    "tx tree",
                    format!("chunk {} does not match its transaction", chunk.txid),
                ));
            }
            by_txid.insert(chunk.txid, chunk);
        }
        if by_txid.len() != count {
            return Err(ArkError::format("tx tree", "duplicate chunks"));
        }

        let mut roots = by_txid.keys().filter(|txid| !referenced.contains(*txid));
        let root = match (roots.next(), roots.next()) {
            (Some(root), None) => *root,
            (None, _) => return Err(ArkError::format("tx tree", "no root chunk")),
            (Some(_), Some(_)) => return Err(ArkError::format("tx tree", "multiple root chunks")),
        };

        let tree = Self::attach(root, &mut by_txid)?;
        if tree.node_count() != count {
            return Err(ArkError::format(
                "tx tree",
                format!("rebuilt {} nodes from {} chunks", tree.node_count(), count),
            ));
        }

        log::debug!("Rebuilt settlement tree of {} transactions", count);
        Ok(tree)
    }

    fn attach(txid: Txid, chunks: &mut HashMap<Txid, TxTreeChunk>) -> ArkResult<Self> {
        let chunk = chunks.remove(&txid).ok_or_else(|| {
            ArkError::format("tx tree", format!("missing or repeated child chunk {}", txid))
        })?;
        let children = chunk
            .children
            .iter()
            .map(|(vout, child)| Ok((*vout, Self::attach(*child, chunks)?)))
            .collect::<ArkResult<BTreeMap<_, _>>>()?;
        Ok(Self {
            root: chunk.tx,
            children,
        })
    }

    /// Flatten back into chunks, depth first
    pub fn to_chunks(&self) -> Vec<TxTreeChunk> {
        let mut out = Vec::with_capacity(self.node_count());
        self.collect_chunks(&mut out);
        out
    }

    fn collect_chunks(&self, out: &mut Vec<TxTreeChunk>) {
        out.push(TxTreeChunk {
            txid: self.txid(),
            tx: self.root.clone(),
            children: self
                .children
                .iter()
                .map(|(vout, child)| (*vout, child.txid()))
                .collect(),
        });
        for child in self.children.values() {
            child.collect_chunks(out);
        }
    }

    /// Check every parent/child edge of the tree
    pub fn validate(&self) -> ArkResult<()> {
        let tx = &self.root.unsigned_tx;
        let txid = self.txid();

        if tx.input.len() != 1 {
            return Err(ArkError::format(
                "tx tree",
                format!("node {} has {} inputs, expected 1", txid, tx.input.len()),
            ));
        }
        if self.children.len() > tx.output.len().saturating_sub(1) {
            return Err(ArkError::format(
                "tx tree",
                format!("node {} declares more children than spendable outputs", txid),
            ));
        }

        for (vout, child) in &self.children {
            let parent_output = tx.output.get(*vout as usize).ok_or_else(|| {
                ArkError::format("tx tree", format!("node {} has no output {}", txid, vout))
            })?;

            let child_tx = &child.root.unsigned_tx;
            let expected = OutPoint::new(txid, *vout);
            if child_tx.input.len() != 1 || child_tx.input[0].previous_output != expected {
                return Err(ArkError::format(
                    "tx tree",
                    format!("child {} does not spend {}", child.txid(), expected),
                ));
            }

            let child_total = child_tx
                .output
                .iter()
                .try_fold(Amount::ZERO, |acc, out| acc.checked_add(out.value))
                .ok_or_else(|| ArkError::format("tx tree", "child output amounts overflow"))?;
            if child_total != parent_output.value {
                return Err(ArkError::format(
                    "tx tree",
                    format!(
                        "child {} outputs {} but spends {}",
                        child.txid(),
                        child_total,
                        parent_output.value
                    ),
                ));
            }

            child.validate()?;
        }
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        1 + self.children.values().map(TxTree::node_count).sum::<usize>()
    }

    /// Every node, depth first
    pub fn nodes(&self) -> Vec<&TxTree> {
        let mut out = vec![self];
        for child in self.children.values() {
            out.extend(child.nodes());
        }
        out
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Nodes without children, depth first
    pub fn leaves(&self) -> Leaves<'_> {
        Leaves { stack: vec![self] }
    }

    pub fn find(&self, txid: Txid) -> ArkResult<&TxTree> {
        self.find_node(txid)
            .ok_or_else(|| ArkError::argument(format!("transaction {} not in tree", txid)))
    }

    fn find_node(&self, txid: Txid) -> Option<&TxTree> {
        if self.txid() == txid {
            return Some(self);
        }
        self.children.values().find_map(|child| child.find_node(txid))
    }

    fn find_node_mut(&mut self, txid: Txid) -> Option<&mut TxTree> {
        if self.txid() == txid {
            return Some(self);
        }
        self.children
            .values_mut()
            .find_map(|child| child.find_node_mut(txid))
    }

    /// Replace the node whose transaction matches `psbt` (e.g. after signing)
    pub fn update(&mut self, psbt: Psbt) -> ArkResult<()> {
        let txid = psbt.unsigned_tx.compute_txid();
        let node = self
            .find_node_mut(txid)
            .ok_or_else(|| ArkError::argument(format!("transaction {} not in tree", txid)))?;
        node.root = psbt;
        Ok(())
    }

    /// MuSig2 cosigner keys recorded on the node's input
    pub fn cosigner_keys(&self) -> ArkResult<Vec<PublicKey>> {
        let Some(input) = self.root.inputs.first() else {
            return Ok(Vec::new());
        };
        Ok(psbt_fields::get_cosigners(input)?
            .into_iter()
            .map(|(_, key)| key)
            .collect())
    }

    /// Batch expiry recorded on the node's input
    pub fn batch_expiry(&self) -> ArkResult<Option<RelativeTimelock>> {
        match self.root.inputs.first() {
            Some(input) => psbt_fields::get_expiry(input),
            None => Ok(None),
        }
    }
}

/// Depth-first iterator over the leaves of a [`TxTree`]
pub struct Leaves<'a> {
    stack: Vec<&'a TxTree>,
}

impl<'a> Iterator for Leaves<'a> {
    type Item = &'a TxTree;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            if node.is_leaf() {
                return Some(node);
            }
            self.stack.extend(node.children.values().rev());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::{
        absolute, hashes::Hash, transaction::Version, ScriptBuf, Sequence, Transaction, TxIn,
        TxOut, Witness,
    };

    fn psbt(prev: OutPoint, values: &[u64]) -> Psbt {
        let tx = Transaction {
            version: Version(3),
            lock_time: absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: prev,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: values
                .iter()
                .map(|v| TxOut {
                    value: Amount::from_sat(*v),
                    script_pubkey: ScriptBuf::from_bytes(vec![0x51, 0x02, 0x4e, 0x73]),
                })
                .collect(),
        };
        Psbt::from_unsigned_tx(tx).unwrap()
    }

    fn chunk(tx: Psbt, children: &[(u32, Txid)]) -> TxTreeChunk {
        TxTreeChunk {
            txid: tx.unsigned_tx.compute_txid(),
            tx,
            children: children.iter().copied().collect(),
        }
    }

    /// root -> (a on vout 0, b on vout 1), a -> c on vout 0
    fn sample() -> Vec<TxTreeChunk> {
        let funding = OutPoint::new(Txid::all_zeros(), 0);
        let root = psbt(funding, &[10_000, 5_000, 0]);
        let root_txid = root.unsigned_tx.compute_txid();
        let a = psbt(OutPoint::new(root_txid, 0), &[6_000, 4_000, 0]);
        let a_txid = a.unsigned_tx.compute_txid();
        let b = psbt(OutPoint::new(root_txid, 1), &[5_000]);
        let c = psbt(OutPoint::new(a_txid, 0), &[6_000]);
        let (b_txid, c_txid) = (b.unsigned_tx.compute_txid(), c.unsigned_tx.compute_txid());

        vec![
            chunk(c, &[]),
            chunk(a, &[(0, c_txid)]),
            chunk(b, &[]),
            chunk(root, &[(0, a_txid), (1, b_txid)]),
        ]
    }

    #[test]
    fn test_rebuild_and_validate() {
        let chunks = sample();
        let tree = TxTree::from_chunks(chunks.clone()).unwrap();
        assert_eq!(tree.node_count(), chunks.len());
        tree.validate().unwrap();
        assert_eq!(tree.txid(), chunks[3].txid);
        assert_eq!(TxTree::from_chunks(tree.to_chunks()).unwrap(), tree);
    }

    #[test]
    fn test_leaves_are_restartable() {
        let tree = TxTree::from_chunks(sample()).unwrap();
        let first: Vec<Txid> = tree.leaves().map(TxTree::txid).collect();
        let second: Vec<Txid> = tree.leaves().map(TxTree::txid).collect();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert!(first.iter().all(|txid| tree.find(*txid).unwrap().is_leaf()));
    }

    #[test]
    fn test_two_roots_rejected() {
        let mut chunks = sample();
        chunks.push(chunk(psbt(OutPoint::new(Txid::all_zeros(), 7), &[1]), &[]));
        assert!(TxTree::from_chunks(chunks).is_err());
    }

    #[test]
    fn test_dangling_child_rejected() {
        let mut chunks = sample();
        chunks.remove(0);
        assert!(TxTree::from_chunks(chunks).is_err());
    }

    #[test]
    fn test_out_of_range_vout_fails_validation() {
        let mut tree = TxTree::from_chunks(sample()).unwrap();
        let child = tree.children.remove(&1).unwrap();
        tree.children.insert(9, child);
        assert!(tree.validate().is_err());
    }

    #[test]
    fn test_amount_mismatch_fails_validation() {
        let mut tree = TxTree::from_chunks(sample()).unwrap();
        let b = tree.children.get_mut(&1).unwrap();
        b.root.unsigned_tx.output[0].value = Amount::from_sat(4_999);
        assert!(tree.validate().is_err());
    }

    #[test]
    fn test_update_replaces_matching_node() {
        let mut tree = TxTree::from_chunks(sample()).unwrap();
        let leaf_txid = tree.leaves().next().unwrap().txid();
        let mut signed = tree.find(leaf_txid).unwrap().root.clone();
        signed.inputs[0].final_script_witness = Some(Witness::from_slice(&[[1u8; 64]]));
        tree.update(signed.clone()).unwrap();
        assert_eq!(tree.find(leaf_txid).unwrap().root, signed);

        let unrelated = psbt(OutPoint::new(Txid::all_zeros(), 3), &[1]);
        assert!(tree.update(unrelated).is_err());
    }

    #[test]
    fn test_batch_expiry_from_root_input() {
        let mut chunks = sample();
        assert_eq!(TxTree::from_chunks(chunks.clone()).unwrap().batch_expiry().unwrap(), None);

        let root = chunks.iter_mut().find(|chunk| chunk.children.len() == 2).unwrap();
        psbt_fields::set_expiry(&mut root.tx.inputs[0], RelativeTimelock::Blocks(144)).unwrap();
        let tree = TxTree::from_chunks(chunks).unwrap();
        assert_eq!(tree.batch_expiry().unwrap(), Some(RelativeTimelock::Blocks(144)));
    }
}
