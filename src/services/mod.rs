//! # Services Module
//!
//! Collaborators the engine consumes but does not implement: the wallet
//! signer, the operator connection, chain time, advisory spend locks and the
//! intent store. Each await on one of these is a suspension point; callers
//! thread a cancellation token through so nothing is submitted after cancel.
//!
//! ## Components
//!
//! - **ArkSigner**: Schnorr signatures for script-path spends
//! - **TreeCosigner**: MuSig2 nonces and partial signatures for settlement trees
//! - **ArkServer**: server info, `SubmitTx` and `FinalizeTx`
//! - **ChainTimeProvider**: current timestamp and height
//! - **SpendLocks**: short-lived per-outpoint locks ([`MemorySpendLocks`])
//! - **IntentStore**: cancels intents whose inputs were spent

pub mod locks;

use std::{collections::BTreeMap, future::Future, time::Duration};

use bitcoin::{
    secp256k1::{schnorr, Message, PublicKey},
    OutPoint, Psbt, Txid, XOnlyPublicKey,
};
use tokio_util::sync::CancellationToken;

use crate::{
    coin::ChainTime,
    error::{ArkError, ArkResult},
    server_info::ServerInfo,
    tx_tree::TxTree,
};

pub use locks::MemorySpendLocks;

/// Wallet key custody
pub trait ArkSigner: Send + Sync {
    /// Sign a BIP340 message with the key owning `wallet_id`
    fn sign_schnorr(
        &self,
        wallet_id: &str,
        message: Message,
    ) -> impl Future<Output = ArkResult<(XOnlyPublicKey, schnorr::Signature)>> + Send;
}

/// Public MuSig2 nonces (66 bytes each) per settlement transaction
pub type TreeNonces = BTreeMap<Txid, [u8; 66]>;

/// MuSig2 partial signatures (32 bytes each) per settlement transaction
pub type TreePartialSigs = BTreeMap<Txid, [u8; 32]>;

/// Settlement-tree cosigning
pub trait TreeCosigner: Send + Sync {
    fn cosigner_key(&self) -> PublicKey;

    fn generate_nonces(&self, tree: &TxTree) -> impl Future<Output = ArkResult<TreeNonces>> + Send;

    fn partial_sign(
        &self,
        tree: &TxTree,
        aggregated_nonces: &TreeNonces,
    ) -> impl Future<Output = ArkResult<TreePartialSigs>> + Send;
}

/// Operator reply to a submitted Ark transaction
#[derive(Debug, Clone)]
pub struct SubmitTxResponse {
    pub ark_txid: Txid,
    /// Checkpoints carrying the operator's co-signatures
    pub signed_checkpoints: Vec<Psbt>,
}

/// Operator connection; transport errors are returned unchanged
pub trait ArkServer: Send + Sync {
    fn server_info(&self) -> impl Future<Output = ArkResult<ServerInfo>> + Send;

    fn submit_tx(
        &self,
        ark_tx: &Psbt,
        checkpoints: &[Psbt],
    ) -> impl Future<Output = ArkResult<SubmitTxResponse>> + Send;

    fn finalize_tx(
        &self,
        ark_txid: Txid,
        checkpoints: &[Psbt],
    ) -> impl Future<Output = ArkResult<()>> + Send;
}

pub trait ChainTimeProvider: Send + Sync {
    fn chain_time(&self) -> impl Future<Output = ArkResult<ChainTime>> + Send;
}

/// Advisory, time-bounded locks against concurrent spends of one outpoint
pub trait SpendLocks: Send + Sync {
    /// Lock every outpoint or none; contention is [`ArkError::AlreadyLocked`]
    fn lock(
        &self,
        outpoints: &[OutPoint],
        ttl: Duration,
    ) -> impl Future<Output = ArkResult<()>> + Send;

    fn release(&self, outpoints: &[OutPoint]) -> impl Future<Output = ()> + Send;
}

pub trait IntentStore: Send + Sync {
    /// Mark intents registered with any of `outpoints` as cancelled, returning how many
    fn cancel_intents_spending(
        &self,
        outpoints: &[OutPoint],
    ) -> impl Future<Output = ArkResult<usize>> + Send;
}

pub(crate) fn check_cancelled(cancel: &CancellationToken) -> ArkResult<()> {
    if cancel.is_cancelled() {
        Err(ArkError::Cancelled)
    } else {
        Ok(())
    }
}

/// Request tree nonces after checking the cosigner is registered on every node
pub async fn collect_tree_nonces<C: TreeCosigner>(
    tree: &TxTree,
    cosigner: &C,
    cancel: &CancellationToken,
) -> ArkResult<TreeNonces> {
    let key = cosigner.cosigner_key();
    for node in tree.nodes() {
        if !node.cosigner_keys()?.contains(&key) {
            return Err(ArkError::protocol(format!(
                "cosigner {} missing from settlement transaction {}",
                key,
                node.txid()
            )));
        }
    }

    check_cancelled(cancel)?;
    let nonces = cosigner.generate_nonces(tree).await?;
    if nonces.len() != tree.node_count() {
        return Err(ArkError::signing(format!(
            "got {} nonces for {} settlement transactions",
            nonces.len(),
            tree.node_count()
        )));
    }
    Ok(nonces)
}

/// Request partial signatures once the operator has aggregated every node's nonces
pub async fn collect_tree_signatures<C: TreeCosigner>(
    tree: &TxTree,
    cosigner: &C,
    aggregated_nonces: &TreeNonces,
    cancel: &CancellationToken,
) -> ArkResult<TreePartialSigs> {
    if let Some(node) = tree
        .nodes()
        .iter()
        .find(|node| !aggregated_nonces.contains_key(&node.txid()))
    {
        return Err(ArkError::protocol(format!(
            "no aggregated nonce for settlement transaction {}",
            node.txid()
        )));
    }

    check_cancelled(cancel)?;
    let signatures = cosigner.partial_sign(tree, aggregated_nonces).await?;
    if signatures.len() != tree.node_count() {
        return Err(ArkError::signing(format!(
            "got {} partial signatures for {} settlement transactions",
            signatures.len(),
            tree.node_count()
        )));
    }
    Ok(signatures)
}
