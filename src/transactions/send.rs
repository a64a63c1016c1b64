//! Offchain send orchestration: lock, build, submit, co-sign, finalize.

use std::collections::HashSet;

use bitcoin::{Amount, OutPoint, Psbt, TapSighashType, TxOut, Txid};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::{
    ark_tx::{build_offchain_tx, OffchainTx},
    signing::sign_all,
};
use crate::{
    address::ArkAddress,
    coin::ArkCoin,
    coin_select::select_coins_with_limit,
    config::EngineConfig,
    error::{ArkError, ArkResult},
    server_info::ServerInfo,
    services::{
        check_cancelled, ArkServer, ArkSigner, ChainTimeProvider, IntentStore, SpendLocks,
    },
};

/// Outcome of a finalized offchain send
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendResult {
    pub ark_txid: Txid,
    pub checkpoint_txids: Vec<Txid>,
}

/// Spends coins offchain through the operator
pub struct ArkSender<S, V, L, I, C> {
    signer: S,
    server: V,
    locks: L,
    intents: I,
    chain: C,
    config: EngineConfig,
    cancel: CancellationToken,
}

impl<S, V, L, I, C> ArkSender<S, V, L, I, C>
where
    S: ArkSigner,
    V: ArkServer,
    L: SpendLocks,
    I: IntentStore,
    C: ChainTimeProvider,
{
    pub fn new(signer: S, server: V, locks: L, intents: I, chain: C, config: EngineConfig) -> Self {
        Self {
            signer,
            server,
            locks,
            intents,
            chain,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `cancel` for every subsequent operation
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn locks(&self) -> &L {
        &self.locks
    }

    /// Pay `amount` to `recipient` from `available`, returning change to `change`
    pub async fn pay(
        &self,
        available: &[ArkCoin],
        recipient: &ArkAddress,
        amount: Amount,
        change: &ArkAddress,
    ) -> ArkResult<SendResult> {
        let server_info = self.server.server_info().await?;
        server_info.validate()?;

        let recipient_out = TxOut {
            value: amount,
            script_pubkey: recipient.to_p2tr_script_pubkey(),
        };
        let current_subdust = usize::from(amount < server_info.dust);
        let selected = select_coins_with_limit(
            available,
            amount,
            server_info.dust,
            current_subdust,
            self.config.max_subdust_outputs,
        )?;

        let total = selected
            .iter()
            .try_fold(Amount::ZERO, |acc, coin| acc.checked_add(coin.amount()))
            .ok_or_else(|| ArkError::argument("coin amounts overflow"))?;
        let mut outputs = vec![recipient_out];
        if let Some(change_value) = total.checked_sub(amount).filter(|v| *v > Amount::ZERO) {
            outputs.push(TxOut {
                value: change_value,
                script_pubkey: change.to_p2tr_script_pubkey(),
            });
        }

        self.send_with_info(&selected, &outputs, &server_info).await
    }

    /// Spend exactly `coins` into `outputs`
    pub async fn send(&self, coins: &[ArkCoin], outputs: &[TxOut]) -> ArkResult<SendResult> {
        let server_info = self.server.server_info().await?;
        server_info.validate()?;
        self.send_with_info(coins, outputs, &server_info).await
    }

    async fn send_with_info(
        &self,
        coins: &[ArkCoin],
        outputs: &[TxOut],
        server_info: &ServerInfo,
    ) -> ArkResult<SendResult> {
        let now = self.chain.chain_time().await?;
        if let Some(expired) = coins.iter().find(|coin| coin.is_expired(&now)) {
            return Err(ArkError::argument(format!(
                "coin {} has expired and must be renewed in a batch",
                expired.outpoint()
            )));
        }

        let outpoints: Vec<OutPoint> = coins.iter().map(|coin| coin.outpoint()).collect();
        let mut seen = HashSet::with_capacity(outpoints.len());
        if let Some(outpoint) = outpoints.iter().find(|outpoint| !seen.insert(**outpoint)) {
            return Err(ArkError::AlreadySpent {
                outpoint: *outpoint,
            });
        }

        check_cancelled(&self.cancel)?;
        self.locks.lock(&outpoints, self.config.lock_ttl).await?;

        let result = self.submit_locked(coins, outputs, server_info).await;
        self.locks.release(&outpoints).await;

        if let Ok(sent) = &result {
            match self.intents.cancel_intents_spending(&outpoints).await {
                Ok(0) => {}
                Ok(n) => log::info!("Cancelled {} intent(s) spending coins of {}", n, sent.ark_txid),
                Err(e) => log::warn!("Failed to cancel intents after {}: {}", sent.ark_txid, e),
            }
        }
        result
    }

    async fn submit_locked(
        &self,
        coins: &[ArkCoin],
        outputs: &[TxOut],
        server_info: &ServerInfo,
    ) -> ArkResult<SendResult> {
        let offchain = build_offchain_tx(
            coins,
            outputs,
            server_info,
            self.config.max_subdust_outputs,
            &self.signer,
            &self.cancel,
        )
        .await?;

        // Submission is the point of no return.
        check_cancelled(&self.cancel)?;
        let response = self
            .server
            .submit_tx(&offchain.ark_tx, &offchain.checkpoints)
            .await?;
        if response.ark_txid != offchain.ark_txid() {
            return Err(ArkError::protocol(format!(
                "operator accepted {} but {} was submitted",
                response.ark_txid,
                offchain.ark_txid()
            )));
        }

        let finalized = self.cosign_checkpoints(&offchain, response.signed_checkpoints).await?;
        self.server.finalize_tx(response.ark_txid, &finalized).await?;

        log::info!("Finalized Ark transaction {}", response.ark_txid);
        Ok(SendResult {
            ark_txid: response.ark_txid,
            checkpoint_txids: finalized
                .iter()
                .map(|checkpoint| checkpoint.unsigned_tx.compute_txid())
                .collect(),
        })
    }

    /// Re-apply our signature on top of the operator's co-signed checkpoints
    ///
    /// Runs after submission, so it ignores cancellation.
    async fn cosign_checkpoints(
        &self,
        offchain: &OffchainTx,
        signed: Vec<Psbt>,
    ) -> ArkResult<Vec<Psbt>> {
        if signed.len() != offchain.checkpoints.len() {
            return Err(ArkError::protocol(format!(
                "operator returned {} checkpoints for {} submitted",
                signed.len(),
                offchain.checkpoints.len()
            )));
        }

        let committed = CancellationToken::new();
        let mut finalized = Vec::with_capacity(signed.len());
        for mut checkpoint in signed {
            let txid = checkpoint.unsigned_tx.compute_txid();
            let coin = offchain.coin_for_checkpoint(txid).ok_or_else(|| {
                ArkError::protocol(format!("operator returned unknown checkpoint {}", txid))
            })?;
            sign_all(
                &mut checkpoint,
                std::slice::from_ref(coin),
                TapSighashType::Default,
                &self.signer,
                &committed,
            )
            .await?;
            finalized.push(checkpoint);
        }
        Ok(finalized)
    }
}
