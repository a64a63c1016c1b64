//! Checkpoint and Ark transaction construction.
//!
//! ```text
//! coin ──► checkpoint tx ──► [checkpoint output, anchor]
//!                                   │
//!                                   ▼
//!                              Ark tx ──► [requested outputs..., anchor]
//! ```
//!
//! Each checkpoint output commits to the coin's own spending leaf plus the
//! operator's unilateral exit leaf, so the Ark transaction spends it through
//! the same condition the original coin required.

use bitcoin::{
    absolute, transaction::Version, Amount, OutPoint, Psbt, ScriptBuf, TapSighashType,
    Transaction, TxIn, TxOut, Txid, Witness,
};
use tokio_util::sync::CancellationToken;

use super::signing::sign_all;
use crate::{
    coin::ArkCoin,
    config::protocol::{ANCHOR_SCRIPT_PUBKEY, ARK_TX_VERSION},
    contracts::{ArkContract, GenericContract},
    error::{ArkError, ArkResult},
    server_info::ServerInfo,
    services::{check_cancelled, ArkSigner},
};

/// The zero-value anchor output appended to every Ark-protocol transaction
pub fn anchor_output() -> TxOut {
    TxOut {
        value: Amount::ZERO,
        script_pubkey: ScriptBuf::from_bytes(ANCHOR_SCRIPT_PUBKEY.to_vec()),
    }
}

pub(crate) fn input_for(coin: &ArkCoin) -> TxIn {
    TxIn {
        previous_output: coin.outpoint(),
        script_sig: ScriptBuf::new(),
        sequence: coin.input_sequence(),
        witness: Witness::new(),
    }
}

/// Single lock time satisfying every coin's absolute timelock
pub(crate) fn combined_lock_time(coins: &[ArkCoin]) -> ArkResult<absolute::LockTime> {
    let mut combined = absolute::LockTime::ZERO;
    for lock_time in coins.iter().filter_map(|coin| coin.lock_time()) {
        if combined == absolute::LockTime::ZERO {
            combined = lock_time;
        } else if !combined.is_same_unit(lock_time) {
            return Err(ArkError::argument(
                "coins mix height-based and time-based lock times",
            ));
        } else if lock_time.to_consensus_u32() > combined.to_consensus_u32() {
            combined = lock_time;
        }
    }
    Ok(combined)
}

pub(crate) fn unsigned_tx(
    input: Vec<TxIn>,
    output: Vec<TxOut>,
    lock_time: absolute::LockTime,
) -> Transaction {
    Transaction {
        version: Version(ARK_TX_VERSION),
        lock_time,
        input,
        output,
    }
}

/// A signed Ark transaction with its checkpoints in Ark-input order
#[derive(Debug, Clone)]
pub struct OffchainTx {
    pub ark_tx: Psbt,
    pub checkpoints: Vec<Psbt>,
    /// Checkpoint outputs as coins, in Ark-input order
    pub checkpoint_coins: Vec<ArkCoin>,
    /// The coins originally spent, in Ark-input order
    pub spent_coins: Vec<ArkCoin>,
}

impl OffchainTx {
    pub fn ark_txid(&self) -> Txid {
        self.ark_tx.unsigned_tx.compute_txid()
    }

    /// Original coin spent through `checkpoint_txid`
    pub fn coin_for_checkpoint(&self, checkpoint_txid: Txid) -> Option<&ArkCoin> {
        self.checkpoints
            .iter()
            .position(|checkpoint| checkpoint.unsigned_tx.compute_txid() == checkpoint_txid)
            .and_then(|i| self.spent_coins.get(i))
    }
}

/// Checkpoint contract: the coin's leaf followed by the operator's exit leaf
pub fn checkpoint_contract(coin: &ArkCoin, server_info: &ServerInfo) -> ArkResult<ArkContract> {
    let exit_leaf = server_info.checkpoint_exit_leaf()?;
    Ok(GenericContract::new(
        Some(server_info.signer_key),
        vec![coin.spending_leaf().clone(), exit_leaf.build()],
    )?
    .into())
}

/// Build and sign the checkpoint for `coin`, returning it with its output as a coin
pub async fn build_checkpoint<S: ArkSigner>(
    coin: &ArkCoin,
    server_info: &ServerInfo,
    signer: &S,
    cancel: &CancellationToken,
) -> ArkResult<(Psbt, ArkCoin)> {
    let contract = checkpoint_contract(coin, server_info)?;
    let output = TxOut {
        value: coin.amount(),
        script_pubkey: contract.script_pubkey()?,
    };
    let tx = unsigned_tx(
        vec![input_for(coin)],
        vec![output.clone(), anchor_output()],
        coin.lock_time().unwrap_or(absolute::LockTime::ZERO),
    );

    let mut psbt = Psbt::from_unsigned_tx(tx)?;
    sign_all(&mut psbt, std::slice::from_ref(coin), TapSighashType::Default, signer, cancel).await?;

    let outpoint = OutPoint::new(psbt.unsigned_tx.compute_txid(), 0);
    let checkpoint_coin = coin.clone().into_checkpoint(contract, outpoint, output)?;
    Ok((psbt, checkpoint_coin))
}

/// Apply the sub-dust policy to the requested outputs
pub fn apply_dust_policy(
    outputs: &[TxOut],
    dust: Amount,
    max_subdust: usize,
) -> ArkResult<Vec<TxOut>> {
    let mut subdust = outputs
        .iter()
        .filter(|out| out.script_pubkey.is_op_return())
        .count();
    if subdust > max_subdust {
        return Err(ArkError::argument(format!(
            "{} sub-dust outputs requested, at most {} allowed",
            subdust, max_subdust
        )));
    }

    outputs
        .iter()
        .map(|out| {
            if !out.script_pubkey.is_p2tr() || out.value >= dust {
                return Ok(out.clone());
            }
            subdust += 1;
            if subdust > max_subdust {
                return Err(ArkError::argument(format!(
                    "output of {} is below dust {} and the sub-dust budget of {} is used",
                    out.value, dust, max_subdust
                )));
            }
            let output_key: [u8; 32] = out.script_pubkey.as_bytes()[2..34]
                .try_into()
                .map_err(|_| ArkError::argument("malformed taproot output"))?;
            log::debug!("Rewriting {} output to OP_RETURN", out.value);
            Ok(TxOut {
                value: out.value,
                script_pubkey: ScriptBuf::new_op_return(output_key),
            })
        })
        .collect()
}

/// Build the checkpoints and the Ark transaction spending them, all signed
pub async fn build_offchain_tx<S: ArkSigner>(
    coins: &[ArkCoin],
    outputs: &[TxOut],
    server_info: &ServerInfo,
    max_subdust: usize,
    signer: &S,
    cancel: &CancellationToken,
) -> ArkResult<OffchainTx> {
    if coins.is_empty() {
        return Err(ArkError::argument("no coins to spend"));
    }
    if outputs.is_empty() {
        return Err(ArkError::argument("no outputs requested"));
    }
    server_info.validate()?;

    let mut checkpoints = Vec::with_capacity(coins.len());
    let mut checkpoint_coins = Vec::with_capacity(coins.len());
    for coin in coins {
        check_cancelled(cancel)?;
        let (psbt, checkpoint_coin) = build_checkpoint(coin, server_info, signer, cancel).await?;
        checkpoints.push(psbt);
        checkpoint_coins.push(checkpoint_coin);
    }

    let mut ark_outputs = apply_dust_policy(outputs, server_info.dust, max_subdust)?;
    ark_outputs.push(anchor_output());

    let tx = unsigned_tx(
        checkpoint_coins.iter().map(input_for).collect(),
        ark_outputs,
        combined_lock_time(&checkpoint_coins)?,
    );
    let mut ark_tx = Psbt::from_unsigned_tx(tx)?;

    // Input order is matched by outpoint, never by construction order.
    let mut ordered_checkpoints = Vec::with_capacity(coins.len());
    let mut ordered_coins = Vec::with_capacity(coins.len());
    let mut spent_coins = Vec::with_capacity(coins.len());
    for input in &ark_tx.unsigned_tx.input {
        let i = checkpoint_coins
            .iter()
            .position(|coin| coin.outpoint() == input.previous_output)
            .ok_or_else(|| ArkError::argument("Ark input does not spend a checkpoint"))?;
        ordered_checkpoints.push(checkpoints[i].clone());
        ordered_coins.push(checkpoint_coins[i].clone());
        spent_coins.push(coins[i].clone());
    }

    check_cancelled(cancel)?;
    sign_all(&mut ark_tx, &ordered_coins, TapSighashType::Default, signer, cancel).await?;

    log::info!(
        "Built Ark transaction {} spending {} coin(s) into {} output(s)",
        ark_tx.unsigned_tx.compute_txid(),
        coins.len(),
        ark_tx.unsigned_tx.output.len()
    );

    Ok(OffchainTx {
        ark_tx,
        checkpoints: ordered_checkpoints,
        checkpoint_coins: ordered_coins,
        spent_coins,
    })
}
