//! Forfeit transactions.
//!
//! A forfeit hands a VTXO to the operator in exchange for a new one in the
//! next batch. With a connector the transaction is bound to that batch and
//! signed `SIGHASH_DEFAULT`; without one the user signs
//! `ALL|ANYONECANPAY` so the operator can attach the connector later.

use bitcoin::{absolute, Amount, OutPoint, Psbt, Sequence, TapSighashType, TxIn, TxOut};
use tokio_util::sync::CancellationToken;

use super::{
    ark_tx::{anchor_output, input_for, unsigned_tx},
    signing::sign_inputs,
};
use crate::{
    coin::ArkCoin,
    error::{ArkError, ArkResult},
    server_info::ServerInfo,
    services::{check_cancelled, ArkSigner},
};

/// Connector output from a batch commitment tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connector {
    pub outpoint: OutPoint,
    pub txout: TxOut,
}

/// Coin amount plus the connector or dust top-up, capped at the supply limit
fn forfeit_value(amount: Amount, top_up: Amount) -> ArkResult<Amount> {
    amount
        .checked_add(top_up)
        .filter(|value| *value <= Amount::MAX_MONEY)
        .ok_or_else(|| ArkError::argument(format!("forfeit output {} + {} overflows", amount, top_up)))
}

/// Build and sign the forfeit of `coin`, optionally bound to `connector`
pub async fn build_forfeit_tx<S: ArkSigner>(
    coin: &ArkCoin,
    connector: Option<&Connector>,
    server_info: &ServerInfo,
    signer: &S,
    cancel: &CancellationToken,
) -> ArkResult<Psbt> {
    if !coin.can_forfeit() {
        return Err(ArkError::argument(format!(
            "coin {} was swept and cannot be forfeited",
            coin.outpoint()
        )));
    }

    let mut inputs = vec![input_for(coin)];
    let mut prevouts = vec![coin.txout().clone()];
    let (value, sighash_type) = match connector {
        Some(connector) => {
            inputs.push(TxIn {
                previous_output: connector.outpoint,
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                ..Default::default()
            });
            prevouts.push(connector.txout.clone());
            (
                forfeit_value(coin.amount(), connector.txout.value)?,
                TapSighashType::Default,
            )
        }
        None => (
            forfeit_value(coin.amount(), server_info.dust)?,
            TapSighashType::AllPlusAnyoneCanPay,
        ),
    };

    let output = TxOut {
        value,
        script_pubkey: server_info.forfeit_script.clone(),
    };
    let tx = unsigned_tx(
        inputs,
        vec![output, anchor_output()],
        coin.lock_time().unwrap_or(absolute::LockTime::ZERO),
    );
    let mut psbt = Psbt::from_unsigned_tx(tx)?;
    if let Some(connector) = connector {
        psbt.inputs[1].witness_utxo = Some(connector.txout.clone());
    }

    check_cancelled(cancel)?;
    sign_inputs(&mut psbt, &prevouts, &[(0, coin)], sighash_type, signer, cancel).await?;

    log::info!(
        "Built forfeit {} for {} ({})",
        psbt.unsigned_tx.compute_txid(),
        coin.outpoint(),
        if connector.is_some() { "connected" } else { "unconnected" }
    );
    Ok(psbt)
}
