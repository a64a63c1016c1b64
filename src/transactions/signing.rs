//! Script-path signing of coin inputs.
//!
//! All sighashes of a transaction are computed up front from one
//! [`SighashCache`] over the full prevout set, then each input is signed by the
//! wallet signer and its leaf data is written through the PSBT field codec.

use bitcoin::{
    hashes::Hash,
    secp256k1::{Message, Secp256k1},
    sighash::{Prevouts, SighashCache},
    taproot::{self, LeafVersion, TapLeafHash},
    Psbt, TapSighashType, TxOut, Witness,
};
use tokio_util::sync::CancellationToken;

use crate::{
    coin::ArkCoin,
    error::{ArkError, ArkResult},
    psbt_fields,
    scripts::parse::signing_keys,
    services::{check_cancelled, ArkSigner},
};

/// Attach leaf script, control block, taptree and condition for `coin` to input `index`
pub fn prepare_input(psbt: &mut Psbt, index: usize, coin: &ArkCoin) -> ArkResult<()> {
    let spend_info = coin.spend_info()?;
    let control_block = spend_info.control_block(coin.spending_leaf())?;
    let input = psbt
        .inputs
        .get_mut(index)
        .ok_or_else(|| ArkError::argument(format!("psbt has no input {}", index)))?;

    input.witness_utxo = Some(coin.txout().clone());
    psbt_fields::set_tap_leaf_script(input, control_block, coin.spending_leaf().clone());
    psbt_fields::set_taptree(input, spend_info.leaves());
    if let Some(witness) = coin.extra_witness() {
        psbt_fields::set_condition(input, witness);
    }
    Ok(())
}

/// Sign the inputs listed in `signing` (input index, coin) against `prevouts`
pub async fn sign_inputs<S: ArkSigner>(
    psbt: &mut Psbt,
    prevouts: &[TxOut],
    signing: &[(usize, &ArkCoin)],
    sighash_type: TapSighashType,
    signer: &S,
    cancel: &CancellationToken,
) -> ArkResult<()> {
    for (index, coin) in signing {
        prepare_input(psbt, *index, coin)?;
    }

    let messages = {
        let mut cache = SighashCache::new(&psbt.unsigned_tx);
        signing
            .iter()
            .map(|(index, coin)| {
                let leaf_hash = TapLeafHash::from_script(coin.spending_leaf(), LeafVersion::TapScript);
                let sighash = cache.taproot_script_spend_signature_hash(
                    *index,
                    &Prevouts::All(prevouts),
                    leaf_hash,
                    sighash_type,
                )?;
                Ok((leaf_hash, Message::from_digest(sighash.to_byte_array())))
            })
            .collect::<ArkResult<Vec<_>>>()?
    };

    let secp = Secp256k1::verification_only();
    for ((index, coin), (leaf_hash, message)) in signing.iter().zip(messages) {
        check_cancelled(cancel)?;
        let (signer_key, signature) = signer.sign_schnorr(coin.wallet_id(), message).await?;
        secp.verify_schnorr(&signature, &message, &signer_key)
            .map_err(|e| ArkError::signing(format!("input {}: {}", index, e)))?;

        psbt_fields::set_tap_script_sig(
            &mut psbt.inputs[*index],
            signer_key,
            leaf_hash,
            taproot::Signature {
                signature,
                sighash_type,
            },
        );
    }

    log::debug!("Signed {} input(s) with {:?}", signing.len(), sighash_type);
    Ok(())
}

/// Sign every input of `psbt`, where input `i` spends `coins[i]`
pub async fn sign_all<S: ArkSigner>(
    psbt: &mut Psbt,
    coins: &[ArkCoin],
    sighash_type: TapSighashType,
    signer: &S,
    cancel: &CancellationToken,
) -> ArkResult<()> {
    if coins.len() != psbt.inputs.len() {
        return Err(ArkError::argument(format!(
            "{} coins for {} inputs",
            coins.len(),
            psbt.inputs.len()
        )));
    }
    let prevouts: Vec<TxOut> = coins.iter().map(|coin| coin.txout().clone()).collect();
    let signing: Vec<(usize, &ArkCoin)> = coins.iter().enumerate().collect();
    sign_inputs(psbt, &prevouts, &signing, sighash_type, signer, cancel).await
}

/// Witness for a fully signed script-path input: signatures, condition, script, control block
///
/// Signatures are pushed in reverse key order of the leaf so the first key
/// checked by the script consumes the top stack element.
pub fn finalize_witness(psbt: &Psbt, index: usize) -> ArkResult<Witness> {
    let input = psbt
        .inputs
        .get(index)
        .ok_or_else(|| ArkError::argument(format!("psbt has no input {}", index)))?;
    let (control_block, (script, _)) = input
        .tap_scripts
        .iter()
        .next()
        .ok_or_else(|| ArkError::argument(format!("input {} has no leaf script", index)))?;
    let leaf_hash = TapLeafHash::from_script(script, LeafVersion::TapScript);

    let keys = signing_keys(script)?;
    let mut witness = Witness::new();
    for key in keys.iter().rev() {
        let signature = input.tap_script_sigs.get(&(*key, leaf_hash)).ok_or_else(|| {
            ArkError::signing(format!("input {} is missing a signature from {}", index, key))
        })?;
        witness.push(signature.to_vec());
    }
    if let Some(condition) = psbt_fields::get_condition(input)? {
        for element in condition.iter() {
            witness.push(element);
        }
    }
    witness.push(script.as_bytes());
    witness.push(control_block.serialize());
    Ok(witness)
}
