//! Deterministic signer and in-memory operator for transaction tests.

use std::sync::{Arc, Mutex};

use bitcoin::{
    hashes::Hash,
    secp256k1::{schnorr, Keypair, Message, Secp256k1, SecretKey},
    sighash::{Prevouts, SighashCache},
    taproot::{self, LeafVersion, TapLeafHash},
    Amount, OutPoint, Psbt, TapSighashType, TxOut, Txid, XOnlyPublicKey,
};

use crate::{
    address::ArkAddress,
    coin::ArkCoin,
    contracts::{ArkContract, PaymentContract},
    error::{ArkError, ArkResult},
    psbt_fields,
    scripts::RelativeTimelock,
    server_info::{tests::server_info, ServerInfo},
    services::{ArkServer, ArkSigner, SubmitTxResponse},
};

pub(crate) fn keypair(byte: u8) -> Keypair {
    let secp = Secp256k1::new();
    Keypair::from_secret_key(&secp, &SecretKey::from_slice(&[byte; 32]).unwrap())
}

pub(crate) fn server_keypair() -> Keypair {
    keypair(9)
}

pub(crate) fn test_server_info() -> ServerInfo {
    server_info(RelativeTimelock::Blocks(144), RelativeTimelock::Blocks(144))
}

pub(crate) fn user_contract(user: u8) -> PaymentContract {
    PaymentContract::for_server(&test_server_info(), keypair(user).x_only_public_key().0).unwrap()
}

pub(crate) fn user_address(user: u8) -> ArkAddress {
    ArkContract::from(user_contract(user)).ark_address(None).unwrap()
}

/// Collaboratively spendable coin owned by `user`
pub(crate) fn funded_coin(user: u8, sats: u64, vout: u32) -> ArkCoin {
    let payment = user_contract(user);
    let leaf = payment.collaborative_script();
    let contract = ArkContract::from(payment);
    let txout = TxOut {
        value: Amount::from_sat(sats),
        script_pubkey: contract.script_pubkey().unwrap(),
    };
    let outpoint = OutPoint::new(Txid::from_byte_array([7u8; 32]), vout);
    ArkCoin::new("wallet", contract, outpoint, txout, leaf).unwrap()
}

/// Signs every message with one fixed key
pub(crate) struct KeypairSigner {
    keypair: Keypair,
}

impl KeypairSigner {
    pub(crate) fn new(byte: u8) -> Self {
        Self {
            keypair: keypair(byte),
        }
    }
}

impl ArkSigner for KeypairSigner {
    async fn sign_schnorr(
        &self,
        _wallet_id: &str,
        message: Message,
    ) -> ArkResult<(XOnlyPublicKey, schnorr::Signature)> {
        let secp = Secp256k1::new();
        let signature = secp.sign_schnorr_no_aux_rand(&message, &self.keypair);
        Ok((self.keypair.x_only_public_key().0, signature))
    }
}

/// Operator that co-signs checkpoints with the server key and records calls
pub(crate) struct MockServer {
    pub(crate) info: ServerInfo,
    pub(crate) submitted: Arc<Mutex<Vec<Psbt>>>,
    pub(crate) finalized: Arc<Mutex<Vec<(Txid, Vec<Psbt>)>>>,
}

impl MockServer {
    pub(crate) fn new() -> Self {
        Self {
            info: test_server_info(),
            submitted: Arc::default(),
            finalized: Arc::default(),
        }
    }

    /// Add the operator's signature to every input of `checkpoint`
    pub(crate) fn cosign(&self, checkpoint: &mut Psbt) -> ArkResult<()> {
        let secp = Secp256k1::new();
        let keypair = server_keypair();
        let prevouts: Vec<TxOut> = checkpoint
            .inputs
            .iter()
            .map(|input| input.witness_utxo.clone().ok_or_else(|| ArkError::argument("no prevout")))
            .collect::<ArkResult<_>>()?;

        for index in 0..checkpoint.inputs.len() {
            let script = checkpoint.inputs[index]
                .tap_scripts
                .values()
                .next()
                .map(|(script, _)| script.clone())
                .ok_or_else(|| ArkError::argument("no leaf script"))?;
            let leaf_hash = TapLeafHash::from_script(&script, LeafVersion::TapScript);
            let sighash = SighashCache::new(&checkpoint.unsigned_tx)
                .taproot_script_spend_signature_hash(
                    index,
                    &Prevouts::All(&prevouts),
                    leaf_hash,
                    TapSighashType::Default,
                )?;
            let message = Message::from_digest(sighash.to_byte_array());
            let signature = secp.sign_schnorr_no_aux_rand(&message, &keypair);
            psbt_fields::set_tap_script_sig(
                &mut checkpoint.inputs[index],
                keypair.x_only_public_key().0,
                leaf_hash,
                taproot::Signature {
                    signature,
                    sighash_type: TapSighashType::Default,
                },
            );
        }
        Ok(())
    }
}

impl ArkServer for MockServer {
    async fn server_info(&self) -> ArkResult<ServerInfo> {
        Ok(self.info.clone())
    }

    async fn submit_tx(&self, ark_tx: &Psbt, checkpoints: &[Psbt]) -> ArkResult<SubmitTxResponse> {
        self.submitted.lock().unwrap().push(ark_tx.clone());
        let mut signed_checkpoints = checkpoints.to_vec();
        for checkpoint in &mut signed_checkpoints {
            self.cosign(checkpoint)?;
        }
        // Operators may return checkpoints in any order.
        signed_checkpoints.reverse();
        Ok(SubmitTxResponse {
            ark_txid: ark_tx.unsigned_tx.compute_txid(),
            signed_checkpoints,
        })
    }

    async fn finalize_tx(&self, ark_txid: Txid, checkpoints: &[Psbt]) -> ArkResult<()> {
        self.finalized.lock().unwrap().push((ark_txid, checkpoints.to_vec()));
        Ok(())
    }
}
