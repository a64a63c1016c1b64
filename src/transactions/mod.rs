//! # Transaction Builder
//!
//! Checkpointed Ark transactions, forfeits and the signing path they share.
//!
//! ## Components
//!
//! - **signing**: batch sighash computation, signer calls, witness assembly
//! - **ark_tx**: checkpoint and Ark transaction construction
//! - **forfeit**: forfeit transactions with and without a connector
//! - **send**: [`ArkSender`], the lock/submit/finalize flow against an operator

pub mod ark_tx;
pub mod forfeit;
pub mod send;
pub mod signing;

#[cfg(test)]
pub(crate) mod test_utils;

pub use ark_tx::{build_offchain_tx, OffchainTx};
pub use forfeit::{build_forfeit_tx, Connector};
pub use send::{ArkSender, SendResult};
pub use signing::{finalize_witness, sign_all, sign_inputs};

#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;
    use crate::{
        config::protocol::ANCHOR_SCRIPT_PUBKEY,
        contracts::{ArkContract, VhtlcContract, VhtlcLeaf},
        coin::ArkCoin,
        error::ArkError,
        scripts::{HashLock, RelativeTimelock},
    };
    use bitcoin::{
        absolute, hashes::Hash, taproot::LeafVersion, Amount, OutPoint, ScriptBuf, TapLeafHash,
        TapSighashType, TxOut, Txid, Witness,
    };
    use tokio_util::sync::CancellationToken;

    fn p2tr_out(user: u8, sats: u64) -> TxOut {
        TxOut {
            value: Amount::from_sat(sats),
            script_pubkey: user_address(user).to_p2tr_script_pubkey(),
        }
    }

    #[tokio::test]
    async fn test_checkpoint_structure() {
        let info = test_server_info();
        let coins = vec![funded_coin(1, 20_000, 0), funded_coin(1, 5_000, 1)];
        let offchain = build_offchain_tx(
            &coins,
            &[p2tr_out(2, 25_000)],
            &info,
            1,
            &KeypairSigner::new(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(offchain.checkpoints.len(), 2);
        for (i, input) in offchain.ark_tx.unsigned_tx.input.iter().enumerate() {
            let checkpoint = &offchain.checkpoints[i];
            assert_eq!(input.previous_output.txid, checkpoint.unsigned_tx.compute_txid());
            assert_eq!(checkpoint.unsigned_tx.version.0, 3);

            let outputs = &checkpoint.unsigned_tx.output;
            assert_eq!(outputs.len(), 2);
            assert_eq!(outputs[0].value, offchain.spent_coins[i].amount());
            assert_eq!(outputs[1].script_pubkey.as_bytes(), ANCHOR_SCRIPT_PUBKEY);

            let leaves = offchain.checkpoint_coins[i].contract().tapscripts().unwrap();
            assert_eq!(leaves[0], *offchain.spent_coins[i].spending_leaf());
            assert_eq!(leaves[1], info.checkpoint_tapscript);
        }
    }

    #[tokio::test]
    async fn test_sub_dust_output_becomes_op_return() {
        let info = test_server_info();
        let offchain = build_offchain_tx(
            &[funded_coin(1, 10_000, 0)],
            &[p2tr_out(2, 9_800), p2tr_out(1, 200)],
            &info,
            1,
            &KeypairSigner::new(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let outputs = &offchain.ark_tx.unsigned_tx.output;
        assert_eq!(outputs.len(), 3);
        assert!(outputs[0].script_pubkey.is_p2tr());
        assert!(outputs[1].script_pubkey.is_op_return());
        assert_eq!(outputs[1].value, Amount::from_sat(200));
        assert_eq!(outputs[2].script_pubkey.as_bytes(), ANCHOR_SCRIPT_PUBKEY);
    }

    #[tokio::test]
    async fn test_sub_dust_budget_enforced() {
        let err = build_offchain_tx(
            &[funded_coin(1, 10_000, 0)],
            &[p2tr_out(2, 9_600), p2tr_out(1, 200), p2tr_out(3, 200)],
            &test_server_info(),
            1,
            &KeypairSigner::new(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ArkError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_ark_tx_witnesses_after_operator_cosign() {
        let info = test_server_info();
        let offchain = build_offchain_tx(
            &[funded_coin(1, 10_000, 0)],
            &[p2tr_out(2, 10_000)],
            &info,
            1,
            &KeypairSigner::new(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        // Only the user has signed so far.
        let err = finalize_witness(&offchain.ark_tx, 0).unwrap_err();
        assert!(matches!(err, ArkError::Signing { .. }));
        assert_eq!(offchain.ark_tx.inputs[0].tap_script_sigs.len(), 1);
    }

    fn vhtlc_claim_coin(info: &crate::server_info::ServerInfo, preimage: [u8; 32]) -> ArkCoin {
        let vhtlc = VhtlcContract::new(
            info.signer_key,
            keypair(3).x_only_public_key().0,
            keypair(1).x_only_public_key().0,
            HashLock::sha256_of(&preimage),
            absolute::LockTime::from_height(900_000).unwrap(),
            RelativeTimelock::Blocks(144),
            RelativeTimelock::Blocks(288),
            RelativeTimelock::Blocks(432),
        )
        .unwrap();
        let leaf = vhtlc.leaf(VhtlcLeaf::Claim).build();
        let contract = ArkContract::from(vhtlc);
        let txout = TxOut {
            value: Amount::from_sat(15_000),
            script_pubkey: contract.script_pubkey().unwrap(),
        };
        ArkCoin::new(
            "wallet",
            contract,
            OutPoint::new(Txid::from_byte_array([3u8; 32]), 0),
            txout,
            leaf,
        )
        .unwrap()
        .with_extra_witness(Witness::from_slice(&[preimage.to_vec()]))
    }

    #[tokio::test]
    async fn test_hashlock_condition_in_psbt() {
        let info = test_server_info();
        let preimage = [5u8; 32];
        let offchain = build_offchain_tx(
            &[vhtlc_claim_coin(&info, preimage)],
            &[p2tr_out(1, 15_000)],
            &info,
            1,
            &KeypairSigner::new(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let condition = crate::psbt_fields::get_condition(&offchain.checkpoints[0].inputs[0])
            .unwrap()
            .unwrap();
        assert_eq!(condition.nth(0), Some(&preimage[..]));
    }

    #[tokio::test]
    async fn test_condition_sits_above_signatures() {
        let info = test_server_info();
        let preimage = [6u8; 32];
        let offchain = build_offchain_tx(
            &[vhtlc_claim_coin(&info, preimage)],
            &[p2tr_out(1, 15_000)],
            &info,
            1,
            &KeypairSigner::new(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let mut ark_tx = offchain.ark_tx.clone();
        MockServer::new().cosign(&mut ark_tx).unwrap();
        let witness = finalize_witness(&ark_tx, 0).unwrap();

        // server sig, receiver sig, preimage, script, control block
        assert_eq!(witness.len(), 5);
        let (_, (script, _)) = ark_tx.inputs[0].tap_scripts.iter().next().unwrap();
        let leaf_hash = TapLeafHash::from_script(script, LeafVersion::TapScript);
        let receiver_sig = ark_tx.inputs[0]
            .tap_script_sigs
            .get(&(keypair(1).x_only_public_key().0, leaf_hash))
            .unwrap();
        let server_sig = ark_tx.inputs[0]
            .tap_script_sigs
            .get(&(info.signer_key, leaf_hash))
            .unwrap();
        assert_eq!(witness.nth(0), Some(&server_sig.to_vec()[..]));
        assert_eq!(witness.nth(1), Some(&receiver_sig.to_vec()[..]));
        assert_eq!(witness.nth(2), Some(&preimage[..]));
        assert_eq!(witness.nth(3), Some(script.as_bytes()));
    }

    #[tokio::test]
    async fn test_forfeit_without_connector() {
        let info = test_server_info();
        let coin = funded_coin(1, 10_000, 0);
        let forfeit = build_forfeit_tx(
            &coin,
            None,
            &info,
            &KeypairSigner::new(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(forfeit.unsigned_tx.input.len(), 1);
        let outputs = &forfeit.unsigned_tx.output;
        assert_eq!(outputs[0].value, Amount::from_sat(10_330));
        assert_eq!(outputs[0].script_pubkey, info.forfeit_script);
        let sig = forfeit.inputs[0].tap_script_sigs.values().next().unwrap();
        assert_eq!(sig.sighash_type, TapSighashType::AllPlusAnyoneCanPay);
    }

    #[tokio::test]
    async fn test_forfeit_with_connector() {
        let info = test_server_info();
        let coin = funded_coin(1, 10_000, 0);
        let connector = Connector {
            outpoint: OutPoint::new(Txid::from_byte_array([4u8; 32]), 1),
            txout: TxOut {
                value: Amount::from_sat(500),
                script_pubkey: ScriptBuf::new_p2tr(
                    &bitcoin::secp256k1::Secp256k1::new(),
                    info.signer_key,
                    None,
                ),
            },
        };
        let forfeit = build_forfeit_tx(
            &coin,
            Some(&connector),
            &info,
            &KeypairSigner::new(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(forfeit.unsigned_tx.input.len(), 2);
        assert_eq!(forfeit.unsigned_tx.output[0].value, Amount::from_sat(10_500));
        assert!(forfeit.inputs[1].tap_script_sigs.is_empty());
        let sig = forfeit.inputs[0].tap_script_sigs.values().next().unwrap();
        assert_eq!(sig.sighash_type, TapSighashType::Default);
    }

    #[tokio::test]
    async fn test_forfeit_value_overflow_is_an_error() {
        let coin = funded_coin(1, Amount::MAX_MONEY.to_sat(), 0);
        let err = build_forfeit_tx(
            &coin,
            None,
            &test_server_info(),
            &KeypairSigner::new(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ArkError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_swept_coin_cannot_be_forfeited() {
        let coin = funded_coin(1, 10_000, 0).with_swept(true);
        let result = build_forfeit_tx(
            &coin,
            None,
            &test_server_info(),
            &KeypairSigner::new(1),
            &CancellationToken::new(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_wrong_signer_key_fails_finalization() {
        let offchain = build_offchain_tx(
            &[funded_coin(1, 10_000, 0)],
            &[p2tr_out(2, 10_000)],
            &test_server_info(),
            1,
            &KeypairSigner::new(4),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        // The signature is valid but from a key the leaf does not name.
        assert!(finalize_witness(&offchain.checkpoints[0], 0).is_err());
    }
}
