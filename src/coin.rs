//! # Coins
//!
//! An [`ArkCoin`] is a materialized reference to one spendable VTXO together
//! with the leaf that will be used to spend it. Timelocks needed by that leaf
//! are derived when the coin is built, so a coin can never carry a CSV leaf
//! without the matching input sequence.

use bitcoin::{absolute, Amount, OutPoint, ScriptBuf, Sequence, TxOut, Witness};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    contracts::ArkContract,
    error::{ArkError, ArkResult},
    scripts::ScriptBuilder,
    taptree::ArkSpendInfo,
};

/// When a VTXO's batch expires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoinExpiry {
    Timestamp(DateTime<Utc>),
    Height(u32),
}

/// Current chain tip as seen by the chain-time provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTime {
    pub timestamp: DateTime<Utc>,
    pub height: u32,
}

/// One spendable VTXO and the leaf chosen to spend it
///
/// Fields are read through accessors; the timelocks are derived in
/// [`ArkCoin::new`] and cannot be overridden.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArkCoin {
    wallet_id: String,
    contract: ArkContract,
    birth: Option<DateTime<Utc>>,
    expiry: Option<CoinExpiry>,
    outpoint: OutPoint,
    txout: TxOut,
    spending_leaf: ScriptBuf,
    extra_witness: Option<Witness>,
    sequence: Option<Sequence>,
    lock_time: Option<absolute::LockTime>,
    swept: bool,
}

impl ArkCoin {
    /// Build a coin spending `outpoint` through `spending_leaf` of `contract`
    pub fn new(
        wallet_id: impl Into<String>,
        contract: ArkContract,
        outpoint: OutPoint,
        txout: TxOut,
        spending_leaf: ScriptBuf,
    ) -> ArkResult<Self> {
        if txout.script_pubkey != contract.script_pubkey()? {
            return Err(ArkError::argument(format!(
                "output {} does not pay to the {} contract",
                outpoint,
                contract.contract_type()
            )));
        }
        if !contract.tapscripts()?.contains(&spending_leaf) {
            return Err(ArkError::argument(format!(
                "spending leaf is not part of the {} contract",
                contract.contract_type()
            )));
        }

        let leaf = ScriptBuilder::from_script(&spending_leaf)?;
        let sequence = leaf
            .relative_timelock()
            .map(|timelock| timelock.to_sequence())
            .transpose()?;
        let lock_time = leaf.absolute_timelock();

        Ok(Self {
            wallet_id: wallet_id.into(),
            contract,
            birth: None,
            expiry: None,
            outpoint,
            txout,
            spending_leaf,
            extra_witness: None,
            sequence,
            lock_time,
            swept: false,
        })
    }

    /// When the VTXO was created
    pub fn with_birth(mut self, birth: DateTime<Utc>) -> Self {
        self.birth = Some(birth);
        self
    }

    /// When the VTXO's batch expires
    pub fn with_expiry(mut self, expiry: CoinExpiry) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Extra witness elements satisfying a non-signature condition of the leaf
    pub fn with_extra_witness(mut self, witness: Witness) -> Self {
        self.extra_witness = Some(witness);
        self
    }

    pub fn with_swept(mut self, swept: bool) -> Self {
        self.swept = swept;
        self
    }

    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    pub fn contract(&self) -> &ArkContract {
        &self.contract
    }

    pub fn birth(&self) -> Option<DateTime<Utc>> {
        self.birth
    }

    pub fn expiry(&self) -> Option<CoinExpiry> {
        self.expiry
    }

    pub fn outpoint(&self) -> OutPoint {
        self.outpoint
    }

    pub fn txout(&self) -> &TxOut {
        &self.txout
    }

    /// The tapscript this coin is spent through
    pub fn spending_leaf(&self) -> &ScriptBuf {
        &self.spending_leaf
    }

    /// Extra witness elements pushed below the signatures
    pub fn extra_witness(&self) -> Option<&Witness> {
        self.extra_witness.as_ref()
    }

    /// Relative timelock required by the spending leaf, as a BIP68 sequence
    pub fn sequence(&self) -> Option<Sequence> {
        self.sequence
    }

    /// Absolute timelock required by the spending leaf
    pub fn lock_time(&self) -> Option<absolute::LockTime> {
        self.lock_time
    }

    pub fn is_swept(&self) -> bool {
        self.swept
    }

    pub fn amount(&self) -> Amount {
        self.txout.value
    }

    pub fn spend_info(&self) -> ArkResult<ArkSpendInfo> {
        self.contract.spend_info()
    }

    /// Whether the batch holding this coin has expired at `now`
    pub fn is_expired(&self, now: &ChainTime) -> bool {
        match self.expiry {
            Some(CoinExpiry::Timestamp(at)) => now.timestamp >= at,
            Some(CoinExpiry::Height(height)) => now.height >= height,
            None => false,
        }
    }

    /// Swept coins can only be claimed collaboratively, never forfeited
    pub fn can_forfeit(&self) -> bool {
        !self.swept
    }

    /// Sequence to put on the spending input
    pub fn input_sequence(&self) -> Sequence {
        self.sequence.unwrap_or(Sequence::ENABLE_RBF_NO_LOCKTIME)
    }

    /// The same spend, now routed through a checkpoint output
    pub fn into_checkpoint(
        self,
        checkpoint: ArkContract,
        outpoint: OutPoint,
        txout: TxOut,
    ) -> ArkResult<Self> {
        let coin = ArkCoin::new(
            self.wallet_id,
            checkpoint,
            outpoint,
            txout,
            self.spending_leaf,
        )?;
        Ok(ArkCoin {
            birth: self.birth,
            expiry: self.expiry,
            extra_witness: self.extra_witness,
            swept: self.swept,
            ..coin
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{contracts::PaymentContract, scripts::RelativeTimelock};
    use bitcoin::secp256k1::{Keypair, Secp256k1, SecretKey};
    use bitcoin::XOnlyPublicKey;
    use chrono::Duration;

    fn key(byte: u8) -> XOnlyPublicKey {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[byte; 32]).unwrap();
        Keypair::from_secret_key(&secp, &secret).x_only_public_key().0
    }

    fn payment() -> PaymentContract {
        PaymentContract::new(key(1), key(2), RelativeTimelock::Blocks(144)).unwrap()
    }

    fn coin(leaf: ScriptBuf) -> ArkResult<ArkCoin> {
        let contract: ArkContract = payment().into();
        let txout = TxOut {
            value: Amount::from_sat(50_000),
            script_pubkey: contract.script_pubkey()?,
        };
        ArkCoin::new("wallet", contract, OutPoint::null(), txout, leaf)
    }

    #[test]
    fn test_sequence_derived_from_exit_leaf() {
        let exit = coin(payment().exit_script()).unwrap();
        assert_eq!(exit.sequence(), Some(Sequence::from_height(144)));

        let collaborative = coin(payment().collaborative_script()).unwrap();
        assert_eq!(collaborative.sequence(), None);
        assert_eq!(collaborative.input_sequence(), Sequence::ENABLE_RBF_NO_LOCKTIME);
    }

    #[test]
    fn test_foreign_leaf_rejected() {
        let foreign = PaymentContract::new(key(3), key(4), RelativeTimelock::Blocks(10))
            .unwrap()
            .exit_script();
        assert!(coin(foreign).is_err());
    }

    #[test]
    fn test_output_must_pay_to_contract() {
        let contract: ArkContract = payment().into();
        let other: ArkContract = PaymentContract::new(key(3), key(4), RelativeTimelock::Blocks(10))
            .unwrap()
            .into();
        let txout = TxOut {
            value: Amount::from_sat(50_000),
            script_pubkey: other.script_pubkey().unwrap(),
        };
        let leaf = payment().collaborative_script();
        assert!(ArkCoin::new("wallet", contract, OutPoint::null(), txout, leaf).is_err());
    }

    #[test]
    fn test_checkpoint_keeps_metadata() {
        let born = Utc::now();
        let base = coin(payment().exit_script())
            .unwrap()
            .with_birth(born)
            .with_expiry(CoinExpiry::Height(900_000))
            .with_swept(true);

        let generic = crate::contracts::GenericContract::new(
            Some(key(1)),
            vec![payment().exit_script(), payment().collaborative_script()],
        )
        .unwrap();
        let checkpoint: ArkContract = generic.into();
        let txout = TxOut {
            value: base.amount(),
            script_pubkey: checkpoint.script_pubkey().unwrap(),
        };
        let converted = base
            .into_checkpoint(checkpoint.clone(), OutPoint::null(), txout)
            .unwrap();

        assert_eq!(converted.birth(), Some(born));
        assert_eq!(converted.expiry(), Some(CoinExpiry::Height(900_000)));
        assert!(converted.is_swept());
        assert_eq!(converted.contract(), &checkpoint);
        assert_eq!(converted.sequence(), Some(Sequence::from_height(144)));
    }

    #[test]
    fn test_expiry_evaluation() {
        let now = ChainTime {
            timestamp: Utc::now(),
            height: 850_000,
        };
        let base = coin(payment().collaborative_script()).unwrap();
        assert!(!base.is_expired(&now));

        let by_height = base.clone().with_expiry(CoinExpiry::Height(849_999));
        assert!(by_height.is_expired(&now));

        let by_time = base.with_expiry(CoinExpiry::Timestamp(now.timestamp + Duration::hours(1)));
        assert!(!by_time.is_expired(&now));
    }

    #[test]
    fn test_swept_coin_cannot_forfeit() {
        let swept = coin(payment().collaborative_script()).unwrap().with_swept(true);
        assert!(!swept.can_forfeit());
    }
}
