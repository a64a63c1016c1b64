//! Virtual HTLC: a hash time-locked contract living inside a VTXO.
//!
//! | # | Leaf | Signers | Guard |
//! |---|------|---------|-------|
//! | 0 | claim | receiver + server | preimage |
//! | 1 | refund | sender + receiver + server | |
//! | 2 | refund without receiver | sender + server | absolute locktime |
//! | 3 | unilateral claim | receiver | preimage, relative delay |
//! | 4 | unilateral refund | sender + receiver | relative delay |
//! | 5 | unilateral refund without receiver | sender | relative delay |

use bitcoin::{absolute, ScriptBuf, XOnlyPublicKey};

use super::{
    payment::{hash_lock_from_fields, push_hash_lock},
    ContractFields,
};
use crate::{
    error::{ArkError, ArkResult},
    scripts::{HashLock, RelativeTimelock, ScriptBuilder, UnilateralPath},
};

/// Spending paths of a VHTLC, in leaf order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VhtlcLeaf {
    Claim,
    Refund,
    RefundWithoutReceiver,
    UnilateralClaim,
    UnilateralRefund,
    UnilateralRefundWithoutReceiver,
}

impl VhtlcLeaf {
    pub const ALL: [VhtlcLeaf; 6] = [
        VhtlcLeaf::Claim,
        VhtlcLeaf::Refund,
        VhtlcLeaf::RefundWithoutReceiver,
        VhtlcLeaf::UnilateralClaim,
        VhtlcLeaf::UnilateralRefund,
        VhtlcLeaf::UnilateralRefundWithoutReceiver,
    ];

    /// Whether the operator co-signs this path
    pub fn is_collaborative(self) -> bool {
        matches!(
            self,
            VhtlcLeaf::Claim | VhtlcLeaf::Refund | VhtlcLeaf::RefundWithoutReceiver
        )
    }
}

/// Hash time-locked contract between `sender` and `receiver`
///
/// The three unilateral paths are validated and built in
/// [`VhtlcContract::new`]; the contract cannot hold an unenforceable delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VhtlcContract {
    server: XOnlyPublicKey,
    sender: XOnlyPublicKey,
    receiver: XOnlyPublicKey,
    hash: HashLock,
    refund_locktime: absolute::LockTime,
    unilateral_claim: UnilateralPath,
    unilateral_refund: UnilateralPath,
    unilateral_refund_without_receiver: UnilateralPath,
}

impl VhtlcContract {
    /// Build a VHTLC; the refund locktime must be non-zero and time-based
    /// delays positive multiples of 512 seconds
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        server: XOnlyPublicKey,
        sender: XOnlyPublicKey,
        receiver: XOnlyPublicKey,
        hash: HashLock,
        refund_locktime: absolute::LockTime,
        unilateral_claim_delay: RelativeTimelock,
        unilateral_refund_delay: RelativeTimelock,
        unilateral_refund_without_receiver_delay: RelativeTimelock,
    ) -> ArkResult<Self> {
        if refund_locktime.to_consensus_u32() == 0 {
            return Err(ArkError::argument("VHTLC refund locktime must be non-zero"));
        }
        Ok(Self {
            server,
            sender,
            receiver,
            hash,
            refund_locktime,
            unilateral_claim: UnilateralPath::new(
                unilateral_claim_delay,
                vec![receiver],
                Some(hash.into()),
            )?,
            unilateral_refund: UnilateralPath::new(
                unilateral_refund_delay,
                vec![sender, receiver],
                None,
            )?,
            unilateral_refund_without_receiver: UnilateralPath::new(
                unilateral_refund_without_receiver_delay,
                vec![sender],
                None,
            )?,
        })
    }

    /// Convenience constructor locking on the SHA-256 of `preimage`
    #[allow(clippy::too_many_arguments)]
    pub fn with_preimage(
        server: XOnlyPublicKey,
        sender: XOnlyPublicKey,
        receiver: XOnlyPublicKey,
        preimage: &[u8],
        refund_locktime: absolute::LockTime,
        unilateral_claim_delay: RelativeTimelock,
        unilateral_refund_delay: RelativeTimelock,
        unilateral_refund_without_receiver_delay: RelativeTimelock,
    ) -> ArkResult<Self> {
        Self::new(
            server,
            sender,
            receiver,
            HashLock::sha256_of(preimage),
            refund_locktime,
            unilateral_claim_delay,
            unilateral_refund_delay,
            unilateral_refund_without_receiver_delay,
        )
    }

    pub fn server(&self) -> XOnlyPublicKey {
        self.server
    }

    /// Party funding the swap, refunded on timeout
    pub fn sender(&self) -> XOnlyPublicKey {
        self.sender
    }

    /// Party claiming with the preimage
    pub fn receiver(&self) -> XOnlyPublicKey {
        self.receiver
    }

    pub fn hash_lock(&self) -> HashLock {
        self.hash
    }

    /// Height or time after which the sender alone (with the operator) can refund
    pub fn refund_locktime(&self) -> absolute::LockTime {
        self.refund_locktime
    }

    pub fn unilateral_claim_delay(&self) -> RelativeTimelock {
        self.unilateral_claim.timeout()
    }

    pub fn unilateral_refund_delay(&self) -> RelativeTimelock {
        self.unilateral_refund.timeout()
    }

    pub fn unilateral_refund_without_receiver_delay(&self) -> RelativeTimelock {
        self.unilateral_refund_without_receiver.timeout()
    }

    /// The leaf for one spending path
    pub fn leaf(&self, which: VhtlcLeaf) -> ScriptBuilder {
        match which {
            VhtlcLeaf::Claim => ScriptBuilder::collaborative(
                self.server,
                Some(ScriptBuilder::Composite(vec![
                    ScriptBuilder::Verify(Box::new(self.hash.into())),
                    ScriptBuilder::multisig(vec![self.receiver]),
                ])),
            ),
            VhtlcLeaf::Refund => ScriptBuilder::collaborative(
                self.server,
                Some(ScriptBuilder::multisig(vec![self.sender, self.receiver])),
            ),
            VhtlcLeaf::RefundWithoutReceiver => ScriptBuilder::collaborative(
                self.server,
                Some(ScriptBuilder::Composite(vec![
                    ScriptBuilder::LockTime(self.refund_locktime),
                    ScriptBuilder::multisig(vec![self.sender]),
                ])),
            ),
            VhtlcLeaf::UnilateralClaim => ScriptBuilder::Unilateral(self.unilateral_claim.clone()),
            VhtlcLeaf::UnilateralRefund => ScriptBuilder::Unilateral(self.unilateral_refund.clone()),
            VhtlcLeaf::UnilateralRefundWithoutReceiver => {
                ScriptBuilder::Unilateral(self.unilateral_refund_without_receiver.clone())
            }
        }
    }

    /// Preimage + receiver + operator
    pub fn claim_script(&self) -> ScriptBuf {
        self.leaf(VhtlcLeaf::Claim).build()
    }

    /// Sender alone, after its relative delay
    pub fn unilateral_refund_without_receiver_script(&self) -> ScriptBuf {
        self.leaf(VhtlcLeaf::UnilateralRefundWithoutReceiver).build()
    }

    pub fn leaves(&self) -> Vec<ScriptBuilder> {
        VhtlcLeaf::ALL.into_iter().map(|which| self.leaf(which)).collect()
    }

    pub fn fields(&self) -> ArkResult<ContractFields> {
        let mut fields = ContractFields::new();
        fields.push_key("server", &self.server);
        fields.push_key("sender", &self.sender);
        fields.push_key("receiver", &self.receiver);
        push_hash_lock(&mut fields, &self.hash);
        fields.push(
            "refund_locktime",
            self.refund_locktime.to_consensus_u32().to_string(),
        );
        fields.push_timelock("unilateral_claim_delay", self.unilateral_claim_delay())?;
        fields.push_timelock("unilateral_refund_delay", self.unilateral_refund_delay())?;
        fields.push_timelock(
            "unilateral_refund_without_receiver_delay",
            self.unilateral_refund_without_receiver_delay(),
        )?;
        Ok(fields)
    }

    pub fn from_fields(fields: &ContractFields) -> ArkResult<Self> {
        Self::new(
            fields.key("server")?,
            fields.key("sender")?,
            fields.key("receiver")?,
            hash_lock_from_fields(fields)?,
            absolute::LockTime::from_consensus(fields.decimal("refund_locktime")?),
            fields.timelock("unilateral_claim_delay")?,
            fields.timelock("unilateral_refund_delay")?,
            fields.timelock("unilateral_refund_without_receiver_delay")?,
        )
    }

    /// Whether `preimage` opens the claim paths
    pub fn check_preimage(&self, preimage: &[u8]) -> bool {
        self.hash.matches(preimage)
    }
}
