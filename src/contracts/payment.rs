//! Payment contracts: the default VTXO policy and its hash-locked variant.

use bitcoin::{
    hashes::{hash160, sha256, Hash},
    ScriptBuf, XOnlyPublicKey,
};

use super::ContractFields;
use crate::{
    error::{ArkError, ArkResult},
    scripts::{HashLock, RelativeTimelock, ScriptBuilder, UnilateralPath},
    server_info::ServerInfo,
};

/// Default VTXO: `user + server` collaboratively, or `user` alone after `exit_delay`
///
/// The exit path is built once in [`PaymentContract::new`], so every contract
/// value carries an enforceable delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentContract {
    server: XOnlyPublicKey,
    user: XOnlyPublicKey,
    exit: UnilateralPath,
}

impl PaymentContract {
    /// Build a payment contract, rejecting an unenforceable `exit_delay`
    pub fn new(
        server: XOnlyPublicKey,
        user: XOnlyPublicKey,
        exit_delay: RelativeTimelock,
    ) -> ArkResult<Self> {
        Ok(Self {
            server,
            user,
            exit: UnilateralPath::new(exit_delay, vec![user], None)?,
        })
    }

    /// Offchain receiving contract using the operator's unilateral exit delay
    pub fn for_server(server_info: &ServerInfo, user: XOnlyPublicKey) -> ArkResult<Self> {
        Self::new(server_info.signer_key, user, server_info.unilateral_exit_delay)
    }

    /// Onchain boarding contract using the operator's boarding exit delay
    pub fn boarding(server_info: &ServerInfo, user: XOnlyPublicKey) -> ArkResult<Self> {
        Self::new(server_info.signer_key, user, server_info.boarding_exit_delay)
    }

    /// Operator key co-signing the collaborative path
    pub fn server(&self) -> XOnlyPublicKey {
        self.server
    }

    /// Owner of the VTXO
    pub fn user(&self) -> XOnlyPublicKey {
        self.user
    }

    /// Delay before the owner can exit without the operator
    pub fn exit_delay(&self) -> RelativeTimelock {
        self.exit.timeout()
    }

    /// `<user> OP_CHECKSIGVERIFY <server> OP_CHECKSIG`
    pub fn collaborative_leaf(&self) -> ScriptBuilder {
        ScriptBuilder::collaborative(self.server, Some(ScriptBuilder::multisig(vec![self.user])))
    }

    /// `<exit_delay> OP_CSV OP_DROP <user> OP_CHECKSIG`
    pub fn exit_leaf(&self) -> ScriptBuilder {
        ScriptBuilder::Unilateral(self.exit.clone())
    }

    pub fn collaborative_script(&self) -> ScriptBuf {
        self.collaborative_leaf().build()
    }

    pub fn exit_script(&self) -> ScriptBuf {
        self.exit_leaf().build()
    }

    /// Leaves in tree order: collaborative first, then the exit
    pub fn leaves(&self) -> Vec<ScriptBuilder> {
        vec![self.collaborative_leaf(), self.exit_leaf()]
    }

    /// `server`, `user`, `exit_delay`
    pub fn fields(&self) -> ArkResult<ContractFields> {
        let mut fields = ContractFields::new();
        fields.push_key("server", &self.server);
        fields.push_key("user", &self.user);
        fields.push_timelock("exit_delay", self.exit_delay())?;
        Ok(fields)
    }

    /// Rebuild from decoded fields, in any order
    pub fn from_fields(fields: &ContractFields) -> ArkResult<Self> {
        Self::new(
            fields.key("server")?,
            fields.key("user")?,
            fields.timelock("exit_delay")?,
        )
    }
}

/// Payment whose collaborative claim also requires a hash preimage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashLockedPaymentContract {
    server: XOnlyPublicKey,
    user: XOnlyPublicKey,
    hash: HashLock,
    exit: UnilateralPath,
}

impl HashLockedPaymentContract {
    /// Build a hash-locked payment, rejecting an unenforceable `exit_delay`
    pub fn new(
        server: XOnlyPublicKey,
        user: XOnlyPublicKey,
        hash: HashLock,
        exit_delay: RelativeTimelock,
    ) -> ArkResult<Self> {
        Ok(Self {
            server,
            user,
            hash,
            exit: UnilateralPath::new(exit_delay, vec![user], None)?,
        })
    }

    pub fn server(&self) -> XOnlyPublicKey {
        self.server
    }

    pub fn user(&self) -> XOnlyPublicKey {
        self.user
    }

    /// Digest the claim path checks the preimage against
    pub fn hash_lock(&self) -> HashLock {
        self.hash
    }

    pub fn exit_delay(&self) -> RelativeTimelock {
        self.exit.timeout()
    }

    /// `<hash check> OP_VERIFY <user> OP_CHECKSIGVERIFY <server> OP_CHECKSIG`
    pub fn claim_leaf(&self) -> ScriptBuilder {
        ScriptBuilder::collaborative(
            self.server,
            Some(ScriptBuilder::Composite(vec![
                ScriptBuilder::Verify(Box::new(self.hash.into())),
                ScriptBuilder::multisig(vec![self.user]),
            ])),
        )
    }

    /// Plain unilateral exit; the preimage is not needed to leave
    pub fn exit_leaf(&self) -> ScriptBuilder {
        ScriptBuilder::Unilateral(self.exit.clone())
    }

    pub fn leaves(&self) -> Vec<ScriptBuilder> {
        vec![self.claim_leaf(), self.exit_leaf()]
    }

    /// `server`, `user`, `hash_type`, `hash`, `exit_delay`
    pub fn fields(&self) -> ArkResult<ContractFields> {
        let mut fields = ContractFields::new();
        fields.push_key("server", &self.server);
        fields.push_key("user", &self.user);
        push_hash_lock(&mut fields, &self.hash);
        fields.push_timelock("exit_delay", self.exit_delay())?;
        Ok(fields)
    }

    pub fn from_fields(fields: &ContractFields) -> ArkResult<Self> {
        Self::new(
            fields.key("server")?,
            fields.key("user")?,
            hash_lock_from_fields(fields)?,
            fields.timelock("exit_delay")?,
        )
    }
}

/// Writes `hash_type` and `hash`
pub(crate) fn push_hash_lock(fields: &mut ContractFields, lock: &HashLock) {
    let hash_type = match lock {
        HashLock::Sha256(_) => "sha256",
        HashLock::Hash160(_) => "hash160",
    };
    fields.push("hash_type", hash_type);
    fields.push("hash", hex::encode(lock.digest()));
}

/// Reads `hash_type` (default `sha256`) and `hash`
pub(crate) fn hash_lock_from_fields(fields: &ContractFields) -> ArkResult<HashLock> {
    let bytes = fields.hex_bytes("hash")?;
    let wrong_length = || ArkError::format("contract", format!("hash of {} bytes", bytes.len()));
    match fields.get("hash_type").unwrap_or("sha256") {
        "sha256" => {
            let digest: [u8; 32] = bytes.as_slice().try_into().map_err(|_| wrong_length())?;
            Ok(HashLock::Sha256(sha256::Hash::from_byte_array(digest)))
        }
        "hash160" => {
            let digest: [u8; 20] = bytes.as_slice().try_into().map_err(|_| wrong_length())?;
            Ok(HashLock::Hash160(hash160::Hash::from_byte_array(digest)))
        }
        other => Err(ArkError::format(
            "contract",
            format!("unknown hash type '{}'", other),
        )),
    }
}
