//! # Script Leaf Model
//!
//! Composable tapscript fragments. Every leaf is an immutable value whose
//! [`ScriptBuilder::ops`] is a pure function of its state; [`ScriptBuilder::build`]
//! folds those operations into a [`ScriptBuf`] with the `bitcoin` script builder.
//!
//! ## Leaf grammar
//!
//! ```text
//! NofNMultisig      <k1> OP_CHECKSIGVERIFY ... <kn> OP_CHECKSIGVERIFY
//! HashLock          OP_SHA256|OP_HASH160 <digest> OP_EQUAL
//! LockTime          <locktime> OP_CHECKLOCKTIMEVERIFY OP_DROP
//! Verify            <inner> OP_VERIFY
//! Composite         <leaf1> <leaf2> ...
//! CollaborativePath [<condition>] <server> OP_CHECKSIG
//! UnilateralPath    [<condition> OP_VERIFY] <seq> OP_CHECKSEQUENCEVERIFY OP_DROP
//!                   <k1> OP_CHECKSIGVERIFY ... <kn> OP_CHECKSIG
//! ```

pub mod parse;
pub mod timelock;

use bitcoin::{
    absolute,
    hashes::{hash160, sha256, Hash},
    opcodes::{all::*, Opcode},
    script::{Builder, PushBytesBuf},
    taproot::{LeafVersion, TapLeafHash},
    ScriptBuf, Sequence, XOnlyPublicKey,
};

use crate::error::{ArkError, ArkResult};

pub use timelock::RelativeTimelock;

/// A single tapscript operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOp {
    /// A bare opcode
    Op(Opcode),
    /// A minimally encoded script number
    Int(i64),
    /// A 32-byte x-only public key push
    Key(XOnlyPublicKey),
    /// An arbitrary data push
    Data(PushBytesBuf),
}

/// Digest committed to by a [`ScriptBuilder::HashLock`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashLock {
    /// `OP_SHA256 <digest> OP_EQUAL`
    Sha256(sha256::Hash),
    /// `OP_HASH160 <digest> OP_EQUAL`
    Hash160(hash160::Hash),
}

impl HashLock {
    /// Lock on the SHA-256 of a preimage
    pub fn sha256_of(preimage: &[u8]) -> Self {
        HashLock::Sha256(sha256::Hash::hash(preimage))
    }

    /// Check whether `preimage` opens this lock
    pub fn matches(&self, preimage: &[u8]) -> bool {
        match self {
            HashLock::Sha256(digest) => sha256::Hash::hash(preimage) == *digest,
            HashLock::Hash160(digest) => hash160::Hash::hash(preimage) == *digest,
        }
    }

    /// The committed digest bytes
    pub fn digest(&self) -> Vec<u8> {
        match self {
            HashLock::Sha256(digest) => digest.to_byte_array().to_vec(),
            HashLock::Hash160(digest) => digest.to_byte_array().to_vec(),
        }
    }

    fn ops(&self) -> Vec<ScriptOp> {
        match self {
            HashLock::Sha256(digest) => vec![
                ScriptOp::Op(OP_SHA256),
                ScriptOp::Data(PushBytesBuf::from(digest.to_byte_array())),
                ScriptOp::Op(OP_EQUAL),
            ],
            HashLock::Hash160(digest) => vec![
                ScriptOp::Op(OP_HASH160),
                ScriptOp::Data(PushBytesBuf::from(digest.to_byte_array())),
                ScriptOp::Op(OP_EQUAL),
            ],
        }
    }
}

/// Collaborative spend: optional condition, then the operator's signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollaborativePath {
    pub server: XOnlyPublicKey,
    pub condition: Option<Box<ScriptBuilder>>,
}

/// Unilateral exit: optional condition, a relative timelock, then all owners
///
/// Only built through [`UnilateralPath::new`], so the encoded sequence is
/// always a valid, enforced BIP68 lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnilateralPath {
    timeout: RelativeTimelock,
    sequence: Sequence,
    owners: Vec<XOnlyPublicKey>,
    condition: Option<Box<ScriptBuilder>>,
}

impl UnilateralPath {
    /// Validate `timeout` and require at least one owner
    pub fn new(
        timeout: RelativeTimelock,
        owners: Vec<XOnlyPublicKey>,
        condition: Option<ScriptBuilder>,
    ) -> ArkResult<Self> {
        if owners.is_empty() {
            return Err(ArkError::argument("unilateral path requires at least one owner"));
        }
        Ok(Self {
            timeout,
            sequence: timeout.to_sequence()?,
            owners,
            condition: condition.map(Box::new),
        })
    }

    pub fn timeout(&self) -> RelativeTimelock {
        self.timeout
    }

    /// BIP68 sequence pushed before `OP_CHECKSEQUENCEVERIFY`
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    pub fn owners(&self) -> &[XOnlyPublicKey] {
        &self.owners
    }

    pub fn condition(&self) -> Option<&ScriptBuilder> {
        self.condition.as_deref()
    }
}

/// A tapscript leaf, composable from smaller leaves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptBuilder {
    /// Every listed key must sign (conjunctive, not a threshold)
    NofNMultisig(Vec<XOnlyPublicKey>),
    /// Preimage reveal
    HashLock(HashLock),
    /// Absolute timelock guard
    LockTime(absolute::LockTime),
    /// Wraps an inner leaf and appends `OP_VERIFY`
    Verify(Box<ScriptBuilder>),
    /// Concatenation of sub-leaves, in order
    Composite(Vec<ScriptBuilder>),
    /// Raw operations
    Generic(Vec<ScriptOp>),
    /// Operator co-signed spend
    Collaborative(CollaborativePath),
    /// Timelocked exit without the operator
    Unilateral(UnilateralPath),
}

impl ScriptBuilder {
    /// All of `owners` must sign
    pub fn multisig(owners: Vec<XOnlyPublicKey>) -> Self {
        ScriptBuilder::NofNMultisig(owners)
    }

    /// Collaborative path for `server`, optionally gated by `condition`
    pub fn collaborative(server: XOnlyPublicKey, condition: Option<ScriptBuilder>) -> Self {
        ScriptBuilder::Collaborative(CollaborativePath {
            server,
            condition: condition.map(Box::new),
        })
    }

    /// Unilateral path after `timeout`, signed by every owner
    pub fn unilateral(
        timeout: RelativeTimelock,
        owners: Vec<XOnlyPublicKey>,
        condition: Option<ScriptBuilder>,
    ) -> ArkResult<Self> {
        UnilateralPath::new(timeout, owners, condition).map(ScriptBuilder::Unilateral)
    }

    /// Generic leaf reproducing an existing script
    pub fn from_script(script: &ScriptBuf) -> ArkResult<Self> {
        parse::script_ops(script).map(ScriptBuilder::Generic)
    }

    /// The ordered operations of this leaf
    pub fn ops(&self) -> Vec<ScriptOp> {
        match self {
            ScriptBuilder::NofNMultisig(owners) => owners
                .iter()
                .flat_map(|key| [ScriptOp::Key(*key), ScriptOp::Op(OP_CHECKSIGVERIFY)])
                .collect(),
            ScriptBuilder::HashLock(lock) => lock.ops(),
            ScriptBuilder::LockTime(lock_time) => vec![
                ScriptOp::Int(i64::from(lock_time.to_consensus_u32())),
                ScriptOp::Op(OP_CLTV),
                ScriptOp::Op(OP_DROP),
            ],
            ScriptBuilder::Verify(inner) => {
                let mut ops = inner.ops();
                ops.push(ScriptOp::Op(OP_VERIFY));
                ops
            }
            ScriptBuilder::Composite(parts) => parts.iter().flat_map(ScriptBuilder::ops).collect(),
            ScriptBuilder::Generic(ops) => ops.clone(),
            ScriptBuilder::Collaborative(path) => {
                let mut ops = path
                    .condition
                    .as_ref()
                    .map(|condition| condition.ops())
                    .unwrap_or_default();
                ops.push(ScriptOp::Key(path.server));
                ops.push(ScriptOp::Op(OP_CHECKSIG));
                ops
            }
            ScriptBuilder::Unilateral(path) => {
                let mut ops = Vec::new();
                if let Some(condition) = &path.condition {
                    ops.extend(condition.ops());
                    ops.push(ScriptOp::Op(OP_VERIFY));
                }
                ops.push(ScriptOp::Int(i64::from(path.sequence.to_consensus_u32())));
                ops.push(ScriptOp::Op(OP_CSV));
                ops.push(ScriptOp::Op(OP_DROP));

                let mut multisig = ScriptBuilder::NofNMultisig(path.owners.clone()).ops();
                if let Some(last) = multisig.last_mut() {
                    *last = ScriptOp::Op(OP_CHECKSIG);
                }
                ops.extend(multisig);
                ops
            }
        }
    }

    /// Assemble the leaf into a tapscript
    pub fn build(&self) -> ScriptBuf {
        self.ops()
            .into_iter()
            .fold(Builder::new(), |builder, op| match op {
                ScriptOp::Op(opcode) => builder.push_opcode(opcode),
                ScriptOp::Int(value) => builder.push_int(value),
                ScriptOp::Key(key) => builder.push_x_only_key(&key),
                ScriptOp::Data(data) => builder.push_slice(data),
            })
            .into_script()
    }

    /// BIP341 leaf hash of the built script
    pub fn leaf_hash(&self) -> TapLeafHash {
        TapLeafHash::from_script(&self.build(), LeafVersion::TapScript)
    }

    /// The relative timelock this leaf enforces, if any
    pub fn relative_timelock(&self) -> Option<RelativeTimelock> {
        match self {
            ScriptBuilder::Unilateral(path) => Some(path.timeout),
            other => parse::find_relative_timelock(&other.ops()),
        }
    }

    /// The absolute timelock this leaf enforces, if any
    pub fn absolute_timelock(&self) -> Option<absolute::LockTime> {
        parse::find_absolute_timelock(&self.ops())
    }
}

impl From<HashLock> for ScriptBuilder {
    fn from(lock: HashLock) -> Self {
        ScriptBuilder::HashLock(lock)
    }
}
