//! Bearer notes: value claimable by anyone who knows the preimage.
//!
//! ```text
//! arknote<base58(preimage (32) || amount (4, big-endian))>
//! ```

use std::{fmt, str::FromStr};

use bitcoin::{Amount, ScriptBuf};

use super::ContractFields;
use crate::{
    config::protocol::{NOTE_PAYLOAD_LEN, NOTE_PREFIX},
    error::{ArkError, ArkResult},
    scripts::{HashLock, ScriptBuilder},
};

/// A self-contained bearer value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArkNote {
    pub preimage: [u8; 32],
    pub value: u32,
}

impl ArkNote {
    pub fn new(preimage: [u8; 32], value: u32) -> Self {
        Self { preimage, value }
    }

    pub fn amount(&self) -> Amount {
        Amount::from_sat(u64::from(self.value))
    }

    pub fn hash_lock(&self) -> HashLock {
        HashLock::sha256_of(&self.preimage)
    }

    fn payload(&self) -> [u8; NOTE_PAYLOAD_LEN] {
        let mut buf = [0u8; NOTE_PAYLOAD_LEN];
        buf[..32].copy_from_slice(&self.preimage);
        buf[32..].copy_from_slice(&self.value.to_be_bytes());
        buf
    }
}

impl fmt::Display for ArkNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", NOTE_PREFIX, bs58::encode(self.payload()).into_string())
    }
}

impl FromStr for ArkNote {
    type Err = ArkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let encoded = s
            .strip_prefix(NOTE_PREFIX)
            .ok_or_else(|| ArkError::format("note", format!("missing '{}' prefix", NOTE_PREFIX)))?;
        let raw = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| ArkError::format("note", e.to_string()))?;
        if raw.len() != NOTE_PAYLOAD_LEN {
            return Err(ArkError::format(
                "note",
                format!("expected {} bytes, got {}", NOTE_PAYLOAD_LEN, raw.len()),
            ));
        }

        let mut preimage = [0u8; 32];
        preimage.copy_from_slice(&raw[..32]);
        let mut value = [0u8; 4];
        value.copy_from_slice(&raw[32..]);
        Ok(Self::new(preimage, u32::from_be_bytes(value)))
    }
}

/// Contract of a bearer note: one hash-lock leaf, no operator key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteContract {
    pub note: ArkNote,
}

impl NoteContract {
    pub fn new(note: ArkNote) -> Self {
        Self { note }
    }

    pub fn claim_leaf(&self) -> ScriptBuilder {
        self.note.hash_lock().into()
    }

    pub fn claim_script(&self) -> ScriptBuf {
        self.claim_leaf().build()
    }

    pub fn leaves(&self) -> Vec<ScriptBuilder> {
        vec![self.claim_leaf()]
    }

    /// Witness elements that satisfy the claim leaf
    pub fn extra_witness(&self) -> Vec<Vec<u8>> {
        vec![self.note.preimage.to_vec()]
    }

    pub fn fields(&self) -> ContractFields {
        let mut fields = ContractFields::new();
        fields.push("note", self.note.to_string());
        fields
    }

    pub fn from_fields(fields: &ContractFields) -> ArkResult<Self> {
        Ok(Self::new(fields.required("note")?.parse()?))
    }
}
