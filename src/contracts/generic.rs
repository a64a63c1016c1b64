//! Explicit-leaf contracts and the address-only fallback.

use bitcoin::{Network, ScriptBuf, XOnlyPublicKey};

use super::ContractFields;
use crate::{
    address::ArkAddress,
    error::{ArkError, ArkResult},
    psbt_fields::{decode_taptree, encode_taptree},
    scripts::ScriptBuilder,
};

/// A contract given directly by its ordered tapscripts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericContract {
    /// Operator key, when the contract string names one
    pub server: Option<XOnlyPublicKey>,
    pub tapscripts: Vec<ScriptBuf>,
}

impl GenericContract {
    /// Leaves are kept in the given order; at least one is required
    pub fn new(server: Option<XOnlyPublicKey>, tapscripts: Vec<ScriptBuf>) -> ArkResult<Self> {
        if tapscripts.is_empty() {
            return Err(ArkError::argument("generic contract needs at least one leaf"));
        }
        Ok(Self { server, tapscripts })
    }

    /// Compile each typed leaf, keeping order
    pub fn from_leaves(server: Option<XOnlyPublicKey>, leaves: &[ScriptBuilder]) -> ArkResult<Self> {
        Self::new(server, leaves.iter().map(ScriptBuilder::build).collect())
    }

    /// `server` when known, plus `tapscripts` as hex of the PSBT taptree encoding
    pub fn fields(&self) -> ContractFields {
        let mut fields = ContractFields::new();
        if let Some(server) = &self.server {
            fields.push_key("server", server);
        }
        fields.push("tapscripts", hex::encode(encode_taptree(&self.tapscripts)));
        fields
    }

    pub fn from_fields(fields: &ContractFields) -> ArkResult<Self> {
        let tapscripts = decode_taptree(&fields.hex_bytes("tapscripts")?)?;
        Self::new(fields.optional_key("server")?, tapscripts)
    }
}

/// A contract known only by its address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownContract {
    pub address: ArkAddress,
    /// Prefix network for re-encoding
    pub mainnet: bool,
}

impl UnknownContract {
    /// `mainnet` selects the prefix used when re-encoding
    pub fn new(address: ArkAddress, mainnet: bool) -> Self {
        Self { address, mainnet }
    }

    /// Parse an encoded address; its own prefix wins over `fallback_mainnet`
    pub fn from_encoded(address: &str, fallback_mainnet: Option<bool>) -> ArkResult<Self> {
        let (address, own_mainnet) = ArkAddress::parse_with_network(address)?;
        if fallback_mainnet.is_some_and(|flag| flag != own_mainnet) {
            log::debug!("Address prefix overrides supplied network flag");
        }
        Ok(Self::new(address, own_mainnet))
    }

    /// The address alone, encoded with the stored network's prefix
    pub fn fields(&self) -> ArkResult<ContractFields> {
        let network = if self.mainnet {
            Network::Bitcoin
        } else {
            Network::Testnet
        };
        let mut fields = ContractFields::new();
        fields.push("address", self.address.encode(network)?);
        Ok(fields)
    }

    /// An optional `mainnet` field is only a fallback for the address prefix
    pub fn from_fields(fields: &ContractFields) -> ArkResult<Self> {
        let fallback = match fields.get("mainnet") {
            Some("true") => Some(true),
            Some("false") => Some(false),
            Some(other) => {
                return Err(ArkError::format(
                    "contract",
                    format!("field 'mainnet' is not a boolean: {}", other),
                ))
            }
            None => None,
        };
        Self::from_encoded(fields.required("address")?, fallback)
    }
}
