//! # Contract Model
//!
//! A contract is the spending policy of one Taproot output: an ordered list of
//! tapscript leaves plus the named fields needed to rebuild it. Address and
//! spend-info derivation are pure functions of the leaf list, so the leaf
//! order is part of the contract's identity.
//!
//! ## String form
//!
//! ```text
//! arkcontract=<type>&key1=value1&key2=value2...
//! ```
//!
//! Values are lowercase hex or decimal strings (Base58 / Bech32m for notes
//! and addresses). Keys and values are percent-escaped on output and
//! unescaped on input; anything outside the unreserved URL set is escaped.
//!
//! ## Variants
//!
//! | Type                | Leaves |
//! |---------------------|--------|
//! | `payment`           | collaborative + unilateral exit |
//! | `hashlockedpayment` | hash-gated collaborative claim + unilateral exit |
//! | `vhtlc`             | six claim/refund paths |
//! | `arknote`           | single hash-lock leaf, no operator key |
//! | `generic`           | explicit leaf list (checkpoints) |
//! | `unknown`           | address only |

pub mod generic;
pub mod note;
pub mod payment;
pub mod vhtlc;


use std::{collections::BTreeSet, fmt, str::FromStr};

use bitcoin::{ScriptBuf, Sequence, XOnlyPublicKey};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::{
    address::ArkAddress,
    error::{ArkError, ArkResult},
    scripts::{parse::parse_leaf, RelativeTimelock, ScriptBuilder},
    taptree::ArkSpendInfo,
};

pub use generic::{GenericContract, UnknownContract};
pub use note::{ArkNote, NoteContract};
pub use payment::{HashLockedPaymentContract, PaymentContract};
pub use vhtlc::{VhtlcContract, VhtlcLeaf};

/// Key carrying the contract type in the string form
pub const CONTRACT_TYPE_KEY: &str = "arkcontract";

/// Contract kinds with a string tag each
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContractType {
    Payment,
    HashLockedPayment,
    Vhtlc,
    Note,
    Generic,
    Unknown,
}

impl ContractType {
    pub const ALL: [ContractType; 6] = [
        ContractType::Payment,
        ContractType::HashLockedPayment,
        ContractType::Vhtlc,
        ContractType::Note,
        ContractType::Generic,
        ContractType::Unknown,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            ContractType::Payment => "payment",
            ContractType::HashLockedPayment => "hashlockedpayment",
            ContractType::Vhtlc => "vhtlc",
            ContractType::Note => "arknote",
            ContractType::Generic => "generic",
            ContractType::Unknown => "unknown",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    fn decode(self, fields: &ContractFields) -> ArkResult<ArkContract> {
        Ok(match self {
            ContractType::Payment => ArkContract::Payment(PaymentContract::from_fields(fields)?),
            ContractType::HashLockedPayment => {
                ArkContract::HashLockedPayment(HashLockedPaymentContract::from_fields(fields)?)
            }
            ContractType::Vhtlc => ArkContract::Vhtlc(VhtlcContract::from_fields(fields)?),
            ContractType::Note => ArkContract::Note(NoteContract::from_fields(fields)?),
            ContractType::Generic => ArkContract::Generic(GenericContract::from_fields(fields)?),
            ContractType::Unknown => ArkContract::Unknown(UnknownContract::from_fields(fields)?),
        })
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// RFC 3986 unreserved characters pass through; everything else is escaped
const FIELD_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn unescape(raw: &str) -> ArkResult<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| ArkError::format("contract", format!("'{}' is not UTF-8: {}", raw, e)))
}

/// Ordered key/value fields of a contract, excluding the type tag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractFields(Vec<(String, String)>);

impl ContractFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &str, value: impl Into<String>) {
        self.0.push((key.to_string(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn required(&self, key: &str) -> ArkResult<&str> {
        self.get(key)
            .ok_or_else(|| ArkError::format("contract", format!("missing field '{}'", key)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push_key(&mut self, key: &str, value: &XOnlyPublicKey) {
        self.push(key, value.to_string());
    }

    pub fn push_timelock(&mut self, key: &str, value: RelativeTimelock) -> ArkResult<()> {
        let sequence = value.to_sequence()?;
        self.push(key, sequence.to_consensus_u32().to_string());
        Ok(())
    }

    pub fn key(&self, key: &str) -> ArkResult<XOnlyPublicKey> {
        let raw = self.required(key)?;
        XOnlyPublicKey::from_str(raw)
            .map_err(|e| ArkError::format("contract", format!("field '{}': {}", key, e)))
    }

    pub fn optional_key(&self, key: &str) -> ArkResult<Option<XOnlyPublicKey>> {
        match self.get(key) {
            Some(_) => self.key(key).map(Some),
            None => Ok(None),
        }
    }

    pub fn decimal<T: FromStr>(&self, key: &str) -> ArkResult<T> {
        self.required(key)?
            .parse()
            .map_err(|_| ArkError::format("contract", format!("field '{}' is not a decimal", key)))
    }

    pub fn timelock(&self, key: &str) -> ArkResult<RelativeTimelock> {
        RelativeTimelock::from_sequence(Sequence::from_consensus(self.decimal(key)?))
    }

    pub fn hex_bytes(&self, key: &str) -> ArkResult<Vec<u8>> {
        hex::decode(self.required(key)?)
            .map_err(|e| ArkError::format("contract", format!("field '{}': {}", key, e)))
    }

    /// Serialize with `kind` as the leading type pair
    pub fn encode(&self, kind: ContractType) -> String {
        let mut out = format!("{}={}", CONTRACT_TYPE_KEY, kind.tag());
        for (key, value) in self.iter() {
            out.push('&');
            out.extend(utf8_percent_encode(key, FIELD_ESCAPE));
            out.push('=');
            out.extend(utf8_percent_encode(value, FIELD_ESCAPE));
        }
        out
    }

    /// Split a contract string into its type tag and remaining fields
    pub fn decode(s: &str) -> ArkResult<(String, Self)> {
        let mut pairs = s.split('&').map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| ArkError::format("contract", format!("malformed pair '{}'", pair)))?;
            Ok::<_, ArkError>((unescape(key)?, unescape(value)?))
        });

        let tag = match pairs.next().transpose()? {
            Some((key, tag)) if key == CONTRACT_TYPE_KEY => tag,
            _ => {
                return Err(ArkError::format(
                    "contract",
                    format!("must start with '{}='", CONTRACT_TYPE_KEY),
                ))
            }
        };

        let mut fields = Self::new();
        for pair in pairs {
            let (key, value) = pair?;
            if key != CONTRACT_TYPE_KEY {
                fields.push(&key, value);
            }
        }
        Ok((tag, fields))
    }
}

/// A spending policy for one Taproot output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArkContract {
    Payment(PaymentContract),
    HashLockedPayment(HashLockedPaymentContract),
    Vhtlc(VhtlcContract),
    Note(NoteContract),
    Generic(GenericContract),
    Unknown(UnknownContract),
}

impl ArkContract {
    pub fn contract_type(&self) -> ContractType {
        match self {
            ArkContract::Payment(_) => ContractType::Payment,
            ArkContract::HashLockedPayment(_) => ContractType::HashLockedPayment,
            ArkContract::Vhtlc(_) => ContractType::Vhtlc,
            ArkContract::Note(_) => ContractType::Note,
            ArkContract::Generic(_) => ContractType::Generic,
            ArkContract::Unknown(_) => ContractType::Unknown,
        }
    }

    /// Operator key carried by the contract itself
    pub fn server(&self) -> Option<XOnlyPublicKey> {
        match self {
            ArkContract::Payment(c) => Some(c.server()),
            ArkContract::HashLockedPayment(c) => Some(c.server()),
            ArkContract::Vhtlc(c) => Some(c.server()),
            ArkContract::Note(_) => None,
            ArkContract::Generic(c) => c.server,
            ArkContract::Unknown(c) => Some(c.address.server),
        }
    }

    /// Ordered structured leaves
    pub fn leaves(&self) -> ArkResult<Vec<ScriptBuilder>> {
        match self {
            ArkContract::Payment(c) => Ok(c.leaves()),
            ArkContract::HashLockedPayment(c) => Ok(c.leaves()),
            ArkContract::Vhtlc(c) => Ok(c.leaves()),
            ArkContract::Note(c) => Ok(c.leaves()),
            ArkContract::Generic(c) => c.tapscripts.iter().map(|s| parse_leaf(s)).collect(),
            ArkContract::Unknown(_) => Err(ArkError::argument(
                "unknown contract carries no script content",
            )),
        }
    }

    /// Ordered leaves as built tapscripts
    pub fn tapscripts(&self) -> ArkResult<Vec<ScriptBuf>> {
        match self {
            ArkContract::Generic(c) => Ok(c.tapscripts.clone()),
            other => Ok(other.leaves()?.iter().map(ScriptBuilder::build).collect()),
        }
    }

    /// Assembled Taproot tree and control blocks
    pub fn spend_info(&self) -> ArkResult<ArkSpendInfo> {
        ArkSpendInfo::new(self.tapscripts()?)
    }

    /// Address for this contract, using `default_server` when it carries no operator key
    pub fn ark_address(&self, default_server: Option<XOnlyPublicKey>) -> ArkResult<ArkAddress> {
        if let ArkContract::Unknown(c) = self {
            return Ok(c.address);
        }
        let server = self
            .server()
            .or(default_server)
            .ok_or_else(|| ArkError::argument("no operator key available for address"))?;
        Ok(ArkAddress::new(server, self.spend_info()?.output_key()))
    }

    /// Pay-to-Taproot script of the contract output
    pub fn script_pubkey(&self) -> ArkResult<ScriptBuf> {
        match self {
            ArkContract::Unknown(c) => Ok(c.address.to_p2tr_script_pubkey()),
            other => Ok(ScriptBuf::new_p2tr_tweaked(other.spend_info()?.output_key())),
        }
    }

    /// Declared fields, without the type tag
    pub fn fields(&self) -> ArkResult<ContractFields> {
        match self {
            ArkContract::Payment(c) => c.fields(),
            ArkContract::HashLockedPayment(c) => c.fields(),
            ArkContract::Vhtlc(c) => c.fields(),
            ArkContract::Note(c) => Ok(c.fields()),
            ArkContract::Generic(c) => Ok(c.fields()),
            ArkContract::Unknown(c) => c.fields(),
        }
    }

    /// `arkcontract=<type>&...` string form
    pub fn encode(&self) -> ArkResult<String> {
        Ok(self.fields()?.encode(self.contract_type()))
    }
}

impl From<PaymentContract> for ArkContract {
    fn from(c: PaymentContract) -> Self {
        ArkContract::Payment(c)
    }
}

impl From<HashLockedPaymentContract> for ArkContract {
    fn from(c: HashLockedPaymentContract) -> Self {
        ArkContract::HashLockedPayment(c)
    }
}

impl From<VhtlcContract> for ArkContract {
    fn from(c: VhtlcContract) -> Self {
        ArkContract::Vhtlc(c)
    }
}

impl From<NoteContract> for ArkContract {
    fn from(c: NoteContract) -> Self {
        ArkContract::Note(c)
    }
}

impl From<GenericContract> for ArkContract {
    fn from(c: GenericContract) -> Self {
        ArkContract::Generic(c)
    }
}

impl From<UnknownContract> for ArkContract {
    fn from(c: UnknownContract) -> Self {
        ArkContract::Unknown(c)
    }
}

/// Contract types accepted by a parser, built once and passed where needed
#[derive(Debug, Clone, Default)]
pub struct ContractRegistry {
    types: BTreeSet<ContractType>,
}

impl ContractRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry accepting every built-in contract type
    pub fn with_builtin() -> Self {
        Self {
            types: ContractType::ALL.into_iter().collect(),
        }
    }

    pub fn register(mut self, kind: ContractType) -> Self {
        self.types.insert(kind);
        self
    }

    pub fn supports(&self, tag: &str) -> bool {
        ContractType::from_tag(tag).is_some_and(|kind| self.types.contains(&kind))
    }

    /// Fully decode a contract string
    pub fn parse(&self, s: &str) -> ArkResult<ArkContract> {
        let (tag, fields) = ContractFields::decode(s)?;
        let kind = ContractType::from_tag(&tag)
            .filter(|kind| self.types.contains(kind))
            .ok_or_else(|| ArkError::format("contract", format!("unsupported type '{}'", tag)))?;
        kind.decode(&fields)
    }

    /// Decode a contract string, keeping only its address when the scripts cannot be rebuilt
    pub fn parse_or_unknown(
        &self,
        s: &str,
        address: ArkAddress,
        mainnet: bool,
    ) -> ArkContract {
        match self.parse(s) {
            Ok(contract) => contract,
            Err(e) => {
                log::warn!("Falling back to address-only contract: {}", e);
                ArkContract::Unknown(UnknownContract::new(address, mainnet))
            }
        }
    }
}
