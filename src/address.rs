//! # Ark Address Encoding
//!
//! An Ark address names a VTXO output: the operator's x-only signing key and
//! the tweaked Taproot output key of the contract. It is encoded as Bech32m
//! with the `ark` prefix on mainnet and `tark` everywhere else.
//!
//! ```text
//! payload = version (1) || server x-only key (32) || output key (32)
//! ```
//!
//! Addresses are longer than the 90-character segwit limit, so only the
//! generic Bech32m length bound applies.

use bech32::{primitives::decode::CheckedHrpstring, Bech32m, Hrp};
use bitcoin::{key::TweakedPublicKey, Network, ScriptBuf, XOnlyPublicKey};
use serde::{Deserialize, Serialize};

use crate::{
    config::address::{ADDRESS_PAYLOAD_LEN, ADDRESS_VERSION, HRP_MAINNET, HRP_TESTNET},
    error::{ArkError, ArkResult},
};

/// A decoded Ark address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArkAddress {
    pub version: u8,
    pub server: XOnlyPublicKey,
    pub output_key: TweakedPublicKey,
}

/// Address prefix for `network`
pub fn hrp_for(network: Network) -> &'static str {
    if network == Network::Bitcoin {
        HRP_MAINNET
    } else {
        HRP_TESTNET
    }
}

impl ArkAddress {
    pub fn new(server: XOnlyPublicKey, output_key: TweakedPublicKey) -> Self {
        Self {
            version: ADDRESS_VERSION,
            server,
            output_key,
        }
    }

    /// Raw 65-byte payload
    pub fn payload(&self) -> [u8; ADDRESS_PAYLOAD_LEN] {
        let mut buf = [0u8; ADDRESS_PAYLOAD_LEN];
        buf[0] = self.version;
        buf[1..33].copy_from_slice(&self.server.serialize());
        buf[33..].copy_from_slice(&self.output_key.serialize());
        buf
    }

    /// Bech32m encoding for `network`
    pub fn encode(&self, network: Network) -> ArkResult<String> {
        let hrp = Hrp::parse(hrp_for(network)).map_err(|e| ArkError::format("address", e.to_string()))?;
        bech32::encode_lower::<Bech32m>(hrp, &self.payload())
            .map_err(|e| ArkError::format("address", e.to_string()))
    }

    /// Parse an address, discarding its network
    pub fn parse(s: &str) -> ArkResult<Self> {
        Self::parse_with_network(s).map(|(address, _)| address)
    }

    /// Parse an address and report whether it carries the mainnet prefix
    pub fn parse_with_network(s: &str) -> ArkResult<(Self, bool)> {
        if s.chars().any(|c| c.is_ascii_lowercase()) && s.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(ArkError::format("address", "mixed-case encoding"));
        }
        let normalized = s.to_ascii_lowercase();
        let checked = CheckedHrpstring::new::<Bech32m>(&normalized)
            .map_err(|e| ArkError::format("address", e.to_string()))?;

        let mainnet = match checked.hrp().as_str() {
            HRP_MAINNET => true,
            HRP_TESTNET => false,
            other => {
                return Err(ArkError::format(
                    "address",
                    format!("unknown prefix '{}'", other),
                ))
            }
        };

        let data: Vec<u8> = checked.byte_iter().collect();
        if data.len() != ADDRESS_PAYLOAD_LEN {
            return Err(ArkError::format(
                "address",
                format!("expected {} payload bytes, got {}", ADDRESS_PAYLOAD_LEN, data.len()),
            ));
        }

        let server = XOnlyPublicKey::from_slice(&data[1..33])
            .map_err(|e| ArkError::format("address", format!("server key: {}", e)))?;
        let output_key = XOnlyPublicKey::from_slice(&data[33..])
            .map_err(|e| ArkError::format("address", format!("output key: {}", e)))?;

        Ok((
            Self {
                version: data[0],
                server,
                output_key: TweakedPublicKey::dangerous_assume_tweaked(output_key),
            },
            mainnet,
        ))
    }

    /// Pay-to-Taproot script for the output key
    pub fn to_p2tr_script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_p2tr_tweaked(self.output_key)
    }

    /// Unspendable `OP_RETURN <output key>` used for sub-dust outputs
    pub fn to_sub_dust_script(&self) -> ScriptBuf {
        ScriptBuf::new_op_return(self.output_key.serialize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{Keypair, Secp256k1, SecretKey};

    fn key(byte: u8) -> XOnlyPublicKey {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[byte; 32]).unwrap();
        Keypair::from_secret_key(&secp, &secret).x_only_public_key().0
    }

    fn address() -> ArkAddress {
        ArkAddress::new(key(1), TweakedPublicKey::dangerous_assume_tweaked(key(2)))
    }

    #[test]
    fn test_round_trip_both_networks() {
        let address = address();

        let mainnet = address.encode(Network::Bitcoin).unwrap();
        assert!(mainnet.starts_with("ark1"));
        assert_eq!(ArkAddress::parse_with_network(&mainnet).unwrap(), (address, true));

        let testnet = address.encode(Network::Signet).unwrap();
        assert!(testnet.starts_with("tark1"));
        assert_eq!(ArkAddress::parse_with_network(&testnet).unwrap(), (address, false));
    }

    #[test]
    fn test_uppercase_accepted() {
        let encoded = address().encode(Network::Regtest).unwrap().to_uppercase();
        assert_eq!(ArkAddress::parse(&encoded).unwrap(), address());
    }

    #[test]
    fn test_mixed_case_rejected() {
        let encoded = address().encode(Network::Regtest).unwrap();
        let mixed = format!("{}{}", &encoded[..10].to_uppercase(), &encoded[10..]);
        let err = ArkAddress::parse(&mixed).unwrap_err();
        assert!(matches!(err, ArkError::InvalidFormat { what: "address", .. }));
    }

    #[test]
    fn test_wrong_prefix_rejected() {
        let hrp = Hrp::parse("bc").unwrap();
        let encoded = bech32::encode_lower::<Bech32m>(hrp, &address().payload()).unwrap();
        assert!(ArkAddress::parse(&encoded).is_err());
    }

    #[test]
    fn test_wrong_length_rejected() {
        let hrp = Hrp::parse(HRP_TESTNET).unwrap();
        let encoded = bech32::encode_lower::<Bech32m>(hrp, &address().payload()[..64]).unwrap();
        let err = ArkAddress::parse(&encoded).unwrap_err();
        assert!(matches!(err, ArkError::InvalidFormat { what: "address", .. }));
    }

    #[test]
    fn test_bech32_checksum_rejected() {
        let hrp = Hrp::parse(HRP_TESTNET).unwrap();
        let encoded = bech32::encode_lower::<bech32::Bech32>(hrp, &address().payload()).unwrap();
        assert!(ArkAddress::parse(&encoded).is_err());
    }

    #[test]
    fn test_output_scripts() {
        let address = address();
        assert!(address.to_p2tr_script_pubkey().is_p2tr());
        let sub_dust = address.to_sub_dust_script();
        assert!(sub_dust.is_op_return());
        assert_eq!(&sub_dust.as_bytes()[2..], &address.output_key.serialize());
    }
}
