//! # Configuration Constants
//!
//! Protocol constants shared with the operator, selection and locking knobs,
//! and the environment-driven [`EngineConfig`].

use bitcoin::Network;
use std::time::Duration;

/// Wire-level protocol constants
///
/// Every value here is parsed independently by the operator, so none of them
/// may change without a protocol upgrade.
pub mod protocol {
    /// PSBT field type reserved for Ark-specific per-input data.
    pub const ARK_PSBT_FIELD_TYPE: u8 = 222;

    /// PSBT tag carrying the full leaf set of the spent output.
    pub const TAPTREE_TAG: &[u8] = b"taptree";

    /// PSBT tag carrying the batch expiry of a settlement-tree input.
    pub const EXPIRY_TAG: &[u8] = b"expiry";

    /// PSBT tag prefix for MuSig2 cosigner keys (followed by a 1-byte index).
    pub const COSIGNER_TAG: &[u8] = b"cosigner";

    /// PSBT tag carrying extra witness elements for non-signature conditions.
    pub const CONDITION_TAG: &[u8] = b"condition";

    /// Depth byte written for each record of the flat `taptree` encoding.
    pub const TAPTREE_RECORD_DEPTH: u8 = 1;

    /// Zero-value anchor output script: `OP_1 <0x4e73>`.
    pub const ANCHOR_SCRIPT_PUBKEY: [u8; 4] = [0x51, 0x02, 0x4e, 0x73];

    /// X-only NUMS point used as the Taproot internal key.
    ///
    /// `H("TapTweak" || "secp256k1" || "0")`; nobody knows its discrete log,
    /// so every output is spendable only through a script leaf.
    pub const UNSPENDABLE_INTERNAL_KEY: [u8; 32] = [
        0x50, 0x92, 0x9b, 0x74, 0xc1, 0xa0, 0x49, 0x54, 0xb7, 0x8b, 0x4b, 0x60, 0x35, 0xe9, 0x7a,
        0x5e, 0x07, 0x8a, 0x5a, 0x0f, 0x28, 0xec, 0x96, 0xd5, 0x47, 0xbf, 0xee, 0x9a, 0xce, 0x80,
        0x3a, 0xc0,
    ];

    /// Transaction version for checkpoint, Ark and forfeit transactions (TRUC).
    pub const ARK_TX_VERSION: i32 = 3;

    /// Bearer note type tag, prepended to the Base58 payload.
    pub const NOTE_PREFIX: &str = "arknote";

    /// Size of a decoded bearer note: 32-byte preimage + 4-byte big-endian amount.
    pub const NOTE_PAYLOAD_LEN: usize = 36;
}

/// Ark address encoding
pub mod address {
    /// Human-readable prefix for mainnet addresses
    pub const HRP_MAINNET: &str = "ark";

    /// Human-readable prefix for every other network
    pub const HRP_TESTNET: &str = "tark";

    /// Only address version currently defined
    pub const ADDRESS_VERSION: u8 = 0;

    /// Decoded payload size: version + server x-only key + output key
    pub const ADDRESS_PAYLOAD_LEN: usize = 65;
}

/// Coin selection policy
pub mod selection {
    /// Maximum number of near-dust (OP_RETURN) outputs per Ark transaction.
    pub const MAX_SUBDUST_OUTPUTS: usize = 1;

    /// Number of leading candidates considered by the triplet search.
    ///
    /// A source-observed performance bound, not a protocol requirement;
    /// calibrate against real operator dust policies.
    pub const TRIPLET_SEARCH_LIMIT: usize = 10;
}

/// Advisory spend locks
pub mod locks {
    use std::time::Duration;

    /// Locks expire on their own after this duration even without release.
    pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);
}

/// Environment variable names
pub mod env {
    /// Network override (`bitcoin`, `testnet`, `signet`, `regtest`)
    pub const NETWORK: &str = "ARK_NETWORK";

    /// Advisory lock TTL override, in seconds
    pub const LOCK_TTL_SECS: &str = "ARK_LOCK_TTL_SECS";
}

/// Runtime configuration for the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Network used for address encoding
    pub network: Network,
    /// How long an advisory spend lock is held before auto-release
    pub lock_ttl: Duration,
    /// Cap on near-dust outputs per Ark transaction
    pub max_subdust_outputs: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network: Network::Signet,
            lock_ttl: locks::DEFAULT_LOCK_TTL,
            max_subdust_outputs: selection::MAX_SUBDUST_OUTPUTS,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment (and `.env`), falling back to defaults
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let mut config = Self::default();

        if let Ok(network) = std::env::var(env::NETWORK) {
            match network.parse::<Network>() {
                Ok(network) => config.network = network,
                Err(_) => log::warn!("Ignoring unknown {} value: {}", env::NETWORK, network),
            }
        }

        if let Ok(ttl) = std::env::var(env::LOCK_TTL_SECS) {
            match ttl.parse::<u64>() {
                Ok(secs) if secs > 0 => config.lock_ttl = Duration::from_secs(secs),
                _ => log::warn!("Ignoring invalid {} value: {}", env::LOCK_TTL_SECS, ttl),
            }
        }

        config
    }
}
