//! # Ark Engine: Client-Side Ark Protocol Library
//!
//! Builds and parses everything a wallet needs to hold and move VTXOs
//! (virtual UTXOs) through an Ark operator: tapscript leaves, Taproot trees
//! with a fixed leaf-pairing order, contract strings, Ark addresses, the
//! protocol's PSBT fields, coin selection, the batch settlement tree, and
//! signed checkpoint, Ark and forfeit transactions.
//!
//! Transport, storage, key custody and scheduling stay outside; the engine
//! talks to them through the traits in [`services`].
//!
//! ## Module Structure
//!
//! - [`scripts`]: leaf builders, BIP68 timelocks and reverse parsing
//! - [`taptree`]: Taproot tree assembly and control blocks
//! - [`contracts`]: payment, VHTLC, note, generic and unknown contracts
//! - [`address`]: Bech32m Ark addresses
//! - [`psbt_fields`]: Ark-specific PSBT input fields
//! - [`coin`] / [`coin_select`]: spendable coins and selection
//! - [`tx_tree`]: settlement tree reconstruction and validation
//! - [`transactions`]: checkpoint, Ark and forfeit transactions; [`ArkSender`]
//! - [`services`]: collaborator traits and in-memory spend locks
//! - [`config`] / [`error`]: constants, runtime configuration and errors

pub mod address;
pub mod coin;
pub mod coin_select;
pub mod config;
pub mod contracts;
pub mod error;
pub mod psbt_fields;
pub mod scripts;
pub mod server_info;
pub mod services;
pub mod taptree;
pub mod transactions;
pub mod tx_tree;

// Re-export commonly used types
pub use address::ArkAddress;
pub use coin::{ArkCoin, ChainTime, CoinExpiry};
pub use coin_select::select_coins;
pub use config::EngineConfig;
pub use contracts::{ArkContract, ArkNote, ContractRegistry, ContractType};
pub use error::{ArkError, ArkResult};
pub use scripts::{RelativeTimelock, ScriptBuilder};
pub use server_info::ServerInfo;
pub use taptree::ArkSpendInfo;
pub use transactions::{ArkSender, Connector, OffchainTx, SendResult};
pub use tx_tree::{TxTree, TxTreeChunk};
