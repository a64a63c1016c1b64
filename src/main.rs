//! # ark-engine: Ark Protocol Inspection CLI
//!
//! Decodes and builds the protocol's string encodings offline.
//!
//! ```bash
//! # Decode an Ark address
//! ark-engine decode-address tark1q...
//!
//! # Rebuild a contract and show its leaves and address
//! ark-engine parse-contract "arkcontract=payment&server=...&user=...&exit_delay=144"
//!
//! # Inspect a bearer note
//! ark-engine decode-note arknote...
//!
//! # Derive the default receiving address for a user key
//! ark-engine payment-address --server <xonly> --user <xonly> --exit-delay 144
//! ```
//!
//! The network used for encoding comes from `ARK_NETWORK` (or `.env`).

use anyhow::{Context, Result};
use bitcoin::{Network, XOnlyPublicKey};
use clap::{Parser, Subcommand};
use serde_json::json;

use ark_engine::{
    address::ArkAddress,
    config::EngineConfig,
    contracts::{ArkContract, ArkNote, ContractRegistry, NoteContract, PaymentContract},
    scripts::RelativeTimelock,
};

#[derive(Parser)]
#[command(name = "ark-engine")]
#[command(about = "Inspect Ark addresses, contracts and notes")]
struct Cli {
    /// Network override (bitcoin, testnet, signet, regtest)
    #[arg(long, global = true)]
    network: Option<Network>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode an Ark address into its operator key and output key
    DecodeAddress {
        /// Bech32m address (ark1... / tark1...)
        address: String,
    },
    /// Rebuild a contract from its string form
    ParseContract {
        /// arkcontract=<type>&key=value...
        contract: String,
        /// Operator key for contracts that carry none (notes)
        #[arg(long)]
        server: Option<XOnlyPublicKey>,
    },
    /// Decode a bearer note
    DecodeNote {
        /// arknote...
        note: String,
        /// Operator key used to derive the note's address
        #[arg(long)]
        server: Option<XOnlyPublicKey>,
    },
    /// Derive the default payment address for a user key
    PaymentAddress {
        #[arg(long)]
        server: XOnlyPublicKey,
        #[arg(long)]
        user: XOnlyPublicKey,
        /// Unilateral exit delay in blocks
        #[arg(long, default_value_t = 144)]
        exit_delay: u16,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = EngineConfig::from_env();
    if let Some(network) = cli.network {
        config.network = network;
    }

    let output = match cli.command {
        Commands::DecodeAddress { address } => decode_address(&address)?,
        Commands::ParseContract { contract, server } => parse_contract(&contract, server, &config)?,
        Commands::DecodeNote { note, server } => decode_note(&note, server, &config)?,
        Commands::PaymentAddress {
            server,
            user,
            exit_delay,
        } => payment_address(server, user, exit_delay, &config)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn decode_address(address: &str) -> Result<serde_json::Value> {
    let (address, mainnet) =
        ArkAddress::parse_with_network(address).context("Failed to decode address")?;
    Ok(json!({
        "version": address.version,
        "server": address.server.to_string(),
        "output_key": address.output_key.to_string(),
        "mainnet": mainnet,
        "script_pubkey": address.to_p2tr_script_pubkey().to_hex_string(),
    }))
}

fn describe_contract(
    contract: &ArkContract,
    server: Option<XOnlyPublicKey>,
    config: &EngineConfig,
) -> Result<serde_json::Value> {
    let fields: serde_json::Map<String, serde_json::Value> = contract
        .fields()?
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect();

    let leaves: Vec<String> = match contract {
        ArkContract::Unknown(_) => Vec::new(),
        other => other
            .tapscripts()?
            .iter()
            .map(|script| script.to_hex_string())
            .collect(),
    };

    let address = match contract.ark_address(server) {
        Ok(address) => Some(address.encode(config.network)?),
        Err(e) => {
            log::warn!("No address for {} contract: {}", contract.contract_type(), e);
            None
        }
    };

    Ok(json!({
        "type": contract.contract_type().tag(),
        "fields": fields,
        "leaves": leaves,
        "address": address,
    }))
}

fn parse_contract(
    contract: &str,
    server: Option<XOnlyPublicKey>,
    config: &EngineConfig,
) -> Result<serde_json::Value> {
    let contract = ContractRegistry::with_builtin()
        .parse(contract)
        .context("Failed to parse contract")?;
    describe_contract(&contract, server, config)
}

fn decode_note(
    note: &str,
    server: Option<XOnlyPublicKey>,
    config: &EngineConfig,
) -> Result<serde_json::Value> {
    let note: ArkNote = note.parse().context("Failed to decode note")?;
    let contract = ArkContract::from(NoteContract::new(note));
    let mut description = describe_contract(&contract, server, config)?;
    description["value"] = json!(note.amount().to_sat());
    description["hash"] = json!(hex::encode(note.hash_lock().digest()));
    description["contract"] = json!(contract.encode()?);
    Ok(description)
}

fn payment_address(
    server: XOnlyPublicKey,
    user: XOnlyPublicKey,
    exit_delay: u16,
    config: &EngineConfig,
) -> Result<serde_json::Value> {
    let contract = ArkContract::from(PaymentContract::new(
        server,
        user,
        RelativeTimelock::Blocks(exit_delay),
    )?);
    let mut description = describe_contract(&contract, None, config)?;
    description["contract"] = json!(contract.encode()?);
    Ok(description)
}
