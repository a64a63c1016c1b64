//! # Operator Parameters
//!
//! What the operator advertises about itself. Everything that feeds
//! contract or transaction construction is cross-checked before use; a
//! mismatch means a misconfigured or malicious operator and is never
//! suppressed.

use bitcoin::{secp256k1::PublicKey, Amount, Network, ScriptBuf, XOnlyPublicKey};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ArkError, ArkResult},
    scripts::{parse::parse_unilateral, RelativeTimelock, ScriptBuilder},
};

/// Fee formulas for intents, evaluated by the operator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentFees {
    pub offchain_input: String,
    pub offchain_output: String,
    pub onchain_input: String,
    pub onchain_output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Operator key for collaborative paths
    pub signer_key: XOnlyPublicKey,
    pub forfeit_key: PublicKey,
    /// Destination of forfeit transactions
    pub forfeit_script: ScriptBuf,
    pub network: Network,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub dust: Amount,
    pub unilateral_exit_delay: RelativeTimelock,
    pub boarding_exit_delay: RelativeTimelock,
    /// Operator's unilateral exit leaf used in checkpoint outputs
    pub checkpoint_tapscript: ScriptBuf,
    #[serde(default)]
    pub fees: IntentFees,
}

impl ServerInfo {
    /// Cross-check the advertised parameters
    pub fn validate(&self) -> ArkResult<()> {
        self.checkpoint_exit_leaf().map(|_| ())
    }

    /// The operator's exit leaf, checked against the advertised exit delay
    pub fn checkpoint_exit_leaf(&self) -> ArkResult<ScriptBuilder> {
        let path = parse_unilateral(&self.checkpoint_tapscript).map_err(|e| {
            ArkError::protocol(format!("checkpoint tapscript is not an exit path: {}", e))
        })?;
        if path.timeout() != self.unilateral_exit_delay {
            return Err(ArkError::protocol(format!(
                "checkpoint exit delay {} disagrees with advertised unilateral exit delay {}",
                path.timeout(), self.unilateral_exit_delay
            )));
        }
        Ok(ScriptBuilder::Unilateral(path))
    }
}
