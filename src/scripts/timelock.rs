//! BIP68 relative timelocks.
//!
//! A relative timelock is pushed into scripts (and written into input
//! sequences) as its BIP68 consensus encoding: the low 16 bits carry the
//! value, bit 22 selects 512-second units instead of blocks, and bit 31 (the
//! disable flag) must never be set for a lock that is actually enforced.

use std::fmt;

use bitcoin::Sequence;
use serde::{Deserialize, Serialize};

use crate::error::{ArkError, ArkResult};

/// BIP68 disable flag
const DISABLE_FLAG: u32 = 1 << 31;

/// BIP68 type flag (set = time-based)
const TYPE_FLAG: u32 = 1 << 22;

/// BIP68 value mask
const VALUE_MASK: u32 = 0x0000_ffff;

/// Granularity of time-based relative locks, in seconds
pub const SECONDS_GRANULARITY: u32 = 512;

/// A relative timelock enforced through `OP_CHECKSEQUENCEVERIFY`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelativeTimelock {
    /// Number of blocks since the output confirmed
    Blocks(u16),
    /// Seconds since the output confirmed; must be a positive multiple of 512
    Seconds(u32),
}

impl RelativeTimelock {
    /// Validate the lock and return it unchanged
    pub fn validated(self) -> ArkResult<Self> {
        self.to_sequence().map(|_| self)
    }

    /// Encode as a BIP68 sequence
    pub fn to_sequence(self) -> ArkResult<Sequence> {
        match self {
            RelativeTimelock::Blocks(blocks) => Ok(Sequence::from_height(blocks)),
            RelativeTimelock::Seconds(seconds) => {
                if seconds == 0 || seconds % SECONDS_GRANULARITY != 0 {
                    return Err(ArkError::argument(format!(
                        "relative timelock of {} seconds is not a positive multiple of {}",
                        seconds, SECONDS_GRANULARITY
                    )));
                }
                let intervals = u16::try_from(seconds / SECONDS_GRANULARITY).map_err(|_| {
                    ArkError::argument(format!("relative timelock of {} seconds is too large", seconds))
                })?;
                Ok(Sequence::from_512_second_intervals(intervals))
            }
        }
    }

    /// Decode a BIP68 sequence, rejecting disabled or non-canonical encodings
    pub fn from_sequence(sequence: Sequence) -> ArkResult<Self> {
        let raw = sequence.to_consensus_u32();
        if raw & DISABLE_FLAG != 0 {
            return Err(ArkError::format(
                "relative timelock",
                format!("sequence {:#010x} has the disable flag set", raw),
            ));
        }
        if raw & !(TYPE_FLAG | VALUE_MASK) != 0 {
            return Err(ArkError::format(
                "relative timelock",
                format!("sequence {:#010x} carries undefined bits", raw),
            ));
        }

        let value = raw & VALUE_MASK;
        if raw & TYPE_FLAG != 0 {
            Ok(RelativeTimelock::Seconds(value * SECONDS_GRANULARITY))
        } else {
            Ok(RelativeTimelock::Blocks(value as u16))
        }
    }

    /// The consensus value pushed before `OP_CHECKSEQUENCEVERIFY`
    pub fn script_value(self) -> ArkResult<i64> {
        Ok(i64::from(self.to_sequence()?.to_consensus_u32()))
    }
}

impl fmt::Display for RelativeTimelock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelativeTimelock::Blocks(blocks) => write!(f, "{} blocks", blocks),
            RelativeTimelock::Seconds(seconds) => write!(f, "{} seconds", seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_lock_round_trip() {
        let lock = RelativeTimelock::Blocks(144);
        let sequence = lock.to_sequence().unwrap();
        assert_eq!(sequence.to_consensus_u32(), 144);
        assert_eq!(RelativeTimelock::from_sequence(sequence).unwrap(), lock);
    }

    #[test]
    fn test_time_lock_round_trip() {
        let lock = RelativeTimelock::Seconds(512 * 10);
        let sequence = lock.to_sequence().unwrap();
        assert_eq!(sequence.to_consensus_u32(), TYPE_FLAG | 10);
        assert_eq!(RelativeTimelock::from_sequence(sequence).unwrap(), lock);
    }

    #[test]
    fn test_time_lock_must_be_multiple_of_512() {
        assert!(RelativeTimelock::Seconds(1000).to_sequence().is_err());
        assert!(RelativeTimelock::Seconds(0).to_sequence().is_err());
        assert!(RelativeTimelock::Seconds(512).validated().is_ok());
    }

    #[test]
    fn test_disabled_sequence_rejected() {
        let err = RelativeTimelock::from_sequence(Sequence::MAX).unwrap_err();
        assert!(matches!(err, ArkError::InvalidFormat { .. }));
    }
}
