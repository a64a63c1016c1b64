//! Recovering structured leaves from raw tapscripts.

use bitcoin::{
    absolute,
    opcodes::all::*,
    script::{read_scriptint, Instruction},
    Script, Sequence, XOnlyPublicKey,
};

use super::{CollaborativePath, RelativeTimelock, ScriptBuilder, ScriptOp, UnilateralPath};
use crate::error::{ArkError, ArkResult};

/// Split a script into [`ScriptOp`]s that rebuild it byte for byte
pub fn script_ops(script: &Script) -> ArkResult<Vec<ScriptOp>> {
    script
        .instructions()
        .map(|instruction| match instruction {
            Ok(Instruction::Op(opcode)) => Ok(small_int(opcode.to_u8())
                .map(ScriptOp::Int)
                .unwrap_or(ScriptOp::Op(opcode))),
            Ok(Instruction::PushBytes(bytes)) => Ok(ScriptOp::Data(bytes.to_owned())),
            Err(e) => Err(ArkError::format("script", e.to_string())),
        })
        .collect()
}

/// Recognize the leaf shape of `script`, falling back to a generic leaf
pub fn parse_leaf(script: &Script) -> ArkResult<ScriptBuilder> {
    let ops = script_ops(script)?;
    if let Some(path) = unilateral_from_ops(&ops)? {
        return Ok(ScriptBuilder::Unilateral(path));
    }
    if let Some(path) = collaborative_from_ops(&ops) {
        return Ok(ScriptBuilder::Collaborative(path));
    }
    if let Some(owners) = multisig_from_ops(&ops) {
        return Ok(ScriptBuilder::NofNMultisig(owners));
    }
    Ok(ScriptBuilder::Generic(ops))
}

/// Parse a unilateral exit script, rejecting anything else
pub fn parse_unilateral(script: &Script) -> ArkResult<UnilateralPath> {
    unilateral_from_ops(&script_ops(script)?)?
        .ok_or_else(|| ArkError::format("script", "not a unilateral exit path"))
}

/// Parse a collaborative spend script, rejecting anything else
pub fn parse_collaborative(script: &Script) -> ArkResult<CollaborativePath> {
    let ops = script_ops(script)?;
    collaborative_from_ops(&ops)
        .ok_or_else(|| ArkError::format("script", "not a collaborative spend path"))
}

fn small_int(opcode: u8) -> Option<i64> {
    let first = OP_PUSHNUM_1.to_u8();
    let last = OP_PUSHNUM_16.to_u8();
    if opcode == OP_PUSHNUM_NEG1.to_u8() {
        Some(-1)
    } else if (first..=last).contains(&opcode) {
        Some(i64::from(opcode - first + 1))
    } else {
        None
    }
}

pub(crate) fn op_as_int(op: &ScriptOp) -> Option<i64> {
    match op {
        ScriptOp::Int(value) => Some(*value),
        ScriptOp::Data(bytes) => read_scriptint(bytes.as_bytes()).ok(),
        _ => None,
    }
}

pub(crate) fn op_as_key(op: &ScriptOp) -> Option<XOnlyPublicKey> {
    match op {
        ScriptOp::Key(key) => Some(*key),
        ScriptOp::Data(bytes) if bytes.len() == 32 => XOnlyPublicKey::from_slice(bytes.as_bytes()).ok(),
        _ => None,
    }
}

fn is_op(op: &ScriptOp, opcode: bitcoin::opcodes::Opcode) -> bool {
    matches!(op, ScriptOp::Op(o) if *o == opcode)
}

/// `<k1> CHECKSIGVERIFY ... <kn> CHECKSIGVERIFY`
fn multisig_from_ops(ops: &[ScriptOp]) -> Option<Vec<XOnlyPublicKey>> {
    if ops.is_empty() || ops.len() % 2 != 0 {
        return None;
    }
    ops.chunks(2)
        .map(|pair| {
            if is_op(&pair[1], OP_CHECKSIGVERIFY) {
                op_as_key(&pair[0])
            } else {
                None
            }
        })
        .collect()
}

/// `<k1> CHECKSIGVERIFY ... <kn> CHECKSIG`
fn owners_from_ops(ops: &[ScriptOp]) -> Option<Vec<XOnlyPublicKey>> {
    let (last, init) = ops.split_last()?;
    let key = ops.len().checked_sub(2).map(|i| &ops[i])?;
    if !is_op(last, OP_CHECKSIG) {
        return None;
    }
    let owner = op_as_key(key)?;
    let mut owners = if init.len() > 1 {
        multisig_from_ops(&init[..init.len() - 1])?
    } else {
        Vec::new()
    };
    owners.push(owner);
    Some(owners)
}

fn condition_from_ops(ops: &[ScriptOp]) -> Option<Box<ScriptBuilder>> {
    if ops.is_empty() {
        return None;
    }
    let leaf = multisig_from_ops(ops)
        .map(ScriptBuilder::NofNMultisig)
        .unwrap_or_else(|| ScriptBuilder::Generic(ops.to_vec()));
    Some(Box::new(leaf))
}

fn csv_position(ops: &[ScriptOp]) -> Option<usize> {
    ops.iter().position(|op| is_op(op, OP_CSV))
}

fn unilateral_from_ops(ops: &[ScriptOp]) -> ArkResult<Option<UnilateralPath>> {
    let Some(csv) = csv_position(ops) else {
        return Ok(None);
    };
    if csv == 0 || !ops.get(csv + 1).is_some_and(|op| is_op(op, OP_DROP)) {
        return Ok(None);
    }
    let Some(value) = op_as_int(&ops[csv - 1]) else {
        return Ok(None);
    };
    let Some(owners) = owners_from_ops(&ops[csv + 2..]) else {
        return Ok(None);
    };

    let prefix = &ops[..csv - 1];
    let condition = match prefix.split_last() {
        None => None,
        Some((last, condition)) if is_op(last, OP_VERIFY) && !condition.is_empty() => {
            condition_from_ops(condition)
        }
        Some(_) => return Ok(None),
    };

    let raw = u32::try_from(value)
        .map_err(|_| ArkError::format("script", format!("negative CSV value {}", value)))?;
    let timeout = RelativeTimelock::from_sequence(Sequence::from_consensus(raw))?;

    UnilateralPath::new(timeout, owners, condition.map(|leaf| *leaf)).map(Some)
}

fn collaborative_from_ops(ops: &[ScriptOp]) -> Option<CollaborativePath> {
    if csv_position(ops).is_some() || ops.len() < 2 {
        return None;
    }
    let (last, init) = ops.split_last()?;
    let (server, condition) = init.split_last()?;
    if !is_op(last, OP_CHECKSIG) {
        return None;
    }
    Some(CollaborativePath {
        server: op_as_key(server)?,
        condition: condition_from_ops(condition),
    })
}

/// Keys checked by `OP_CHECKSIG` / `OP_CHECKSIGVERIFY`, in script order
pub fn signing_keys(script: &Script) -> ArkResult<Vec<XOnlyPublicKey>> {
    let ops = script_ops(script)?;
    Ok(ops
        .windows(2)
        .filter(|pair| is_op(&pair[1], OP_CHECKSIG) || is_op(&pair[1], OP_CHECKSIGVERIFY))
        .filter_map(|pair| op_as_key(&pair[0]))
        .collect())
}

pub(crate) fn find_relative_timelock(ops: &[ScriptOp]) -> Option<RelativeTimelock> {
    let csv = csv_position(ops)?;
    let value = op_as_int(ops.get(csv.checked_sub(1)?)?)?;
    let raw = u32::try_from(value).ok()?;
    RelativeTimelock::from_sequence(Sequence::from_consensus(raw)).ok()
}

pub(crate) fn find_absolute_timelock(ops: &[ScriptOp]) -> Option<absolute::LockTime> {
    let cltv = ops.iter().position(|op| is_op(op, OP_CLTV))?;
    let value = op_as_int(ops.get(cltv.checked_sub(1)?)?)?;
    u32::try_from(value).ok().map(absolute::LockTime::from_consensus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts::HashLock;
    use bitcoin::secp256k1::{Keypair, Secp256k1, SecretKey};

    fn key(byte: u8) -> XOnlyPublicKey {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[byte; 32]).unwrap();
        Keypair::from_secret_key(&secp, &secret).x_only_public_key().0
    }

    #[test]
    fn test_parse_unilateral_round_trip() {
        let leaf = ScriptBuilder::unilateral(
            RelativeTimelock::Seconds(512 * 4),
            vec![key(1), key(2)],
            None,
        )
        .unwrap();
        let path = parse_unilateral(&leaf.build()).unwrap();
        assert_eq!(path.timeout(), RelativeTimelock::Seconds(2048));
        assert_eq!(path.owners(), &[key(1), key(2)]);
        assert!(path.condition().is_none());
        assert_eq!(ScriptBuilder::Unilateral(path).build(), leaf.build());
    }

    #[test]
    fn test_parse_unilateral_with_condition() {
        let leaf = ScriptBuilder::unilateral(
            RelativeTimelock::Blocks(17),
            vec![key(3)],
            Some(HashLock::sha256_of(b"x").into()),
        )
        .unwrap();
        let parsed = parse_leaf(&leaf.build()).unwrap();
        assert!(matches!(parsed, ScriptBuilder::Unilateral(ref p) if p.condition().is_some()));
        assert_eq!(parsed.build(), leaf.build());
    }

    #[test]
    fn test_parse_collaborative_with_multisig_condition() {
        let leaf = ScriptBuilder::collaborative(key(9), Some(ScriptBuilder::multisig(vec![key(4)])));
        let path = parse_collaborative(&leaf.build()).unwrap();
        assert_eq!(path.server, key(9));
        assert_eq!(
            path.condition.as_deref(),
            Some(&ScriptBuilder::NofNMultisig(vec![key(4)]))
        );
    }

    #[test]
    fn test_non_conforming_script_rejected() {
        let leaf = ScriptBuilder::multisig(vec![key(1)]);
        assert!(parse_unilateral(&leaf.build()).is_err());
        assert!(parse_collaborative(&leaf.build()).is_err());
        assert_eq!(parse_leaf(&leaf.build()).unwrap(), leaf);
    }

    #[test]
    fn test_generic_leaf_rebuilds_exactly() {
        let lock_time = absolute::LockTime::from_height(650_000).unwrap();
        let leaf = ScriptBuilder::Composite(vec![
            ScriptBuilder::LockTime(lock_time),
            ScriptBuilder::collaborative(key(2), None),
        ]);
        let script = leaf.build();
        let generic = ScriptBuilder::from_script(&script).unwrap();
        assert_eq!(generic.build(), script);
        assert_eq!(generic.absolute_timelock(), Some(lock_time));
    }
}
