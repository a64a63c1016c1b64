//! # PSBT Field Codec
//!
//! Ark-specific per-input data travels in the PSBT's unknown field space under
//! the reserved type byte `222`, keyed by an ASCII tag:
//!
//! | Tag | Value |
//! |-----|-------|
//! | `taptree` | repeated `depth (1) || leaf version || varint len || script` |
//! | `expiry` | BIP68 sequence as a minimal script number |
//! | `cosigner<i>` | 33-byte compressed key, `i` is a 1-byte index |
//! | `condition` | consensus-encoded witness stack |
//!
//! Leaf scripts and script-path signatures use the standard `0x15` / `0x14`
//! fields. Reading is total: a missing field means "not set", and any key
//! beginning with the type byte and tag belongs to that field.

use bitcoin::{
    consensus::{deserialize, encode::serialize, Decodable},
    psbt::{raw, Input},
    script::{read_scriptint, write_scriptint},
    secp256k1::PublicKey,
    taproot::{self, ControlBlock, LeafVersion, TapLeafHash},
    ScriptBuf, Sequence, Witness, XOnlyPublicKey,
};

use crate::{
    config::protocol::{
        ARK_PSBT_FIELD_TYPE, CONDITION_TAG, COSIGNER_TAG, EXPIRY_TAG, TAPTREE_RECORD_DEPTH,
        TAPTREE_TAG,
    },
    error::{ArkError, ArkResult},
    scripts::RelativeTimelock,
};

fn ark_key(tag: &[u8]) -> raw::Key {
    raw::Key {
        type_value: ARK_PSBT_FIELD_TYPE,
        key: tag.to_vec(),
    }
}

fn is_field(key: &raw::Key, tag: &[u8]) -> bool {
    key.type_value == ARK_PSBT_FIELD_TYPE && key.key.starts_with(tag)
}

fn find_field<'a>(input: &'a Input, tag: &[u8]) -> Option<&'a [u8]> {
    input
        .unknown
        .iter()
        .find(|(key, _)| is_field(key, tag))
        .map(|(_, value)| value.as_slice())
}

fn replace_field(input: &mut Input, tag: &[u8], value: Vec<u8>) {
    input.unknown.retain(|key, _| !is_field(key, tag));
    input.unknown.insert(ark_key(tag), value);
}

/// Flat leaf-list encoding shared by the `taptree` field and generic contracts
pub fn encode_taptree(tapscripts: &[ScriptBuf]) -> Vec<u8> {
    let mut out = Vec::new();
    for script in tapscripts {
        out.push(TAPTREE_RECORD_DEPTH);
        out.push(LeafVersion::TapScript.to_consensus());
        out.extend(serialize(script));
    }
    out
}

pub fn decode_taptree(bytes: &[u8]) -> ArkResult<Vec<ScriptBuf>> {
    let mut reader = bytes;
    let mut tapscripts = Vec::new();
    while !reader.is_empty() {
        let err = |e: bitcoin::consensus::encode::Error| ArkError::format("taptree", e.to_string());
        let _depth = u8::consensus_decode(&mut reader).map_err(err)?;
        let version = u8::consensus_decode(&mut reader).map_err(err)?;
        if version != LeafVersion::TapScript.to_consensus() {
            return Err(ArkError::format(
                "taptree",
                format!("unsupported leaf version {:#04x}", version),
            ));
        }
        tapscripts.push(ScriptBuf::consensus_decode(&mut reader).map_err(err)?);
    }
    Ok(tapscripts)
}

pub fn set_taptree(input: &mut Input, tapscripts: &[ScriptBuf]) {
    replace_field(input, TAPTREE_TAG, encode_taptree(tapscripts));
}

pub fn get_taptree(input: &Input) -> ArkResult<Option<Vec<ScriptBuf>>> {
    find_field(input, TAPTREE_TAG).map(decode_taptree).transpose()
}

pub fn set_expiry(input: &mut Input, expiry: RelativeTimelock) -> ArkResult<()> {
    let mut buf = [0u8; 8];
    let len = write_scriptint(&mut buf, expiry.script_value()?);
    replace_field(input, EXPIRY_TAG, buf[..len].to_vec());
    Ok(())
}

pub fn get_expiry(input: &Input) -> ArkResult<Option<RelativeTimelock>> {
    let Some(bytes) = find_field(input, EXPIRY_TAG) else {
        return Ok(None);
    };
    let value = read_scriptint(bytes).map_err(|e| ArkError::format("expiry", e.to_string()))?;
    let raw = u32::try_from(value)
        .map_err(|_| ArkError::format("expiry", format!("out of range: {}", value)))?;
    RelativeTimelock::from_sequence(Sequence::from_consensus(raw)).map(Some)
}

pub fn add_cosigner(input: &mut Input, index: u8, key: &PublicKey) {
    let mut tag = COSIGNER_TAG.to_vec();
    tag.push(index);
    input.unknown.insert(ark_key(&tag), key.serialize().to_vec());
}

/// Cosigner keys ordered by index
pub fn get_cosigners(input: &Input) -> ArkResult<Vec<(u8, PublicKey)>> {
    input
        .unknown
        .iter()
        .filter(|(key, _)| is_field(key, COSIGNER_TAG))
        .map(|(key, value)| {
            let index = key
                .key
                .get(COSIGNER_TAG.len())
                .copied()
                .ok_or_else(|| ArkError::format("cosigner", "missing index byte"))?;
            let public_key = PublicKey::from_slice(value)
                .map_err(|e| ArkError::format("cosigner", e.to_string()))?;
            Ok((index, public_key))
        })
        .collect::<ArkResult<Vec<_>>>()
        .map(|mut keys| {
            keys.sort_by_key(|(index, _)| *index);
            keys
        })
}

pub fn set_condition(input: &mut Input, witness: &Witness) {
    replace_field(input, CONDITION_TAG, serialize(witness));
}

pub fn get_condition(input: &Input) -> ArkResult<Option<Witness>> {
    find_field(input, CONDITION_TAG)
        .map(|bytes| {
            deserialize::<Witness>(bytes).map_err(|e| ArkError::format("condition", e.to_string()))
        })
        .transpose()
}

/// Record `script` under its control block in the standard leaf-script field
pub fn set_tap_leaf_script(input: &mut Input, control_block: ControlBlock, script: ScriptBuf) {
    input
        .tap_scripts
        .insert(control_block, (script, LeafVersion::TapScript));
}

/// Record a script-path signature keyed by signer and leaf
pub fn set_tap_script_sig(
    input: &mut Input,
    signer: XOnlyPublicKey,
    leaf_hash: TapLeafHash,
    signature: taproot::Signature,
) {
    input.tap_script_sigs.insert((signer, leaf_hash), signature);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};

    fn op_true() -> ScriptBuf {
        ScriptBuf::from_bytes(vec![0x51])
    }

    #[test]
    fn test_taptree_byte_layout() {
        let encoded = encode_taptree(&[op_true(), op_true()]);
        assert_eq!(encoded, vec![0x01, 0xc0, 0x01, 0x51, 0x01, 0xc0, 0x01, 0x51]);
        assert_eq!(decode_taptree(&encoded).unwrap(), vec![op_true(), op_true()]);
    }

    #[test]
    fn test_taptree_field_key() {
        let mut input = Input::default();
        set_taptree(&mut input, &[op_true()]);
        let (key, _) = input.unknown.iter().next().unwrap();
        assert_eq!(key.type_value, 222);
        assert_eq!(key.key, b"taptree".to_vec());
        assert_eq!(get_taptree(&input).unwrap(), Some(vec![op_true()]));
    }

    #[test]
    fn test_truncated_taptree_rejected() {
        assert!(decode_taptree(&[0x01, 0xc0, 0x05, 0x51]).is_err());
    }

    #[test]
    fn test_absent_fields_are_not_errors() {
        let input = Input::default();
        assert!(get_taptree(&input).unwrap().is_none());
        assert!(get_expiry(&input).unwrap().is_none());
        assert!(get_condition(&input).unwrap().is_none());
        assert!(get_cosigners(&input).unwrap().is_empty());
    }

    #[test]
    fn test_expiry_round_trip() {
        let mut input = Input::default();
        set_expiry(&mut input, RelativeTimelock::Seconds(512 * 20)).unwrap();
        assert_eq!(get_expiry(&input).unwrap(), Some(RelativeTimelock::Seconds(10_240)));
    }

    #[test]
    fn test_cosigners_ordered_by_index() {
        let secp = Secp256k1::new();
        let first = SecretKey::from_slice(&[1u8; 32]).unwrap().public_key(&secp);
        let second = SecretKey::from_slice(&[2u8; 32]).unwrap().public_key(&secp);

        let mut input = Input::default();
        add_cosigner(&mut input, 1, &second);
        add_cosigner(&mut input, 0, &first);

        let (key, value) = input.unknown.iter().next().unwrap();
        assert_eq!(key.key, [b"cosigner".as_slice(), &[0]].concat());
        assert_eq!(value.len(), 33);
        assert_eq!(get_cosigners(&input).unwrap(), vec![(0, first), (1, second)]);
    }

    #[test]
    fn test_condition_round_trip() {
        let mut witness = Witness::new();
        witness.push([7u8; 32]);
        let mut input = Input::default();
        set_condition(&mut input, &witness);
        assert_eq!(get_condition(&input).unwrap(), Some(witness));
    }
}
