//! Signed relay payloads.
//!
//! The relay authenticates the bridge by an ECDSA signature over the
//! canonical JSON rendering of the payload concatenated with the
//! request timestamp:
//!
//! ```text
//! digest    = keccak256(canonical_json(payload) ‖ ascii(timestamp))
//! signature = "0x" + hex(secp256k1_sign(digest))    // 65 bytes, r‖s‖v
//! ```
//!
//! Canonical JSON sorts object keys ascending at every level, so the
//! byte layout is stable across processes and runs.

use alloy_primitives::{hex, keccak256, Address, B256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use chrono::Utc;
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use serde::Serialize;
use serde_json::Value;

#[derive(thiserror::Error, Debug)]
pub enum SignError {
    #[error("payload serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("signing failed: {0}")]
    Signer(String),

    #[error("malformed signature")]
    InvalidSignature,

    #[error("signer recovery failed: {0}")]
    Recovery(String),
}

/// Render `payload` as JSON with object keys sorted ascending at
/// every nesting level.
pub fn canonical_json<T: Serialize>(payload: &T) -> Result<String, SignError> {
    let value = serde_json::to_value(payload)?;
    let mut out = String::new();
    write_canonical(&value, &mut out);
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        leaf => out.push_str(&leaf.to_string()),
    }
}

/// The digest the relay signature commits to.
pub fn payload_digest<T: Serialize>(payload: &T, timestamp: i64) -> Result<B256, SignError> {
    let mut bytes = canonical_json(payload)?.into_bytes();
    bytes.extend_from_slice(timestamp.to_string().as_bytes());
    Ok(keccak256(&bytes))
}

/// Sign `payload` for the given unix timestamp, returning the
/// `0x`-hex 65-byte recoverable signature.
pub fn sign_payload<T: Serialize>(
    payload: &T,
    signer: &PrivateKeySigner,
    timestamp: i64,
) -> Result<String, SignError> {
    let digest = payload_digest(payload, timestamp)?;
    let signature = signer
        .sign_hash_sync(&digest)
        .map_err(|e| SignError::Signer(e.to_string()))?;
    Ok(hex::encode_prefixed(signature.as_bytes()))
}

/// Sign `payload` against the current time. Returns the timestamp the
/// signature covers alongside the signature itself.
pub fn sign_payload_now<T: Serialize>(
    payload: &T,
    signer: &PrivateKeySigner,
) -> Result<(i64, String), SignError> {
    let timestamp = Utc::now().timestamp();
    let signature = sign_payload(payload, signer, timestamp)?;
    Ok((timestamp, signature))
}

/// Recover the address that signed `payload` at `timestamp`.
pub fn recover_signer<T: Serialize>(
    payload: &T,
    timestamp: i64,
    signature: &str,
) -> Result<Address, SignError> {
    let bytes = hex::decode(signature).map_err(|_| SignError::InvalidSignature)?;
    if bytes.len() != 65 {
        return Err(SignError::InvalidSignature);
    }
    let digest = payload_digest(payload, timestamp)?;

    let signature = EcdsaSignature::from_slice(&bytes[..64])
        .map_err(|e| SignError::Recovery(e.to_string()))?;
    let v = bytes[64];
    let recovery_id = RecoveryId::try_from(if v >= 27 { v - 27 } else { v })
        .map_err(|e| SignError::Recovery(e.to_string()))?;
    let verifying_key =
        VerifyingKey::recover_from_prehash(digest.as_slice(), &signature, recovery_id)
            .map_err(|e| SignError::Recovery(e.to_string()))?;

    let point = verifying_key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Ok(Address::from_slice(&hash[12..]))
}
