//! ECVRF over secp256k1 with SHA-256 and try-and-increment
//! hash-to-curve.
//!
//! `prove` maps `(secret_key, alpha)` to a 32-byte pseudorandom
//! output and an 81-byte proof `gamma ‖ c ‖ s` that anyone holding
//! the public key can check with `verify`. The driver feeds the
//! chain-supplied sampling seed through `prove` and replicates a task
//! when the output is divisible by ten.

use k256::{
    elliptic_curve::{
        bigint::ArrayEncoding,
        sec1::{FromEncodedPoint, ToEncodedPoint},
        Curve, Field, PrimeField,
    },
    AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar, Secp256k1,
};
use sha2::{Digest, Sha256};

/// Cipher suite identifier, domain-separating every hash.
const SUITE: u8 = 0xfe;

/// Proof layout: 33-byte compressed gamma, 16-byte challenge,
/// 32-byte scalar.
pub const PROOF_LEN: usize = 33 + CHALLENGE_LEN + 32;
const CHALLENGE_LEN: usize = 16;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum VrfError {
    #[error("secret key is not a valid scalar")]
    InvalidSecretKey,

    #[error("public key is not a valid curve point")]
    InvalidPublicKey,

    #[error("proof is malformed or does not verify")]
    InvalidProof,

    #[error("no curve point found for input")]
    HashToCurve,
}

/// Produce the VRF output and proof for `alpha` under `secret_key`.
pub fn prove(secret_key: &[u8; 32], alpha: &[u8]) -> Result<([u8; 32], Vec<u8>), VrfError> {
    let x = decode_scalar(secret_key)
        .filter(|s| !bool::from(s.is_zero()))
        .ok_or(VrfError::InvalidSecretKey)?;
    let public = ProjectivePoint::GENERATOR * x;

    let h = hash_to_curve(&compress(&public), alpha)?;
    let h_bytes = compress(&h);
    let gamma = h * x;

    let k = nonce(secret_key, &h_bytes).ok_or(VrfError::InvalidSecretKey)?;
    let u = ProjectivePoint::GENERATOR * k;
    let v = h * k;

    let c_bytes = challenge([&h, &gamma, &u, &v]);
    let c = challenge_scalar(&c_bytes);
    let s = k + c * x;

    let mut proof = Vec::with_capacity(PROOF_LEN);
    proof.extend_from_slice(&compress(&gamma));
    proof.extend_from_slice(&c_bytes);
    proof.extend_from_slice(s.to_bytes().as_slice());

    Ok((output_from_gamma(&gamma), proof))
}

/// Check `proof` against `public_key` (SEC1-encoded) and `alpha`,
/// returning the VRF output it commits to.
pub fn verify(public_key: &[u8], alpha: &[u8], proof: &[u8]) -> Result<[u8; 32], VrfError> {
    if proof.len() != PROOF_LEN {
        return Err(VrfError::InvalidProof);
    }
    let y = decompress(public_key).ok_or(VrfError::InvalidPublicKey)?;
    let gamma = decompress(&proof[..33]).ok_or(VrfError::InvalidProof)?;

    let mut c_bytes = [0u8; CHALLENGE_LEN];
    c_bytes.copy_from_slice(&proof[33..33 + CHALLENGE_LEN]);
    let c = challenge_scalar(&c_bytes);

    let mut s_repr = [0u8; 32];
    s_repr.copy_from_slice(&proof[33 + CHALLENGE_LEN..]);
    let s = decode_scalar(&s_repr).ok_or(VrfError::InvalidProof)?;

    let h = hash_to_curve(&compress(&y), alpha)?;
    let u = ProjectivePoint::GENERATOR * s - y * c;
    let v = h * s - gamma * c;

    if challenge([&h, &gamma, &u, &v]) != c_bytes {
        return Err(VrfError::InvalidProof);
    }
    Ok(output_from_gamma(&gamma))
}

/// Compressed public key matching `secret_key`.
pub fn public_key(secret_key: &[u8; 32]) -> Result<[u8; 33], VrfError> {
    let x = decode_scalar(secret_key)
        .filter(|s| !bool::from(s.is_zero()))
        .ok_or(VrfError::InvalidSecretKey)?;
    Ok(compress(&(ProjectivePoint::GENERATOR * x)))
}

/// Interpret `output` as a big-endian unsigned integer and reduce it
/// modulo `modulus`.
pub fn output_mod(output: &[u8], modulus: u64) -> u64 {
    let m = modulus as u128;
    let mut acc: u128 = 0;
    for &byte in output {
        acc = (acc * 256 + byte as u128) % m;
    }
    acc as u64
}

fn decode_scalar(bytes: &[u8; 32]) -> Option<Scalar> {
    Option::<Scalar>::from(Scalar::from_repr(FieldBytes::from(*bytes)))
}

fn compress(point: &ProjectivePoint) -> [u8; 33] {
    let encoded = point.to_affine().to_encoded_point(true);
    let mut out = [0u8; 33];
    out.copy_from_slice(encoded.as_bytes());
    out
}

fn decompress(bytes: &[u8]) -> Option<ProjectivePoint> {
    let encoded = EncodedPoint::from_bytes(bytes).ok()?;
    Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
        .map(ProjectivePoint::from)
}

/// Try-and-increment: hash `(public_key, alpha, ctr)` until the
/// digest decodes as the x coordinate of an even-y curve point.
fn hash_to_curve(public_key: &[u8; 33], alpha: &[u8]) -> Result<ProjectivePoint, VrfError> {
    for ctr in 0u16..=255 {
        let mut hasher = Sha256::new();
        hasher.update([SUITE, 0x01]);
        hasher.update(public_key);
        hasher.update(alpha);
        hasher.update([ctr as u8]);
        let digest = hasher.finalize();

        let mut candidate = [0u8; 33];
        candidate[0] = 0x02;
        candidate[1..].copy_from_slice(&digest);
        if let Some(point) = decompress(&candidate) {
            return Ok(point);
        }
    }
    Err(VrfError::HashToCurve)
}

/// RFC 6979 deterministic nonce keyed by the secret scalar over the
/// encoded input point.
fn nonce(secret_key: &[u8; 32], h_bytes: &[u8; 33]) -> Option<Scalar> {
    let order = Secp256k1::ORDER.to_be_byte_array();
    let digest = Sha256::digest(h_bytes);
    let k = rfc6979::generate_k::<Sha256, _>(&FieldBytes::from(*secret_key), &order, &digest, &[]);
    let mut repr = [0u8; 32];
    repr.copy_from_slice(k.as_slice());
    decode_scalar(&repr).filter(|s| !bool::from(s.is_zero()))
}

fn challenge(points: [&ProjectivePoint; 4]) -> [u8; CHALLENGE_LEN] {
    let mut hasher = Sha256::new();
    hasher.update([SUITE, 0x02]);
    for point in points {
        hasher.update(compress(point));
    }
    let digest = hasher.finalize();
    let mut c = [0u8; CHALLENGE_LEN];
    c.copy_from_slice(&digest[..CHALLENGE_LEN]);
    c
}

fn challenge_scalar(c: &[u8; CHALLENGE_LEN]) -> Scalar {
    let mut wide = [0u8; 32];
    wide[32 - CHALLENGE_LEN..].copy_from_slice(c);
    // The top half is zero so the value is always below the group
    // order; decoding cannot fail.
    decode_scalar(&wide).unwrap_or(Scalar::ZERO)
}

fn output_from_gamma(gamma: &ProjectivePoint) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([SUITE, 0x03]);
    hasher.update(compress(gamma));
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SK: [u8; 32] = [
        0x27, 0x11, 0x84, 0x5c, 0x0e, 0x3f, 0x90, 0x21, 0x6a, 0x1d, 0x55, 0xb2, 0x4c, 0x7e, 0x08,
        0x19, 0xa3, 0x66, 0xf0, 0x2d, 0x71, 0x5b, 0xc4, 0x9e, 0x30, 0x8a, 0xd6, 0x42, 0x5f, 0x13,
        0x77, 0x01,
    ];

    #[test]
    fn prove_is_deterministic() {
        let alpha = b"sampling-seed";
        let (out1, proof1) = prove(&SK, alpha).unwrap();
        let (out2, proof2) = prove(&SK, alpha).unwrap();
        assert_eq!(out1, out2);
        assert_eq!(proof1, proof2);
        assert_eq!(proof1.len(), PROOF_LEN);
    }

    #[test]
    fn proof_verifies_and_returns_same_output() {
        let alpha = b"sampling-seed";
        let (output, proof) = prove(&SK, alpha).unwrap();
        let pk = public_key(&SK).unwrap();
        let verified = verify(&pk, alpha, &proof).unwrap();
        assert_eq!(verified, output);
    }

    #[test]
    fn tampered_proof_is_rejected() {
        let alpha = b"sampling-seed";
        let (_, mut proof) = prove(&SK, alpha).unwrap();
        let pk = public_key(&SK).unwrap();

        proof[40] ^= 0x01;
        assert_eq!(verify(&pk, alpha, &proof), Err(VrfError::InvalidProof));
    }

    #[test]
    fn proof_is_bound_to_alpha() {
        let (_, proof) = prove(&SK, b"seed-a").unwrap();
        let pk = public_key(&SK).unwrap();
        assert_eq!(verify(&pk, b"seed-b", &proof), Err(VrfError::InvalidProof));
    }

    #[test]
    fn output_mod_matches_big_endian_interpretation() {
        assert_eq!(output_mod(&[0, 10], 10), 0);
        assert_eq!(output_mod(&[1, 0], 10), 6); // 256 % 10
        assert_eq!(output_mod(&[0xff; 32], 2), 1);
        assert_eq!(output_mod(&[0], 10), 0);
    }

    #[test]
    fn roughly_one_in_ten_outputs_selects_a_group() {
        let mut selected = 0;
        for i in 0u8..100 {
            let (output, _) = prove(&SK, &[i]).unwrap();
            if output_mod(&output, 10) == 0 {
                selected += 1;
            }
        }
        // Binomial(100, 0.1): stay well inside the tails.
        assert!(selected < 30, "selected {selected} of 100");
    }
}
