//! HMAC-SHA-256 and the HMAC-based mesh key derivation functions.
//!
//! `s2` and `k5` are used by the BTM_ECDH_P256_HMAC_SHA256_AES_CCM
//! provisioning algorithm.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the HMAC-SHA256 of `data` using the given `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC-SHA256 accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Salt generation: `s2(M) = HMAC-SHA-256(ZERO, M)` with a 32-octet zero key.
pub fn s2(data: &[u8]) -> [u8; 32] {
    hmac_sha256(&[0u8; 32], data)
}

/// Key derivation: `k5(N, SALT, P) = HMAC-SHA-256(HMAC-SHA-256(SALT, N), P)`.
pub fn k5(n: &[u8], salt: &[u8; 32], p: &[u8]) -> [u8; 32] {
    let t = hmac_sha256(salt, n);
    hmac_sha256(&t, p)
}
