//! AES-CMAC and the CMAC-based mesh key derivation functions.
//!
//! `s1` is the salt generation function and `k1` the key derivation function
//! from the Mesh Profile specification, section 3.8.2.

use aes::Aes128;
use cmac::{Cmac, Mac};

/// Compute AES-128-CMAC of `data` under `key`.
#[must_use]
pub fn aes_cmac(key: &[u8; 16], data: &[u8]) -> [u8; 16] {
    let mut mac = Cmac::<Aes128>::new_from_slice(key).expect("AES-128 CMAC key is 16 bytes");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Salt generation: `s1(M) = AES-CMAC(ZERO, M)`.
#[must_use]
pub fn s1(data: &[u8]) -> [u8; 16] {
    aes_cmac(&[0u8; 16], data)
}

/// Key derivation: `k1(N, SALT, P) = AES-CMAC(AES-CMAC(SALT, N), P)`.
#[must_use]
pub fn k1(n: &[u8], salt: &[u8; 16], p: &[u8]) -> [u8; 16] {
    let t = aes_cmac(salt, n);
    aes_cmac(&t, p)
}
