//! Cryptographic primitives for the Bluetooth Mesh stack.
//!
//! This crate provides the AES-CMAC and HMAC-SHA-256 key derivation
//! functions (s1, k1, s2, k5), AES-CCM authenticated encryption, P-256 ECDH,
//! and the [`CryptoProvider`] seam through which the provisioning state
//! machine consumes all of them.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod aes_ccm;
pub mod aes_cmac;
pub mod algorithm;
pub mod error;
pub mod hmac;
pub mod p256;
pub mod provider;

pub use algorithm::Algorithm;
pub use error::CryptoError;
pub use provider::{CryptoProvider, KeyPair, MeshCrypto, SessionKeys, SharedSecret};
