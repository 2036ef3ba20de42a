//! OOB authentication actions and Auth Value encoding.

use mesh_core::{InputAction, OutputAction};
use rand::Rng;

use crate::error::ProvisioningError;

const ALPHANUMERIC: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Something the user has to do before provisioning can continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthAction {
    /// Enter the static OOB key of the device.
    ProvideStaticKey,
    /// Enter the number the device blinked, beeped, vibrated or displayed.
    ProvideNumeric {
        max_digits: u8,
        action: OutputAction,
    },
    /// Enter the text the device displayed.
    ProvideAlphanumeric { max_characters: u8 },
    /// Show `value` so it can be entered on the device with `action`.
    DisplayNumber { value: u64, action: InputAction },
    /// Show `text` so it can be typed on the device.
    DisplayAlphanumeric(String),
}

impl AuthAction {
    /// Auth Value the peer will derive from what this action displays.
    /// `None` for the `Provide*` actions.
    pub fn displayed_auth_value(&self, length: usize) -> Option<Vec<u8>> {
        match self {
            AuthAction::DisplayNumber { value, .. } => Some(numeric_auth_value(*value, length)),
            AuthAction::DisplayAlphanumeric(text) => alphanumeric_auth_value(text, length).ok(),
            _ => None,
        }
    }
}

/// All-zero Auth Value used with No OOB authentication.
pub fn no_oob_auth_value(length: usize) -> Vec<u8> {
    vec![0u8; length]
}

/// Numeric Auth Value: big-endian, right-aligned in `length` octets.
pub fn numeric_auth_value(value: u64, length: usize) -> Vec<u8> {
    let mut out = vec![0u8; length];
    let bytes = value.to_be_bytes();
    let n = bytes.len().min(length);
    out[length - n..].copy_from_slice(&bytes[bytes.len() - n..]);
    out
}

/// Alphanumeric Auth Value: ASCII, left-aligned, zero padded.
pub fn alphanumeric_auth_value(text: &str, length: usize) -> Result<Vec<u8>, ProvisioningError> {
    if !text.is_ascii() || text.len() > length {
        return Err(ProvisioningError::InvalidOobValueFormat);
    }
    let mut out = vec![0u8; length];
    out[..text.len()].copy_from_slice(text.as_bytes());
    Ok(out)
}

/// Static OOB keys must already have the Auth Value length.
pub fn static_auth_value(key: &[u8], length: usize) -> Result<Vec<u8>, ProvisioningError> {
    if key.len() != length {
        return Err(ProvisioningError::InvalidOobValueFormat);
    }
    Ok(key.to_vec())
}

/// Random number with at most `digits` decimal digits, never zero.
pub fn random_number<R: Rng + ?Sized>(rng: &mut R, digits: u8) -> u64 {
    let digits = u32::from(digits.clamp(1, 8));
    rng.gen_range(1..10u64.pow(digits))
}

/// Random string of `length` characters from `0-9A-Z`.
pub fn random_alphanumeric<R: Rng + ?Sized>(rng: &mut R, length: u8) -> String {
    (0..length)
        .map(|_| char::from(ALPHANUMERIC[rng.gen_range(0..ALPHANUMERIC.len())]))
        .collect()
}
