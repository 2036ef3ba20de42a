//! Authentication methods and OOB actions.

use core::fmt;

use crate::error::PduError;

/// Action the device performs to output its Auth Value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OutputAction {
    Blink = 0,
    Beep = 1,
    Vibrate = 2,
    OutputNumeric = 3,
    OutputAlphanumeric = 4,
}

impl OutputAction {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Blink),
            1 => Some(Self::Beep),
            2 => Some(Self::Vibrate),
            3 => Some(Self::OutputNumeric),
            4 => Some(Self::OutputAlphanumeric),
            _ => None,
        }
    }

    /// Bit of this action in the Capabilities output actions field.
    pub fn capability_bit(self) -> u16 {
        1 << (self as u8)
    }
}

/// Action the user performs on the device to input the Auth Value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InputAction {
    Push = 0,
    Twist = 1,
    InputNumeric = 2,
    InputAlphanumeric = 3,
}

impl InputAction {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Push),
            1 => Some(Self::Twist),
            2 => Some(Self::InputNumeric),
            3 => Some(Self::InputAlphanumeric),
            _ => None,
        }
    }

    pub fn capability_bit(self) -> u16 {
        1 << (self as u8)
    }
}

/// Authentication method selected in the Start PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthenticationMethod {
    NoOob,
    StaticOob,
    /// `size` is the number of digits or characters, 1..=8.
    OutputOob { action: OutputAction, size: u8 },
    InputOob { action: InputAction, size: u8 },
}

impl AuthenticationMethod {
    pub const MAX_SIZE: u8 = 8;

    /// Method, action and size octets as carried in the Start PDU.
    pub fn to_bytes(&self) -> [u8; 3] {
        match *self {
            AuthenticationMethod::NoOob => [0, 0, 0],
            AuthenticationMethod::StaticOob => [1, 0, 0],
            AuthenticationMethod::OutputOob { action, size } => [2, action as u8, size],
            AuthenticationMethod::InputOob { action, size } => [3, action as u8, size],
        }
    }

    pub fn from_bytes(bytes: [u8; 3]) -> Result<Self, PduError> {
        let [method, action, size] = bytes;
        let check_size = |size: u8| {
            if (1..=Self::MAX_SIZE).contains(&size) {
                Ok(size)
            } else {
                Err(PduError::InvalidValue {
                    field: "auth size",
                    value: size,
                })
            }
        };
        let invalid_action = PduError::InvalidValue {
            field: "auth action",
            value: action,
        };
        match method {
            0 | 1 if action != 0 || size != 0 => Err(invalid_action),
            0 => Ok(AuthenticationMethod::NoOob),
            1 => Ok(AuthenticationMethod::StaticOob),
            2 => Ok(AuthenticationMethod::OutputOob {
                action: OutputAction::from_u8(action).ok_or(invalid_action)?,
                size: check_size(size)?,
            }),
            3 => Ok(AuthenticationMethod::InputOob {
                action: InputAction::from_u8(action).ok_or(invalid_action)?,
                size: check_size(size)?,
            }),
            _ => Err(PduError::InvalidValue {
                field: "auth method",
                value: method,
            }),
        }
    }
}

impl fmt::Display for AuthenticationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthenticationMethod::NoOob => write!(f, "No OOB"),
            AuthenticationMethod::StaticOob => write!(f, "Static OOB"),
            AuthenticationMethod::OutputOob { action, size } => {
                write!(f, "Output OOB {action:?} (size {size})")
            }
            AuthenticationMethod::InputOob { action, size } => {
                write!(f, "Input OOB {action:?} (size {size})")
            }
        }
    }
}

/// Public key delivery selected in the Start PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PublicKeyMethod {
    /// Keys are exchanged in-band with Public Key PDUs.
    #[default]
    NoOob = 0,
    /// The device public key was obtained out of band.
    Oob = 1,
}

impl PublicKeyMethod {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::NoOob),
            1 => Some(Self::Oob),
            _ => None,
        }
    }
}
