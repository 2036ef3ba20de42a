//! Device capabilities reported in the Capabilities PDU.

use alloc::vec::Vec;

use mesh_crypto::Algorithm;

use crate::constants::CAPABILITIES_SIZE;
use crate::error::PduError;
use crate::provisioning::oob::{InputAction, OutputAction};

macro_rules! bit_set {
    ($(#[$meta:meta])* $name:ident($repr:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(pub $repr);

        impl $name {
            pub fn contains(&self, bits: $repr) -> bool {
                self.0 & bits == bits
            }

            pub fn is_empty(&self) -> bool {
                self.0 == 0
            }
        }
    };
}

bit_set!(
    /// Supported provisioning algorithms, bit *n* ⇔ [`Algorithm`] *n*.
    Algorithms(u16)
);
bit_set!(
    /// Bit 0: the device public key is available out of band.
    PublicKeyType(u8)
);
bit_set!(
    /// Bit 0: static OOB information is available.
    StaticOobType(u8)
);
bit_set!(OutputOobActions(u16));
bit_set!(InputOobActions(u16));

impl Algorithms {
    pub fn supports(&self, algorithm: Algorithm) -> bool {
        self.contains(algorithm.capability_bit())
    }

    /// The strongest algorithm in the set, CMAC when the set is empty.
    pub fn strongest(&self) -> Algorithm {
        if self.supports(Algorithm::EcdhP256HmacSha256) {
            Algorithm::EcdhP256HmacSha256
        } else {
            Algorithm::EcdhP256CmacAes128
        }
    }
}

impl PublicKeyType {
    pub const OOB_AVAILABLE: u8 = 0x01;
}

impl StaticOobType {
    pub const AVAILABLE: u8 = 0x01;
}

impl OutputOobActions {
    pub fn supports(&self, action: OutputAction) -> bool {
        self.contains(action.capability_bit())
    }

    pub fn actions(&self) -> Vec<OutputAction> {
        (0u8..5)
            .filter_map(OutputAction::from_u8)
            .filter(|action| self.supports(*action))
            .collect()
    }
}

impl InputOobActions {
    pub fn supports(&self, action: InputAction) -> bool {
        self.contains(action.capability_bit())
    }

    pub fn actions(&self) -> Vec<InputAction> {
        (0u8..4)
            .filter_map(InputAction::from_u8)
            .filter(|action| self.supports(*action))
            .collect()
    }
}

/// Contents of the Capabilities PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProvisioningCapabilities {
    pub number_of_elements: u8,
    pub algorithms: Algorithms,
    pub public_key_type: PublicKeyType,
    pub static_oob_type: StaticOobType,
    pub output_oob_size: u8,
    pub output_oob_actions: OutputOobActions,
    pub input_oob_size: u8,
    pub input_oob_actions: InputOobActions,
}

impl ProvisioningCapabilities {
    /// Decode the 11 parameter octets (PDU type excluded).
    pub fn decode(params: &[u8]) -> Result<Self, PduError> {
        if params.len() != CAPABILITIES_SIZE {
            return Err(PduError::InvalidLength {
                expected: CAPABILITIES_SIZE,
                actual: params.len(),
            });
        }
        if params[0] == 0 {
            return Err(PduError::InvalidValue {
                field: "number of elements",
                value: 0,
            });
        }
        Ok(Self {
            number_of_elements: params[0],
            algorithms: Algorithms(u16::from_be_bytes([params[1], params[2]])),
            public_key_type: PublicKeyType(params[3]),
            static_oob_type: StaticOobType(params[4]),
            output_oob_size: params[5],
            output_oob_actions: OutputOobActions(u16::from_be_bytes([params[6], params[7]])),
            input_oob_size: params[8],
            input_oob_actions: InputOobActions(u16::from_be_bytes([params[9], params[10]])),
        })
    }

    pub fn encode(&self) -> [u8; CAPABILITIES_SIZE] {
        let algorithms = self.algorithms.0.to_be_bytes();
        let output = self.output_oob_actions.0.to_be_bytes();
        let input = self.input_oob_actions.0.to_be_bytes();
        [
            self.number_of_elements,
            algorithms[0],
            algorithms[1],
            self.public_key_type.0,
            self.static_oob_type.0,
            self.output_oob_size,
            output[0],
            output[1],
            self.input_oob_size,
            input[0],
            input[1],
        ]
    }

    pub fn supports_oob_public_key(&self) -> bool {
        self.public_key_type.contains(PublicKeyType::OOB_AVAILABLE)
    }

    pub fn supports_static_oob(&self) -> bool {
        self.static_oob_type.contains(StaticOobType::AVAILABLE)
    }

    pub fn supports_output_oob(&self) -> bool {
        self.output_oob_size > 0 && !self.output_oob_actions.is_empty()
    }

    pub fn supports_input_oob(&self) -> bool {
        self.input_oob_size > 0 && !self.input_oob_actions.is_empty()
    }
}

impl Default for ProvisioningCapabilities {
    /// One element, CMAC only, no OOB of any kind.
    fn default() -> Self {
        Self {
            number_of_elements: 1,
            algorithms: Algorithms(Algorithm::EcdhP256CmacAes128.capability_bit()),
            public_key_type: PublicKeyType::default(),
            static_oob_type: StaticOobType::default(),
            output_oob_size: 0,
            output_oob_actions: OutputOobActions::default(),
            input_oob_size: 0,
            input_oob_actions: InputOobActions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_bytes() {
        let raw = hex::decode("0200030101040018030008").unwrap();
        let caps = ProvisioningCapabilities::decode(&raw).unwrap();
        assert_eq!(caps.number_of_elements, 2);
        assert!(caps.algorithms.supports(Algorithm::EcdhP256CmacAes128));
        assert!(caps.algorithms.supports(Algorithm::EcdhP256HmacSha256));
        assert_eq!(caps.algorithms.strongest(), Algorithm::EcdhP256HmacSha256);
        assert!(caps.supports_oob_public_key());
        assert!(caps.supports_static_oob());
        assert_eq!(caps.output_oob_size, 4);
        assert_eq!(
            caps.output_oob_actions.actions(),
            vec![OutputAction::OutputNumeric, OutputAction::OutputAlphanumeric]
        );
        assert_eq!(caps.input_oob_size, 3);
        assert_eq!(
            caps.input_oob_actions.actions(),
            vec![InputAction::InputAlphanumeric]
        );
        assert_eq!(caps.encode().to_vec(), raw);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        assert_eq!(
            ProvisioningCapabilities::decode(&[1; 10]),
            Err(PduError::InvalidLength {
                expected: 11,
                actual: 10
            })
        );
    }

    #[test]
    fn test_decode_rejects_zero_elements() {
        let mut raw = ProvisioningCapabilities::default().encode();
        raw[0] = 0;
        assert!(ProvisioningCapabilities::decode(&raw).is_err());
    }

    #[test]
    fn test_default_has_no_oob() {
        let caps = ProvisioningCapabilities::default();
        assert!(!caps.supports_static_oob());
        assert!(!caps.supports_output_oob());
        assert!(!caps.supports_input_oob());
        assert_eq!(caps.algorithms.strongest(), Algorithm::EcdhP256CmacAes128);
    }
}
