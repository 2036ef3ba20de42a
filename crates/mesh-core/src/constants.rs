//! Protocol constants for the Lower Transport and provisioning layers.

// Lower Transport PDU sizes
pub const SEGMENTED_HEADER_SIZE: usize = 4;
pub const ACK_PDU_SIZE: usize = 7;
/// Largest unsegmented Upper Transport PDU that fits one network PDU.
pub const MAX_UNSEGMENTED_ACCESS_PAYLOAD: usize = 15;
pub const MAX_UNSEGMENTED_CONTROL_PAYLOAD: usize = 11;
pub const ACCESS_SEGMENT_PAYLOAD: usize = 12;
pub const CONTROL_SEGMENT_PAYLOAD: usize = 8;
pub const MAX_SEGMENTS: usize = 32;
pub const MAX_SEGMENTED_ACCESS_PAYLOAD: usize = ACCESS_SEGMENT_PAYLOAD * MAX_SEGMENTS; // 384

// Field masks
pub const SEQ_ZERO_MASK: u16 = 0x1FFF;
pub const SEQ_MASK: u32 = 0x00FF_FFFF;
pub const SEG_MASK: u8 = 0x1F;
pub const AID_MASK: u8 = 0x3F;
pub const OPCODE_MASK: u8 = 0x7F;

/// Opcode of the Segment Acknowledgment control message.
pub const SEGMENT_ACK_OPCODE: u8 = 0x00;

// Network defaults
pub const DEFAULT_TTL: u8 = 5;
pub const MAX_TTL: u8 = 127;

// Provisioning sizes
pub const PUBLIC_KEY_SIZE: usize = 64;
pub const CAPABILITIES_SIZE: usize = 11;
pub const START_SIZE: usize = 5;
pub const PROVISIONING_DATA_SIZE: usize = 25;
pub const PROVISIONING_DATA_MIC_SIZE: usize = 8;
pub const ENCRYPTED_PROVISIONING_DATA_SIZE: usize =
    PROVISIONING_DATA_SIZE + PROVISIONING_DATA_MIC_SIZE; // 33
pub const NETWORK_KEY_SIZE: usize = 16;
pub const DEVICE_UUID_SIZE: usize = 16;
