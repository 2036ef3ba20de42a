//! Lower Transport error types.

use mesh_core::error::PduError;

/// Why a segmented send did not complete, or could not start.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("segmented message timed out waiting for acknowledgment")]
    Timeout,

    #[error("receiver is busy")]
    Busy,

    #[error("transmission cancelled")]
    Cancelled,

    #[error("message too long: {len} bytes, at most {max} fit in 32 segments")]
    MessageTooLong { len: usize, max: usize },

    #[error("a message with SeqZero {0} is already being sent")]
    SequenceZeroInUse(u16),

    #[error("empty message")]
    EmptyMessage,

    #[error("pdu error: {0}")]
    Pdu(#[from] PduError),
}
