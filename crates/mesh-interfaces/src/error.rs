//! Error types for the bearer layer.

use crate::traits::PduType;

/// Errors that can occur during bearer operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BearerError {
    #[error("bearer not open")]
    NotOpen,
    #[error("link closed by peer")]
    LinkClosed,
    #[error("PDU type {0:?} not supported by this bearer")]
    UnsupportedPduType(PduType),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}
