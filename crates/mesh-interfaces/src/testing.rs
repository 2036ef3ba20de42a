//! Generic conformance assertions for [`Bearer`] implementations.
//!
//! These helpers check behavior every bearer should share, whatever link it
//! runs over.
//!
//! # Usage
//!
//! ```rust,ignore
//! use mesh_interfaces::testing;
//!
//! let (bearer, _peer) = LoopbackBearer::pair();
//! testing::assert_pre_open_conformance(&bearer).await;
//! bearer.open().await?;
//! testing::assert_close_conformance(&bearer).await;
//! ```

use crate::error::BearerError;
use crate::traits::{Bearer, PduType};

pub fn assert_has_name(bearer: &impl Bearer) {
    assert!(!bearer.name().is_empty(), "bearer name must not be empty");
}

pub fn assert_not_open_before_open(bearer: &impl Bearer) {
    assert!(!bearer.is_open(), "bearer should not be open before open()");
}

/// Sending on a closed bearer must fail with [`BearerError::NotOpen`].
pub async fn assert_send_before_open_fails(bearer: &impl Bearer) {
    let pdu_type = [
        PduType::ProvisioningPdu,
        PduType::NetworkPdu,
        PduType::MeshBeacon,
        PduType::ProxyConfiguration,
    ]
    .into_iter()
    .find(|t| bearer.supports(*t))
    .unwrap_or(PduType::NetworkPdu);
    match bearer.send(&[0x42; 8], pdu_type).await {
        Err(BearerError::NotOpen) => {}
        Err(e) => panic!("unexpected error variant from send before open: {e}"),
        Ok(()) => panic!("send should fail before open()"),
    }
}

pub async fn assert_close_is_clean(bearer: &impl Bearer) {
    let result = bearer.close().await;
    assert!(result.is_ok(), "close() should succeed: {:?}", result.err());
    assert!(!bearer.is_open(), "is_open() should be false after close()");
}

pub async fn assert_double_close_is_idempotent(bearer: &impl Bearer) {
    let _ = bearer.close().await;
    let result = bearer.close().await;
    assert!(
        result.is_ok(),
        "second close() should be idempotent: {:?}",
        result.err()
    );
}

/// Runs [`assert_has_name`], [`assert_not_open_before_open`] and
/// [`assert_send_before_open_fails`].
pub async fn assert_pre_open_conformance(bearer: &impl Bearer) {
    assert_has_name(bearer);
    assert_not_open_before_open(bearer);
    assert_send_before_open_fails(bearer).await;
}

pub async fn assert_close_conformance(bearer: &impl Bearer) {
    assert_close_is_clean(bearer).await;
    assert_double_close_is_idempotent(bearer).await;
}

/// MTU must leave room for the proxy header plus data, and at least one PDU
/// type must be carried.
pub fn assert_capabilities_consistent(bearer: &impl Bearer) {
    assert!(bearer.mtu() >= 2, "MTU must fit a header and one byte");
    assert!(
        !bearer.supported_pdu_types().is_empty(),
        "bearer must support at least one PDU type"
    );
}
