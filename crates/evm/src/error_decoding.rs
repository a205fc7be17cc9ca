//! Revert detection and decoding for JSON-RPC errors.
//!
//! Nodes report reverted `eth_call`/`eth_estimateGas` requests as JSON-RPC
//! error payloads (code 3 with ABI-encoded revert data, or a message
//! mentioning "revert"). Those are answers about chain state, not endpoint
//! failures, so they are decoded into [`EvmError::Reverted`] and never
//! retried or held against the endpoint.

use alloy::primitives::Bytes;
use alloy::rpc::json_rpc::ErrorPayload;
use alloy::sol_types::decode_revert_reason;
use alloy::transports::{RpcError, TransportErrorKind};
use tracing::debug;

use crate::EvmError;

const EXECUTION_REVERTED_CODE: i64 = 3;

/// Whether an error payload reports an execution revert.
pub fn is_revert_payload(payload: &ErrorPayload) -> bool {
    payload.code == EXECUTION_REVERTED_CODE || payload.message.to_lowercase().contains("revert")
}

pub fn is_revert(err: &RpcError<TransportErrorKind>) -> bool {
    err.as_error_resp().is_some_and(is_revert_payload)
}

/// Converts an RPC error into an [`EvmError`], decoding revert data when
/// the node supplied any.
pub fn decode_rpc_error(err: RpcError<TransportErrorKind>) -> EvmError {
    let Some(payload) = err.as_error_resp() else {
        return EvmError::Transport(err);
    };

    if !is_revert_payload(payload) {
        return EvmError::Transport(err);
    }

    let decoded = payload
        .try_data_as::<Bytes>()
        .and_then(Result::ok)
        .and_then(|data| decode_revert_reason(&data));

    let reason = decoded.unwrap_or_else(|| {
        debug!(message = %payload.message, "Revert data missing or undecodable");
        payload.message.to_string()
    });

    EvmError::Reverted { reason }
}
