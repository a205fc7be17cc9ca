//! Stitches a source-chain receipt to the matching target-chain event.
//!
//! LayerZero transfers are matched on the OFT `guid` (last log of the
//! source receipt, an indexed topic of `OFTReceived`). Socket transfers are
//! matched on the message id (second-to-last log, `MessageOutbound`), which
//! `ExecutionSuccess` only carries in its data, so the target scan filters by
//! signature and checks the decoded id.
//!
//! The positional lookups depend on the log order of the deployed
//! contracts. The expected event signature is checked before decoding so a
//! reordering fails loudly instead of producing a wrong id.

use alloy::primitives::B256;
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use derive_evm::Receipt;
use derive_evm::logs::{LogScanConfig, LogScanError, wait_for_log};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::contracts::{IOFT, ISocket};
use crate::error::BridgeEventParseError;
use crate::route::{BridgeContext, ProtocolRoute};

/// Reads the correlation id out of a final source receipt.
pub fn extract_correlation_id(
    protocol: &ProtocolRoute,
    receipt: &Receipt,
) -> Result<B256, BridgeEventParseError> {
    let tx_hash = receipt.tx_hash;
    let (event, position) = protocol.source_event();

    let missing = || BridgeEventParseError::MissingLog {
        tx_hash,
        event: event.name,
        position,
        found: receipt.logs.len(),
    };
    let index = position.index(receipt.logs.len()).ok_or_else(missing)?;
    let log = receipt.logs.get(index).ok_or_else(missing)?;

    let topic0 = log.topics().first().copied();
    if topic0 != Some(event.signature) {
        return Err(BridgeEventParseError::UnexpectedSignature {
            tx_hash,
            index,
            event: event.name,
            found: topic0,
        });
    }

    let decode_error = |source| BridgeEventParseError::Decode {
        tx_hash,
        index,
        event: event.name,
        source,
    };

    let id = match protocol {
        ProtocolRoute::LayerZero(_) => {
            IOFT::OFTSent::decode_log(&log.inner)
                .map_err(decode_error)?
                .data
                .guid
        }
        ProtocolRoute::Socket(_) => {
            ISocket::MessageOutbound::decode_log(&log.inner)
                .map_err(decode_error)?
                .data
                .msgId
        }
    };

    debug!(%tx_hash, %id, "Extracted correlation id");
    Ok(id)
}

/// `eth_getLogs` filter for the target-side completion event.
pub fn target_filter(protocol: &ProtocolRoute, id: B256) -> Filter {
    match protocol {
        ProtocolRoute::LayerZero(route) => Filter::new()
            .address(route.target_token)
            .event_signature(IOFT::OFTReceived::SIGNATURE_HASH)
            .topic1(id),
        ProtocolRoute::Socket(route) => {
            let filter = Filter::new().event_signature(ISocket::ExecutionSuccess::SIGNATURE_HASH);
            match route.target_socket {
                Some(socket) => filter.address(socket),
                None => filter,
            }
        }
    }
}

/// Whether `log` is the completion event carrying `id`.
pub fn matches_target(protocol: &ProtocolRoute, id: B256, log: &Log) -> bool {
    match protocol {
        ProtocolRoute::LayerZero(_) => IOFT::OFTReceived::decode_log(&log.inner)
            .is_ok_and(|event| event.data.guid == id),
        ProtocolRoute::Socket(_) => ISocket::ExecutionSuccess::decode_log(&log.inner)
            .is_ok_and(|event| event.data.msgId == id),
    }
}

/// Waits for the target-chain event carrying `id`, scanning from
/// `from_block`.
pub async fn find_target_event(
    context: &BridgeContext,
    id: B256,
    from_block: u64,
    config: &LogScanConfig,
    cancel: &CancellationToken,
) -> Result<Log, LogScanError> {
    let filter = target_filter(&context.protocol, id);

    wait_for_log(
        context.target.as_ref(),
        &filter,
        from_block,
        |log| matches_target(&context.protocol, id, log),
        config,
        cancel,
    )
    .await
}
