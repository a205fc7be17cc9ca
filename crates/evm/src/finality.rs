//! Transaction submission and finality tracking.
//!
//! A submitted transaction moves `SUBMITTED -> MINED -> FINAL`. It is final
//! once the chain head is at least `finality_blocks` past the block holding
//! its receipt. The receipt is re-read on every poll, since a reorg can move
//! or remove it.
//!
//! When the deadline passes (or the wait is cancelled) the failure is
//! classified by what the node last knew, because recovery differs:
//!
//! - a receipt was seen but is not deep enough: [`FinalityError::FinalityTimeout`]
//! - no receipt, transaction in the pool: [`FinalityError::TxPendingTimeout`]
//! - no receipt, transaction unknown: [`FinalityError::TransactionDropped`]

use std::time::Duration;

use alloy::primitives::TxHash;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::builder::SignedTx;
use crate::{Chain, EvmError, Receipt, TxState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalityConfig {
    pub finality_blocks: u64,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for FinalityConfig {
    fn default() -> Self {
        Self {
            finality_blocks: 10,
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to submit transaction {tx_hash}: {source}")]
pub struct TxSubmissionError {
    pub tx_hash: TxHash,
    #[source]
    pub source: EvmError,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FinalityError {
    #[error(
        "transaction {tx_hash} mined in block {receipt_block} but not final: \
         head {current_block:?}, {required} confirmations required"
    )]
    FinalityTimeout {
        tx_hash: TxHash,
        receipt_block: u64,
        current_block: Option<u64>,
        required: u64,
    },
    #[error("transaction {tx_hash} still pending in the mempool after {waited:?}")]
    TxPendingTimeout { tx_hash: TxHash, waited: Duration },
    #[error("transaction {tx_hash} unknown to the node after {waited:?}, likely dropped")]
    TransactionDropped { tx_hash: TxHash, waited: Duration },
}

impl FinalityError {
    pub const fn tx_hash(&self) -> TxHash {
        match self {
            Self::FinalityTimeout { tx_hash, .. }
            | Self::TxPendingTimeout { tx_hash, .. }
            | Self::TransactionDropped { tx_hash, .. } => *tx_hash,
        }
    }
}

/// Broadcasts a signed transaction.
pub async fn send<C: Chain + ?Sized>(chain: &C, tx: &SignedTx) -> Result<TxHash, TxSubmissionError> {
    let tx_hash = chain
        .send_raw(&tx.raw)
        .await
        .map_err(|source| TxSubmissionError {
            tx_hash: tx.tx_hash,
            source,
        })?;

    if tx_hash != tx.tx_hash {
        warn!(expected = %tx.tx_hash, returned = %tx_hash, "Node returned unexpected transaction hash");
    }

    info!(chain_id = chain.chain_id(), %tx_hash, nonce = tx.nonce, "Submitted transaction");
    Ok(tx_hash)
}

/// Polls until `tx_hash` has `finality_blocks` confirmations.
///
/// Receipt and head lookups that fail are treated as "not yet", since
/// rotating providers can be briefly out of sync with each other.
#[tracing::instrument(skip(chain, config, cancel), fields(chain_id = chain.chain_id()), level = tracing::Level::DEBUG)]
pub async fn wait_for_finality<C: Chain + ?Sized>(
    chain: &C,
    tx_hash: TxHash,
    config: &FinalityConfig,
    cancel: &CancellationToken,
) -> Result<Receipt, FinalityError> {
    let started = Instant::now();
    let deadline = started + config.timeout;
    let mut observed: Option<Receipt> = None;
    let mut last_head = None;

    loop {
        match chain.receipt(tx_hash).await {
            Ok(Some(receipt)) => {
                match chain.block_number().await {
                    Ok(head) => {
                        last_head = Some(head);
                        if head >= receipt.block_number.saturating_add(config.finality_blocks) {
                            info!(%tx_hash, block = receipt.block_number, head, status = receipt.status, "Transaction final");
                            return Ok(receipt);
                        }
                        debug!(%tx_hash, block = receipt.block_number, head, "Awaiting confirmations");
                    }
                    Err(err) => debug!(%tx_hash, error = %err, "Failed to fetch chain head"),
                }
                observed = Some(receipt);
            }
            Ok(None) => debug!(%tx_hash, "No receipt yet"),
            Err(err) => debug!(%tx_hash, error = %err, "Receipt lookup failed"),
        }

        if cancel.is_cancelled() || Instant::now() >= deadline {
            return Err(classify_timeout(chain, tx_hash, observed, last_head, config, started).await);
        }

        let pause = config.poll_interval.min(deadline.saturating_duration_since(Instant::now()));
        tokio::select! {
            () = sleep(pause) => {}
            () = cancel.cancelled() => {}
        }
    }
}

async fn classify_timeout<C: Chain + ?Sized>(
    chain: &C,
    tx_hash: TxHash,
    observed: Option<Receipt>,
    last_head: Option<u64>,
    config: &FinalityConfig,
    started: Instant,
) -> FinalityError {
    let waited = started.elapsed();

    if let Some(receipt) = observed {
        return FinalityError::FinalityTimeout {
            tx_hash,
            receipt_block: receipt.block_number,
            current_block: last_head,
            required: config.finality_blocks,
        };
    }

    let state = chain.transaction_state(tx_hash).await.unwrap_or_else(|err| {
        warn!(%tx_hash, error = %err, "Failed to look up transaction, assuming dropped");
        TxState::Unknown
    });

    let error = match state {
        TxState::Pending => FinalityError::TxPendingTimeout { tx_hash, waited },
        TxState::Mined { block_number } => FinalityError::FinalityTimeout {
            tx_hash,
            receipt_block: block_number,
            current_block: last_head,
            required: config.finality_blocks,
        },
        TxState::Unknown => FinalityError::TransactionDropped { tx_hash, waited },
    };

    warn!(%error, "Gave up waiting for finality");
    error
}

/// Submits `tx` and waits for it to become final.
pub async fn send_and_confirm<C: Chain + ?Sized>(
    chain: &C,
    tx: &SignedTx,
    config: &FinalityConfig,
    cancel: &CancellationToken,
) -> Result<Receipt, SendAndConfirmError> {
    let tx_hash = send(chain, tx).await?;
    Ok(wait_for_finality(chain, tx_hash, config, cancel).await?)
}

#[derive(Debug, thiserror::Error)]
pub enum SendAndConfirmError {
    #[error(transparent)]
    Submission(#[from] TxSubmissionError),
    #[error(transparent)]
    Finality(#[from] FinalityError),
}
