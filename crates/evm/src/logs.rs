//! Bounded log scanning with a deadline.
//!
//! Many providers cap `eth_getLogs` ranges, so scans walk from a start block
//! to the chain head in windows of at most `max_block_range` blocks, then
//! keep polling the head until a matching log shows up or the deadline
//! passes. Individual `eth_getLogs`/`eth_blockNumber` failures are retried
//! with backoff: rotating providers can disagree about the head.

use std::time::Duration;

use alloy::rpc::types::{Filter, Log};
use backon::{ExponentialBuilder, Retryable};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{Chain, EvmError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogScanConfig {
    pub max_block_range: u64,
    pub poll_interval: Duration,
    pub timeout: Duration,
    /// Attempts per `eth_getLogs` request before giving up on the scan.
    pub rpc_attempts: usize,
    pub retry_min_delay: Duration,
}

impl Default for LogScanConfig {
    fn default() -> Self {
        Self {
            max_block_range: 10_000,
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
            rpc_attempts: 10,
            retry_min_delay: Duration::from_millis(500),
        }
    }
}

impl LogScanConfig {
    fn retry_strategy(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_max_times(self.rpc_attempts.saturating_sub(1))
            .with_min_delay(self.retry_min_delay)
            .with_max_delay(self.poll_interval.max(self.retry_min_delay))
            .with_jitter()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogScanError {
    #[error("no matching log after {waited:?}: scanned blocks {from_block}..={scanned_to:?}")]
    Timeout {
        from_block: u64,
        scanned_to: Option<u64>,
        waited: Duration,
    },
    #[error("log query failed: {0}")]
    Rpc(#[from] EvmError),
}

/// Splits `from..=to` into inclusive windows of at most `max_range` blocks.
pub fn block_windows(from: u64, to: u64, max_range: u64) -> Vec<(u64, u64)> {
    if from > to {
        return Vec::new();
    }

    let step = max_range.max(1);
    let mut windows = Vec::new();
    let mut start = from;

    loop {
        let end = start.saturating_add(step - 1).min(to);
        windows.push((start, end));
        if end == to {
            break;
        }
        start = end + 1;
    }

    windows
}

/// Returns the first log at or after `from_block` matching `filter` and
/// `condition`.
#[tracing::instrument(skip(chain, filter, condition, config, cancel), fields(chain_id = chain.chain_id()), level = tracing::Level::DEBUG)]
pub async fn wait_for_log<C, F>(
    chain: &C,
    filter: &Filter,
    from_block: u64,
    condition: F,
    config: &LogScanConfig,
    cancel: &CancellationToken,
) -> Result<Log, LogScanError>
where
    C: Chain + ?Sized,
    F: Fn(&Log) -> bool + Send + Sync,
{
    let started = Instant::now();
    let deadline = started + config.timeout;
    let mut cursor = from_block;

    let timed_out = |cursor: u64| LogScanError::Timeout {
        from_block,
        scanned_to: cursor.checked_sub(1).filter(|last| *last >= from_block),
        waited: started.elapsed(),
    };

    loop {
        if cancel.is_cancelled() || Instant::now() >= deadline {
            return Err(timed_out(cursor));
        }

        let head = (|| async { chain.block_number().await })
            .retry(config.retry_strategy())
            .when(EvmError::is_transient)
            .await?;

        for (start, end) in block_windows(cursor, head, config.max_block_range) {
            if cancel.is_cancelled() || Instant::now() >= deadline {
                return Err(timed_out(cursor));
            }

            let window = filter.clone().from_block(start).to_block(end);
            let logs = (|| async { chain.logs(&window).await })
                .retry(config.retry_strategy())
                .when(EvmError::is_transient)
                .notify(|err, delay: Duration| {
                    warn!(start, end, error = %err, ?delay, "eth_getLogs failed, retrying");
                })
                .await?;

            debug!(start, end, count = logs.len(), "Scanned log window");

            if let Some(found) = logs.into_iter().find(|log| condition(log)) {
                info!(
                    block = ?found.block_number,
                    tx_hash = ?found.transaction_hash,
                    "Found matching log"
                );
                return Ok(found);
            }

            cursor = end + 1;
        }

        let pause = config
            .poll_interval
            .min(deadline.saturating_duration_since(Instant::now()));
        tokio::select! {
            () = sleep(pause) => {}
            () = cancel.cancelled() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, B256, LogData, address};

    use super::*;
    use crate::mock::MockChain;

    const EMITTER: Address = address!("0x9999999999999999999999999999999999999999");

    fn log_at(block: u64, topic: B256) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: EMITTER,
                data: LogData::new_unchecked(vec![topic], Default::default()),
            },
            block_number: Some(block),
            transaction_hash: Some(B256::repeat_byte(block as u8)),
            ..Default::default()
        }
    }

    fn config() -> LogScanConfig {
        LogScanConfig {
            max_block_range: 100,
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
            rpc_attempts: 3,
            retry_min_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn windows_cover_range_without_gaps() {
        assert_eq!(
            block_windows(0, 25_000, 10_000),
            vec![(0, 9_999), (10_000, 19_999), (20_000, 25_000)]
        );
        assert_eq!(block_windows(5, 5, 10_000), vec![(5, 5)]);
        assert!(block_windows(6, 5, 10_000).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn finds_log_in_later_window() {
        let chain = MockChain::new(957);
        chain.set_head(450);
        let wanted = B256::repeat_byte(7);
        chain.push_log(log_at(120, B256::repeat_byte(1)));
        chain.push_log(log_at(330, wanted));

        let filter = Filter::new().address(EMITTER);
        let found = wait_for_log(
            &chain,
            &filter,
            100,
            |log| log.topics().first() == Some(&wanted),
            &config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(found.block_number, Some(330));
        assert_eq!(chain.call_count("logs"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn ignores_logs_before_start_block() {
        let chain = MockChain::new(957);
        chain.set_head(500);
        let wanted = B256::repeat_byte(7);
        chain.push_log(log_at(50, wanted));

        let err = wait_for_log(
            &chain,
            &Filter::new(),
            100,
            |log| log.topics().first() == Some(&wanted),
            &config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            LogScanError::Timeout {
                from_block: 100,
                scanned_to: Some(500),
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_polling_until_log_appears() {
        let chain = MockChain::new(957);
        chain.set_head(10);
        chain.set_head_step(1);
        let wanted = B256::repeat_byte(7);
        chain.push_log(log_at(14, wanted));

        let found = wait_for_log(
            &chain,
            &Filter::new(),
            10,
            |log| log.topics().first() == Some(&wanted),
            &config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(found.block_number, Some(14));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_get_logs_failures() {
        let chain = MockChain::new(957);
        chain.set_head(20);
        let wanted = B256::repeat_byte(7);
        chain.push_log(log_at(15, wanted));
        chain.fail_next("logs", 2);

        let found = wait_for_log(
            &chain,
            &Filter::new(),
            0,
            |log| log.topics().first() == Some(&wanted),
            &config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(found.block_number, Some(15));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_the_rpc_error() {
        let chain = MockChain::new(957);
        chain.set_head(20);
        chain.fail_next("logs", 10);

        let err = wait_for_log(
            &chain,
            &Filter::new(),
            0,
            |_| true,
            &config(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, LogScanError::Rpc(_)));
        assert_eq!(chain.call_count("logs"), 3);
    }
}
