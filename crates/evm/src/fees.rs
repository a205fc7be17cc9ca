//! EIP-1559 fee estimation from recent fee history.
//!
//! Deliberately high: the tip is the average of a high-percentile reward
//! over a window of recent blocks and the max fee is the latest base fee
//! plus that tip, scaled up by a buffer.

use alloy::rpc::types::FeeHistory;
use tracing::debug;

use crate::{Chain, EvmError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeSettings {
    /// Number of recent blocks sampled.
    pub history_blocks: u64,
    /// Reward percentile requested per block.
    pub reward_percentile: f64,
    /// Tip used when every sampled reward is zero.
    pub default_tip: u128,
    /// Multiplier applied to `base_fee + tip`, in percent.
    pub buffer_percent: u128,
}

impl Default for FeeSettings {
    fn default() -> Self {
        Self {
            history_blocks: 100,
            reward_percentile: 99.0,
            default_tip: 10_000,
            buffer_percent: 110,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

pub async fn estimate_fees<C: Chain + ?Sized>(
    chain: &C,
    settings: &FeeSettings,
) -> Result<FeeEstimate, EvmError> {
    let history = chain
        .fee_history(settings.history_blocks, &[settings.reward_percentile])
        .await?;

    let estimate = fees_from_history(&history, settings)?;
    debug!(
        chain_id = chain.chain_id(),
        max_fee_per_gas = estimate.max_fee_per_gas,
        max_priority_fee_per_gas = estimate.max_priority_fee_per_gas,
        "Estimated fees"
    );

    Ok(estimate)
}

/// Derives fees from an `eth_feeHistory` response.
///
/// The last entry of `base_fee_per_gas` is the base fee of the block after
/// the sampled window, which is the one a new transaction lands in.
pub fn fees_from_history(
    history: &FeeHistory,
    settings: &FeeSettings,
) -> Result<FeeEstimate, EvmError> {
    let base_fee = *history
        .base_fee_per_gas
        .last()
        .ok_or(EvmError::EmptyFeeHistory)?;

    let rewards = history
        .reward
        .iter()
        .flatten()
        .filter_map(|block| block.first().copied())
        .filter(|reward| *reward > 0)
        .collect::<Vec<_>>();

    let tip = if rewards.is_empty() {
        settings.default_tip
    } else {
        let total = rewards.iter().fold(0u128, |acc, reward| acc.saturating_add(*reward));
        total / rewards.len() as u128
    };

    let max_fee = base_fee
        .saturating_add(tip)
        .saturating_mul(settings.buffer_percent)
        / 100;

    Ok(FeeEstimate {
        max_fee_per_gas: max_fee,
        max_priority_fee_per_gas: tip,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(base_fees: Vec<u128>, rewards: Vec<u128>) -> FeeHistory {
        FeeHistory {
            base_fee_per_gas: base_fees,
            reward: Some(rewards.into_iter().map(|reward| vec![reward]).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn averages_nonzero_rewards() {
        let history = history(vec![90, 100], vec![0, 20, 40, 0]);

        let fees = fees_from_history(&history, &FeeSettings::default()).unwrap();

        assert_eq!(fees.max_priority_fee_per_gas, 30);
        assert_eq!(fees.max_fee_per_gas, 143);
    }

    #[test]
    fn falls_back_to_default_tip_when_rewards_are_zero() {
        let history = history(vec![1_000_000], vec![0, 0]);
        let settings = FeeSettings {
            buffer_percent: 100,
            ..FeeSettings::default()
        };

        let fees = fees_from_history(&history, &settings).unwrap();

        assert_eq!(fees.max_priority_fee_per_gas, 10_000);
        assert_eq!(fees.max_fee_per_gas, 1_010_000);
    }

    #[test]
    fn missing_rewards_use_default_tip() {
        let history = FeeHistory {
            base_fee_per_gas: vec![50],
            reward: None,
            ..Default::default()
        };

        let fees = fees_from_history(&history, &FeeSettings::default()).unwrap();

        assert_eq!(fees.max_priority_fee_per_gas, 10_000);
    }

    #[test]
    fn empty_history_is_an_error() {
        let history = FeeHistory::default();

        let err = fees_from_history(&history, &FeeSettings::default()).unwrap_err();

        assert!(matches!(err, EvmError::EmptyFeeHistory));
    }
}
