use std::time::Duration;

use alloy::primitives::U256;
use derive_evm::finality::FinalityConfig;
use derive_evm::logs::LogScanConfig;

/// Tuning for the bridge pipeline.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub source_finality: FinalityConfig,
    pub target_finality: FinalityConfig,
    pub event_scan: LogScanConfig,
    /// Gas limit for executing the Socket message on the destination chain.
    pub msg_gas_limit: u64,
    /// Socket payload size passed to new-style vault fee quotes.
    pub payload_size: u64,
    /// Connector speed tier to route through.
    pub speed_tier: String,
    pub gas_funding: GasFundingSettings,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            source_finality: FinalityConfig::default(),
            target_finality: FinalityConfig::default(),
            event_scan: LogScanConfig::default(),
            msg_gas_limit: 100_000,
            payload_size: 161,
            speed_tier: "FAST".to_owned(),
            gas_funding: GasFundingSettings::default(),
        }
    }
}

/// Automatic top-up of the signer's app-chain gas before withdrawals.
#[derive(Debug, Clone, Copy)]
pub struct GasFundingSettings {
    /// Fund when the signer's app-chain balance is below this, in wei.
    pub threshold: U256,
    /// ETH bridged from mainnet per top-up, in wei.
    pub amount: U256,
    pub min_gas_limit: u32,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for GasFundingSettings {
    fn default() -> Self {
        Self {
            threshold: U256::from(100_000_000_000_000u64),
            amount: U256::from(1_000_000_000_000_000u64),
            min_gas_limit: 100_000,
            timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(5),
        }
    }
}
