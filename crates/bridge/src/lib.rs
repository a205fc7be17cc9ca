//! Cross-chain bridging between the Derive app-chain and L1/L2 chains.
//!
//! Two protocols move funds:
//!
//! - **LayerZero** (OFT `send`/`OFTReceived`) for the native DRV token.
//! - **Socket** vaults and controllers (lock on one side, mint on the other)
//!   for every other currency.
//!
//! [`route::RouteResolver`] picks the protocol and resolves contract
//! addresses from the [`registry::AddressRegistry`].
//! [`client::BridgeClient`] drives a transfer through
//! prepare -> submit -> source finality -> target event -> target finality,
//! with [`correlate`] stitching the source receipt to the target-chain event.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod client;
pub mod contracts;
pub mod correlate;
pub mod error;
pub mod registry;
pub mod result;
pub mod route;
pub mod settings;

pub use client::{BridgeClient, PreparedBridgeTx};
pub use error::{BridgeError, BridgeEventParseError, BridgeRouteError, PartialBridgeError};
pub use registry::{AddressRegistry, TokenRouteData};
pub use result::{BridgeStage, BridgeTxResult, TxResult, TxStatus};
pub use route::{BridgeContext, ProtocolRoute, RouteResolver};
pub use settings::BridgeSettings;

#[derive(Debug, Clone, thiserror::Error)]
#[error("unsupported chain: {0}")]
pub struct UnknownChain(pub String);

/// Chains the bridge can move funds between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum ChainId {
    Eth = 1,
    Optimism = 10,
    Derive = 957,
    Base = 8453,
    Mode = 34443,
    Arbitrum = 42161,
    Blast = 81457,
}

impl ChainId {
    pub const ALL: [Self; 7] = [
        Self::Eth,
        Self::Optimism,
        Self::Derive,
        Self::Base,
        Self::Mode,
        Self::Arbitrum,
        Self::Blast,
    ];

    pub const fn id(self) -> u64 {
        self as u64
    }

    pub const fn is_app_chain(self) -> bool {
        matches!(self, Self::Derive)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Eth => "eth",
            Self::Optimism => "optimism",
            Self::Derive => "derive",
            Self::Base => "base",
            Self::Mode => "mode",
            Self::Arbitrum => "arbitrum",
            Self::Blast => "blast",
        }
    }

    /// LayerZero v2 endpoint id, for chains where DRV is deployed.
    pub const fn layer_zero_eid(self) -> Option<u32> {
        match self {
            Self::Eth => Some(30101),
            Self::Arbitrum => Some(30110),
            Self::Optimism => Some(30111),
            Self::Base => Some(30184),
            Self::Derive => Some(30311),
            Self::Mode | Self::Blast => None,
        }
    }

    /// Public endpoint used when no RPC is configured for the chain.
    pub const fn default_rpc_url(self) -> &'static str {
        match self {
            Self::Eth => "https://eth.drpc.org",
            Self::Optimism => "https://optimism.drpc.org",
            Self::Derive => "https://rpc.lyra.finance",
            Self::Base => "https://base.drpc.org",
            Self::Mode => "https://mode.drpc.org",
            Self::Arbitrum => "https://arbitrum.drpc.org",
            Self::Blast => "https://blast.drpc.org",
        }
    }
}

impl TryFrom<u64> for ChainId {
    type Error = UnknownChain;

    fn try_from(id: u64) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|chain| chain.id() == id)
            .ok_or_else(|| UnknownChain(id.to_string()))
    }
}

impl From<ChainId> for u64 {
    fn from(chain: ChainId) -> Self {
        chain.id()
    }
}

impl FromStr for ChainId {
    type Err = UnknownChain;

    /// Accepts a chain name (`base`) or numeric id (`8453`).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = value.parse::<u64>() {
            return Self::try_from(id);
        }

        Self::ALL
            .into_iter()
            .find(|chain| chain.name().eq_ignore_ascii_case(value))
            .ok_or_else(|| UnknownChain(value.to_owned()))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.id())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unsupported currency: {0}")]
pub struct UnknownCurrency(pub String);

/// Token symbols the bridge knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "weETH")]
    WeEth,
    #[serde(rename = "rswETH")]
    RswEth,
    #[serde(rename = "rsETH")]
    RsEth,
    #[serde(rename = "USDe")]
    Usde,
    #[serde(rename = "deUSD")]
    DeUsd,
    #[serde(rename = "PYUSD")]
    Pyusd,
    #[serde(rename = "sUSDe")]
    SUsde,
    #[serde(rename = "SolvBTC")]
    SolvBtc,
    #[serde(rename = "SolvBTCBBN")]
    SolvBtcBbn,
    #[serde(rename = "LBTC")]
    Lbtc,
    #[serde(rename = "OP")]
    Op,
    #[serde(rename = "DAI")]
    Dai,
    #[serde(rename = "sDAI")]
    SDai,
    #[serde(rename = "cbBTC")]
    CbBtc,
    #[serde(rename = "eBTC")]
    EBtc,
    #[serde(rename = "AAVE")]
    Aave,
    #[serde(rename = "OLAS")]
    Olas,
    #[serde(rename = "DRV")]
    Drv,
    #[serde(rename = "WBTC")]
    Wbtc,
    #[serde(rename = "WETH")]
    Weth,
    #[serde(rename = "USDC")]
    Usdc,
    #[serde(rename = "USDT")]
    Usdt,
    #[serde(rename = "wstETH")]
    WstEth,
    #[serde(rename = "USDC.e")]
    UsdcE,
    #[serde(rename = "SNX")]
    Snx,
}

impl Currency {
    pub const ALL: [Self; 25] = [
        Self::WeEth,
        Self::RswEth,
        Self::RsEth,
        Self::Usde,
        Self::DeUsd,
        Self::Pyusd,
        Self::SUsde,
        Self::SolvBtc,
        Self::SolvBtcBbn,
        Self::Lbtc,
        Self::Op,
        Self::Dai,
        Self::SDai,
        Self::CbBtc,
        Self::EBtc,
        Self::Aave,
        Self::Olas,
        Self::Drv,
        Self::Wbtc,
        Self::Weth,
        Self::Usdc,
        Self::Usdt,
        Self::WstEth,
        Self::UsdcE,
        Self::Snx,
    ];

    pub const fn symbol(self) -> &'static str {
        match self {
            Self::WeEth => "weETH",
            Self::RswEth => "rswETH",
            Self::RsEth => "rsETH",
            Self::Usde => "USDe",
            Self::DeUsd => "deUSD",
            Self::Pyusd => "PYUSD",
            Self::SUsde => "sUSDe",
            Self::SolvBtc => "SolvBTC",
            Self::SolvBtcBbn => "SolvBTCBBN",
            Self::Lbtc => "LBTC",
            Self::Op => "OP",
            Self::Dai => "DAI",
            Self::SDai => "sDAI",
            Self::CbBtc => "cbBTC",
            Self::EBtc => "eBTC",
            Self::Aave => "AAVE",
            Self::Olas => "OLAS",
            Self::Drv => "DRV",
            Self::Wbtc => "WBTC",
            Self::Weth => "WETH",
            Self::Usdc => "USDC",
            Self::Usdt => "USDT",
            Self::WstEth => "wstETH",
            Self::UsdcE => "USDC.e",
            Self::Snx => "SNX",
        }
    }

    /// The governance token, bridged natively over LayerZero.
    pub const fn is_native(self) -> bool {
        matches!(self, Self::Drv)
    }
}

impl FromStr for Currency {
    type Err = UnknownCurrency;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|currency| currency.symbol().eq_ignore_ascii_case(value))
            .ok_or_else(|| UnknownCurrency(value.to_owned()))
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Bridging protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeType {
    /// LayerZero OFT transfers of the native token.
    LayerZero,
    /// Socket vault/controller transfers of every other currency.
    Socket,
}

impl BridgeType {
    pub const fn for_currency(currency: Currency) -> Self {
        if currency.is_native() {
            Self::LayerZero
        } else {
            Self::Socket
        }
    }
}

impl fmt::Display for BridgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LayerZero => f.write_str("LayerZero"),
            Self::Socket => f.write_str("Socket"),
        }
    }
}

/// Direction relative to the app-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Into the app-chain.
    Deposit,
    /// Out of the app-chain.
    Withdraw,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deposit => f.write_str("deposit"),
            Self::Withdraw => f.write_str("withdraw"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_ids_round_trip_through_their_numeric_id() {
        for chain in ChainId::ALL {
            assert_eq!(ChainId::try_from(chain.id()).unwrap(), chain);
        }
        assert!(ChainId::try_from(1101).is_err());
    }

    #[test]
    fn chains_parse_from_names_and_ids() {
        assert_eq!("Base".parse::<ChainId>().unwrap(), ChainId::Base);
        assert_eq!("957".parse::<ChainId>().unwrap(), ChainId::Derive);
        assert!("polygon".parse::<ChainId>().is_err());
    }

    #[test]
    fn chain_ids_serialize_as_numbers() {
        assert_eq!(serde_json::to_string(&ChainId::Arbitrum).unwrap(), "42161");
        assert_eq!(
            serde_json::from_str::<ChainId>("10").unwrap(),
            ChainId::Optimism
        );
    }

    #[test]
    fn currency_symbols_match_serde_names() {
        for currency in Currency::ALL {
            let json = serde_json::to_string(&currency).unwrap();
            assert_eq!(json, format!("\"{}\"", currency.symbol()));
            assert_eq!(currency.symbol().parse::<Currency>().unwrap(), currency);
        }
    }

    #[test]
    fn only_the_native_token_uses_layer_zero() {
        for currency in Currency::ALL {
            let expected = if currency == Currency::Drv {
                BridgeType::LayerZero
            } else {
                BridgeType::Socket
            };
            assert_eq!(BridgeType::for_currency(currency), expected);
        }
    }
}
