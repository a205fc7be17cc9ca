//! Address registry: per-chain, per-currency Socket route data plus the
//! protocol-level contracts the bridge calls.
//!
//! The `chains` section uses the socket-superbridge deployment layout:
//!
//! ```json
//! {
//!   "957": {
//!     "weETH": {
//!       "isAppChain": true,
//!       "isNewBridge": true,
//!       "Controller": "0x…",
//!       "MintableToken": "0x…",
//!       "LyraTSAShareHandlerDepositHook": "0x…",
//!       "connectors": { "8453": { "FAST": "0x…" } }
//!     }
//!   }
//! }
//! ```
//!
//! Chains and symbols this crate does not support are skipped. The registry
//! is read once at startup and never mutated.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use alloy::primitives::Address;
use serde::Deserialize;
use tracing::debug;

use crate::{ChainId, Currency};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to read address registry: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse address registry: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{currency} on {chain} has neither a Vault/NonMintableToken nor a Controller/MintableToken pair")]
    IncompleteRoute { chain: ChainId, currency: Currency },
}

/// Contracts of a route on one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteContracts {
    /// Lock side: funds are held by a vault on a non-app chain.
    Vault { vault: Address, token: Address },
    /// Mint side: a controller mints and burns the app-chain token.
    Controller {
        controller: Address,
        token: Address,
        deposit_hook: Option<Address>,
    },
}

/// Static Socket route configuration for one currency on one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRouteData {
    pub contracts: RouteContracts,
    pub is_new_bridge: bool,
    pub is_app_chain: bool,
    /// Counterpart chain -> speed tier -> connector.
    pub connectors: HashMap<ChainId, HashMap<String, Address>>,
}

impl TokenRouteData {
    pub const fn token(&self) -> Address {
        match self.contracts {
            RouteContracts::Vault { token, .. } | RouteContracts::Controller { token, .. } => token,
        }
    }

    pub fn connector(&self, counterpart: ChainId, speed_tier: &str) -> Option<Address> {
        self.connectors.get(&counterpart)?.get(speed_tier).copied()
    }
}

/// Protocol-level contracts that are not tied to a single currency.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolContracts {
    /// Socket withdraw wrapper on the app-chain.
    pub withdraw_wrapper: Address,
    /// LayerZero withdraw wrapper on the app-chain.
    pub oft_withdraw_wrapper: Address,
    /// L1 standard bridge on Ethereum, for gas funding.
    pub l1_standard_bridge: Address,
    /// Deposit helpers for old-style vaults, per chain.
    #[serde(default)]
    pub deposit_helpers: HashMap<ChainId, Address>,
    /// Socket contracts, per chain. Narrows target-side event filters.
    #[serde(default)]
    pub sockets: HashMap<ChainId, Address>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRoute {
    #[serde(default)]
    is_app_chain: bool,
    #[serde(default)]
    is_new_bridge: bool,
    #[serde(default)]
    connectors: BTreeMap<String, HashMap<String, Address>>,
    #[serde(rename = "Vault")]
    vault: Option<Address>,
    #[serde(rename = "NonMintableToken")]
    non_mintable_token: Option<Address>,
    #[serde(rename = "Controller")]
    controller: Option<Address>,
    #[serde(rename = "MintableToken")]
    mintable_token: Option<Address>,
    #[serde(rename = "LyraTSAShareHandlerDepositHook")]
    deposit_hook: Option<Address>,
}

#[derive(Deserialize)]
struct RawRegistry {
    contracts: ProtocolContracts,
    chains: BTreeMap<String, BTreeMap<String, RawRoute>>,
}

#[derive(Debug, Clone)]
pub struct AddressRegistry {
    contracts: ProtocolContracts,
    routes: HashMap<ChainId, HashMap<Currency, TokenRouteData>>,
}

impl AddressRegistry {
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let raw: RawRegistry = serde_json::from_str(json)?;
        let mut routes: HashMap<ChainId, HashMap<Currency, TokenRouteData>> = HashMap::new();

        for (chain_key, currencies) in raw.chains {
            let Some(chain) = parse_chain(&chain_key) else {
                debug!(chain = %chain_key, "Skipping unsupported chain in registry");
                continue;
            };

            for (symbol, raw_route) in currencies {
                let Ok(currency) = symbol.parse::<Currency>() else {
                    debug!(%chain, %symbol, "Skipping unsupported currency in registry");
                    continue;
                };

                let route = convert_route(chain, currency, raw_route)?;
                routes.entry(chain).or_default().insert(currency, route);
            }
        }

        Ok(Self {
            contracts: raw.contracts,
            routes,
        })
    }

    pub const fn contracts(&self) -> &ProtocolContracts {
        &self.contracts
    }

    pub fn route(&self, chain: ChainId, currency: Currency) -> Option<&TokenRouteData> {
        self.routes.get(&chain)?.get(&currency)
    }

    /// Every configured `(chain, currency)` pair.
    pub fn routes(&self) -> impl Iterator<Item = (ChainId, Currency, &TokenRouteData)> {
        self.routes.iter().flat_map(|(chain, currencies)| {
            currencies
                .iter()
                .map(move |(currency, route)| (*chain, *currency, route))
        })
    }
}

fn parse_chain(key: &str) -> Option<ChainId> {
    key.parse::<u64>().ok().and_then(|id| ChainId::try_from(id).ok())
}

fn convert_route(
    chain: ChainId,
    currency: Currency,
    raw: RawRoute,
) -> Result<TokenRouteData, RegistryError> {
    let contracts = match raw {
        RawRoute {
            controller: Some(controller),
            mintable_token: Some(token),
            deposit_hook,
            ..
        } => RouteContracts::Controller {
            controller,
            token,
            deposit_hook,
        },
        RawRoute {
            vault: Some(vault),
            non_mintable_token: Some(token),
            ..
        } => RouteContracts::Vault { vault, token },
        _ => return Err(RegistryError::IncompleteRoute { chain, currency }),
    };

    let connectors = raw
        .connectors
        .into_iter()
        .filter_map(|(key, tiers)| parse_chain(&key).map(|counterpart| (counterpart, tiers)))
        .collect();

    Ok(TokenRouteData {
        contracts,
        is_new_bridge: raw.is_new_bridge,
        is_app_chain: raw.is_app_chain,
        connectors,
    })
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;

    use super::*;

    const FIXTURE: &str = include_str!("../tests/fixtures/registry.json");

    #[test]
    fn parses_vault_and_controller_routes() {
        let registry = AddressRegistry::from_json(FIXTURE).unwrap();

        let vault = registry.route(ChainId::Base, Currency::WeEth).unwrap();
        assert!(matches!(vault.contracts, RouteContracts::Vault { .. }));
        assert!(vault.is_new_bridge);
        assert!(!vault.is_app_chain);
        assert_eq!(
            vault.connector(ChainId::Derive, "FAST"),
            Some(address!("0xba5e00000000000000000000000000000000c0de"))
        );

        let controller = registry.route(ChainId::Derive, Currency::WeEth).unwrap();
        let RouteContracts::Controller { deposit_hook, .. } = controller.contracts else {
            panic!("expected controller route");
        };
        assert!(deposit_hook.is_some());
        assert!(controller.is_app_chain);
    }

    #[test]
    fn skips_unknown_chains_and_symbols() {
        let registry = AddressRegistry::from_json(FIXTURE).unwrap();

        let mut pairs = registry
            .routes()
            .map(|(chain, currency, _)| (chain, currency))
            .collect::<Vec<_>>();
        pairs.sort();

        assert_eq!(
            pairs,
            vec![
                (ChainId::Eth, Currency::Usdc),
                (ChainId::Derive, Currency::WeEth),
                (ChainId::Derive, Currency::Usdc),
                (ChainId::Base, Currency::WeEth),
                (ChainId::Arbitrum, Currency::WeEth),
            ]
        );
    }

    #[test]
    fn missing_connector_tier_is_none() {
        let registry = AddressRegistry::from_json(FIXTURE).unwrap();
        let route = registry.route(ChainId::Base, Currency::WeEth).unwrap();

        assert_eq!(route.connector(ChainId::Derive, "SLOW"), None);
        assert_eq!(route.connector(ChainId::Arbitrum, "FAST"), None);
    }

    #[test]
    fn rejects_routes_without_contract_pair() {
        let json = r#"{
            "contracts": {
                "withdrawWrapper": "0x0000000000000000000000000000000000000001",
                "oftWithdrawWrapper": "0x0000000000000000000000000000000000000002",
                "l1StandardBridge": "0x0000000000000000000000000000000000000003"
            },
            "chains": {
                "8453": { "USDC": { "Vault": "0x0000000000000000000000000000000000000004" } }
            }
        }"#;

        let err = AddressRegistry::from_json(json).unwrap_err();

        assert!(matches!(
            err,
            RegistryError::IncompleteRoute {
                chain: ChainId::Base,
                currency: Currency::Usdc
            }
        ));
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, FIXTURE).unwrap();

        let registry = AddressRegistry::load(&path).unwrap();

        assert_eq!(
            registry.contracts().deposit_helpers.get(&ChainId::Eth),
            Some(&address!("0xde90000000000000000000000000000000000001"))
        );
    }
}
