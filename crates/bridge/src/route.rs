//! Route resolution: which protocol, which contracts and which connections
//! a bridge operation uses.
//!
//! The native token always goes over LayerZero and everything else over
//! Socket. Asking for the other protocol is an error rather than a silent
//! switch. Resolved contexts are memoized per
//! `(direction, protocol, currency, source, target)`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use alloy::primitives::{Address, B256};
use alloy::sol_types::SolEvent;
use derive_evm::Chain;
use tracing::debug;

use crate::contracts::{IOFT, ISocket, drv_token};
use crate::error::{BridgeRouteError, LogPosition, RouteSide};
use crate::registry::{AddressRegistry, RouteContracts, TokenRouteData};
use crate::{BridgeType, ChainId, Currency, Direction};

/// One shared connection per chain.
pub type ChainConnections = HashMap<ChainId, Arc<dyn Chain>>;

/// An event used to correlate the two legs of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventDescriptor {
    pub name: &'static str,
    pub signature: B256,
}

impl EventDescriptor {
    const fn of<E: SolEvent>() -> Self {
        Self {
            name: E::SIGNATURE,
            signature: E::SIGNATURE_HASH,
        }
    }
}

/// LayerZero OFT transfer of the native token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OftRoute {
    pub source_token: Address,
    pub target_token: Address,
    pub destination_eid: u32,
}

/// Socket vault/controller transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketRoute {
    pub source: TokenRouteData,
    pub target: TokenRouteData,
    /// Source-side connector towards the target chain.
    pub connector: Address,
    /// Socket contract on the target chain, when known.
    pub target_socket: Option<Address>,
    /// Helper for old-style vault deposits.
    pub deposit_helper: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolRoute {
    LayerZero(OftRoute),
    Socket(SocketRoute),
}

impl ProtocolRoute {
    pub const fn bridge_type(&self) -> BridgeType {
        match self {
            Self::LayerZero(_) => BridgeType::LayerZero,
            Self::Socket(_) => BridgeType::Socket,
        }
    }

    /// Event in the source receipt carrying the correlation id, and where
    /// it sits among the receipt's logs.
    pub const fn source_event(&self) -> (EventDescriptor, LogPosition) {
        match self {
            Self::LayerZero(_) => (EventDescriptor::of::<IOFT::OFTSent>(), LogPosition::Last),
            Self::Socket(_) => (
                EventDescriptor::of::<ISocket::MessageOutbound>(),
                LogPosition::SecondToLast,
            ),
        }
    }

    /// Event emitted on the target chain once the message is delivered.
    pub const fn target_event(&self) -> EventDescriptor {
        match self {
            Self::LayerZero(_) => EventDescriptor::of::<IOFT::OFTReceived>(),
            Self::Socket(_) => EventDescriptor::of::<ISocket::ExecutionSuccess>(),
        }
    }

    /// ERC-20 the signer spends on the source chain.
    pub const fn source_token(&self) -> Address {
        match self {
            Self::LayerZero(route) => route.source_token,
            Self::Socket(route) => route.source.token(),
        }
    }
}

/// Everything one bridge operation needs, resolved up front.
#[derive(Clone)]
pub struct BridgeContext {
    pub direction: Direction,
    pub currency: Currency,
    pub source_chain: ChainId,
    pub target_chain: ChainId,
    pub source: Arc<dyn Chain>,
    pub target: Arc<dyn Chain>,
    pub protocol: ProtocolRoute,
}

impl BridgeContext {
    pub const fn bridge_type(&self) -> BridgeType {
        self.protocol.bridge_type()
    }
}

impl fmt::Debug for BridgeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeContext")
            .field("direction", &self.direction)
            .field("currency", &self.currency)
            .field("source_chain", &self.source_chain)
            .field("target_chain", &self.target_chain)
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

type RouteKey = (Direction, BridgeType, Currency, ChainId, ChainId);

pub struct RouteResolver {
    registry: Arc<AddressRegistry>,
    connections: ChainConnections,
    speed_tier: String,
    resolved: Mutex<HashMap<RouteKey, Arc<BridgeContext>>>,
}

impl fmt::Debug for RouteResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chains = self.connections.keys().collect::<Vec<_>>();
        chains.sort();
        f.debug_struct("RouteResolver")
            .field("chains", &chains)
            .field("speed_tier", &self.speed_tier)
            .finish_non_exhaustive()
    }
}

impl RouteResolver {
    pub fn new(
        registry: Arc<AddressRegistry>,
        connections: ChainConnections,
        speed_tier: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            connections,
            speed_tier: speed_tier.into(),
            resolved: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &AddressRegistry {
        &self.registry
    }

    pub fn connection(&self, chain: ChainId) -> Result<Arc<dyn Chain>, BridgeRouteError> {
        self.connections
            .get(&chain)
            .cloned()
            .ok_or(BridgeRouteError::ChainNotConfigured { chain })
    }

    pub fn resolve(
        &self,
        direction: Direction,
        bridge_type: BridgeType,
        currency: Currency,
        source_chain: ChainId,
        target_chain: ChainId,
    ) -> Result<Arc<BridgeContext>, BridgeRouteError> {
        let key = (direction, bridge_type, currency, source_chain, target_chain);

        if let Some(context) = self.memo().get(&key) {
            return Ok(Arc::clone(context));
        }

        let context = Arc::new(self.resolve_uncached(
            direction,
            bridge_type,
            currency,
            source_chain,
            target_chain,
        )?);

        debug!(%direction, %currency, %source_chain, %target_chain, protocol = %bridge_type, "Resolved bridge route");

        Ok(Arc::clone(self.memo().entry(key).or_insert(context)))
    }

    fn memo(&self) -> std::sync::MutexGuard<'_, HashMap<RouteKey, Arc<BridgeContext>>> {
        self.resolved.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve_uncached(
        &self,
        direction: Direction,
        bridge_type: BridgeType,
        currency: Currency,
        source_chain: ChainId,
        target_chain: ChainId,
    ) -> Result<BridgeContext, BridgeRouteError> {
        let expected = BridgeType::for_currency(currency);
        if bridge_type != expected {
            return Err(BridgeRouteError::ProtocolMismatch {
                currency,
                requested: bridge_type,
                expected,
            });
        }

        let consistent = match direction {
            Direction::Deposit => !source_chain.is_app_chain() && target_chain.is_app_chain(),
            Direction::Withdraw => source_chain.is_app_chain() && !target_chain.is_app_chain(),
        };
        if !consistent {
            return Err(BridgeRouteError::DirectionMismatch {
                direction,
                source_chain,
                target_chain,
            });
        }

        let source = self.connection(source_chain)?;
        let target = self.connection(target_chain)?;

        let protocol = match expected {
            BridgeType::LayerZero => ProtocolRoute::LayerZero(oft_route(source_chain, target_chain)?),
            BridgeType::Socket => ProtocolRoute::Socket(self.socket_route(
                direction,
                currency,
                source_chain,
                target_chain,
            )?),
        };

        Ok(BridgeContext {
            direction,
            currency,
            source_chain,
            target_chain,
            source,
            target,
            protocol,
        })
    }

    fn socket_route(
        &self,
        direction: Direction,
        currency: Currency,
        source_chain: ChainId,
        target_chain: ChainId,
    ) -> Result<SocketRoute, BridgeRouteError> {
        let lookup = |side, chain| {
            self.registry
                .route(chain, currency)
                .cloned()
                .ok_or(BridgeRouteError::MissingRoute {
                    side,
                    chain,
                    currency,
                })
        };
        let source = lookup(RouteSide::Source, source_chain)?;
        let target = lookup(RouteSide::Target, target_chain)?;

        let (source_is_vault, target_is_vault) = match direction {
            Direction::Deposit => (true, false),
            Direction::Withdraw => (false, true),
        };
        for (side, chain, route, want_vault) in [
            (RouteSide::Source, source_chain, &source, source_is_vault),
            (RouteSide::Target, target_chain, &target, target_is_vault),
        ] {
            if matches!(route.contracts, RouteContracts::Vault { .. }) != want_vault {
                return Err(BridgeRouteError::UnexpectedRouteKind {
                    side,
                    chain,
                    currency,
                });
            }
        }

        let connector = source
            .connector(target_chain, &self.speed_tier)
            .ok_or_else(|| BridgeRouteError::MissingConnector {
                currency,
                chain: source_chain,
                counterpart: target_chain,
                tier: self.speed_tier.clone(),
            })?;

        let contracts = self.registry.contracts();
        let deposit_helper = if direction == Direction::Deposit && !source.is_new_bridge {
            let helper = contracts
                .deposit_helpers
                .get(&source_chain)
                .copied()
                .ok_or(BridgeRouteError::MissingDepositHelper {
                    chain: source_chain,
                })?;
            Some(helper)
        } else {
            None
        };

        Ok(SocketRoute {
            source,
            target,
            connector,
            target_socket: contracts.sockets.get(&target_chain).copied(),
            deposit_helper,
        })
    }
}

fn oft_route(source_chain: ChainId, target_chain: ChainId) -> Result<OftRoute, BridgeRouteError> {
    let unavailable = |side, chain| BridgeRouteError::NativeTokenUnavailable { side, chain };

    let source_token =
        drv_token(source_chain).ok_or_else(|| unavailable(RouteSide::Source, source_chain))?;
    let target_token =
        drv_token(target_chain).ok_or_else(|| unavailable(RouteSide::Target, target_chain))?;
    let destination_eid = target_chain
        .layer_zero_eid()
        .ok_or_else(|| unavailable(RouteSide::Target, target_chain))?;

    Ok(OftRoute {
        source_token,
        target_token,
        destination_eid,
    })
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;
    use derive_evm::mock::MockChain;

    use super::*;

    const FIXTURE: &str = include_str!("../tests/fixtures/registry.json");

    fn resolver() -> RouteResolver {
        let registry = Arc::new(AddressRegistry::from_json(FIXTURE).unwrap());
        let connections = ChainId::ALL
            .into_iter()
            .map(|chain| (chain, Arc::new(MockChain::new(chain.id())) as Arc<dyn Chain>))
            .collect();
        RouteResolver::new(registry, connections, "FAST")
    }

    #[test]
    fn every_registry_connector_resolves() {
        let resolver = resolver();
        let registry = AddressRegistry::from_json(FIXTURE).unwrap();

        let mut resolved = 0;
        for (chain, currency, route) in registry.routes() {
            for counterpart in route.connectors.keys().copied() {
                let direction = if chain.is_app_chain() {
                    Direction::Withdraw
                } else {
                    Direction::Deposit
                };

                let context = resolver
                    .resolve(direction, BridgeType::Socket, currency, chain, counterpart)
                    .unwrap();

                assert_eq!(context.source_chain, chain);
                assert_eq!(context.target_chain, counterpart);
                assert_eq!(context.bridge_type(), BridgeType::Socket);
                resolved += 1;
            }
        }

        assert_eq!(resolved, 6);
    }

    #[test]
    fn absent_pairs_name_the_missing_side() {
        let resolver = resolver();

        let err = resolver
            .resolve(
                Direction::Deposit,
                BridgeType::Socket,
                Currency::Usdc,
                ChainId::Base,
                ChainId::Derive,
            )
            .unwrap_err();
        assert_eq!(
            err,
            BridgeRouteError::MissingRoute {
                side: RouteSide::Source,
                chain: ChainId::Base,
                currency: Currency::Usdc,
            }
        );

        let err = resolver
            .resolve(
                Direction::Withdraw,
                BridgeType::Socket,
                Currency::Usdc,
                ChainId::Derive,
                ChainId::Arbitrum,
            )
            .unwrap_err();
        assert_eq!(
            err,
            BridgeRouteError::MissingRoute {
                side: RouteSide::Target,
                chain: ChainId::Arbitrum,
                currency: Currency::Usdc,
            }
        );
    }

    #[test]
    fn rejects_wrong_protocol_for_currency() {
        let err = resolver()
            .resolve(
                Direction::Deposit,
                BridgeType::Socket,
                Currency::Drv,
                ChainId::Base,
                ChainId::Derive,
            )
            .unwrap_err();

        assert!(matches!(
            err,
            BridgeRouteError::ProtocolMismatch {
                expected: BridgeType::LayerZero,
                ..
            }
        ));
    }

    #[test]
    fn rejects_deposit_away_from_app_chain() {
        let err = resolver()
            .resolve(
                Direction::Deposit,
                BridgeType::Socket,
                Currency::WeEth,
                ChainId::Derive,
                ChainId::Base,
            )
            .unwrap_err();

        assert!(matches!(err, BridgeRouteError::DirectionMismatch { .. }));
    }

    #[test]
    fn missing_connector_tier_is_reported() {
        let registry = Arc::new(AddressRegistry::from_json(FIXTURE).unwrap());
        let connections = [ChainId::Base, ChainId::Derive]
            .into_iter()
            .map(|chain| (chain, Arc::new(MockChain::new(chain.id())) as Arc<dyn Chain>))
            .collect();
        let resolver = RouteResolver::new(registry, connections, "SLOW");

        let err = resolver
            .resolve(
                Direction::Deposit,
                BridgeType::Socket,
                Currency::WeEth,
                ChainId::Base,
                ChainId::Derive,
            )
            .unwrap_err();

        assert!(matches!(err, BridgeRouteError::MissingConnector { ref tier, .. } if tier == "SLOW"));
    }

    #[test]
    fn native_token_uses_layer_zero_endpoints() {
        let context = resolver()
            .resolve(
                Direction::Withdraw,
                BridgeType::LayerZero,
                Currency::Drv,
                ChainId::Derive,
                ChainId::Base,
            )
            .unwrap();

        let ProtocolRoute::LayerZero(route) = &context.protocol else {
            panic!("expected LayerZero route");
        };
        assert_eq!(route.destination_eid, 30184);
        assert_eq!(Some(route.source_token), drv_token(ChainId::Derive));
        assert_eq!(context.protocol.source_event().1, LogPosition::Last);
    }

    #[test]
    fn native_token_unavailable_on_chain_without_deployment() {
        let err = resolver()
            .resolve(
                Direction::Deposit,
                BridgeType::LayerZero,
                Currency::Drv,
                ChainId::Mode,
                ChainId::Derive,
            )
            .unwrap_err();

        assert_eq!(
            err,
            BridgeRouteError::NativeTokenUnavailable {
                side: RouteSide::Source,
                chain: ChainId::Mode,
            }
        );
    }

    #[test]
    fn old_style_deposits_use_the_deposit_helper() {
        let context = resolver()
            .resolve(
                Direction::Deposit,
                BridgeType::Socket,
                Currency::Usdc,
                ChainId::Eth,
                ChainId::Derive,
            )
            .unwrap();

        let ProtocolRoute::Socket(route) = &context.protocol else {
            panic!("expected Socket route");
        };
        assert_eq!(
            route.deposit_helper,
            Some(address!("0xde90000000000000000000000000000000000001"))
        );
        assert_eq!(
            route.target_socket,
            Some(address!("0x50c0000000000000000000000000000000000957"))
        );
    }

    #[test]
    fn repeated_resolution_is_memoized() {
        let resolver = resolver();
        let resolve = || {
            resolver
                .resolve(
                    Direction::Deposit,
                    BridgeType::Socket,
                    Currency::WeEth,
                    ChainId::Base,
                    ChainId::Derive,
                )
                .unwrap()
        };

        assert!(Arc::ptr_eq(&resolve(), &resolve()));
    }

    #[test]
    fn unconfigured_chain_is_an_error() {
        let registry = Arc::new(AddressRegistry::from_json(FIXTURE).unwrap());
        let resolver = RouteResolver::new(registry, HashMap::new(), "FAST");

        let err = resolver
            .resolve(
                Direction::Deposit,
                BridgeType::Socket,
                Currency::WeEth,
                ChainId::Base,
                ChainId::Derive,
            )
            .unwrap_err();

        assert_eq!(
            err,
            BridgeRouteError::ChainNotConfigured {
                chain: ChainId::Base
            }
        );
    }
}
