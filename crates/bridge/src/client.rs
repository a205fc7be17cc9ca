//! Bridge orchestrator.
//!
//! A transfer runs `PREPARING -> SIGNED -> SUBMITTED -> SOURCE_CONFIRMING ->
//! SOURCE_FINAL -> CORRELATING -> TARGET_OBSERVED -> TARGET_CONFIRMING ->
//! DONE`. [`BridgeClient::prepare_deposit`] and
//! [`BridgeClient::prepare_withdrawal`] return a signed transaction,
//! [`BridgeClient::submit`] broadcasts it and [`BridgeClient::poll_progress`]
//! advances whatever is still missing. `poll_progress` never resubmits, so it
//! can be called again after a failure or from another process with a
//! deserialized [`BridgeTxResult`].
//!
//! Deposits are sent by the signer EOA and credited to the funding wallet
//! on the app-chain. Withdrawals are executed by the funding wallet (a
//! LightAccount owned by the signer) as an `approve + withdrawToChain` batch
//! and paid out to the signer.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolCall;
use backon::{ExponentialBuilder, Retryable};
use derive_evm::builder::{ContractCall, SignedTx, TxBuilder};
use derive_evm::finality::{self, send_and_confirm, wait_for_finality};
use derive_evm::{Chain, EvmError, Receipt, view};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::contracts::{
    IDepositHelper, IERC20, IL1StandardBridge, ILightAccount, ILiquidityPool, IOFT,
    IOftWithdrawWrapper, ISocketController, ISocketVault, ISocketVaultV0, IWithdrawWrapper,
    SendParam,
};
use crate::correlate::{extract_correlation_id, find_target_event};
use crate::error::{BridgeError, BridgeRouteError, PartialBridgeError, RouteSide};
use crate::registry::RouteContracts;
use crate::result::{BridgeStage, BridgeTxResult, TxResult};
use crate::route::{BridgeContext, OftRoute, ProtocolRoute, RouteResolver, SocketRoute};
use crate::settings::BridgeSettings;
use crate::{BridgeType, ChainId, Currency, Direction};

/// A signed, not yet broadcast, bridge transaction.
#[derive(Debug, Clone)]
pub struct PreparedBridgeTx {
    pub context: Arc<BridgeContext>,
    pub amount: U256,
    pub tx: SignedTx,
    /// Approval confirmed while preparing, if one was needed.
    pub approval: Option<TxHash>,
}

#[derive(Debug)]
pub struct BridgeClient {
    resolver: Arc<RouteResolver>,
    signer: PrivateKeySigner,
    wallet: Address,
    builder: TxBuilder,
    settings: BridgeSettings,
    cancel: CancellationToken,
}

impl BridgeClient {
    /// Creates a client for `signer` and its app-chain funding `wallet`.
    ///
    /// Fails with [`BridgeError::SecondarySigner`] unless the signer owns the
    /// wallet: session keys cannot execute withdrawals.
    pub async fn connect(
        resolver: Arc<RouteResolver>,
        signer: PrivateKeySigner,
        wallet: Address,
        builder: TxBuilder,
        settings: BridgeSettings,
        cancel: CancellationToken,
    ) -> Result<Self, BridgeError> {
        let app_chain = resolver.connection(ChainId::Derive)?;
        let owner = view(app_chain.as_ref(), wallet, ILightAccount::ownerCall {}).await?;

        if owner != signer.address() {
            return Err(BridgeError::SecondarySigner {
                owner,
                signer: signer.address(),
            });
        }

        info!(signer = %signer.address(), %wallet, "Bridge client ready");

        Ok(Self {
            resolver,
            signer,
            wallet,
            builder,
            settings,
            cancel,
        })
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    pub const fn wallet(&self) -> Address {
        self.wallet
    }

    pub fn resolver(&self) -> &RouteResolver {
        &self.resolver
    }

    /// Resolves the route for moving `currency` between `source_chain` and
    /// `target_chain`. Exactly one side must be the app-chain.
    pub fn route(
        &self,
        currency: Currency,
        source_chain: ChainId,
        target_chain: ChainId,
    ) -> Result<Arc<BridgeContext>, BridgeRouteError> {
        let direction = if target_chain.is_app_chain() {
            Direction::Deposit
        } else {
            Direction::Withdraw
        };

        self.resolver.resolve(
            direction,
            BridgeType::for_currency(currency),
            currency,
            source_chain,
            target_chain,
        )
    }

    /// Decimals of the token spent on the source chain of `context`.
    pub async fn token_decimals(&self, context: &BridgeContext) -> Result<u8, BridgeError> {
        let token = context.protocol.source_token();
        Ok(view(context.source.as_ref(), token, IERC20::decimalsCall {}).await?)
    }

    /// Prepares a deposit of `amount` from `source_chain` into the app-chain
    /// funding wallet.
    #[tracing::instrument(skip(self), fields(signer = %self.signer.address()), level = tracing::Level::DEBUG)]
    pub async fn prepare_deposit(
        &self,
        amount: U256,
        currency: Currency,
        source_chain: ChainId,
    ) -> Result<PreparedBridgeTx, BridgeError> {
        let context = self.resolver.resolve(
            Direction::Deposit,
            BridgeType::for_currency(currency),
            currency,
            source_chain,
            ChainId::Derive,
        )?;
        let chain = context.source.as_ref();
        let token = context.protocol.source_token();

        self.require_token_balance(chain, token, self.signer.address(), amount)
            .await?;

        let (call, value, approval) = match &context.protocol {
            ProtocolRoute::LayerZero(route) => self.oft_deposit_call(chain, route, amount).await?,
            ProtocolRoute::Socket(route) => {
                self.socket_deposit_call(chain, source_chain, currency, route, amount)
                    .await?
            }
        };

        let tx = self.builder.build(chain, &self.signer, &call, value).await?;
        info!(tx_hash = %tx.tx_hash, %amount, %value, "Deposit transaction signed");

        Ok(PreparedBridgeTx {
            context,
            amount,
            tx,
            approval,
        })
    }

    async fn oft_deposit_call(
        &self,
        chain: &dyn Chain,
        route: &OftRoute,
        amount: U256,
    ) -> Result<(ContractCall, U256, Option<TxHash>), BridgeError> {
        let token = route.source_token;
        let approval = self.ensure_allowance(chain, token, token, amount).await?;

        let send_param = SendParam {
            dstEid: route.destination_eid,
            to: self.wallet.into_word(),
            amountLD: amount,
            minAmountLD: U256::ZERO,
            extraOptions: Bytes::new(),
            composeMsg: Bytes::new(),
            oftCmd: Bytes::new(),
        };

        let fee = view(
            chain,
            token,
            IOFT::quoteSendCall {
                sendParam: send_param.clone(),
                payInLzToken: false,
            },
        )
        .await?;
        debug!(native_fee = %fee.nativeFee, "Quoted LayerZero fee");

        let value = fee.nativeFee;
        let call = ContractCall::new(
            token,
            &IOFT::sendCall {
                sendParam: send_param,
                fee,
                refundAddress: self.signer.address(),
            },
        );

        Ok((call, value, approval))
    }

    async fn socket_deposit_call(
        &self,
        chain: &dyn Chain,
        source_chain: ChainId,
        currency: Currency,
        route: &SocketRoute,
        amount: U256,
    ) -> Result<(ContractCall, U256, Option<TxHash>), BridgeError> {
        let RouteContracts::Vault { vault, token } = route.source.contracts else {
            return Err(BridgeRouteError::UnexpectedRouteKind {
                side: RouteSide::Source,
                chain: source_chain,
                currency,
            }
            .into());
        };
        let msg_gas_limit = U256::from(self.settings.msg_gas_limit);

        if route.source.is_new_bridge {
            let approval = self.ensure_allowance(chain, token, vault, amount).await?;
            let fee = view(
                chain,
                vault,
                ISocketVault::getMinFeesCall {
                    connector_: route.connector,
                    msgGasLimit_: msg_gas_limit,
                    payloadSize_: U256::from(self.settings.payload_size),
                },
            )
            .await?;
            debug!(%fee, %vault, "Quoted Socket fee");

            let call = ContractCall::new(
                vault,
                &ISocketVault::bridgeCall {
                    receiver_: self.wallet,
                    amount_: amount,
                    msgGasLimit_: msg_gas_limit,
                    connector_: route.connector,
                    extraData_: Bytes::new(),
                    options_: Bytes::new(),
                },
            );
            return Ok((call, fee + U256::from(1), approval));
        }

        let helper = route
            .deposit_helper
            .ok_or(BridgeRouteError::MissingDepositHelper { chain: source_chain })?;
        let approval = self.ensure_allowance(chain, token, helper, amount).await?;
        let fee = view(
            chain,
            vault,
            ISocketVaultV0::getMinFeesCall {
                connector_: route.connector,
                msgGasLimit_: msg_gas_limit,
            },
        )
        .await?;
        debug!(%fee, %vault, %helper, "Quoted Socket fee for old-style vault");

        let call = ContractCall::new(
            helper,
            &IDepositHelper::depositToLyraCall {
                token,
                socketVault: vault,
                isSCW: true,
                amount,
                gasLimit: msg_gas_limit,
                connector: route.connector,
            },
        );
        Ok((call, fee + U256::from(1), approval))
    }

    /// Prepares a withdrawal of `amount` from the app-chain funding wallet to
    /// the signer on `target_chain`.
    ///
    /// Checks run before anything is built: wallet balance, then the
    /// protocol fee (native token) or destination pool liquidity (Socket).
    /// App-chain gas is topped up last, since that sends a transaction.
    #[tracing::instrument(skip(self), fields(wallet = %self.wallet), level = tracing::Level::DEBUG)]
    pub async fn prepare_withdrawal(
        &self,
        amount: U256,
        currency: Currency,
        target_chain: ChainId,
    ) -> Result<PreparedBridgeTx, BridgeError> {
        let context = self.resolver.resolve(
            Direction::Withdraw,
            BridgeType::for_currency(currency),
            currency,
            ChainId::Derive,
            target_chain,
        )?;
        let chain = context.source.as_ref();
        let token = context.protocol.source_token();
        let contracts = self.resolver.registry().contracts();

        self.require_token_balance(chain, token, self.wallet, amount)
            .await?;

        let (wrapper, withdraw) = match &context.protocol {
            ProtocolRoute::LayerZero(route) => {
                let wrapper = contracts.oft_withdraw_wrapper;
                let fee = view(
                    chain,
                    wrapper,
                    IOftWithdrawWrapper::getFeeInTokenCall {
                        token,
                        amount,
                        destEID: route.destination_eid,
                    },
                )
                .await?;

                if amount < fee {
                    return Err(BridgeError::AmountBelowFee { amount, fee });
                }

                let withdraw = IOftWithdrawWrapper::withdrawToChainCall {
                    token,
                    amount,
                    toAddress: self.signer.address(),
                    destEID: route.destination_eid,
                };
                (wrapper, withdraw.abi_encode())
            }
            ProtocolRoute::Socket(route) => {
                let controller = self.check_pool_liquidity(chain, &context, route, amount).await?;

                let withdraw = IWithdrawWrapper::withdrawToChainCall {
                    token,
                    amount,
                    recipient: self.signer.address(),
                    socketController: controller,
                    connector: route.connector,
                    gasLimit: U256::from(self.settings.msg_gas_limit),
                };
                (contracts.withdraw_wrapper, withdraw.abi_encode())
            }
        };

        self.ensure_app_chain_gas().await?;

        let approve = IERC20::approveCall {
            spender: wrapper,
            amount,
        };
        let call = ContractCall::new(
            self.wallet,
            &ILightAccount::executeBatchCall {
                dest: vec![token, wrapper],
                func: vec![approve.abi_encode().into(), withdraw.into()],
            },
        );

        let tx = self.builder.build(chain, &self.signer, &call, U256::ZERO).await?;
        info!(tx_hash = %tx.tx_hash, %amount, %wrapper, "Withdrawal transaction signed");

        Ok(PreparedBridgeTx {
            context,
            amount,
            tx,
            approval: None,
        })
    }

    /// Fails unless the destination pool has `amount` locked for this
    /// connector. Returns the controller to withdraw through.
    async fn check_pool_liquidity(
        &self,
        chain: &dyn Chain,
        context: &BridgeContext,
        route: &SocketRoute,
        amount: U256,
    ) -> Result<Address, BridgeError> {
        let RouteContracts::Controller {
            controller,
            deposit_hook,
            ..
        } = route.source.contracts
        else {
            return Err(BridgeRouteError::UnexpectedRouteKind {
                side: RouteSide::Source,
                chain: context.source_chain,
                currency: context.currency,
            }
            .into());
        };

        let pool = if route.source.is_new_bridge {
            let hook = view(chain, controller, ISocketController::hook__Call {}).await?;
            if let Some(expected) = deposit_hook
                && expected != hook
            {
                return Err(BridgeError::DepositHookMismatch {
                    expected,
                    actual: hook,
                });
            }
            hook
        } else {
            controller
        };

        let pool_id = view(
            chain,
            pool,
            ILiquidityPool::connectorPoolIdsCall {
                connector: route.connector,
            },
        )
        .await?;
        let locked = view(
            chain,
            pool,
            ILiquidityPool::poolLockedAmountsCall { poolId: pool_id },
        )
        .await?;

        debug!(%pool, %pool_id, %locked, "Checked destination pool liquidity");

        if locked < amount {
            return Err(BridgeError::InsufficientPoolLiquidity {
                locked,
                required: amount,
            });
        }

        Ok(controller)
    }

    /// Broadcasts a prepared transaction.
    ///
    /// The target-chain head is read first so the later event scan cannot
    /// miss a delivery that lands before polling starts.
    #[tracing::instrument(skip_all, fields(tx_hash = %prepared.tx.tx_hash), level = tracing::Level::DEBUG)]
    pub async fn submit(&self, prepared: &PreparedBridgeTx) -> Result<BridgeTxResult, PartialBridgeError> {
        let context = &prepared.context;

        let target_from_block = (|| async { context.target.block_number().await })
            .retry(self.rpc_retry())
            .when(EvmError::is_transient)
            .await
            .map_err(|err| PartialBridgeError::new(BridgeStage::Signed, None, err))?;

        let tx_hash = finality::send(context.source.as_ref(), &prepared.tx)
            .await
            .map_err(|err| PartialBridgeError::new(BridgeStage::Submitted, None, err))?;

        info!(
            %tx_hash,
            currency = %context.currency,
            source = %context.source_chain,
            target = %context.target_chain,
            target_from_block,
            "Bridge transaction submitted"
        );

        Ok(BridgeTxResult {
            currency: context.currency,
            bridge_type: context.bridge_type(),
            direction: context.direction,
            source_chain: context.source_chain,
            target_chain: context.target_chain,
            source_tx: TxResult::submitted(tx_hash),
            target_tx: TxResult::default(),
            target_from_block,
            correlation_id: None,
        })
    }

    /// Advances `result` as far as possible: source finality, correlation
    /// id, target event, target finality. Already-completed steps are
    /// skipped and nothing is ever resubmitted.
    ///
    /// A reverted source transaction ends the pipeline with status FAILED
    /// without touching the target chain.
    #[tracing::instrument(skip_all, fields(source_tx = ?result.source_tx.tx_hash, stage = %result.stage()), level = tracing::Level::DEBUG)]
    pub async fn poll_progress(
        &self,
        mut result: BridgeTxResult,
    ) -> Result<BridgeTxResult, PartialBridgeError> {
        if result.is_final() {
            return Ok(result);
        }

        let context = match self.resolver.resolve(
            result.direction,
            result.bridge_type,
            result.currency,
            result.source_chain,
            result.target_chain,
        ) {
            Ok(context) => context,
            Err(err) => return Err(PartialBridgeError::new(result.stage(), Some(result), err)),
        };

        match self.advance(&context, &mut result).await {
            Ok(()) => Ok(result),
            Err(error) => {
                let stage = result.stage();
                warn!(%stage, %error, "Bridge progress stopped");
                Err(PartialBridgeError::new(stage, Some(result), error))
            }
        }
    }

    async fn advance(&self, context: &BridgeContext, result: &mut BridgeTxResult) -> Result<(), BridgeError> {
        let source_receipt = match result.source_tx.receipt.clone() {
            Some(receipt) => receipt,
            None => {
                let tx_hash = result.source_tx.tx_hash.ok_or(BridgeError::MissingSourceTxHash)?;
                let receipt = wait_for_finality(
                    context.source.as_ref(),
                    tx_hash,
                    &self.settings.source_finality,
                    &self.cancel,
                )
                .await?;
                result.source_tx.receipt = Some(receipt.clone());
                receipt
            }
        };

        if !source_receipt.status {
            warn!(tx_hash = %source_receipt.tx_hash, "Source transaction reverted, not polling target chain");
            return Ok(());
        }

        let id = match result.correlation_id {
            Some(id) => id,
            None => {
                let id = extract_correlation_id(&context.protocol, &source_receipt)?;
                result.correlation_id = Some(id);
                id
            }
        };

        let target_hash = match result.target_tx.tx_hash {
            Some(tx_hash) => tx_hash,
            None => {
                let log = find_target_event(
                    context,
                    id,
                    result.target_from_block,
                    &self.settings.event_scan,
                    &self.cancel,
                )
                .await?;
                let tx_hash = log.transaction_hash.ok_or(BridgeError::MissingTargetTxHash)?;
                info!(stage = %BridgeStage::TargetObserved, %tx_hash, block = ?log.block_number, "Target event observed");
                result.target_tx.tx_hash = Some(tx_hash);
                tx_hash
            }
        };

        if result.target_tx.receipt.is_none() {
            let receipt = wait_for_finality(
                context.target.as_ref(),
                target_hash,
                &self.settings.target_finality,
                &self.cancel,
            )
            .await?;
            result.target_tx.receipt = Some(receipt);
        }

        info!(status = %result.status(), "Bridge complete");
        Ok(())
    }

    /// Prepares, submits and follows a deposit until it is final.
    pub async fn deposit(
        &self,
        amount: U256,
        currency: Currency,
        source_chain: ChainId,
    ) -> Result<BridgeTxResult, PartialBridgeError> {
        let prepared = self
            .prepare_deposit(amount, currency, source_chain)
            .await
            .map_err(|err| PartialBridgeError::new(BridgeStage::Preparing, None, err))?;

        let result = self.submit(&prepared).await?;
        self.poll_progress(result).await
    }

    /// Prepares, submits and follows a withdrawal until it is final.
    pub async fn withdraw(
        &self,
        amount: U256,
        currency: Currency,
        target_chain: ChainId,
    ) -> Result<BridgeTxResult, PartialBridgeError> {
        let prepared = self
            .prepare_withdrawal(amount, currency, target_chain)
            .await
            .map_err(|err| PartialBridgeError::new(BridgeStage::Preparing, None, err))?;

        let result = self.submit(&prepared).await?;
        self.poll_progress(result).await
    }

    /// Raises the signer's allowance for `spender` to `amount` if it is
    /// lower, waiting for the approval to become final.
    ///
    /// Returns the approval hash, or `None` when the allowance already
    /// covers `amount`.
    pub async fn ensure_allowance(
        &self,
        chain: &dyn Chain,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<Option<TxHash>, BridgeError> {
        let owner = self.signer.address();
        let current = view(chain, token, IERC20::allowanceCall { owner, spender }).await?;

        if current >= amount {
            debug!(%token, %spender, %current, "Allowance already sufficient");
            return Ok(None);
        }

        debug!(%token, %amount, %spender, "Sending ERC20 approve");
        let call = ContractCall::new(token, &IERC20::approveCall { spender, amount });
        let tx = self.builder.build(chain, &self.signer, &call, U256::ZERO).await?;
        info!(tx_hash = %tx.tx_hash, "Approve submitted");

        let receipt = send_and_confirm(chain, &tx, &self.settings.source_finality, &self.cancel).await?;
        if !receipt.status {
            warn!(tx_hash = %receipt.tx_hash, "Approve reverted on-chain");
            return Err(BridgeError::ApprovalFailed {
                tx_hash: receipt.tx_hash,
            });
        }

        info!(tx_hash = %receipt.tx_hash, "Approve confirmed");
        Ok(Some(receipt.tx_hash))
    }

    async fn require_token_balance(
        &self,
        chain: &dyn Chain,
        token: Address,
        holder: Address,
        amount: U256,
    ) -> Result<(), BridgeError> {
        let balance = view(chain, token, IERC20::balanceOfCall { account: holder }).await?;

        if balance < amount {
            return Err(BridgeError::InsufficientTokenBalance {
                token,
                balance,
                required: amount,
            });
        }

        Ok(())
    }

    /// Tops up the signer's app-chain gas when it is below the configured
    /// threshold. Returns the funding transaction hash if one was sent.
    pub async fn ensure_app_chain_gas(&self) -> Result<Option<TxHash>, BridgeError> {
        let app_chain = self.resolver.connection(ChainId::Derive)?;
        let balance = app_chain.balance(self.signer.address()).await?;
        let threshold = self.settings.gas_funding.threshold;

        if balance >= threshold {
            return Ok(None);
        }

        info!(%balance, %threshold, "App-chain gas below threshold, funding from mainnet");
        self.fund_app_chain_gas(app_chain.as_ref()).await.map(Some)
    }

    async fn fund_app_chain_gas(&self, app_chain: &dyn Chain) -> Result<TxHash, BridgeError> {
        let funding = self.settings.gas_funding;
        let mainnet = self.resolver.connection(ChainId::Eth)?;
        let l1_bridge = self.resolver.registry().contracts().l1_standard_bridge;

        let call = ContractCall::new(
            l1_bridge,
            &IL1StandardBridge::bridgeETHCall {
                _minGasLimit: funding.min_gas_limit,
                _extraData: Bytes::new(),
            },
        );
        let tx = self
            .builder
            .build(mainnet.as_ref(), &self.signer, &call, funding.amount)
            .await?;
        let receipt: Receipt = send_and_confirm(
            mainnet.as_ref(),
            &tx,
            &self.settings.source_finality,
            &self.cancel,
        )
        .await?;

        if !receipt.status {
            return Err(BridgeError::GasFundingFailed {
                tx_hash: receipt.tx_hash,
            });
        }

        info!(tx_hash = %receipt.tx_hash, amount = %funding.amount, "Gas funding final on mainnet");

        let owner = self.signer.address();
        let deadline = Instant::now() + funding.timeout;
        let mut balance = U256::ZERO;

        loop {
            match app_chain.balance(owner).await {
                Ok(current) if current >= funding.threshold => {
                    info!(balance = %current, "App-chain gas funded");
                    return Ok(receipt.tx_hash);
                }
                Ok(current) => balance = current,
                Err(err) => debug!(error = %err, "App-chain balance lookup failed"),
            }

            if self.cancel.is_cancelled() || Instant::now() >= deadline {
                return Err(BridgeError::GasFundingTimeout {
                    balance,
                    threshold: funding.threshold,
                });
            }

            let pause = funding
                .poll_interval
                .min(deadline.saturating_duration_since(Instant::now()));
            tokio::select! {
                () = sleep(pause) => {}
                () = self.cancel.cancelled() => {}
            }
        }
    }

    fn rpc_retry(&self) -> ExponentialBuilder {
        let scan = &self.settings.event_scan;
        ExponentialBuilder::default()
            .with_max_times(scan.rpc_attempts.saturating_sub(1))
            .with_min_delay(scan.retry_min_delay)
            .with_max_delay(Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;
    use derive_evm::mock::MockChain;
    use tracing_test::traced_test;

    use super::*;
    use crate::registry::AddressRegistry;
    use crate::route::ChainConnections;

    const FIXTURE: &str = include_str!("../tests/fixtures/registry.json");
    const WALLET: Address = address!("0x1111111111111111111111111111111111111111");
    const TOKEN: Address = address!("0xe1e1000000000000000000000000000000008453");
    const VAULT: Address = address!("0x7a01000000000000000000000000000000008453");

    async fn client_with(base: Arc<MockChain>, signer: PrivateKeySigner) -> BridgeClient {
        let derive = Arc::new(MockChain::new(957));
        derive.respond::<ILightAccount::ownerCall>(WALLET, &signer.address());

        let connections: ChainConnections = [
            (ChainId::Base, base as Arc<dyn Chain>),
            (ChainId::Derive, derive as Arc<dyn Chain>),
        ]
        .into_iter()
        .collect();
        let registry = Arc::new(AddressRegistry::from_json(FIXTURE).unwrap());
        let resolver = Arc::new(RouteResolver::new(registry, connections, "FAST"));

        BridgeClient::connect(
            resolver,
            signer,
            WALLET,
            TxBuilder::default(),
            BridgeSettings::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn refuses_signer_that_does_not_own_the_wallet() {
        let derive = Arc::new(MockChain::new(957));
        derive.respond::<ILightAccount::ownerCall>(WALLET, &Address::repeat_byte(0x42));
        let connections: ChainConnections = [(ChainId::Derive, derive as Arc<dyn Chain>)]
            .into_iter()
            .collect();
        let registry = Arc::new(AddressRegistry::from_json(FIXTURE).unwrap());
        let resolver = Arc::new(RouteResolver::new(registry, connections, "FAST"));

        let err = BridgeClient::connect(
            resolver,
            PrivateKeySigner::random(),
            WALLET,
            TxBuilder::default(),
            BridgeSettings::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, BridgeError::SecondarySigner { .. }));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn approval_is_sent_and_confirmed_when_allowance_is_short() {
        let signer = PrivateKeySigner::random();
        let base = Arc::new(MockChain::new(8453));
        base.set_balance(signer.address(), U256::from(10u128.pow(18)));
        base.set_head_step(1);
        base.respond::<IERC20::allowanceCall>(TOKEN, &U256::ZERO);
        let client = client_with(Arc::clone(&base), signer).await;

        let approval = client
            .ensure_allowance(base.as_ref(), TOKEN, VAULT, U256::from(100))
            .await
            .unwrap();

        assert!(approval.is_some());
        assert_eq!(base.sent_transactions().len(), 1);
        assert!(logs_contain("Sending ERC20 approve"));
        assert!(logs_contain("Approve submitted"));
        assert!(logs_contain("Approve confirmed"));
    }

    #[tokio::test(start_paused = true)]
    async fn reverted_approval_is_an_error() {
        let signer = PrivateKeySigner::random();
        let base = Arc::new(MockChain::new(8453));
        base.set_balance(signer.address(), U256::from(10u128.pow(18)));
        base.set_head_step(1);
        base.queue_outcome(false, vec![]);
        base.respond::<IERC20::allowanceCall>(TOKEN, &U256::ZERO);
        let client = client_with(Arc::clone(&base), signer).await;

        let err = client
            .ensure_allowance(base.as_ref(), TOKEN, VAULT, U256::from(100))
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::ApprovalFailed { .. }));
    }

    #[tokio::test]
    async fn insufficient_token_balance_fails_before_building() {
        let signer = PrivateKeySigner::random();
        let base = Arc::new(MockChain::new(8453));
        base.respond::<IERC20::balanceOfCall>(TOKEN, &U256::from(99));
        let client = client_with(Arc::clone(&base), signer).await;

        let err = client
            .prepare_deposit(U256::from(100), Currency::WeEth, ChainId::Base)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BridgeError::InsufficientTokenBalance { balance, .. } if balance == U256::from(99)
        ));
        assert_eq!(base.call_count("estimate_gas"), 0);
        assert!(base.sent_transactions().is_empty());
    }

    #[tokio::test]
    async fn final_results_are_returned_unchanged() {
        let signer = PrivateKeySigner::random();
        let base = Arc::new(MockChain::new(8453));
        let client = client_with(Arc::clone(&base), signer).await;

        let result = BridgeTxResult {
            currency: Currency::WeEth,
            bridge_type: BridgeType::Socket,
            direction: Direction::Deposit,
            source_chain: ChainId::Base,
            target_chain: ChainId::Derive,
            source_tx: TxResult {
                tx_hash: Some(TxHash::repeat_byte(1)),
                receipt: Some(Receipt {
                    tx_hash: TxHash::repeat_byte(1),
                    block_number: 3,
                    status: false,
                    logs: vec![],
                }),
            },
            target_tx: TxResult::default(),
            target_from_block: 1,
            correlation_id: None,
        };

        let polled = client.poll_progress(result.clone()).await.unwrap();

        assert_eq!(polled, result);
        assert_eq!(base.call_count("receipt"), 0);
    }
}
