//! EVM chain access for cross-chain bridging.
//!
//! [`Chain`] is the narrow slice of JSON-RPC the bridge pipeline relies on:
//! balances, nonces, fee history, gas estimation, calls, raw transaction
//! submission, receipts, mempool lookups and log queries. [`RpcChain`]
//! implements it over any alloy [`Provider`]. In production that provider
//! sits on a [`rpc::RotatingTransport`] so every request fails over across
//! the configured endpoints.
//!
//! On top of `Chain` this crate provides:
//!
//! - [`builder`]: fee-estimated, simulated and signed transactions
//! - [`finality`]: submission and confirmation tracking with classified
//!   timeouts
//! - [`logs`]: bounded, windowed log scanning with a deadline
//!
//! Results that are legitimately absent (no receipt yet, unknown
//! transaction) are modelled as `Option`/[`TxState`] rather than errors, so
//! "still pending" never looks like "something broke".

use alloy::eips::BlockId;
use alloy::network::ReceiptResponse;
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::Provider;
use alloy::rpc::types::{
    BlockNumberOrTag, FeeHistory, Filter, Log, TransactionReceipt, TransactionRequest,
};
use alloy::sol_types::SolCall;
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod builder;
pub mod error_decoding;
pub mod fees;
pub mod finality;
pub mod logs;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod rpc;

/// Errors that can occur during EVM operations.
#[derive(Debug, thiserror::Error)]
pub enum EvmError {
    #[error("transport error: {0}")]
    Transport(#[from] RpcError<TransportErrorKind>),
    #[error("execution reverted: {reason}")]
    Reverted { reason: String },
    #[error("insufficient native balance: have {balance}, need {required}")]
    InsufficientNativeBalance { balance: U256, required: U256 },
    #[error("failed to sign transaction: {0}")]
    Signing(#[from] alloy::network::TransactionBuilderError<alloy::network::Ethereum>),
    #[error("failed to decode call output: {0}")]
    AbiDecode(#[from] alloy::sol_types::Error),
    #[error("fee history contained no base fee")]
    EmptyFeeHistory,
}

impl EvmError {
    /// Whether retrying the same operation could plausibly succeed.
    ///
    /// Only transport-level failures qualify. Reverts, balance shortfalls and
    /// decoding failures are deterministic for a given chain state.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(err) => !error_decoding::is_revert(err),
            Self::Reverted { .. }
            | Self::InsufficientNativeBalance { .. }
            | Self::Signing(_)
            | Self::AbiDecode(_)
            | Self::EmptyFeeHistory => false,
        }
    }
}

/// A mined transaction receipt, reduced to what bridging needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    /// EIP-658 status: `true` on success.
    pub status: bool,
    pub logs: Vec<Log>,
}

impl Receipt {
    /// Returns `None` for receipts the node has not assigned to a block.
    pub fn from_rpc(receipt: &TransactionReceipt) -> Option<Self> {
        Some(Self {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number?,
            status: receipt.status(),
            logs: receipt.inner.logs().to_vec(),
        })
    }
}

/// What a node knows about a transaction hash, independent of its receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// The node has no record of the transaction.
    Unknown,
    /// Sitting in the node's transaction pool.
    Pending,
    Mined { block_number: u64 },
}

/// JSON-RPC access to one EVM chain.
///
/// Object safe so a process can hold one `Arc<dyn Chain>` per chain and
/// share it between concurrent bridge operations.
#[async_trait]
pub trait Chain: Send + Sync + 'static {
    fn chain_id(&self) -> u64;

    async fn block_number(&self) -> Result<u64, EvmError>;

    async fn balance(&self, address: Address) -> Result<U256, EvmError>;

    async fn nonce(&self, address: Address) -> Result<u64, EvmError>;

    /// Fee history ending at the pending block.
    async fn fee_history(
        &self,
        block_count: u64,
        reward_percentiles: &[f64],
    ) -> Result<FeeHistory, EvmError>;

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, EvmError>;

    /// `eth_call` at `block`. Reverts surface as [`EvmError::Reverted`].
    async fn call(&self, tx: &TransactionRequest, block: BlockId) -> Result<Bytes, EvmError>;

    async fn send_raw(&self, raw: &[u8]) -> Result<TxHash, EvmError>;

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<Receipt>, EvmError>;

    async fn transaction_state(&self, tx_hash: TxHash) -> Result<TxState, EvmError>;

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, EvmError>;
}

/// Executes a view call against the latest block and decodes its return.
pub async fn view<C, Q>(chain: &Q, to: Address, call: C) -> Result<C::Return, EvmError>
where
    C: SolCall + Send,
    Q: Chain + ?Sized,
{
    let request = TransactionRequest::default()
        .to(to)
        .input(Bytes::from(call.abi_encode()).into());

    let output = chain.call(&request, BlockId::latest()).await?;

    Ok(C::abi_decode_returns(&output)?)
}

/// [`Chain`] implementation over an alloy provider.
#[derive(Debug, Clone)]
pub struct RpcChain<P> {
    chain_id: u64,
    provider: P,
}

impl<P: Provider> RpcChain<P> {
    pub const fn new(chain_id: u64, provider: P) -> Self {
        Self { chain_id, provider }
    }

    pub const fn provider(&self) -> &P {
        &self.provider
    }
}

#[async_trait]
impl<P> Chain for RpcChain<P>
where
    P: Provider + Send + Sync + 'static,
{
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn block_number(&self) -> Result<u64, EvmError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn balance(&self, address: Address) -> Result<U256, EvmError> {
        Ok(self.provider.get_balance(address).await?)
    }

    async fn nonce(&self, address: Address) -> Result<u64, EvmError> {
        Ok(self.provider.get_transaction_count(address).await?)
    }

    async fn fee_history(
        &self,
        block_count: u64,
        reward_percentiles: &[f64],
    ) -> Result<FeeHistory, EvmError> {
        Ok(self
            .provider
            .get_fee_history(block_count, BlockNumberOrTag::Pending, reward_percentiles)
            .await?)
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, EvmError> {
        self.provider
            .estimate_gas(tx.clone())
            .await
            .map_err(error_decoding::decode_rpc_error)
    }

    async fn call(&self, tx: &TransactionRequest, block: BlockId) -> Result<Bytes, EvmError> {
        self.provider
            .call(tx.clone())
            .block(block)
            .await
            .map_err(error_decoding::decode_rpc_error)
    }

    async fn send_raw(&self, raw: &[u8]) -> Result<TxHash, EvmError> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(error_decoding::decode_rpc_error)?;

        Ok(*pending.tx_hash())
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<Receipt>, EvmError> {
        let receipt = self.provider.get_transaction_receipt(tx_hash).await?;

        Ok(receipt.as_ref().and_then(Receipt::from_rpc))
    }

    async fn transaction_state(&self, tx_hash: TxHash) -> Result<TxState, EvmError> {
        let state = match self.provider.get_transaction_by_hash(tx_hash).await? {
            None => TxState::Unknown,
            Some(tx) => match tx.block_number {
                Some(block_number) => TxState::Mined { block_number },
                None => TxState::Pending,
            },
        };

        Ok(state)
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, EvmError> {
        Ok(self.provider.get_logs(filter).await?)
    }
}
