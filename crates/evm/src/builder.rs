//! Transaction construction: nonce, fees, gas, simulation and signing.

use std::time::Duration;

use alloy::eips::BlockId;
use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use backon::{ExponentialBuilder, Retryable};
use tracing::{debug, warn};

use crate::fees::{FeeEstimate, FeeSettings, estimate_fees};
use crate::{Chain, EvmError};

/// A contract invocation: target address plus ABI-encoded calldata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub to: Address,
    pub calldata: Bytes,
}

impl ContractCall {
    pub fn new(to: Address, call: &impl alloy::sol_types::SolCall) -> Self {
        Self {
            to,
            calldata: call.abi_encode().into(),
        }
    }
}

/// A signed transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub chain_id: u64,
    pub tx_hash: TxHash,
    pub raw: Bytes,
    pub from: Address,
    pub to: Address,
    pub nonce: u64,
    pub value: U256,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
}

#[derive(Debug, Clone, Copy)]
pub struct BuildSettings {
    pub fees: FeeSettings,
    /// Multiplier applied to the node's gas estimate, in percent.
    pub gas_limit_buffer_percent: u64,
    pub max_attempts: usize,
    pub retry_min_delay: Duration,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            fees: FeeSettings::default(),
            gas_limit_buffer_percent: 110,
            max_attempts: 3,
            retry_min_delay: Duration::from_secs(1),
        }
    }
}

/// Builds fee-estimated, simulated and signed transactions.
#[derive(Debug, Clone, Default)]
pub struct TxBuilder {
    settings: BuildSettings,
}

impl TxBuilder {
    pub const fn new(settings: BuildSettings) -> Self {
        Self { settings }
    }

    pub const fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    fn retry_strategy(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_max_times(self.settings.max_attempts.saturating_sub(1))
            .with_min_delay(self.settings.retry_min_delay)
            .with_factor(2.0)
    }

    /// Builds and signs `call` from `signer` on `chain`.
    ///
    /// Transient RPC failures restart the whole build, so a retry picks up a
    /// fresh nonce and fee estimate. Simulation failures are returned as-is.
    #[tracing::instrument(skip(self, chain, signer, call), fields(chain_id = chain.chain_id(), to = %call.to), level = tracing::Level::DEBUG)]
    pub async fn build(
        &self,
        chain: &dyn Chain,
        signer: &PrivateKeySigner,
        call: &ContractCall,
        value: U256,
    ) -> Result<SignedTx, EvmError> {
        (|| async { self.build_once(chain, signer, call, value).await })
            .retry(self.retry_strategy())
            .when(EvmError::is_transient)
            .notify(|err, delay: Duration| {
                warn!(error = %err, ?delay, "Transaction build failed, retrying");
            })
            .await
    }

    async fn build_once(
        &self,
        chain: &dyn Chain,
        signer: &PrivateKeySigner,
        call: &ContractCall,
        value: U256,
    ) -> Result<SignedTx, EvmError> {
        let from = signer.address();
        let nonce = chain.nonce(from).await?;
        let fees = estimate_fees(chain, &self.settings.fees).await?;

        let mut request = TransactionRequest::default()
            .with_from(from)
            .with_to(call.to)
            .with_input(call.calldata.clone())
            .with_value(value)
            .with_nonce(nonce)
            .with_chain_id(chain.chain_id())
            .with_max_fee_per_gas(fees.max_fee_per_gas)
            .with_max_priority_fee_per_gas(fees.max_priority_fee_per_gas);

        let estimate = chain.estimate_gas(&request).await?;
        let gas_limit = estimate.saturating_mul(self.settings.gas_limit_buffer_percent) / 100;
        request.set_gas_limit(gas_limit);

        simulate(chain, &request, from, gas_limit, &fees, value).await?;

        let wallet = EthereumWallet::from(signer.clone());
        let envelope = request.build(&wallet).await?;
        let tx_hash = *envelope.tx_hash();

        debug!(%tx_hash, nonce, gas_limit, "Signed transaction");

        Ok(SignedTx {
            chain_id: chain.chain_id(),
            tx_hash,
            raw: envelope.encoded_2718().into(),
            from,
            to: call.to,
            nonce,
            value,
            gas_limit,
            max_fee_per_gas: fees.max_fee_per_gas,
        })
    }
}

/// Fails fast on an unaffordable or reverting transaction.
async fn simulate(
    chain: &dyn Chain,
    request: &TransactionRequest,
    from: Address,
    gas_limit: u64,
    fees: &FeeEstimate,
    value: U256,
) -> Result<(), EvmError> {
    let balance = chain.balance(from).await?;
    let required = U256::from(gas_limit) * U256::from(fees.max_fee_per_gas) + value;

    if balance < required {
        return Err(EvmError::InsufficientNativeBalance { balance, required });
    }

    chain.call(request, BlockId::pending()).await?;
    Ok(())
}
