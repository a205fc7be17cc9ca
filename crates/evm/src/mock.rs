//! In-memory [`Chain`] for tests.
//!
//! State is scripted up front: balances, call responses keyed by
//! `(contract, selector)`, receipts, mempool state and logs. Sent
//! transactions are mined at the current head using queued outcomes, or
//! auto-mined successfully with no logs. Failures can be injected per method
//! to exercise retry paths. Every method counts its calls.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use alloy::eips::BlockId;
use alloy::primitives::{Address, Bytes, TxHash, U256, keccak256};
use alloy::rpc::types::{FeeHistory, Filter, Log, TransactionRequest};
use alloy::sol_types::SolCall;
use alloy::transports::TransportErrorKind;
use async_trait::async_trait;

use crate::{Chain, EvmError, Receipt, TxState};

#[derive(Debug, Clone)]
enum CallResponse {
    Return(Bytes),
    Revert(String),
}

#[derive(Debug, Clone)]
struct MinedOutcome {
    status: bool,
    logs: Vec<Log>,
}

#[derive(Debug)]
struct MockState {
    head: u64,
    head_step: u64,
    balances: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    fee_history: FeeHistory,
    gas_estimate: u64,
    calls: HashMap<(Address, [u8; 4]), CallResponse>,
    receipts: HashMap<TxHash, Receipt>,
    tx_states: HashMap<TxHash, TxState>,
    logs: Vec<Log>,
    sent: Vec<Bytes>,
    outcomes: VecDeque<MinedOutcome>,
    auto_mine: bool,
    counts: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, usize>,
}

#[derive(Debug)]
pub struct MockChain {
    chain_id: u64,
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(chain_id: u64) -> Self {
        let state = MockState {
            head: 1,
            head_step: 0,
            balances: HashMap::new(),
            nonces: HashMap::new(),
            fee_history: fee_history(vec![1_000_000_000, 1_000_000_000], vec![1_000_000]),
            gas_estimate: 21_000,
            calls: HashMap::new(),
            receipts: HashMap::new(),
            tx_states: HashMap::new(),
            logs: Vec::new(),
            sent: Vec::new(),
            outcomes: VecDeque::new(),
            auto_mine: true,
            counts: HashMap::new(),
            failures: HashMap::new(),
        };

        Self {
            chain_id,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Counts the call and consumes an injected failure, if any.
    fn enter(&self, method: &'static str) -> Result<MutexGuard<'_, MockState>, EvmError> {
        let mut state = self.lock();
        *state.counts.entry(method).or_default() += 1;

        if let Some(remaining) = state.failures.get_mut(method).filter(|left| **left > 0) {
            *remaining -= 1;
            return Err(TransportErrorKind::custom_str(&format!("injected {method} failure")).into());
        }

        Ok(state)
    }

    pub fn set_head(&self, head: u64) {
        self.lock().head = head;
    }

    /// Blocks the head advances after each `block_number` call.
    pub fn set_head_step(&self, step: u64) {
        self.lock().head_step = step;
    }

    pub fn head(&self) -> u64 {
        self.lock().head
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.lock().balances.insert(address, balance);
    }

    pub fn set_nonce(&self, address: Address, nonce: u64) {
        self.lock().nonces.insert(address, nonce);
    }

    /// One base fee per block plus the next, and one reward per block.
    pub fn set_fee_history(&self, base_fees: Vec<u128>, rewards: Vec<u128>) {
        self.lock().fee_history = fee_history(base_fees, rewards);
    }

    pub fn set_gas_estimate(&self, gas: u64) {
        self.lock().gas_estimate = gas;
    }

    /// Answers calls of `C` to `to` with `ret`.
    pub fn respond<C: SolCall>(&self, to: Address, ret: &C::Return) {
        let output = Bytes::from(C::abi_encode_returns(ret));
        self.lock()
            .calls
            .insert((to, C::SELECTOR), CallResponse::Return(output));
    }

    /// Makes calls of `C` to `to` revert with `reason`.
    pub fn revert<C: SolCall>(&self, to: Address, reason: &str) {
        self.lock()
            .calls
            .insert((to, C::SELECTOR), CallResponse::Revert(reason.to_owned()));
    }

    pub fn insert_receipt(&self, receipt: Receipt) {
        let mut state = self.lock();
        state.tx_states.insert(
            receipt.tx_hash,
            TxState::Mined {
                block_number: receipt.block_number,
            },
        );
        state.receipts.insert(receipt.tx_hash, receipt);
    }

    pub fn set_tx_state(&self, tx_hash: TxHash, tx_state: TxState) {
        self.lock().tx_states.insert(tx_hash, tx_state);
    }

    pub fn push_log(&self, log: Log) {
        self.lock().logs.push(log);
    }

    /// Outcome for the next sent transaction, mined at the current head.
    pub fn queue_outcome(&self, status: bool, logs: Vec<Log>) {
        self.lock().outcomes.push_back(MinedOutcome { status, logs });
    }

    /// When disabled, sent transactions without a queued outcome stay pending.
    pub fn set_auto_mine(&self, enabled: bool) {
        self.lock().auto_mine = enabled;
    }

    pub fn sent_transactions(&self) -> Vec<Bytes> {
        self.lock().sent.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.lock().counts.get(method).copied().unwrap_or(0)
    }

    /// Makes the next `times` calls of `method` fail with a transport error.
    pub fn fail_next(&self, method: &'static str, times: usize) {
        self.lock().failures.insert(method, times);
    }
}

fn fee_history(base_fees: Vec<u128>, rewards: Vec<u128>) -> FeeHistory {
    FeeHistory {
        base_fee_per_gas: base_fees,
        reward: Some(rewards.into_iter().map(|reward| vec![reward]).collect()),
        ..Default::default()
    }
}

fn matches_filter(filter: &Filter, log: &Log) -> bool {
    let block = log.block_number.unwrap_or_default();
    let in_range = filter.get_from_block().is_none_or(|from| block >= from)
        && filter.get_to_block().is_none_or(|to| block <= to);

    let topics_match = filter.topics.iter().enumerate().all(|(i, topic)| {
        topic.is_empty() || log.topics().get(i).is_some_and(|value| topic.matches(value))
    });

    in_range && filter.address.matches(&log.address()) && topics_match
}

#[async_trait]
impl Chain for MockChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn block_number(&self) -> Result<u64, EvmError> {
        let mut state = self.enter("block_number")?;
        let head = state.head;
        let step = state.head_step;
        state.head = head + step;
        Ok(head)
    }

    async fn balance(&self, address: Address) -> Result<U256, EvmError> {
        let state = self.enter("balance")?;
        Ok(state.balances.get(&address).copied().unwrap_or_default())
    }

    async fn nonce(&self, address: Address) -> Result<u64, EvmError> {
        let state = self.enter("nonce")?;
        Ok(state.nonces.get(&address).copied().unwrap_or_default())
    }

    async fn fee_history(
        &self,
        _block_count: u64,
        _reward_percentiles: &[f64],
    ) -> Result<FeeHistory, EvmError> {
        let state = self.enter("fee_history")?;
        Ok(state.fee_history.clone())
    }

    async fn estimate_gas(&self, _tx: &TransactionRequest) -> Result<u64, EvmError> {
        let state = self.enter("estimate_gas")?;
        Ok(state.gas_estimate)
    }

    async fn call(&self, tx: &TransactionRequest, _block: BlockId) -> Result<Bytes, EvmError> {
        let state = self.enter("call")?;

        let to = tx.to.and_then(|kind| kind.to().copied()).unwrap_or_default();
        let selector = tx
            .input
            .input()
            .and_then(|input| input.get(..4))
            .and_then(|bytes| <[u8; 4]>::try_from(bytes).ok())
            .unwrap_or_default();

        match state.calls.get(&(to, selector)) {
            Some(CallResponse::Return(output)) => Ok(output.clone()),
            Some(CallResponse::Revert(reason)) => Err(EvmError::Reverted {
                reason: reason.clone(),
            }),
            None => Ok(Bytes::new()),
        }
    }

    async fn send_raw(&self, raw: &[u8]) -> Result<TxHash, EvmError> {
        let mut state = self.enter("send_raw")?;
        let tx_hash = keccak256(raw);
        state.sent.push(Bytes::copy_from_slice(raw));

        let outcome = state.outcomes.pop_front().or_else(|| {
            state.auto_mine.then(|| MinedOutcome {
                status: true,
                logs: vec![],
            })
        });

        match outcome {
            Some(MinedOutcome { status, logs }) => {
                let block_number = state.head;
                let logs = logs
                    .into_iter()
                    .map(|mut log| {
                        log.block_number = Some(block_number);
                        log.transaction_hash = Some(tx_hash);
                        log
                    })
                    .collect();

                state.tx_states.insert(tx_hash, TxState::Mined { block_number });
                state.receipts.insert(
                    tx_hash,
                    Receipt {
                        tx_hash,
                        block_number,
                        status,
                        logs,
                    },
                );
            }
            None => {
                state.tx_states.insert(tx_hash, TxState::Pending);
            }
        }

        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<Receipt>, EvmError> {
        let state = self.enter("receipt")?;
        Ok(state.receipts.get(&tx_hash).cloned())
    }

    async fn transaction_state(&self, tx_hash: TxHash) -> Result<TxState, EvmError> {
        let state = self.enter("transaction_state")?;
        Ok(state
            .tx_states
            .get(&tx_hash)
            .copied()
            .unwrap_or(TxState::Unknown))
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, EvmError> {
        let state = self.enter("logs")?;
        Ok(state
            .logs
            .iter()
            .filter(|log| matches_filter(filter, log))
            .cloned()
            .collect())
    }
}
