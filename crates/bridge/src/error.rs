//! Error types for route resolution, event correlation and the bridge
//! pipeline.

use std::fmt;

use alloy::primitives::{Address, B256, TxHash, U256};
use derive_evm::EvmError;
use derive_evm::finality::{FinalityError, SendAndConfirmError, TxSubmissionError};
use derive_evm::logs::LogScanError;

use crate::result::{BridgeStage, BridgeTxResult};
use crate::{BridgeType, ChainId, Currency, Direction};

/// Which end of a route an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSide {
    Source,
    Target,
}

impl fmt::Display for RouteSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => f.write_str("source"),
            Self::Target => f.write_str("target"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeRouteError {
    #[error("{currency} must be bridged over {expected}, not {requested}")]
    ProtocolMismatch {
        currency: Currency,
        requested: BridgeType,
        expected: BridgeType,
    },
    #[error("a {direction} cannot go from {source_chain} to {target_chain}")]
    DirectionMismatch {
        direction: Direction,
        source_chain: ChainId,
        target_chain: ChainId,
    },
    #[error("no {side} route for {currency} on {chain}")]
    MissingRoute {
        side: RouteSide,
        chain: ChainId,
        currency: Currency,
    },
    #[error("{currency} on {chain} has no {tier} connector to {counterpart}")]
    MissingConnector {
        currency: Currency,
        chain: ChainId,
        counterpart: ChainId,
        tier: String,
    },
    #[error("native token is not deployed on {side} chain {chain}")]
    NativeTokenUnavailable { side: RouteSide, chain: ChainId },
    #[error("no RPC connection configured for {chain}")]
    ChainNotConfigured { chain: ChainId },
    #[error("{side} route for {currency} on {chain} has the wrong contract kind")]
    UnexpectedRouteKind {
        side: RouteSide,
        chain: ChainId,
        currency: Currency,
    },
    #[error("no deposit helper configured for old-style vaults on {chain}")]
    MissingDepositHelper { chain: ChainId },
}

/// Where in the source receipt a correlation event is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogPosition {
    Last,
    SecondToLast,
}

impl LogPosition {
    pub const fn index(self, len: usize) -> Option<usize> {
        match self {
            Self::Last => len.checked_sub(1),
            Self::SecondToLast => len.checked_sub(2),
        }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Last => f.write_str("last"),
            Self::SecondToLast => f.write_str("second-to-last"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeEventParseError {
    #[error("receipt {tx_hash} has {found} logs, no {position} log to read {event} from")]
    MissingLog {
        tx_hash: TxHash,
        event: &'static str,
        position: LogPosition,
        found: usize,
    },
    #[error("log {index} of {tx_hash} is not {event} (topic0 {found:?})")]
    UnexpectedSignature {
        tx_hash: TxHash,
        index: usize,
        event: &'static str,
        found: Option<B256>,
    },
    #[error("failed to decode log {index} of {tx_hash} as {event}: {source}")]
    Decode {
        tx_hash: TxHash,
        index: usize,
        event: &'static str,
        #[source]
        source: alloy::sol_types::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Route(#[from] BridgeRouteError),
    #[error(transparent)]
    EventParse(#[from] BridgeEventParseError),
    #[error(transparent)]
    Evm(#[from] EvmError),
    #[error(transparent)]
    Finality(#[from] FinalityError),
    #[error(transparent)]
    Submission(#[from] TxSubmissionError),
    #[error("target event not found: {0}")]
    LogScan(#[from] LogScanError),
    #[error(transparent)]
    SendAndConfirm(#[from] SendAndConfirmError),
    #[error("insufficient {token} balance: have {balance}, need {required}")]
    InsufficientTokenBalance {
        token: Address,
        balance: U256,
        required: U256,
    },
    #[error("amount {amount} does not cover the withdrawal fee {fee}")]
    AmountBelowFee { amount: U256, fee: U256 },
    #[error("destination pool holds {locked}, cannot release {required}")]
    InsufficientPoolLiquidity { locked: U256, required: U256 },
    #[error("controller hook {actual} does not match registry hook {expected}")]
    DepositHookMismatch { expected: Address, actual: Address },
    #[error("signer {signer} is not the owner {owner} of the funding wallet")]
    SecondarySigner { owner: Address, signer: Address },
    #[error("approval transaction {tx_hash} reverted")]
    ApprovalFailed { tx_hash: TxHash },
    #[error("gas funding transaction {tx_hash} reverted")]
    GasFundingFailed { tx_hash: TxHash },
    #[error("app-chain gas balance {balance} still below {threshold} after funding")]
    GasFundingTimeout { balance: U256, threshold: U256 },
    #[error("target log carried no transaction hash")]
    MissingTargetTxHash,
    #[error("bridge result has no source transaction hash")]
    MissingSourceTxHash,
}

/// A pipeline failure with the stage it happened at and whatever progress
/// had been made, so the caller can resume instead of resubmitting.
#[derive(Debug, thiserror::Error)]
#[error("bridge failed at {stage}: {error}")]
pub struct PartialBridgeError {
    pub stage: BridgeStage,
    pub result: Option<Box<BridgeTxResult>>,
    #[source]
    pub error: BridgeError,
}

impl PartialBridgeError {
    pub fn new(stage: BridgeStage, result: Option<BridgeTxResult>, error: impl Into<BridgeError>) -> Self {
        Self {
            stage,
            result: result.map(Box::new),
            error: error.into(),
        }
    }
}
