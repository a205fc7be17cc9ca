//! Outcomes of single transactions and of whole bridge operations.
//!
//! Statuses are always derived from receipts, never stored, so a result
//! read back from disk reports exactly what its receipts say.

use std::fmt;

use alloy::primitives::{B256, TxHash};
use derive_evm::Receipt;
use serde::{Deserialize, Serialize};

use crate::{BridgeType, ChainId, Currency, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Pending,
    Success,
    Failed,
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("PENDING"),
            Self::Success => f.write_str("SUCCESS"),
            Self::Failed => f.write_str("FAILED"),
        }
    }
}

/// One on-chain transaction: its hash once known and its receipt once final.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxResult {
    pub tx_hash: Option<TxHash>,
    pub receipt: Option<Receipt>,
}

impl TxResult {
    pub const fn submitted(tx_hash: TxHash) -> Self {
        Self {
            tx_hash: Some(tx_hash),
            receipt: None,
        }
    }

    pub fn status(&self) -> TxStatus {
        match &self.receipt {
            None => TxStatus::Pending,
            Some(receipt) if receipt.status => TxStatus::Success,
            Some(_) => TxStatus::Failed,
        }
    }
}

/// Pipeline stages of a bridge operation, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeStage {
    Preparing,
    Signed,
    Submitted,
    SourceConfirming,
    SourceFinal,
    Correlating,
    TargetObserved,
    TargetConfirming,
    Done,
}

impl fmt::Display for BridgeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preparing => "PREPARING",
            Self::Signed => "SIGNED",
            Self::Submitted => "SUBMITTED",
            Self::SourceConfirming => "SOURCE_CONFIRMING",
            Self::SourceFinal => "SOURCE_FINAL",
            Self::Correlating => "CORRELATING",
            Self::TargetObserved => "TARGET_OBSERVED",
            Self::TargetConfirming => "TARGET_CONFIRMING",
            Self::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// End-to-end outcome of one bridge operation.
///
/// Owned by whoever drives it through
/// [`BridgeClient::poll_progress`](crate::BridgeClient::poll_progress); each
/// call returns the advanced copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeTxResult {
    pub currency: Currency,
    pub bridge_type: BridgeType,
    pub direction: Direction,
    pub source_chain: ChainId,
    pub target_chain: ChainId,
    pub source_tx: TxResult,
    #[serde(default)]
    pub target_tx: TxResult,
    /// Target-chain head recorded before the source transaction was sent.
    pub target_from_block: u64,
    /// OFT guid or Socket message id, once read from the source receipt.
    #[serde(default)]
    pub correlation_id: Option<B256>,
}

impl BridgeTxResult {
    pub fn status(&self) -> TxStatus {
        combine(self.source_tx.status(), self.target_tx.status())
    }

    /// The stage the next [`poll_progress`](crate::BridgeClient::poll_progress)
    /// call resumes from, or [`BridgeStage::Done`] when nothing is left.
    pub fn stage(&self) -> BridgeStage {
        match self.source_tx.status() {
            TxStatus::Pending => return BridgeStage::SourceConfirming,
            TxStatus::Failed => return BridgeStage::SourceFinal,
            TxStatus::Success => {}
        }

        match (self.target_tx.tx_hash, &self.target_tx.receipt) {
            (None, _) => BridgeStage::Correlating,
            (Some(_), None) => BridgeStage::TargetConfirming,
            (Some(_), Some(_)) => BridgeStage::Done,
        }
    }

    /// No further progress is possible: done, or stopped by a failed leg.
    pub fn is_final(&self) -> bool {
        self.status() != TxStatus::Pending
    }
}

/// FAILED dominates PENDING, which dominates SUCCESS.
const fn combine(source: TxStatus, target: TxStatus) -> TxStatus {
    match (source, target) {
        (TxStatus::Failed, _) | (_, TxStatus::Failed) => TxStatus::Failed,
        (TxStatus::Pending, _) | (_, TxStatus::Pending) => TxStatus::Pending,
        (TxStatus::Success, TxStatus::Success) => TxStatus::Success,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn receipt(status: bool) -> Receipt {
        Receipt {
            tx_hash: B256::repeat_byte(1),
            block_number: 10,
            status,
            logs: vec![],
        }
    }

    fn tx_with(status: TxStatus) -> TxResult {
        let receipt = match status {
            TxStatus::Pending => None,
            TxStatus::Success => Some(receipt(true)),
            TxStatus::Failed => Some(receipt(false)),
        };
        TxResult {
            tx_hash: Some(B256::repeat_byte(1)),
            receipt,
        }
    }

    fn bridge_result(source: TxStatus, target: TxStatus) -> BridgeTxResult {
        BridgeTxResult {
            currency: Currency::WeEth,
            bridge_type: BridgeType::Socket,
            direction: Direction::Deposit,
            source_chain: ChainId::Base,
            target_chain: ChainId::Derive,
            source_tx: tx_with(source),
            target_tx: tx_with(target),
            target_from_block: 5,
            correlation_id: Some(B256::repeat_byte(9)),
        }
    }

    fn any_status() -> impl Strategy<Value = TxStatus> {
        prop_oneof![
            Just(TxStatus::Pending),
            Just(TxStatus::Success),
            Just(TxStatus::Failed),
        ]
    }

    #[test]
    fn tx_status_follows_receipt_status() {
        assert_eq!(TxResult::default().status(), TxStatus::Pending);
        assert_eq!(tx_with(TxStatus::Success).status(), TxStatus::Success);
        assert_eq!(tx_with(TxStatus::Failed).status(), TxStatus::Failed);
    }

    proptest! {
        #[test]
        fn status_lattice(source in any_status(), target in any_status()) {
            let result = bridge_result(source, target);

            let expected = if source == TxStatus::Failed || target == TxStatus::Failed {
                TxStatus::Failed
            } else if source == TxStatus::Pending || target == TxStatus::Pending {
                TxStatus::Pending
            } else {
                TxStatus::Success
            };

            prop_assert_eq!(result.status(), expected);
            prop_assert_eq!(result.status(), result.clone().status());
        }
    }

    #[test]
    fn stage_tracks_the_next_missing_piece() {
        let mut result = bridge_result(TxStatus::Pending, TxStatus::Pending);
        result.target_tx = TxResult::default();
        result.correlation_id = None;
        assert_eq!(result.stage(), BridgeStage::SourceConfirming);

        result.source_tx = tx_with(TxStatus::Success);
        assert_eq!(result.stage(), BridgeStage::Correlating);

        result.correlation_id = Some(B256::repeat_byte(9));
        assert_eq!(result.stage(), BridgeStage::Correlating);

        result.target_tx = tx_with(TxStatus::Pending);
        assert_eq!(result.stage(), BridgeStage::TargetConfirming);

        result.target_tx = tx_with(TxStatus::Success);
        assert_eq!(result.stage(), BridgeStage::Done);
        assert!(result.is_final());
    }

    #[test]
    fn failed_source_is_final_without_target() {
        let mut result = bridge_result(TxStatus::Failed, TxStatus::Pending);
        result.target_tx = TxResult::default();

        assert_eq!(result.status(), TxStatus::Failed);
        assert_eq!(result.stage(), BridgeStage::SourceFinal);
        assert!(result.is_final());
    }

    #[test]
    fn round_trips_through_json() {
        let result = bridge_result(TxStatus::Success, TxStatus::Pending);

        let json = serde_json::to_string(&result).unwrap();
        let parsed: BridgeTxResult = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, result);
        assert!(json.contains("\"currency\":\"weETH\""));
    }
}
