//! Solidity interfaces for the contracts the bridge talks to.
//!
//! Only the functions and events the bridge uses are declared.

use alloy::primitives::{Address, address};
use alloy::sol;

use crate::ChainId;

sol! {
    #[derive(Debug)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
        function decimals() external view returns (uint8);
    }
}

sol! {
    #[derive(Debug, PartialEq, Eq)]
    struct SendParam {
        uint32 dstEid;
        bytes32 to;
        uint256 amountLD;
        uint256 minAmountLD;
        bytes extraOptions;
        bytes composeMsg;
        bytes oftCmd;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct MessagingFee {
        uint256 nativeFee;
        uint256 lzTokenFee;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct MessagingReceipt {
        bytes32 guid;
        uint64 nonce;
        MessagingFee fee;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct OFTReceipt {
        uint256 amountSentLD;
        uint256 amountReceivedLD;
    }

    /// LayerZero v2 omnichain fungible token (DRV on every chain).
    #[derive(Debug)]
    interface IOFT {
        function quoteSend(SendParam calldata sendParam, bool payInLzToken)
            external view returns (MessagingFee memory msgFee);
        function send(SendParam calldata sendParam, MessagingFee calldata fee, address refundAddress)
            external payable returns (MessagingReceipt memory msgReceipt, OFTReceipt memory oftReceipt);

        event OFTSent(
            bytes32 indexed guid,
            uint32 dstEid,
            address indexed fromAddress,
            uint256 amountSentLD,
            uint256 amountReceivedLD
        );
        event OFTReceived(
            bytes32 indexed guid,
            uint32 srcEid,
            address indexed toAddress,
            uint256 amountReceivedLD
        );
    }
}

sol! {
    /// Withdraws DRV from the app-chain over LayerZero, paying the fee in DRV.
    #[derive(Debug)]
    interface IOftWithdrawWrapper {
        function withdrawToChain(address token, uint256 amount, address toAddress, uint32 destEID)
            external payable;
        function getFeeInToken(address token, uint256 amount, uint32 destEID)
            external view returns (uint256);
    }
}

sol! {
    /// New-style Socket vault.
    #[derive(Debug)]
    interface ISocketVault {
        function bridge(
            address receiver_,
            uint256 amount_,
            uint256 msgGasLimit_,
            address connector_,
            bytes calldata extraData_,
            bytes calldata options_
        ) external payable;
        function getMinFees(address connector_, uint256 msgGasLimit_, uint256 payloadSize_)
            external view returns (uint256 totalFees);
    }

    /// Old-style Socket vault, only reachable through a deposit helper.
    #[derive(Debug)]
    interface ISocketVaultV0 {
        function getMinFees(address connector_, uint256 msgGasLimit_)
            external view returns (uint256 totalFees);
    }

    #[derive(Debug)]
    interface IDepositHelper {
        function depositToLyra(
            address token,
            address socketVault,
            bool isSCW,
            uint256 amount,
            uint256 gasLimit,
            address connector
        ) external payable;
    }

    /// Socket controller on the app-chain (mint/burn side).
    #[derive(Debug)]
    interface ISocketController {
        function hook__() external view returns (address);
    }

    /// Per-connector liquidity accounting, exposed by old-style controllers
    /// and by the deposit hooks of new-style ones.
    #[derive(Debug)]
    interface ILiquidityPool {
        function connectorPoolIds(address connector) external view returns (uint256);
        function poolLockedAmounts(uint256 poolId) external view returns (uint256);
    }

    #[derive(Debug)]
    interface IWithdrawWrapper {
        function withdrawToChain(
            address token,
            uint256 amount,
            address recipient,
            address socketController,
            address connector,
            uint256 gasLimit
        ) external payable;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct Fees {
        uint128 transmissionFees;
        uint128 executionFee;
        uint128 switchboardFees;
    }

    #[derive(Debug)]
    interface ISocket {
        event MessageOutbound(
            uint32 localChainSlug,
            address localPlug,
            uint32 dstChainSlug,
            address dstPlug,
            bytes32 msgId,
            uint256 minMsgGasLimit,
            bytes32 executionParams,
            bytes32 transmissionParams,
            bytes payload,
            Fees fees
        );
        event ExecutionSuccess(bytes32 msgId);
    }
}

sol! {
    /// ERC-4337 smart-contract wallet holding funds on the app-chain.
    #[derive(Debug)]
    interface ILightAccount {
        function owner() external view returns (address);
        function executeBatch(address[] calldata dest, bytes[] calldata func) external;
    }

    /// OP-stack L1 standard bridge, used to fund app-chain gas with ETH.
    #[derive(Debug)]
    interface IL1StandardBridge {
        function bridgeETH(uint32 _minGasLimit, bytes calldata _extraData) external payable;
    }
}

/// DRV token (OFT or OFT adapter) address on `chain`.
pub const fn drv_token(chain: ChainId) -> Option<Address> {
    match chain {
        ChainId::Eth => Some(address!("0xb1d1eae60eea9525032a6dcb4c1ce336a1de71be")),
        ChainId::Optimism => Some(address!("0x33800de7e817a70a694f31476313a7c572bba100")),
        ChainId::Base => Some(address!("0x9d0e8f5b25384c7310cb8c6ae32c8fbeb645d083")),
        ChainId::Arbitrum => Some(address!("0x77b7787a09818502305c95d68a2571f090abb135")),
        ChainId::Derive => Some(address!("0x2EE0fd70756EDC663AcC9676658A1497C247693A")),
        ChainId::Mode | ChainId::Blast => None,
    }
}
