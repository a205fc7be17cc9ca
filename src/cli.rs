//! `derive-cli` command line: deposit, withdraw, resume and route.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use alloy::primitives::U256;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use derive_bridge::{
    AddressRegistry, BridgeClient, BridgeContext, BridgeTxResult, ChainId, Currency,
    PartialBridgeError, ProtocolRoute, RouteResolver,
};
use derive_evm::builder::TxBuilder;

use crate::config::{Ctx, Env};

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Invalid amount: {value}. Amount must be greater than zero")]
    NonPositiveAmount { value: Decimal },
    #[error("Amount {value} has more than the token's {decimals} decimals")]
    TooPrecise { value: Decimal, decimals: u8 },
    #[error("Amount {value} does not fit in 256 bits at {decimals} decimals")]
    Overflow { value: Decimal, decimals: u8 },
    #[error("failed to write bridge result to {path}")]
    WriteResult {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Parser)]
#[command(name = "derive-cli")]
#[command(about = "Bridge funds between the Derive app-chain and other chains")]
#[command(version)]
pub struct CliEnv {
    #[clap(flatten)]
    env: Env,
    #[command(subcommand)]
    pub command: Commands,
}

impl CliEnv {
    /// Parse CLI arguments and load the runtime context
    pub fn parse_and_convert() -> anyhow::Result<(Ctx, Commands)> {
        let cli_env = Self::parse();
        let ctx = cli_env.env.into_ctx()?;
        Ok((ctx, cli_env.command))
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Deposit from a chain into the funding wallet on Derive
    Deposit {
        /// Source chain, by name or id (e.g. base, 8453)
        #[arg(long)]
        chain: ChainId,
        /// Token symbol (e.g. weETH, DRV)
        #[arg(long)]
        currency: Currency,
        /// Amount in whole tokens; scaled by the token's decimals
        #[arg(long)]
        amount: Decimal,
        /// File to write the bridge result JSON to
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Withdraw from the funding wallet on Derive to a chain
    Withdraw {
        /// Target chain, by name or id
        #[arg(long)]
        chain: ChainId,
        #[arg(long)]
        currency: Currency,
        #[arg(long)]
        amount: Decimal,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Continue a saved bridge result until it is final
    Resume {
        /// Bridge result JSON written by a previous run
        #[arg(long)]
        input: PathBuf,
        /// Defaults to overwriting the input file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the resolved route without sending anything
    Route {
        #[arg(long)]
        currency: Currency,
        #[arg(long)]
        from: ChainId,
        #[arg(long)]
        to: ChainId,
    },
}

pub async fn run_command(ctx: Ctx, command: Commands) -> anyhow::Result<()> {
    run_command_with_writer(ctx, command, &mut std::io::stdout()).await
}

async fn run_command_with_writer<W: Write>(
    ctx: Ctx,
    command: Commands,
    stdout: &mut W,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let client = connect_client(&ctx, cancel).await?;

    match command {
        Commands::Deposit {
            chain,
            currency,
            amount,
            output,
        } => {
            let context = client.route(currency, chain, ChainId::Derive)?;
            let amount = scale_amount(amount, client.token_decimals(&context).await?)?;
            info!(%chain, %currency, %amount, "Starting deposit");

            let outcome = client.deposit(amount, currency, chain).await;
            finish(outcome, output.as_deref(), stdout)?;
        }
        Commands::Withdraw {
            chain,
            currency,
            amount,
            output,
        } => {
            let context = client.route(currency, ChainId::Derive, chain)?;
            let amount = scale_amount(amount, client.token_decimals(&context).await?)?;
            info!(%chain, %currency, %amount, "Starting withdrawal");

            let outcome = client.withdraw(amount, currency, chain).await;
            finish(outcome, output.as_deref(), stdout)?;
        }
        Commands::Resume { input, output } => {
            let saved: BridgeTxResult = serde_json::from_str(&std::fs::read_to_string(&input)?)?;
            info!(stage = %saved.stage(), path = %input.display(), "Resuming bridge");

            let outcome = client.poll_progress(saved).await;
            finish(outcome, Some(output.as_deref().unwrap_or(input.as_path())), stdout)?;
        }
        Commands::Route { currency, from, to } => {
            let context = client.route(currency, from, to)?;
            write_route(&context, stdout)?;
        }
    }

    Ok(())
}

async fn connect_client(ctx: &Ctx, cancel: CancellationToken) -> anyhow::Result<BridgeClient> {
    let registry = Arc::new(AddressRegistry::load(&ctx.registry)?);
    let connections = ctx.connect_chains()?;
    let resolver = Arc::new(RouteResolver::new(
        registry,
        connections,
        ctx.bridge.speed_tier.clone(),
    ));

    let client = BridgeClient::connect(
        resolver,
        ctx.signer().clone(),
        ctx.wallet,
        TxBuilder::default(),
        ctx.bridge.clone(),
        cancel,
    )
    .await?;

    Ok(client)
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping at the next poll");
            cancel.cancel();
        }
    });
}

/// Converts a whole-token amount into base units.
fn scale_amount(value: Decimal, decimals: u8) -> Result<U256, CliError> {
    if value <= Decimal::ZERO {
        return Err(CliError::NonPositiveAmount { value });
    }

    let normalized = value.normalize();
    let scale = normalized.scale();
    let Some(shift) = u32::from(decimals).checked_sub(scale) else {
        return Err(CliError::TooPrecise { value, decimals });
    };

    let mantissa = u128::try_from(normalized.mantissa())
        .map_err(|_| CliError::NonPositiveAmount { value })?;

    U256::from(10)
        .checked_pow(U256::from(shift))
        .and_then(|factor| U256::from(mantissa).checked_mul(factor))
        .ok_or(CliError::Overflow { value, decimals })
}

/// Saves whatever result exists, then reports success or the failure.
fn finish<W: Write>(
    outcome: Result<BridgeTxResult, PartialBridgeError>,
    output: Option<&Path>,
    stdout: &mut W,
) -> anyhow::Result<()> {
    match outcome {
        Ok(result) => {
            if let Some(path) = output {
                save_result(&result, path)?;
            }
            write_summary(&result, stdout)?;
            Ok(())
        }
        Err(err) => {
            if let (Some(result), Some(path)) = (&err.result, output) {
                save_result(result, path)?;
                writeln!(stdout, "Partial result saved to {}; run `resume` to continue", path.display())?;
            }
            writeln!(stdout, "FAILED_AT_{}: {}", err.stage, err.error)?;
            Err(err.into())
        }
    }
}

fn save_result(result: &BridgeTxResult, path: &Path) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(result).map_err(|e| CliError::WriteResult {
        path: path.to_path_buf(),
        source: e.into(),
    })?;

    std::fs::write(path, json).map_err(|source| CliError::WriteResult {
        path: path.to_path_buf(),
        source,
    })
}

fn write_summary<W: Write>(result: &BridgeTxResult, stdout: &mut W) -> std::io::Result<()> {
    writeln!(
        stdout,
        "{status} {currency} {source} -> {target}",
        status = result.status(),
        currency = result.currency,
        source = result.source_chain,
        target = result.target_chain,
    )?;

    if let Some(tx_hash) = result.source_tx.tx_hash {
        writeln!(stdout, "  source tx: {tx_hash}")?;
    }
    if let Some(id) = result.correlation_id {
        writeln!(stdout, "  correlation id: {id}")?;
    }
    if let Some(tx_hash) = result.target_tx.tx_hash {
        writeln!(stdout, "  target tx: {tx_hash}")?;
    }

    Ok(())
}

fn write_route<W: Write>(context: &BridgeContext, stdout: &mut W) -> std::io::Result<()> {
    writeln!(
        stdout,
        "{currency} {direction} via {bridge}: {source} -> {target}",
        currency = context.currency,
        direction = context.direction,
        bridge = context.bridge_type(),
        source = context.source_chain,
        target = context.target_chain,
    )?;

    match &context.protocol {
        ProtocolRoute::LayerZero(route) => {
            writeln!(stdout, "  source token: {}", route.source_token)?;
            writeln!(stdout, "  target token: {}", route.target_token)?;
            writeln!(stdout, "  destination eid: {}", route.destination_eid)?;
        }
        ProtocolRoute::Socket(route) => {
            writeln!(stdout, "  source token: {}", context.protocol.source_token())?;
            writeln!(stdout, "  connector: {}", route.connector)?;
            if let Some(helper) = route.deposit_helper {
                writeln!(stdout, "  deposit helper: {helper}")?;
            }
            if let Some(socket) = route.target_socket {
                writeln!(stdout, "  target socket: {socket}")?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use alloy::primitives::{B256, address};
    use derive_bridge::result::{BridgeStage, TxResult, TxStatus};
    use derive_bridge::route::OftRoute;
    use derive_bridge::{BridgeError, BridgeType, Direction};
    use derive_evm::Chain;
    use derive_evm::mock::MockChain;

    use super::*;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn pending_result() -> BridgeTxResult {
        BridgeTxResult {
            currency: Currency::WeEth,
            bridge_type: BridgeType::Socket,
            direction: Direction::Deposit,
            source_chain: ChainId::Base,
            target_chain: ChainId::Derive,
            source_tx: TxResult::submitted(B256::repeat_byte(0xab)),
            target_tx: TxResult::default(),
            target_from_block: 40,
            correlation_id: None,
        }
    }

    #[test]
    fn scales_whole_and_fractional_amounts() {
        assert_eq!(scale_amount(dec("1"), 18).unwrap(), U256::from(10u64.pow(18)));
        assert_eq!(scale_amount(dec("1.5"), 6).unwrap(), U256::from(1_500_000));
        assert_eq!(scale_amount(dec("0.000001"), 6).unwrap(), U256::from(1));
        assert_eq!(scale_amount(dec("2.50"), 1).unwrap(), U256::from(25));
    }

    #[test]
    fn rejects_amounts_the_token_cannot_represent() {
        assert!(matches!(
            scale_amount(dec("0.0000001"), 6),
            Err(CliError::TooPrecise { decimals: 6, .. })
        ));
        assert!(matches!(
            scale_amount(dec("0"), 18),
            Err(CliError::NonPositiveAmount { .. })
        ));
        assert!(matches!(
            scale_amount(dec("-1"), 18),
            Err(CliError::NonPositiveAmount { .. })
        ));
        assert!(matches!(
            scale_amount(dec("1"), 255),
            Err(CliError::Overflow { .. })
        ));
    }

    #[test]
    fn parses_deposit_arguments() {
        let cli = CliEnv::try_parse_from([
            "derive-cli",
            "--config",
            "config.toml",
            "--secrets",
            "secrets.toml",
            "deposit",
            "--chain",
            "base",
            "--currency",
            "weETH",
            "--amount",
            "0.25",
        ])
        .unwrap();

        let Commands::Deposit {
            chain,
            currency,
            amount,
            output,
        } = cli.command
        else {
            panic!("expected deposit, got {:?}", cli.command);
        };
        assert_eq!(chain, ChainId::Base);
        assert_eq!(currency, Currency::WeEth);
        assert_eq!(amount, dec("0.25"));
        assert_eq!(output, None);
    }

    #[test]
    fn rejects_unknown_chain_argument() {
        let err = CliEnv::try_parse_from([
            "derive-cli",
            "--config",
            "c.toml",
            "--secrets",
            "s.toml",
            "withdraw",
            "--chain",
            "zksync",
            "--currency",
            "DRV",
            "--amount",
            "1",
        ])
        .unwrap_err();

        assert!(err.to_string().contains("zksync"));
    }

    #[test]
    fn failure_saves_partial_result_for_resume() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        let err = PartialBridgeError::new(
            BridgeStage::SourceConfirming,
            Some(pending_result()),
            BridgeError::MissingTargetTxHash,
        );
        let mut stdout = Vec::new();

        assert!(finish(Err(err), Some(&path), &mut stdout).is_err());

        let saved: BridgeTxResult =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved, pending_result());
        assert_eq!(saved.status(), TxStatus::Pending);

        let printed = String::from_utf8(stdout).unwrap();
        assert!(printed.contains("FAILED_AT_SOURCE_CONFIRMING"));
        assert!(printed.contains("resume"));
    }

    #[test]
    fn success_prints_summary_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        let mut result = pending_result();
        result.correlation_id = Some(B256::repeat_byte(0x4d));
        let mut stdout = Vec::new();

        finish(Ok(result.clone()), Some(&path), &mut stdout).unwrap();

        assert!(path.exists());
        let printed = String::from_utf8(stdout).unwrap();
        assert!(printed.starts_with("PENDING weETH base (8453) -> derive (957)"));
        assert!(printed.contains("correlation id"));
        assert!(!printed.contains("target tx"));
    }

    #[test]
    fn route_output_lists_layer_zero_details() {
        let derive: Arc<dyn Chain> = Arc::new(MockChain::new(957));
        let base: Arc<dyn Chain> = Arc::new(MockChain::new(8453));
        let context = BridgeContext {
            currency: Currency::Drv,
            direction: Direction::Withdraw,
            source_chain: ChainId::Derive,
            target_chain: ChainId::Base,
            source: derive,
            target: base,
            protocol: ProtocolRoute::LayerZero(OftRoute {
                source_token: address!("0x2222222222222222222222222222222222222222"),
                target_token: address!("0x3333333333333333333333333333333333333333"),
                destination_eid: 30184,
            }),
        };
        let mut stdout = Vec::new();

        write_route(&context, &mut stdout).unwrap();

        let printed = String::from_utf8(stdout).unwrap();
        assert!(printed.contains("DRV withdraw via LayerZero"));
        assert!(printed.contains("destination eid: 30184"));
    }
}
