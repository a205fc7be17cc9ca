//! Command-line interface for bridging funds to and from Derive.

use derive_client::cli;
use derive_client::setup_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (ctx, command) = cli::CliEnv::parse_and_convert()?;

    let _telemetry_guard = match ctx.telemetry() {
        Some(telemetry) => match telemetry.setup_telemetry() {
            Ok(guard) => Some(guard),
            Err(e) => {
                eprintln!("Failed to setup telemetry: {e}");
                setup_tracing(&ctx.log_level);
                None
            }
        },
        None => {
            setup_tracing(&ctx.log_level);
            None
        }
    };

    cli::run_command(ctx, command).await
}
