//! Intake monitor binary
//!
//! Run with: cargo run -p media-intake --bin media-intake-monitor -- --config monitor.json

use clap::Parser;
use media_intake::config::DEFAULT_CONFIG_PATH;
use media_intake::daemon::spawn_signal_listener;
use media_intake::{IntakeDaemon, MonitorConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "media-intake-monitor", version, about)]
struct Args {
    /// Configuration file (JSON, or TOML with a .toml extension)
    #[arg(short, long, env = "MEDIA_INTAKE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Process what is already in the input directory, then exit
    #[arg(long)]
    once: bool,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_config {
        let config = MonitorConfig::load_or_default(&args.config);
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let config = MonitorConfig::load(&args.config);

    // Stdout plus a daily-rotated file next to the configured log path
    let log_name = config
        .log_file
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "monitor.log".into());
    let file_appender = tracing_appender::rolling::daily(config.log_directory(), log_name);
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "media_intake=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    tracing::info!("Configuration: {}", args.config.display());
    tracing::info!("  - Input: {}", config.input_directory.display());
    tracing::info!("  - Output: {}", config.output_directory.display());
    tracing::info!("  - State file: {}", config.state_file.display());
    tracing::info!("  - Processor: {}", config.processor.command.join(" "));
    tracing::info!("  - Mode: {:?}", config.processor.mode);
    tracing::info!(
        "  - Stability: {} checks every {}s",
        config.stability_check_count,
        config.stability_check_interval
    );

    let daemon = IntakeDaemon::new(config);
    spawn_signal_listener(daemon.shutdown_token());

    let snapshot = if args.once {
        daemon.run_once().await
    } else {
        daemon.run().await
    };

    if snapshot.stats.files_failed > 0 {
        tracing::warn!("{} file(s) have failed so far, see the state file", snapshot.stats.files_failed);
    }

    Ok(())
}
