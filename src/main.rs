//! maestro-ios-device
//!
//! Entry point: parses the command line, wires signals to a cancellation
//! token and renders session progress.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use maestro_ios_device::commands::{render_event, SetupCommand, StartCommand};
use maestro_ios_device::core::{EventBus, APP_NAME, VERSION};
use maestro_ios_device::SessionError;

#[derive(Parser)]
#[command(name = "maestro-ios-device", version, about = "Run Maestro tests on real iOS devices")]
#[command(subcommand_negates_reqs = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Apple Developer Team ID
    #[arg(long, required = true)]
    team_id: Option<String>,

    /// Target device UDID
    #[arg(long, required = true)]
    device: Option<String>,

    /// Local port for the Maestro connection (0 auto-assigns from 6001)
    #[arg(long, default_value_t = 0)]
    driver_host_port: u16,

    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Install the patched Maestro JARs and the iOS runner
    Setup,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    debug!("{} v{}", APP_NAME, VERSION);

    let result = match cli.command {
        Some(Command::Setup) => SetupCommand { config_path: cli.config }.execute().await,
        None => run_session(cli).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<SessionError>() {
            Some(session_err) if session_err.is_cancellation() => ExitCode::SUCCESS,
            Some(session_err) => {
                eprintln!("❌ {}", session_err);
                if let Some(hint) = session_err.remediation() {
                    eprintln!("   {}", hint);
                }
                ExitCode::FAILURE
            }
            None => {
                eprintln!("❌ {:#}", err);
                ExitCode::FAILURE
            }
        },
    }
}

async fn run_session(cli: Cli) -> anyhow::Result<()> {
    let (Some(team_id), Some(device)) = (cli.team_id, cli.device) else {
        anyhow::bail!("--team-id and --device are required");
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            wait_for_signal().await;
            cancel.cancel();
        }
    });

    let events = Arc::new(EventBus::new());
    let subscription = events.subscribe();
    let printer = std::thread::spawn(move || {
        for event in subscription.iter() {
            if let Some(line) = render_event(&event) {
                println!("{}", line);
            }
        }
    });

    let command = StartCommand {
        team_id,
        device,
        driver_host_port: cli.driver_host_port,
        config_path: cli.config,
    };
    let result = command.execute(Arc::clone(&events), cancel).await;

    events.close();
    if printer.join().is_err() {
        debug!("Event printer panicked");
    }
    result
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Resolve on SIGINT, or SIGTERM on unix
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        if let Ok(mut terminate) = signal(SignalKind::terminate()) {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
            return;
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        debug!("Cannot listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
