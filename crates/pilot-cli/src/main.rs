//! Terminal entry point: start a session, stream a run, tear down.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use pilot_core::config::Config;
use pilot_core::protocol::format_frame;
use pilot_core::provision;
use pilot_core::surface::Surface;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pilot")]
#[command(version)]
#[command(about = "Drive a remote device toward an objective")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to an alternate config file
    #[arg(long, value_name = "PATH")]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one objective and stream events to stdout
    Run {
        /// The natural-language objective
        objective: String,

        /// Keep the session (and any sandbox) alive after the run
        #[arg(long)]
        keep_session: bool,
    },
    /// Boot the configured emulator and wait for it to be ready
    Provision,
    /// Stop the configured emulator if one is running
    StopEmulator,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(std::path::Path::new(path))?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Run {
            objective,
            keep_session,
        } => run_objective(config, &objective, keep_session).await,
        Commands::Provision => {
            provision::ensure_emulator(&config.emulator)
                .await
                .context("provision emulator")?;
            println!("emulator ready");
            Ok(())
        }
        Commands::StopEmulator => {
            provision::kill_emulator(&config.emulator.adb_path)
                .await
                .context("stop emulator")?;
            println!("emulator stopped");
            Ok(())
        }
    }
}

async fn run_objective(config: Config, objective: &str, keep_session: bool) -> Result<()> {
    let surface = Surface::new(config);
    let started = surface
        .start_session()
        .await
        .map_err(|e| anyhow!(e).context("start session"))?;
    println!("{}", serde_json::to_string(&started)?);

    let mut stream = surface
        .run_objective(&started.session_id, objective)
        .map_err(|e| anyhow!(e).context("start run"))?;
    let mut failed = false;
    while let Some(event) = stream.next().await {
        failed = failed || event.kind == pilot_core::protocol::TaskEventKind::TaskFailed;
        print!("{}", format_frame(&event));
    }

    if !keep_session {
        surface
            .stop_session(&started.session_id)
            .await
            .map_err(|e| anyhow!(e).context("stop session"))?;
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
