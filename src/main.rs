#![forbid(unsafe_code)]

//! `campaign-client`: lifecycle tooling for fuzzing campaigns.
//!
//! Validates engine configuration and drives the shell resetter against the
//! SUT outside of a campaign, so lifecycle scripts can be debugged on their
//! own.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use campaign_client::config::EngineConfig;
use campaign_client::reset::shell::policy::Phase;
use campaign_client::reset::shell::ShellSingleton;
use campaign_client::reset::Resetter;
use campaign_client::sink::{ProgressSink, TracingSink};
use campaign_client::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum PhaseArg {
    Start,
    Reset,
    Stop,
}

impl From<PhaseArg> for Phase {
    fn from(arg: PhaseArg) -> Self {
        match arg {
            PhaseArg::Start => Self::Start,
            PhaseArg::Reset => Self::Reset,
            PhaseArg::Stop => Self::Stop,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one lifecycle request through the shell resetter, then tear it
    /// down.
    Exec {
        /// Lifecycle request to run.
        #[arg(value_enum)]
        phase: PhaseArg,
    },
    /// Validate the configuration and the lifecycle script combination.
    Lint,
}

#[derive(Debug, Parser)]
#[command(name = "campaign-client", about = "Fuzzing campaign client tooling", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = EngineConfig::load_from_path(&args.config)?;
    info!(config = %args.config.display(), "configuration loaded");

    match args.command {
        Command::Lint => {
            let scripts = config.shell_scripts();
            if scripts.is_empty() {
                warn!("no lifecycle scripts defined; the noop resetter will be used");
            } else {
                let plan = scripts.plan_reset(true)?;
                info!(?plan, "first reset plan");
                let plan = scripts.plan_reset(false)?;
                info!(?plan, "subsequent reset plan");
            }
            info!("configuration is valid");
            Ok(())
        }
        Command::Exec { phase } => exec(&config, phase.into()).await,
    }
}

async fn exec(config: &EngineConfig, phase: Phase) -> Result<()> {
    let sink = Arc::new(TracingSink::new());
    let mut resetter = ShellSingleton::new(
        config.shell_scripts(),
        Arc::clone(&sink) as Arc<dyn ProgressSink>,
        config.phase_timeout(),
    );
    let env = config.capture_env();

    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    let signal_handle = tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_ct.cancel();
    });

    let result = match phase {
        Phase::Start => resetter.exec_start(&env, &ct).await,
        Phase::Reset => resetter.exec_reset(&env, &ct).await,
        Phase::Stop => resetter.exec_stop(&env, &ct).await,
    };
    if let Err(err) = &result {
        error!(%err, %phase, "lifecycle request failed");
    }

    let terminated = resetter.terminate(&CancellationToken::new()).await;
    signal_handle.abort();
    sink.terminate()?;

    result?;
    terminated?;
    info!(%phase, "lifecycle request completed");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
