//! SCM integration daemon
//!
//! Listens on a Unix socket for authenticated provisioning and analysis
//! requests from the application server.

#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use scm_common::auth::{AuthGuard, HmacKeyDerivation, TransactionKey, random_nonce, unix_now};
use scm_common::config::{DaemonConfig, Severity, validate_config};
use scm_common::executor::PrivilegedExecutor;
use scm_common::logging::{LogConfig, init_logging};
use scmd::adapters::{AdapterContext, build_adapter};
use scmd::analysis::{AnalysisJobManager, AnalysisSettings};
use scmd::dispatch::SecuredDispatcher;
use scmd::executor::UnixExecutor;
use scmd::notify::build_notifier;
use scmd::server::Server;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "scmd")]
#[command(author, version, about = "SCM integration daemon - repository provisioning and analysis")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "SCMD_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Override the socket path from the configuration
    #[arg(short, long, global = true)]
    socket: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (default)
    Serve,

    /// Validate the configuration and report problems
    CheckConfig {
        /// Print the effective configuration as TOML
        #[arg(long)]
        show: bool,
    },

    /// Mint a transaction key from the configured secret
    MintKey,
}

fn load_config(cli: &Cli) -> Result<DaemonConfig> {
    let mut config = DaemonConfig::load(cli.config.as_deref())?;
    if let Some(socket) = &cli.socket {
        config.daemon.socket_path = socket.clone();
    }
    Ok(config)
}

fn check_config(config: &DaemonConfig, show: bool) -> Result<()> {
    let findings = validate_config(config);
    for finding in &findings {
        println!("{}", finding);
    }
    if show {
        let mut shown = config.clone();
        if shown.daemon.shared_secret.is_some() {
            shown.daemon.shared_secret = Some("<redacted>".to_string());
        }
        print!("{}", toml::to_string_pretty(&shown)?);
    }
    let errors = findings
        .iter()
        .filter(|f| f.severity == Severity::Error)
        .count();
    if errors > 0 {
        bail!("{} configuration error(s)", errors);
    }
    println!("Configuration OK ({} warning(s))", findings.len());
    Ok(())
}

fn mint_key(config: &DaemonConfig) -> Result<()> {
    let secret = config.shared_secret()?;
    let derivation = HmacKeyDerivation::new(&secret)?;
    let key = TransactionKey::mint(&derivation, random_nonce(), unix_now() as u32);
    println!("{}", key.encode());
    Ok(())
}

async fn shutdown_signal() {
    let mut terminate =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                None
            }
        };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for ctrl-c");
            }
        }
        Some(()) = async {
            match terminate.as_mut() {
                Some(signal) => signal.recv().await,
                None => std::future::pending().await,
            }
        } => {}
    }
}

async fn serve(config: DaemonConfig, verbose: bool) -> Result<()> {
    let mut log_config = LogConfig::from_section(&config.logging);
    if verbose {
        log_config = log_config.with_level("debug");
    }
    let _guards = init_logging(&log_config)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting SCM integration daemon...");

    let findings = validate_config(&config);
    for finding in &findings {
        match finding.severity {
            Severity::Warning => warn!(field = finding.field, "{}", finding.message),
            Severity::Error => error!(field = finding.field, "{}", finding.message),
        }
    }
    if findings.iter().any(|f| f.severity == Severity::Error) {
        bail!("Refusing to start with an invalid configuration");
    }

    let secret = config
        .shared_secret()
        .context("Failed to load the signing secret")?;
    let guard = AuthGuard::new(
        Box::new(HmacKeyDerivation::new(&secret)?),
        config.daemon.max_clock_skew_secs,
    );

    let config = Arc::new(config);
    let executor: Arc<dyn PrivilegedExecutor> = Arc::new(UnixExecutor::new());
    let adapter = build_adapter(AdapterContext::new(executor.clone(), config.clone()));
    adapter.base().check_platform(adapter.kind())?;

    let jobs = AnalysisJobManager::new(
        adapter.clone(),
        executor,
        build_notifier(&config.notify),
        AnalysisSettings::from_config(&config),
    );
    let dispatcher = Arc::new(SecuredDispatcher::new(guard, adapter, jobs));

    let server = Server::new(dispatcher.clone(), config.daemon.socket_path.clone());
    let listener = server.bind()?;
    server.serve(listener, shutdown_signal()).await?;

    let running = dispatcher.jobs().running();
    if !running.is_empty() {
        warn!(jobs = ?running, "Exiting with analysis jobs still running");
    }
    info!("Daemon stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, cli.verbose).await,
        Commands::CheckConfig { show } => check_config(&config, show),
        Commands::MintKey => mint_key(&config),
    }
}
