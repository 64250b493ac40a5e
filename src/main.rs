use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ghbu::config::TOKEN_ENV_VAR;
use ghbu::shutdown::spawn_signal_listener;
use ghbu::sync::PlannedSync;
use ghbu::{shutdown_channel, BackupConfig, BackupEngine, CliOverrides, CloneProtocol, Config};

#[derive(Parser)]
#[command(name = "ghbu")]
#[command(about = "Back up every GitHub repository of a user or organization")]
#[command(version)]
struct Cli {
    /// GitHub organization to back up (takes precedence over --user)
    #[arg(short, long)]
    org: Option<String>,

    /// GitHub user to back up (defaults to the token's owner)
    #[arg(short, long)]
    user: Option<String>,

    /// Existing directory the repositories are backed up into
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// GitHub personal access token
    #[arg(short, long, env = TOKEN_ENV_VAR, hide_env_values = true)]
    token: Option<String>,

    /// Delete and re-clone repositories that already exist locally
    #[arg(short, long)]
    replace: bool,

    /// Number of repositories to back up at the same time [default: 2]
    #[arg(short, long)]
    parallel: Option<usize>,

    /// Preferred clone URL protocol [default: ssh]
    #[arg(long, value_enum)]
    protocol: Option<CloneProtocol>,

    /// List what would be cloned, pulled or replaced without running git
    #[arg(long)]
    dry_run: bool,

    /// Print the dry-run plan as JSON
    #[arg(long, requires = "dry_run")]
    json: bool,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            org: self.org.clone(),
            user: self.user.clone(),
            dir: self.dir.clone(),
            token: self.token.clone(),
            replace: self.replace,
            parallel: self.parallel,
            clone_protocol: self.protocol,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_logging(cli.verbose, &config.logging.level);
    info!("Starting ghbu v{}", env!("CARGO_PKG_VERSION"));

    let backup_config = BackupConfig::resolve(&config, cli.overrides())?;
    debug!("Resolved configuration: {:?}", backup_config);

    let engine = BackupEngine::from_config(backup_config)?;

    if cli.dry_run {
        return cmd_dry_run(&engine, cli.json).await;
    }

    cmd_backup(&engine).await
}

/// Initialize logging; `RUST_LOG` wins over `--verbose`, which wins over the config file
fn init_logging(verbose: bool, configured_level: &str) {
    let default_level = if verbose { "debug" } else { configured_level };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries progress lines, logs go to stderr
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&std::path::Path>) -> Result<Config> {
    let config = match config_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    Ok(config)
}

/// Back up every repository, stopping early on interrupt
async fn cmd_backup(engine: &BackupEngine) -> Result<()> {
    let (trigger, signal) = shutdown_channel();
    let listener = spawn_signal_listener(trigger);

    let summary = engine.run(signal).await;
    listener.abort();
    let summary = match summary {
        Ok(summary) => summary,
        // Nothing was backed up: the account or its listing is unusable
        Err(e) if e.is_fatal() => return Err(e).context("backup aborted"),
        Err(e) => return Err(e).context("backup failed"),
    };

    let report = &summary.report;
    println!("Backup finished. Took {:.2?}", summary.duration);
    println!(
        "   {} backed up, {} failed, {} not started",
        report.succeeded,
        report.failed,
        report.total - report.dispatched
    );

    Ok(())
}

/// Print the backup plan without running git
async fn cmd_dry_run(engine: &BackupEngine, json: bool) -> Result<()> {
    let (account, plan) = engine.dry_run().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!(
        "Would back up {} repositories of {} {} to {}:",
        plan.len(),
        account.kind,
        account.login,
        engine.config().destination.display()
    );
    for PlannedSync {
        repository,
        path,
        action,
    } in &plan
    {
        println!("   {:<8} {} -> {}", action.to_string(), repository, path.display());
    }

    Ok(())
}
