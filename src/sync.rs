//! Backup Engine - Orchestrates bounded-concurrency repository backups
//!
//! The engine resolves the target account, lists its repositories, and hands
//! them to the [`WorkScheduler`], which keeps at most `parallel` git
//! operations running and stops dispatching once shutdown is requested.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::config::BackupConfig;
use crate::discovery::{list_repositories, Account, Forge, RepoDescriptor};
use crate::error::BackupResult;
use crate::git::{GitCli, GitClient, GitCommand, SyncAction};
use crate::github::GitHubClient;
use crate::shutdown::ShutdownSignal;

/// Counts from one pass of the scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub total: usize,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Shutdown was requested before every repository was dispatched
    pub cancelled: bool,
}

/// Results from a complete backup run
#[derive(Debug, Clone)]
pub struct BackupSummary {
    pub account: Account,
    pub report: DispatchReport,
    pub duration: Duration,
}

/// One line of a dry run
#[derive(Debug, Clone, Serialize)]
pub struct PlannedSync {
    pub repository: String,
    pub path: PathBuf,
    pub action: SyncAction,
}

/// Runs repository syncs with at most `limit` in flight
#[derive(Debug, Clone, Copy)]
pub struct WorkScheduler {
    limit: usize,
}

impl WorkScheduler {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Dispatch every repository in order, each at most once.
    ///
    /// A slot is taken before a sync starts and given back when it ends,
    /// whatever the outcome. Once `shutdown` fires no further repository is
    /// started, but everything already running is awaited before returning.
    pub async fn run<G>(
        &self,
        repositories: Vec<RepoDescriptor>,
        executor: Arc<GitClient<G>>,
        shutdown: &mut ShutdownSignal,
    ) -> DispatchReport
    where
        G: GitCommand + 'static,
    {
        let total = repositories.len();
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let succeeded = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));

        let mut workers = JoinSet::new();
        let mut dispatched = 0usize;
        let mut cancelled = false;

        for repo in repositories {
            if shutdown.is_triggered() {
                cancelled = true;
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    cancelled = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let executor = executor.clone();
            let succeeded = succeeded.clone();
            let failed = failed.clone();

            dispatched += 1;
            workers.spawn(async move {
                let _permit = permit;

                match executor.sync_repository(&repo).await {
                    Ok(action) => {
                        debug!(repo = %repo.full_name, %action, "backup finished");
                        succeeded.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => {
                        eprintln!("error backing up repository {}: {}", repo.full_name, e);
                        debug!(repo = %repo.full_name, "backup failed: {:?}", e);
                        failed.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });
        }

        if cancelled {
            println!("cleaning up...");
            info!(
                "Shutdown requested, waiting for {} running backups",
                workers.len()
            );
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Backup task ended abnormally: {}", e);
                failed.fetch_add(1, Ordering::SeqCst);
            }
        }

        DispatchReport {
            total,
            dispatched,
            succeeded: succeeded.load(Ordering::SeqCst),
            failed: failed.load(Ordering::SeqCst),
            cancelled,
        }
    }
}

/// The main engine that backs up one account
pub struct BackupEngine<G = GitCli> {
    config: Arc<BackupConfig>,
    forge: Arc<dyn Forge>,
    executor: Arc<GitClient<G>>,
}

impl BackupEngine<GitCli> {
    /// Create an engine talking to GitHub and the system `git`
    pub fn from_config(config: BackupConfig) -> BackupResult<Self> {
        let forge = GitHubClient::new(config.token.expose())?;
        Ok(Self::new(config, Arc::new(forge), GitCli::default()))
    }
}

impl<G: GitCommand + 'static> BackupEngine<G> {
    pub fn new(config: BackupConfig, forge: Arc<dyn Forge>, git: G) -> Self {
        let executor = GitClient::new(
            git,
            config.destination.clone(),
            config.replace,
            config.clone_protocol,
        );

        Self {
            config: Arc::new(config),
            forge,
            executor: Arc::new(executor),
        }
    }

    /// Confirm the account and list its repositories
    pub async fn discover(&self) -> BackupResult<(Account, Vec<RepoDescriptor>)> {
        let account = self.forge.resolve_account(&self.config.target).await?;
        let repositories =
            list_repositories(self.forge.as_ref(), &account, &self.config.listing).await?;
        Ok((account, repositories))
    }

    /// Run a complete backup: resolve, list, then sync every repository.
    ///
    /// Account and listing errors abort the run. Per-repository failures are
    /// logged and counted in the summary.
    pub async fn run(&self, mut shutdown: ShutdownSignal) -> BackupResult<BackupSummary> {
        let start_time = Instant::now();

        let (account, repositories) = self.discover().await?;

        println!("Backing up {} {}...", account.kind, account.login);
        println!(
            "Backing up {} repositories to {}...",
            repositories.len(),
            self.executor.destination().display()
        );

        let scheduler = WorkScheduler::new(self.config.parallel);
        let report = scheduler
            .run(repositories, self.executor.clone(), &mut shutdown)
            .await;

        let duration = start_time.elapsed();
        info!(
            "Backup completed in {:.2}s: {} dispatched, {} successful, {} failed",
            duration.as_secs_f64(),
            report.dispatched,
            report.succeeded,
            report.failed
        );

        Ok(BackupSummary {
            account,
            report,
            duration,
        })
    }

    /// Work out what a run would do without running git or touching the disk
    pub async fn dry_run(&self) -> BackupResult<(Account, Vec<PlannedSync>)> {
        let (account, repositories) = self.discover().await?;

        let mut plan = Vec::with_capacity(repositories.len());
        for repo in &repositories {
            let action = self.executor.plan(repo).await?;
            plan.push(PlannedSync {
                repository: repo.full_name.clone(),
                path: self.executor.repo_directory(repo),
                action,
            });
        }

        Ok((account, plan))
    }

    /// Get configuration for external inspection
    pub fn config(&self) -> &BackupConfig {
        &self.config
    }
}
