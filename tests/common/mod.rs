//! Common test utilities and helpers for ghbu tests
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ghbu::config::{BackupConfig, Token};
use ghbu::discovery::{Account, AccountKind, AccountTarget, CloneProtocol, Forge, ListingPolicy, RepoDescriptor, RepoPage};
use ghbu::error::{BackupError, BackupResult};
use ghbu::git::GitCommand;
use ghbu::retry::RetryPolicy;

/// Build descriptors owned by `owner`
pub fn repos(owner: &str, names: &[&str]) -> Vec<RepoDescriptor> {
    names.iter().map(|name| RepoDescriptor::new(owner, name)).collect()
}

/// Resolved settings pointing at `destination`, with no retry delay
pub fn backup_config(destination: &Path, target: AccountTarget, parallel: usize) -> BackupConfig {
    BackupConfig {
        destination: destination.to_path_buf(),
        replace: false,
        parallel,
        token: Token::new("ghp_test"),
        target,
        clone_protocol: CloneProtocol::Ssh,
        listing: ListingPolicy {
            page_size: 25,
            retry: RetryPolicy::immediate(2),
        },
    }
}

/// In-memory forge serving scripted pages
///
/// Pages are numbered from 1. A page can be told to fail a number of times
/// before it succeeds.
pub struct FakeForge {
    login: String,
    pages: Vec<Vec<RepoDescriptor>>,
    failures: Mutex<HashMap<u32, usize>>,
    calls: Mutex<Vec<u32>>,
    resolved: Mutex<Vec<AccountTarget>>,
}

impl FakeForge {
    pub fn new(login: &str, pages: Vec<Vec<RepoDescriptor>>) -> Self {
        Self {
            login: login.to_string(),
            pages,
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            resolved: Mutex::new(Vec::new()),
        }
    }

    /// Make `page` fail `times` times before answering
    pub fn failing(self, page: u32, times: usize) -> Self {
        self.failures.lock().unwrap().insert(page, times);
        self
    }

    /// Page numbers in the order they were requested, retries included
    pub fn page_calls(&self) -> Vec<u32> {
        self.calls.lock().unwrap().clone()
    }

    pub fn resolved_targets(&self) -> Vec<AccountTarget> {
        self.resolved.lock().unwrap().clone()
    }
}

#[async_trait]
impl Forge for FakeForge {
    async fn resolve_account(&self, target: &AccountTarget) -> BackupResult<Account> {
        self.resolved.lock().unwrap().push(target.clone());

        let account = match target {
            AccountTarget::Organization(org) => Account {
                kind: AccountKind::Organization,
                login: org.clone(),
                is_authenticated_user: false,
            },
            AccountTarget::User(Some(user)) if user == "ghost" => {
                return Err(BackupError::remote(format!("user {} not found", user)))
            }
            AccountTarget::User(user) => Account {
                kind: AccountKind::User,
                login: user.clone().unwrap_or_else(|| self.login.clone()),
                is_authenticated_user: user.is_none(),
            },
        };
        Ok(account)
    }

    async fn fetch_page(&self, _account: &Account, page: u32, _per_page: u8) -> BackupResult<RepoPage> {
        self.calls.lock().unwrap().push(page);

        if let Some(remaining) = self.failures.lock().unwrap().get_mut(&page) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BackupError::remote(format!("page {} unavailable", page)));
            }
        }

        let index = page as usize - 1;
        let repositories = self.pages.get(index).cloned().unwrap_or_default();
        let next_page = (index + 1 < self.pages.len()).then_some(page + 1);
        Ok(RepoPage {
            repositories,
            next_page,
        })
    }

    fn provider_name(&self) -> &'static str {
        "Fake"
    }
}

/// Git stand-in that records calls and tracks how many run at once
#[derive(Default)]
pub struct RecordingGit {
    delay: Duration,
    fail: Vec<String>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    clones: Mutex<Vec<String>>,
    pulls: Mutex<Vec<PathBuf>>,
}

impl RecordingGit {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    /// Make clones of these repository names fail
    pub fn failing_on(mut self, names: &[&str]) -> Self {
        self.fail = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn cloned(&self) -> Vec<String> {
        self.clones.lock().unwrap().clone()
    }

    pub fn pulled(&self) -> Vec<PathBuf> {
        self.pulls.lock().unwrap().clone()
    }

    async fn tracked(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GitCommand for RecordingGit {
    async fn clone_repository(&self, _url: &str, parent: &Path, name: &str) -> Result<()> {
        self.clones.lock().unwrap().push(name.to_string());
        self.tracked().await;

        if self.fail.iter().any(|n| n == name) {
            return Err(anyhow!("fatal: repository '{}' not found", name));
        }
        std::fs::create_dir_all(parent.join(name))?;
        Ok(())
    }

    async fn pull(&self, repo_dir: &Path) -> Result<()> {
        self.pulls.lock().unwrap().push(repo_dir.to_path_buf());
        self.tracked().await;
        Ok(())
    }
}

/// Shares a [`RecordingGit`] with the engine while the test keeps a handle
#[derive(Clone)]
pub struct SharedGit(pub Arc<RecordingGit>);

impl SharedGit {
    pub fn new(git: RecordingGit) -> (Self, Arc<RecordingGit>) {
        let git = Arc::new(git);
        (Self(git.clone()), git)
    }
}

#[async_trait]
impl GitCommand for SharedGit {
    async fn clone_repository(&self, url: &str, parent: &Path, name: &str) -> Result<()> {
        self.0.clone_repository(url, parent, name).await
    }

    async fn pull(&self, repo_dir: &Path) -> Result<()> {
        self.0.pull(repo_dir).await
    }
}
