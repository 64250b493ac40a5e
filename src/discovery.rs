//! Repository discovery
//!
//! This module defines what the backup pipeline knows about a remote
//! repository ([`RepoDescriptor`]), the provider interface used to enumerate
//! them ([`Forge`]), and the paginated lister that walks every page of an
//! account with bounded per-page retries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::error::{BackupError, BackupResult};
use crate::retry::{with_retry, RetryPolicy};

/// Repositories requested per page
pub const DEFAULT_PAGE_SIZE: u8 = 25;

/// Clone URL preference for a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CloneProtocol {
    /// Use SSH (git@github.com:user/repo.git)
    #[default]
    Ssh,
    /// Use HTTPS (https://github.com/user/repo.git)
    Https,
}

/// The minimal information needed to back up one remote repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoDescriptor {
    /// Owner and name, e.g. "octocat/Hello-World"
    pub full_name: String,

    /// Short name, also the name of the local subdirectory
    pub name: String,

    pub ssh_url: Option<String>,
    pub https_url: Option<String>,
}

impl RepoDescriptor {
    pub fn new(owner: &str, name: &str) -> Self {
        Self {
            full_name: format!("{}/{}", owner, name),
            name: name.to_string(),
            ssh_url: Some(format!("git@github.com:{}/{}.git", owner, name)),
            https_url: Some(format!("https://github.com/{}/{}.git", owner, name)),
        }
    }

    /// URL to clone from, preferring `protocol` and falling back to the other one
    pub fn clone_url(&self, protocol: CloneProtocol) -> Option<&str> {
        let (preferred, fallback) = match protocol {
            CloneProtocol::Ssh => (&self.ssh_url, &self.https_url),
            CloneProtocol::Https => (&self.https_url, &self.ssh_url),
        };

        preferred
            .as_deref()
            .filter(|url| !url.is_empty())
            .or_else(|| fallback.as_deref().filter(|url| !url.is_empty()))
    }
}

impl From<&octocrab::models::Repository> for RepoDescriptor {
    fn from(repo: &octocrab::models::Repository) -> Self {
        let full_name = repo.full_name.clone().unwrap_or_else(|| {
            let owner = repo
                .owner
                .as_ref()
                .map(|o| o.login.as_str())
                .unwrap_or("unknown");
            format!("{}/{}", owner, repo.name)
        });

        Self {
            full_name,
            name: repo.name.clone(),
            ssh_url: repo.ssh_url.clone(),
            https_url: repo.clone_url.as_ref().map(|u| u.to_string()),
        }
    }
}

/// Kind of account whose repositories are backed up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    User,
    Organization,
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountKind::User => write!(f, "user"),
            AccountKind::Organization => write!(f, "organization"),
        }
    }
}

/// Account requested on the command line, before it is confirmed remotely
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountTarget {
    Organization(String),
    /// A named user, or the authenticated user when `None`
    User(Option<String>),
}

impl AccountTarget {
    /// Organization wins when both are given.
    pub fn from_names(org: Option<String>, user: Option<String>) -> Self {
        let non_empty = |s: Option<String>| s.filter(|v| !v.trim().is_empty());

        match (non_empty(org), non_empty(user)) {
            (Some(org), _) => AccountTarget::Organization(org),
            (None, user) => AccountTarget::User(user),
        }
    }
}

/// An account confirmed to exist on the forge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub kind: AccountKind,
    /// Canonical login as reported by the forge
    pub login: String,
    /// True when this is the account the token belongs to
    pub is_authenticated_user: bool,
}

/// One page of a repository listing
#[derive(Debug, Clone, Default)]
pub struct RepoPage {
    pub repositories: Vec<RepoDescriptor>,
    /// Page number the server says comes next, `None` on the last page
    pub next_page: Option<u32>,
}

/// Remote repository provider
///
/// Implementations are shared across tasks and must be safe for concurrent
/// use.
#[async_trait]
pub trait Forge: Send + Sync {
    /// Confirm the target account exists and return its canonical identity
    async fn resolve_account(&self, target: &AccountTarget) -> BackupResult<Account>;

    /// Fetch a single page of the account's repositories
    async fn fetch_page(&self, account: &Account, page: u32, per_page: u8) -> BackupResult<RepoPage>;

    /// Provider name for display/logging
    fn provider_name(&self) -> &'static str;
}

/// Page size and retry settings for a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingPolicy {
    pub page_size: u8,
    pub retry: RetryPolicy,
}

impl Default for ListingPolicy {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

/// Enumerate every repository of `account`, in the order the forge returns them.
///
/// Each page is retried on its own; a page that still fails after
/// `policy.retry.max_retries` retries fails the whole listing and nothing
/// fetched so far is returned.
pub async fn list_repositories(
    forge: &dyn Forge,
    account: &Account,
    policy: &ListingPolicy,
) -> BackupResult<Vec<RepoDescriptor>> {
    debug!(
        "Listing repositories for {} {} via {}",
        account.kind,
        account.login,
        forge.provider_name()
    );

    let mut repositories = Vec::new();
    let mut page = 1u32;

    loop {
        let label = format!("listing {} page {}", account.login, page);
        let fetched = with_retry(&policy.retry, &label, || {
            forge.fetch_page(account, page, policy.page_size)
        })
        .await?;

        debug!(
            "Fetched page {} with {} repositories",
            page,
            fetched.repositories.len()
        );
        for repo in &fetched.repositories {
            debug!(repo = %repo.full_name, ssh = ?repo.ssh_url, https = ?repo.https_url, "listed repository");
        }
        repositories.extend(fetched.repositories);

        match fetched.next_page {
            Some(next) if next > page => page = next,
            Some(next) => {
                return Err(BackupError::remote(format!(
                    "server pointed page {} back to page {}",
                    page, next
                )));
            }
            None => break,
        }
    }

    info!(
        "Found {} repositories for {} {}",
        repositories.len(),
        account.kind,
        account.login
    );
    Ok(repositories)
}
