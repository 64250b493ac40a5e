use async_trait::async_trait;
use octocrab::models::Repository;
use octocrab::{Octocrab, Page};
use tracing::{debug, info, warn};

use crate::discovery::{Account, AccountKind, AccountTarget, Forge, RepoDescriptor, RepoPage};
use crate::error::{BackupError, BackupResult};

/// Affiliation filter that limits the authenticated listing to owned repositories
const OWNER_AFFILIATION: &str = "owner";

/// Token prefixes GitHub currently issues
const TOKEN_PREFIXES: &[&str] = &["ghp_", "gho_", "ghs_", "ghu_", "github_pat_"];

/// GitHub client wrapper authenticated with a personal access token
///
/// Cloning is cheap; the underlying octocrab client is reference counted and
/// safe to share between tasks.
#[derive(Clone)]
pub struct GitHubClient {
    client: Octocrab,
}

impl GitHubClient {
    /// Create a new GitHub client from a personal access token
    pub fn new(token: &str) -> BackupResult<Self> {
        if !looks_like_github_token(token) {
            warn!(
                "token doesn't look like a GitHub token (expected a prefix such as ghp_ or github_pat_)"
            );
        }

        let client = Octocrab::builder()
            .personal_token(token.to_string())
            .build()
            .map_err(|e| BackupError::remote_with_source("failed to create GitHub client", e))?;

        Ok(Self { client })
    }

    async fn authenticated_login(&self) -> BackupResult<String> {
        let user = self.client.current().user().await.map_err(|e| {
            BackupError::remote_with_source(
                "failed to get the authenticated user. Check your token.",
                e,
            )
        })?;
        Ok(user.login)
    }

    async fn list_own_repositories(&self, account: &Account, page: u8, per_page: u8) -> BackupResult<Page<Repository>> {
        self.client
            .current()
            .list_repos_for_authenticated_user()
            .affiliation(OWNER_AFFILIATION)
            .per_page(per_page)
            .page(page)
            .send()
            .await
            .map_err(|e| {
                BackupError::remote_with_source(
                    format!("failed to fetch repositories of {} page {}", account.login, page),
                    e,
                )
            })
    }

    async fn list_user_repositories(&self, account: &Account, page: u8, per_page: u8) -> BackupResult<Page<Repository>> {
        self.client
            .users(account.login.clone())
            .repos()
            .per_page(per_page)
            .page(page)
            .send()
            .await
            .map_err(|e| {
                BackupError::remote_with_source(
                    format!("failed to fetch repositories of user {} page {}", account.login, page),
                    e,
                )
            })
    }

    async fn list_organization_repositories(&self, account: &Account, page: u8, per_page: u8) -> BackupResult<Page<Repository>> {
        self.client
            .orgs(account.login.as_str())
            .list_repos()
            .per_page(per_page)
            .page(page)
            .send()
            .await
            .map_err(|e| {
                BackupError::remote_with_source(
                    format!(
                        "failed to fetch repositories for organization {} page {}",
                        account.login, page
                    ),
                    e,
                )
            })
    }
}

#[async_trait]
impl Forge for GitHubClient {
    async fn resolve_account(&self, target: &AccountTarget) -> BackupResult<Account> {
        match target {
            AccountTarget::Organization(name) => {
                debug!("Resolving organization: {}", name);
                let org = self.client.orgs(name.as_str()).get().await.map_err(|e| {
                    BackupError::remote_with_source(format!("failed to get organization {}", name), e)
                })?;

                Ok(Account {
                    kind: AccountKind::Organization,
                    login: org.login,
                    is_authenticated_user: false,
                })
            }
            AccountTarget::User(None) => {
                let login = self.authenticated_login().await?;
                info!("Authenticated as GitHub user: {}", login);

                Ok(Account {
                    kind: AccountKind::User,
                    login,
                    is_authenticated_user: true,
                })
            }
            AccountTarget::User(Some(name)) => {
                debug!("Resolving user: {}", name);
                let profile = self.client.users(name.clone()).profile().await.map_err(|e| {
                    BackupError::remote_with_source(format!("failed to get user {}", name), e)
                })?;

                // The authenticated endpoint also returns private repositories
                let is_authenticated_user = match self.authenticated_login().await {
                    Ok(login) => login.eq_ignore_ascii_case(&profile.login),
                    Err(e) => {
                        debug!("Could not determine the authenticated user: {}", e);
                        false
                    }
                };

                Ok(Account {
                    kind: AccountKind::User,
                    login: profile.login,
                    is_authenticated_user,
                })
            }
        }
    }

    async fn fetch_page(&self, account: &Account, page: u32, per_page: u8) -> BackupResult<RepoPage> {
        // octocrab's listing builders take page numbers up to 255
        let page_param = u8::try_from(page).map_err(|_| {
            BackupError::remote(format!(
                "{} has more than {} pages of repositories",
                account.login,
                u8::MAX
            ))
        })?;

        let fetched = match (account.kind, account.is_authenticated_user) {
            (AccountKind::Organization, _) => {
                self.list_organization_repositories(account, page_param, per_page).await?
            }
            (AccountKind::User, true) => {
                self.list_own_repositories(account, page_param, per_page).await?
            }
            (AccountKind::User, false) => {
                self.list_user_repositories(account, page_param, per_page).await?
            }
        };

        let next_page = fetched
            .next
            .as_ref()
            .map(|link| page_number(link.query()).unwrap_or(page + 1));

        let repositories = fetched
            .items
            .iter()
            .filter(|repo| {
                // Already filtered server side; drop anything owned elsewhere.
                !(account.kind == AccountKind::User && account.is_authenticated_user)
                    || owned_by(repo.owner.as_ref().map(|o| o.login.as_str()), &account.login)
            })
            .map(RepoDescriptor::from)
            .collect();

        Ok(RepoPage {
            repositories,
            next_page,
        })
    }

    fn provider_name(&self) -> &'static str {
        "GitHub"
    }
}

fn owned_by(owner: Option<&str>, login: &str) -> bool {
    owner
        .map(|owner| owner.eq_ignore_ascii_case(login))
        .unwrap_or(false)
}

/// Extract the `page` parameter from the query string of a pagination link
fn page_number(query: Option<&str>) -> Option<u32> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "page")
        .and_then(|(_, value)| value.parse().ok())
}

/// Whether `token` has one of the prefixes GitHub issues
pub fn looks_like_github_token(token: &str) -> bool {
    TOKEN_PREFIXES.iter().any(|prefix| token.starts_with(prefix))
}
