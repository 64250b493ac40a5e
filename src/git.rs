use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info};

use crate::discovery::{CloneProtocol, RepoDescriptor};
use crate::error::{BackupError, BackupResult};

/// The two git invocations a backup needs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GitCommand: Send + Sync {
    /// Clone `url` into `parent/name`
    async fn clone_repository(&self, url: &str, parent: &Path, name: &str) -> Result<()>;

    /// Pull the latest changes inside an existing working copy
    async fn pull(&self, repo_dir: &Path) -> Result<()>;
}

/// Runs the `git` executable found on PATH
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str], cwd: &Path) -> Result<()> {
        debug!("Running {} {} in {}", self.program, args.join(" "), cwd.display());

        let mut std_command = std::process::Command::new(&self.program);
        std_command
            .args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Keep Ctrl-C in the terminal from reaching git; in-flight clones finish.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_command.process_group(0);
        }

        let mut command = AsyncCommand::from(std_command);
        let output = command
            .output()
            .await
            .with_context(|| format!("Failed to execute {} {}", self.program, args[0]))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "git {} failed ({}): {}",
                args[0],
                output.status,
                stderr.trim()
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl GitCommand for GitCli {
    async fn clone_repository(&self, url: &str, parent: &Path, name: &str) -> Result<()> {
        self.run(&["clone", url, name], parent).await
    }

    async fn pull(&self, repo_dir: &Path) -> Result<()> {
        self.run(&["pull"], repo_dir).await
    }
}

/// Whether a repository already has a local copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalState {
    Absent,
    Present,
}

/// Determine whether `root/name` exists.
///
/// "Not found" is the normal `Absent` outcome; any other error (permission
/// denied, I/O failure) is reported as a filesystem error.
pub async fn probe_local(root: &Path, name: &str) -> BackupResult<LocalState> {
    let path = root.join(name);
    match tokio::fs::metadata(&path).await {
        Ok(_) => Ok(LocalState::Present),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LocalState::Absent),
        Err(e) => Err(BackupError::filesystem(path, e)),
    }
}

/// What the executor does for one repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    /// No local copy: clone it
    Clone,
    /// Local copy kept: pull inside it
    Pull,
    /// Local copy deleted, then cloned again
    Replace,
}

impl SyncAction {
    pub fn for_state(state: LocalState, replace: bool) -> Self {
        match (state, replace) {
            (LocalState::Absent, _) => SyncAction::Clone,
            (LocalState::Present, false) => SyncAction::Pull,
            (LocalState::Present, true) => SyncAction::Replace,
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::Clone => write!(f, "clone"),
            SyncAction::Pull => write!(f, "pull"),
            SyncAction::Replace => write!(f, "replace"),
        }
    }
}

/// Clones or updates single repositories under the destination root
pub struct GitClient<G = GitCli> {
    git: G,
    destination: PathBuf,
    replace: bool,
    protocol: CloneProtocol,
}

impl<G: GitCommand> GitClient<G> {
    pub fn new(git: G, destination: impl Into<PathBuf>, replace: bool, protocol: CloneProtocol) -> Self {
        Self {
            git,
            destination: destination.into(),
            replace,
            protocol,
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Local working copy location for a repository
    pub fn repo_directory(&self, repo: &RepoDescriptor) -> PathBuf {
        self.destination.join(&repo.name)
    }

    /// Decide what [`sync_repository`](Self::sync_repository) would do, without doing it
    pub async fn plan(&self, repo: &RepoDescriptor) -> BackupResult<SyncAction> {
        let state = probe_local(&self.destination, &repo.name).await?;
        Ok(SyncAction::for_state(state, self.replace))
    }

    /// Clone, update or replace one repository.
    ///
    /// Returns the action that was carried out. Every failure carries the
    /// repository so callers can log it and move on.
    pub async fn sync_repository(&self, repo: &RepoDescriptor) -> BackupResult<SyncAction> {
        let action = self.plan(repo).await?;
        debug!("{}: {}", repo.full_name, action);

        match action {
            SyncAction::Clone => self.clone_repository(repo).await?,
            SyncAction::Pull => self.update_repository(repo).await?,
            SyncAction::Replace => {
                let target = self.repo_directory(repo);
                info!("Removing existing copy of {} at {}", repo.full_name, target.display());
                tokio::fs::remove_dir_all(&target)
                    .await
                    .map_err(|e| BackupError::filesystem(&target, e))?;
                self.clone_repository(repo).await?;
            }
        }

        println!("Done backing up {}.", repo.full_name);
        Ok(action)
    }

    async fn clone_repository(&self, repo: &RepoDescriptor) -> BackupResult<()> {
        let url = repo
            .clone_url(self.protocol)
            .ok_or_else(|| BackupError::sync(&repo.full_name, "no clone URL available"))?;

        println!("Backing up {}...", repo.full_name);
        debug!("Using clone URL: {}", url);

        self.git
            .clone_repository(url, &self.destination, &repo.name)
            .await
            .map_err(|e| BackupError::sync(&repo.full_name, format!("{:#}", e)))
    }

    async fn update_repository(&self, repo: &RepoDescriptor) -> BackupResult<()> {
        println!("Updating {}...", repo.full_name);

        self.git
            .pull(&self.repo_directory(repo))
            .await
            .map_err(|e| BackupError::sync(&repo.full_name, format!("{:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use assert_matches::assert_matches;
    use mockall::predicate::{always, eq};
    use predicates::prelude::*;

    fn hello_world() -> RepoDescriptor {
        RepoDescriptor::new("octocat", "Hello-World")
    }

    #[tokio::test]
    async fn test_probe_absent_and_present() {
        let temp = assert_fs::TempDir::new().unwrap();
        assert_eq!(
            probe_local(temp.path(), "Hello-World").await.unwrap(),
            LocalState::Absent
        );

        temp.child("Hello-World").create_dir_all().unwrap();
        assert_eq!(
            probe_local(temp.path(), "Hello-World").await.unwrap(),
            LocalState::Present
        );
    }

    #[tokio::test]
    async fn test_probe_reports_other_errors_as_filesystem() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("plain-file");
        file.write_str("not a directory").unwrap();

        assert_matches!(
            probe_local(file.path(), "repo").await,
            Err(BackupError::Filesystem { .. })
        );
    }

    #[tokio::test]
    async fn test_probe_error_is_returned_for_that_repository() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("plain-file");
        file.write_str("not a directory").unwrap();

        let mut git = MockGitCommand::new();
        git.expect_clone_repository().never();
        git.expect_pull().never();

        let client = GitClient::new(git, file.path(), false, CloneProtocol::Ssh);
        let err = client.sync_repository(&hello_world()).await.unwrap_err();

        assert_matches!(err, BackupError::Filesystem { .. });
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_action_for_state() {
        assert_eq!(SyncAction::for_state(LocalState::Absent, false), SyncAction::Clone);
        assert_eq!(SyncAction::for_state(LocalState::Absent, true), SyncAction::Clone);
        assert_eq!(SyncAction::for_state(LocalState::Present, false), SyncAction::Pull);
        assert_eq!(SyncAction::for_state(LocalState::Present, true), SyncAction::Replace);
    }

    #[tokio::test]
    async fn test_absent_repository_is_cloned_never_pulled() {
        let temp = assert_fs::TempDir::new().unwrap();
        let root = temp.path().to_path_buf();

        let mut git = MockGitCommand::new();
        git.expect_clone_repository()
            .with(
                eq("git@github.com:octocat/Hello-World.git"),
                eq(root.clone()),
                eq("Hello-World"),
            )
            .times(1)
            .returning(|_, _, _| Ok(()));
        git.expect_pull().never();

        let client = GitClient::new(git, &root, false, CloneProtocol::Ssh);
        let action = client.sync_repository(&hello_world()).await.unwrap();
        assert_eq!(action, SyncAction::Clone);
    }

    #[tokio::test]
    async fn test_https_protocol_uses_https_url() {
        let temp = assert_fs::TempDir::new().unwrap();

        let mut git = MockGitCommand::new();
        git.expect_clone_repository()
            .with(
                eq("https://github.com/octocat/Hello-World.git"),
                always(),
                always(),
            )
            .times(1)
            .returning(|_, _, _| Ok(()));

        let client = GitClient::new(git, temp.path(), false, CloneProtocol::Https);
        client.sync_repository(&hello_world()).await.unwrap();
    }

    #[tokio::test]
    async fn test_present_repository_is_pulled_and_kept() {
        let temp = assert_fs::TempDir::new().unwrap();
        let existing = temp.child("Hello-World");
        existing.create_dir_all().unwrap();
        existing.child("README").write_str("hello").unwrap();

        let mut git = MockGitCommand::new();
        git.expect_clone_repository().never();
        git.expect_pull()
            .with(eq(existing.path().to_path_buf()))
            .times(1)
            .returning(|_| Ok(()));

        let client = GitClient::new(git, temp.path(), false, CloneProtocol::Ssh);
        let action = client.sync_repository(&hello_world()).await.unwrap();

        assert_eq!(action, SyncAction::Pull);
        existing.child("README").assert(predicate::path::exists());
    }

    #[tokio::test]
    async fn test_replace_deletes_before_cloning() {
        let temp = assert_fs::TempDir::new().unwrap();
        let existing = temp.child("Hello-World");
        existing.create_dir_all().unwrap();
        existing.child("stale.txt").write_str("old").unwrap();

        let mut git = MockGitCommand::new();
        git.expect_pull().never();
        git.expect_clone_repository()
            .times(1)
            .returning(|_, parent, name| {
                let target = parent.join(name);
                // The old copy must already be gone when git runs
                assert!(!target.exists());
                std::fs::create_dir_all(&target)?;
                Ok(())
            });

        let client = GitClient::new(git, temp.path(), true, CloneProtocol::Ssh);
        let action = client.sync_repository(&hello_world()).await.unwrap();

        assert_eq!(action, SyncAction::Replace);
        existing.assert(predicate::path::is_dir());
        existing.child("stale.txt").assert(predicate::path::missing());
    }

    #[tokio::test]
    async fn test_clone_failure_is_a_sync_error() {
        let temp = assert_fs::TempDir::new().unwrap();

        let mut git = MockGitCommand::new();
        git.expect_clone_repository()
            .returning(|_, _, _| Err(anyhow!("git clone failed (exit status: 128): repository not found")));

        let client = GitClient::new(git, temp.path(), false, CloneProtocol::Ssh);
        let err = client.sync_repository(&hello_world()).await.unwrap_err();

        assert_matches!(err, BackupError::Sync { ref repo, ref cause } => {
            assert_eq!(repo, "octocat/Hello-World");
            assert!(cause.contains("repository not found"));
        });
    }

    #[tokio::test]
    async fn test_missing_clone_url_is_a_sync_error() {
        let temp = assert_fs::TempDir::new().unwrap();
        let mut repo = hello_world();
        repo.ssh_url = None;
        repo.https_url = None;

        let mut git = MockGitCommand::new();
        git.expect_clone_repository().never();

        let client = GitClient::new(git, temp.path(), false, CloneProtocol::Ssh);
        let err = client.sync_repository(&repo).await.unwrap_err();
        assert_matches!(err, BackupError::Sync { .. });
    }

    #[tokio::test]
    async fn test_plan_does_not_run_git() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("Hello-World").create_dir_all().unwrap();

        let mut git = MockGitCommand::new();
        git.expect_clone_repository().never();
        git.expect_pull().never();

        let client = GitClient::new(git, temp.path(), true, CloneProtocol::Ssh);
        assert_eq!(client.plan(&hello_world()).await.unwrap(), SyncAction::Replace);
        temp.child("Hello-World").assert(predicate::path::is_dir());
    }
}
