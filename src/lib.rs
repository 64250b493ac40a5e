//! ghbu - GitHub Backup
//!
//! ghbu backs up every repository owned by a GitHub user or organization to
//! a local directory. Missing repositories are cloned, existing ones are
//! pulled (or deleted and cloned again in replace mode), a bounded number at
//! a time.
//!
//! ## Modules
//!
//! - [`config`]: Config file parsing and the resolved [`BackupConfig`]
//! - [`discovery`]: Repository descriptors and paginated listing
//! - [`github`]: GitHub API access through octocrab
//! - [`git`]: Local state probing and the clone/pull executor
//! - [`sync`]: Bounded-concurrency scheduler and the backup engine
//! - [`shutdown`]: Cooperative cancellation on interrupt

pub mod config;
pub mod discovery;
pub mod error;
pub mod git;
pub mod github;
pub mod retry;
pub mod shutdown;
pub mod sync;

pub use config::{BackupConfig, CliOverrides, Config};
pub use discovery::{Account, AccountKind, AccountTarget, CloneProtocol, Forge, RepoDescriptor, RepoPage};
pub use error::{BackupError, BackupResult};
pub use git::{GitCli, GitClient, GitCommand, LocalState, SyncAction};
pub use github::GitHubClient;
pub use shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
pub use sync::{BackupEngine, BackupSummary, DispatchReport, WorkScheduler};
