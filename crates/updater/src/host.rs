use crate::error::Result;
use crate::events::EventBus;
use crate::timers::TimerTable;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Severity of a message written to the user's console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsoleLevel {
    Info,
    Error,
    Debug,
}

/// Services the embedding client provides to an updater.
///
/// `get_http` and `download_file` only issue the request. Their results are
/// published later on [`PackageHost::events`] as [`crate::HostEvent`]s, which
/// is how the updater learns about them.
#[async_trait]
pub trait PackageHost: Send + Sync {
    /// Name of the running profile/session, used to namespace handlers.
    fn profile_name(&self) -> String;

    /// Directory the updater may create its temporary download folder in.
    fn home_dir(&self) -> PathBuf;

    /// Installed version string for `package`, or `None` if it is not installed.
    fn installed_version(&self, package: &str) -> Option<String>;

    /// Issue an HTTP GET for `url`.
    async fn get_http(&self, url: &str) -> Result<()>;

    /// Download `url` to `local_path`.
    async fn download_file(&self, local_path: &Path, url: &str) -> Result<()>;

    async fn uninstall_package(&self, name: &str) -> Result<()>;

    async fn install_package(&self, archive: &Path) -> Result<()>;

    /// Drop any script-level global the host keeps for `name`.
    fn clear_global(&self, _name: &str) {}

    fn events(&self) -> &EventBus;

    fn timers(&self) -> &TimerTable;

    /// Write a message to the user's console.
    fn echo(&self, level: ConsoleLevel, message: &str);
}
