use crate::{
    config::UpdaterConfig,
    error::{Result, UpdaterError},
    events::{EventHandler, HostEvent},
    host::{ConsoleLevel, PackageHost},
    parsed_url::ParsedUrl,
    registry::{HandlerRegistry, HandlerScope},
    version::SemanticVersion,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// File extension of package archives.
pub const ARCHIVE_EXTENSION: &str = ".mpackage";
/// Pause between attempts to start while another update holds the guard.
pub const START_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Pause between uninstalling the old package and installing the new one.
pub const INSTALL_DELAY: Duration = Duration::from_secs(2);
/// Upper bound on the check and download phases of an attempt. When it
/// elapses before the swap begins the attempt is torn down. Entering the swap
/// re-arms it once.
pub const RUNNING_TIMEOUT: Duration = Duration::from_secs(120);
/// How many times `start` waits for the guard before giving up.
///
/// The budget outlasts a guard that was re-armed at the start of a swap, so a
/// stalled attempt is always reclaimed before a waiting `start` gives up.
pub const START_MAX_RETRIES: u32 =
    (2 * RUNNING_TIMEOUT.as_secs() / START_RETRY_DELAY.as_secs()) as u32 + 1;

/// Where an update attempt currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateState {
    Idle,
    CheckingVersion,
    Downloading,
    Swapping,
    Done,
    Failed,
}

impl UpdateState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// How the last attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The remote version was not newer than the installed one.
    UpToDate,
    /// The package was replaced.
    Updated {
        from: SemanticVersion,
        to: SemanticVersion,
    },
    /// The attempt ended with the given error message.
    Failed(String),
}

struct AttemptState {
    state: UpdateState,
    in_progress: bool,
    registry: HandlerRegistry,
    remote: Option<SemanticVersion>,
    outcome: Option<UpdateOutcome>,
}

struct UpdaterCore {
    me: Weak<UpdaterCore>,
    config: UpdaterConfig,
    host: Arc<dyn PackageHost>,
    installed: SemanticVersion,
    scope: HandlerScope,
    version_url: String,
    archive_url: String,
    temp_dir: PathBuf,
    archive_path: PathBuf,
    attempt: Mutex<AttemptState>,
}

/// Auto-updater for a single package.
///
/// The updater is driven by the host: [`Updater::start`] issues the version
/// request, and everything after that happens inside the event handlers it
/// registers on the host's [`crate::EventBus`]. The handlers keep the
/// updater alive until the attempt finishes, so the handle may be dropped
/// once `start` returns.
#[derive(Clone)]
pub struct Updater {
    core: Arc<UpdaterCore>,
}

impl Updater {
    /// Create an updater for the package named in `config`.
    ///
    /// Fails with [`UpdaterError::PackageNotFound`] if the host has no
    /// installed version for the package.
    pub fn new(config: UpdaterConfig, host: Arc<dyn PackageHost>) -> Result<Self> {
        let package = config.package_name().to_string();
        let raw_version = host
            .installed_version(&package)
            .filter(|version| !version.trim().is_empty())
            .ok_or_else(|| UpdaterError::PackageNotFound(package.clone()))?;
        let installed: SemanticVersion = raw_version.parse()?;

        let scope = HandlerScope::new(&package, host.profile_name());
        let version_url = format!(
            "{}{}",
            config.download_path(),
            config.remote_version_file()
        );
        let archive_name = format!("{package}{ARCHIVE_EXTENSION}");
        let archive_url = format!("{}{}", config.download_path(), archive_name);
        let temp_dir = host.home_dir().join(format!("{package}_updater_tmp"));
        let archive_path = temp_dir.join(&archive_name);

        let attempt = AttemptState {
            state: UpdateState::Idle,
            in_progress: false,
            registry: HandlerRegistry::new(scope.clone()),
            remote: None,
            outcome: None,
        };

        Ok(Self {
            core: Arc::new_cyclic(|me| UpdaterCore {
                me: me.clone(),
                config,
                host,
                installed,
                scope,
                version_url,
                archive_url,
                temp_dir,
                archive_path,
                attempt: Mutex::new(attempt),
            }),
        })
    }

    /// Begin an update check.
    ///
    /// While another attempt for the same package and profile holds the
    /// running guard, this waits and retries, giving up with
    /// [`UpdaterError::Busy`]. Calling `start` on an attempt that is already in
    /// progress does nothing. Returns the state after the version request was
    /// issued.
    pub async fn start(&self) -> Result<UpdateState> {
        let core = &self.core;
        let scope = core.scope.key();
        let guard = core.scope.guard_timer_name();

        if let Some(state) = core.running_state() {
            return Ok(state);
        }

        let mut retries = 0;
        while core.host.timers().exists(scope, &guard) {
            if retries >= START_MAX_RETRIES {
                core.warn(format!(
                    "Gave up waiting for another update of {} to finish",
                    core.config.package_name()
                ));
                return Err(UpdaterError::Busy(core.config.package_name().to_string()));
            }
            retries += 1;
            core.debug(format!(
                "update already running, retrying in {}s ({retries}/{START_MAX_RETRIES})",
                START_RETRY_DELAY.as_secs()
            ));
            tokio::time::sleep(START_RETRY_DELAY).await;
        }

        {
            let mut attempt = core.attempt.lock();
            if attempt.in_progress {
                return Ok(attempt.state);
            }
            attempt.in_progress = true;
            attempt.remote = None;
            attempt.outcome = None;
            let previous = attempt.state;
            attempt.state = UpdateState::CheckingVersion;
            let handler: Arc<dyn EventHandler> = self.core.clone();
            let added = attempt.registry.register(core.host.events(), handler);
            core.debug(format!(
                "{previous:?} -> CheckingVersion, {added} event handlers registered"
            ));
        }

        core.arm_guard();

        core.info(format!(
            "Checking for updates to {} (installed {})",
            core.config.package_name(),
            core.installed
        ));
        if let Err(err) = core.host.get_http(&core.version_url).await {
            core.fail(UpdaterError::Network {
                url: core.version_url.clone(),
                message: err.to_string(),
            });
        }

        Ok(self.state())
    }

    /// Return a finished updater to `Idle`. Does nothing while in progress.
    pub fn reset(&self) -> bool {
        let mut attempt = self.core.attempt.lock();
        if attempt.in_progress {
            return false;
        }
        attempt.state = UpdateState::Idle;
        attempt.remote = None;
        attempt.outcome = None;
        true
    }

    pub fn state(&self) -> UpdateState {
        self.core.attempt.lock().state
    }

    pub fn is_in_progress(&self) -> bool {
        self.core.attempt.lock().in_progress
    }

    pub fn outcome(&self) -> Option<UpdateOutcome> {
        self.core.attempt.lock().outcome.clone()
    }

    pub fn installed_version(&self) -> SemanticVersion {
        self.core.installed
    }

    /// Remote version seen by the current or last attempt.
    pub fn remote_version(&self) -> Option<SemanticVersion> {
        self.core.attempt.lock().remote
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.core.config
    }

    pub fn scope(&self) -> &HandlerScope {
        &self.core.scope
    }

    pub fn version_url(&self) -> &str {
        &self.core.version_url
    }

    pub fn archive_url(&self) -> &str {
        &self.core.archive_url
    }

    pub fn temp_dir(&self) -> &Path {
        &self.core.temp_dir
    }

    /// Local path the archive is downloaded to.
    pub fn archive_path(&self) -> &Path {
        &self.core.archive_path
    }
}

#[async_trait]
impl EventHandler for UpdaterCore {
    async fn handle(&self, event: &HostEvent) {
        if !self.attempt.lock().in_progress {
            return;
        }

        match event {
            HostEvent::HttpDone { url, body } => {
                if self.owns_version_url(url) && self.is_in(UpdateState::CheckingVersion) {
                    self.on_version(body).await;
                }
            }
            HostEvent::HttpError { url, error } => {
                if self.owns_version_url(url) && self.is_in(UpdateState::CheckingVersion) {
                    self.fail(UpdaterError::Network {
                        url: url.clone(),
                        message: error.clone(),
                    });
                }
            }
            HostEvent::DownloadDone { path, size } => {
                if self.owns_archive_path(path) && self.is_in(UpdateState::Downloading) {
                    self.debug(format!("downloaded {size} bytes to {}", path.display()));
                    self.on_archive().await;
                }
            }
            HostEvent::DownloadError { path, error, url } => {
                if self.owns_archive_path(path) && self.is_in(UpdateState::Downloading) {
                    self.remove_temp_files().await;
                    self.fail(UpdaterError::Network {
                        url: url.clone(),
                        message: error.clone(),
                    });
                }
            }
        }
    }
}

impl UpdaterCore {
    fn running_state(&self) -> Option<UpdateState> {
        let attempt = self.attempt.lock();
        attempt.in_progress.then_some(attempt.state)
    }

    fn is_in(&self, state: UpdateState) -> bool {
        let attempt = self.attempt.lock();
        attempt.in_progress && attempt.state == state
    }

    /// Move from `from` to `to`, unless the attempt was torn down or moved on.
    fn advance(&self, from: UpdateState, to: UpdateState) -> bool {
        {
            let mut attempt = self.attempt.lock();
            if !attempt.in_progress || attempt.state != from {
                return false;
            }
            attempt.state = to;
        }
        self.debug(format!("{from:?} -> {to:?}"));
        true
    }

    /// Whether a completed HTTP request was the one for our version file.
    fn owns_version_url(&self, url: &str) -> bool {
        let parsed = ParsedUrl::parse(url);
        let expected = self.config.remote_version_file();

        if parsed.file_name() == Some(expected) {
            return true;
        }

        let owned = self
            .config
            .param_matcher()
            .and_then(|matcher| {
                parsed
                    .param(matcher.key())
                    .and_then(|value| matcher.extract(value))
            })
            .map_or(false, |name| name == expected);
        if !owned {
            tracing::trace!(scope = %self.scope, url, "ignoring response for another request");
        }
        owned
    }

    fn owns_archive_path(&self, path: &Path) -> bool {
        let owned = path == self.archive_path;
        if !owned {
            tracing::trace!(
                scope = %self.scope,
                path = %path.display(),
                "ignoring download for another request"
            );
        }
        owned
    }

    async fn on_version(&self, body: &str) {
        let line = body.lines().next().unwrap_or_default().trim_end();
        let remote: SemanticVersion = match line.parse() {
            Ok(version) => version,
            Err(err) => {
                self.fail(err);
                return;
            }
        };
        self.attempt.lock().remote = Some(remote);

        let newer = remote.is_newer_than(&self.installed);
        self.debug(format!(
            "installed {} vs remote {remote}: {}",
            self.installed,
            if newer { "update available" } else { "no update" }
        ));

        if !newer {
            self.info(format!(
                "{} is up to date ({})",
                self.config.package_name(),
                self.installed
            ));
            self.finish(UpdateOutcome::UpToDate);
            return;
        }

        if !self.advance(UpdateState::CheckingVersion, UpdateState::Downloading) {
            return;
        }
        self.info(format!(
            "Downloading {} {remote} (installed {})",
            self.config.package_name(),
            self.installed
        ));

        if let Err(err) = tokio::fs::create_dir_all(&self.temp_dir).await {
            self.fail(UpdaterError::Io(err));
            return;
        }
        if let Err(err) = self
            .host
            .download_file(&self.archive_path, &self.archive_url)
            .await
        {
            self.remove_temp_files().await;
            self.fail(UpdaterError::Network {
                url: self.archive_url.clone(),
                message: err.to_string(),
            });
        }
    }

    /// Uninstall the old package and schedule the install of the new archive.
    ///
    /// From here on the running guard no longer aborts the attempt: once the
    /// old package is gone the install always runs.
    async fn on_archive(&self) {
        if !self.advance(UpdateState::Downloading, UpdateState::Swapping) {
            return;
        }
        self.arm_guard();
        let package = self.config.package_name();

        // A failed uninstall leaves the old package in place; installing over
        // it is not attempted.
        if let Err(err) = self.host.uninstall_package(package).await {
            self.remove_temp_files().await;
            self.fail(err);
            return;
        }
        self.host.clear_global(package);

        let Some(core) = self.me.upgrade() else {
            return;
        };
        self.debug(format!(
            "installing {} in {}s",
            self.archive_path.display(),
            INSTALL_DELAY.as_secs()
        ));
        self.host.timers().start(
            self.scope.key(),
            &self.scope.install_timer_name(),
            INSTALL_DELAY,
            async move {
                core.install_archive().await;
            },
        );
    }

    async fn install_archive(&self) {
        if !self.is_in(UpdateState::Swapping) {
            self.remove_temp_files().await;
            return;
        }

        let installed = self.host.install_package(&self.archive_path).await;
        self.remove_temp_files().await;
        match installed {
            Ok(()) => {
                let to = self.attempt.lock().remote.unwrap_or(self.installed);
                self.info(format!(
                    "{} updated to {to} in profile {}",
                    self.config.package_name(),
                    self.scope.profile()
                ));
                self.finish(UpdateOutcome::Updated {
                    from: self.installed,
                    to,
                });
            }
            Err(err) => self.fail(err),
        }
    }

    async fn remove_temp_files(&self) {
        if let Err(err) = tokio::fs::remove_file(&self.archive_path).await {
            if err.kind() != ErrorKind::NotFound {
                tracing::warn!(
                    "failed to remove downloaded archive {:?}: {}",
                    self.archive_path,
                    err
                );
            }
        }
        if let Err(err) = tokio::fs::remove_dir(&self.temp_dir).await {
            if err.kind() != ErrorKind::NotFound {
                tracing::warn!(
                    "failed to remove temporary directory {:?}: {}",
                    self.temp_dir,
                    err
                );
            }
        }
    }

    /// (Re)start the running guard for this package.
    fn arm_guard(&self) {
        let Some(core) = self.me.upgrade() else {
            return;
        };
        self.host.timers().start(
            self.scope.key(),
            &self.scope.guard_timer_name(),
            RUNNING_TIMEOUT,
            async move {
                core.expire();
            },
        );
    }

    fn expire(&self) {
        let state = self.running_state();
        match state {
            Some(UpdateState::Swapping) => {
                tracing::warn!(scope = %self.scope, "running guard expired during swap");
            }
            Some(_) => {
                self.fail(UpdaterError::Timeout(self.config.package_name().to_string()));
            }
            None => {}
        }
    }

    fn fail(&self, err: UpdaterError) {
        let message = err.to_string();
        self.echo(
            ConsoleLevel::Error,
            &format!("Update of {} failed: {message}", self.config.package_name()),
        );
        tracing::error!(scope = %self.scope, error = %err, "update failed");
        self.finish(UpdateOutcome::Failed(message));
    }

    /// Enter the terminal state and release every handler and timer.
    fn finish(&self, outcome: UpdateOutcome) {
        let next = match outcome {
            UpdateOutcome::Failed(_) => UpdateState::Failed,
            _ => UpdateState::Done,
        };
        let previous = {
            let mut attempt = self.attempt.lock();
            if !attempt.in_progress {
                return;
            }
            let previous = attempt.state;
            attempt.state = next;
            attempt.in_progress = false;
            attempt.outcome = Some(outcome);
            attempt.registry.unregister(self.host.events());
            previous
        };
        let timers = self.host.timers();
        timers.kill(self.scope.key(), &self.scope.guard_timer_name());
        timers.kill(self.scope.key(), &self.scope.install_timer_name());
        self.debug(format!("{previous:?} -> {next:?}, event handlers released"));
    }

    fn info(&self, message: String) {
        tracing::info!(scope = %self.scope, "{message}");
        self.echo(ConsoleLevel::Info, &message);
    }

    fn warn(&self, message: String) {
        tracing::warn!(scope = %self.scope, "{message}");
        self.echo(ConsoleLevel::Error, &message);
    }

    fn debug(&self, message: String) {
        tracing::debug!(scope = %self.scope, "{message}");
        if self.config.debug_mode() {
            self.echo(ConsoleLevel::Debug, &message);
        }
    }

    fn echo(&self, level: ConsoleLevel, message: &str) {
        self.host.echo(level, message);
    }
}
