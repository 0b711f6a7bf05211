//! Event-driven auto-updater for MUD client packages.
//!
//! A package embeds an [`Updater`] to keep itself current. The updater
//! fetches a small version file next to the package's release archive. If
//! the remote version is newer than the installed one, it downloads
//! `<package>.mpackage`, uninstalls the old package and installs the new
//! archive. Every step is driven by completion events that the host
//! publishes on its [`EventBus`]. Each handler checks that an event belongs
//! to its own request before reacting, so several packages can update at
//! once on one bus.
//!
//! ```ignore
//! use std::sync::Arc;
//! use mpackage_updater::{HostEvent, Updater, UpdaterConfig};
//!
//! # async fn demo(host: Arc<dyn mpackage_updater::PackageHost>) -> mpackage_updater::Result<()> {
//! let config = UpdaterConfig::builder(
//!     "https://github.com/owner/repo/releases/latest/download/",
//!     "MyPackage",
//!     "MyPackage_version.txt",
//! )
//! .build()?;
//!
//! let updater = Updater::new(config, host.clone())?;
//! updater.start().await?;
//!
//! // Later, from the host's HTTP layer:
//! host.events()
//!     .dispatch(HostEvent::HttpDone {
//!         url: updater.version_url().to_string(),
//!         body: "1.4.0\n".to_string(),
//!     })
//!     .await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod events;
mod host;
mod parsed_url;
mod registry;
mod timers;
mod updater;
mod version;

pub use config::{ParamMatcher, UpdaterConfig, UpdaterConfigBuilder};
pub use error::{Result, UpdaterError};
pub use events::{EventBus, EventHandler, EventKind, HostEvent, SubscriptionId};
pub use host::{ConsoleLevel, PackageHost};
pub use parsed_url::ParsedUrl;
pub use registry::{HandlerRegistry, HandlerScope};
pub use timers::TimerTable;
pub use updater::{
    UpdateOutcome, UpdateState, Updater, ARCHIVE_EXTENSION, INSTALL_DELAY, RUNNING_TIMEOUT,
    START_MAX_RETRIES, START_RETRY_DELAY,
};
pub use version::{is_newer, SemanticVersion};
