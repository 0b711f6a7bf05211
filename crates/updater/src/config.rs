//! Updater configuration.
//!
//! Configuration is validated once, when it is built, and is immutable
//! afterwards. It can be assembled with [`UpdaterConfigBuilder`] or decoded
//! from the JSON options table a package ships with:
//!
//! ```json
//! {
//!   "downloadPath": "https://github.com/owner/repo/releases/latest/download/",
//!   "packageName": "MyPackage",
//!   "remoteVersionFile": "MyPackage_version.txt",
//!   "paramKey": "response-content-disposition",
//!   "paramRegex": "attachment; filename=(.*)",
//!   "debugMode": false
//! }
//! ```

use crate::error::{Result, UpdaterError};
use regex::Regex;
use serde::Deserialize;

/// Extracts the real file name from a named URL parameter.
///
/// Download hosts that hand out signed URLs often hide the file name inside a
/// query parameter. The first capture group of `pattern` is the file name, or
/// the whole match when the pattern has no groups.
#[derive(Debug, Clone)]
pub struct ParamMatcher {
    key: String,
    pattern: Regex,
}

impl ParamMatcher {
    pub fn new(key: impl Into<String>, pattern: &str) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(UpdaterError::configuration("paramKey must not be empty"));
        }
        Ok(Self {
            key,
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    /// File name captured from a parameter value, if the pattern matches.
    pub fn extract<'a>(&self, value: &'a str) -> Option<&'a str> {
        let captures = self.pattern.captures(value)?;
        captures
            .get(1)
            .or_else(|| captures.get(0))
            .map(|m| m.as_str())
    }
}

/// Validated, immutable updater configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "UpdaterConfigBuilder")]
pub struct UpdaterConfig {
    download_path: String,
    package_name: String,
    remote_version_file: String,
    param: Option<ParamMatcher>,
    debug_mode: bool,
}

impl UpdaterConfig {
    /// Start building a configuration from the three required fields.
    pub fn builder(
        download_path: impl Into<String>,
        package_name: impl Into<String>,
        remote_version_file: impl Into<String>,
    ) -> UpdaterConfigBuilder {
        UpdaterConfigBuilder {
            download_path: download_path.into(),
            package_name: package_name.into(),
            remote_version_file: remote_version_file.into(),
            ..UpdaterConfigBuilder::default()
        }
    }

    /// Decode and validate a JSON options table.
    pub fn from_json(raw: &str) -> Result<Self> {
        let builder: UpdaterConfigBuilder = serde_json::from_str(raw)?;
        builder.build()
    }

    /// Base URL that the version file and archive names are appended to.
    pub fn download_path(&self) -> &str {
        &self.download_path
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn remote_version_file(&self) -> &str {
        &self.remote_version_file
    }

    pub fn param_matcher(&self) -> Option<&ParamMatcher> {
        self.param.as_ref()
    }

    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }
}

/// Builder for [`UpdaterConfig`]. Also the serde shape of the options table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdaterConfigBuilder {
    download_path: String,
    package_name: String,
    remote_version_file: String,
    #[serde(default)]
    param_key: Option<String>,
    #[serde(default)]
    param_regex: Option<String>,
    #[serde(default)]
    debug_mode: bool,
}

impl UpdaterConfigBuilder {
    /// Match the version file through a URL parameter instead of the path.
    pub fn param(mut self, key: impl Into<String>, regex: impl Into<String>) -> Self {
        self.param_key = Some(key.into());
        self.param_regex = Some(regex.into());
        self
    }

    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.debug_mode = enabled;
        self
    }

    /// Validate the fields and compile the optional pattern.
    pub fn build(self) -> Result<UpdaterConfig> {
        require("downloadPath", &self.download_path)?;
        require("packageName", &self.package_name)?;
        require("remoteVersionFile", &self.remote_version_file)?;

        let param = match (self.param_key, self.param_regex) {
            (Some(key), Some(regex)) => Some(ParamMatcher::new(key, &regex)?),
            (None, None) => None,
            (Some(_), None) => {
                return Err(UpdaterError::configuration(
                    "paramKey was given without paramRegex",
                ))
            }
            (None, Some(_)) => {
                return Err(UpdaterError::configuration(
                    "paramRegex was given without paramKey",
                ))
            }
        };

        Ok(UpdaterConfig {
            download_path: self.download_path,
            package_name: self.package_name,
            remote_version_file: self.remote_version_file,
            param,
            debug_mode: self.debug_mode,
        })
    }
}

impl TryFrom<UpdaterConfigBuilder> for UpdaterConfig {
    type Error = UpdaterError;

    fn try_from(builder: UpdaterConfigBuilder) -> Result<Self> {
        builder.build()
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(UpdaterError::configuration(format!(
            "{field} must be a non-empty string"
        )));
    }
    Ok(())
}
