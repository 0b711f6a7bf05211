use crate::error::{Result, UpdaterError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A strict `MAJOR.MINOR.PATCH` package version.
///
/// Ordering is lexicographic over the three components, which is exactly what
/// the derived `Ord` gives for fields declared in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SemanticVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemanticVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Split a version string into its three numeric components.
    ///
    /// Surrounding whitespace is ignored. Anything other than exactly three
    /// dot-separated unsigned integers is rejected.
    pub fn split(input: &str) -> Result<(u64, u64, u64)> {
        let trimmed = input.trim();
        let parts: Vec<&str> = trimmed.split('.').collect();
        if parts.len() != 3 {
            return Err(UpdaterError::VersionParse {
                input: input.to_string(),
                reason: format!("expected 3 components, found {}", parts.len()),
            });
        }

        let component = |name: &str, raw: &str| -> Result<u64> {
            let not_a_number = || UpdaterError::VersionParse {
                input: input.to_string(),
                reason: format!("{name} component `{raw}` is not a number"),
            };
            // `u64::from_str` also takes a leading `+`.
            if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
                return Err(not_a_number());
            }
            raw.parse::<u64>().map_err(|_| not_a_number())
        };

        Ok((
            component("major", parts[0])?,
            component("minor", parts[1])?,
            component("patch", parts[2])?,
        ))
    }

    /// Whether `self` is strictly newer than `other`.
    pub fn is_newer_than(&self, other: &SemanticVersion) -> bool {
        self > other
    }
}

/// Returns `true` iff `remote` is strictly newer than `installed`.
///
/// Equal versions and older remotes both mean "no update".
pub fn is_newer(installed: &str, remote: &str) -> Result<bool> {
    let installed: SemanticVersion = installed.parse()?;
    let remote: SemanticVersion = remote.parse()?;
    Ok(remote.is_newer_than(&installed))
}

impl FromStr for SemanticVersion {
    type Err = UpdaterError;

    fn from_str(s: &str) -> Result<Self> {
        let (major, minor, patch) = Self::split(s)?;
        Ok(Self::new(major, minor, patch))
    }
}

impl TryFrom<String> for SemanticVersion {
    type Error = UpdaterError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SemanticVersion> for String {
    fn from(version: SemanticVersion) -> Self {
        version.to_string()
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
