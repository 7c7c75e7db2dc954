//! Dotted numeric versions.
use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

/// A dotted numeric version with 2 to 4 components, such as `1.8.1911`.
///
/// Versions are ordered component by component. An absent component sorts
/// before any present one, so `1.8` is less than `1.8.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    major: u32,
    minor: u32,
    build: Option<u32>,
    revision: Option<u32>,
}

impl Version {
    /// Creates a two component version.
    pub fn new(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            build: None,
            revision: None,
        }
    }

    /// Sets the third component.
    pub fn with_build(mut self, build: u32) -> Self {
        self.build = Some(build);
        self
    }

    /// Sets the fourth component.
    ///
    /// A build component of `0` is filled in when none was set.
    pub fn with_revision(mut self, revision: u32) -> Self {
        self.build.get_or_insert(0);
        self.revision = Some(revision);
        self
    }

    /// Returns the first component.
    pub fn major(&self) -> u32 {
        self.major
    }

    /// Returns the second component.
    pub fn minor(&self) -> u32 {
        self.minor
    }

    /// Returns the third component, if present.
    pub fn build(&self) -> Option<u32> {
        self.build
    }

    /// Returns the fourth component, if present.
    pub fn revision(&self) -> Option<u32> {
        self.revision
    }

    /// Parses a release tag or client output such as `v1.8.1911`.
    ///
    /// Surrounding whitespace and a single leading `v` or `V` are ignored.
    pub fn parse_tag(value: &str) -> Result<Self, VersionError> {
        let value = value.trim();
        let value = value
            .strip_prefix('v')
            .or_else(|| value.strip_prefix('V'))
            .unwrap_or(value);

        value.parse()
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s.split('.').collect::<Vec<&str>>();

        if !(2..=4).contains(&parts.len()) {
            return Err(VersionError::ComponentCount {
                value: s.to_string(),
            });
        }

        let mut numbers = [0u32; 4];

        for (index, part) in parts.iter().enumerate() {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionError::Component {
                    value: s.to_string(),
                    component: part.to_string(),
                });
            }

            numbers[index] = part.parse().map_err(|_| VersionError::Component {
                value: s.to_string(),
                component: part.to_string(),
            })?;
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            build: (parts.len() > 2).then_some(numbers[2]),
            revision: (parts.len() > 3).then_some(numbers[3]),
        })
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;

        if let Some(build) = self.build {
            write!(f, ".{build}")?;
        }
        if let Some(revision) = self.revision {
            write!(f, ".{revision}")?;
        }

        Ok(())
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.to_string()
    }
}

/// Error for a string that is not a dotted numeric version.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// Fewer than 2 or more than 4 components.
    #[error("version {value:?} must have 2 to 4 components")]
    ComponentCount {
        /// The rejected input.
        value: String,
    },

    /// A component is empty, not numeric, or out of range.
    #[error("version {value:?} has invalid component {component:?}")]
    Component {
        /// The rejected input.
        value: String,
        /// The offending component.
        component: String,
    },
}
