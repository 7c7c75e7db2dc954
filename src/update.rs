//! Deciding whether an install is needed.
use crate::{release::LatestRelease, version::Version};

/// Result of comparing the installed and latest versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDecision {
    /// The installed client is at or above the latest release.
    UpToDate {
        /// Installed version.
        installed: Version,
        /// Latest stable version.
        latest: Version,
    },
    /// The client is missing or older than the latest release.
    NeedsInstall {
        /// Installed version, if any.
        installed: Option<Version>,
        /// Release to install.
        latest: LatestRelease,
    },
}

impl UpdateDecision {
    /// Compares numerically. No client at all always needs an install.
    pub fn decide(installed: Option<Version>, latest: LatestRelease) -> Self {
        match installed {
            Some(installed) if installed >= latest.version => Self::UpToDate {
                installed,
                latest: latest.version,
            },
            installed => Self::NeedsInstall { installed, latest },
        }
    }

    /// Returns whether this is [`UpdateDecision::NeedsInstall`].
    pub fn needs_install(&self) -> bool {
        matches!(self, Self::NeedsInstall { .. })
    }
}
