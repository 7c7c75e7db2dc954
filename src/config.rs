//! Parameters that control a provisioning run.
//!
//! Every field has a default so a configuration file only needs to name what
//! it overrides. Configuration files use the RON format:
//!
//! ```
//! # use wingetup::config::ProvisionConfig;
//! let config = ProvisionConfig::from_reader(
//!     r#"(
//!         test_mode: true,
//!         settle_delay_secs: 0,
//!         dependencies: (
//!             vclibs: (
//!                 x64: "https://mirror.example.com/vclibs.x64.appx",
//!                 arm64: "https://mirror.example.com/vclibs.arm64.appx",
//!             ),
//!         ),
//!     )"#
//!     .as_bytes(),
//! )
//! .unwrap();
//!
//! assert!(config.test_mode);
//! ```
use std::{
    io::{Cursor, Read},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    arch::Architecture,
    error::{ProvisionError, ProvisionErrorKind, ResultExt},
};

/// Release feed of the client.
pub const DEFAULT_FEED_URL: &str = "https://api.github.com/repos/microsoft/winget-cli/releases";

/// Package family name of the client.
pub const DEFAULT_PACKAGE_NAME: &str = "Microsoft.DesktopAppInstaller";

/// Publisher hash that appears in the client's package folder names.
pub const DEFAULT_PUBLISHER_ID: &str = "8wekyb3d8bbwe";

const UI_XAML_BASE_URL: &str =
    "https://github.com/microsoft/microsoft-ui-xaml/releases/download/v2.8.6";

/// A download location for each supported architecture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchUrls {
    /// URL used on x64 hosts.
    pub x64: String,
    /// URL used on arm64 hosts.
    pub arm64: String,
}

impl ArchUrls {
    /// Returns the URL for the given architecture.
    pub fn get(&self, arch: Architecture) -> &str {
        match arch {
            Architecture::X64 => &self.x64,
            Architecture::Arm64 => &self.arm64,
        }
    }
}

/// Download locations of the runtime prerequisites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyUrls {
    /// Visual C++ runtime libraries (VCLibs).
    pub vclibs: ArchUrls,
    /// Windows UI Library (UI.Xaml).
    pub ui_xaml: ArchUrls,
}

impl Default for DependencyUrls {
    fn default() -> Self {
        let ui_xaml_default = format!("{UI_XAML_BASE_URL}/Microsoft.UI.Xaml.2.8.x64.appx");

        Self {
            vclibs: ArchUrls {
                x64: "https://aka.ms/Microsoft.VCLibs.x64.14.00.Desktop.appx".to_string(),
                arm64: "https://aka.ms/Microsoft.VCLibs.arm64.14.00.Desktop.appx".to_string(),
            },
            // The x64 build is the default; arm64 needs its own package.
            ui_xaml: ArchUrls {
                x64: ui_xaml_default,
                arm64: format!("{UI_XAML_BASE_URL}/Microsoft.UI.Xaml.2.8.arm64.appx"),
            },
        }
    }
}

/// Parameters that control how the client is detected and installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct ProvisionConfig {
    /// Log downloads, installs and cleanup instead of performing them.
    ///
    /// Detection and the release query still run.
    pub test_mode: bool,
    /// Package name queried in the OS package index.
    pub package_name: String,
    /// Publisher hash appended to package folder names.
    pub publisher_id: String,
    /// File name of the client executable.
    pub executable_name: String,
    /// URL listing the published releases.
    pub feed_url: String,
    /// Number of releases requested from the feed.
    pub page_size: u32,
    /// File name suffix of the package asset.
    pub package_suffix: String,
    /// File name suffix of the license asset.
    pub license_suffix: String,
    /// Runtime prerequisites.
    pub dependencies: DependencyUrls,
    /// Seconds allowed to establish a network connection.
    pub http_connect_timeout_secs: u64,
    /// Seconds allowed between reads of a network response.
    pub http_read_timeout_secs: u64,
    /// Seconds allowed for a detection command.
    pub probe_timeout_secs: u64,
    /// Seconds allowed for an installer command.
    pub install_timeout_secs: u64,
    /// Seconds to wait before verifying an installation.
    pub settle_delay_secs: u64,
    /// Path of the append-mode transcript.
    ///
    /// Defaults to `%ProgramData%\wingetup\wingetup.log` on Windows and the
    /// temporary directory elsewhere.
    pub transcript_path: Option<PathBuf>,
    /// Folder holding per-architecture package folders.
    ///
    /// Defaults to `%ProgramFiles%\WindowsApps`.
    pub apps_dir: Option<PathBuf>,
    /// A fixed location where the client executable may be found.
    ///
    /// Defaults to `%LocalAppData%\Microsoft\WindowsApps\winget.exe`.
    pub well_known_path: Option<PathBuf>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            test_mode: false,
            package_name: DEFAULT_PACKAGE_NAME.to_string(),
            publisher_id: DEFAULT_PUBLISHER_ID.to_string(),
            executable_name: "winget.exe".to_string(),
            feed_url: DEFAULT_FEED_URL.to_string(),
            page_size: 20,
            package_suffix: ".msixbundle".to_string(),
            license_suffix: "License1.xml".to_string(),
            dependencies: DependencyUrls::default(),
            http_connect_timeout_secs: 30,
            http_read_timeout_secs: 300,
            probe_timeout_secs: 60,
            install_timeout_secs: 900,
            settle_delay_secs: 5,
            transcript_path: None,
            apps_dir: None,
            well_known_path: None,
        }
    }
}

impl ProvisionConfig {
    /// Deserialize from the given path.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ProvisionError> {
        let path = path.as_ref();
        let buf = std::fs::read(path).or_provision_with(ProvisionErrorKind::Io, || {
            format!("could not open config file {path:?}")
        })?;

        Self::from_reader(Cursor::new(buf))
    }

    /// Deserialize from the given reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ProvisionError> {
        let config = ron::de::from_reader::<R, Self>(reader)
            .or_provision(ProvisionErrorKind::InvalidConfig, "malformed configuration")?;

        if config.page_size == 0 {
            return Err(ProvisionError::new(ProvisionErrorKind::InvalidConfig)
                .with_context("page_size must be at least 1"));
        }

        Ok(config)
    }

    /// Returns the release feed URL with the page size applied.
    pub fn feed_page_url(&self) -> String {
        let separator = if self.feed_url.contains('?') { '&' } else { '?' };
        format!("{}{}per_page={}", self.feed_url, separator, self.page_size)
    }

    /// Returns the transcript location.
    pub fn transcript_path(&self) -> PathBuf {
        if let Some(path) = &self.transcript_path {
            return path.clone();
        }

        let dir = match crate::os::env_var("ProgramData") {
            Some(dir) if cfg!(windows) => PathBuf::from(dir).join("wingetup"),
            _ => std::env::temp_dir(),
        };

        dir.join("wingetup.log")
    }

    /// Returns the folder scanned for installed package folders.
    pub fn apps_dir(&self) -> PathBuf {
        if let Some(path) = &self.apps_dir {
            return path.clone();
        }

        crate::os::env_var("ProgramFiles")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(r"C:\Program Files"))
            .join("WindowsApps")
    }

    /// Returns the fixed location checked for the client executable.
    pub fn well_known_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.well_known_path {
            return Some(path.clone());
        }

        crate::os::env_var("LocalAppData").map(|dir| {
            PathBuf::from(dir)
                .join("Microsoft")
                .join("WindowsApps")
                .join(&self.executable_name)
        })
    }

    /// Returns the timeouts for the HTTP client.
    pub fn http_timeouts(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.http_connect_timeout_secs),
            Duration::from_secs(self.http_read_timeout_secs),
        )
    }

    /// Returns the timeout for a detection command.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Returns the timeout for an installer command.
    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    /// Returns the delay before verification.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}
