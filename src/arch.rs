//! Host CPU architecture.
use std::{fmt::Display, sync::LazyLock};

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

/// Architectures the client is published for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    /// x86-64, also known as AMD64.
    X64,
    /// 64-bit ARM.
    Arm64,
}

impl Default for Architecture {
    fn default() -> Self {
        Self::X64
    }
}

impl Architecture {
    /// Returns the identifier used in package file and folder names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X64 => "x64",
            Self::Arm64 => "arm64",
        }
    }

    /// Matches a reported architecture string against the known patterns.
    ///
    /// Returns `None` when the string names neither architecture.
    pub fn from_reported(value: &str) -> Option<Self> {
        static ARM64: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"(?i)ARM64|AARCH64").unwrap());
        static X64: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)AMD64|x86_64").unwrap());

        if ARM64.is_match(value) {
            Some(Self::Arm64)
        } else if X64.is_match(value) {
            Some(Self::X64)
        } else {
            None
        }
    }

    /// Resolves the architecture from a primary and a fallback source.
    ///
    /// Unrecognized values resolve to [`Architecture::X64`]. This covers
    /// 32-bit x86 hosts too, which the client does not support.
    pub fn resolve(primary: Option<&str>, fallback: Option<&str>) -> Self {
        if let Some(arch) = primary.and_then(Self::from_reported) {
            return arch;
        }

        if let Some(arch) = fallback.and_then(Self::from_reported) {
            tracing::debug!(?primary, ?fallback, "architecture resolved from fallback");
            return arch;
        }

        tracing::warn!(
            ?primary,
            ?fallback,
            "unrecognized processor architecture, assuming x64"
        );
        Self::X64
    }

    /// Detects the architecture of the running host.
    pub fn detect() -> Self {
        let primary = crate::os::env_var("PROCESSOR_ARCHITECTURE")
            .map(|value| value.to_string_lossy().into_owned())
            .unwrap_or_else(|| std::env::consts::ARCH.to_string());
        let fallback = crate::os::registry_processor_architecture();

        let arch = Self::resolve(Some(&primary), fallback.as_deref());
        tracing::info!(arch = %arch, reported = %primary, "detected architecture");

        arch
    }
}

impl Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
