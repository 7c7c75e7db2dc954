//! Common error types.
//!
//! See [`ProvisionError`] and [`ProvisionErrorKind`] for details.
use std::fmt::Display;

/// Main error type for this crate.
///
/// Every value of this type is fatal to a provisioning run. Recoverable
/// failures are logged where they happen and never become a `ProvisionError`.
#[derive(Debug, thiserror::Error)]
pub struct ProvisionError {
    kind: ProvisionErrorKind,
    context: String,
    source: Option<Box<dyn std::error::Error + 'static + Send + Sync>>,
}

impl ProvisionError {
    /// Creates a new error with the given error kind.
    pub fn new(kind: ProvisionErrorKind) -> Self {
        Self {
            kind,
            context: String::new(),
            source: None,
        }
    }

    /// Adds a source error.
    pub fn with_source<S>(mut self, source: S) -> Self
    where
        S: std::error::Error + 'static + Send + Sync,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Adds a string with a contextual description of the error.
    pub fn with_context<C>(mut self, value: C) -> Self
    where
        C: AsRef<str>,
    {
        if !self.context.is_empty() {
            self.context.push_str(": ");
        }
        self.context.push_str(value.as_ref());
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> &ProvisionErrorKind {
        &self.kind
    }

    /// Returns the contextual description.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Returns a reference to the IO error when the kind is [`ProvisionErrorKind::Io`].
    pub fn as_io(&self) -> Option<&std::io::Error> {
        if self.kind.is_io() {
            if let Some(source) = &self.source {
                if let Some(error) = source.downcast_ref() {
                    return Some(error);
                }
            }
        }
        None
    }
}

impl Display for ProvisionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.context.is_empty() {
            f.write_str(&self.context)?;
            f.write_str(": ")?;
        }

        self.kind.fmt(f)?;

        Ok(())
    }
}

impl From<ProvisionErrorKind> for ProvisionError {
    fn from(value: ProvisionErrorKind) -> Self {
        Self::new(value)
    }
}

impl From<std::io::Error> for ProvisionError {
    fn from(value: std::io::Error) -> Self {
        Self::new(ProvisionErrorKind::Io).with_source(value)
    }
}

/// Error category for [`ProvisionError`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ProvisionErrorKind {
    /// Input/Output error usually from [`std::io::Error`].
    #[error("input/output error")]
    Io,

    /// Configuration file could not be read or parsed.
    #[error("invalid configuration")]
    InvalidConfig,

    /// Neither the native package API nor the offline servicing tool exists.
    #[error("no installation method available")]
    NoInstallCapability,

    /// The release feed could not be reached or returned malformed data.
    #[error("release feed unavailable")]
    FeedUnavailable,

    /// The release feed had no release that is not a prerelease.
    #[error("no stable release found")]
    NoStableRelease,

    /// The selected release has a tag that is not a version.
    #[error("invalid release tag")]
    InvalidReleaseTag,

    /// A required asset is not attached to the selected release.
    #[error("required release asset missing")]
    MissingAsset,

    /// A mandatory artifact could not be downloaded.
    #[error("download failed")]
    DownloadFailed,

    /// Every applicable installation method failed or was unavailable.
    #[error("all installation methods failed")]
    InstallChainExhausted,

    /// Any other error.
    #[error("other")]
    Other,
}

impl ProvisionErrorKind {
    /// Returns whether it is the Io variant.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io)
    }
}

/// Converts foreign errors in a `Result` into a [`ProvisionError`].
pub trait ResultExt<T> {
    /// Wraps the error in a [`ProvisionError`] of `kind` with `context`.
    fn or_provision<C>(self, kind: ProvisionErrorKind, context: C) -> Result<T, ProvisionError>
    where
        C: AsRef<str>;

    /// Like [`ResultExt::or_provision`], with the context built only on error.
    fn or_provision_with<F, C>(
        self,
        kind: ProvisionErrorKind,
        context: F,
    ) -> Result<T, ProvisionError>
    where
        F: FnOnce() -> C,
        C: AsRef<str>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn or_provision<C>(self, kind: ProvisionErrorKind, context: C) -> Result<T, ProvisionError>
    where
        C: AsRef<str>,
    {
        self.or_provision_with(kind, || context)
    }

    fn or_provision_with<F, C>(
        self,
        kind: ProvisionErrorKind,
        context: F,
    ) -> Result<T, ProvisionError>
    where
        F: FnOnce() -> C,
        C: AsRef<str>,
    {
        self.map_err(|error| {
            ProvisionError::new(kind)
                .with_context(context())
                .with_source(error)
        })
    }
}

/// Formats an error and its chain of sources, one per line.
pub fn format_error<E>(error: &E) -> String
where
    E: std::error::Error + ?Sized,
{
    let mut buf = error.to_string();

    let mut source = error.source();

    while let Some(error) = source {
        buf.push_str("\n↳");
        buf.push_str(&error.to_string());
        source = error.source();
    }

    buf
}
