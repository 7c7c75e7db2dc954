//! The provisioning run.
use std::path::PathBuf;

use crate::{
    arch::Architecture,
    config::ProvisionConfig,
    detect::{Detector, InstalledClient, PackageIndex},
    error::{ProvisionError, ProvisionErrorKind},
    fetch::Fetcher,
    inst::{Capabilities, ExecutionReport, Executor, InstallationMethod, Planner},
    os::CommandRunner,
    update::UpdateDecision,
    version::Version,
};

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing to do.
    UpToDate {
        /// Installed version.
        installed: Version,
        /// Latest stable version.
        latest: Version,
    },
    /// The client was installed, or in test mode would have been.
    Installed {
        /// Version previously installed.
        previous: Option<Version>,
        /// Version installed.
        version: Version,
        /// Installer details.
        report: ExecutionReport,
        /// Client found after installing. `None` when verification failed.
        verified: Option<InstalledClient>,
    },
}

impl Outcome {
    /// Returns whether the installed version is not yet visible on the host.
    ///
    /// This is the case when verification found nothing or found an older
    /// client. A restart or new sign-in usually resolves it.
    pub fn pending_restart(&self) -> bool {
        match self {
            Self::UpToDate { .. } => false,
            Self::Installed {
                version, verified, ..
            } => !verified
                .as_ref()
                .is_some_and(|client| client.version >= *version),
        }
    }
}

/// What verification found, relative to the version just installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verification {
    Confirmed,
    Stale,
    Missing,
    /// Test mode left the host untouched, so there is nothing to compare.
    Skipped,
}

impl Verification {
    fn classify(found: Option<&InstalledClient>, expected: Version, test_mode: bool) -> Self {
        match found {
            _ if test_mode => Self::Skipped,
            Some(client) if client.version >= expected => Self::Confirmed,
            Some(_) => Self::Stale,
            None => Self::Missing,
        }
    }
}

/// Runs detection, the update decision, and installation with the given
/// OS, network, and package index access.
pub struct Provisioner<'a> {
    config: &'a ProvisionConfig,
    runner: &'a dyn CommandRunner,
    fetcher: &'a dyn Fetcher,
    index: &'a dyn PackageIndex,
    arch: Option<Architecture>,
    capabilities: Option<Capabilities>,
}

impl<'a> Provisioner<'a> {
    /// Creates a provisioner.
    pub fn new(
        config: &'a ProvisionConfig,
        runner: &'a dyn CommandRunner,
        fetcher: &'a dyn Fetcher,
        index: &'a dyn PackageIndex,
    ) -> Self {
        Self {
            config,
            runner,
            fetcher,
            index,
            arch: None,
            capabilities: None,
        }
    }

    /// Uses the given architecture instead of detecting it.
    pub fn with_architecture(mut self, arch: Architecture) -> Self {
        self.arch = Some(arch);
        self
    }

    /// Uses the given capabilities instead of detecting them.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Performs the run.
    pub fn run(&self) -> Result<Outcome, ProvisionError> {
        if self.config.test_mode {
            tracing::info!("test mode enabled: downloads, installs, and cleanup are skipped");
        }

        let capabilities = match &self.capabilities {
            Some(capabilities) => capabilities.clone(),
            None => Capabilities::detect(self.runner, self.config.probe_timeout()),
        };
        if capabilities.primary() == InstallationMethod::None {
            tracing::error!("neither the Appx cmdlets nor DISM are available");
            return Err(ProvisionErrorKind::NoInstallCapability.into());
        }

        let arch = self.arch.unwrap_or_else(Architecture::detect);

        let installed = {
            let span = tracing::info_span!("detect");
            let _guard = span.enter();

            Detector::installed(self.runner, self.index, self.config, arch).detect()
        };

        let latest = crate::release::resolve_latest(self.fetcher, self.config)?;
        let previous = installed.map(|client| client.version);
        let decision = UpdateDecision::decide(previous, latest);

        if let UpdateDecision::UpToDate { installed, latest } = &decision {
            tracing::info!(%installed, %latest, "client is up to date");
            return Ok(Outcome::UpToDate {
                installed: *installed,
                latest: *latest,
            });
        }

        tracing::info!(installed = ?previous.map(|v| v.to_string()), "client needs install");

        let work_dir = self.create_work_dir()?;
        let work_path = match &work_dir {
            Some(dir) => dir.path().to_path_buf(),
            None => std::env::temp_dir().join("wingetup-test-mode"),
        };

        let result = self.install(&decision, &capabilities, arch, work_path);
        self.cleanup(work_dir);

        let (version, report) = result?;

        let verified = self.verify(arch, version);

        Ok(Outcome::Installed {
            previous,
            version,
            report,
            verified,
        })
    }

    fn create_work_dir(&self) -> Result<Option<tempfile::TempDir>, ProvisionError> {
        if self.config.test_mode {
            tracing::info!("test mode: would create working directory");
            return Ok(None);
        }

        let dir = tempfile::Builder::new().prefix("wingetup-").tempdir()?;
        tracing::info!(path = ?dir.path(), "created working directory");

        Ok(Some(dir))
    }

    fn install(
        &self,
        decision: &UpdateDecision,
        capabilities: &Capabilities,
        arch: Architecture,
        work_path: PathBuf,
    ) -> Result<(Version, ExecutionReport), ProvisionError> {
        let span = tracing::info_span!("install");
        let _guard = span.enter();

        let plan = Planner::new(self.config, arch, capabilities)
            .run(decision, &work_path)?
            .ok_or_else(|| {
                ProvisionError::new(ProvisionErrorKind::Other).with_context("no plan")
            })?;

        let mut executor = Executor::new(
            &plan,
            self.fetcher,
            self.runner,
            capabilities,
            self.config.install_timeout(),
            self.config.test_mode,
        );
        let result = executor.run();

        tracing::info!(state = ?executor.state(), "installer finished");

        Ok((plan.version, result?))
    }

    fn verify(&self, arch: Architecture, expected: Version) -> Option<InstalledClient> {
        let span = tracing::info_span!("verify");
        let _guard = span.enter();

        if !self.config.test_mode {
            let delay = self.config.settle_delay();
            tracing::debug!(?delay, "waiting for package registration");
            std::thread::sleep(delay);
        }

        let found = Detector::verification(self.runner, self.index, self.config, arch).detect();

        let found_version = found.as_ref().map(|client| client.version.to_string());

        match Verification::classify(found.as_ref(), expected, self.config.test_mode) {
            Verification::Confirmed => {
                tracing::info!(version = ?found_version, "installation verified");
            }
            Verification::Stale => {
                tracing::warn!(
                    found = ?found_version,
                    %expected,
                    "older client still registered, a restart may be required"
                );
            }
            Verification::Missing => {
                tracing::warn!("could not verify installation, a restart may be required");
            }
            Verification::Skipped => {
                tracing::info!(
                    found = ?found_version,
                    "test mode: nothing was installed to verify"
                );
            }
        }

        found
    }

    fn cleanup(&self, work_dir: Option<tempfile::TempDir>) {
        let Some(work_dir) = work_dir else {
            tracing::info!("test mode: would remove working directory");
            return;
        };

        let path = work_dir.path().to_path_buf();

        match work_dir.close() {
            Ok(()) => tracing::info!(?path, "removed working directory"),
            Err(error) => tracing::warn!(?path, %error, "could not remove working directory"),
        }
    }
}
