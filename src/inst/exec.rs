use std::path::Path;

use crate::{
    error::{ProvisionError, ProvisionErrorKind, ResultExt},
    fetch::Fetcher,
    os::CommandRunner,
};

use super::{
    plan::{Artifact, InstallationPlan},
    Capabilities, InstallChain, InstallContext,
};

/// Progress of an [`Executor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    /// Nothing has been done yet.
    Planned,
    /// Fetching artifacts.
    Downloading,
    /// Running installers.
    Installing,
    /// The client package was installed.
    Succeeded,
    /// A mandatory step failed.
    Failed,
}

/// What an [`Executor`] run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Method that installed the client package. `None` in test mode.
    pub method: Option<&'static str>,
    /// Labels of prerequisites that could not be downloaded or installed.
    pub skipped_dependencies: Vec<String>,
}

/// Downloads and installs the artifacts of a plan.
pub struct Executor<'a> {
    plan: &'a InstallationPlan,
    fetcher: &'a dyn Fetcher,
    context: InstallContext<'a>,
    test_mode: bool,
    state: InstallState,
}

impl<'a> Executor<'a> {
    /// Creates an executor for `plan`.
    ///
    /// When `test_mode` is set, downloads and installs are only logged.
    pub fn new(
        plan: &'a InstallationPlan,
        fetcher: &'a dyn Fetcher,
        runner: &'a dyn CommandRunner,
        capabilities: &'a Capabilities,
        install_timeout: std::time::Duration,
        test_mode: bool,
    ) -> Self {
        Self {
            plan,
            fetcher,
            context: InstallContext {
                runner,
                capabilities,
                timeout: install_timeout,
            },
            test_mode,
            state: InstallState::Planned,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> InstallState {
        self.state
    }

    fn transition(&mut self, state: InstallState) {
        tracing::debug!(from = ?self.state, to = ?state, "install state");
        self.state = state;
    }

    /// Runs the plan.
    ///
    /// Prerequisite failures are logged and skipped. Failure to download the
    /// package or license, or failure of every installation method, is fatal.
    pub fn run(&mut self) -> Result<ExecutionReport, ProvisionError> {
        let result = self.run_impl();

        match &result {
            Ok(_) => self.transition(InstallState::Succeeded),
            Err(_) => self.transition(InstallState::Failed),
        }

        result
    }

    fn run_impl(&mut self) -> Result<ExecutionReport, ProvisionError> {
        let plan = self.plan;
        let mut report = ExecutionReport::default();

        self.transition(InstallState::Downloading);

        let mut dependencies = Vec::new();
        for artifact in &plan.dependencies {
            match self.download(artifact) {
                Ok(()) => dependencies.push(artifact),
                Err(error) => {
                    tracing::warn!(
                        dependency = %artifact.label,
                        %error,
                        "prerequisite download failed, continuing without it"
                    );
                    report.skipped_dependencies.push(artifact.label.clone());
                }
            }
        }

        for artifact in [&plan.package, &plan.license] {
            self.download(artifact).map_err(|error| {
                tracing::error!(artifact = %artifact.label, %error, "required download failed");
                error
            })?;
        }

        self.transition(InstallState::Installing);

        let prerequisite_chain = InstallChain::prerequisite();
        for artifact in dependencies {
            if !self.install_prerequisite(&prerequisite_chain, artifact) {
                report.skipped_dependencies.push(artifact.label.clone());
            }
        }

        report.method = self.install_package()?;

        Ok(report)
    }

    fn download(&self, artifact: &Artifact) -> Result<(), ProvisionError> {
        if self.test_mode {
            tracing::info!(
                artifact = %artifact.label,
                url = %artifact.url,
                path = ?artifact.path,
                "test mode: would download"
            );
            return Ok(());
        }

        tracing::info!(artifact = %artifact.label, url = %artifact.url, "downloading");

        let describe = || format!("{} from {}", artifact.label, artifact.url);

        let len = self
            .fetcher
            .fetch_to_file(&artifact.url, &artifact.path)
            .or_provision_with(ProvisionErrorKind::DownloadFailed, describe)?;
        let checksum = crate::os::file_checksum(&artifact.path)
            .or_provision_with(ProvisionErrorKind::DownloadFailed, describe)?;

        if len == 0 || checksum.len == 0 {
            return Err(ProvisionError::new(ProvisionErrorKind::DownloadFailed)
                .with_context(describe())
                .with_context("empty response"));
        }

        tracing::info!(
            artifact = %artifact.label,
            path = ?artifact.path,
            len = checksum.len,
            crc32c = %format!("{:08x}", checksum.crc32c),
            "downloaded"
        );

        Ok(())
    }

    fn install_prerequisite(&self, chain: &InstallChain, artifact: &Artifact) -> bool {
        let span = tracing::info_span!("prerequisite", name = %artifact.label);
        let _guard = span.enter();

        if self.test_mode {
            tracing::info!(
                path = ?artifact.path,
                methods = ?chain.available_names(self.context.capabilities),
                "test mode: would install"
            );
            return true;
        }

        match chain.run(&self.context, &artifact.path, None) {
            Ok(_) => true,
            Err(error) => {
                // Also reached when the prerequisite is already present.
                tracing::warn!(%error, "prerequisite not installed, continuing");
                false
            }
        }
    }

    fn install_package(&self) -> Result<Option<&'static str>, ProvisionError> {
        let span = tracing::info_span!("package", version = %self.plan.version);
        let _guard = span.enter();

        let chain = InstallChain::main_package();
        let package: &Path = &self.plan.package.path;
        let license: &Path = &self.plan.license.path;

        if self.test_mode {
            tracing::info!(
                ?package,
                ?license,
                methods = ?chain.available_names(self.context.capabilities),
                "test mode: would install"
            );
            return Ok(None);
        }

        match chain.run(&self.context, package, Some(license)) {
            Ok(method) => Ok(Some(method)),
            Err(error) => {
                tracing::error!(%error, "every installation method failed");
                Err(ProvisionError::new(ProvisionErrorKind::InstallChainExhausted)
                    .with_source(error))
            }
        }
    }
}
