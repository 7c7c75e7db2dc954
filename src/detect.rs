//! Detection of an installed client.
//!
//! Detection runs an ordered chain of [`Probe`]s. The first probe that finds
//! a working executable wins. A probe that fails is logged and the chain moves
//! on, so detection itself never fails.
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{
    arch::Architecture,
    config::ProvisionConfig,
    os::{CommandRunner, OsError},
    version::Version,
};

/// A client executable that answered with its version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledClient {
    /// Reported version.
    pub version: Version,
    /// Executable that reported it.
    pub path: PathBuf,
}

/// Whose packages a [`PackageIndex`] query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageScope {
    /// Packages registered for the current user.
    CurrentUser,
    /// Packages registered for any user.
    AllUsers,
}

/// An entry of the OS package index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstalledPackage {
    /// Package name.
    pub name: String,
    /// Package version as recorded by the OS.
    #[serde(default)]
    pub version: Option<String>,
    /// Folder the package is installed in.
    #[serde(default)]
    pub install_location: Option<PathBuf>,
}

/// Read access to the OS package index.
pub trait PackageIndex {
    /// Returns the installed packages with the given name.
    fn find(&self, name: &str, scope: PackageScope) -> Result<Vec<InstalledPackage>, DetectError>;
}

/// Error raised inside a single probe.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DetectError {
    /// OS or process error.
    #[error(transparent)]
    Os(#[from] OsError),

    /// Standard IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The package index answered with something unexpected.
    #[error("package index query failed: {0}")]
    Index(String),
}

/// [`PackageIndex`] that queries `Get-AppxPackage` through PowerShell.
pub struct PowerShellPackageIndex<'a> {
    runner: &'a dyn CommandRunner,
    powershell: Option<PathBuf>,
    timeout: Duration,
}

impl<'a> PowerShellPackageIndex<'a> {
    /// Creates an index using the given PowerShell executable.
    pub fn new(
        runner: &'a dyn CommandRunner,
        powershell: Option<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            powershell,
            timeout,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(InstalledPackage),
    Many(Vec<InstalledPackage>),
}

/// Parses `ConvertTo-Json` output, which is an object for a single result.
fn parse_package_list(stdout: &str) -> Result<Vec<InstalledPackage>, DetectError> {
    let stdout = stdout.trim();

    if stdout.is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str::<OneOrMany>(stdout) {
        Ok(OneOrMany::One(package)) => Ok(vec![package]),
        Ok(OneOrMany::Many(packages)) => Ok(packages),
        Err(error) => Err(DetectError::Index(error.to_string())),
    }
}

impl PackageIndex for PowerShellPackageIndex<'_> {
    fn find(&self, name: &str, scope: PackageScope) -> Result<Vec<InstalledPackage>, DetectError> {
        let powershell = self
            .powershell
            .as_ref()
            .ok_or(OsError::Other("PowerShell is not available"))?;

        let scope_arg = match scope {
            PackageScope::CurrentUser => "",
            PackageScope::AllUsers => " -AllUsers",
        };
        let script = format!(
            concat!(
                "Get-AppxPackage -Name {}{}",
                " | Select-Object Name, Version, InstallLocation",
                " | ConvertTo-Json -Compress"
            ),
            crate::os::powershell_quote(name),
            scope_arg
        );

        let output = self.runner.run(
            powershell.as_os_str(),
            &crate::os::powershell_args(&script),
            self.timeout,
        )?;

        if !output.success() {
            return Err(DetectError::Index(format!(
                "exit code {:?}: {}",
                output.code,
                output.stderr.trim()
            )));
        }

        parse_package_list(&output.stdout)
    }
}

/// Runs a candidate executable with `--version`.
pub struct VersionQuery<'a> {
    runner: &'a dyn CommandRunner,
    timeout: Duration,
}

impl<'a> VersionQuery<'a> {
    /// Creates a query that uses `runner` with a per-call timeout.
    pub fn new(runner: &'a dyn CommandRunner, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    /// Returns the client at `exe` when it runs and reports a valid version.
    pub fn query(&self, exe: &Path) -> Option<InstalledClient> {
        let output = match self.runner.run(
            exe.as_os_str(),
            &[OsString::from("--version")],
            self.timeout,
        ) {
            Ok(output) => output,
            Err(error) => {
                tracing::debug!(?exe, %error, "could not run candidate");
                return None;
            }
        };

        if !output.success() {
            tracing::debug!(?exe, code = ?output.code, "candidate exited with failure");
            return None;
        }

        let line = output.stdout.lines().map(str::trim).find(|line| !line.is_empty());

        let Some(line) = line else {
            tracing::debug!(?exe, "candidate printed nothing");
            return None;
        };

        match Version::parse_tag(line) {
            Ok(version) => Some(InstalledClient {
                version,
                path: exe.to_path_buf(),
            }),
            Err(error) => {
                tracing::warn!(?exe, output = line, %error, "candidate printed an invalid version");
                None
            }
        }
    }
}

/// One way of locating an installed client.
pub trait Probe {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Looks for the client. `Ok(None)` means nothing was found.
    fn locate(&self, query: &VersionQuery<'_>) -> Result<Option<InstalledClient>, DetectError>;
}

/// Looks up the package in the OS package index, current user first.
pub struct PackageIndexProbe<'a> {
    index: &'a dyn PackageIndex,
    package_name: String,
    executable_name: String,
}

impl<'a> PackageIndexProbe<'a> {
    /// Creates a probe for the named package.
    pub fn new(index: &'a dyn PackageIndex, package_name: &str, executable_name: &str) -> Self {
        Self {
            index,
            package_name: package_name.to_string(),
            executable_name: executable_name.to_string(),
        }
    }
}

impl Probe for PackageIndexProbe<'_> {
    fn name(&self) -> &'static str {
        "package index"
    }

    fn locate(&self, query: &VersionQuery<'_>) -> Result<Option<InstalledClient>, DetectError> {
        for scope in [PackageScope::CurrentUser, PackageScope::AllUsers] {
            let packages = match self.index.find(&self.package_name, scope) {
                Ok(packages) => packages,
                Err(error) => {
                    tracing::warn!(?scope, %error, "package index query failed");
                    continue;
                }
            };

            for package in packages {
                tracing::debug!(?scope, ?package, "package index entry");

                let Some(location) = &package.install_location else {
                    continue;
                };

                if let Some(client) = query.query(&location.join(&self.executable_name)) {
                    return Ok(Some(client));
                }
            }
        }

        Ok(None)
    }
}

/// Scans the application folder for package folders of the architecture.
///
/// Candidates are tried in directory-listing order.
pub struct FolderScanProbe {
    apps_dir: PathBuf,
    prefix: String,
    suffix: String,
    executable_name: String,
}

impl FolderScanProbe {
    /// Creates a probe for folders named `<package>_*_<arch>__<publisher>`.
    pub fn new(apps_dir: &Path, config: &ProvisionConfig, arch: Architecture) -> Self {
        Self {
            apps_dir: apps_dir.to_path_buf(),
            prefix: format!("{}_", config.package_name).to_ascii_lowercase(),
            suffix: format!("_{}__{}", arch.as_str(), config.publisher_id).to_ascii_lowercase(),
            executable_name: config.executable_name.clone(),
        }
    }

    fn matches(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        name.starts_with(&self.prefix) && name.ends_with(&self.suffix)
    }
}

impl Probe for FolderScanProbe {
    fn name(&self) -> &'static str {
        "folder scan"
    }

    fn locate(&self, query: &VersionQuery<'_>) -> Result<Option<InstalledClient>, DetectError> {
        tracing::debug!(dir = ?self.apps_dir, "scanning application folder");

        for entry in std::fs::read_dir(&self.apps_dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    tracing::debug!(%error, "skipping unreadable entry");
                    continue;
                }
            };

            let name = entry.file_name();
            if !self.matches(&name.to_string_lossy()) || !entry.path().is_dir() {
                continue;
            }

            if let Some(client) = query.query(&entry.path().join(&self.executable_name)) {
                return Ok(Some(client));
            }
        }

        Ok(None)
    }
}

/// Checks a single fixed location.
pub struct WellKnownPathProbe {
    path: Option<PathBuf>,
}

impl WellKnownPathProbe {
    /// Creates a probe for `path`. `None` makes the probe find nothing.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl Probe for WellKnownPathProbe {
    fn name(&self) -> &'static str {
        "well-known path"
    }

    fn locate(&self, query: &VersionQuery<'_>) -> Result<Option<InstalledClient>, DetectError> {
        match &self.path {
            Some(path) if path.is_file() => Ok(query.query(path)),
            _ => Ok(None),
        }
    }
}

/// Resolves the executable through the search path (PATH).
pub struct SearchPathProbe {
    names: Vec<String>,
    paths: Option<OsString>,
}

impl SearchPathProbe {
    /// Creates a probe that searches the process's PATH.
    pub fn new(executable_name: &str) -> Self {
        let mut names = vec![executable_name.to_string()];

        if let Some(stem) = executable_name.strip_suffix(".exe") {
            names.push(stem.to_string());
        }

        Self { names, paths: None }
    }

    /// Searches `paths` instead of the process's PATH.
    pub fn with_paths(mut self, paths: OsString) -> Self {
        self.paths = Some(paths);
        self
    }
}

impl Probe for SearchPathProbe {
    fn name(&self) -> &'static str {
        "search path"
    }

    fn locate(&self, query: &VersionQuery<'_>) -> Result<Option<InstalledClient>, DetectError> {
        for name in &self.names {
            let found = match &self.paths {
                Some(paths) => which::which_in(name, Some(paths), std::env::current_dir()?),
                None => which::which(name),
            };

            if let Ok(path) = found {
                return Ok(query.query(&path));
            }
        }

        Ok(None)
    }
}

/// Runs probes in order until one finds the client.
pub struct Detector<'a> {
    probes: Vec<Box<dyn Probe + 'a>>,
    query: VersionQuery<'a>,
}

impl<'a> Detector<'a> {
    /// Creates a detector without probes.
    pub fn new(query: VersionQuery<'a>) -> Self {
        Self {
            probes: Vec::new(),
            query,
        }
    }

    /// Appends a probe to the chain.
    pub fn with_probe<P: Probe + 'a>(mut self, probe: P) -> Self {
        self.probes.push(Box::new(probe));
        self
    }

    /// Creates the full chain: package index, folder scan, well-known path,
    /// then the search path.
    pub fn installed(
        runner: &'a dyn CommandRunner,
        index: &'a dyn PackageIndex,
        config: &ProvisionConfig,
        arch: Architecture,
    ) -> Self {
        Self::verification(runner, index, config, arch)
            .with_probe(WellKnownPathProbe::new(config.well_known_path()))
            .with_probe(SearchPathProbe::new(&config.executable_name))
    }

    /// Creates the chain used after installing: package index then folder scan.
    pub fn verification(
        runner: &'a dyn CommandRunner,
        index: &'a dyn PackageIndex,
        config: &ProvisionConfig,
        arch: Architecture,
    ) -> Self {
        Self::new(VersionQuery::new(runner, config.probe_timeout()))
            .with_probe(PackageIndexProbe::new(
                index,
                &config.package_name,
                &config.executable_name,
            ))
            .with_probe(FolderScanProbe::new(&config.apps_dir(), config, arch))
    }

    /// Returns the first client found, or `None`.
    pub fn detect(&self) -> Option<InstalledClient> {
        for probe in &self.probes {
            let span = tracing::debug_span!("probe", name = probe.name());
            let _guard = span.enter();

            match probe.locate(&self.query) {
                Ok(Some(client)) => {
                    tracing::info!(
                        probe = probe.name(),
                        version = %client.version,
                        path = ?client.path,
                        "found installed client"
                    );
                    return Some(client);
                }
                Ok(None) => tracing::debug!("nothing found"),
                Err(error) => tracing::warn!(probe = probe.name(), %error, "probe failed"),
            }
        }

        tracing::info!("no installed client found");
        None
    }
}
