use std::path::{Path, PathBuf};

use crate::{
    arch::Architecture,
    config::ProvisionConfig,
    error::{ProvisionError, ProvisionErrorKind},
    update::UpdateDecision,
    version::Version,
};

use super::{Capabilities, InstallationMethod};

/// A file to download into the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Name used in logs.
    pub label: String,
    /// Source URL.
    pub url: String,
    /// Local destination.
    pub path: PathBuf,
}

/// Everything an install run downloads and installs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationPlan {
    /// Version being installed.
    pub version: Version,
    /// Host architecture.
    pub arch: Architecture,
    /// Primary installation method of the host.
    pub method: InstallationMethod,
    /// Directory the artifacts are downloaded to.
    pub work_dir: PathBuf,
    /// The client package.
    pub package: Artifact,
    /// The client license.
    pub license: Artifact,
    /// Runtime prerequisites, installed before the package.
    pub dependencies: Vec<Artifact>,
}

impl InstallationPlan {
    /// Returns every artifact: prerequisites first.
    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.dependencies
            .iter()
            .chain([&self.package, &self.license])
    }
}

/// Turns an update decision into an [`InstallationPlan`].
#[derive(Debug)]
pub struct Planner<'a> {
    config: &'a ProvisionConfig,
    arch: Architecture,
    capabilities: &'a Capabilities,
}

impl<'a> Planner<'a> {
    /// Creates a planner for the host.
    pub fn new(
        config: &'a ProvisionConfig,
        arch: Architecture,
        capabilities: &'a Capabilities,
    ) -> Self {
        Self {
            config,
            arch,
            capabilities,
        }
    }

    /// Builds a plan when the decision calls for an install.
    ///
    /// Returns `Ok(None)` for [`UpdateDecision::UpToDate`].
    pub fn run(
        &self,
        decision: &UpdateDecision,
        work_dir: &Path,
    ) -> Result<Option<InstallationPlan>, ProvisionError> {
        let latest = match decision {
            UpdateDecision::UpToDate { .. } => return Ok(None),
            UpdateDecision::NeedsInstall { latest, .. } => latest,
        };

        let method = self.capabilities.primary();
        if method == InstallationMethod::None {
            return Err(ProvisionErrorKind::NoInstallCapability.into());
        }

        let package_asset = latest.release.require_asset(&self.config.package_suffix)?;
        let license_asset = latest.release.require_asset(&self.config.license_suffix)?;

        let package = Artifact {
            label: "package".to_string(),
            url: package_asset.browser_download_url.clone(),
            path: work_dir.join(safe_file_name(&package_asset.name, "package.msixbundle")),
        };
        let license = Artifact {
            label: "license".to_string(),
            url: license_asset.browser_download_url.clone(),
            path: work_dir.join(safe_file_name(&license_asset.name, "License1.xml")),
        };

        let dependencies = [
            ("VCLibs", &self.config.dependencies.vclibs),
            ("UI.Xaml", &self.config.dependencies.ui_xaml),
        ]
        .into_iter()
        .map(|(label, urls)| {
            let url = urls.get(self.arch).to_string();
            let fallback = format!("{label}.{}.appx", self.arch);
            let name = url_file_name(&url).unwrap_or(&fallback);

            Artifact {
                label: label.to_string(),
                path: work_dir.join(safe_file_name(name, &fallback)),
                url,
            }
        })
        .collect();

        let plan = InstallationPlan {
            version: latest.version,
            arch: self.arch,
            method,
            work_dir: work_dir.to_path_buf(),
            package,
            license,
            dependencies,
        };
        tracing::debug!(?plan, "created plan");

        Ok(Some(plan))
    }
}

/// Returns the last path segment of a URL, without query or fragment.
fn url_file_name(url: &str) -> Option<&str> {
    let url = url.split(['?', '#']).next().unwrap_or(url);
    url.rsplit('/').next().filter(|name| !name.is_empty())
}

/// Keeps a remote file name only when it is a plain, single component name.
fn safe_file_name<'n>(name: &'n str, fallback: &'n str) -> &'n str {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', ':'])
        && name.chars().all(|c| !c.is_control());

    if valid {
        name
    } else {
        tracing::warn!(name, fallback, "unsafe file name, using fallback");
        fallback
    }
}

#[cfg(test)]
mod tests {
    use crate::release::{Asset, LatestRelease, Release};

    use super::*;

    fn latest() -> LatestRelease {
        let release = Release {
            tag_name: "v1.8.1911".to_string(),
            prerelease: false,
            published_at: None,
            assets: vec![
                Asset {
                    name: "Microsoft.DesktopAppInstaller_8wekyb3d8bbwe.msixbundle".to_string(),
                    browser_download_url: "https://example.com/pkg.msixbundle".to_string(),
                },
                Asset {
                    name: "76fba573f02545629706ab99170237bc_License1.xml".to_string(),
                    browser_download_url: "https://example.com/License1.xml".to_string(),
                },
            ],
        };
        let version = release.version().unwrap();

        LatestRelease { release, version }
    }

    fn capabilities() -> Capabilities {
        Capabilities {
            native_api: Some(PathBuf::from("powershell.exe")),
            servicing_tool: None,
        }
    }

    #[test]
    fn test_plan_for_needs_install() {
        let config = ProvisionConfig::default();
        let capabilities = capabilities();
        let planner = Planner::new(&config, Architecture::Arm64, &capabilities);
        let decision = UpdateDecision::decide(Some("1.7.0".parse().unwrap()), latest());

        let plan = planner.run(&decision, Path::new("/work")).unwrap().unwrap();

        assert_eq!(plan.version.to_string(), "1.8.1911");
        assert_eq!(plan.method, InstallationMethod::NativePackageApi);
        assert_eq!(plan.package.url, "https://example.com/pkg.msixbundle");
        assert_eq!(
            plan.package.path,
            Path::new("/work/Microsoft.DesktopAppInstaller_8wekyb3d8bbwe.msixbundle")
        );
        assert_eq!(plan.license.url, "https://example.com/License1.xml");

        assert_eq!(plan.dependencies.len(), 2);
        assert_eq!(
            plan.dependencies[0].path,
            Path::new("/work/Microsoft.VCLibs.arm64.14.00.Desktop.appx")
        );
        assert!(plan.dependencies[1].url.ends_with("Microsoft.UI.Xaml.2.8.arm64.appx"));
        assert_eq!(plan.artifacts().count(), 4);
    }

    #[test]
    fn test_no_plan_when_up_to_date() {
        let config = ProvisionConfig::default();
        let capabilities = capabilities();
        let planner = Planner::new(&config, Architecture::X64, &capabilities);
        let decision = UpdateDecision::decide(Some("1.8.1911".parse().unwrap()), latest());

        assert!(planner.run(&decision, Path::new("/work")).unwrap().is_none());
    }

    #[test]
    fn test_missing_license_is_fatal() {
        let config = ProvisionConfig::default();
        let capabilities = capabilities();
        let planner = Planner::new(&config, Architecture::X64, &capabilities);
        let mut latest = latest();
        latest.release.assets.pop();
        let decision = UpdateDecision::decide(None, latest);

        let error = planner.run(&decision, Path::new("/work")).unwrap_err();
        assert_eq!(error.kind(), &ProvisionErrorKind::MissingAsset);
    }

    #[test]
    fn test_no_capability_is_fatal() {
        let config = ProvisionConfig::default();
        let capabilities = Capabilities::default();
        let planner = Planner::new(&config, Architecture::X64, &capabilities);
        let decision = UpdateDecision::decide(None, latest());

        let error = planner.run(&decision, Path::new("/work")).unwrap_err();
        assert_eq!(error.kind(), &ProvisionErrorKind::NoInstallCapability);
    }

    #[test]
    fn test_file_names() {
        assert_eq!(
            url_file_name("https://aka.ms/Microsoft.VCLibs.x64.14.00.Desktop.appx?x=1"),
            Some("Microsoft.VCLibs.x64.14.00.Desktop.appx")
        );
        assert_eq!(url_file_name("https://example.com/"), None);
        assert_eq!(safe_file_name("..", "fallback"), "fallback");
        assert_eq!(safe_file_name("a\\b.appx", "fallback"), "fallback");
        assert_eq!(safe_file_name("ok.appx", "fallback"), "ok.appx");
    }
}
