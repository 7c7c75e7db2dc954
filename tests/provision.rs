//! Test whole provisioning runs against simulated hosts.
use std::{
    cell::RefCell,
    collections::HashMap,
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    time::Duration,
};

use wingetup::{
    arch::Architecture,
    config::ProvisionConfig,
    detect::{DetectError, InstalledPackage, PackageIndex, PackageScope},
    error::ProvisionErrorKind,
    fetch::{FetchError, Fetcher},
    inst::Capabilities,
    os::{CommandOutput, CommandRunner, OsError},
    provision::{Outcome, Provisioner},
};

const FEED_URL: &str = "https://feed.test/releases";
const PACKAGE_URL: &str = concat!(
    "https://download.test/v1.8.1911/",
    "Microsoft.DesktopAppInstaller_8wekyb3d8bbwe.msixbundle"
);
const LICENSE_URL: &str = concat!(
    "https://download.test/v1.8.1911/",
    "76fba573f02545629706ab99170237bc_License1.xml"
);
const INSTALL_LOCATION: &str = concat!(
    "/fake/WindowsApps/",
    "Microsoft.DesktopAppInstaller_1.8_x64__8wekyb3d8bbwe"
);

fn feed() -> String {
    format!(
        r#"[
            {{
                "tag_name": "v1.9.2411-preview",
                "prerelease": true,
                "published_at": "2024-09-01T00:00:00Z",
                "assets": []
            }},
            {{
                "tag_name": "v1.8.1911",
                "prerelease": false,
                "published_at": "2024-06-03T17:00:00Z",
                "assets": [
                    {{
                        "name": "DesktopAppInstaller_Dependencies.zip",
                        "browser_download_url": "https://download.test/deps.zip"
                    }},
                    {{
                        "name": "Microsoft.DesktopAppInstaller_8wekyb3d8bbwe.msixbundle",
                        "browser_download_url": "{PACKAGE_URL}"
                    }},
                    {{
                        "name": "76fba573f02545629706ab99170237bc_License1.xml",
                        "browser_download_url": "{LICENSE_URL}"
                    }}
                ]
            }},
            {{
                "tag_name": "v1.7.10861",
                "prerelease": false,
                "published_at": "2024-02-01T00:00:00Z",
                "assets": []
            }}
        ]"#
    )
}

#[derive(Default)]
struct FakeFetcher {
    bodies: HashMap<String, String>,
    downloads: RefCell<Vec<String>>,
}

impl FakeFetcher {
    fn new(feed: &str) -> Self {
        let config = config();
        let mut bodies = HashMap::new();
        bodies.insert(config.feed_page_url(), feed.to_string());

        for url in [
            PACKAGE_URL,
            LICENSE_URL,
            config.dependencies.vclibs.get(Architecture::X64),
            config.dependencies.ui_xaml.get(Architecture::X64),
        ] {
            bodies.insert(url.to_string(), format!("content of {url}"));
        }

        Self {
            bodies,
            downloads: RefCell::new(Vec::new()),
        }
    }

    fn without(mut self, url: &str) -> Self {
        self.bodies.remove(url);
        self
    }

    fn get(&self, url: &str) -> Result<&String, FetchError> {
        self.bodies.get(url).ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

impl Fetcher for FakeFetcher {
    fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        self.get(url).cloned()
    }

    fn fetch_to_file(&self, url: &str, destination: &Path) -> Result<u64, FetchError> {
        self.downloads.borrow_mut().push(url.to_string());
        let body = self.get(url)?;
        std::fs::write(destination, body)?;
        Ok(body.len() as u64)
    }
}

/// A host whose installers answer with fixed exit codes.
struct FakeHost {
    installed: RefCell<Option<String>>,
    new_version: String,
    servicing_code: i32,
    provisioning_code: i32,
    user_code: i32,
    prerequisite_code: i32,
    calls: RefCell<Vec<String>>,
}

impl FakeHost {
    fn new(installed: Option<&str>) -> Self {
        Self {
            installed: RefCell::new(installed.map(str::to_string)),
            new_version: "v1.8.1911".to_string(),
            servicing_code: 0,
            provisioning_code: 0,
            user_code: 0,
            prerequisite_code: 0,
            calls: RefCell::new(Vec::new()),
        }
    }

    fn install_calls(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| !call.contains("--version"))
            .cloned()
            .collect()
    }

    fn exit(&self, code: i32, is_package: bool) -> CommandOutput {
        if code == 0 && is_package {
            self.installed.replace(Some(self.new_version.clone()));
        }

        CommandOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: if code == 0 { String::new() } else { format!("error 0x{code:08x}") },
        }
    }
}

impl CommandRunner for FakeHost {
    fn run(
        &self,
        program: &OsStr,
        args: &[OsString],
        _timeout: Duration,
    ) -> Result<CommandOutput, OsError> {
        let program = Path::new(program);
        let args = args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<String>>()
            .join(" ");
        self.calls
            .borrow_mut()
            .push(format!("{} {}", program.display(), args));

        let is_package = args.contains(".msixbundle");
        let file_name = program.file_name().and_then(OsStr::to_str).unwrap_or_default();

        match file_name {
            "winget.exe" => match self.installed.borrow().as_ref() {
                Some(version) => Ok(CommandOutput {
                    code: Some(0),
                    stdout: format!("{version}\r\n"),
                    stderr: String::new(),
                }),
                None => Err(std::io::Error::from(std::io::ErrorKind::NotFound).into()),
            },
            "dism.exe" if is_package => Ok(self.exit(self.servicing_code, true)),
            "dism.exe" => Ok(self.exit(self.prerequisite_code, false)),
            "powershell.exe" if args.contains("Add-AppxProvisionedPackage") => {
                Ok(self.exit(self.provisioning_code, true))
            }
            "powershell.exe" if is_package => Ok(self.exit(self.user_code, true)),
            "powershell.exe" => Ok(self.exit(self.prerequisite_code, false)),
            _ => Err(std::io::Error::from(std::io::ErrorKind::NotFound).into()),
        }
    }
}

/// Package index that always lists the client folder.
struct FakeIndex;

impl PackageIndex for FakeIndex {
    fn find(&self, name: &str, scope: PackageScope) -> Result<Vec<InstalledPackage>, DetectError> {
        match scope {
            PackageScope::CurrentUser => Ok(vec![InstalledPackage {
                name: name.to_string(),
                version: None,
                install_location: Some(PathBuf::from(INSTALL_LOCATION)),
            }]),
            PackageScope::AllUsers => Ok(Vec::new()),
        }
    }
}

fn config() -> ProvisionConfig {
    let mut config = ProvisionConfig::default();
    config.feed_url = FEED_URL.to_string();
    config.settle_delay_secs = 0;
    config.apps_dir = Some(PathBuf::from("/nonexistent/WindowsApps"));
    config.well_known_path = Some(PathBuf::from("/nonexistent/winget.exe"));
    config.executable_name = "winget.exe".to_string();
    config
}

fn capabilities() -> Capabilities {
    Capabilities {
        native_api: Some(PathBuf::from("powershell.exe")),
        servicing_tool: Some(PathBuf::from("dism.exe")),
    }
}

fn run(
    config: &ProvisionConfig,
    host: &FakeHost,
    fetcher: &FakeFetcher,
    capabilities: Capabilities,
) -> Result<Outcome, wingetup::error::ProvisionError> {
    Provisioner::new(config, host, fetcher, &FakeIndex)
        .with_architecture(Architecture::X64)
        .with_capabilities(capabilities)
        .run()
}

#[test_log::test]
fn test_older_client_is_updated() {
    let config = config();
    let host = FakeHost::new(Some("v1.7.0"));
    let fetcher = FakeFetcher::new(&feed());

    let outcome = run(&config, &host, &fetcher, capabilities()).unwrap();

    let Outcome::Installed {
        previous,
        version,
        report,
        verified,
    } = outcome
    else {
        panic!("expected install, got {outcome:?}");
    };
    assert_eq!(previous.unwrap().to_string(), "1.7.0");
    assert_eq!(version.to_string(), "1.8.1911");
    assert_eq!(report.method, Some("offline servicing tool"));
    assert!(report.skipped_dependencies.is_empty());
    assert_eq!(verified.unwrap().version, version);

    let downloads = fetcher.downloads.borrow();
    assert_eq!(downloads.len(), 4);
    assert!(downloads[0].contains("VCLibs.x64"));
    assert!(downloads[1].contains("UI.Xaml.2.8.x64"));
    assert_eq!(downloads[2], PACKAGE_URL);
    assert_eq!(downloads[3], LICENSE_URL);

    let installs = host.install_calls();
    assert_eq!(installs.len(), 3);
    assert!(installs[0].starts_with("powershell.exe") && installs[0].contains("Add-AppxPackage"));
    assert!(installs[1].starts_with("powershell.exe") && installs[1].contains("Add-AppxPackage"));
    assert!(installs[2].starts_with("dism.exe"));
    assert!(installs[2].contains("/LicensePath:"));
    assert!(installs[2].contains("License1.xml"));
}

#[test_log::test]
fn test_up_to_date_client_is_left_alone() {
    let config = config();
    let host = FakeHost::new(Some("v1.8.1911"));
    let fetcher = FakeFetcher::new(&feed());

    let outcome = run(&config, &host, &fetcher, capabilities()).unwrap();

    assert!(matches!(outcome, Outcome::UpToDate { .. }));
    assert!(fetcher.downloads.borrow().is_empty());
    assert!(host.install_calls().is_empty());
}

#[test_log::test]
fn test_newer_client_is_left_alone() {
    let config = config();
    let host = FakeHost::new(Some("1.9.0"));
    let fetcher = FakeFetcher::new(&feed());

    let outcome = run(&config, &host, &fetcher, capabilities()).unwrap();

    assert!(matches!(outcome, Outcome::UpToDate { .. }));
    assert!(host.install_calls().is_empty());
}

#[test_log::test]
fn test_test_mode_changes_nothing() {
    let mut config = config();
    config.test_mode = true;
    let host = FakeHost::new(None);
    let fetcher = FakeFetcher::new(&feed());

    let outcome = run(&config, &host, &fetcher, capabilities()).unwrap();

    let Outcome::Installed {
        previous,
        version,
        report,
        verified,
    } = outcome
    else {
        panic!("expected install, got {outcome:?}");
    };
    assert!(previous.is_none());
    assert_eq!(version.to_string(), "1.8.1911");
    assert!(report.method.is_none());
    assert!(verified.is_none());

    assert!(fetcher.downloads.borrow().is_empty());
    assert!(host.install_calls().is_empty());
    // Detection still queried the host.
    assert!(!host.calls.borrow().is_empty());
}

#[test_log::test]
fn test_servicing_failure_falls_back_to_provisioning() {
    let config = config();
    let mut host = FakeHost::new(None);
    host.servicing_code = 87;
    let fetcher = FakeFetcher::new(&feed());

    let outcome = run(&config, &host, &fetcher, capabilities()).unwrap();

    let Outcome::Installed { report, .. } = outcome else {
        panic!("expected install, got {outcome:?}");
    };
    assert_eq!(report.method, Some("native provisioning API"));

    let installs = host.install_calls();
    assert!(installs.iter().any(|call| call.contains("Add-AppxProvisionedPackage")));
    assert!(!installs
        .iter()
        .any(|call| call.contains("Add-AppxPackage -Path") && call.contains(".msixbundle")));
}

#[test_log::test]
fn test_without_servicing_tool_provisioning_is_first() {
    let config = config();
    let host = FakeHost::new(None);
    let fetcher = FakeFetcher::new(&feed());
    let capabilities = Capabilities {
        servicing_tool: None,
        ..capabilities()
    };

    let outcome = run(&config, &host, &fetcher, capabilities).unwrap();

    let Outcome::Installed { report, .. } = outcome else {
        panic!("expected install, got {outcome:?}");
    };
    assert_eq!(report.method, Some("native provisioning API"));
    assert!(host
        .install_calls()
        .iter()
        .all(|call| !call.starts_with("dism.exe")));
}

#[test_log::test]
fn test_every_method_failing_is_fatal() {
    let config = config();
    let mut host = FakeHost::new(Some("v1.7.0"));
    host.servicing_code = 1;
    host.provisioning_code = 1;
    host.user_code = 1;
    let fetcher = FakeFetcher::new(&feed());

    let error = run(&config, &host, &fetcher, capabilities()).unwrap_err();

    assert_eq!(error.kind(), &ProvisionErrorKind::InstallChainExhausted);
    assert_eq!(host.install_calls().len(), 5);
}

#[test_log::test]
fn test_prerequisite_failure_is_not_fatal() {
    let config = config();
    let mut host = FakeHost::new(None);
    host.prerequisite_code = 1;
    let fetcher = FakeFetcher::new(&feed());

    let outcome = run(&config, &host, &fetcher, capabilities()).unwrap();

    let Outcome::Installed { report, .. } = outcome else {
        panic!("expected install, got {outcome:?}");
    };
    assert_eq!(report.method, Some("offline servicing tool"));
    assert_eq!(report.skipped_dependencies, ["VCLibs", "UI.Xaml"]);
}

#[test_log::test]
fn test_prerequisite_download_failure_is_not_fatal() {
    let config = config();
    let host = FakeHost::new(None);
    let vclibs = config.dependencies.vclibs.get(Architecture::X64).to_string();
    let fetcher = FakeFetcher::new(&feed()).without(&vclibs);

    let outcome = run(&config, &host, &fetcher, capabilities()).unwrap();

    let Outcome::Installed { report, .. } = outcome else {
        panic!("expected install, got {outcome:?}");
    };
    assert_eq!(report.skipped_dependencies, ["VCLibs"]);
    // Only UI.Xaml and the package are installed.
    assert_eq!(host.install_calls().len(), 2);
}

#[test_log::test]
fn test_package_download_failure_is_fatal() {
    let config = config();
    let host = FakeHost::new(None);
    let fetcher = FakeFetcher::new(&feed()).without(PACKAGE_URL);

    let error = run(&config, &host, &fetcher, capabilities()).unwrap_err();

    assert_eq!(error.kind(), &ProvisionErrorKind::DownloadFailed);
    assert!(host.install_calls().is_empty());
}

#[test_log::test]
fn test_only_prereleases_is_fatal() {
    let config = config();
    let host = FakeHost::new(None);
    let feed = r#"[{
        "tag_name": "v1.9.2411-preview",
        "prerelease": true,
        "published_at": "2024-09-01T00:00:00Z",
        "assets": []
    }]"#;
    let fetcher = FakeFetcher::new(feed);

    let error = run(&config, &host, &fetcher, capabilities()).unwrap_err();

    assert_eq!(error.kind(), &ProvisionErrorKind::NoStableRelease);
    assert!(fetcher.downloads.borrow().is_empty());
}

#[test_log::test]
fn test_missing_license_is_fatal() {
    let config = config();
    let host = FakeHost::new(None);
    let feed = feed().replace("76fba573f02545629706ab99170237bc_License1.xml", "notes.txt");
    let fetcher = FakeFetcher::new(&feed);

    let error = run(&config, &host, &fetcher, capabilities()).unwrap_err();

    assert_eq!(error.kind(), &ProvisionErrorKind::MissingAsset);
    assert!(fetcher.downloads.borrow().is_empty());
}

#[test_log::test]
fn test_unreachable_feed_is_fatal() {
    let config = config();
    let host = FakeHost::new(Some("v1.7.0"));
    let fetcher = FakeFetcher::new(&feed()).without(&config.feed_page_url());

    let error = run(&config, &host, &fetcher, capabilities()).unwrap_err();

    assert_eq!(error.kind(), &ProvisionErrorKind::FeedUnavailable);
}

#[test_log::test]
fn test_no_capability_is_fatal() {
    let config = config();
    let host = FakeHost::new(None);
    let fetcher = FakeFetcher::new(&feed());

    let error = run(&config, &host, &fetcher, Capabilities::default()).unwrap_err();

    assert_eq!(error.kind(), &ProvisionErrorKind::NoInstallCapability);
    assert!(host.calls.borrow().is_empty());
}
