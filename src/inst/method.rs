use std::{
    ffi::OsString,
    fmt::Display,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::os::{CommandRunner, OsError};

/// Mechanism used to install packages on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallationMethod {
    /// The Appx PowerShell cmdlets.
    NativePackageApi,
    /// The deployment image servicing tool (DISM).
    OfflineServicingTool,
    /// Nothing usable was found.
    None,
}

/// The installation mechanisms found on the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// PowerShell executable that has the Appx cmdlets.
    pub native_api: Option<PathBuf>,
    /// DISM executable.
    pub servicing_tool: Option<PathBuf>,
}

impl Capabilities {
    /// Probes the host for PowerShell with the Appx module and for DISM.
    pub fn detect(runner: &dyn CommandRunner, timeout: Duration) -> Self {
        Self::from_tools(
            runner,
            crate::os::find_powershell(),
            crate::os::find_dism(),
            timeout,
        )
    }

    /// Builds the capabilities from already located tools.
    ///
    /// `powershell` counts as the native API only when `Get-Command
    /// Add-AppxPackage` succeeds in it.
    pub fn from_tools(
        runner: &dyn CommandRunner,
        powershell: Option<PathBuf>,
        dism: Option<PathBuf>,
        timeout: Duration,
    ) -> Self {
        let native_api = powershell.filter(|powershell| {
            let script = "Get-Command Add-AppxPackage -ErrorAction Stop | Out-Null";

            match runner.run(
                powershell.as_os_str(),
                &crate::os::powershell_args(script),
                timeout,
            ) {
                Ok(output) if output.success() => true,
                Ok(output) => {
                    tracing::warn!(code = ?output.code, "PowerShell lacks the Appx cmdlets");
                    false
                }
                Err(error) => {
                    tracing::warn!(%error, "could not run PowerShell");
                    false
                }
            }
        });

        let capabilities = Self {
            native_api,
            servicing_tool: dism,
        };
        tracing::info!(
            native_api = ?capabilities.native_api,
            servicing_tool = ?capabilities.servicing_tool,
            primary = ?capabilities.primary(),
            "detected installation capabilities"
        );

        capabilities
    }

    /// Returns the preferred method: native API, then servicing tool.
    pub fn primary(&self) -> InstallationMethod {
        if self.native_api.is_some() {
            InstallationMethod::NativePackageApi
        } else if self.servicing_tool.is_some() {
            InstallationMethod::OfflineServicingTool
        } else {
            InstallationMethod::None
        }
    }
}

/// Error for one installation attempt.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum InstallError {
    /// The method's tool is not present on this host.
    #[error("not available")]
    Unavailable,

    /// The tool could not be started or timed out.
    #[error(transparent)]
    Os(#[from] OsError),

    /// The tool reported failure.
    #[error("exit code {code:?}: {message}")]
    Failed {
        /// Exit code.
        code: Option<i32>,
        /// Last lines of the tool's output.
        message: String,
    },
}

/// Host capabilities and process settings shared by installation attempts.
pub struct InstallContext<'a> {
    /// Starts the installer tools.
    pub runner: &'a dyn CommandRunner,
    /// Tools present on the host.
    pub capabilities: &'a Capabilities,
    /// Timeout per installer invocation.
    pub timeout: Duration,
}

impl InstallContext<'_> {
    fn run(&self, program: &Path, args: Vec<OsString>) -> Result<(), InstallError> {
        let output = self.runner.run(program.as_os_str(), &args, self.timeout)?;

        if output.success() {
            return Ok(());
        }

        let text = if output.stderr.trim().is_empty() {
            &output.stdout
        } else {
            &output.stderr
        };
        let lines = text.lines().map(str::trim).filter(|line| !line.is_empty());
        let message = lines.collect::<Vec<&str>>();
        let start = message.len().saturating_sub(3);

        Err(InstallError::Failed {
            code: output.code,
            message: message[start..].join(" "),
        })
    }
}

/// One way of installing a package file.
pub trait InstallMethod {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Returns whether the host has what this method needs.
    fn is_available(&self, capabilities: &Capabilities) -> bool;

    /// Installs `package`, with `license` when given.
    fn install(
        &self,
        context: &InstallContext<'_>,
        package: &Path,
        license: Option<&Path>,
    ) -> Result<(), InstallError>;
}

/// DISM `/Add-ProvisionedAppxPackage` for all users of the image.
#[derive(Debug, Clone, Default)]
pub struct ServicingToolInstall;

impl InstallMethod for ServicingToolInstall {
    fn name(&self) -> &'static str {
        "offline servicing tool"
    }

    fn is_available(&self, capabilities: &Capabilities) -> bool {
        capabilities.servicing_tool.is_some()
    }

    fn install(
        &self,
        context: &InstallContext<'_>,
        package: &Path,
        license: Option<&Path>,
    ) -> Result<(), InstallError> {
        let dism = context
            .capabilities
            .servicing_tool
            .as_deref()
            .ok_or(InstallError::Unavailable)?;

        let mut package_arg = OsString::from("/PackagePath:");
        package_arg.push(package);

        let mut args = vec![
            OsString::from("/Online"),
            OsString::from("/Add-ProvisionedAppxPackage"),
            package_arg,
        ];

        match license {
            Some(license) => {
                let mut license_arg = OsString::from("/LicensePath:");
                license_arg.push(license);
                args.push(license_arg);
            }
            None => args.push(OsString::from("/SkipLicense")),
        }
        args.push(OsString::from("/NoRestart"));

        context.run(dism, args)
    }
}

/// `Add-AppxProvisionedPackage -Online` for all users of the machine.
#[derive(Debug, Clone, Default)]
pub struct ProvisioningApiInstall;

impl InstallMethod for ProvisioningApiInstall {
    fn name(&self) -> &'static str {
        "native provisioning API"
    }

    fn is_available(&self, capabilities: &Capabilities) -> bool {
        capabilities.native_api.is_some()
    }

    fn install(
        &self,
        context: &InstallContext<'_>,
        package: &Path,
        license: Option<&Path>,
    ) -> Result<(), InstallError> {
        let powershell = context
            .capabilities
            .native_api
            .as_deref()
            .ok_or(InstallError::Unavailable)?;

        let license_arg = match license {
            Some(license) => format!("-LicensePath {}", crate::os::powershell_quote(license)),
            None => "-SkipLicense".to_string(),
        };
        let script = format!(
            "Add-AppxProvisionedPackage -Online -PackagePath {} {} -ErrorAction Stop | Out-Null",
            crate::os::powershell_quote(package),
            license_arg
        );

        context.run(powershell, crate::os::powershell_args(&script))
    }
}

/// `Add-AppxPackage` for the current user only. The license is not used.
#[derive(Debug, Clone, Default)]
pub struct UserApiInstall;

impl InstallMethod for UserApiInstall {
    fn name(&self) -> &'static str {
        "native single-user API"
    }

    fn is_available(&self, capabilities: &Capabilities) -> bool {
        capabilities.native_api.is_some()
    }

    fn install(
        &self,
        context: &InstallContext<'_>,
        package: &Path,
        _license: Option<&Path>,
    ) -> Result<(), InstallError> {
        let powershell = context
            .capabilities
            .native_api
            .as_deref()
            .ok_or(InstallError::Unavailable)?;

        let script = format!(
            "Add-AppxPackage -Path {} -ErrorAction Stop",
            crate::os::powershell_quote(package)
        );

        context.run(powershell, crate::os::powershell_args(&script))
    }
}

/// When an [`InstallChain`] moves on to its next method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Only when the current method is unavailable.
    OnUnavailable,
    /// When the current method is unavailable or fails.
    OnFailure,
}

/// A method that did not install the package, and why.
#[derive(Debug)]
pub struct Attempt {
    /// Method name.
    pub method: &'static str,
    /// What went wrong.
    pub error: InstallError,
}

/// Every method of an [`InstallChain`] was tried without success.
#[derive(Debug, thiserror::Error)]
pub struct ChainExhausted {
    /// Attempts in order, including unavailable methods.
    pub attempts: Vec<Attempt>,
}

impl Display for ChainExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("no installation method succeeded")?;

        for attempt in &self.attempts {
            write!(f, "; {}: {}", attempt.method, attempt.error)?;
        }

        Ok(())
    }
}

/// Ordered installation methods tried until one succeeds.
pub struct InstallChain {
    methods: Vec<Box<dyn InstallMethod>>,
    policy: FallbackPolicy,
}

impl InstallChain {
    /// Creates an empty chain.
    pub fn new(policy: FallbackPolicy) -> Self {
        Self {
            methods: Vec::new(),
            policy,
        }
    }

    /// Appends a method.
    pub fn with_method<M: InstallMethod + 'static>(mut self, method: M) -> Self {
        self.methods.push(Box::new(method));
        self
    }

    /// Chain for the client package: servicing tool, provisioning API, then
    /// single-user API.
    pub fn main_package() -> Self {
        Self::new(FallbackPolicy::OnFailure)
            .with_method(ServicingToolInstall)
            .with_method(ProvisioningApiInstall)
            .with_method(UserApiInstall)
    }

    /// Chain for a runtime prerequisite: native API, with the servicing tool
    /// only when the native API is missing.
    pub fn prerequisite() -> Self {
        Self::new(FallbackPolicy::OnUnavailable)
            .with_method(UserApiInstall)
            .with_method(ServicingToolInstall)
    }

    /// Returns the method names in order.
    pub fn method_names(&self) -> Vec<&'static str> {
        self.methods.iter().map(|method| method.name()).collect()
    }

    /// Returns the names of the methods available on this host, in order.
    pub fn available_names(&self, capabilities: &Capabilities) -> Vec<&'static str> {
        self.methods
            .iter()
            .filter(|method| method.is_available(capabilities))
            .map(|method| method.name())
            .collect()
    }

    /// Tries each method in order and returns the name of the one that worked.
    pub fn run(
        &self,
        context: &InstallContext<'_>,
        package: &Path,
        license: Option<&Path>,
    ) -> Result<&'static str, ChainExhausted> {
        let mut attempts = Vec::new();

        for method in &self.methods {
            let name = method.name();

            if !method.is_available(context.capabilities) {
                tracing::info!(method = name, "installation method unavailable");
                attempts.push(Attempt {
                    method: name,
                    error: InstallError::Unavailable,
                });
                continue;
            }

            tracing::info!(method = name, ?package, ?license, "installing");

            match method.install(context, package, license) {
                Ok(()) => {
                    tracing::info!(method = name, ?package, "installed");
                    return Ok(name);
                }
                Err(error) => {
                    tracing::warn!(method = name, ?package, %error, "installation method failed");
                    attempts.push(Attempt {
                        method: name,
                        error,
                    });

                    if self.policy == FallbackPolicy::OnUnavailable {
                        break;
                    }
                }
            }
        }

        Err(ChainExhausted { attempts })
    }
}
