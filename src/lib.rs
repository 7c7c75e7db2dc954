//! Provision the Windows Package Manager client (winget) on a host.
//!
//! A run detects the installed client, asks the project's release feed for
//! the latest stable release, and installs that release when the host's copy
//! is missing or older. Installation downloads the package, its license, and
//! the runtime prerequisites, then installs them with whatever mechanism the
//! host offers.
//!
//! ## Example
//!
//! ```no_run
//! # use wingetup::config::ProvisionConfig;
//! # use wingetup::provision::Outcome;
//! let mut config = ProvisionConfig::default();
//! config.test_mode = true;
//!
//! match wingetup::provision(&config).unwrap() {
//!     Outcome::UpToDate { installed, .. } => println!("already at {installed}"),
//!     Outcome::Installed { version, .. } => println!("installed {version}"),
//! }
//! ```
//!
//! ## Test mode
//!
//! With [`ProvisionConfig::test_mode`](config::ProvisionConfig::test_mode),
//! every action that changes the host is logged instead of performed.
//! Detection and the release query still run against the live system.
//!
//! ## Seams
//!
//! Processes, HTTP, and the package index are reached through the
//! [`CommandRunner`](os::CommandRunner), [`Fetcher`](fetch::Fetcher), and
//! [`PackageIndex`](detect::PackageIndex) traits. [`provision::Provisioner`]
//! accepts any implementation of them.
use config::ProvisionConfig;
use detect::PowerShellPackageIndex;
use error::ProvisionError;
use fetch::HttpFetcher;
use os::SystemRunner;
use provision::{Outcome, Provisioner};

pub mod arch;
pub mod config;
pub mod detect;
pub mod error;
pub mod fetch;
pub mod inst;
pub mod os;
pub mod provision;
pub mod release;
pub mod update;
pub mod version;

/// Runs provisioning against the live system.
///
/// Returns the outcome of the run. Errors are fatal conditions: no
/// installation mechanism, an unreachable feed, no stable release, a missing
/// asset, a failed required download, or every installation method failing.
pub fn provision(config: &ProvisionConfig) -> Result<Outcome, ProvisionError> {
    let runner = SystemRunner;
    let (connect_timeout, read_timeout) = config.http_timeouts();
    let fetcher = HttpFetcher::new(connect_timeout, read_timeout);
    let index = PowerShellPackageIndex::new(
        &runner,
        crate::os::find_powershell(),
        config.probe_timeout(),
    );

    Provisioner::new(config, &runner, &fetcher, &index).run()
}
