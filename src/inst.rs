//! Installing the client and its prerequisites.
//!
//! An [`InstallationPlan`] lists the artifacts of one run. The [`Executor`]
//! downloads them into the working directory and installs them with an
//! [`InstallChain`], an ordered list of [`InstallMethod`]s that falls back to
//! the next method according to its [`FallbackPolicy`].
//!
//! The client package is installed with, in order:
//!
//! 1. DISM `/Add-ProvisionedAppxPackage` with the license.
//! 2. `Add-AppxProvisionedPackage -Online` with the license.
//! 3. `Add-AppxPackage` for the current user.
//!
//! Prerequisites use `Add-AppxPackage`, or DISM when the Appx cmdlets are
//! missing. They are best-effort: a prerequisite that fails to install is
//! often one that is already present.

pub use self::exec::*;
pub use self::method::*;
pub use self::plan::*;

mod exec;
mod method;
mod plan;
