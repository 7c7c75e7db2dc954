use windows_registry::Key;

use super::OsError;

// Notes on environment variables:
// https://winreg-kb.readthedocs.io/en/latest/sources/system-keys/Environment-variables.html
// https://learn.microsoft.com/en-us/windows/win32/procthread/environment-variables
//
// Note on registry API:
// * open() is open read-only
// * create() is open read/write

pub const REGISTRY_ENV_SYSTEM_KEY: &str =
    r"SYSTEM\CurrentControlSet\Control\Session Manager\Environment";

fn machine_key() -> &'static Key {
    windows_registry::LOCAL_MACHINE
}

/// Reads the machine wide `PROCESSOR_ARCHITECTURE` value.
///
/// Unlike the process environment, this is not affected by WOW64 redirection
/// when running as a 32-bit process.
pub fn processor_architecture() -> Result<String, OsError> {
    tracing::debug!(key_path = REGISTRY_ENV_SYSTEM_KEY, "opening environment key read-only");
    let hkey = machine_key().open(REGISTRY_ENV_SYSTEM_KEY)?;
    let value = hkey.get_string("PROCESSOR_ARCHITECTURE")?;

    Ok(value)
}
