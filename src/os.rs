//! OS specific functionalities.
//!
//! External programs are started through the [`CommandRunner`] trait so the
//! detection and installation logic can be driven by a substitute in tests.
use std::{
    ffi::{OsStr, OsString},
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::{Duration, Instant},
};

use crate::error::{ProvisionError, ProvisionErrorKind};

#[cfg(windows)]
pub(crate) mod windows;

/// OS specific error wrapper.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum OsError {
    /// Standard IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Error type provided by the Windows crates by Microsoft.
    #[cfg(windows)]
    #[error(transparent)]
    Windows(#[from] windows_result::Error),

    /// The program did not exit before the deadline and was killed.
    #[error("{program} timed out after {timeout:?}")]
    Timeout {
        /// Program that was started.
        program: String,
        /// Deadline that expired.
        timeout: Duration,
    },

    /// Any other error.
    #[error("{0}")]
    Other(&'static str),
}

impl From<OsError> for ProvisionError {
    fn from(value: OsError) -> Self {
        ProvisionError::new(ProvisionErrorKind::Io).with_source(value)
    }
}

/// Captured result of an external program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    /// Standard output decoded lossily as UTF-8.
    pub stdout: String,
    /// Standard error decoded lossily as UTF-8.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns whether the process exited with code zero.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Starts external programs and waits for them.
pub trait CommandRunner {
    /// Runs `program` with `args`, killing it once `timeout` elapses.
    fn run(
        &self,
        program: &OsStr,
        args: &[OsString],
        timeout: Duration,
    ) -> Result<CommandOutput, OsError>;
}

/// [`CommandRunner`] that spawns real processes.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        program: &OsStr,
        args: &[OsString],
        timeout: Duration,
    ) -> Result<CommandOutput, OsError> {
        tracing::debug!(?program, ?args, ?timeout, "spawning process");

        // Output goes to anonymous files so a full pipe never blocks the child.
        let mut stdout_file = tempfile::tempfile()?;
        let mut stderr_file = tempfile::tempfile()?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout_file.try_clone()?)
            .stderr(stderr_file.try_clone()?)
            .spawn()?;

        let started = Instant::now();

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }

            if started.elapsed() >= timeout {
                tracing::warn!(?program, ?timeout, "process timed out, killing");
                let _ = child.kill();
                let _ = child.wait();

                return Err(OsError::Timeout {
                    program: program.to_string_lossy().to_string(),
                    timeout,
                });
            }

            std::thread::sleep(POLL_INTERVAL);
        };

        let output = CommandOutput {
            code: status.code(),
            stdout: read_back(&mut stdout_file)?,
            stderr: read_back(&mut stderr_file)?,
        };

        tracing::trace!(?program, code = ?output.code, "process exited");

        Ok(output)
    }
}

fn read_back(file: &mut File) -> std::io::Result<String> {
    let mut buf = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut buf)?;

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Information returned by [`file_checksum`].
#[derive(Debug, Clone, PartialEq)]
pub struct FileChecksum {
    /// CRC32C checksum of the file.
    pub crc32c: u32,
    /// Size of the file.
    pub len: u64,
}

/// Computes a checksum for a file.
pub fn file_checksum<P: AsRef<Path>>(path: P) -> std::io::Result<FileChecksum> {
    let path = path.as_ref();
    tracing::trace!(?path, "file checksum");
    let len = path.metadata()?.len();

    let mut file = File::open(path)?;
    let mut compute = crc32c::Crc32cWriter::new(std::io::empty());

    std::io::copy(&mut file, &mut compute)?;

    Ok(FileChecksum {
        crc32c: compute.crc32c(),
        len,
    })
}

pub(crate) fn env_var<A: AsRef<OsStr>>(key: A) -> Option<OsString> {
    tracing::trace!(key = ?key.as_ref(), "env_var");
    std::env::var_os(key.as_ref()).filter(|value| !value.is_empty())
}

/// Returns `%SystemRoot%`, defaulting to `C:\Windows`.
pub fn system_root() -> PathBuf {
    env_var("SystemRoot")
        .or_else(|| env_var("windir"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\Windows"))
}

/// Returns the full path of Windows PowerShell.
///
/// The search path is consulted first, then the fixed location under
/// `%SystemRoot%`. Returns `None` when neither exists.
pub fn find_powershell() -> Option<PathBuf> {
    if let Ok(path) = which::which("powershell.exe").or_else(|_| which::which("powershell")) {
        return Some(path);
    }

    let path = system_root()
        .join("System32")
        .join("WindowsPowerShell")
        .join("v1.0")
        .join("powershell.exe");

    path.is_file().then_some(path)
}

/// Returns the arguments that make PowerShell run `script` non-interactively.
pub fn powershell_args(script: &str) -> Vec<OsString> {
    [
        "-NoLogo",
        "-NoProfile",
        "-NonInteractive",
        "-ExecutionPolicy",
        "Bypass",
        "-Command",
        script,
    ]
    .into_iter()
    .map(OsString::from)
    .collect()
}

/// Quotes a value as a PowerShell single-quoted string literal.
pub fn powershell_quote<S: AsRef<OsStr>>(value: S) -> String {
    let value = value.as_ref().to_string_lossy();
    format!("'{}'", value.replace('\'', "''"))
}

/// Returns the full path of the deployment image servicing tool (DISM).
pub fn find_dism() -> Option<PathBuf> {
    let path = system_root().join("System32").join("dism.exe");

    if path.is_file() {
        return Some(path);
    }

    which::which("dism.exe").ok()
}

/// Returns the architecture reported in the registry, if readable.
///
/// On other OS families, this returns `PROCESSOR_ARCHITEW6432` from the
/// environment instead.
pub fn registry_processor_architecture() -> Option<String> {
    #[cfg(windows)]
    {
        match windows::processor_architecture() {
            Ok(value) => return Some(value),
            Err(error) => {
                tracing::debug!(%error, "could not read processor architecture from registry");
            }
        }
    }

    env_var("PROCESSOR_ARCHITEW6432").map(|value| value.to_string_lossy().into_owned())
}
