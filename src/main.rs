//! Command line entry point.
use std::{fs::File, path::PathBuf, process::ExitCode};

use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};
use wingetup::{
    config::ProvisionConfig,
    error::{format_error, ProvisionError},
    provision::Outcome,
};

/// Install or update the Windows Package Manager client.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Log downloads, installs and cleanup without performing them
    #[arg(long, alias = "TestMode")]
    test_mode: bool,

    /// Configuration file (RON)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Transcript file, appended to on every run
    #[arg(long, value_name = "FILE")]
    transcript: Option<PathBuf>,

    /// Increase console verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = load_config(&args);
    let transcript = args.transcript.clone().unwrap_or_else(|| match &config {
        Ok(config) => config.transcript_path(),
        Err(_) => ProvisionConfig::default().transcript_path(),
    });

    let _guard = init_logging(&transcript, args.verbose);

    ExitCode::from(run(config))
}

/// Returns the configuration file's contents, or the defaults, with the
/// command line flags applied.
fn load_config(args: &Args) -> Result<ProvisionConfig, ProvisionError> {
    let mut config = match &args.config {
        Some(path) => ProvisionConfig::load(path)?,
        None => ProvisionConfig::default(),
    };
    apply_args(&mut config, args);

    Ok(config)
}

/// Flags only ever enable test mode. A config file that sets it cannot be
/// overridden from the command line.
fn apply_args(config: &mut ProvisionConfig, args: &Args) {
    config.test_mode |= args.test_mode;
}

/// Runs provisioning and returns the process exit status.
fn run(config: Result<ProvisionConfig, ProvisionError>) -> u8 {
    // Errors are logged here so they also end up in the transcript
    let result = config
        .map_err(anyhow::Error::from)
        .and_then(|config| main2(&config));

    match result {
        Ok(()) => 0,
        Err(error) => {
            tracing::error!(error = %format_error(&*error), "provisioning failed");
            1
        }
    }
}

fn main2(config: &ProvisionConfig) -> anyhow::Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        test_mode = config.test_mode,
        "starting"
    );

    let outcome = wingetup::provision(config)?;
    let pending_restart = outcome.pending_restart();

    match outcome {
        Outcome::UpToDate { installed, latest } => {
            println!("winget {installed} is up to date (latest {latest})");
        }
        Outcome::Installed {
            version, verified, ..
        } if config.test_mode => {
            let found = verified.map(|client| client.version.to_string());
            println!(
                "test mode: would install winget {version} (detected {})",
                found.as_deref().unwrap_or("nothing")
            );
        }
        Outcome::Installed {
            version, report, ..
        } => {
            println!(
                "installed winget {version} with {}",
                report.method.unwrap_or("unknown method")
            );

            if pending_restart {
                println!(
                    "winget {version} is not yet visible; a restart or sign-in may be required"
                );
            }
        }
    }

    Ok(())
}

/// Logs to stderr and appends to the transcript file.
///
/// When the transcript cannot be opened, logging continues on stderr only.
fn init_logging(transcript: &std::path::Path, verbose: u8) -> Option<WorkerGuard> {
    let console_level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_level);

    let file = open_transcript(transcript);
    let (file_layer, guard, file_error) = match file {
        Ok(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(LevelFilter::DEBUG);

            (Some(layer), Some(guard), None)
        }
        Err(error) => (None, None, Some(error)),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .init();

    if let Some(error) = file_error {
        tracing::warn!(
            path = ?transcript,
            %error,
            "could not open transcript, logging to console only"
        );
    }

    guard
}

fn open_transcript(path: &std::path::Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    File::options().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use wingetup::error::ProvisionErrorKind;

    use super::*;

    fn config_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .prefix("wingetup-config-")
            .suffix(".ron")
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from(["wingetup", "--TestMode"]).unwrap();
        assert!(args.test_mode);

        let args = Args::try_parse_from(["wingetup", "--test-mode", "-vv"]).unwrap();
        assert!(args.test_mode);
        assert_eq!(args.verbose, 2);

        let args =
            Args::try_parse_from(["wingetup", "--config", "a.ron", "--transcript", "b.log"])
                .unwrap();
        assert!(!args.test_mode);
        assert_eq!(args.config, Some(PathBuf::from("a.ron")));
        assert_eq!(args.transcript, Some(PathBuf::from("b.log")));

        assert!(Args::try_parse_from(["wingetup", "--bogus"]).is_err());
    }

    #[test]
    fn test_flag_enables_test_mode() {
        let args = Args::try_parse_from(["wingetup", "--TestMode"]).unwrap();
        let mut config = ProvisionConfig::default();
        apply_args(&mut config, &args);
        assert!(config.test_mode);

        let args = Args::try_parse_from(["wingetup"]).unwrap();
        let mut config = ProvisionConfig::default();
        config.test_mode = true;
        apply_args(&mut config, &args);
        assert!(config.test_mode);

        let mut config = ProvisionConfig::default();
        apply_args(&mut config, &args);
        assert!(!config.test_mode);
    }

    #[test]
    fn test_config_file_with_flag() {
        let file = config_file("(settle_delay_secs: 0, page_size: 5)");
        let path = file.path().to_str().unwrap();
        let args = Args::try_parse_from(["wingetup", "--config", path, "--TestMode"]).unwrap();

        let config = load_config(&args).unwrap();

        assert!(config.test_mode);
        assert_eq!(config.page_size, 5);
        assert_eq!(config.settle_delay_secs, 0);
    }

    #[test_log::test]
    fn test_malformed_config_exits_with_failure() {
        let file = config_file("(page_size: ");
        let path = file.path().to_str().unwrap();
        let args = Args::try_parse_from(["wingetup", "--config", path]).unwrap();

        let config = load_config(&args);
        assert_eq!(
            config.as_ref().unwrap_err().kind(),
            &ProvisionErrorKind::InvalidConfig
        );

        assert_eq!(run(config), 1);
    }

    #[test_log::test]
    fn test_missing_config_exits_with_failure() {
        let args =
            Args::try_parse_from(["wingetup", "--config", "/nonexistent/wingetup.ron"]).unwrap();

        assert_eq!(run(load_config(&args)), 1);
    }
}
