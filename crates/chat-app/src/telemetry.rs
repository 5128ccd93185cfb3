use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use snafu::{ResultExt, Snafu};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

use crate::settings::Settings;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TelemetryError {
    #[snafu(display("failed to open log file at {path:?} on `{stage}`: {source}"))]
    OpenLogFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to install tracing subscriber on `{stage}`: {message}"))]
    InstallSubscriber {
        stage: &'static str,
        message: String,
    },
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init_tracing(settings: &Settings) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    let writes_file = settings.log_file_path().is_some();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(log_writer(settings)?)
        .with_ansi(!writes_file)
        .try_init()
        .map_err(|error| TelemetryError::InstallSubscriber {
            stage: "init-tracing",
            message: error.to_string(),
        })
}

/// Log destination: the append-mode log file, optionally teed to stderr, or
/// stderr alone when no file is configured.
pub fn log_writer(settings: &Settings) -> Result<BoxMakeWriter, TelemetryError> {
    let Some(path) = settings.log_file_path() else {
        return Ok(BoxMakeWriter::new(std::io::stderr));
    };

    let file = Mutex::new(open_log_file(&path)?);
    if settings.log_to_stderr {
        Ok(BoxMakeWriter::new(std::io::stderr.and(file)))
    } else {
        Ok(BoxMakeWriter::new(file))
    }
}

fn open_log_file(path: &Path) -> Result<File, TelemetryError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context(OpenLogFileSnafu {
            stage: "open-log-file",
            path: path.to_path_buf(),
        })
}
