//! Log output: human-readable lines on stderr and, optionally, the same
//! events appended to a log file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the verbosity flag. An empty `log_file`
/// disables the file layer.
pub fn init(verbose: u8, log_file: &str) -> Result<()> {
    let stderr = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter(verbose));

    let file = if log_file.is_empty() {
        None
    } else {
        let file = open_log(log_file)?;
        Some(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(true)
                .with_filter(filter(verbose)),
        )
    };

    tracing_subscriber::registry()
        .with(stderr)
        .with(file)
        .try_init()
        .context("Failed to install log subscriber")
}

fn filter(verbose: u8) -> EnvFilter {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Open `path` for appending and write the session header.
fn open_log(path: &str) -> Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }

    let mut file = options
        .open(path)
        .with_context(|| format!("Failed to open log file: {path}"))?;
    writeln!(file, "{}", session_header())
        .with_context(|| format!("Failed to write log file: {path}"))?;
    Ok(file)
}

fn session_header() -> String {
    format!(
        "----- {} -----",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_header() {
        let header = session_header();
        assert!(header.starts_with("----- "));
        assert!(header.ends_with("Z -----"));
    }

    #[test]
    fn test_open_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chif-api.log");
        let path = path.to_str().unwrap();

        drop(open_log(path).unwrap());
        drop(open_log(path).unwrap());

        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents.matches("----- ").count(), 2);
    }
}
