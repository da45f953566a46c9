//! Tracing subscriber setup
//!
//! Console output follows the CLI verbosity. When a log directory is given,
//! every event that passes the file filter is also written as JSON lines to
//! `system.log`, and errors additionally to `error.log`.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Filter directives for a verbosity level
fn console_directives(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "termscout=info,warn",
        1 => "termscout=debug,info",
        2 => "termscout=trace,debug",
        _ => "trace",
    }
}

/// Files always keep crawl lifecycle events, even with `--quiet`
fn file_directives(verbose: u8) -> &'static str {
    match verbose {
        0 => "termscout=info,warn",
        _ => "termscout=debug,info",
    }
}

fn open_log(path: &Path) -> io::Result<Arc<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Arc::new(file))
}

/// Installs the global subscriber
///
/// # Arguments
///
/// * `verbose` - Number of `-v` flags
/// * `quiet` - Only errors on the console
/// * `log_dir` - Directory for `system.log` and `error.log`, if file logging is wanted
pub fn init_logging(verbose: u8, quiet: bool, log_dir: Option<&Path>) -> io::Result<()> {
    let console = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_filter(EnvFilter::new(console_directives(verbose, quiet)));

    let files = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let system = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(open_log(&dir.join("system.log"))?)
                .with_filter(EnvFilter::new(file_directives(verbose)));
            let errors = fmt::layer()
                .with_ansi(false)
                .with_writer(open_log(&dir.join("error.log"))?)
                .with_filter(LevelFilter::ERROR);
            Some(system.and_then(errors))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(files)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}
