//! Logging setup (spec.md §4.8): `fern` dispatch to stdout, optionally
//! tee'd to a log file, with a panic hook that records a backtrace —
//! matching the teacher daemon's startup conventions.

use std::path::Path;

use log::LevelFilter;

pub fn setup(level: LevelFilter, log_file: Option<&Path>) -> Result<(), fern::InitError> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono_like_now(),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout());

    if let Some(path) = log_file {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply().map_err(fern::InitError::SetLoggerError)?;
    Ok(())
}

/// A dependency-free timestamp good enough for log lines: we don't pull in
/// `chrono` just for this, since nothing downstream parses the timestamp.
fn chrono_like_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Install a panic hook that logs the panic message and a backtrace before
/// the default hook runs, so a crash under a daemonized/systemd-managed
/// process still leaves a trace in the log rather than only on a tty that
/// nobody's watching.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let backtrace = backtrace::Backtrace::new();
        log::error!("panic: {info}\n{backtrace:?}");
    }));
}
