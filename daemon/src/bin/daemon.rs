//! Entry point: parses argv by hand (the teacher's daemon does the same in
//! `src/bin/daemon.rs` rather than pulling in a CLI-parsing crate), loads
//! config, installs logging, and drives the pipeline.

use std::path::PathBuf;
use std::process::ExitCode;

use log::LevelFilter;

use lnchannels_daemon::config::Config;
use lnchannels_daemon::{build_chain, logger, run_once};

struct Args {
    config_path: PathBuf,
    log_level: LevelFilter,
    log_file: Option<PathBuf>,
    loop_forever: bool,
    loop_interval_secs: u64,
}

fn usage() -> &'static str {
    "usage: lnchannelsd --conf <path> [--log-level <level>] [--log-file <path>] [--loop [--interval <secs>]]"
}

fn parse_args() -> Result<Args, String> {
    let mut config_path = None;
    let mut log_level = LevelFilter::Info;
    let mut log_file = None;
    let mut loop_forever = false;
    let mut loop_interval_secs = 3600;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--conf" => {
                config_path = Some(PathBuf::from(args.next().ok_or("--conf requires a value")?));
            }
            "--log-level" => {
                let value = args.next().ok_or("--log-level requires a value")?;
                log_level = value.parse().map_err(|_| format!("invalid log level '{value}'"))?;
            }
            "--log-file" => {
                log_file = Some(PathBuf::from(args.next().ok_or("--log-file requires a value")?));
            }
            "--loop" => loop_forever = true,
            "--interval" => {
                let value = args.next().ok_or("--interval requires a value")?;
                loop_interval_secs = value.parse().map_err(|_| format!("invalid interval '{value}'"))?;
            }
            "--help" | "-h" => return Err(usage().to_string()),
            other => return Err(format!("unrecognized argument '{other}'\n{}", usage())),
        }
    }

    Ok(Args {
        config_path: config_path.ok_or_else(|| format!("--conf is required\n{}", usage()))?,
        log_level,
        log_file,
        loop_forever,
        loop_interval_secs,
    })
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logger::setup(args.log_level, args.log_file.as_deref()) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }
    logger::install_panic_hook();

    let config = match Config::from_file(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    log::info!("starting on network {}", config.network);

    let chain = match build_chain(&config) {
        Ok(chain) => chain,
        Err(e) => {
            log::error!("failed to build chain client: {e:?}");
            return ExitCode::FAILURE;
        }
    };

    loop {
        if let Err(e) = run_once(&config, &chain) {
            log::error!("pipeline run failed: {e:?}");
            if !args.loop_forever {
                return ExitCode::FAILURE;
            }
        } else {
            log::info!("pipeline run complete");
        }

        if !args.loop_forever {
            break;
        }
        std::thread::sleep(std::time::Duration::from_secs(args.loop_interval_secs));
    }

    ExitCode::SUCCESS
}
