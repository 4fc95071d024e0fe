use std::path::PathBuf;
use clap::{ArgAction, Parser};
use log::{error, info, LevelFilter};
use zei_orientation::{init_logging, run, RunOptions};
use zei_orientation::error::{AppRunError, ConfigError};

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Streams the orientation of a Timeular ZEI dice over Bluetooth LE.\n\nPrints one line per status or orientation change.", long_about = None)]
struct Args {
    /// Path to the JSON config file. Defaults to <executable>.json when it exists, otherwise the user config directory
    #[arg(long)]
    config: Option<PathBuf>,

    /// Exit when the dice disconnects, instead of scanning for it again
    #[arg(long)]
    no_reconnect: bool,

    /// Log more details (-v for debug, -vv for trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<(), AppRunError> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    init_logging(level)?;
    info!(concat!("ZEI Orientation ", env!("CARGO_PKG_VERSION")));

    let options = RunOptions {
        config_path: args.config,
        reconnect: args.no_reconnect.then_some(false),
    };

    match run(options) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            error!("This application has already been started");
            Ok(())
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(_) => Ok(())
    }
}
