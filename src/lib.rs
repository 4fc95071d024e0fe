use std::env;
use std::path::PathBuf;
use log::{info, warn, LevelFilter};
use tokio::spawn;
use tokio_util::sync::CancellationToken;

use crate::config::io::ConfigIO;
use crate::device::connection::run_device;
use crate::error::AppRunError;
use crate::output::print_events_task;

pub mod config;
pub mod device;
pub mod error;
pub mod output;

pub fn init_logging(level: LevelFilter) -> Result<(), AppRunError> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(LevelFilter::Warn)
        .level_for("zei_orientation", level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        let file = fern::log_file(&log_file)
            .map_err(|err| AppRunError::Logging(format!("Failed to open LOG_FILE {}: {}", log_file, err)))?;
        dispatch = dispatch.chain(file);
    }

    dispatch.apply().map_err(|err| AppRunError::Logging(err.to_string()))
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_path: Option<PathBuf>,
    // overrides the reconnect setting of the config file
    pub reconnect: Option<bool>,
}

pub fn run(options: RunOptions) -> Result<(), AppRunError> {
    let mut config_io = ConfigIO::new_sync(options.config_path)?;
    let mut locker = config_io.locker()?;
    let _lock_guard = locker.lock()?;

    // a single thread executes every BLE callback, so the device state has a single writer
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|source| AppRunError::Runtime { source })?;

    runtime.block_on(run_async(config_io, options.reconnect))
}

async fn run_async(config_io: ConfigIO, reconnect: Option<bool>) -> Result<(), AppRunError> {
    let mut config = config_io.read_or_init().await?;
    if let Some(reconnect) = reconnect {
        config.reconnect = reconnect;
    }
    config.validate()?;

    let cancel = CancellationToken::new();
    let (print_sender, print_handle) = print_events_task();

    let interrupt_cancel = cancel.clone();
    spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted");
                interrupt_cancel.cancel();
            },
            Err(err) => warn!("Failed to listen for Ctrl-C: {}", err),
        }
    });

    // the senders are dropped when run_device returns, which stops the print task
    let result = run_device(&config, cancel, vec![print_sender]).await;

    if let Err(err) = print_handle.await {
        warn!("Print task failed: {}", err);
    }

    result?;
    Ok(())
}
