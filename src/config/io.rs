use std::env::current_exe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use directories_next::ProjectDirs;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use serde_json;
use fd_lock::{RwLock, RwLockWriteGuard};
use log::{debug, info, warn};
use std::fs::OpenOptions;
use std::str;

use crate::config::types::Config;
use crate::error::ConfigError;

// creates a path to <exe>.json in the same directory as the executable
// this could be useful for usb sticks
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            // F:\zei-orientation.exe => F:\zei-orientation.json
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to zei-orientation.json in an os dependent standard directory, such as %AppData% on
// windows.
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "zei", "zei-orientation").map(|dirs| {
        dirs.config_dir().join("zei-orientation.json")
    })
}

fn get_config_path(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path);
    }

    if let Some(path) = get_portable_config_path() {
        match std::fs::metadata(&path) {
            Ok(attr) => {
                if attr.is_file() {
                    return Ok(path);
                }
            },
            Err(err) => {
                debug!("Could not read metadata of: {}; Using local path instead. ({:?})", path.to_string_lossy(), err);
            },
        }
    }

    get_local_config_path().ok_or(ConfigError::NoConfigPath)
}

pub struct ConfigIOLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigIOLocker {
    /// Only one process at a time can hold this lock, and so only one process talks to the dice.
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<'_, std::fs::File>, ConfigError> {
        self.rw_lock.try_write().map_err(|source| ConfigError::CanNotLock { source })
    }
}

struct ConfigIOInner {
    file: std::fs::File,
}

#[derive(Clone)]
pub struct ConfigIO {
    inner: Arc<Mutex<ConfigIOInner>>,
}

impl ConfigIO {
    pub fn new_sync(explicit_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = get_config_path(explicit_path)?;
        info!("Using config file {}", path.to_string_lossy());

        if let Some(directory) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(directory)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(path)?;

        let inner = ConfigIOInner {
            file,
        };
        Ok(ConfigIO { inner: Arc::new(Mutex::new(inner)) })
    }

    fn inner(&self) -> MutexGuard<'_, ConfigIOInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn locker(&mut self) -> Result<ConfigIOLocker, ConfigError> {
        let inner = self.inner();

        Ok(ConfigIOLocker {
            rw_lock: RwLock::new(inner.file.try_clone()?),
        })
    }

    // The File returned from here should never be closed!
    fn get_file(&self) -> Result<File, ConfigError> {
        let file = self.inner().file.try_clone()?; // std File
        Ok(File::from_std(file)) // tokio File
    }

    /// Reads the config. `None` means the file is empty, which is the case on first start.
    pub async fn read(&self) -> Result<Option<Config>, ConfigError> {
        let mut file = self.get_file()?;
        debug!("Reading config file");

        let mut content = vec![];
        file.rewind().await?;
        file.read_to_end(&mut content).await?;

        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let content = str::from_utf8(&content)?;
        let config: Config = serde_json::from_str(content)?;
        Ok(Some(config))
    }

    /// Reads the config, writing the defaults first if the file is still empty.
    pub async fn read_or_init(&self) -> Result<Config, ConfigError> {
        match self.read().await? {
            Some(config) => Ok(config),
            None => {
                info!("Config file is empty, writing defaults");
                let config = Config::default();
                self.save(config.clone()).await?;
                Ok(config)
            },
        }
    }

    pub async fn save(&self, config: Config) -> Result<(), ConfigError> {
        let mut file = self.get_file()?;
        debug!("Saving config");

        let content = serde_json::to_string_pretty(&config)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
