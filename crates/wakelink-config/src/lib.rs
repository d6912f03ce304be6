//! Persisted remembered-device storage.
//!
//! Implements `wakelink_ble::DeviceMemory` on top of a small TOML file
//! in the platform config directory. Load/save/forget never propagate
//! errors to the session: losing the remembered device only costs one
//! extra scan, so failures are logged and swallowed.

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use wakelink_ble::{DeviceId, DeviceMemory, RememberedDevice};

const DEVICE_FILE: &str = "device.toml";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine a config directory for this platform")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ── File format ─────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct DeviceFile {
    id: String,
    name: String,
}

impl From<&RememberedDevice> for DeviceFile {
    fn from(device: &RememberedDevice) -> Self {
        Self {
            id: device.id.as_str().to_owned(),
            name: device.name.clone(),
        }
    }
}

impl From<DeviceFile> for RememberedDevice {
    fn from(file: DeviceFile) -> Self {
        Self {
            id: DeviceId::new(file.id),
            name: file.name,
        }
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// File-backed [`DeviceMemory`].
pub struct FileDeviceMemory {
    path: PathBuf,
}

impl FileDeviceMemory {
    /// Open the store in the platform config directory, creating the
    /// directory if needed.
    pub fn open() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from("io", "wakelink", "wakelink").ok_or(ConfigError::NoConfigDir)?;
        fs::create_dir_all(dirs.config_dir())?;
        Ok(Self {
            path: dirs.config_dir().join(DEVICE_FILE),
        })
    }

    /// Open the store at an explicit path. Parent directories must exist.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeviceMemory for FileDeviceMemory {
    fn load(&self) -> Option<RememberedDevice> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "could not read device file");
                return None;
            }
        };

        match toml::from_str::<DeviceFile>(&text) {
            Ok(file) => Some(file.into()),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt device file ignored");
                None
            }
        }
    }

    fn save(&self, device: &RememberedDevice) {
        let file = DeviceFile::from(device);
        let text = match toml::to_string_pretty(&file) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "could not serialize device file");
                return;
            }
        };
        if let Err(e) = fs::write(&self.path, text) {
            warn!(path = %self.path.display(), error = %e, "could not write device file");
        } else {
            debug!(device = %device.id, "remembered device saved");
        }
    }

    fn forget(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("remembered device forgotten"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "could not delete device file"),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
