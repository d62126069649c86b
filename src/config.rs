//! Runtime configuration
//!
//! Read from `$XDG_CONFIG_HOME/kms-presenter/config.toml`. Every key is
//! optional; a missing file means defaults.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::egl::EglConfig;
use crate::{Error, Result};

pub const DEFAULT_DEVICE: &str = "/dev/dri/card1";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub render: RenderConfig,
    pub demo: DemoConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// DRM card node
    #[serde(default = "default_device")]
    pub path: PathBuf,
}

/// Extra EGL config attributes on top of the fixed opaque RGB request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default)]
    pub depth_size: Option<i32>,
    #[serde(default)]
    pub stencil_size: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoConfig {
    /// How long the demo animation runs
    #[serde(default = "default_duration")]
    pub duration_secs: u64,
    /// Give up after this many presentation failures in a row
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
}

fn default_device() -> PathBuf {
    PathBuf::from(DEFAULT_DEVICE)
}
fn default_duration() -> u64 { 10 }
fn default_max_failures() -> u32 { 60 }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: default_device(),
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_duration(),
            max_consecutive_failures: default_max_failures(),
        }
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
        Some(base.join("kms-presenter").join("config.toml"))
    }

    /// Load `path`, or the default location when `None`.
    ///
    /// A missing file yields the defaults; an unreadable or malformed one is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) else {
            tracing::info!("No config location, using defaults");
            return Ok(Self::default());
        };

        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_toml_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    Ok(config)
                }
                Err(source) => Err(Error::ConfigParse { path, source }),
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!("No config at {:?}, using defaults", path);
                Ok(Self::default())
            }
            Err(source) => Err(Error::ConfigRead { path, source }),
        }
    }

    pub fn from_toml_str(contents: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// EGL attributes for negotiation
    pub fn egl_config(&self) -> EglConfig {
        EglConfig {
            depth_size: self.render.depth_size,
            stencil_size: self.render.stencil_size,
            ..Default::default()
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.demo.duration_secs)
    }

    pub fn with_device(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.device.path = path;
        }
        self
    }

    pub fn with_duration(mut self, secs: Option<u64>) -> Self {
        if let Some(secs) = secs {
            self.demo.duration_secs = secs;
        }
        self
    }
}
