//! Configuration loading.
//!
//! Configuration is loaded from a TOML file (default: `coursefeed.toml`).
//! Every field has a default, so a missing file or an empty one is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::download::DownloadSettings;
use crate::merge::{CourseDirectory, CourseInfo};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub state: StateConfig,
    /// The course directory.
    #[serde(default)]
    pub courses: Vec<CourseConfig>,
}

/// Remote platform access.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// API root (default: http://localhost:8080/api).
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    /// Bound on each listing call in seconds (default: 30).
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,
}

/// File cache.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Directory holding cached files and their index.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// Network attempts per file (default: 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Bound on one transfer in seconds (default: 300).
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
}

/// Local state files.
#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    /// Annotation flags file.
    #[serde(default = "default_annotations_path")]
    pub annotations: PathBuf,
}

/// One course directory entry.
#[derive(Debug, Clone, Deserialize)]
pub struct CourseConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub teacher_name: String,
}

// Default value functions
fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_gateway_timeout() -> u64 {
    30
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("coursefeed")
}

fn default_max_attempts() -> u32 {
    5
}

fn default_download_timeout() -> u64 {
    300 // 5 minutes
}

fn default_annotations_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("coursefeed")
        .join("annotations.json")
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            timeout_secs: default_gateway_timeout(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            max_attempts: default_max_attempts(),
            download_timeout_secs: default_download_timeout(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            annotations: default_annotations_path(),
        }
    }
}

impl Config {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway.timeout_secs)
    }

    pub fn download_settings(&self) -> DownloadSettings {
        DownloadSettings {
            max_attempts: self.cache.max_attempts,
            timeout: Duration::from_secs(self.cache.download_timeout_secs),
        }
    }

    /// Course ids in configuration order.
    pub fn course_ids(&self) -> Vec<String> {
        self.courses.iter().map(|c| c.id.clone()).collect()
    }

    pub fn course_directory(&self) -> CourseDirectory {
        self.courses
            .iter()
            .map(|c| {
                (
                    c.id.clone(),
                    CourseInfo {
                        name: c.name.clone(),
                        teacher_name: c.teacher_name.clone(),
                    },
                )
            })
            .collect()
    }
}
