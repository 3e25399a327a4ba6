// Service settings - read once at startup from the environment and `.env`

use crate::error::{ResizerError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

const DEFAULT_ASSETS_DIR: &str = "/path/to/dog-assets";
const DEFAULT_CACHE_DIR: &str = "/tmp/image_cache";
const DEFAULT_BASE_URL: &str = "https://cdn.mxmil.dev";
const DEFAULT_PORT: u16 = 8001;
const DEFAULT_MAX_DIMENSION: u32 = 5000;
const DEFAULT_QUALITY: u8 = 85;
const DEFAULT_MAX_CACHE_FILES: usize = 1000;

/// Runtime configuration of the image service
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    /// Project root; relative directories resolve against it
    pub root: PathBuf,
    pub assets_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub base_url: String,
    pub host: IpAddr,
    pub port: u16,
    pub max_width: u32,
    pub max_height: u32,
    pub default_quality: u8,
    pub max_cache_files: usize,
}

impl Settings {
    /// Read settings from the process environment, with `<root>/.env`
    /// taking precedence over it.
    pub fn load(root: &Path) -> Result<Self> {
        let dotenv = load_dotenv(&root.join(".env"));
        Self::from_lookup(root, |key| {
            dotenv
                .get(key)
                .cloned()
                .or_else(|| std::env::var(key).ok())
        })
    }

    /// Build settings from an arbitrary variable source
    pub fn from_lookup<F>(root: &Path, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let assets_dir = resolve_dir(
            root,
            &lookup("ASSETS_DIR").unwrap_or_else(|| DEFAULT_ASSETS_DIR.to_string()),
        );
        let cache_dir = resolve_dir(
            root,
            &lookup("CACHE_DIR").unwrap_or_else(|| DEFAULT_CACHE_DIR.to_string()),
        );

        let settings = Settings {
            root: root.to_path_buf(),
            assets_dir,
            cache_dir,
            base_url: lookup("BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            host: parse_var(&lookup, "LISTEN_HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?,
            port: parse_var(&lookup, "PORT", DEFAULT_PORT)?,
            max_width: parse_var(&lookup, "MAX_WIDTH", DEFAULT_MAX_DIMENSION)?,
            max_height: parse_var(&lookup, "MAX_HEIGHT", DEFAULT_MAX_DIMENSION)?,
            default_quality: parse_var(&lookup, "DEFAULT_QUALITY", DEFAULT_QUALITY)?,
            max_cache_files: parse_var(&lookup, "MAX_CACHE_FILES", DEFAULT_MAX_CACHE_FILES)?,
        };

        settings.validate()?;
        debug!("Resolved settings: {:?}", settings);
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.default_quality) {
            return Err(ResizerError::ConfigValidationError(format!(
                "DEFAULT_QUALITY must be between 1 and 100, got {}",
                self.default_quality
            )));
        }

        if self.max_width == 0 || self.max_height == 0 {
            return Err(ResizerError::ConfigValidationError(
                "MAX_WIDTH and MAX_HEIGHT must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn resolve_dir(root: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            ResizerError::ConfigError(format!("Invalid value for {}: '{}'", key, raw))
        }),
    }
}

/// Read a `.env` file; a missing file yields no variables
fn load_dotenv(path: &Path) -> HashMap<String, String> {
    let mut vars = HashMap::new();

    if !path.is_file() {
        debug!("No .env file at {}", path.display());
        return vars;
    }

    match dotenvy::from_path_iter(path) {
        Ok(iter) => {
            for item in iter {
                match item {
                    Ok((key, value)) => {
                        vars.insert(key, value);
                    }
                    Err(err) => warn!("Failed to parse .env entry: {}", err),
                }
            }
            debug!("Loaded {} variables from {}", vars.len(), path.display());
        }
        Err(err) => warn!("Failed to read .env file at {}: {}", path.display(), err),
    }

    vars
}
