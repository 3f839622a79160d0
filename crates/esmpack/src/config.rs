//! Configuration for the build pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;
use crate::registry::DEFAULT_REGISTRY;

/// Version of the artifact layout. Bumping it invalidates every previously
/// cached build identifier.
pub const SCHEMA_VERSION: u32 = 2;

/// Process-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Artifact schema version embedded in every build identifier
    pub schema: u32,

    /// Host used for absolute URL substitutions (`__filename`, `__dirname`)
    pub public_domain: String,

    /// Root directory for blobs and cache records
    pub storage_dir: PathBuf,

    /// Registry URL
    pub registry: String,

    /// Request timeout in seconds
    pub timeout: u64,

    /// Skip SSL certificate verification
    pub insecure: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema: SCHEMA_VERSION,
            public_domain: "esmpack.dev".to_string(),
            storage_dir: default_storage_dir(),
            registry: DEFAULT_REGISTRY.to_string(),
            timeout: 60,
            insecure: false,
        }
    }
}

impl Config {
    /// Load configuration from defaults and `ESMPACK_*` environment variables.
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(v) = std::env::var("ESMPACK_SCHEMA") {
            if let Ok(n) = v.parse() {
                config.schema = n;
            }
        }
        if let Ok(v) = std::env::var("ESMPACK_DOMAIN") {
            config.public_domain = v;
        }
        if let Ok(v) = std::env::var("ESMPACK_STORAGE_DIR") {
            config.storage_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ESMPACK_REGISTRY") {
            config.registry = v.trim_end_matches('/').to_string();
        }
        if let Ok(v) = std::env::var("ESMPACK_TIMEOUT") {
            if let Ok(n) = v.parse() {
                config.timeout = n;
            }
        }

        Ok(config)
    }
}

/// Default storage root.
fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("esmpack")
}
