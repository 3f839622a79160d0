//! Registry package metadata models.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{EsmpackError, Result};

/// The subset of a registry version document (or an on-disk `package.json`)
/// that the build pipeline consumes. Entry fields are kept as plain strings
/// with empty meaning "absent": the metadata resolver rewrites them in place
/// while deciding entry points.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct NpmPackage {
    /// Package name
    pub name: String,

    /// Concrete published version
    pub version: String,

    /// Server-module entry path
    pub main: String,

    /// Standards-module entry path
    pub module: String,

    /// Package type ("module" or "commonjs")
    #[serde(rename = "type")]
    pub pkg_type: String,

    /// Declaration entry
    pub types: String,

    /// Declaration entry (legacy field name)
    pub typings: String,

    /// Modern export map, shape unconstrained
    #[serde(rename = "exports")]
    pub defined_exports: Option<serde_json::Value>,

    /// Production dependencies
    pub dependencies: BTreeMap<String, String>,

    /// Peer dependencies
    #[serde(rename = "peerDependencies")]
    pub peer_dependencies: BTreeMap<String, String>,

    /// Distribution info (present on registry version documents only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dist: Option<PackageDist>,
}

impl NpmPackage {
    /// Read and parse a `package.json` file.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&content)
            .map_err(|e| EsmpackError::Resolve(format!("{}: {}", path.as_ref().display(), e)))
    }

    /// The declared declaration entry: `types` wins over `typings`.
    pub fn declared_types(&self) -> &str {
        if !self.types.is_empty() {
            &self.types
        } else {
            &self.typings
        }
    }
}

/// Package distribution information.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageDist {
    /// Tarball URL
    pub tarball: String,

    /// Integrity hash (usually sha512)
    #[serde(default)]
    pub integrity: Option<String>,

    /// SHA-1 hash (legacy)
    #[serde(default)]
    pub shasum: Option<String>,
}

/// A full registry document for one package name.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryDoc {
    /// Package name
    pub name: String,

    /// Distribution tags
    #[serde(default, rename = "dist-tags")]
    pub dist_tags: BTreeMap<String, String>,

    /// Published versions
    #[serde(default)]
    pub versions: BTreeMap<String, NpmPackage>,
}
