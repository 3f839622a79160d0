//! Dependency-closure installation into a scratch directory.

use std::collections::{HashSet, VecDeque};
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use crate::error::{EsmpackError, Result};
use crate::registry::RegistryClient;

/// Install the dependency closures of the given specs under
/// `<dir>/node_modules`, npm-flat: one directory per package name, first
/// resolution wins. Specs are `name` or `name@spec` strings.
#[instrument(skip(registry))]
pub async fn install_closure(registry: &RegistryClient, dir: &Path, specs: &[String]) -> Result<()> {
    let node_modules = dir.join("node_modules");
    tokio::fs::create_dir_all(&node_modules).await?;

    let mut queue: VecDeque<(String, String)> = specs.iter().map(|s| split_spec(s)).collect();
    let mut seen: HashSet<String> = HashSet::new();

    while let Some((name, spec)) = queue.pop_front() {
        if !seen.insert(name.clone()) {
            continue;
        }

        let (package, _) = registry.get_package_info(&name, &spec).await?;
        let dest = node_modules.join(&name);
        if dest.join("package.json").exists() {
            continue;
        }

        let dist = package.dist.as_ref().ok_or_else(|| {
            EsmpackError::Install(format!("{}@{} has no tarball", name, package.version))
        })?;
        let data = registry.download_tarball(&dist.tarball).await?;
        extract_tarball(data, &dest).await?;
        debug!("installed {}@{}", name, package.version);

        for (dep, dep_spec) in &package.dependencies {
            if !seen.contains(dep) {
                queue.push_back((dep.clone(), dep_spec.clone()));
            }
        }
    }

    Ok(())
}

/// Split `name@spec` at the last `@`, keeping scoped names whole.
pub fn split_spec(spec: &str) -> (String, String) {
    let (search, scoped) = match spec.strip_prefix('@') {
        Some(rest) => (rest, true),
        None => (spec, false),
    };
    let (name, version) = match search.rfind('@') {
        Some(i) => (&search[..i], &search[i + 1..]),
        None => (search, ""),
    };
    if scoped {
        (format!("@{}", name), version.to_string())
    } else {
        (name.to_string(), version.to_string())
    }
}

/// Unpack a registry tarball into `dest`, stripping the top-level directory
/// (conventionally `package/`, but not reliably so).
async fn extract_tarball(data: bytes::Bytes, dest: &Path) -> Result<()> {
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let decoder = flate2::read::GzDecoder::new(data.as_ref());
        let mut archive = tar::Archive::new(decoder);
        std::fs::create_dir_all(&dest)?;
        for entry in archive
            .entries()
            .map_err(|e| EsmpackError::Install(e.to_string()))?
        {
            let mut entry = entry.map_err(|e| EsmpackError::Install(e.to_string()))?;
            let path = entry.path().map_err(|e| EsmpackError::Install(e.to_string()))?;
            let stripped: PathBuf = path.components().skip(1).collect();
            if stripped.as_os_str().is_empty() {
                continue;
            }
            let target = dest.join(stripped);
            if entry.header().entry_type().is_dir() {
                std::fs::create_dir_all(&target)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut contents = Vec::new();
            if entry.read_to_end(&mut contents).is_err() {
                warn!("skipping unreadable tarball entry {}", target.display());
                continue;
            }
            std::fs::write(&target, contents)?;
        }
        Ok::<_, EsmpackError>(())
    })
    .await
    .map_err(|e| EsmpackError::Install(e.to_string()))??;

    Ok(())
}
