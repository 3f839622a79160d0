//! Declaration-tree location and copying.

use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::config::Config;
use crate::descriptor::PackageDescriptor;
use crate::error::{EsmpackError, Result};
use crate::npm::NpmPackage;
use crate::resolver::ResolvedMeta;

/// The declaration copy/transform subsystem. Opaque to the build core: it
/// receives the located entry path relative to `node_modules` and makes the
/// declaration tree publicly addressable.
pub trait DeclarationCopier: Send + Sync {
    fn copy_declarations(&self, config: &Config, node_modules_dir: &Path, entry: &str) -> Result<()>;
}

/// Default copier: mirrors every `.d.ts` file under the entry's package
/// directory into `<storage_dir>/types/`.
pub struct TreeCopier;

impl DeclarationCopier for TreeCopier {
    fn copy_declarations(&self, config: &Config, node_modules_dir: &Path, entry: &str) -> Result<()> {
        // `<name>@<version>/<path>` addresses `<node_modules>/<name>/<path>`
        let (package_at_version, _) = split_entry(entry);
        let (package, _) = crate::installer::split_spec(package_at_version);

        let source_root = node_modules_dir.join(&package);
        let target_root = config.storage_dir.join("types").join(package_at_version);

        let mut copied = 0usize;
        for file in WalkDir::new(&source_root) {
            let file = file.map_err(|e| EsmpackError::Store(e.to_string()))?;
            if !file.file_type().is_file() {
                continue;
            }
            if !file.file_name().to_string_lossy().ends_with(".d.ts") {
                continue;
            }
            let relative = file
                .path()
                .strip_prefix(&source_root)
                .map_err(|e| EsmpackError::Store(e.to_string()))?;
            let target = target_root.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(file.path(), &target)?;
            copied += 1;
        }
        debug!("copied {} declaration files for {}", copied, package_at_version);
        Ok(())
    }
}

/// Split `name@version/path` into the versioned package segment and the
/// path. Scoped names span two `/`-segments.
fn split_entry(entry: &str) -> (&str, &str) {
    let segments: Vec<&str> = entry.splitn(3, '/').collect();
    if entry.starts_with('@') && segments.len() >= 2 {
        let nv_len = segments[0].len() + 1 + segments[1].len();
        (&entry[..nv_len], entry.get(nv_len + 1..).unwrap_or(""))
    } else {
        (segments[0], entry.get(segments[0].len() + 1..).unwrap_or(""))
    }
}

/// Locate the declaration entry for a resolved package, then delegate its
/// copy and record the public URL.
pub fn handle_declarations(
    copier: &dyn DeclarationCopier,
    config: &Config,
    build_dir: &Path,
    meta: &mut ResolvedMeta,
    descriptor: &PackageDescriptor,
) -> Result<()> {
    let node_modules = build_dir.join("node_modules");
    let Some(entry) = locate_declaration_entry(&node_modules, meta, descriptor)? else {
        return Ok(());
    };

    copier
        .copy_declarations(config, &node_modules, &entry)
        .map_err(|e| EsmpackError::Declaration {
            entry: entry.clone(),
            source: Box::new(e),
        })?;
    meta.declarations_url = format!("/{}", entry);
    Ok(())
}

/// Find the declaration entry path, relative to `node_modules` but with the
/// package segment carrying its version (`react@17.0.2/index.d.ts`).
pub fn locate_declaration_entry(
    node_modules: &Path,
    meta: &ResolvedMeta,
    descriptor: &PackageDescriptor,
) -> Result<Option<String>> {
    let nv = format!("{}@{}", meta.package.name, meta.package.version);

    if !meta.declaration_entry().is_empty() {
        return Ok(Some(format!(
            "{}/{}",
            nv,
            ensure_dts_ext(meta.declaration_entry())
        )));
    }

    if descriptor.submodule.is_empty() {
        if node_modules.join(&descriptor.name).join("index.d.ts").exists() {
            return Ok(Some(format!("{}/index.d.ts", nv)));
        }
        if !descriptor.name.starts_with('@') {
            let manifest = node_modules
                .join("@types")
                .join(&descriptor.name)
                .join("package.json");
            match std::fs::read_to_string(&manifest) {
                Ok(content) => {
                    let info: NpmPackage = serde_json::from_str(&content)
                        .map_err(|e| EsmpackError::Resolve(e.to_string()))?;
                    return Ok(Some(format!(
                        "{}@{}/{}",
                        info.name,
                        info.version,
                        ensure_dts_ext(&declared_or_default(&info))
                    )));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        return Ok(None);
    }

    let sub = &descriptor.submodule;
    let pkg_dir = node_modules.join(&descriptor.name);
    let types_dir = node_modules.join("@types").join(&descriptor.name);
    if pkg_dir.join(sub).join("index.d.ts").exists() {
        return Ok(Some(format!("{}/{}/index.d.ts", nv, sub)));
    }
    if pkg_dir.join(ensure_dts_ext(sub)).exists() {
        return Ok(Some(format!("{}/{}", nv, ensure_dts_ext(sub))));
    }
    if types_dir.join(sub).join("index.d.ts").exists() {
        return Ok(Some(format!("@types/{}/{}/index.d.ts", nv, sub)));
    }
    if types_dir.join(ensure_dts_ext(sub)).exists() {
        return Ok(Some(format!("@types/{}/{}", nv, ensure_dts_ext(sub))));
    }
    Ok(None)
}

fn declared_or_default(package: &NpmPackage) -> String {
    let declared = package.declared_types();
    if !declared.is_empty() {
        return declared.to_string();
    }
    if package.main.ends_with(".d.ts") {
        return package.main.clone();
    }
    "index.d.ts".to_string()
}

fn ensure_dts_ext(path: &str) -> String {
    if path.ends_with(".d.ts") {
        path.to_string()
    } else {
        format!("{}.d.ts", path.trim_end_matches(".js").trim_end_matches(".mjs"))
    }
}
