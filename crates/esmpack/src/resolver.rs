//! Entry-point resolution: decide how a package (or one of its submodules)
//! is imported, and what it re-exports.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::descriptor::PackageDescriptor;
use crate::error::Result;
use crate::installer::install_closure;
use crate::npm::NpmPackage;
use crate::registry::RegistryClient;
use crate::scanner::{parse_cjs_module_exports, parse_es_module_exports};

/// Resolved build metadata: the registry metadata plus the decided entry
/// points and the re-exportable surface. Produced once per build and stored
/// as the cache payload.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ResolvedMeta {
    /// Registry metadata with `main`/`module`/`types`/`typings` rewritten to
    /// the decided entry paths
    #[serde(flatten)]
    pub package: NpmPackage,

    /// Ordered, de-duplicated re-exportable identifiers (`default` excluded)
    #[serde(default, rename = "exportNames")]
    pub export_names: Vec<String>,

    /// Whether the module surface carries a default export
    #[serde(default, rename = "hasDefault")]
    pub has_default: bool,

    /// Public URL of the emitted declaration tree, empty when none
    #[serde(default, rename = "dts")]
    pub declarations_url: String,
}

impl ResolvedMeta {
    /// Server-module entry path.
    pub fn entry_main(&self) -> &str {
        &self.package.main
    }

    /// Standards-module entry path, empty when the package has none.
    pub fn entry_module(&self) -> &str {
        &self.package.module
    }

    /// Declaration file path, empty when the package ships none.
    pub fn declaration_entry(&self) -> &str {
        self.package.declared_types()
    }
}

/// Resolve build metadata for a descriptor: fetch registry metadata, decide
/// entry points, install the dependency closure and collect export names.
#[instrument(skip(registry))]
pub async fn resolve_meta(
    registry: &RegistryClient,
    build_dir: &Path,
    descriptor: &PackageDescriptor,
) -> Result<ResolvedMeta> {
    let (package, _) = registry
        .get_package_info(&descriptor.name, &descriptor.version)
        .await?;
    let mut meta = ResolvedMeta {
        package,
        ..Default::default()
    };

    let mut install_list = vec![format!("{}@{}", descriptor.name, descriptor.version)];

    // Unscoped packages without declarations may have a sibling
    // declaration-only package under the @types scope.
    if meta.package.declared_types().is_empty() && !descriptor.name.starts_with('@') {
        match registry
            .get_package_info(&format!("@types/{}", descriptor.name), "latest")
            .await
        {
            Ok((info, _)) => {
                if !info.types.is_empty() || !info.typings.is_empty() || !info.main.is_empty() {
                    install_list.push(format!("{}@{}", info.name, info.version));
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }

    promote_module_entry(&mut meta.package);

    if !descriptor.submodule.is_empty() {
        meta.package.main = descriptor.submodule.clone();
        meta.package.module.clear();
        meta.package.types.clear();
        meta.package.typings.clear();
    }

    install_closure(registry, build_dir, &install_list).await?;

    let mut raw_names: Vec<String> = Vec::new();

    if !descriptor.submodule.is_empty() {
        let pkg_dir = build_dir.join("node_modules").join(&descriptor.name);
        let sub_manifest = pkg_dir.join(&descriptor.submodule).join("package.json");
        if sub_manifest.exists() {
            let sub = NpmPackage::read(&sub_manifest)?;
            overlay_subpackage(&mut meta.package, &descriptor.submodule, &sub);
        } else {
            let (names, is_esm) =
                parse_es_module_exports(build_dir, &descriptor.import_path())?;
            if is_esm {
                meta.package.module = descriptor.submodule.clone();
                raw_names = names;
            }
        }
    }

    if !meta.package.module.is_empty() {
        let spec = join_module_path(&meta.package.name, &meta.package.module);
        let (names, is_esm) = parse_es_module_exports(build_dir, &spec)?;
        if is_esm {
            raw_names = names;
        } else {
            // mislabeled: the `module` entry is really a server-module
            warn!(
                "'{}' labels a server-module as its module entry",
                meta.package.name
            );
            meta.package.module.clear();
        }
    }

    if meta.package.module.is_empty() {
        raw_names = parse_cjs_module_exports(build_dir, &descriptor.import_path())?;
    }

    collect_export_names(&mut meta, raw_names);
    debug!(
        "resolved {}@{}: module='{}' exports={}",
        meta.package.name,
        meta.package.version,
        meta.package.module,
        meta.export_names.len()
    );
    Ok(meta)
}

/// Coerce a standards-module entry out of metadata that lacks a `module`
/// field: a `type == "module"` package's `main` is one, and a modern export
/// map's top-level `import` branch is one when it is a plain string.
pub fn promote_module_entry(package: &mut NpmPackage) {
    if package.module.is_empty() && package.pkg_type == "module" {
        package.module = package.main.clone();
    }
    if package.module.is_empty() {
        if let Some(serde_json::Value::Object(map)) = &package.defined_exports {
            if let Some(serde_json::Value::String(s)) = map.get("import") {
                if !s.is_empty() {
                    package.module = s.clone();
                }
            }
        }
    }
}

/// Overlay a submodule's own `package.json` entries under the submodule
/// prefix.
pub fn overlay_subpackage(package: &mut NpmPackage, submodule: &str, sub: &NpmPackage) {
    if !sub.main.is_empty() {
        package.main = join_module_path(submodule, &sub.main);
    }
    if !sub.module.is_empty() {
        package.module = join_module_path(submodule, &sub.module);
    } else if sub.pkg_type == "module" && !sub.main.is_empty() {
        package.module = join_module_path(submodule, &sub.main);
    }
    if !sub.types.is_empty() {
        package.types = join_module_path(submodule, &sub.types);
    }
    if !sub.typings.is_empty() {
        package.typings = join_module_path(submodule, &sub.typings);
    }
}

/// Post-process scanned names: the literal `import` (an artifact of export-map
/// inspection) is dropped, `default` is hoisted into `has_default`.
fn collect_export_names(meta: &mut ResolvedMeta, raw: Vec<String>) {
    meta.export_names.clear();
    meta.has_default = false;
    for name in raw {
        if name == "default" {
            meta.has_default = true;
        } else if name != "import" && !meta.export_names.contains(&name) {
            meta.export_names.push(name);
        }
    }
}

fn join_module_path(prefix: &str, path: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), path.trim_start_matches("./"))
}
