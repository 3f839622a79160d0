//! Artifact addressing and the bundler driver.
//!
//! The driver synthesizes a tiny entry that re-exports the package's public
//! surface, then hands it to an embedded bundler behind the [`BundleEngine`]
//! seam. An import-intercepting resolve hook marks every dependency import as
//! external by resolving it to the reserved `esm_sh_external://` scheme, which
//! forces the engine to emit the specifier verbatim for the rewriter.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::Config;
use crate::descriptor::{PackageDescriptor, PinSet};
use crate::error::{EsmpackError, Result};
use crate::resolver::ResolvedMeta;

/// The reserved URI scheme used to round-trip external specifiers through the
/// bundler unchanged.
pub const EXTERNAL_SCHEME: &str = "esm_sh_external://";

/// Engine baselines an artifact can be built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Target {
    /// Most permissive baseline: no syntax downleveling
    EngineNext,
    Baseline2015,
    Baseline2016,
    Baseline2017,
    Baseline2018,
    Baseline2019,
    Baseline2020,
}

impl Target {
    pub const ALL: &'static [Target] = &[
        Target::EngineNext,
        Target::Baseline2015,
        Target::Baseline2016,
        Target::Baseline2017,
        Target::Baseline2018,
        Target::Baseline2019,
        Target::Baseline2020,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Target::EngineNext => "engine-next",
            Target::Baseline2015 => "baseline-2015",
            Target::Baseline2016 => "baseline-2016",
            Target::Baseline2017 => "baseline-2017",
            Target::Baseline2018 => "baseline-2018",
            Target::Baseline2019 => "baseline-2019",
            Target::Baseline2020 => "baseline-2020",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = EsmpackError;

    fn from_str(s: &str) -> Result<Self> {
        Target::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| EsmpackError::InvalidDescriptor(format!("unknown target '{}'", s)))
    }
}

/// Compose the deterministic build identifier for a request. Equal inputs
/// yield bit-identical identifiers; pin permutations collapse through the
/// pin set's sorted invariant.
pub fn build_identifier(
    schema: u32,
    descriptor: &PackageDescriptor,
    pins: &PinSet,
    target: Target,
    dev: bool,
) -> String {
    let mut filename = if descriptor.submodule.is_empty() {
        basename(&descriptor.name).to_string()
    } else {
        descriptor.submodule.clone()
    };
    if dev {
        filename.push_str(".development");
    }
    let mut target_segment = target.as_str().to_string();
    if !pins.is_empty() {
        target_segment = format!("deps={}/{}", pins.token(), target_segment);
    }
    format!(
        "v{}/{}@{}/{}/{}",
        schema, descriptor.name, descriptor.version, target_segment, filename
    )
}

fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// The synthesized entry handed to the engine.
#[derive(Debug, Clone)]
pub struct EntrySource {
    pub contents: String,
    pub resolve_dir: PathBuf,
    pub source_name: String,
}

/// Output module format. The pipeline only ever emits standards-modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleFormat {
    EsModule,
}

/// Options handed to the embedded bundler.
#[derive(Debug, Clone)]
pub struct BundleConfig {
    pub entry: EntrySource,
    pub target: Target,
    pub format: ModuleFormat,
    pub bundle: bool,
    pub minify: bool,
    /// Outputs stay in memory; the engine must not write
    pub write: bool,
    /// Compile-time substitutions
    pub define: BTreeMap<String, String>,
}

/// Decision of the resolve hook for one import path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveAction {
    /// Let the engine resolve the path itself
    Continue,
    /// Force the path external; the engine emits it verbatim
    External(String),
}

/// One in-memory output file.
#[derive(Debug, Clone)]
pub struct OutputFile {
    pub path: PathBuf,
    pub contents: Vec<u8>,
}

/// Engine result: output files plus non-fatal warnings.
#[derive(Debug, Clone, Default)]
pub struct BundleOutcome {
    pub files: Vec<OutputFile>,
    pub warnings: Vec<String>,
}

/// The embedded-bundler seam. Implementations run the actual bundling and
/// must consult the resolve hook for every import path they encounter.
pub trait BundleEngine: Send + Sync {
    fn build(
        &self,
        config: &BundleConfig,
        on_resolve: &(dyn Fn(&str) -> ResolveAction + Sync),
    ) -> Result<BundleOutcome>;
}

/// Synthesize the entry source re-exporting the package's surface.
pub fn synthesize_entry(meta: &ResolvedMeta, import_path: &str) -> String {
    let names = meta.export_names.join(",");
    if !meta.entry_module().is_empty() {
        let mut entry = String::new();
        if !meta.export_names.is_empty() {
            entry.push_str(&format!("export {{{}}} from \"{}\";\n", names, import_path));
        }
        if meta.has_default {
            entry.push_str(&format!("export {{default}} from \"{}\";", import_path));
        }
        entry
    } else if !meta.export_names.is_empty() {
        format!("export {{{},default}} from \"{}\";\n", names, import_path)
    } else {
        format!("export {{default}} from \"{}\";", import_path)
    }
}

/// The compile-time define table redirecting platform globals to sentinel
/// identifiers the rewriter resolves later.
pub fn define_table(config: &Config, build_id: &str, env: &str) -> BTreeMap<String, String> {
    let artifact_url = format!("https://{}/{}.js", config.public_domain, build_id);
    let artifact_dir = format!(
        "https://{}/{}",
        config.public_domain,
        build_id.rsplit_once('/').map(|(d, _)| d).unwrap_or("")
    );

    let mut define = BTreeMap::new();
    define.insert("__filename".into(), format!("\"{}\"", artifact_url));
    define.insert("__dirname".into(), format!("\"{}\"", artifact_dir));
    define.insert("process".into(), "__process$".into());
    define.insert("Buffer".into(), "__Buffer$".into());
    define.insert("setImmediate".into(), "__setImmediate$".into());
    define.insert("clearImmediate".into(), "clearTimeout".into());
    define.insert("require.resolve".into(), "__rResolve$".into());
    define.insert("process.env.NODE_ENV".into(), format!("\"{}\"", env));
    define.insert("global".into(), "__global$".into());
    for (key, value) in define.clone() {
        if key != "__filename" && key != "__dirname" && key != "global" {
            define.insert(format!("global.{}", key), value);
        }
    }
    define
}

/// Whether an import path names a file rather than a package.
fn is_file_import(path: &str) -> bool {
    path.starts_with("./") || path.starts_with("../") || path.starts_with('/')
}

/// Drive the embedded bundler for a resolved package: synthesize the entry,
/// install the interceptor hook, and collect the outputs together with the
/// set of external specifiers the hook captured.
pub fn bundle(
    engine: &dyn BundleEngine,
    config: &Config,
    build_dir: &std::path::Path,
    descriptor: &PackageDescriptor,
    meta: &ResolvedMeta,
    build_id: &str,
    target: Target,
    dev: bool,
) -> Result<(Vec<OutputFile>, Vec<String>)> {
    let env = if dev { "development" } else { "production" };
    let entry = EntrySource {
        contents: synthesize_entry(meta, &descriptor.import_path()),
        resolve_dir: build_dir.to_path_buf(),
        source_name: "export.js".to_string(),
    };
    let bundle_config = BundleConfig {
        entry,
        target,
        format: ModuleFormat::EsModule,
        bundle: true,
        minify: !dev,
        write: false,
        define: define_table(config, build_id, env),
    };

    let externals: Mutex<Vec<String>> = Mutex::new(Vec::new());
    let self_import = descriptor.import_path();
    let on_resolve = |path: &str| {
        if path == self_import || is_file_import(path) {
            return ResolveAction::Continue;
        }
        let mut set = externals.lock();
        if !set.iter().any(|p| p == path) {
            set.push(path.to_string());
        }
        ResolveAction::External(format!("{}{}", EXTERNAL_SCHEME, path))
    };

    let outcome = engine.build(&bundle_config, &on_resolve)?;
    for warning in &outcome.warnings {
        warn!("bundler: {}", warning);
    }

    Ok((outcome.files, externals.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npm::NpmPackage;

    fn descriptor(name: &str, version: &str, submodule: &str) -> PackageDescriptor {
        PackageDescriptor {
            name: name.into(),
            version: version.into(),
            submodule: submodule.into(),
            ..Default::default()
        }
    }

    fn pin(name: &str, version: &str) -> PackageDescriptor {
        descriptor(name, version, "")
    }

    #[test]
    fn identifier_matches_the_published_grammar() {
        let id = build_identifier(
            2,
            &descriptor("react", "17.0.2", ""),
            &PinSet::default(),
            Target::Baseline2020,
            false,
        );
        assert_eq!(id, "v2/react@17.0.2/baseline-2020/react");
    }

    #[test]
    fn dev_identifier_is_suffixed() {
        let id = build_identifier(
            2,
            &descriptor("react", "17.0.2", ""),
            &PinSet::default(),
            Target::Baseline2020,
            true,
        );
        assert_eq!(id, "v2/react@17.0.2/baseline-2020/react.development");
    }

    #[test]
    fn submodule_identifier_uses_the_submodule_as_filename() {
        let id = build_identifier(
            2,
            &descriptor("preact", "10.5.15", "hooks"),
            &PinSet::default(),
            Target::Baseline2017,
            false,
        );
        assert_eq!(id, "v2/preact@10.5.15/baseline-2017/hooks");
    }

    #[test]
    fn scoped_name_filename_is_the_basename() {
        let id = build_identifier(
            2,
            &descriptor("@babel/runtime", "7.12.5", ""),
            &PinSet::default(),
            Target::EngineNext,
            false,
        );
        assert_eq!(id, "v2/@babel/runtime@7.12.5/engine-next/runtime");
    }

    #[test]
    fn identifier_is_invariant_under_pin_permutation() {
        let d = descriptor("react-dom", "17.0.2", "");
        let a = PinSet::new(vec![pin("react", "17.0.2"), pin("scheduler", "0.20.2")]);
        let b = PinSet::new(vec![pin("scheduler", "0.20.2"), pin("react", "17.0.2")]);
        let id_a = build_identifier(2, &d, &a, Target::Baseline2020, false);
        let id_b = build_identifier(2, &d, &b, Target::Baseline2020, false);
        assert_eq!(id_a, id_b);
        assert_eq!(
            id_a,
            "v2/react-dom@17.0.2/deps=react@17.0.2,scheduler@0.20.2/baseline-2020/react-dom"
        );
    }

    #[test]
    fn entry_for_standards_module_splits_default() {
        let meta = ResolvedMeta {
            package: NpmPackage {
                module: "esm/index.js".into(),
                ..Default::default()
            },
            export_names: vec!["render".into(), "hydrate".into()],
            has_default: true,
            ..Default::default()
        };
        assert_eq!(
            synthesize_entry(&meta, "preact"),
            "export {render,hydrate} from \"preact\";\nexport {default} from \"preact\";"
        );
    }

    #[test]
    fn entry_for_server_module_always_re_exports_default() {
        let meta = ResolvedMeta {
            export_names: vec!["createElement".into()],
            ..Default::default()
        };
        assert_eq!(
            synthesize_entry(&meta, "react"),
            "export {createElement,default} from \"react\";\n"
        );

        let empty = ResolvedMeta::default();
        assert_eq!(
            synthesize_entry(&empty, "react"),
            "export {default} from \"react\";"
        );
    }

    #[test]
    fn define_table_covers_global_aliases() {
        let config = Config::default();
        let define = define_table(&config, "v2/react@17.0.2/baseline-2020/react", "production");
        assert_eq!(define["process"], "__process$");
        assert_eq!(define["global.process"], "__process$");
        assert_eq!(define["process.env.NODE_ENV"], "\"production\"");
        assert_eq!(define["global.clearImmediate"], "clearTimeout");
        assert!(define["__filename"].ends_with("/react.js\""));
        assert!(define["__dirname"].ends_with("/baseline-2020\""));
        assert!(!define.contains_key("global.__filename"));
        assert!(!define.contains_key("global.global"));
    }

    struct RecordingEngine;

    impl BundleEngine for RecordingEngine {
        fn build(
            &self,
            config: &BundleConfig,
            on_resolve: &(dyn Fn(&str) -> ResolveAction + Sync),
        ) -> Result<BundleOutcome> {
            assert!(config.bundle);
            assert!(!config.write);
            assert_eq!(config.format, ModuleFormat::EsModule);

            // the self import and file paths pass through
            assert_eq!(on_resolve("react"), ResolveAction::Continue);
            assert_eq!(on_resolve("./cjs/react.production.min.js"), ResolveAction::Continue);
            // everything else is captured and forced external
            assert_eq!(
                on_resolve("object-assign"),
                ResolveAction::External("esm_sh_external://object-assign".into())
            );
            assert_eq!(
                on_resolve("object-assign"),
                ResolveAction::External("esm_sh_external://object-assign".into())
            );

            Ok(BundleOutcome {
                files: vec![OutputFile {
                    path: PathBuf::from("/bundle/export.js"),
                    contents: b"export{};".to_vec(),
                }],
                warnings: vec!["warning".into()],
            })
        }
    }

    #[test]
    fn driver_collects_externals_once() {
        let config = Config::default();
        let meta = ResolvedMeta::default();
        let d = descriptor("react", "17.0.2", "");
        let (files, externals) = bundle(
            &RecordingEngine,
            &config,
            std::path::Path::new("/tmp"),
            &d,
            &meta,
            "v2/react@17.0.2/baseline-2020/react",
            Target::Baseline2020,
            false,
        )
        .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(externals, vec!["object-assign"]);
    }
}
