//! Export scanning for standards-modules and server-modules.
//!
//! Regex-based source scanning: enough to recover the re-exportable surface
//! of installed packages without embedding a full parser. Star re-exports
//! (`export * from`) are not followed.

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use crate::error::{EsmpackError, Result};

/// Locate and scan a standards-module. Returns the ordered export names and
/// whether the file actually uses declarative module syntax (a `.js` file
/// labeled `module` may turn out to be a server-module).
pub fn parse_es_module_exports(build_dir: &Path, import_path: &str) -> Result<(Vec<String>, bool)> {
    let source = read_module_source(build_dir, import_path)?;
    Ok(scan_es_exports(&source))
}

/// Locate and scan a server-module for its `exports.*` surface.
pub fn parse_cjs_module_exports(build_dir: &Path, import_path: &str) -> Result<Vec<String>> {
    let source = read_module_source(build_dir, import_path)?;
    Ok(scan_cjs_exports(&source))
}

fn read_module_source(build_dir: &Path, import_path: &str) -> Result<String> {
    let file = resolve_module_file(&build_dir.join("node_modules"), import_path)
        .ok_or_else(|| {
            EsmpackError::Resolve(format!("module file '{}' not found", import_path))
        })?;
    Ok(std::fs::read_to_string(file)?)
}

/// Probe a module specifier against the filesystem the way a module loader
/// would: the literal path, known suffixes, the directory's `package.json`
/// entry fields, then directory index files.
pub fn resolve_module_file(node_modules: &Path, spec: &str) -> Option<PathBuf> {
    const INDEXES: &[&str] = &["index.js", "index.mjs", "index.cjs"];

    let base = node_modules.join(spec.trim_start_matches("./"));
    if let Some(file) = probe_suffixes(&base) {
        return Some(file);
    }
    if base.is_dir() {
        if let Ok(package) = crate::npm::NpmPackage::read(base.join("package.json")) {
            for entry in [&package.module, &package.main] {
                if entry.is_empty() {
                    continue;
                }
                if let Some(file) = probe_suffixes(&base.join(entry.trim_start_matches("./"))) {
                    return Some(file);
                }
            }
        }
    }
    for index in INDEXES {
        let candidate = base.join(index);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

fn probe_suffixes(base: &Path) -> Option<PathBuf> {
    const SUFFIXES: &[&str] = &["", ".js", ".mjs", ".cjs"];
    for suffix in SUFFIXES {
        let candidate = if suffix.is_empty() {
            base.to_path_buf()
        } else {
            PathBuf::from(format!("{}{}", base.display(), suffix))
        };
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Collect export names from declarative module syntax.
pub fn scan_es_exports(source: &str) -> (Vec<String>, bool) {
    let export_decl_re =
        Regex::new(r"(?m)^\s*export\s+(?:async\s+)?(?:function\*?|class|const|let|var)\s+([A-Za-z_$][\w$]*)")
            .unwrap();
    let export_default_re = Regex::new(r"(?m)^\s*export\s+default\b").unwrap();
    let export_named_re = Regex::new(r"export\s*\{([^}]*)\}").unwrap();
    let export_star_as_re = Regex::new(r#"export\s*\*\s*as\s+([A-Za-z_$][\w$]*)\s+from"#).unwrap();
    let export_star_re = Regex::new(r#"export\s*\*\s*from\s*['"]([^'"]+)['"]"#).unwrap();
    let import_re = Regex::new(r#"(?m)^\s*import\b"#).unwrap();

    let mut names = Vec::new();
    let mut is_esm = false;

    for cap in export_decl_re.captures_iter(source) {
        is_esm = true;
        push_unique(&mut names, cap[1].to_string());
    }
    if export_default_re.is_match(source) {
        is_esm = true;
        push_unique(&mut names, "default".to_string());
    }
    for cap in export_named_re.captures_iter(source) {
        is_esm = true;
        for part in cap[1].split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            // `a as b` exports b; a bare name exports itself
            let exported = match part.rsplit_once(" as ") {
                Some((_, alias)) => alias.trim(),
                None => part,
            };
            if is_identifier(exported) || exported == "default" {
                push_unique(&mut names, exported.to_string());
            }
        }
    }
    for cap in export_star_as_re.captures_iter(source) {
        is_esm = true;
        push_unique(&mut names, cap[1].to_string());
    }
    if export_star_re.is_match(source) {
        is_esm = true;
        debug!("star re-export names are not followed");
    }
    if !is_esm && import_re.is_match(source) {
        is_esm = true;
    }

    (names, is_esm)
}

/// Collect export names from server-module assignment patterns.
pub fn scan_cjs_exports(source: &str) -> Vec<String> {
    let assign_re =
        Regex::new(r"(?:module\.)?exports\.([A-Za-z_$][\w$]*)\s*=").unwrap();
    let object_re = Regex::new(r"module\.exports\s*=\s*\{([^}]*)\}").unwrap();
    let define_re = Regex::new(
        r#"Object\.defineProperty\(\s*(?:module\.)?exports\s*,\s*["']([A-Za-z_$][\w$]*)["']"#,
    )
    .unwrap();

    let mut names = Vec::new();
    for cap in assign_re.captures_iter(source) {
        push_unique(&mut names, cap[1].to_string());
    }
    for cap in object_re.captures_iter(source) {
        for part in cap[1].split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            // `key: value`, shorthand `key`, or method `key(...)`
            let key = part
                .split_once(':')
                .map(|(k, _)| k)
                .unwrap_or(part)
                .split('(')
                .next()
                .unwrap_or("")
                .trim();
            if is_identifier(key) {
                push_unique(&mut names, key.to_string());
            }
        }
    }
    for cap in define_re.captures_iter(source) {
        let name = cap[1].to_string();
        if name != "__esModule" {
            push_unique(&mut names, name);
        }
    }
    names
}

fn push_unique(names: &mut Vec<String>, name: String) {
    if !names.contains(&name) {
        names.push(name);
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
