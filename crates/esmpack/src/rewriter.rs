//! External-reference rewriting and polyfill injection.
//!
//! Bundler output arrives with every dependency import pinned to the
//! `esm_sh_external://` sentinel scheme. Phase 1 resolves each external name
//! to a canonical URL and splices it into the body, recognizing server-style
//! `require(...)` call sites along the way. Phase 2 prepends polyfill imports
//! for every sentinel identifier the defines left behind.

use std::path::Path;

use tracing::{debug, warn};

use crate::bundler::{Target, EXTERNAL_SCHEME};
use crate::config::Config;
use crate::descriptor::{PackageDescriptor, PinSet};
use crate::error::{EsmpackError, Result};
use crate::npm::NpmPackage;
use crate::polyfill;
use crate::registry::RegistryClient;
use crate::resolver::ResolvedMeta;

/// Per-build rewrite context.
pub struct Rewriter<'a> {
    pub config: &'a Config,
    pub registry: &'a RegistryClient,
    pub build_dir: &'a Path,
    pub meta: &'a ResolvedMeta,
    pub pins: &'a PinSet,
    pub target: Target,
    pub dev: bool,
}

impl Rewriter<'_> {
    fn env(&self) -> &'static str {
        if self.dev {
            "development"
        } else {
            "production"
        }
    }

    fn eol(&self) -> &'static str {
        if self.dev {
            "\n"
        } else {
            ""
        }
    }

    /// Rewrite one emitted `.js` output: resolve and splice every external,
    /// then inject polyfill headers. Returns the final artifact bytes.
    pub async fn rewrite_js(
        &self,
        descriptor: &PackageDescriptor,
        externals: &[String],
        content: &[u8],
    ) -> Result<Vec<u8>> {
        let eol = self.eol();
        let mut header = format!(
            "/* esmpack - bundle({}) {} {} */\n",
            descriptor,
            self.target.as_str(),
            self.env()
        );

        let mut body = content.to_vec();
        for name in externals {
            let url = match self.resolve_external_url(name).await {
                Ok(url) => url,
                Err(e @ EsmpackError::Rewrite(_)) => {
                    // non-fatal: ship a diagnostic module so clients see why
                    warn!("{}", e);
                    format!("/_error.js?type=resolve&name={}", urlencoding::encode(name))
                }
                Err(e) => return Err(e),
            };
            body = splice_external(&body, name, &url, &mut header, eol);
        }

        inject_polyfills(&body, &mut header, self.config.schema, self.env(), eol);

        let mut out = header.into_bytes();
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Resolve an external name to its canonical URL.
    async fn resolve_external_url(&self, name: &str) -> Result<String> {
        let schema = self.config.schema;

        // buffer always overrides the engine-std shim set
        if name == "buffer" {
            return Ok(format!("/v{}/_node_buffer.js", schema));
        }
        if self.target == Target::EngineNext && polyfill::is_engine_std_module(name) {
            return Ok(format!("/v{}/_deno_std_node_{}.js", schema, name));
        }

        if let Some(package) = polyfill::polyfill_package(name) {
            // polyfills are real registry packages built like anything else;
            // a failure here is fatal
            let (p, submodule) = self.registry.get_package_info(package, "latest").await?;
            return Ok(self.artifact_url(&p.name, &p.version, &submodule));
        }

        if polyfill::embedded_polyfill(name).is_some() {
            return Ok(format!("/v{}/_node_{}.js", schema, name));
        }

        // prefer what the bundler actually saw: the installed version
        let manifest = self
            .build_dir
            .join("node_modules")
            .join(name)
            .join("package.json");
        if manifest.exists() {
            if let Ok(p) = NpmPackage::read(&manifest) {
                return Ok(self.artifact_url(&p.name, &p.version, ""));
            }
        }

        // declared specs: user pins, then dependencies, then peer
        // dependencies, then the registry's latest
        let mut spec = "latest".to_string();
        if let Some(pin) = self.pins.get(name) {
            spec = pin.version.clone();
        }
        if spec == "latest" {
            if let Some(v) = self.meta.package.dependencies.get(name) {
                spec = v.clone();
            }
        }
        if spec == "latest" {
            if let Some(v) = self.meta.package.peer_dependencies.get(name) {
                spec = v.clone();
            }
        }
        match self.registry.get_package_info(name, &spec).await {
            Ok((p, submodule)) => Ok(self.artifact_url(&p.name, &p.version, &submodule)),
            Err(e) => Err(EsmpackError::Rewrite(format!(
                "cannot resolve external '{}': {}",
                name, e
            ))),
        }
    }

    fn artifact_url(&self, name: &str, version: &str, submodule: &str) -> String {
        let mut filename = if submodule.is_empty() {
            name.rsplit('/').next().unwrap_or(name).to_string()
        } else {
            submodule.to_string()
        };
        if self.dev {
            filename.push_str(".development");
        }
        format!(
            "/v{}/{}@{}/{}/{}.js",
            self.config.schema,
            name,
            version,
            self.target.as_str(),
            filename
        )
    }
}

/// Derive a deterministic, syntactically safe identifier from a package name:
/// alphanumeric runs are camel-cased together (`left-pad` → `leftPad`).
pub fn identify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if upper_next {
                out.extend(ch.to_uppercase());
            } else {
                out.push(ch);
            }
            upper_next = false;
        } else {
            upper_next = !out.is_empty();
        }
    }
    if out.is_empty() || out.as_bytes()[0].is_ascii_digit() {
        out.insert(0, '_');
    }
    out
}

/// Splice one external's sentinel occurrences out of the body.
///
/// The body is split on the quoted sentinel literal. A slice ending in
/// `require(` marks a server-style import: the call is replaced by a hoisted
/// identifier (imported once into the header) and the matching `)` is
/// consumed from the following slice. Every other occurrence is an import
/// specifier and is substituted with the quoted URL in place.
pub fn splice_external(
    content: &[u8],
    name: &str,
    url: &str,
    header: &mut String,
    eol: &str,
) -> Vec<u8> {
    let identifier = identify(name);
    let needle = format!("\"{}{}\"", EXTERNAL_SCHEME, name);
    let slices = split_bytes(content, needle.as_bytes());

    let mut out = Vec::with_capacity(content.len());
    let mut commonjs = false;
    let mut commonjs_imported = false;
    for (i, slice) in slices.iter().enumerate() {
        let mut part: &[u8] = slice;
        if commonjs {
            part = part.strip_prefix(b")").unwrap_or(part);
        }
        commonjs = part.ends_with(b"require(");
        if commonjs {
            part = &part[..part.len() - b"require(".len()];
            if !commonjs_imported {
                header.push_str(&format!(
                    "import __{}$ from \"{}\";{}",
                    identifier, url, eol
                ));
                commonjs_imported = true;
            }
        }
        out.extend_from_slice(part);
        if i < slices.len() - 1 {
            if commonjs {
                out.extend_from_slice(format!("__{}$", identifier).as_bytes());
            } else {
                out.extend_from_slice(format!("\"{}\"", url).as_bytes());
            }
        }
    }
    out
}

/// Prepend the declaration for every sentinel identifier present in the body.
pub fn inject_polyfills(body: &[u8], header: &mut String, schema: u32, env: &str, eol: &str) {
    if contains(body, b"__process$") {
        header.push_str(&format!(
            "import __process$ from \"/v{}/_node_process.js\";{}__process$.env.NODE_ENV=\"{}\";{}",
            schema, eol, env, eol
        ));
    }
    if contains(body, b"__Buffer$") {
        header.push_str(&format!(
            "import {{ Buffer as __Buffer$ }} from \"/v{}/_node_buffer.js\";{}",
            schema, eol
        ));
    }
    if contains(body, b"__global$") {
        header.push_str(&format!("var __global$ = window;{}", eol));
    }
    if contains(body, b"__setImmediate$") {
        header.push_str(&format!(
            "var __setImmediate$ = (cb, args) => setTimeout(cb, 0, ...args);{}",
            eol
        ));
    }
    if contains(body, b"__rResolve$") {
        header.push_str(&format!("var __rResolve$ = p => p;{}", eol));
    }
    debug!("injected polyfill header ({} bytes)", header.len());
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle, 0).is_some()
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| &haystack[i..i + needle.len()] == needle)
}

fn split_bytes<'a>(haystack: &'a [u8], needle: &[u8]) -> Vec<&'a [u8]> {
    let mut slices = Vec::new();
    let mut start = 0;
    while let Some(i) = find(haystack, needle, start) {
        slices.push(&haystack[start..i]);
        start = i + needle.len();
    }
    slices.push(&haystack[start..]);
    slices
}
