//! Package identity: canonical descriptors, request-path parsing and the
//! ordered dependency pin set.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EsmpackError, Result};
use crate::registry::RegistryClient;

/// Packages whose resolved version is pinned regardless of the requested
/// spec. Matched by prefix against `name@version`.
const FIXED_VERSIONS: &[(&str, &str)] = &[
    ("@types/react@17", "17.0.38"),
    ("isomorphic-ws@4", "5.0.0"),
];

/// Canonical identity of a buildable package unit.
#[derive(Debug, Clone, Default, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    /// Registry identifier, leading `@` preserved for scoped names
    pub name: String,

    /// Exact version, a 10-char commit prefix (`from_git`) or `0.0.0`
    /// (`from_mirror`)
    pub version: String,

    /// Subpath with module suffixes and a trailing `/index` stripped
    pub submodule: String,

    /// Resolved from a git remote rather than the registry
    #[serde(rename = "fromGit")]
    pub from_git: bool,

    /// Mirror-uploaded blob, version pinned to `0.0.0`
    #[serde(rename = "fromMirror")]
    pub from_mirror: bool,
}

impl PartialEq for PackageDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.version == other.version && self.submodule == other.submodule
    }
}

impl PackageDescriptor {
    /// The path used to import this package from the synthesized entry.
    pub fn import_path(&self) -> String {
        if self.submodule.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.name, self.submodule)
        }
    }

    /// `name@version`, prefixed with `gh/` for git descriptors.
    pub fn version_name(&self) -> String {
        let s = format!("{}@{}", self.name, self.version);
        if self.from_git {
            format!("gh/{}", s)
        } else {
            s
        }
    }
}

impl fmt::Display for PackageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version_name())?;
        if !self.submodule.is_empty() {
            write!(f, "/{}", self.submodule)?;
        }
        Ok(())
    }
}

/// An ordered set of exact dependency pins. The set keeps itself sorted by
/// the lexicographic order of each descriptor's canonical string form, so two
/// permutations of the same pins serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinSet(Vec<PackageDescriptor>);

impl PinSet {
    pub fn new(pins: Vec<PackageDescriptor>) -> Self {
        let mut set = PinSet(pins);
        set.sort();
        set
    }

    pub fn push(&mut self, pin: PackageDescriptor) {
        self.0.push(pin);
        self.sort();
    }

    fn sort(&mut self) {
        self.0.sort_by_key(|p| p.to_string());
        self.0.dedup();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PackageDescriptor> {
        self.0.iter()
    }

    /// Whether the set pins a package of this name.
    pub fn has(&self, name: &str) -> bool {
        self.0.iter().any(|p| p.name == name)
    }

    /// The pin for a package name, if present.
    pub fn get(&self, name: &str) -> Option<&PackageDescriptor> {
        self.0.iter().find(|p| p.name == name)
    }

    /// The `/`-free token embedded into build identifiers.
    pub fn token(&self) -> String {
        self.to_string().replace('/', "_")
    }
}

impl fmt::Display for PinSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let forms: Vec<String> = self.0.iter().map(|p| p.to_string()).collect();
        write!(f, "{}", forms.join(","))
    }
}

/// Parse a request path into a descriptor and its raw query string.
///
/// Non-pinned versions are resolved eagerly: git descriptors against the
/// remote's ref list, registry descriptors against the fixed-version table and
/// then the registry itself, so the returned descriptor always carries a
/// concrete version.
pub async fn parse_package_path(
    registry: &RegistryClient,
    pathname: &str,
) -> Result<(PackageDescriptor, String)> {
    let from_git = pathname.starts_with("/gh/") && pathname.matches('/').count() >= 3;
    let pathname = if from_git {
        format!("/@{}", &pathname[4..])
    } else {
        pathname.to_string()
    };

    let (pkg_name, subpath) = split_package_path(&pathname);
    let (mut name, maybe_version) = split_name_version(&pkg_name);

    let from_mirror = name.len() > 1
        && name.starts_with('~')
        && name[1..].bytes().all(|b| b.is_ascii_hexdigit());
    if !from_mirror && !validate_package_name(&name) {
        return Err(EsmpackError::InvalidDescriptor(format!(
            "invalid package name '{}'",
            name
        )));
    }

    let (raw_version, raw_query) = match maybe_version.split_once('&') {
        Some((v, q)) => (v.to_string(), q.to_string()),
        None => (maybe_version, String::new()),
    };
    let mut version = match urlencoding::decode(&raw_version) {
        Ok(v) => v.into_owned(),
        Err(_) => raw_version,
    };

    // Re-combine the subpath with the query and reparse the whole thing as an
    // ampersand-separated list. Query parameters may carry slashes in their
    // values (alias mappings), in which case the raw subpath split was wrong:
    // a trailing `/`-prefixed segment is the real subpath, and a final
    // valueless segment containing `/` splits into query arg + subpath.
    let mut query = raw_query;
    let mut subpath = subpath;
    if !query.is_empty() {
        query = format!("{}/{}", query, subpath);
        subpath = String::new();

        let mut parts: Vec<String> = query.split('&').map(str::to_string).collect();
        if parts.len() > 1 {
            let last = parts.last().unwrap().clone();
            if let Some(stripped) = last.strip_prefix('/') {
                subpath = stripped.to_string();
                parts.pop();
                query = parts.join("&");
            } else if last.contains('/') && !last.contains('=') {
                let slash = last.find('/').unwrap();
                subpath = last[slash + 1..].to_string();
                *parts.last_mut().unwrap() = last[..slash].to_string();
                query = parts.join("&");
            } else {
                query = parts.join("&");
            }
        }
    }

    let mut descriptor = PackageDescriptor {
        name: name.clone(),
        version,
        submodule: to_module_name(&subpath),
        from_git,
        from_mirror,
    };

    if from_mirror {
        descriptor.version = "0.0.0".to_string();
        return Ok((descriptor, query));
    }

    if from_git {
        // strip the leading `@` added while normalizing the /gh/ prefix
        name = name[1..].to_string();
        descriptor.name = name.clone();
        version = descriptor.version.clone();
        let is_commit = version.len() >= 10 && version.bytes().all(|b| b.is_ascii_hexdigit());
        if is_commit || is_full_version(version.trim_start_matches('v')) {
            return Ok((descriptor, query));
        }
        if version.starts_with("semver:") {
            return Err(EsmpackError::NotFound(format!(
                "semver git specs are not supported: {}",
                version
            )));
        }
        let refs = registry
            .list_repo_refs(&format!("https://github.com/{}", name))
            .await?;
        if version.is_empty() {
            for r in &refs {
                if r.name == "HEAD" {
                    descriptor.version = r.sha[..10].to_string();
                    return Ok((descriptor, query));
                }
            }
        } else {
            for r in &refs {
                if r.name == format!("refs/tags/{}", version)
                    || r.name == format!("refs/heads/{}", version)
                {
                    descriptor.version = r.sha[..10].to_string();
                    return Ok((descriptor, query));
                }
            }
        }
        return Err(EsmpackError::NotFound(format!(
            "tag or branch '{}' not found for {}",
            version, name
        )));
    }

    // fixed version overrides
    let name_at_version = format!("{}@{}", name, descriptor.version);
    for (prefix, fixed) in FIXED_VERSIONS {
        if name_at_version.starts_with(prefix) {
            descriptor.version = fixed.to_string();
            return Ok((descriptor, query));
        }
    }

    // a fully pinned version short-circuits the registry
    if is_full_version(&descriptor.version) {
        return Ok((descriptor, query));
    }

    let (p, _) = registry.get_package_info(&name, &descriptor.version).await?;
    descriptor.version = p.version;
    Ok((descriptor, query))
}

/// Split a pathname into the package segment and the raw subpath, keeping
/// scoped names (`@scope/name`) whole.
pub fn split_package_path(pathname: &str) -> (String, String) {
    let parts: Vec<&str> = pathname.trim_start_matches('/').split('/').collect();
    if parts[0].starts_with('@') && parts.len() > 1 {
        (format!("{}/{}", parts[0], parts[1]), parts[2..].join("/"))
    } else {
        (parts[0].to_string(), parts[1..].join("/"))
    }
}

/// Split `name@version`, keeping the leading `@` of scoped names out of the
/// version search.
fn split_name_version(pkg_name: &str) -> (String, String) {
    let (search, scoped) = match pkg_name.strip_prefix('@') {
        Some(rest) => (rest, true),
        None => (pkg_name, false),
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

/// Strip known module suffixes and a trailing `/index` from a subpath.
pub fn to_module_name(subpath: &str) -> String {
    if subpath.is_empty() {
        return String::new();
    }
    let submodule = if let Some(s) = subpath.strip_suffix(".mjs") {
        s
    } else if let Some(s) = subpath.strip_suffix(".cjs") {
        s
    } else {
        subpath.strip_suffix(".js").unwrap_or(subpath)
    };
    submodule.strip_suffix("/index").unwrap_or(submodule).to_string()
}

/// Whether a version string is an exact `major.minor.patch[-prerelease]` form.
pub fn is_full_version(version: &str) -> bool {
    semver::Version::parse(version).is_ok()
}

fn validate_package_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 214 {
        return false;
    }
    let unscoped = match name.strip_prefix('@') {
        Some(rest) => match rest.split_once('/') {
            Some((scope, pkg)) if !scope.is_empty() && !pkg.is_empty() => {
                if !is_name_segment(scope) {
                    return false;
                }
                pkg
            }
            _ => return false,
        },
        None => name,
    };
    is_name_segment(unscoped)
}

fn is_name_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_' | b'.' | b'~'))
}
