//! Registry client.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::Client;
use semver::{Version, VersionReq};
use tracing::{debug, instrument};

use crate::config::Config;
use crate::error::{EsmpackError, Result};
use crate::npm::{NpmPackage, RegistryDoc};

/// Default registry URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";

/// A single ref advertised by a git remote.
#[derive(Debug, Clone)]
pub struct GitRef {
    /// Full ref name (`HEAD`, `refs/tags/v1.0.0`, `refs/heads/main`)
    pub name: String,
    /// Commit SHA
    pub sha: String,
}

/// Registry client with an in-process metadata cache.
#[derive(Clone)]
pub struct RegistryClient {
    client: Client,
    registry_url: String,
    /// Cache for full registry documents
    cache: Arc<DashMap<String, RegistryDoc>>,
}

impl RegistryClient {
    /// Create a new registry client.
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(20)
            .user_agent(format!("esmpack/{}", env!("CARGO_PKG_VERSION")));

        if config.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(Self {
            client: builder.build()?,
            registry_url: config.registry.trim_end_matches('/').to_string(),
            cache: Arc::new(DashMap::new()),
        })
    }

    /// Get the registry URL.
    pub fn registry_url(&self) -> &str {
        &self.registry_url
    }

    /// Fetch the full registry document for a package name.
    #[instrument(skip(self))]
    pub async fn get_doc(&self, name: &str) -> Result<RegistryDoc> {
        if let Some(doc) = self.cache.get(name) {
            debug!("metadata cache hit for {}", name);
            return Ok(doc.clone());
        }

        let url = format!("{}/{}", self.registry_url, encode_package_name(name));
        debug!("fetching package metadata from {}", url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(EsmpackError::NotFound(format!("package '{}'", name)));
        }
        if !response.status().is_success() {
            return Err(EsmpackError::Registry(format!(
                "failed to fetch {}: HTTP {}",
                name,
                response.status()
            )));
        }

        let doc: RegistryDoc = response.json().await?;
        self.cache.insert(name.to_string(), doc.clone());
        Ok(doc)
    }

    /// Resolve a package and version spec to concrete version metadata.
    ///
    /// `name` may embed a subpath (`os-browserify/browser`), which is split
    /// off and returned as the submodule. The spec may be empty or `latest`
    /// (both resolve the `latest` dist-tag), another dist-tag, an exact
    /// version, or a semver range.
    #[instrument(skip(self))]
    pub async fn get_package_info(&self, name: &str, spec: &str) -> Result<(NpmPackage, String)> {
        let (name, subpath) = crate::descriptor::split_package_path(name);
        let submodule = crate::descriptor::to_module_name(&subpath);

        let doc = self.get_doc(&name).await?;
        let spec = if spec.is_empty() { "latest" } else { spec };

        if let Some(p) = doc.versions.get(spec) {
            return Ok((p.clone(), submodule));
        }
        if let Some(version) = doc.dist_tags.get(spec) {
            if let Some(p) = doc.versions.get(version) {
                return Ok((p.clone(), submodule));
            }
        }
        if let Ok(req) = VersionReq::parse(spec) {
            let mut best: Option<Version> = None;
            for key in doc.versions.keys() {
                if let Ok(v) = Version::parse(key) {
                    if req.matches(&v) && best.as_ref().map_or(true, |b| v > *b) {
                        best = Some(v);
                    }
                }
            }
            if let Some(v) = best {
                if let Some(p) = doc.versions.get(&v.to_string()) {
                    return Ok((p.clone(), submodule));
                }
            }
        }

        Err(EsmpackError::NotFound(format!("version '{}@{}'", name, spec)))
    }

    /// Resolve the `latest` dist-tag for a package.
    pub async fn latest_version(&self, name: &str) -> Result<String> {
        let doc = self.get_doc(name).await?;
        doc.dist_tags
            .get("latest")
            .cloned()
            .ok_or_else(|| EsmpackError::NotFound(format!("package '{}'", name)))
    }

    /// Download a tarball.
    #[instrument(skip(self))]
    pub async fn download_tarball(&self, url: &str) -> Result<bytes::Bytes> {
        debug!("downloading tarball from {}", url);

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(EsmpackError::Registry(format!(
                "failed to download tarball: HTTP {}",
                response.status()
            )));
        }

        Ok(response.bytes().await?)
    }

    /// List the refs advertised by a git remote.
    #[instrument(skip(self))]
    pub async fn list_repo_refs(&self, git_url: &str) -> Result<Vec<GitRef>> {
        let output = tokio::process::Command::new("git")
            .arg("ls-remote")
            .arg(git_url)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EsmpackError::NotFound(format!(
                "repository '{}' unavailable: {}",
                git_url,
                stderr.trim()
            )));
        }

        Ok(parse_ls_remote(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Drop all cached registry documents.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

/// Encode a package name for use in registry URLs.
fn encode_package_name(name: &str) -> String {
    if name.starts_with('@') {
        // scoped package: @scope/name -> @scope%2Fname
        name.replace('/', "%2F")
    } else {
        name.to_string()
    }
}

fn parse_ls_remote(stdout: &str) -> Vec<GitRef> {
    let mut refs = Vec::new();
    for line in stdout.lines() {
        if let Some((sha, name)) = line.split_once('\t') {
            let sha = sha.trim();
            if sha.len() >= 10 && sha.bytes().all(|b| b.is_ascii_hexdigit()) {
                refs.push(GitRef {
                    name: name.trim().to_string(),
                    sha: sha.to_string(),
                });
            }
        }
    }
    refs
}
