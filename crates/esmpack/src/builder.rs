//! The build coordinator: admission, orchestration, and cache finalization.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::bundler::{self, BundleEngine, Target};
use crate::cache::BuildCache;
use crate::config::Config;
use crate::descriptor::{PackageDescriptor, PinSet};
use crate::dts::{handle_declarations, DeclarationCopier};
use crate::error::Result;
use crate::registry::RegistryClient;
use crate::resolver::{resolve_meta, ResolvedMeta};
use crate::rewriter::Rewriter;
use crate::store::{BlobStore, MetaStore};

/// One build request as handed over by the HTTP front-end.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub descriptor: PackageDescriptor,
    pub pins: PinSet,
    pub target: Target,
    pub dev: bool,
}

/// The committed result of a build.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub build_id: String,
    pub meta: ResolvedMeta,
    pub has_css: bool,
}

/// Builds module artifacts and keeps the cache consistent.
///
/// Admission is keyed single-flight: at most one build runs per identifier,
/// and latecomers for the same identifier wait on it and then share its
/// committed result through the cache.
pub struct Builder {
    config: Config,
    registry: RegistryClient,
    engine: Arc<dyn BundleEngine>,
    cache: BuildCache,
    copier: Arc<dyn DeclarationCopier>,
    in_flight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl Builder {
    pub fn new(
        config: Config,
        engine: Arc<dyn BundleEngine>,
        blobs: Arc<dyn BlobStore>,
        meta: Arc<dyn MetaStore>,
        copier: Arc<dyn DeclarationCopier>,
    ) -> Result<Self> {
        let registry = RegistryClient::new(&config)?;
        Ok(Self {
            config,
            registry,
            engine,
            cache: BuildCache::new(blobs, meta),
            copier,
            in_flight: DashMap::new(),
        })
    }

    /// The registry client, shared with the identity layer.
    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    /// Build (or return the cached) artifact for a request.
    pub async fn build(&self, request: BuildRequest) -> Result<BuildOutput> {
        let build_id = bundler::build_identifier(
            self.config.schema,
            &request.descriptor,
            &request.pins,
            request.target,
            request.dev,
        );

        if let Some(hit) = self.cache.lookup(&build_id)? {
            return Ok(BuildOutput {
                build_id,
                meta: hit.meta,
                has_css: hit.has_css,
            });
        }

        let gate = self
            .in_flight
            .entry(build_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let result = {
            let _held = gate.lock().await;
            // a build that finished while this request waited commits before
            // releasing the gate, so the second lookup observes it
            match self.cache.lookup(&build_id)? {
                Some(hit) => Ok(BuildOutput {
                    build_id: build_id.clone(),
                    meta: hit.meta,
                    has_css: hit.has_css,
                }),
                None => self.run_build(&build_id, &request).await,
            }
        };
        self.in_flight
            .remove_if(&build_id, |_, gate| Arc::strong_count(gate) <= 2);
        result
    }

    async fn run_build(&self, build_id: &str, request: &BuildRequest) -> Result<BuildOutput> {
        let start = Instant::now();
        let scratch = ScratchDir::create(build_id)?;

        let mut meta = resolve_meta(&self.registry, scratch.path(), &request.descriptor).await?;

        let (files, externals) = bundler::bundle(
            self.engine.as_ref(),
            &self.config,
            scratch.path(),
            &request.descriptor,
            &meta,
            build_id,
            request.target,
            request.dev,
        )?;

        let mut has_css = false;
        {
            let rewriter = Rewriter {
                config: &self.config,
                registry: &self.registry,
                build_dir: scratch.path(),
                meta: &meta,
                pins: &request.pins,
                target: request.target,
                dev: request.dev,
            };
            for file in &files {
                let extension = file.path.extension().and_then(|e| e.to_str());
                match extension {
                    Some("js") => {
                        let artifact = rewriter
                            .rewrite_js(&request.descriptor, &externals, &file.contents)
                            .await?;
                        self.cache.put_js(build_id, &artifact)?;
                    }
                    Some("css") => {
                        self.cache.put_css(build_id, &file.contents)?;
                        has_css = true;
                    }
                    _ => {}
                }
            }
        }

        handle_declarations(
            self.copier.as_ref(),
            &self.config,
            scratch.path(),
            &mut meta,
            &request.descriptor,
        )?;

        self.cache.commit(build_id, &meta, has_css)?;
        info!(
            "built {} ({} {}) in {:?}",
            request.descriptor,
            request.target,
            if request.dev { "development" } else { "production" },
            start.elapsed()
        );

        Ok(BuildOutput {
            build_id: build_id.to_string(),
            meta,
            has_css,
        })
    }
}

/// Per-build scratch directory at a deterministic temp path derived from the
/// identifier hash. Removed on every exit path, including unwinds.
struct ScratchDir(PathBuf);

impl ScratchDir {
    fn create(build_id: &str) -> Result<Self> {
        let digest = Sha256::digest(build_id.as_bytes());
        let path = std::env::temp_dir().join(format!("esmpack-build-{}", hex::encode(digest)));
        std::fs::create_dir_all(&path)?;
        debug!("scratch directory {}", path.display());
        Ok(Self(path))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}
