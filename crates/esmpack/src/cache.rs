//! The cache protocol keyed by build identifier.
//!
//! A hit is only reported after the metadata record decodes and the `.js`
//! blob is verified present, so a partially lost store heals itself: the next
//! request simply rebuilds.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::resolver::ResolvedMeta;
use crate::store::{BlobStore, CacheRecord, MetaStore};

/// A verified cache hit.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub meta: ResolvedMeta,
    pub has_css: bool,
}

/// Cache facade over the blob and metadata stores.
#[derive(Clone)]
pub struct BuildCache {
    blobs: Arc<dyn BlobStore>,
    meta: Arc<dyn MetaStore>,
}

impl BuildCache {
    pub fn new(blobs: Arc<dyn BlobStore>, meta: Arc<dyn MetaStore>) -> Self {
        Self { blobs, meta }
    }

    /// Blob key of the mandatory module artifact.
    pub fn js_key(build_id: &str) -> String {
        format!("builds/{}.js", build_id)
    }

    /// Blob key of the optional stylesheet artifact.
    pub fn css_key(build_id: &str) -> String {
        format!("builds/{}.css", build_id)
    }

    /// Look up a build identifier, verifying the blobs behind the record.
    pub fn lookup(&self, build_id: &str) -> Result<Option<CacheHit>> {
        let Some(record) = self.meta.get(build_id)? else {
            return Ok(None);
        };

        let meta: ResolvedMeta = match serde_json::from_str(&record.esmeta) {
            Ok(meta) => meta,
            Err(e) => {
                warn!("dropping undecodable cache record for {}: {}", build_id, e);
                self.meta.delete(build_id)?;
                return Ok(None);
            }
        };

        // the flag may be stale if the blob layer was wiped; reconcile it to
        // reality before reporting the hit
        let has_css = record.css == 1 && self.blobs.exists(&Self::css_key(build_id));

        if !self.blobs.exists(&Self::js_key(build_id)) {
            warn!("cache record for {} has no module blob, rebuilding", build_id);
            self.meta.delete(build_id)?;
            return Ok(None);
        }

        debug!("cache hit for {}", build_id);
        Ok(Some(CacheHit { meta, has_css }))
    }

    /// Write the module artifact blob.
    pub fn put_js(&self, build_id: &str, data: &[u8]) -> Result<()> {
        self.blobs.write(&Self::js_key(build_id), data)
    }

    /// Write the stylesheet artifact blob.
    pub fn put_css(&self, build_id: &str, data: &[u8]) -> Result<()> {
        self.blobs.write(&Self::css_key(build_id), data)
    }

    /// Commit the cache record. Callers must have written the blobs first.
    pub fn commit(&self, build_id: &str, meta: &ResolvedMeta, has_css: bool) -> Result<()> {
        let record = CacheRecord {
            esmeta: serde_json::to_string(meta)?,
            css: u8::from(has_css),
        };
        self.meta.put(build_id, &record)
    }

    /// Drop the cache record for an identifier.
    pub fn delete(&self, build_id: &str) -> Result<()> {
        self.meta.delete(build_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npm::NpmPackage;
    use crate::store::{FsBlobStore, FsMetaStore};
    use std::path::PathBuf;

    fn cache(name: &str) -> (BuildCache, Arc<dyn MetaStore>, PathBuf) {
        let root = std::env::temp_dir().join(format!("esmpack-cache-{}-{}", name, std::process::id()));
        std::fs::remove_dir_all(&root).ok();
        let meta: Arc<dyn MetaStore> = Arc::new(FsMetaStore::new(&root));
        (
            BuildCache::new(Arc::new(FsBlobStore::new(&root)), meta.clone()),
            meta,
            root,
        )
    }

    fn sample_meta() -> ResolvedMeta {
        ResolvedMeta {
            package: NpmPackage {
                name: "react".into(),
                version: "17.0.2".into(),
                main: "index.js".into(),
                ..Default::default()
            },
            export_names: vec!["createElement".into(), "useState".into()],
            has_default: true,
            declarations_url: "/react@17.0.2/index.d.ts".into(),
        }
    }

    const ID: &str = "v2/react@17.0.2/baseline-2020/react";

    #[test]
    fn committed_builds_are_returned_structurally_equal() {
        let (cache, _, root) = cache("roundtrip");
        let meta = sample_meta();

        cache.put_js(ID, b"export{};").unwrap();
        cache.commit(ID, &meta, false).unwrap();

        let hit = cache.lookup(ID).unwrap().unwrap();
        assert_eq!(hit.meta, meta);
        assert!(!hit.has_css);

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn missing_module_blob_heals_the_record() {
        let (cache, meta_store, root) = cache("selfheal-js");
        cache.put_js(ID, b"export{};").unwrap();
        cache.commit(ID, &sample_meta(), false).unwrap();

        // wipe the blob layer out from under the record
        std::fs::remove_file(root.join("builds").join(format!("{}.js", ID))).unwrap();

        assert!(cache.lookup(ID).unwrap().is_none());
        // the record itself was dropped so the next build recommits cleanly
        assert!(meta_store.get(ID).unwrap().is_none());

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn stale_css_flag_is_reconciled_to_reality() {
        let (cache, _, root) = cache("selfheal-css");
        cache.put_js(ID, b"export{};").unwrap();
        cache.commit(ID, &sample_meta(), true).unwrap();

        // css blob never existed; the hit must not claim one
        let hit = cache.lookup(ID).unwrap().unwrap();
        assert!(!hit.has_css);

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn css_flag_round_trips_when_the_blob_exists() {
        let (cache, _, root) = cache("css");
        cache.put_js(ID, b"export{};").unwrap();
        cache.put_css(ID, b".a{}").unwrap();
        cache.commit(ID, &sample_meta(), true).unwrap();

        let hit = cache.lookup(ID).unwrap().unwrap();
        assert!(hit.has_css);

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn undecodable_metadata_is_dropped() {
        let (cache, meta_store, root) = cache("corrupt");
        cache.put_js(ID, b"export{};").unwrap();
        meta_store
            .put(
                ID,
                &CacheRecord {
                    esmeta: "{not json".to_string(),
                    css: 0,
                },
            )
            .unwrap();

        assert!(cache.lookup(ID).unwrap().is_none());
        assert!(meta_store.get(ID).unwrap().is_none());

        std::fs::remove_dir_all(&root).ok();
    }
}
