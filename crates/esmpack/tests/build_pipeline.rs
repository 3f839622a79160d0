//! End-to-end pipeline tests against an in-process registry and a scripted
//! bundler engine: build, cache idempotence, and both self-repair directions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use esmpack::builder::{BuildRequest, Builder};
use esmpack::bundler::{
    BundleConfig, BundleEngine, BundleOutcome, OutputFile, ResolveAction, Target,
};
use esmpack::descriptor::{PackageDescriptor, PinSet};
use esmpack::dts::TreeCopier;
use esmpack::error::Result;
use esmpack::store::{FsBlobStore, FsMetaStore};
use esmpack::Config;

/// Serve canned responses over bare HTTP/1.1, logging every requested path.
fn serve(listener: TcpListener, routes: HashMap<String, Vec<u8>>, log: Arc<Mutex<Vec<String>>>) {
    let routes = Arc::new(routes);
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let routes = routes.clone();
            let log = log.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                    if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let head = String::from_utf8_lossy(&buf);
                let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                log.lock().unwrap().push(path.clone());

                let response = match routes.get(&path) {
                    Some(body) => {
                        let mut r = format!(
                            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                            body.len()
                        )
                        .into_bytes();
                        r.extend_from_slice(body);
                        r
                    }
                    None => {
                        b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                            .to_vec()
                    }
                };
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            });
        }
    });
}

fn make_tarball(files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("package/{}", path), content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn registry_doc(name: &str, version: &str, tarball_url: &str, dependencies: &str) -> Vec<u8> {
    format!(
        r#"{{
            "name": "{name}",
            "dist-tags": {{"latest": "{version}"}},
            "versions": {{
                "{version}": {{
                    "name": "{name}",
                    "version": "{version}",
                    "main": "index.js",
                    "dependencies": {dependencies},
                    "dist": {{"tarball": "{tarball_url}"}}
                }}
            }}
        }}"#
    )
    .into_bytes()
}

/// The bundle body a real engine would emit for the fixture package: one
/// external held by a server-style require, plus a process sentinel.
const BUNDLE_BODY: &str = concat!(
    "var core=require(\"esm_sh_external://pad-core\");",
    "__process$.env.TZ;",
    "var leftPad=(s,n)=>core.pad(s,n);",
    "export{leftPad};",
);

/// Emits a fixed bundle body after routing the imports a real bundler would
/// encounter through the resolve hook.
struct ScriptedEngine {
    builds: AtomicUsize,
}

impl BundleEngine for ScriptedEngine {
    fn build(
        &self,
        config: &BundleConfig,
        on_resolve: &(dyn Fn(&str) -> ResolveAction + Sync),
    ) -> Result<BundleOutcome> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        assert!(config.entry.contents.contains("from \"left-pad\""));
        assert!(config.bundle);
        assert!(!config.write);

        // the package's own import graph
        assert_eq!(on_resolve("left-pad"), ResolveAction::Continue);
        assert_eq!(on_resolve("./util.js"), ResolveAction::Continue);
        assert_eq!(
            on_resolve("pad-core"),
            ResolveAction::External("esm_sh_external://pad-core".into())
        );

        Ok(BundleOutcome {
            files: vec![
                OutputFile {
                    path: PathBuf::from("/bundle/export.js"),
                    contents: BUNDLE_BODY.as_bytes().to_vec(),
                },
                OutputFile {
                    path: PathBuf::from("/bundle/export.css"),
                    contents: b".left-pad{color:peru}".to_vec(),
                },
            ],
            warnings: Vec::new(),
        })
    }
}

struct Harness {
    builder: Builder,
    engine: Arc<ScriptedEngine>,
    log: Arc<Mutex<Vec<String>>>,
    storage: PathBuf,
    version: String,
}

impl Harness {
    async fn new(name: &str, version: &str) -> Harness {
        let storage =
            std::env::temp_dir().join(format!("esmpack-e2e-{}-{}", name, std::process::id()));
        std::fs::remove_dir_all(&storage).ok();

        // bind before building routes so tarball URLs carry the real port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let mut routes = HashMap::new();
        routes.insert(
            "/left-pad".to_string(),
            registry_doc(
                "left-pad",
                version,
                &format!("{}/tarballs/left-pad-{}.tgz", base, version),
                r#"{"pad-core": "^1.0.0"}"#,
            ),
        );
        routes.insert(
            "/pad-core".to_string(),
            registry_doc(
                "pad-core",
                "1.0.0",
                &format!("{}/tarballs/pad-core-1.0.0.tgz", base),
                "{}",
            ),
        );
        let manifest = format!(
            r#"{{"name":"left-pad","version":"{}","main":"index.js"}}"#,
            version
        );
        routes.insert(
            format!("/tarballs/left-pad-{}.tgz", version),
            make_tarball(&[
                ("package.json", manifest.as_str()),
                ("index.js", "module.exports = { leftPad: leftPad };\n"),
                (
                    "index.d.ts",
                    "declare function leftPad(s: string, n: number): string;\n",
                ),
            ]),
        );
        routes.insert(
            "/tarballs/pad-core-1.0.0.tgz".to_string(),
            make_tarball(&[
                (
                    "package.json",
                    r#"{"name":"pad-core","version":"1.0.0","main":"index.js"}"#,
                ),
                ("index.js", "exports.pad = function (s, n) { return s; };\n"),
            ]),
        );

        let log = Arc::new(Mutex::new(Vec::new()));
        serve(listener, routes, log.clone());

        let config = Config {
            schema: 2,
            registry: base,
            storage_dir: storage.clone(),
            ..Config::default()
        };
        let engine = Arc::new(ScriptedEngine {
            builds: AtomicUsize::new(0),
        });
        let builder = Builder::new(
            config,
            engine.clone(),
            Arc::new(FsBlobStore::new(&storage)),
            Arc::new(FsMetaStore::new(&storage)),
            Arc::new(TreeCopier),
        )
        .unwrap();

        Harness {
            builder,
            engine,
            log,
            storage,
            version: version.to_string(),
        }
    }

    fn request(&self) -> BuildRequest {
        BuildRequest {
            descriptor: PackageDescriptor {
                name: "left-pad".into(),
                version: self.version.clone(),
                ..Default::default()
            },
            pins: PinSet::default(),
            target: Target::Baseline2020,
            dev: false,
        }
    }

    fn build_id(&self) -> String {
        format!("v2/left-pad@{}/baseline-2020/left-pad", self.version)
    }

    fn tarball_installs(&self) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.starts_with("/tarballs/"))
            .count()
    }

    fn js_blob(&self, build_id: &str) -> PathBuf {
        self.storage.join("builds").join(format!("{}.js", build_id))
    }
}

#[tokio::test]
async fn builds_commit_a_rewritten_artifact_and_declarations() {
    let h = Harness::new("build", "1.3.0").await;
    let out = h.builder.build(h.request()).await.unwrap();

    assert_eq!(out.build_id, h.build_id());
    assert_eq!(out.meta.export_names, vec!["leftPad"]);
    assert_eq!(out.meta.declarations_url, "/left-pad@1.3.0/index.d.ts");

    // stylesheets pass through unchanged and set the css flag
    assert!(out.has_css);
    let css = h.storage.join("builds").join(format!("{}.css", h.build_id()));
    assert_eq!(std::fs::read(css).unwrap(), b".left-pad{color:peru}");

    let artifact = String::from_utf8(std::fs::read(h.js_blob(&h.build_id())).unwrap()).unwrap();
    assert!(artifact.starts_with("/* esmpack - bundle(left-pad@1.3.0) baseline-2020 production */\n"));
    // no external leaks into committed output
    assert!(!artifact.contains("esm_sh_external://"));
    // the require call site became a hoisted import of the installed version
    assert!(artifact
        .contains("import __padCore$ from \"/v2/pad-core@1.0.0/baseline-2020/pad-core.js\";"));
    assert!(artifact.contains("var core=__padCore$;"));
    // polyfill parity for the process sentinel
    assert!(artifact.contains("import __process$ from \"/v2/_node_process.js\";"));
    assert_eq!(artifact.matches("import __process$").count(), 1);

    // the declaration tree was mirrored
    assert!(h
        .storage
        .join("types/left-pad@1.3.0/index.d.ts")
        .exists());

    std::fs::remove_dir_all(&h.storage).ok();
}

#[tokio::test]
async fn identical_requests_hit_the_cache_without_reinstalling() {
    let h = Harness::new("idempotent", "1.3.1").await;

    let first = h.builder.build(h.request()).await.unwrap();
    let installs = h.tarball_installs();
    assert_eq!(installs, 2);
    assert_eq!(h.engine.builds.load(Ordering::SeqCst), 1);

    let second = h.builder.build(h.request()).await.unwrap();
    assert_eq!(second.build_id, first.build_id);
    assert_eq!(second.meta, first.meta);
    // neither the installer nor the engine ran again
    assert_eq!(h.tarball_installs(), installs);
    assert_eq!(h.engine.builds.load(Ordering::SeqCst), 1);

    std::fs::remove_dir_all(&h.storage).ok();
}

#[tokio::test]
async fn losing_the_blob_layer_triggers_a_rebuild() {
    let h = Harness::new("heal-blob", "1.3.2").await;

    h.builder.build(h.request()).await.unwrap();
    std::fs::remove_file(h.js_blob(&h.build_id())).unwrap();

    let out = h.builder.build(h.request()).await.unwrap();
    assert_eq!(out.build_id, h.build_id());
    assert_eq!(h.engine.builds.load(Ordering::SeqCst), 2);
    assert!(h.js_blob(&h.build_id()).exists());

    std::fs::remove_dir_all(&h.storage).ok();
}

#[tokio::test]
async fn losing_the_cache_record_rebuilds_and_overwrites_the_blobs() {
    let h = Harness::new("heal-record", "1.3.3").await;

    h.builder.build(h.request()).await.unwrap();
    std::fs::remove_file(h.storage.join("meta").join(format!("{}.json", h.build_id()))).unwrap();

    let out = h.builder.build(h.request()).await.unwrap();
    assert_eq!(out.build_id, h.build_id());
    assert_eq!(out.meta.export_names, vec!["leftPad"]);
    assert_eq!(h.engine.builds.load(Ordering::SeqCst), 2);

    let artifact = String::from_utf8(std::fs::read(h.js_blob(&h.build_id())).unwrap()).unwrap();
    assert!(!artifact.contains("esm_sh_external://"));

    std::fs::remove_dir_all(&h.storage).ok();
}
