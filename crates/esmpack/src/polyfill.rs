//! Polyfill tables for platform-provided server modules.

/// Server-runtime standard-library modules with a std shim on the engine-next
/// target.
pub const ENGINE_STD_NODE_MODULES: &[&str] = &[
    "assert",
    "buffer",
    "child_process",
    "console",
    "constants",
    "crypto",
    "events",
    "fs",
    "module",
    "os",
    "path",
    "process",
    "querystring",
    "stream",
    "string_decoder",
    "timers",
    "tty",
    "url",
    "util",
];

/// Whether the engine-next target ships a std shim for this module name.
pub fn is_engine_std_module(name: &str) -> bool {
    ENGINE_STD_NODE_MODULES.contains(&name)
}

/// Browser polyfill packages for built-in server modules. Values are registry
/// packages, possibly with a subpath.
pub fn polyfill_package(name: &str) -> Option<&'static str> {
    const TABLE: &[(&str, &str)] = &[
        ("assert", "assert"),
        ("console", "console-browserify"),
        ("constants", "constants-browserify"),
        ("crypto", "crypto-browserify"),
        ("domain", "domain-browser"),
        ("events", "events"),
        ("http", "stream-http"),
        ("https", "https-browserify"),
        ("os", "os-browserify/browser"),
        ("path", "path-browserify"),
        ("punycode", "punycode"),
        ("querystring", "querystring-es3"),
        ("stream", "stream-browserify"),
        ("string_decoder", "string_decoder"),
        ("sys", "util"),
        ("timers", "timers-browserify"),
        ("tty", "tty-browserify"),
        ("url", "url"),
        ("util", "util"),
        ("vm", "vm-browserify"),
        ("zlib", "browserify-zlib"),
    ];
    TABLE.iter().find(|(n, _)| *n == name).map(|(_, p)| *p)
}

/// A polyfill module embedded in the binary and served as
/// `/v<SCHEMA>/_node_<name>.js`.
pub struct EmbeddedPolyfill {
    /// Module name (`process`, not `node_process.js`)
    pub name: &'static str,
    /// Module source
    pub source: &'static str,
}

/// Embedded polyfill sources.
pub const EMBEDDED_POLYFILLS: &[EmbeddedPolyfill] = &[
    EmbeddedPolyfill {
        name: "process",
        source: include_str!("../polyfills/node_process.js"),
    },
    EmbeddedPolyfill {
        name: "buffer",
        source: include_str!("../polyfills/node_buffer.js"),
    },
    EmbeddedPolyfill {
        name: "fetch",
        source: include_str!("../polyfills/node_fetch.js"),
    },
    EmbeddedPolyfill {
        name: "readline",
        source: include_str!("../polyfills/node_readline.js"),
    },
];

/// Look up an embedded polyfill by module name.
pub fn embedded_polyfill(name: &str) -> Option<&'static EmbeddedPolyfill> {
    EMBEDDED_POLYFILLS.iter().find(|p| p.name == name)
}
