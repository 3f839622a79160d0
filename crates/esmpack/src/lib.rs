//! # esmpack
//!
//! The build core of a build-and-serve CDN that publishes registry packages
//! as browser-compatible standards-based module bundles. Given a descriptor,
//! dependency pins, an engine baseline and a development flag, it produces a
//! self-contained module artifact that re-exports the package's public
//! surface, rewrites every dependency import to a canonical URL, injects
//! polyfills for platform-provided server modules, and persists the result in
//! a content-addressed cache keyed by a deterministic build identifier.
//!
//! The HTTP front-end, the embedded bundler engine and the declaration
//! transform are collaborators behind seams: requests arrive as
//! [`builder::BuildRequest`] values, bundling runs behind
//! [`bundler::BundleEngine`], and declaration trees are delegated to a
//! [`dts::DeclarationCopier`].

pub mod builder;
pub mod bundler;
pub mod cache;
pub mod cli;
pub mod config;
pub mod descriptor;
pub mod dts;
pub mod error;
pub mod installer;
pub mod npm;
pub mod polyfill;
pub mod registry;
pub mod resolver;
pub mod rewriter;
pub mod scanner;
pub mod store;

pub use builder::{BuildOutput, BuildRequest, Builder};
pub use bundler::{build_identifier, BundleEngine, Target};
pub use config::{Config, SCHEMA_VERSION};
pub use descriptor::{parse_package_path, PackageDescriptor, PinSet};
pub use error::{EsmpackError, Result};
pub use resolver::ResolvedMeta;
