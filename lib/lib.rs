//! `portside` is a self-hosted OCI Distribution registry that doubles as a
//! pull-through cache for upstream registries.
//!
//! # Overview
//!
//! portside stores container images and Helm charts on a single
//! content-addressed blob store and serves them over the OCI
//! Distribution v1.0 wire protocol. For repositories under the `proxy/`
//! namespace it transparently fetches missing content from a configured
//! upstream registry, caches it, and serves it to the client.
//!
//! # Key Features
//!
//! - **Content-addressed storage**: blobs live under their sha256 digest and
//!   are never rewritten
//! - **Byte-exact manifests**: manifest bytes are persisted exactly as
//!   received, so digests stay stable
//! - **Pull-through caching**: upstream manifests and blobs are cached on
//!   first access, with bearer-token negotiation against the upstream
//! - **Helm support**: chart layers are unpacked into a browsable chart
//!   catalog with a regenerated repository index
//! - **LRU cache accounting**: per-entry metadata files drive size-bounded
//!   eviction of cached tags
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`config`] - Configuration types and validation
//! - [`helm`] - Chart extraction, catalog, and repository index
//! - [`oci`] - Digests, media types, manifest parsing, input validation
//! - [`proxy`] - Upstream client, pull-through engine, cache ledger
//! - [`server`] - HTTP wire surface
//! - [`store`] - Blob, manifest, and image metadata stores
//! - [`utils`] - Common utilities and helpers

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod cli;
pub mod config;
pub mod helm;
pub mod oci;
pub mod proxy;
pub mod server;
pub mod store;
pub mod utils;

pub use error::*;
