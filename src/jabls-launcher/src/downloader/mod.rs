//! Server archive provisioning: freshness check, download, extraction.

pub mod archive;
pub mod core;
pub mod http;
pub mod metadata;
#[cfg(test)]
mod tests;
pub mod types;

pub use core::BinaryProvisioner;
pub use metadata::{FreshnessRecord, MetadataStore};
pub use types::{ProgressCallback, ProvisionOutcome};
