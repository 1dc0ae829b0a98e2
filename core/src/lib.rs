//! Core of the remote-sync tool.
//!
//! Resolves which sync configuration governs a local path, maps paths
//! between the local and remote trees, filters them through ignore rules
//! and moves files through a uniform [`files::FileSystem`] contract.

pub mod config;
pub mod errors;
pub mod files;
pub mod host;
pub mod ignore;
pub mod paths;
pub mod sync;
