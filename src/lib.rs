//! Dependency-graph resolution through native package managers.
//!
//! Every [`analyzer::PackageManager`] runs its ecosystem's own tooling and
//! normalizes the output into the canonical [`models`]. Declared licenses are
//! normalized by [`license`], provenance by [`artifact`], and the merged graph is
//! checked by [`policy`].

pub mod analyzer;
pub mod artifact;
pub mod config;
pub mod detector;
pub mod license;
pub mod models;
pub mod policy;
pub mod process;
pub mod registry;
pub mod report;
pub mod scanner;
pub mod storage;
