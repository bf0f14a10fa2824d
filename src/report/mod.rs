//! Report renderers for analysis results.
//!
//! - [`terminal`]: colored summary box and tables; respects `--verbose` / `--quiet`.
//! - [`json`]: the full [`json::RunReport`] as pretty-printed JSON.

pub mod json;
pub mod terminal;
