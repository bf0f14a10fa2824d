//! Declared-license normalization and classification.
//!
//! - [`spdx`]: SPDX expression parsing, synonym table and known identifiers.
//! - [`processor`]: turns raw declared license strings into one normalized
//!   expression plus the strings that could not be mapped.
//! - [`classifier`]: validated, pairwise-disjoint classification sets
//!   (permissive, copyleft, copyleft-limited, public-domain).

pub mod classifier;
pub mod processor;
pub mod spdx;
