//! # Strata Testkit
//!
//! Test utilities for strata.
//!
//! This crate provides:
//! - [`TestAggregator`]: an aggregator over a temp dir and in-memory hot store
//! - Property-based test generators using proptest
//! - [`CrashableHotStore`]: a hot store that fails commits on demand
//! - [`Model`]: a reference model of domain history to compare reads against
//! - [`DigestCommitment`] and [`MemBlockFreezer`] collaborator stand-ins
//!
//! ## Usage
//!
//! ```rust,ignore
//! use strata_testkit::prelude::*;
//!
//! #[test]
//! fn freeze_keeps_values() {
//!     let t = TestAggregator::new();
//!     t.write(&[Change::put("accounts", b"a", b"1", 3)]).unwrap();
//!     t.agg.build_files(10, &CancelToken::new()).unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod collaborators;
pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod model;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::collaborators::*;
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::model::*;
    pub use strata_core::CancelToken;
}

pub use collaborators::*;
pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use model::*;
