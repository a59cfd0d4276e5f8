//! # QuoteSync Testkit
//!
//! Test utilities for QuoteSync.
//!
//! This crate provides:
//! - Quotation fixtures and a builder for divergent copies
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quotesync_testkit::prelude::*;
//!
//! let (local, server) = diverged_pair("empresa", "Old", "New");
//! assert_eq!(server.version, local.version + 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
