//! # txbind Testkit
//!
//! Test utilities for txbind.
//!
//! This crate provides:
//! - Doubles for data sources, connections, session engines and
//!   standalone transactions
//! - A scripted ambient-transaction driver with nesting
//! - An event log for checking callback order
//! - Property-based test generators using proptest
//! - Tracing initialization for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use txbind_testkit::prelude::*;
//!
//! #[test]
//! fn session_is_reused() {
//!     let mut harness = BridgeHarness::new();
//!     harness.driver.begin().unwrap();
//!     let first = harness.acquire().unwrap();
//!     let second = harness.acquire().unwrap();
//!     assert!(std::sync::Arc::ptr_eq(&first, &second));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::logging::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use logging::*;
