//! Core type definitions for the harness.
//!
//! - [`config`] - Harness configuration types
//!
//! # Re-exports
//!
//! ```
//! use oauth_harness::types::{HarnessConfig, PollerConfig};
//! ```

pub mod config;

pub use config::{
    AuthServerConfig, DirectoryConfig, FixtureConfig, HarnessConfig, HttpConfig, PollerConfig,
};
