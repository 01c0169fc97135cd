//! Integration tests for exit-check
//!
//! This module exercises the public API end to end.
//!
//! # Test Organization
//!
//! - `matching`: Evaluation semantics against a straightforward per-policy reference
//! - `reload`: Generation swap, failed reloads and concurrent readers
//! - `loading`: JSON-lines datasets and configuration-driven setup
//!
//! # Test Requirements
//!
//! - No network access; file-backed tests use `tempfile`
//! - Fixtures live under `tests/fixtures/`

pub mod loading;
pub mod matching;
pub mod reload;

use std::net::IpAddr;
use std::path::PathBuf;

/// Path of a file under `tests/fixtures`
pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Parse an address literal
pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}
