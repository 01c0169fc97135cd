//! exit-check: exit-policy index for exit relays
//!
//! This crate answers one question over a directory of published exit
//! policies: which exit relays can originate traffic to a given destination
//! address and port? It also keeps the set of relays that reach a fixed
//! probe destination, for cheap "is this address an exit" lookups.
//!
//! # Features
//!
//! - **Interval Index**: Port-range stabbing over the 16-bit port space
//! - **First-Match Semantics**: Per-relay firewall-style rule evaluation
//! - **Per-Port Cache**: Resolved rule sequences memoized lazily per port
//! - **Hot Reload**: Whole-dataset replacement with an atomic generation swap
//!
//! # Architecture
//!
//! ```text
//! PolicySource → compile_policies → IntervalIndex ─┐
//!                                                  ├→ Generation → ArcSwap (ExitIndex)
//!                        known-exit probe ─────────┘        ↓
//!                                                    PortCache → evaluate → sink
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use exit_check::config::load_config;
//! use exit_check::ExitIndex;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("/etc/exit-check/config.json")?;
//! let index = ExitIndex::from_config(&config)?;
//! index.reload()?;
//!
//! for relay in index.exits_for("203.0.113.9".parse()?, 443) {
//!     println!("{relay}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`error`]: Error types
//! - [`exits`]: Dataset lifecycle and queries
//! - [`index`]: Closed-interval stabbing index
//! - [`policy`]: Policy model, record decoding, matching and caching
//! - [`source`]: Policy record sources

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod error;
pub mod exits;
pub mod index;
pub mod policy;
pub mod source;

// Re-export commonly used types at the crate root
pub use config::Config;
pub use error::{BuildError, ConfigError, ExitCheckError, LoadError, ParseError, QueryError, RecordError};
pub use exits::{parse_query, valid_port, ExitIndex, Generation, GenerationStats, LoadSettings};
pub use index::{Interval, IntervalIndex};
pub use policy::{AddressSpec, Disposition, Policy, PolicyRecord, PortRange, Rule, RuleRecord};
pub use source::{JsonLinesFile, PolicySource, StaticSource};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
