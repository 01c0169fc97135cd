//! Exit policy model and evaluation
//!
//! This module provides:
//! - Policy and rule types with first-match verdicts
//! - Decoding of raw policy records from the exporter format
//! - Evaluation of a per-port rule sequence across many policies
//! - A per-port cache of resolved rule sequences
//!
//! # Architecture
//!
//! Each relay's exit policy is an ordered list of rules. For a destination
//! `(address, port)` the first rule covering the port whose address predicate
//! matches decides the relay's verdict. Policies are numbered in source order
//! and rules keep their position, so `(policy, position)` is a total order
//! over all rules in a dataset.
//!
//! ```text
//! PolicyRecord --compile_policies--> Vec<Policy> --index by port--> [MatchRule] --evaluate--> accepts
//! ```
//!
//! # Example
//!
//! ```
//! use exit_check::policy::{compile_policies, PolicyRecord, RuleRecord};
//!
//! let records = vec![
//!     PolicyRecord::new("198.51.100.7")
//!         .with_rule(RuleRecord::network("10.0.0.0/8", false, 1, 65535))
//!         .with_rule(RuleRecord::wildcard(true, 80, 443)),
//! ];
//!
//! let policies = compile_policies(records).unwrap();
//! let relay = &policies[0];
//! assert_eq!(relay.id(), 0);
//! assert_eq!(relay.rules().len(), 2);
//!
//! assert!(relay.verdict("8.8.8.8".parse().unwrap(), 443).is_some_and(|d| d.is_accept()));
//! assert!(relay.verdict("10.1.2.3".parse().unwrap(), 443).is_some_and(|d| !d.is_accept()));
//! assert!(relay.verdict("8.8.8.8".parse().unwrap(), 22).is_none());
//! ```

pub mod cache;
pub mod matcher;
pub mod record;
pub mod types;

pub use cache::{PortCache, PortCacheStats, PortCacheStatsSnapshot, ResolvedRules};
pub use matcher::{evaluate, MatchRule};
pub use record::{compile_policies, Mask, PolicyRecord, RuleRecord};
pub use types::{canonical_address, AddressSpec, Disposition, Policy, PortRange, Rule, RuleRef};
