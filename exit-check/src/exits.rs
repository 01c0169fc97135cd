//! Dataset lifecycle with atomic generation swap
//!
//! [`ExitIndex`] owns the active [`Generation`]: the policies of one dataset,
//! the interval index over their port ranges, the per-port cache and the
//! derived known-exit set. Readers load the active generation through
//! `ArcSwap` without locking; a reload builds the next generation off to the
//! side and publishes it with a single pointer swap.
//!
//! # Architecture
//!
//! ```text
//! Query  -> ExitIndex::evaluate() -> ArcSwap::load() -> Generation -> PortCache -> evaluate()
//!                                          |
//!                                   (lock-free read)
//!
//! Reload -> PolicySource::records() -> compile -> build index -> probe -> ArcSwap::store()
//!                                                                              |
//!                                                       old generation dropped when readers finish
//! ```
//!
//! A failed reload never touches the active generation, so the index keeps
//! answering from the last good dataset indefinitely.
//!
//! # Example
//!
//! ```
//! use exit_check::exits::ExitIndex;
//! use exit_check::policy::{PolicyRecord, RuleRecord};
//!
//! let index = ExitIndex::default();
//! index
//!     .load_records(vec![
//!         PolicyRecord::new("198.51.100.7")
//!             .with_rule(RuleRecord::network("10.0.0.0/8", false, 1, 65535))
//!             .with_rule(RuleRecord::wildcard(true, 1, 65535)),
//!         PolicyRecord::new("203.0.113.4").with_rule(RuleRecord::wildcard(true, 80, 80)),
//!     ])
//!     .unwrap();
//!
//! let exits = index.exits_for("10.0.0.5".parse().unwrap(), 80);
//! assert_eq!(exits, vec!["203.0.113.4".parse::<std::net::IpAddr>().unwrap()]);
//!
//! assert!(index.is_known_exit("198.51.100.7".parse().unwrap()));
//! assert!(!index.is_known_exit("203.0.113.4".parse().unwrap()));
//! ```

use std::collections::HashSet;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::{ArcSwap, Guard};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{BuildError, ConfigError, ExitCheckError, LoadError, QueryError};
use crate::index::{Interval, IntervalIndex, DEFAULT_MAX_INTERVALS};
use crate::policy::{
    canonical_address, compile_policies, matcher, MatchRule, Policy, PolicyRecord, PortCache,
    PortCacheStatsSnapshot, ResolvedRules, Rule, RuleRef,
};
use crate::source::{JsonLinesFile, PolicySource};

/// Probe destination address used to derive the known-exit set
pub const DEFAULT_PROBE_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(38, 229, 70, 31));

/// Probe destination port used to derive the known-exit set
pub const DEFAULT_PROBE_PORT: u16 = 443;

/// Initial capacity of the interval buffer when building a generation
pub const DEFAULT_INITIAL_CAPACITY: usize = 30_000;

/// Check if `port` is a valid query port (0-65535 inclusive)
#[must_use]
pub fn valid_port(port: i64) -> bool {
    (0..=i64::from(u16::MAX)).contains(&port)
}

/// Validate textual query input
///
/// # Errors
///
/// Returns `QueryError::InvalidAddress` if `address` is not an IP address
/// and `QueryError::InvalidPort` if `port` is outside 0-65535.
///
/// # Example
///
/// ```
/// use exit_check::exits::parse_query;
/// use exit_check::error::QueryError;
///
/// let (address, port) = parse_query("203.0.113.9", 443).unwrap();
/// assert_eq!(address.to_string(), "203.0.113.9");
/// assert_eq!(port, 443);
///
/// assert_eq!(parse_query("203.0.113.9", 65536), Err(QueryError::InvalidPort(65536)));
/// assert!(parse_query("example.com", 80).is_err());
/// ```
pub fn parse_query(address: &str, port: i64) -> Result<(IpAddr, u16), QueryError> {
    let parsed = address
        .trim()
        .parse::<IpAddr>()
        .map_err(|_| QueryError::InvalidAddress(address.to_string()))?;
    let port = u16::try_from(port).map_err(|_| QueryError::InvalidPort(port))?;
    Ok((canonical_address(parsed), port))
}

/// Parameters applied to every load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSettings {
    /// Interval index construction limit
    pub max_intervals: usize,
    /// Initial capacity of the interval buffer
    pub initial_capacity: usize,
    /// Destination probed to derive the known-exit set
    pub probe: SocketAddr,
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            max_intervals: DEFAULT_MAX_INTERVALS,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            probe: SocketAddr::new(DEFAULT_PROBE_ADDRESS, DEFAULT_PROBE_PORT),
        }
    }
}

/// One complete, immutable dataset snapshot
///
/// The port cache is the only part filled after construction, and only
/// with values fully determined by the rest of the generation.
pub struct Generation {
    number: u64,
    policies: Vec<Policy>,
    index: IntervalIndex<RuleRef>,
    cache: PortCache,
    known_exits: HashSet<IpAddr>,
    loaded_at: DateTime<Utc>,
    rule_count: usize,
}

impl Generation {
    /// Create an empty generation; every query is a no-match
    #[must_use]
    pub fn empty(number: u64) -> Self {
        Self {
            number,
            policies: Vec::new(),
            index: IntervalIndex::default(),
            cache: PortCache::new(),
            known_exits: HashSet::new(),
            loaded_at: Utc::now(),
            rule_count: 0,
        }
    }

    /// Build a generation from compiled policies and run the probe
    ///
    /// # Errors
    ///
    /// Returns `BuildError::NonSequentialPolicyId` unless every policy's id
    /// equals its position in `policies`, and `BuildError::TooManyIntervals`
    /// or `BuildError::InvalidInterval` if the interval index cannot be
    /// constructed.
    pub fn build(number: u64, policies: Vec<Policy>, settings: &LoadSettings) -> Result<Self, BuildError> {
        // Rule lookups index `policies` by id
        if let Some((index, policy)) = policies
            .iter()
            .enumerate()
            .find(|(index, policy)| usize::try_from(policy.id()) != Ok(*index))
        {
            return Err(BuildError::NonSequentialPolicyId {
                index,
                id: policy.id(),
            });
        }

        let total: usize = policies.iter().map(|p| p.rules().len()).sum();
        if total > settings.max_intervals {
            return Err(BuildError::TooManyIntervals {
                count: total,
                limit: settings.max_intervals,
            });
        }

        let mut intervals = Vec::with_capacity(settings.initial_capacity.min(total));
        for policy in &policies {
            intervals.extend(
                policy
                    .rules()
                    .iter()
                    .map(|rule| Interval::new(rule.ports.min, rule.ports.max, rule.owner)),
            );
        }
        let rule_count = intervals.len();
        let index = IntervalIndex::with_limit(intervals, settings.max_intervals)?;

        let mut generation = Self {
            number,
            policies,
            index,
            cache: PortCache::new(),
            known_exits: HashSet::new(),
            loaded_at: Utc::now(),
            rule_count,
        };
        generation.known_exits = generation
            .accepting_relays(settings.probe.ip(), settings.probe.port())
            .into_iter()
            .collect();

        Ok(generation)
    }

    /// Rules covering `port` in canonical order, memoized per port
    pub fn resolve(&self, port: u16) -> ResolvedRules {
        self.cache.get_or_resolve(port, || {
            let mut owners: Vec<RuleRef> = self.index.query(port).into_iter().copied().collect();
            owners.sort_unstable();
            owners
                .into_iter()
                .filter_map(|owner| self.lookup(owner))
                .map(|(policy, rule)| MatchRule::new(policy, rule))
                .collect()
        })
    }

    /// Stream the address line of every relay accepting `address:port`
    pub fn evaluate(&self, address: IpAddr, port: u16, mut sink: impl FnMut(&[u8])) {
        let rules = self.resolve(port);
        matcher::evaluate(&rules, address, |rule| sink(&rule.address_line[..]));
    }

    /// Relay addresses accepting `address:port`, in policy order
    #[must_use]
    pub fn accepting_relays(&self, address: IpAddr, port: u16) -> Vec<IpAddr> {
        let rules = self.resolve(port);
        let mut relays = Vec::new();
        matcher::evaluate(&rules, address, |rule| relays.push(rule.relay));
        relays
    }

    /// Check if `address` accepted the load-time probe
    #[must_use]
    pub fn is_known_exit(&self, address: IpAddr) -> bool {
        self.known_exits.contains(&canonical_address(address))
    }

    /// Generation number; 0 is the empty generation
    #[must_use]
    pub const fn number(&self) -> u64 {
        self.number
    }

    /// Time this generation was built
    #[must_use]
    pub const fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Policies in id order
    #[must_use]
    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    /// Look up a policy by id
    #[must_use]
    pub fn policy(&self, id: u32) -> Option<&Policy> {
        self.policies.get(id as usize)
    }

    /// Port cache statistics
    #[must_use]
    pub fn cache_stats(&self) -> PortCacheStatsSnapshot {
        self.cache.stats()
    }

    /// Summary statistics
    #[must_use]
    pub fn stats(&self) -> GenerationStats {
        GenerationStats {
            generation: self.number,
            policies: self.policies.len(),
            rules: self.rule_count,
            known_exits: self.known_exits.len(),
            cached_ports: self.cache.len(),
            loaded_at: self.loaded_at,
        }
    }

    fn lookup(&self, owner: RuleRef) -> Option<(&Policy, &Rule)> {
        let policy = self.policy(owner.policy)?;
        policy.rule(owner.position).map(|rule| (policy, rule))
    }
}

impl std::fmt::Debug for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generation")
            .field("number", &self.number)
            .field("policies", &self.policies.len())
            .field("rules", &self.rule_count)
            .field("known_exits", &self.known_exits.len())
            .field("cached_ports", &self.cache.len())
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

/// Statistics about a generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationStats {
    /// Generation number
    pub generation: u64,
    /// Number of policies
    pub policies: usize,
    /// Number of rules across all policies
    pub rules: usize,
    /// Size of the known-exit set
    pub known_exits: usize,
    /// Ports resolved so far
    pub cached_ports: usize,
    /// Load time
    pub loaded_at: DateTime<Utc>,
}

/// Hot-reloadable exit policy index
///
/// # Thread Safety
///
/// Queries are lock-free and never block on a reload. Loads are serialized
/// by an internal mutex so generation numbers increase monotonically.
pub struct ExitIndex {
    current: ArcSwap<Generation>,
    source: Option<Box<dyn PolicySource>>,
    settings: LoadSettings,
    reload_lock: Mutex<()>,
}

impl ExitIndex {
    /// Create an index without a source, serving the empty generation
    #[must_use]
    pub fn new(settings: LoadSettings) -> Self {
        Self {
            current: ArcSwap::from_pointee(Generation::empty(0)),
            source: None,
            settings,
            reload_lock: Mutex::new(()),
        }
    }

    /// Create an index that reloads from `source`
    ///
    /// Nothing is read until the first [`reload`](Self::reload).
    #[must_use]
    pub fn with_source(source: impl PolicySource + 'static, settings: LoadSettings) -> Self {
        Self {
            source: Some(Box::new(source)),
            ..Self::new(settings)
        }
    }

    /// Create an index reading the dataset file named by `config`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the index or probe settings are invalid.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let settings = config.load_settings()?;
        Ok(Self::with_source(JsonLinesFile::new(config.policies_path()), settings))
    }

    /// Load an in-memory record sequence as the next generation
    ///
    /// # Errors
    ///
    /// Returns `LoadError::Parse` for the first malformed record and
    /// `LoadError::Build` if the index cannot be built. The active
    /// generation is unchanged on error.
    pub fn load_records<I>(&self, records: I) -> Result<GenerationStats, LoadError>
    where
        I: IntoIterator<Item = PolicyRecord>,
    {
        let _guard = self.reload_lock.lock();
        self.activate(records, "records")
    }

    /// Re-read the configured source and load it as the next generation
    ///
    /// # Errors
    ///
    /// Returns `LoadError::NoSource` without a source, otherwise any error
    /// from reading, parsing or building. The active generation is
    /// unchanged on error.
    pub fn reload(&self) -> Result<GenerationStats, LoadError> {
        let source = self.source.as_ref().ok_or(LoadError::NoSource)?;
        let _guard = self.reload_lock.lock();

        let name = source.name();
        let records = match source.records() {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    source = %name,
                    generation = self.generation(),
                    error = %e,
                    "Failed to read policies, keeping current generation"
                );
                return Err(e);
            }
        };
        self.activate(records, &name)
    }

    fn activate<I>(&self, records: I, origin: &str) -> Result<GenerationStats, LoadError>
    where
        I: IntoIterator<Item = PolicyRecord>,
    {
        let started = Instant::now();
        let number = self.current.load().number + 1;

        let built = compile_policies(records)
            .map_err(LoadError::from)
            .and_then(|policies| Generation::build(number, policies, &self.settings).map_err(LoadError::from));

        let generation = match built {
            Ok(generation) => generation,
            Err(e) => {
                warn!(
                    source = %origin,
                    generation = number - 1,
                    error = %e,
                    "Failed to load policies, keeping current generation"
                );
                return Err(e);
            }
        };

        let stats = generation.stats();
        self.current.store(Arc::new(generation));

        info!(
            source = %origin,
            generation = stats.generation,
            policies = stats.policies,
            rules = stats.rules,
            known_exits = stats.known_exits,
            elapsed_ms = started.elapsed().as_millis(),
            "Activated policy generation"
        );

        Ok(stats)
    }

    /// Get the active generation (lock-free read)
    ///
    /// The returned `Guard` keeps the generation alive, so several queries
    /// made through it see the same dataset even across a reload.
    pub fn snapshot(&self) -> Guard<Arc<Generation>> {
        self.current.load()
    }

    /// Stream the address line of every relay accepting `address:port`
    pub fn evaluate(&self, address: IpAddr, port: u16, sink: impl FnMut(&[u8])) {
        self.current.load().evaluate(address, port, sink);
    }

    /// Relay addresses accepting `address:port`, in policy order
    #[must_use]
    pub fn exits_for(&self, address: IpAddr, port: u16) -> Vec<IpAddr> {
        self.current.load().accepting_relays(address, port)
    }

    /// Validate textual input, then write every accepting relay's address line
    ///
    /// Returns the number of lines written.
    ///
    /// # Errors
    ///
    /// Returns `ExitCheckError::Query` for invalid input, before anything is
    /// written, and `ExitCheckError::Io` if the writer fails.
    pub fn dump<W: Write>(&self, writer: &mut W, address: &str, port: i64) -> Result<usize, ExitCheckError> {
        let (address, port) = parse_query(address, port)?;

        let mut written = 0;
        let mut failure = None;
        self.evaluate(address, port, |line| {
            if failure.is_none() {
                match writer.write_all(line) {
                    Ok(()) => written += 1,
                    Err(e) => failure = Some(e),
                }
            }
        });

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(written),
        }
    }

    /// Check if `address` is a known exit relay
    #[must_use]
    pub fn is_known_exit(&self, address: IpAddr) -> bool {
        self.current.load().is_known_exit(address)
    }

    /// Time the active generation was built
    #[must_use]
    pub fn last_load_timestamp(&self) -> DateTime<Utc> {
        self.current.load().loaded_at
    }

    /// Active generation number
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.current.load().number
    }

    /// Statistics about the active generation
    #[must_use]
    pub fn stats(&self) -> GenerationStats {
        self.current.load().stats()
    }

    /// Settings applied to every load
    #[must_use]
    pub const fn settings(&self) -> &LoadSettings {
        &self.settings
    }
}

impl Default for ExitIndex {
    fn default() -> Self {
        Self::new(LoadSettings::default())
    }
}

impl std::fmt::Debug for ExitIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let generation = self.current.load();
        f.debug_struct("ExitIndex")
            .field("generation", &generation.number)
            .field("policies", &generation.policies.len())
            .field("known_exits", &generation.known_exits.len())
            .field("source", &self.source.as_ref().map(|s| s.name()))
            .finish()
    }
}
