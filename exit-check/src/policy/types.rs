//! Core exit-policy types
//!
//! This module defines the immutable value types an exit-policy dataset is
//! made of:
//! - [`Disposition`]: accept or reject
//! - [`AddressSpec`]: wildcard or concrete IP network
//! - [`PortRange`]: an inclusive port interval
//! - [`Rule`]: one address/port predicate owned by a policy
//! - [`Policy`]: the ordered rule list of one exit relay
//! - [`RuleRef`]: a rule's position in the dataset, ordered canonically

use std::fmt;
use std::net::IpAddr;

use bytes::Bytes;
use ipnet::IpNet;

use crate::error::RecordError;

/// Outcome of a matched rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Traffic may exit
    Accept,
    /// Traffic may not exit
    Reject,
}

impl Disposition {
    /// Map the `IsAccept` flag of a record to a disposition
    #[must_use]
    pub const fn from_accept(is_accept: bool) -> Self {
        if is_accept {
            Self::Accept
        } else {
            Self::Reject
        }
    }

    /// Check if this is an accept disposition
    #[must_use]
    pub const fn is_accept(self) -> bool {
        matches!(self, Self::Accept)
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

/// Address predicate of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpec {
    /// Matches every address
    Any,
    /// Matches addresses inside the network
    Network(IpNet),
}

impl AddressSpec {
    /// Build a network predicate, truncating host bits
    #[must_use]
    pub fn network(net: IpNet) -> Self {
        Self::Network(net.trunc())
    }

    /// Build a single-host predicate (/32 or /128)
    #[must_use]
    pub fn host(address: IpAddr) -> Self {
        Self::Network(IpNet::from(address))
    }

    /// Check if `address` satisfies this predicate
    ///
    /// Networks only contain addresses of their own family; callers should
    /// pass addresses through [`canonical_address`] first so IPv4-mapped IPv6
    /// addresses compare as IPv4.
    ///
    /// # Examples
    ///
    /// ```
    /// use exit_check::policy::AddressSpec;
    ///
    /// let net = AddressSpec::network("10.0.0.0/8".parse().unwrap());
    /// assert!(net.matches("10.1.2.3".parse().unwrap()));
    /// assert!(!net.matches("11.0.0.1".parse().unwrap()));
    /// assert!(AddressSpec::Any.matches("2001:db8::1".parse().unwrap()));
    /// ```
    #[must_use]
    pub fn matches(&self, address: IpAddr) -> bool {
        match self {
            Self::Any => true,
            Self::Network(net) => net.contains(&address),
        }
    }

    /// Check if this is the wildcard predicate
    #[must_use]
    pub const fn is_wildcard(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl fmt::Display for AddressSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Network(net) => write!(f, "{net}"),
        }
    }
}

/// Fold IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) into IPv4
#[must_use]
pub fn canonical_address(address: IpAddr) -> IpAddr {
    match address {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map_or(IpAddr::V6(v6), IpAddr::V4),
        v4 @ IpAddr::V4(_) => v4,
    }
}

/// An inclusive range of ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRange {
    /// Start of the range (inclusive)
    pub min: u16,
    /// End of the range (inclusive)
    pub max: u16,
}

impl PortRange {
    /// Create a new port range
    ///
    /// # Errors
    ///
    /// Returns `RecordError::InvalidPortRange` if `min > max`.
    ///
    /// # Examples
    ///
    /// ```
    /// use exit_check::policy::PortRange;
    ///
    /// let range = PortRange::new(80, 443).unwrap();
    /// assert!(range.contains(80));
    /// assert!(range.contains(443));
    /// assert!(!range.contains(8080));
    /// assert!(PortRange::new(443, 80).is_err());
    /// ```
    pub fn new(min: u16, max: u16) -> Result<Self, RecordError> {
        if min > max {
            return Err(RecordError::InvalidPortRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// Create a range from untrusted integers, checking both bounds
    ///
    /// # Errors
    ///
    /// Returns `RecordError::PortOutOfRange` if either bound is outside
    /// 0-65535, or `RecordError::InvalidPortRange` if `min > max`.
    pub fn from_bounds(min: i64, max: i64) -> Result<Self, RecordError> {
        let min = u16::try_from(min).map_err(|_| RecordError::PortOutOfRange(min))?;
        let max = u16::try_from(max).map_err(|_| RecordError::PortOutOfRange(max))?;
        Self::new(min, max)
    }

    /// Create a range for a single port
    #[must_use]
    pub const fn single(port: u16) -> Self {
        Self {
            min: port,
            max: port,
        }
    }

    /// The range covering every port exit policies can name (1-65535)
    #[must_use]
    pub const fn all() -> Self {
        Self { min: 1, max: 65535 }
    }

    /// Check if a port is within this range
    #[must_use]
    pub const fn contains(&self, port: u16) -> bool {
        port >= self.min && port <= self.max
    }

    /// Check if this range represents a single port
    #[must_use]
    pub const fn is_single(&self) -> bool {
        self.min == self.max
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single() {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}

/// Location of a rule inside a dataset
///
/// The derived ordering (policy id, then position in that policy) is the
/// canonical evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleRef {
    /// Id of the owning policy
    pub policy: u32,
    /// Position of the rule in the policy's rule list
    pub position: u32,
}

impl RuleRef {
    /// Create a new rule reference
    #[must_use]
    pub const fn new(policy: u32, position: u32) -> Self {
        Self { policy, position }
    }
}

impl fmt::Display for RuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.policy, self.position)
    }
}

/// A single accept/reject predicate of an exit policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Address predicate
    pub address: AddressSpec,
    /// Covered destination ports
    pub ports: PortRange,
    /// Verdict when the rule matches
    pub disposition: Disposition,
    /// Owning policy and position
    pub owner: RuleRef,
}

impl Rule {
    /// Check if the rule covers `port`
    #[must_use]
    pub const fn covers_port(&self, port: u16) -> bool {
        self.ports.contains(port)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.disposition, self.address, self.ports)
    }
}

/// The ordered exit rules of one relay
///
/// Policies are created once per load and never mutated afterwards.
///
/// # Example
///
/// ```
/// use exit_check::policy::{AddressSpec, Disposition, Policy, PortRange};
///
/// let policy = Policy::new(0, "192.0.2.10".parse().unwrap())
///     .with_rule(AddressSpec::Any, PortRange::single(443), Disposition::Accept)
///     .with_rule(AddressSpec::Any, PortRange::all(), Disposition::Reject);
///
/// assert_eq!(policy.rules().len(), 2);
/// assert_eq!(policy.address_line().as_ref(), b"192.0.2.10\n");
/// assert_eq!(policy.rules()[1].owner.position, 1);
/// ```
#[derive(Debug, Clone)]
pub struct Policy {
    id: u32,
    address: IpAddr,
    address_line: Bytes,
    fingerprint: Option<String>,
    is_allowed_default: bool,
    tminus: Option<i64>,
    rules: Vec<Rule>,
}

impl Policy {
    /// Create an empty policy for the relay at `address`
    ///
    /// The address is stored in canonical form, so an IPv4-mapped relay is
    /// reported and emitted as plain IPv4.
    #[must_use]
    pub fn new(id: u32, address: IpAddr) -> Self {
        let address = canonical_address(address);
        Self {
            id,
            address,
            address_line: Bytes::from(format!("{address}\n")),
            fingerprint: None,
            is_allowed_default: false,
            tminus: None,
            rules: Vec::new(),
        }
    }

    /// Append a rule; its position is the current rule count
    #[must_use]
    pub fn with_rule(mut self, address: AddressSpec, ports: PortRange, disposition: Disposition) -> Self {
        self.push_rule(address, ports, disposition);
        self
    }

    /// Set the relay fingerprint
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Set whether the relay's policy allows traffic by default
    #[must_use]
    pub const fn with_allowed_default(mut self, allowed: bool) -> Self {
        self.is_allowed_default = allowed;
        self
    }

    /// Set the age in hours of the consensus the relay was taken from
    #[must_use]
    pub const fn with_tminus(mut self, hours: i64) -> Self {
        self.tminus = Some(hours);
        self
    }

    pub(crate) fn push_rule(&mut self, address: AddressSpec, ports: PortRange, disposition: Disposition) {
        // Rule counts per policy are tiny; a relay with 4 billion rules cannot
        // be decoded in the first place.
        #[allow(clippy::cast_possible_truncation)]
        let position = self.rules.len() as u32;
        self.rules.push(Rule {
            address,
            ports,
            disposition,
            owner: RuleRef::new(self.id, position),
        });
    }

    /// Policy id (position of the relay in the dataset)
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Relay address
    #[must_use]
    pub const fn address(&self) -> IpAddr {
        self.address
    }

    /// Relay address followed by a newline, as emitted to match sinks
    #[must_use]
    pub const fn address_line(&self) -> &Bytes {
        &self.address_line
    }

    /// Relay fingerprint, if the record carried one
    #[must_use]
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    /// Whether the relay's policy allows traffic by default
    #[must_use]
    pub const fn is_allowed_default(&self) -> bool {
        self.is_allowed_default
    }

    /// Age in hours of the consensus the relay was taken from
    #[must_use]
    pub const fn tminus(&self) -> Option<i64> {
        self.tminus
    }

    /// Rules in their original order
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Look up a rule by position
    #[must_use]
    pub fn rule(&self, position: u32) -> Option<&Rule> {
        self.rules.get(position as usize)
    }

    /// Evaluate this policy alone with full first-match semantics
    ///
    /// Walks every rule in order and returns the disposition of the first
    /// rule covering both the port and the address, or `None` when no rule
    /// matches. The indexed engine produces the same verdict per policy.
    #[must_use]
    pub fn verdict(&self, address: IpAddr, port: u16) -> Option<Disposition> {
        let address = canonical_address(address);
        self.rules
            .iter()
            .find(|r| r.covers_port(port) && r.address.matches(address))
            .map(|r| r.disposition)
    }
}
