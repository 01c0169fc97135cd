//! First-decisive-rule evaluation across many policies
//!
//! [`evaluate`] walks a rule sequence that is already restricted to one port
//! and sorted canonically (ascending policy id, then rule position). For each
//! policy the first rule whose address predicate matches decides that
//! policy's verdict; remaining rules of a decided policy are skipped.
//!
//! A policy with no matching rule contributes nothing. It is not treated as
//! an implicit reject.

use std::net::IpAddr;

use bytes::Bytes;

use super::types::{canonical_address, AddressSpec, Disposition, Policy, Rule, RuleRef};

/// Self-contained copy of a rule, prepared for evaluation
///
/// Resolved rule sequences are cached per port, so each entry carries what
/// evaluation and the accept sink need without going back to its policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRule {
    /// Owning policy and position
    pub owner: RuleRef,
    /// Address predicate
    pub address: AddressSpec,
    /// Verdict when matched
    pub disposition: Disposition,
    /// Owning relay's address
    pub relay: IpAddr,
    /// Owning relay's address followed by a newline
    pub address_line: Bytes,
}

impl MatchRule {
    /// Prepare `rule` of `policy` for evaluation
    #[must_use]
    pub fn new(policy: &Policy, rule: &Rule) -> Self {
        Self {
            owner: rule.owner,
            address: rule.address,
            disposition: rule.disposition,
            relay: policy.address(),
            address_line: policy.address_line().clone(),
        }
    }

    /// Id of the owning policy
    #[must_use]
    pub const fn policy_id(&self) -> u32 {
        self.owner.policy
    }

    /// Check if `address` satisfies the rule's address predicate
    #[must_use]
    pub fn is_match(&self, address: IpAddr) -> bool {
        self.address.matches(address)
    }
}

/// Evaluate `rules` against `address`, reporting each accepting rule
///
/// `rules` must be sorted canonically; the skip over decided policies relies
/// on all rules of one policy being contiguous and policy ids ascending.
/// `on_accept` is called once per policy whose deciding rule accepts, in
/// ascending policy order.
///
/// # Example
///
/// ```
/// use exit_check::policy::{evaluate, AddressSpec, Disposition, MatchRule, Policy, PortRange};
///
/// let policy = Policy::new(0, "192.0.2.1".parse().unwrap())
///     .with_rule(AddressSpec::network("10.0.0.0/8".parse().unwrap()), PortRange::all(), Disposition::Reject)
///     .with_rule(AddressSpec::Any, PortRange::all(), Disposition::Accept);
/// let rules: Vec<MatchRule> = policy.rules().iter().map(|r| MatchRule::new(&policy, r)).collect();
///
/// let mut accepted = 0;
/// evaluate(&rules, "10.1.1.1".parse().unwrap(), |_| accepted += 1);
/// assert_eq!(accepted, 0);
///
/// evaluate(&rules, "8.8.8.8".parse().unwrap(), |_| accepted += 1);
/// assert_eq!(accepted, 1);
/// ```
pub fn evaluate<'a>(rules: &'a [MatchRule], address: IpAddr, mut on_accept: impl FnMut(&'a MatchRule)) {
    let address = canonical_address(address);
    let mut last_decided: Option<u32> = None;

    for rule in rules {
        if last_decided.is_some_and(|decided| rule.policy_id() <= decided) {
            continue;
        }

        if rule.is_match(address) {
            last_decided = Some(rule.policy_id());
            if rule.disposition.is_accept() {
                on_accept(rule);
            }
        }
    }
}
