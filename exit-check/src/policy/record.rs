//! Raw policy records and their conversion into [`Policy`] values
//!
//! Records mirror the exporter's JSON-lines output, one relay per line:
//!
//! ```text
//! {"Fingerprint":"…","Address":"198.51.100.7","IsAllowedDefault":false,"Tminus":2,
//!  "Rules":[{"IsAddressWildcard":false,"Address":"10.0.0.0","Mask":"255.0.0.0",
//!            "IsAccept":false,"MinPort":1,"MaxPort":65535}, …]}
//! ```
//!
//! Decoding is lenient about shape (optional metadata, numeric or textual
//! masks) and strict about values: every address, mask and port is checked
//! here so that nothing malformed reaches the index.

use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use super::types::{AddressSpec, Disposition, Policy, PortRange};
use crate::error::{ParseError, RecordError};

/// One relay's exit policy as found in the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyRecord {
    /// Relay fingerprint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    /// Relay exit address
    pub address: String,

    /// Whether the relay's policy allows traffic by default
    #[serde(default)]
    pub is_allowed_default: bool,

    /// Age in hours of the consensus the relay came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tminus: Option<i64>,

    /// Rules in policy order
    #[serde(default)]
    pub rules: Vec<RuleRecord>,
}

/// One rule as found in the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuleRecord {
    /// Rule matches any address
    #[serde(default)]
    pub is_address_wildcard: bool,

    /// Network or host address (may carry a `/prefix`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Netmask or prefix length
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<Mask>,

    /// Accept (true) or reject (false)
    pub is_accept: bool,

    /// First covered port
    pub min_port: i64,

    /// Last covered port
    pub max_port: i64,
}

/// Netmask as it may appear in a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Mask {
    /// Prefix length, e.g. `16`
    Prefix(u8),
    /// Dotted netmask (`255.255.0.0`, `ffff:ffff::`) or prefix length text
    Text(String),
}

impl RuleRecord {
    /// Wildcard rule over a port range
    #[must_use]
    pub const fn wildcard(is_accept: bool, min_port: i64, max_port: i64) -> Self {
        Self {
            is_address_wildcard: true,
            address: None,
            mask: None,
            is_accept,
            min_port,
            max_port,
        }
    }

    /// Network rule over a port range; `network` may be a host or CIDR
    #[must_use]
    pub fn network(network: impl Into<String>, is_accept: bool, min_port: i64, max_port: i64) -> Self {
        Self {
            is_address_wildcard: false,
            address: Some(network.into()),
            mask: None,
            is_accept,
            min_port,
            max_port,
        }
    }

    /// Set the netmask
    #[must_use]
    pub fn with_mask(mut self, mask: Mask) -> Self {
        self.mask = Some(mask);
        self
    }

    fn address_spec(&self, position: usize) -> Result<AddressSpec, RecordError> {
        if self.is_address_wildcard {
            return Ok(AddressSpec::Any);
        }

        let raw = self
            .address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or(RecordError::MissingAddress { position })?;

        if raw.contains('/') {
            let net: IpNet = raw
                .parse()
                .map_err(|_| RecordError::InvalidAddress(raw.to_string()))?;
            if let Some(mask) = &self.mask {
                if mask_prefix(net.addr(), mask)? != net.prefix_len() {
                    return Err(RecordError::InvalidMask(mask_text(mask)));
                }
            }
            return Ok(AddressSpec::network(net));
        }

        let address: IpAddr = raw
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse()
            .map_err(|_| RecordError::InvalidAddress(raw.to_string()))?;

        match &self.mask {
            None => Ok(AddressSpec::host(address)),
            Some(mask) => {
                let prefix = mask_prefix(address, mask)?;
                let net = IpNet::new(address, prefix)
                    .map_err(|_| RecordError::InvalidMask(mask_text(mask)))?;
                Ok(AddressSpec::network(net))
            }
        }
    }
}

fn mask_text(mask: &Mask) -> String {
    match mask {
        Mask::Prefix(p) => p.to_string(),
        Mask::Text(s) => s.clone(),
    }
}

/// Resolve a mask to a prefix length valid for `address`'s family
fn mask_prefix(address: IpAddr, mask: &Mask) -> Result<u8, RecordError> {
    let text = match mask {
        Mask::Prefix(p) => return Ok(*p),
        Mask::Text(s) => s.trim(),
    };

    if let Ok(prefix) = text.parse::<u8>() {
        return Ok(prefix);
    }

    let netmask: IpAddr = text
        .parse()
        .map_err(|_| RecordError::InvalidMask(text.to_string()))?;

    let bits = match (address, netmask) {
        (IpAddr::V4(_), IpAddr::V4(m)) => u128::from(u32::from(m)) << 96,
        (IpAddr::V6(_), IpAddr::V6(m)) => u128::from(m),
        _ => {
            return Err(RecordError::FamilyMismatch {
                address: address.to_string(),
                mask: text.to_string(),
            })
        }
    };

    let ones = bits.leading_ones();
    if bits.count_ones() != ones {
        return Err(RecordError::InvalidMask(text.to_string()));
    }
    // leading_ones of a u128 is at most 128
    #[allow(clippy::cast_possible_truncation)]
    Ok(ones as u8)
}

impl PolicyRecord {
    /// Create a record for the relay at `address`
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            fingerprint: None,
            address: address.into(),
            is_allowed_default: false,
            tminus: None,
            rules: Vec::new(),
        }
    }

    /// Append a rule record
    #[must_use]
    pub fn with_rule(mut self, rule: RuleRecord) -> Self {
        self.rules.push(rule);
        self
    }

    /// Convert the record into a policy with the given id
    ///
    /// # Errors
    ///
    /// Returns the first `RecordError` found in the relay address or any
    /// rule.
    pub fn into_policy(self, id: u32) -> Result<Policy, RecordError> {
        let address: IpAddr = self
            .address
            .trim()
            .parse()
            .map_err(|_| RecordError::InvalidAddress(self.address.clone()))?;

        let mut policy = Policy::new(id, address).with_allowed_default(self.is_allowed_default);
        if let Some(fingerprint) = self.fingerprint {
            policy = policy.with_fingerprint(fingerprint);
        }
        if let Some(tminus) = self.tminus {
            policy = policy.with_tminus(tminus);
        }

        for (position, rule) in self.rules.iter().enumerate() {
            let spec = rule.address_spec(position)?;
            let ports = PortRange::from_bounds(rule.min_port, rule.max_port)?;
            policy.push_rule(spec, ports, Disposition::from_accept(rule.is_accept));
        }

        Ok(policy)
    }
}

/// Convert records into policies, numbering them 0, 1, 2, … in source order
///
/// # Errors
///
/// Returns a `ParseError` for the first malformed record; no policies are
/// returned in that case.
pub fn compile_policies<I>(records: I) -> Result<Vec<Policy>, ParseError>
where
    I: IntoIterator<Item = PolicyRecord>,
{
    let records = records.into_iter();
    let mut policies = Vec::with_capacity(records.size_hint().0);

    for (position, record) in records.enumerate() {
        let id = u32::try_from(position)
            .map_err(|_| ParseError::new(position, RecordError::TooManyPolicies))?;
        let policy = record
            .into_policy(id)
            .map_err(|e| ParseError::new(position, e))?;
        policies.push(policy);
    }

    Ok(policies)
}
