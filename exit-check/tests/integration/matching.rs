//! Matching semantics tests
//!
//! The indexed engine only ever sees rules covering the queried port, sorted
//! by policy and position. These tests check it against `Policy::verdict`,
//! which walks every rule of one policy in order, over generated datasets,
//! plus the hand-written corner cases the skip rule is most sensitive to.

use std::net::IpAddr;

use exit_check::policy::{compile_policies, Disposition, Mask, PolicyRecord, RuleRecord};
use exit_check::ExitIndex;

use super::ip;

// ============================================================================
// Dataset generation
// ============================================================================

/// Small deterministic generator so failures reproduce
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }

    fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        &items[(self.next() as usize) % items.len()]
    }
}

const NETWORKS: &[&str] = &[
    "10.0.0.0/8",
    "10.1.0.0/16",
    "192.0.2.0/24",
    "38.229.0.0/16",
    "38.229.70.31",
    "2001:db8::/32",
    "0.0.0.0/0",
];

const PORT_BOUNDS: &[i64] = &[0, 1, 22, 53, 80, 443, 444, 1024, 8080, 65535];

const QUERY_ADDRESSES: &[&str] = &[
    "10.1.2.3",
    "10.2.2.2",
    "192.0.2.55",
    "38.229.70.31",
    "8.8.8.8",
    "2001:db8::1",
    "2001:db9::1",
    "::ffff:10.1.2.3",
];

const QUERY_PORTS: &[u16] = &[0, 1, 21, 22, 53, 79, 80, 81, 443, 444, 1024, 8080, 65535];

fn generate(seed: u64, policies: usize) -> Vec<PolicyRecord> {
    let mut rng = Lcg(seed);
    (0..policies)
        .map(|i| {
            let mut record = PolicyRecord::new(format!("100.64.{}.{}", i / 256, i % 256));
            let rules = rng.next() % 8;
            for _ in 0..rules {
                let is_accept = rng.next() % 2 == 0;
                let a = *rng.pick(PORT_BOUNDS);
                let b = *rng.pick(PORT_BOUNDS);
                let (min, max) = if a <= b { (a, b) } else { (b, a) };
                let rule = if rng.next() % 3 == 0 {
                    RuleRecord::wildcard(is_accept, min, max)
                } else {
                    RuleRecord::network(*rng.pick(NETWORKS), is_accept, min, max)
                };
                record = record.with_rule(rule);
            }
            record
        })
        .collect()
}

fn assert_agrees_with_reference(records: Vec<PolicyRecord>) {
    let policies = compile_policies(records.clone()).unwrap();
    let index = ExitIndex::default();
    index.load_records(records).unwrap();

    for address in QUERY_ADDRESSES {
        for &port in QUERY_PORTS {
            let expected: Vec<IpAddr> = policies
                .iter()
                .filter(|p| p.verdict(ip(address), port) == Some(Disposition::Accept))
                .map(|p| p.address())
                .collect();
            assert_eq!(index.exits_for(ip(address), port), expected, "{address} port {port}");
        }
    }
}

// ============================================================================
// Reference agreement
// ============================================================================

#[test]
fn test_generated_datasets_agree_with_reference() {
    for seed in 1..=20 {
        assert_agrees_with_reference(generate(seed, 80));
    }
}

#[test]
fn test_large_dataset_agrees_with_reference() {
    assert_agrees_with_reference(generate(0xDEAD_BEEF, 1500));
}

#[test]
fn test_emitted_in_ascending_policy_order() {
    let index = ExitIndex::default();
    index.load_records(generate(7, 200)).unwrap();

    let generation = index.snapshot();
    for &port in QUERY_PORTS {
        let mut ids = Vec::new();
        generation.evaluate(ip("8.8.8.8"), port, |line| {
            let text = std::str::from_utf8(line).unwrap();
            assert!(text.ends_with('\n'));
            let relay: IpAddr = text.trim_end().parse().unwrap();
            let id = generation
                .policies()
                .iter()
                .position(|p| p.address() == relay)
                .unwrap();
            ids.push(id);
        });
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "port {port}: {ids:?}");
    }
}

// ============================================================================
// Corner cases
// ============================================================================

#[test]
fn test_single_wildcard_accept_emits_once() {
    let index = ExitIndex::default();
    index
        .load_records(vec![
            PolicyRecord::new("192.0.2.1").with_rule(RuleRecord::wildcard(true, 1, 65535))
        ])
        .unwrap();

    for address in ["8.8.8.8", "10.0.0.1", "2001:db8::1"] {
        for port in [1, 80, 443, 65535] {
            let mut out = Vec::new();
            index.evaluate(ip(address), port, |line| out.push(line.to_vec()));
            assert_eq!(out, vec![b"192.0.2.1\n".to_vec()]);
        }
    }
}

#[test]
fn test_reject_then_accept_in_next_policy() {
    let index = ExitIndex::default();
    index
        .load_records(vec![
            PolicyRecord::new("192.0.2.1").with_rule(RuleRecord::network("10.0.0.0/8", false, 80, 80)),
            PolicyRecord::new("192.0.2.2").with_rule(RuleRecord::wildcard(true, 80, 80)),
        ])
        .unwrap();

    let mut out = Vec::new();
    index.evaluate(ip("10.0.0.5"), 80, |line| out.extend_from_slice(line));
    assert_eq!(out, b"192.0.2.2\n");
}

#[test]
fn test_single_port_boundaries() {
    let index = ExitIndex::default();
    index
        .load_records(vec![
            PolicyRecord::new("192.0.2.1").with_rule(RuleRecord::wildcard(true, 443, 443))
        ])
        .unwrap();

    assert_eq!(index.exits_for(ip("8.8.8.8"), 443), vec![ip("192.0.2.1")]);
    assert!(index.exits_for(ip("8.8.8.8"), 442).is_empty());
    assert!(index.exits_for(ip("8.8.8.8"), 444).is_empty());
}

#[test]
fn test_dotted_and_prefix_masks_are_equivalent() {
    let dotted = PolicyRecord::new("192.0.2.1").with_rule(
        RuleRecord::network("10.1.0.0", true, 1, 65535).with_mask(Mask::Text("255.255.0.0".into())),
    );
    let numeric = PolicyRecord::new("192.0.2.2")
        .with_rule(RuleRecord::network("10.1.0.0", true, 1, 65535).with_mask(Mask::Prefix(16)));
    let cidr = PolicyRecord::new("192.0.2.3").with_rule(RuleRecord::network("10.1.0.0/16", true, 1, 65535));

    let index = ExitIndex::default();
    index.load_records(vec![dotted, numeric, cidr]).unwrap();

    assert_eq!(index.exits_for(ip("10.1.200.1"), 80).len(), 3);
    assert!(index.exits_for(ip("10.2.0.1"), 80).is_empty());
}

#[test]
fn test_policy_without_rules_is_silent() {
    let index = ExitIndex::default();
    index
        .load_records(vec![
            PolicyRecord::new("192.0.2.1"),
            PolicyRecord::new("192.0.2.2").with_rule(RuleRecord::wildcard(true, 1, 65535)),
        ])
        .unwrap();
    assert_eq!(index.exits_for(ip("8.8.8.8"), 80), vec![ip("192.0.2.2")]);
}
