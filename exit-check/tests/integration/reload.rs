//! Reload tests
//!
//! A reload either publishes a complete new generation or leaves the active
//! one exactly as it was. Readers racing a reload must always see one whole
//! generation.

use std::io::Write;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use exit_check::error::{LoadError, ParseError, RecordError};
use exit_check::policy::{PolicyRecord, RuleRecord};
use exit_check::{ExitIndex, JsonLinesFile, LoadSettings, StaticSource};
use tempfile::NamedTempFile;

use super::{fixture, ip};

const PROBES: &[(&str, u16)] = &[
    ("38.229.70.31", 443),
    ("10.0.0.5", 80),
    ("8.8.8.8", 22),
    ("2001:db8::99", 8080),
    ("8.8.8.8", 0),
];

fn observe(index: &ExitIndex) -> (Vec<Vec<u8>>, Vec<bool>) {
    let lines = PROBES
        .iter()
        .map(|(address, port)| {
            let mut out = Vec::new();
            index.evaluate(ip(address), *port, |line| out.extend_from_slice(line));
            out
        })
        .collect();
    let known = PROBES.iter().map(|(address, _)| index.is_known_exit(ip(address))).collect();
    (lines, known)
}

fn file_index() -> (NamedTempFile, ExitIndex) {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&std::fs::read(fixture("exit-policies.jsonl")).unwrap())
        .unwrap();
    let index = ExitIndex::with_source(JsonLinesFile::new(file.path()), LoadSettings::default());
    index.reload().unwrap();
    (file, index)
}

// ============================================================================
// Failed reloads
// ============================================================================

#[test]
fn test_malformed_dataset_leaves_behavior_unchanged() {
    let (file, index) = file_index();
    let before = observe(&index);
    let stats = index.stats();

    std::fs::write(
        file.path(),
        "{\"Address\":\"192.0.2.1\",\"Rules\":[]}\n{\"Address\":\"192.0.2.2\",\"Rules\":[{\"IsAccept\":true,\"MinPort\":443,\"MaxPort\":80}]}\n",
    )
    .unwrap();

    let err = index.reload().unwrap_err();
    assert!(matches!(
        err,
        LoadError::Parse(ParseError {
            record: 1,
            error: RecordError::MissingAddress { position: 0 } | RecordError::InvalidPortRange { .. }
        })
    ));

    assert_eq!(observe(&index), before);
    assert_eq!(index.stats().generation, stats.generation);
    assert_eq!(index.last_load_timestamp(), stats.loaded_at);
}

#[test]
fn test_undecodable_dataset_leaves_behavior_unchanged() {
    let (file, index) = file_index();
    let before = observe(&index);

    std::fs::write(file.path(), "{\"Address\":\"192.0.2.1\",\"Rules\":[]}\nnot json\n").unwrap();
    let err = index.reload().unwrap_err();
    assert!(matches!(
        err,
        LoadError::Parse(ParseError {
            record: 1,
            error: RecordError::Malformed(_)
        })
    ));
    assert_eq!(observe(&index), before);
}

#[test]
fn test_missing_dataset_leaves_behavior_unchanged() {
    let (file, index) = file_index();
    let before = observe(&index);

    let path = file.path().to_path_buf();
    drop(file);
    assert!(!path.exists());

    let err = index.reload().unwrap_err();
    assert!(matches!(err, LoadError::Source { .. }));
    assert!(err.is_recoverable());
    assert_eq!(observe(&index), before);
}

#[test]
fn test_every_reload_failing_keeps_serving() {
    let source = Arc::new(StaticSource::new(vec![
        PolicyRecord::new("192.0.2.1").with_rule(RuleRecord::wildcard(true, 1, 65535))
    ]));
    let index = ExitIndex::with_source(Arc::clone(&source), LoadSettings::default());
    index.reload().unwrap();

    source.replace(vec![PolicyRecord::new("192.0.2.1")
        .with_rule(RuleRecord::wildcard(true, 1, 70000))]);
    for _ in 0..5 {
        assert!(index.reload().is_err());
        assert_eq!(index.exits_for(ip("8.8.8.8"), 80), vec![ip("192.0.2.1")]);
    }
    assert_eq!(index.generation(), 1);
}

// ============================================================================
// Successful reloads
// ============================================================================

#[test]
fn test_reload_replaces_dataset_and_cache() {
    let (file, index) = file_index();
    let first = index.snapshot();
    let _ = first.resolve(8080);
    assert_eq!(first.stats().cached_ports, 2);

    std::fs::write(
        file.path(),
        "{\"Address\":\"192.0.2.50\",\"Rules\":[{\"IsAddressWildcard\":true,\"IsAccept\":true,\"MinPort\":1,\"MaxPort\":65535}]}\n",
    )
    .unwrap();
    let stats = index.reload().unwrap();
    assert_eq!(stats.generation, 2);
    assert_eq!(stats.policies, 1);

    let second = index.snapshot();
    // Only the probe port has been resolved in the new generation
    assert_eq!(second.stats().cached_ports, 1);
    assert_eq!(index.exits_for(ip("10.0.0.5"), 80), vec![ip("192.0.2.50")]);
    assert!(index.is_known_exit(ip("192.0.2.50")));
    assert!(!index.is_known_exit(ip("198.51.100.10")));

    // The pinned generation still answers from the old dataset
    assert_eq!(first.accepting_relays(ip("10.0.0.5"), 80), vec![ip("198.51.100.11")]);
    assert!(second.loaded_at() >= first.loaded_at());
}

#[test]
fn test_independent_indexes_do_not_interfere() {
    let a = ExitIndex::default();
    let b = ExitIndex::default();
    a.load_records(vec![PolicyRecord::new("192.0.2.1").with_rule(RuleRecord::wildcard(true, 1, 65535))])
        .unwrap();

    assert_eq!(a.exits_for(ip("8.8.8.8"), 80).len(), 1);
    assert!(b.exits_for(ip("8.8.8.8"), 80).is_empty());
    assert_eq!(b.generation(), 0);
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_readers_see_whole_generations() {
    // Generation A: relays .1 and .2 accept port 80. Generation B: only .3 does.
    // A reader may see either answer but never a mixture.
    let dataset_a = vec![
        PolicyRecord::new("192.0.2.1").with_rule(RuleRecord::wildcard(true, 80, 80)),
        PolicyRecord::new("192.0.2.2").with_rule(RuleRecord::wildcard(true, 1, 65535)),
    ];
    let dataset_b = vec![
        PolicyRecord::new("192.0.2.1").with_rule(RuleRecord::wildcard(false, 80, 80)),
        PolicyRecord::new("192.0.2.2").with_rule(RuleRecord::wildcard(false, 1, 65535)),
        PolicyRecord::new("192.0.2.3").with_rule(RuleRecord::wildcard(true, 1, 65535)),
    ];
    let answer_a: Vec<IpAddr> = vec![ip("192.0.2.1"), ip("192.0.2.2")];
    let answer_b: Vec<IpAddr> = vec![ip("192.0.2.3")];

    let source = Arc::new(StaticSource::new(dataset_a.clone()));
    let index = Arc::new(ExitIndex::with_source(Arc::clone(&source), LoadSettings::default()));
    index.reload().unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let mut readers = vec![];
    for _ in 0..4 {
        let index = Arc::clone(&index);
        let done = Arc::clone(&done);
        let (answer_a, answer_b) = (answer_a.clone(), answer_b.clone());
        readers.push(thread::spawn(move || {
            let mut queries = 0u64;
            while !done.load(Ordering::Relaxed) || queries < 100 {
                let exits = index.exits_for(ip("8.8.8.8"), 80);
                assert!(exits == answer_a || exits == answer_b, "torn answer: {exits:?}");
                queries += 1;
            }
        }));
    }

    for i in 0..50 {
        source.replace(if i % 2 == 0 { dataset_b.clone() } else { dataset_a.clone() });
        index.reload().unwrap();
    }
    done.store(true, Ordering::Relaxed);

    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(index.generation(), 51);
    assert_eq!(index.exits_for(ip("8.8.8.8"), 80), answer_a);
}

#[test]
fn test_concurrent_reloads_number_generations_monotonically() {
    let source = Arc::new(StaticSource::new(vec![
        PolicyRecord::new("192.0.2.1").with_rule(RuleRecord::wildcard(true, 1, 65535))
    ]));
    let index = Arc::new(ExitIndex::with_source(Arc::clone(&source), LoadSettings::default()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                (0..25)
                    .map(|_| index.reload().unwrap().generation)
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut numbers: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    numbers.sort_unstable();
    assert_eq!(numbers, (1..=100).collect::<Vec<_>>());
}
