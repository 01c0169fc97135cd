//! Dataset loading tests
//!
//! Loads the JSON-lines fixture the way the service does, through a file
//! source and through configuration.

use std::fs;

use exit_check::config::{load_config_str, Config};
use exit_check::error::{ExitCheckError, LoadError, QueryError};
use exit_check::policy::Disposition;
use exit_check::source::{read_records, PolicySource};
use exit_check::{ExitIndex, JsonLinesFile, LoadSettings};

use super::{fixture, ip};

fn fixture_index() -> ExitIndex {
    let index = ExitIndex::with_source(
        JsonLinesFile::new(fixture("exit-policies.jsonl")),
        LoadSettings::default(),
    );
    index.reload().unwrap();
    index
}

// ============================================================================
// Fixture contents
// ============================================================================

#[test]
fn test_fixture_counts() {
    let stats = fixture_index().stats();
    assert_eq!(stats.generation, 1);
    assert_eq!(stats.policies, 6);
    assert_eq!(stats.rules, 11);
    assert_eq!(stats.known_exits, 3);
}

#[test]
fn test_fixture_metadata() {
    let index = fixture_index();
    let generation = index.snapshot();

    let first = generation.policy(0).unwrap();
    assert_eq!(first.address(), ip("198.51.100.10"));
    assert_eq!(first.fingerprint(), Some("0011BD2485AD45D984EC4159C88FC066E5E3300E"));
    assert_eq!(first.tminus(), Some(0));
    assert!(!first.is_allowed_default());
    assert_eq!(first.rules()[0].disposition, Disposition::Reject);

    let second = generation.policy(1).unwrap();
    assert!(second.is_allowed_default());

    let v6 = generation.policy(3).unwrap();
    assert_eq!(v6.address_line().as_ref(), b"2001:db8::12\n");

    assert!(generation.policy(5).unwrap().rules().is_empty());
    assert!(generation.policy(6).is_none());
}

#[test]
fn test_fixture_queries() {
    let index = fixture_index();

    assert_eq!(index.exits_for(ip("10.0.0.5"), 80), vec![ip("198.51.100.11")]);
    assert_eq!(
        index.exits_for(ip("8.8.8.8"), 22),
        vec![ip("198.51.100.11"), ip("198.51.100.12")]
    );
    assert_eq!(
        index.exits_for(ip("2001:db8::99"), 8080),
        vec![ip("198.51.100.11"), ip("2001:db8::12")]
    );
    assert_eq!(
        index.exits_for(ip("38.229.70.31"), 443),
        vec![ip("198.51.100.10"), ip("2001:db8::12"), ip("198.51.100.14")]
    );
}

#[test]
fn test_fixture_known_exits() {
    let index = fixture_index();
    for exit in ["198.51.100.10", "2001:db8::12", "198.51.100.14"] {
        assert!(index.is_known_exit(ip(exit)), "{exit}");
    }
    for other in ["198.51.100.11", "198.51.100.12", "198.51.100.15", "38.229.70.31"] {
        assert!(!index.is_known_exit(ip(other)), "{other}");
    }
}

#[test]
fn test_fixture_dump() {
    let index = fixture_index();
    let mut out = Vec::new();
    let written = index.dump(&mut out, "38.229.70.31", 443).unwrap();
    assert_eq!(written, 3);
    assert_eq!(out, b"198.51.100.10\n2001:db8::12\n198.51.100.14\n");

    assert!(matches!(
        index.dump(&mut out, "38.229.70.31", -1),
        Err(ExitCheckError::Query(QueryError::InvalidPort(-1)))
    ));
}

#[test]
fn test_fixture_read_records_directly() {
    let file = fs::File::open(fixture("exit-policies.jsonl")).unwrap();
    let records = read_records(file, "fixture").unwrap();
    assert_eq!(records.len(), 6);
    assert_eq!(records[3].address, "2001:db8::12");
    assert!(records[5].rules.is_empty());
}

// ============================================================================
// Configuration-driven setup
// ============================================================================

#[test]
fn test_index_from_config() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("data")).unwrap();
    fs::copy(
        fixture("exit-policies.jsonl"),
        dir.path().join("data").join("exit-policies"),
    )
    .unwrap();

    let json = format!(
        r#"{{"data": {{"base_dir": {:?}}}, "probe": {{"address": "8.8.8.8", "port": 22}}}}"#,
        dir.path().display().to_string()
    );
    let config: Config = load_config_str(&json).unwrap();

    let index = ExitIndex::from_config(&config).unwrap();
    assert_eq!(index.settings().probe, "8.8.8.8:22".parse().unwrap());
    assert_eq!(index.generation(), 0);

    let stats = index.reload().unwrap();
    assert_eq!(stats.policies, 6);
    assert!(index.is_known_exit(ip("198.51.100.12")));
    assert!(!index.is_known_exit(ip("198.51.100.10")));
}

#[test]
fn test_index_from_config_missing_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default_config();
    config.data.base_dir = dir.path().display().to_string();

    let index = ExitIndex::from_config(&config).unwrap();
    let source = JsonLinesFile::new(config.policies_path());
    assert!(source.name().ends_with("exit-policies"));

    assert!(matches!(index.reload(), Err(LoadError::Source { .. })));
    assert_eq!(index.generation(), 0);
}

#[test]
fn test_index_from_config_invalid_probe() {
    let mut config = Config::default_config();
    config.probe.address = "not-an-ip".into();
    assert!(ExitIndex::from_config(&config).is_err());
}
