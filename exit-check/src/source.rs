//! Policy record sources
//!
//! A [`PolicySource`] produces the complete record sequence for one load.
//! [`ExitIndex::reload`](crate::exits::ExitIndex::reload) calls it again on
//! every reload, so a source must re-read its backing data each time.
//!
//! The on-disk format is JSON lines, one [`PolicyRecord`] per line. Blank
//! lines are ignored.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::error::Category;
use tracing::debug;

use crate::error::{LoadError, ParseError, RecordError};
use crate::policy::PolicyRecord;

/// Producer of policy records for a load
pub trait PolicySource: Send + Sync {
    /// Human-readable origin, used in logs and errors
    fn name(&self) -> String;

    /// Read every record in source order
    ///
    /// # Errors
    ///
    /// Returns `LoadError::Source` if the backing data cannot be read and
    /// `LoadError::Parse` for the first record that cannot be decoded.
    fn records(&self) -> Result<Vec<PolicyRecord>, LoadError>;
}

impl<T: PolicySource + ?Sized> PolicySource for Arc<T> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn records(&self) -> Result<Vec<PolicyRecord>, LoadError> {
        (**self).records()
    }
}

/// Decode JSON-lines policy records from `reader`
///
/// `origin` names the reader in I/O errors.
///
/// # Errors
///
/// Returns `LoadError::Source` on I/O failure and `LoadError::Parse` with
/// the 0-based record position for the first undecodable record.
pub fn read_records<R: Read>(reader: R, origin: &str) -> Result<Vec<PolicyRecord>, LoadError> {
    let stream = serde_json::Deserializer::from_reader(reader).into_iter::<PolicyRecord>();
    let mut records = Vec::new();

    for item in stream {
        match item {
            Ok(record) => records.push(record),
            Err(e) if e.classify() == Category::Io => {
                return Err(LoadError::unreadable(origin, e.to_string()));
            }
            Err(e) => {
                return Err(ParseError::new(records.len(), RecordError::Malformed(e.to_string())).into());
            }
        }
    }

    Ok(records)
}

/// JSON-lines file on disk
#[derive(Debug, Clone)]
pub struct JsonLinesFile {
    path: PathBuf,
}

impl JsonLinesFile {
    /// Create a source reading `path` on every load
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the dataset file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PolicySource for JsonLinesFile {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn records(&self) -> Result<Vec<PolicyRecord>, LoadError> {
        let origin = self.name();
        debug!(path = %origin, "Reading policy records");

        let file = File::open(&self.path).map_err(|e| LoadError::unreadable(&origin, e.to_string()))?;
        read_records(BufReader::new(file), &origin)
    }
}

/// In-memory record set that can be swapped between loads
#[derive(Debug, Default)]
pub struct StaticSource {
    records: RwLock<Vec<PolicyRecord>>,
}

impl StaticSource {
    /// Create a source serving `records`
    #[must_use]
    pub fn new(records: Vec<PolicyRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    /// Replace the records served by subsequent loads
    pub fn replace(&self, records: Vec<PolicyRecord>) {
        *self.records.write() = records;
    }
}

impl PolicySource for StaticSource {
    fn name(&self) -> String {
        "static".into()
    }

    fn records(&self) -> Result<Vec<PolicyRecord>, LoadError> {
        Ok(self.records.read().clone())
    }
}
