//! Workload records and the newline-delimited JSON loader.
//!
//! Records are opaque to the benchmark: it only serializes them to bytes and,
//! for keyed runs, pulls a routing key out of a named field.

use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::BenchError;

/// One structured workload record
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// UTF-8 JSON encoding of the record, the payload sent to the broker
    pub fn to_bytes(&self) -> Vec<u8> {
        // A map of JSON values always serializes.
        serde_json::to_vec(&self.fields).unwrap_or_default()
    }

    /// Routing key taken from `field`. Strings are used verbatim, other
    /// values by their JSON text. `None` if the field is absent or null.
    pub fn key(&self, field: &str) -> Option<Vec<u8>> {
        match self.fields.get(field)? {
            Value::Null => None,
            Value::String(s) => Some(s.as_bytes().to_vec()),
            other => Some(other.to_string().into_bytes()),
        }
    }
}

/// Concatenated payload bytes of `records`, in order
pub fn serialize_all(records: &[Record]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        out.extend_from_slice(&record.to_bytes());
    }
    out
}

/// An ordered, replayable sequence of records loaded from disk
#[derive(Debug, Clone)]
pub struct Workload {
    path: PathBuf,
    records: Vec<Record>,
}

impl Workload {
    /// Read every record of an NDJSON file. Blank lines are skipped.
    pub fn load(path: &Path) -> Result<Self, BenchError> {
        Self::load_prefix(path, usize::MAX)
    }

    /// Read at most `limit` records.
    pub fn load_prefix(path: &Path, limit: usize) -> Result<Self, BenchError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => BenchError::WorkloadMissing {
                path: path.to_path_buf(),
            },
            _ => BenchError::WorkloadParse {
                path: path.to_path_buf(),
                line: 0,
                reason: e.to_string(),
            },
        })?;

        let mut records = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            if records.len() >= limit {
                break;
            }
            let line_no = idx + 1;
            let line = line.map_err(|e| BenchError::WorkloadParse {
                path: path.to_path_buf(),
                line: line_no,
                reason: e.to_string(),
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value =
                serde_json::from_str(&line).map_err(|e| BenchError::WorkloadParse {
                    path: path.to_path_buf(),
                    line: line_no,
                    reason: e.to_string(),
                })?;
            match value {
                Value::Object(fields) => records.push(Record::new(fields)),
                _ => {
                    return Err(BenchError::WorkloadParse {
                        path: path.to_path_buf(),
                        line: line_no,
                        reason: "expected a JSON object".to_string(),
                    })
                }
            }
        }

        info!("Loaded {} records from {}", records.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_records(records: Vec<Record>) -> Self {
        Self {
            path: PathBuf::new(),
            records,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// The first `n` records (or all of them, if there are fewer).
    pub fn sample(&self, n: usize) -> &[Record] {
        let n = n.min(self.records.len());
        debug!("Sampling {} of {} records", n, self.records.len());
        &self.records[..n]
    }
}
