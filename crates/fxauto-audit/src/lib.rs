//! Append-only, hash-chained audit log for engine lifecycle events.
//!
//! Every record is written as one canonical (sorted-key) JSON line, and each
//! line's hash covers the previous line's hash, so truncation or tampering
//! anywhere in the file is detectable by replaying the chain.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fxauto_schemas::event::{EventKind, EventRecord};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A sink for audit events. Production code writes to [`JsonlEventSink`];
/// tests substitute [`InMemoryEventSink`] to assert on recorded events
/// without touching the filesystem.
pub trait EventSink {
    fn record(&mut self, at: DateTime<Utc>, position_id: Option<Uuid>, kind: EventKind) -> Result<()>;
}

#[derive(Serialize)]
struct Envelope<'a> {
    seq: u64,
    at: DateTime<Utc>,
    position_id: Option<Uuid>,
    #[serde(flatten)]
    kind: &'a EventKind,
    hash_prev: String,
    hash_self: String,
}

/// Hash-chained JSONL sink. One instance owns one file for the process
/// lifetime; `seq` and `last_hash` are carried in memory and reset only by
/// constructing a fresh writer (there is no cross-process resume story here,
/// matching the single-engine-instance assumption in spec.md §5).
pub struct JsonlEventSink {
    file: File,
    seq: u64,
    last_hash: String,
}

const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000";

impl JsonlEventSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening audit log {}", path.display()))?;
        Ok(Self {
            file,
            seq: 0,
            last_hash: GENESIS_HASH[..64].to_string(),
        })
    }
}

impl EventSink for JsonlEventSink {
    fn record(&mut self, at: DateTime<Utc>, position_id: Option<Uuid>, kind: EventKind) -> Result<()> {
        self.seq += 1;
        let hash_self = compute_event_hash(self.seq, at, &position_id, &kind, &self.last_hash);
        let envelope = Envelope {
            seq: self.seq,
            at,
            position_id,
            kind: &kind,
            hash_prev: self.last_hash.clone(),
            hash_self: hash_self.clone(),
        };
        let line = canonical_json_line(&envelope)?;
        writeln!(self.file, "{line}").context("writing audit line")?;
        self.file.flush().context("flushing audit log")?;
        self.last_hash = hash_self;
        Ok(())
    }
}

/// In-memory sink for test scenarios: records are kept, never written to disk.
#[derive(Default)]
pub struct InMemoryEventSink {
    pub records: Vec<EventRecord>,
}

impl EventSink for InMemoryEventSink {
    fn record(&mut self, at: DateTime<Utc>, position_id: Option<Uuid>, kind: EventKind) -> Result<()> {
        let seq = self.records.len() as u64 + 1;
        self.records.push(EventRecord { seq, at, position_id, kind });
        Ok(())
    }
}

fn compute_event_hash(
    seq: u64,
    at: DateTime<Utc>,
    position_id: &Option<Uuid>,
    kind: &EventKind,
    hash_prev: &str,
) -> String {
    let preimage = serde_json::json!({
        "seq": seq,
        "at": at,
        "position_id": position_id,
        "kind": kind,
        "hash_prev": hash_prev,
    });
    let bytes = canonical_json_bytes(&preimage);
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

fn canonical_json_line<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value).context("serializing audit envelope")?;
    let sorted = sort_keys(&value);
    Ok(serde_json::to_string(&sorted)?)
}

fn canonical_json_bytes(value: &serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&sort_keys(value)).expect("sorted value always serializes")
}

fn sort_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<String, serde_json::Value> =
                map.iter().map(|(k, v)| (k.clone(), sort_keys(v))).collect();
            serde_json::to_value(sorted).expect("BTreeMap<String, Value> always serializes")
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sort_keys).collect())
        }
        other => other.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: u64 },
    Broken { line: u64, reason: String },
}

/// Replay a written audit log and confirm every line's `hash_self` matches
/// its content and chains from the prior line's `hash_self`.
pub fn verify_hash_chain(path: &Path) -> Result<VerifyResult> {
    let file = File::open(path).with_context(|| format!("opening audit log {}", path.display()))?;
    verify_hash_chain_reader(BufReader::new(file))
}

pub fn verify_hash_chain_str(contents: &str) -> Result<VerifyResult> {
    verify_hash_chain_reader(contents.as_bytes())
}

fn verify_hash_chain_reader(reader: impl BufRead) -> Result<VerifyResult> {
    let mut expected_prev = GENESIS_HASH[..64].to_string();
    let mut lines_seen = 0u64;
    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx as u64 + 1;
        let line = line.with_context(|| format!("reading audit line {line_no}"))?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line)
            .with_context(|| format!("parsing audit line {line_no}"))?;
        let hash_prev = value["hash_prev"].as_str().unwrap_or_default();
        let hash_self = value["hash_self"].as_str().unwrap_or_default();
        if hash_prev != expected_prev {
            return Ok(VerifyResult::Broken {
                line: line_no,
                reason: "hash_prev does not match previous line's hash_self".to_string(),
            });
        }
        let mut without_hash = value.clone();
        without_hash
            .as_object_mut()
            .expect("audit line is an object")
            .remove("hash_self");
        let recomputed = {
            let bytes = canonical_json_bytes(&without_hash);
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            hex::encode(hasher.finalize())
        };
        if recomputed != hash_self {
            return Ok(VerifyResult::Broken {
                line: line_no,
                reason: "hash_self does not match recomputed content hash".to_string(),
            });
        }
        expected_prev = hash_self.to_string();
        lines_seen += 1;
    }
    Ok(VerifyResult::Valid { lines: lines_seen })
}
