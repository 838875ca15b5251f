use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, warn};
use thiserror::Error;

use crate::audit::event::{AuditEvent, NewAuditEvent};
use crate::constants::AUDIT_GENESIS_HASH;
use crate::errors::AuditError;

/// Writer-side state: everything needed to assign the next link
struct ChainWriter {
    next_sequence: u64,
    head_hash: String,
    file: Option<File>,
}

/// Append-only, hash-chained, durably persisted event log scoped to one run.
///
/// Appenders are serialized on the writer lock, so sequence order, file order
/// and snapshot order are identical. Readers only contend for the short
/// in-memory push, never for file I/O.
pub struct AuditLog {
    writer: Mutex<ChainWriter>,
    events: RwLock<Vec<AuditEvent>>,
    path: Option<PathBuf>,
}

impl AuditLog {
    /// Create a new JSON Lines log at `path`. Refuses to reuse an existing file.
    pub fn create(path: &Path) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        debug!("Opened audit log at {}", path.display());

        Ok(Self {
            writer: Mutex::new(ChainWriter {
                next_sequence: 1,
                head_hash: AUDIT_GENESIS_HASH.to_string(),
                file: Some(file),
            }),
            events: RwLock::new(Vec::new()),
            path: Some(path.to_path_buf()),
        })
    }

    /// Log that only lives in memory
    pub fn in_memory() -> Self {
        Self {
            writer: Mutex::new(ChainWriter {
                next_sequence: 1,
                head_hash: AUDIT_GENESIS_HASH.to_string(),
                file: None,
            }),
            events: RwLock::new(Vec::new()),
            path: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append an event and return its sequence number.
    ///
    /// The event is on stable storage before this returns, so the call blocks
    /// on an fsync while holding the writer lock. On error the sequence
    /// number is not consumed, the event is not visible and the file is
    /// restored to its previous length.
    pub fn append(&self, new_event: NewAuditEvent) -> Result<u64, AuditError> {
        let mut writer = self.writer.lock().map_err(|_| AuditError::Poisoned)?;

        let mut event = AuditEvent {
            sequence: writer.next_sequence,
            timestamp: Utc::now(),
            unit_id: new_event.unit_id,
            kind: new_event.kind,
            artifact: new_event.artifact,
            detail: new_event.detail,
            digests: new_event.digests,
            prev_hash: writer.head_hash.clone(),
            entry_hash: String::new(),
        };
        event.entry_hash = event.compute_hash()?;

        if let Some(file) = writer.file.as_mut() {
            let mut line = serde_json::to_vec(&event)?;
            line.push(b'\n');
            append_line(file, &line)?;
        }

        let sequence = event.sequence;
        writer.head_hash = event.entry_hash.clone();
        writer.next_sequence += 1;

        self.events
            .write()
            .map_err(|_| AuditError::Poisoned)?
            .push(event);

        Ok(sequence)
    }

    /// Consistent, ordered copy of every acknowledged event
    pub fn snapshot(&self) -> Result<Vec<AuditEvent>, AuditError> {
        Ok(self.events.read().map_err(|_| AuditError::Poisoned)?.clone())
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Write one line and sync it
fn append_line(file: &mut File, line: &[u8]) -> io::Result<()> {
    rollback_on_error(file, |file| {
        file.write_all(line)?;
        file.flush()?;
        file.sync_data()
    })
}

/// Run `write` against the file. If it fails, cut the file back to where
/// it ended before, so a partial line never precedes the next append.
fn rollback_on_error(file: &mut File, write: impl FnOnce(&mut File) -> io::Result<()>) -> io::Result<()> {
    let len = file.metadata()?.len();
    if let Err(e) = write(file) {
        match file.set_len(len).and_then(|_| file.seek(SeekFrom::Start(len))) {
            Ok(_) => debug!("Rolled audit log back to {} bytes after a failed write", len),
            Err(rollback) => warn!("Could not roll back torn audit log write: {}", rollback),
        }
        return Err(e);
    }
    Ok(())
}

/// Why a sequence of events fails chain verification
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ChainError {
    #[error("expected sequence {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },

    #[error("event {sequence} does not link to its predecessor")]
    BrokenLink { sequence: u64 },

    #[error("event {sequence} content does not match its hash")]
    HashMismatch { sequence: u64 },
}

/// Check continuity, links and per-event hashes of an exported log
pub fn verify_chain(events: &[AuditEvent]) -> Result<(), ChainError> {
    let mut expected_prev = AUDIT_GENESIS_HASH;

    for (index, event) in events.iter().enumerate() {
        let expected = index as u64 + 1;
        if event.sequence != expected {
            return Err(ChainError::SequenceGap { expected, found: event.sequence });
        }
        if event.prev_hash != expected_prev {
            return Err(ChainError::BrokenLink { sequence: event.sequence });
        }
        match event.compute_hash() {
            Ok(hash) if hash == event.entry_hash => {}
            _ => return Err(ChainError::HashMismatch { sequence: event.sequence }),
        }
        expected_prev = &event.entry_hash;
    }

    Ok(())
}

/// Parse a JSON Lines audit log written by [`AuditLog`]
pub fn read_log(path: &Path) -> Result<Vec<AuditEvent>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open audit log {}", path.display()))?;

    let mut events = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.context("Failed to read audit log")?;
        if line.trim().is_empty() {
            continue;
        }
        let event: AuditEvent = serde_json::from_str(&line)
            .with_context(|| format!("Malformed audit event on line {}", line_no + 1))?;
        events.push(event);
    }

    Ok(events)
}
