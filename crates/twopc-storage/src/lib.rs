//! # twopc-storage
//!
//! why: provide the durable transaction log each node uses to survive a restart
//! relations: stores twopc-core records, used by twopc-node's coordinator and participant
//! what: TransactionLog trait, FileLog implementation, InMemoryLog for testing

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use twopc_core::{AckStatus, LogRecord, NodeId, TransactionId};

/// errors surfaced by a transaction log
#[derive(Debug, Error)]
pub enum LogError {
    #[error("log i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("log record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("no log record for transaction {0}")]
    NotFound(TransactionId),

    #[error("log record for transaction {0} is not a coordinator record")]
    NotCoordinatorRecord(TransactionId),

    #[error("transaction {id} has no participant {participant}")]
    UnknownParticipant {
        id: TransactionId,
        participant: NodeId,
    },
}

/// trait for the durable, per-node transaction log
///
/// a call that returns Ok must be visible after an immediate crash and
/// restart. records are keyed by transaction id; writing an id again
/// replaces the whole record. each node owns exactly one log.
pub trait TransactionLog: Send + Sync {
    /// persist a record, replacing any previous record for the same id
    fn write(&self, record: &LogRecord) -> Result<(), LogError>;

    /// look up one record, active or archived
    fn read(&self, id: &TransactionId) -> Result<Option<LogRecord>, LogError>;

    /// every active record (for recovery scanning)
    fn read_all(&self) -> Result<Vec<LogRecord>, LogError>;

    /// durable partial update of one participant's ack status
    fn update_status(
        &self,
        id: &TransactionId,
        participant: &NodeId,
        status: AckStatus,
    ) -> Result<(), LogError>;

    /// move a finished record out of the active set; `read` still finds it
    fn archive(&self, id: &TransactionId) -> Result<(), LogError>;
}

/// shared partial-update rule for both implementations
fn apply_status(
    record: &mut LogRecord,
    participant: &NodeId,
    status: AckStatus,
) -> Result<(), LogError> {
    let rec = match record {
        LogRecord::Coordinator(rec) => rec,
        LogRecord::Participant(rec) => return Err(LogError::NotCoordinatorRecord(rec.id.clone())),
    };
    let id = rec.id.clone();
    let entry = rec
        .participants
        .iter_mut()
        .find(|e| &e.id == participant)
        .ok_or_else(|| LogError::UnknownParticipant {
            id,
            participant: participant.clone(),
        })?;
    // done never regresses
    if entry.status != AckStatus::Done {
        entry.status = status;
    }
    Ok(())
}

// -- file log implementation --

/// file-based log using std::fs
///
/// one pretty-printed json file per transaction:
/// - active/<hex(id)>.json: records recovery still has to look at
/// - archive/<hex(id)>.json: finished records, kept for inquiries
pub struct FileLog {
    dir: PathBuf,
    /// one writer at a time
    write_lock: Mutex<()>,
}

impl FileLog {
    /// open a log rooted at the given directory, creating it if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, LogError> {
        let dir = dir.into();
        fs::create_dir_all(dir.join("active"))?;
        fs::create_dir_all(dir.join("archive"))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    // ids are opaque strings, so hex-encode them into safe file names
    fn file_name(id: &TransactionId) -> String {
        format!("{}.json", hex::encode(id.as_str()))
    }

    fn active_path(&self, id: &TransactionId) -> PathBuf {
        self.dir.join("active").join(Self::file_name(id))
    }

    fn archive_path(&self, id: &TransactionId) -> PathBuf {
        self.dir.join("archive").join(Self::file_name(id))
    }

    fn load(path: &Path) -> Result<Option<LogRecord>, LogError> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// atomic write: write to temp file, fsync, then rename over the target
    fn store(&self, path: &Path, record: &LogRecord) -> Result<(), LogError> {
        let json = serde_json::to_string_pretty(record)?;

        let temp_path = path.with_extension("tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, path)?;
        sync_parent(path)?;

        Ok(())
    }
}

/// make a rename durable by syncing the containing directory
#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => File::open(parent)?.sync_all(),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}

impl TransactionLog for FileLog {
    fn write(&self, record: &LogRecord) -> Result<(), LogError> {
        let _guard = self.write_lock.lock();
        let active = self.active_path(record.id());
        self.store(&active, record)?;

        // a rewritten id is active again; drop the stale archived copy
        let archived = self.archive_path(record.id());
        match fs::remove_file(&archived) {
            Ok(()) => sync_parent(&archived)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn read(&self, id: &TransactionId) -> Result<Option<LogRecord>, LogError> {
        if let Some(record) = Self::load(&self.active_path(id))? {
            return Ok(Some(record));
        }
        Self::load(&self.archive_path(id))
    }

    fn read_all(&self) -> Result<Vec<LogRecord>, LogError> {
        let mut records = Vec::new();
        for entry in fs::read_dir(self.dir.join("active"))? {
            let path = entry?.path();
            // leftover temp files from an interrupted write are ignored
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = Self::load(&path)? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(records)
    }

    fn update_status(
        &self,
        id: &TransactionId,
        participant: &NodeId,
        status: AckStatus,
    ) -> Result<(), LogError> {
        let _guard = self.write_lock.lock();
        let active = self.active_path(id);
        let (path, mut record) = match Self::load(&active)? {
            Some(record) => (active, record),
            None => {
                let archived = self.archive_path(id);
                let record = Self::load(&archived)?.ok_or_else(|| LogError::NotFound(id.clone()))?;
                (archived, record)
            }
        };
        apply_status(&mut record, participant, status)?;
        self.store(&path, &record)
    }

    fn archive(&self, id: &TransactionId) -> Result<(), LogError> {
        let _guard = self.write_lock.lock();
        let active = self.active_path(id);
        if !active.exists() {
            if self.archive_path(id).exists() {
                return Ok(());
            }
            return Err(LogError::NotFound(id.clone()));
        }
        let archived = self.archive_path(id);
        fs::rename(&active, &archived)?;
        sync_parent(&archived)?;
        sync_parent(&active)?;
        Ok(())
    }
}

// -- in-memory log implementation --

/// in-memory log for testing
///
/// same semantics as FileLog, no persistence across process restarts.
/// share it behind an Arc to simulate a node restarting over the same log.
#[derive(Default)]
pub struct InMemoryLog {
    inner: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    active: HashMap<TransactionId, LogRecord>,
    archived: HashMap<TransactionId, LogRecord>,
}

impl InMemoryLog {
    /// create a new, empty in-memory log
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionLog for InMemoryLog {
    fn write(&self, record: &LogRecord) -> Result<(), LogError> {
        let mut state = self.inner.lock();
        state.archived.remove(record.id());
        state.active.insert(record.id().clone(), record.clone());
        Ok(())
    }

    fn read(&self, id: &TransactionId) -> Result<Option<LogRecord>, LogError> {
        let state = self.inner.lock();
        Ok(state.active.get(id).or_else(|| state.archived.get(id)).cloned())
    }

    fn read_all(&self) -> Result<Vec<LogRecord>, LogError> {
        let state = self.inner.lock();
        let mut records: Vec<LogRecord> = state.active.values().cloned().collect();
        records.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(records)
    }

    fn update_status(
        &self,
        id: &TransactionId,
        participant: &NodeId,
        status: AckStatus,
    ) -> Result<(), LogError> {
        let mut state = self.inner.lock();
        let MemoryState { active, archived } = &mut *state;
        let record = active
            .get_mut(id)
            .or_else(|| archived.get_mut(id))
            .ok_or_else(|| LogError::NotFound(id.clone()))?;
        // validate on a copy so a rejected update leaves nothing behind
        let mut updated = record.clone();
        apply_status(&mut updated, participant, status)?;
        *record = updated;
        Ok(())
    }

    fn archive(&self, id: &TransactionId) -> Result<(), LogError> {
        let mut state = self.inner.lock();
        match state.active.remove(id) {
            Some(record) => {
                state.archived.insert(id.clone(), record);
                Ok(())
            }
            None if state.archived.contains_key(id) => Ok(()),
            None => Err(LogError::NotFound(id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use twopc_core::{CoordinatorRecord, Decision};

    fn txid(raw: &str) -> TransactionId {
        TransactionId::new(raw).unwrap()
    }

    fn decided(id: &str) -> LogRecord {
        let mut rec = CoordinatorRecord::new(
            txid(id),
            vec![NodeId::new("P1").unwrap(), NodeId::new("P2").unwrap()],
        );
        rec.decide(Decision::Commit).unwrap();
        rec.into()
    }

    #[test]
    fn in_memory_log_writes_and_reads() {
        let log = InMemoryLog::new();
        log.write(&decided("T1")).unwrap();

        assert_eq!(log.read(&txid("T1")).unwrap(), Some(decided("T1")));
        assert_eq!(log.read_all().unwrap().len(), 1);
    }

    #[test]
    fn file_log_uses_hex_file_names() {
        let dir = tempdir().unwrap();
        let log = FileLog::open(dir.path()).unwrap();
        log.write(&decided("a/b")).unwrap();

        let expected = dir.path().join("active").join(format!("{}.json", hex::encode("a/b")));
        assert!(expected.exists());
    }

    #[test]
    fn file_log_survives_restart() {
        let dir = tempdir().unwrap();

        // first "session"
        {
            let log = FileLog::open(dir.path()).unwrap();
            log.write(&decided("T1")).unwrap();
            log.update_status(&txid("T1"), &NodeId::new("P1").unwrap(), AckStatus::Done)
                .unwrap();
        }

        // "restart" - new log instance
        {
            let log = FileLog::open(dir.path()).unwrap();
            let records = log.read_all().unwrap();
            assert_eq!(records.len(), 1);
            let rec = records[0].as_coordinator().unwrap();
            assert_eq!(rec.pending_participants(), vec![NodeId::new("P2").unwrap()]);
        }
    }
}
