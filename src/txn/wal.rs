//! Write-ahead log.
//!
//! Append-only binary file of length-prefixed, crc32-checked bincode
//! records. Records buffer in memory until `flush_to_lsn`; commit flushes
//! through the committing record before the transaction reports success.
//! A checkpoint record marks a durable snapshot boundary and truncates the
//! file (LSNs stay monotonic across truncation).

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{ColumnInfo, IndexInfo, TriggerInfo, ViewInfo};
use crate::error::{EngineError, EngineResult};
use crate::storage::RowId;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecordKind {
    Begin,
    Commit,
    Abort,
    Insert,
    Update,
    Delete,
    CreateTable,
    DropTable,
    CreateIndex,
    DropIndex,
    CreateView,
    DropView,
    AlterView,
    CreateTrigger,
    DropTrigger,
    AlterTrigger,
    Checkpoint,
}

/// Record payloads carry enough for both redo and undo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogPayload {
    None,
    Row {
        db: String,
        table: String,
        row_id: RowId,
        before: Option<Vec<Value>>,
        after: Option<Vec<Value>>,
    },
    Table {
        db: String,
        table: String,
        columns: Vec<ColumnInfo>,
        /// Rows captured for DROP TABLE undo.
        rows: Vec<(RowId, Vec<Value>)>,
        indexes: Vec<IndexInfo>,
    },
    Index {
        db: String,
        table: String,
        index: IndexInfo,
    },
    View {
        db: String,
        before: Option<ViewInfo>,
        after: Option<ViewInfo>,
    },
    Trigger {
        db: String,
        before: Option<TriggerInfo>,
        after: Option<TriggerInfo>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub lsn: u64,
    pub txn_id: u64,
    pub prev_lsn: u64,
    pub kind: LogRecordKind,
    pub payload: LogPayload,
}

struct LogInner {
    file: File,
    next_lsn: u64,
    flushed_lsn: u64,
    /// Serialized records not yet on disk, in LSN order.
    buffer: Vec<(u64, Vec<u8>)>,
}

pub struct LogManager {
    path: PathBuf,
    inner: Mutex<LogInner>,
}

impl LogManager {
    /// Open (or create) the WAL file. `next_lsn` resumes after the highest
    /// LSN already on disk.
    pub fn open(data_dir: &Path) -> EngineResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join("wal.log");
        let records = read_records(&path)?;
        let max_lsn = records.last().map(|r| r.lsn).unwrap_or(0);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(
            target: "opaldb::wal",
            "wal opened at '{}', {} record(s), next lsn {}",
            path.display(), records.len(), max_lsn + 1
        );
        Ok(Self {
            path,
            inner: Mutex::new(LogInner {
                file,
                next_lsn: max_lsn + 1,
                flushed_lsn: max_lsn,
                buffer: Vec::new(),
            }),
        })
    }

    /// Append a record, assigning the next LSN. The record is buffered;
    /// durability requires `flush_to_lsn`.
    pub fn append(
        &self,
        txn_id: u64,
        prev_lsn: u64,
        kind: LogRecordKind,
        payload: LogPayload,
    ) -> EngineResult<u64> {
        let mut inner = self.inner.lock();
        let lsn = inner.next_lsn;
        inner.next_lsn += 1;
        let record = LogRecord { lsn, txn_id, prev_lsn, kind, payload };
        let bytes = bincode::serialize(&record)
            .map_err(|e| EngineError::io(format!("wal serialize failed: {}", e)))?;
        inner.buffer.push((lsn, bytes));
        Ok(lsn)
    }

    /// Persist every buffered record with LSN <= `lsn` and fsync.
    pub fn flush_to_lsn(&self, lsn: u64) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        if inner.flushed_lsn >= lsn && inner.buffer.iter().all(|(l, _)| *l > lsn) {
            return Ok(());
        }
        let mut remaining = Vec::new();
        let buffered = std::mem::take(&mut inner.buffer);
        let mut highest = inner.flushed_lsn;
        for (l, bytes) in buffered {
            if l <= lsn {
                write_frame(&mut inner.file, &bytes)?;
                highest = highest.max(l);
            } else {
                remaining.push((l, bytes));
            }
        }
        inner.buffer = remaining;
        inner
            .file
            .sync_all()
            .map_err(|e| EngineError::fatal(format!("wal fsync failed: {}", e)))?;
        inner.flushed_lsn = highest;
        Ok(())
    }

    /// Flush everything buffered.
    pub fn flush_all(&self) -> EngineResult<()> {
        let target = {
            let inner = self.inner.lock();
            inner.next_lsn.saturating_sub(1)
        };
        self.flush_to_lsn(target)
    }

    pub fn flushed_lsn(&self) -> u64 {
        self.inner.lock().flushed_lsn
    }

    /// All durable records in append order (recovery input).
    pub fn read_all(&self) -> EngineResult<Vec<LogRecord>> {
        read_records(&self.path)
    }

    /// Write a CHECKPOINT record, flush, and truncate the file so it holds
    /// only that checkpoint. Callers must have made the snapshot durable
    /// first.
    pub fn checkpoint(&self) -> EngineResult<u64> {
        let mut inner = self.inner.lock();
        // Flush stragglers before rewriting the file.
        let pending = std::mem::take(&mut inner.buffer);
        for (_, bytes) in &pending {
            write_frame(&mut inner.file, bytes)?;
        }
        let lsn = inner.next_lsn;
        inner.next_lsn += 1;
        let record = LogRecord {
            lsn,
            txn_id: 0,
            prev_lsn: 0,
            kind: LogRecordKind::Checkpoint,
            payload: LogPayload::None,
        };
        let bytes = bincode::serialize(&record)
            .map_err(|e| EngineError::io(format!("wal serialize failed: {}", e)))?;
        let tmp = self.path.with_extension("log.tmp");
        {
            let mut f = File::create(&tmp)?;
            write_frame(&mut f, &bytes)?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        inner.file = OpenOptions::new().append(true).open(&self.path)?;
        inner.flushed_lsn = lsn;
        debug!(target: "opaldb::wal", "checkpoint at lsn {}, wal truncated", lsn);
        Ok(lsn)
    }
}

fn write_frame(file: &mut File, bytes: &[u8]) -> EngineResult<()> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    let crc = hasher.finalize();
    file.write_all(&(bytes.len() as u32).to_le_bytes())?;
    file.write_all(&crc.to_le_bytes())?;
    file.write_all(bytes)?;
    Ok(())
}

/// Read every well-formed record; a torn tail (partial frame or checksum
/// mismatch from a crash mid-write) ends the scan cleanly.
pub fn read_records(path: &Path) -> EngineResult<Vec<LogRecord>> {
    let mut records = Vec::new();
    let mut data = Vec::new();
    match File::open(path) {
        Ok(mut f) => {
            f.read_to_end(&mut data)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
        Err(e) => return Err(e.into()),
    }
    let mut at = 0usize;
    while at + 8 <= data.len() {
        let len = u32::from_le_bytes(data[at..at + 4].try_into().expect("4 bytes")) as usize;
        let crc = u32::from_le_bytes(data[at + 4..at + 8].try_into().expect("4 bytes"));
        let start = at + 8;
        let end = match start.checked_add(len) {
            Some(e) if e <= data.len() => e,
            _ => break, // torn tail
        };
        let bytes = &data[start..end];
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(bytes);
        if hasher.finalize() != crc {
            debug!(target: "opaldb::wal", "checksum mismatch at offset {}, stopping scan", at);
            break;
        }
        match bincode::deserialize::<LogRecord>(bytes) {
            Ok(r) => records.push(r),
            Err(_) => break,
        }
        at = end;
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_payload(after: Option<Vec<Value>>) -> LogPayload {
        LogPayload::Row {
            db: "default".into(),
            table: "t".into(),
            row_id: RowId { page_id: 0, slot: 0 },
            before: None,
            after,
        }
    }

    #[test]
    fn append_assigns_monotone_lsns() {
        let dir = tempfile::tempdir().unwrap();
        let log = LogManager::open(dir.path()).unwrap();
        let a = log.append(1, 0, LogRecordKind::Begin, LogPayload::None).unwrap();
        let b = log.append(1, a, LogRecordKind::Insert, row_payload(Some(vec![Value::Int(1)]))).unwrap();
        let c = log.append(1, b, LogRecordKind::Commit, LogPayload::None).unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn flush_then_reopen_reads_records() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = LogManager::open(dir.path()).unwrap();
            let a = log.append(1, 0, LogRecordKind::Begin, LogPayload::None).unwrap();
            let b = log
                .append(1, a, LogRecordKind::Insert, row_payload(Some(vec![Value::Int(7)])))
                .unwrap();
            log.flush_to_lsn(b).unwrap();
        }
        let log = LogManager::open(dir.path()).unwrap();
        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, LogRecordKind::Begin);
        assert_eq!(records[1].kind, LogRecordKind::Insert);
        assert_eq!(records[1].prev_lsn, records[0].lsn);
        // New appends continue past the recovered LSN.
        let next = log.append(2, 0, LogRecordKind::Begin, LogPayload::None).unwrap();
        assert!(next > records[1].lsn);
    }

    #[test]
    fn unflushed_records_are_not_durable() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = LogManager::open(dir.path()).unwrap();
            let a = log.append(1, 0, LogRecordKind::Begin, LogPayload::None).unwrap();
            log.flush_to_lsn(a).unwrap();
            let _ = log
                .append(1, a, LogRecordKind::Insert, row_payload(Some(vec![Value::Int(9)])))
                .unwrap();
            // no flush of the insert
        }
        let log = LogManager::open(dir.path()).unwrap();
        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, LogRecordKind::Begin);
    }

    #[test]
    fn torn_tail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let log = LogManager::open(dir.path()).unwrap();
            let a = log.append(1, 0, LogRecordKind::Begin, LogPayload::None).unwrap();
            log.flush_to_lsn(a).unwrap();
        }
        // Simulate a crash mid-frame: garbage length prefix at the tail.
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[0xFF, 0xFF, 0x00, 0x00, 0x12]).unwrap();
        drop(f);
        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn checkpoint_truncates_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = LogManager::open(dir.path()).unwrap();
        for i in 0..5 {
            let lsn = log.append(1, i, LogRecordKind::Insert, row_payload(None)).unwrap();
            log.flush_to_lsn(lsn).unwrap();
        }
        let ck = log.checkpoint().unwrap();
        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, LogRecordKind::Checkpoint);
        assert_eq!(records[0].lsn, ck);
        // LSNs remain monotone after truncation.
        let next = log.append(2, 0, LogRecordKind::Begin, LogPayload::None).unwrap();
        assert_eq!(next, ck + 1);
    }
}
