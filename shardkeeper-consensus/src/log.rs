//! Append-only metadata log segments (spec §6: "Log segments are append-only files
//! with a trailing checksum per record").
//!
//! Each record is written as `[u32 length][bincode payload][32-byte blake3 checksum]`.
//! On startup the most recent segment is replayed and any trailing record that fails
//! its checksum (a torn write from a crash mid-append) is discarded rather than
//! treated as corruption of the whole log.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::rpc::{LogEntry, LogIndex, Term};

const MAX_SEGMENT_BYTES: u64 = 64 * 1024 * 1024;

struct SegmentWriter {
    file: std::fs::File,
    path: PathBuf,
    bytes_written: u64,
}

/// The metadata log's durable, append-only record of committed and uncommitted
/// entries. `entries` mirrors what's on disk; every mutation here writes through
/// before returning.
pub struct SegmentLog {
    dir: PathBuf,
    entries: Mutex<Vec<LogEntry>>,
    writer: Mutex<SegmentWriter>,
}

fn encode_record(entry: &LogEntry) -> anyhow::Result<Vec<u8>> {
    let payload = bincode::serialize(entry)?;
    let checksum = blake3::hash(&payload);
    let mut buf = Vec::with_capacity(4 + payload.len() + 32);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(checksum.as_bytes());
    Ok(buf)
}

fn decode_records(bytes: &[u8]) -> Vec<LogEntry> {
    let mut entries = Vec::new();
    let mut offset = 0usize;
    while offset + 4 <= bytes.len() {
        let len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
        let payload_start = offset + 4;
        let payload_end = payload_start + len;
        let checksum_end = payload_end + 32;
        if checksum_end > bytes.len() {
            tracing::warn!("truncated trailing record in log segment, discarding");
            break;
        }
        let payload = &bytes[payload_start..payload_end];
        let checksum = &bytes[payload_end..checksum_end];
        if blake3::hash(payload).as_bytes() != checksum {
            tracing::warn!("checksum mismatch in log segment, discarding trailing record");
            break;
        }
        match bincode::deserialize::<LogEntry>(payload) {
            Ok(entry) => entries.push(entry),
            Err(_) => break,
        }
        offset = checksum_end;
    }
    entries
}

fn segment_path(dir: &Path, first_index: LogIndex) -> PathBuf {
    dir.join(format!("segment-{:020}.log", first_index))
}

fn list_segments(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut segments = Vec::new();
    if dir.exists() {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("log") {
                segments.push(path);
            }
        }
    }
    segments.sort();
    Ok(segments)
}

impl SegmentLog {
    /// Opens (creating if absent) the log directory, replaying all segments in order.
    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut entries = Vec::new();
        for path in list_segments(&dir)? {
            let mut buf = Vec::new();
            std::fs::File::open(&path)?.read_to_end(&mut buf)?;
            entries.extend(decode_records(&buf));
        }

        let next_index = entries.last().map(|e| e.index + 1).unwrap_or(0);
        let path = segment_path(&dir, next_index);
        let file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
        let bytes_written = file.metadata()?.len();

        Ok(Self {
            dir,
            entries: Mutex::new(entries),
            writer: Mutex::new(SegmentWriter {
                file,
                path,
                bytes_written,
            }),
        })
    }

    pub fn last_index(&self) -> LogIndex {
        self.entries.lock().last().map(|e| e.index).unwrap_or(0)
    }

    pub fn last_term(&self) -> Term {
        self.entries.lock().last().map(|e| e.term).unwrap_or(0)
    }

    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index == 0 {
            return Some(0);
        }
        self.entries.lock().iter().find(|e| e.index == index).map(|e| e.term)
    }

    pub fn entries_from(&self, index: LogIndex) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.index >= index)
            .cloned()
            .collect()
    }

    pub fn get(&self, index: LogIndex) -> Option<LogEntry> {
        self.entries.lock().iter().find(|e| e.index == index).cloned()
    }

    /// Appends new entries, durably, after discarding any existing entries at or past
    /// the first new entry's index (conflict resolution on `AppendEntries`). A
    /// committed entry is never overwritten by correct callers (spec §4.6 safety); the
    /// leader only ever sends a conflicting suffix past what it knows is committed.
    pub fn append_after_conflict_check(&self, new_entries: &[LogEntry]) -> anyhow::Result<()> {
        if new_entries.is_empty() {
            return Ok(());
        }
        let first_new_index = new_entries[0].index;

        {
            let mut entries = self.entries.lock();
            entries.retain(|e| e.index < first_new_index);
            entries.extend_from_slice(new_entries);
        }

        self.rewrite_all_segments()
    }

    fn rewrite_all_segments(&self) -> anyhow::Result<()> {
        for path in list_segments(&self.dir)? {
            let _ = std::fs::remove_file(path);
        }
        let entries = self.entries.lock().clone();
        let next_index = entries.last().map(|e| e.index + 1).unwrap_or(0);
        let path = segment_path(&self.dir, entries.first().map(|e| e.index).unwrap_or(0));
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        for entry in &entries {
            file.write_all(&encode_record(entry)?)?;
        }
        file.sync_all()?;

        let mut writer = self.writer.lock();
        writer.path = path;
        writer.bytes_written = file.metadata()?.len();
        writer.file = file;
        let _ = next_index;
        Ok(())
    }

    /// Appends a single entry to the tail of the log without a conflict check, used by
    /// the leader for its own locally originated entries.
    pub fn append(&self, entry: LogEntry) -> anyhow::Result<()> {
        let record = encode_record(&entry)?;

        {
            let mut writer = self.writer.lock();
            if writer.bytes_written + record.len() as u64 > MAX_SEGMENT_BYTES {
                let next_path = segment_path(&self.dir, entry.index);
                let new_file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&next_path)?;
                writer.file = new_file;
                writer.path = next_path;
                writer.bytes_written = 0;
            }
            writer.file.write_all(&record)?;
            writer.file.sync_all()?;
            writer.bytes_written += record.len() as u64;
        }

        self.entries.lock().push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardkeeper_core::LogRecord;

    fn entry(index: LogIndex, term: Term) -> LogEntry {
        LogEntry {
            term,
            index,
            record: LogRecord::FileDelete {
                key: shardkeeper_core::FileKey::new("alice", "doc.txt"),
            },
        }
    }

    #[test]
    fn append_and_reopen_replays_entries() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = SegmentLog::open(dir.path()).unwrap();
            log.append(entry(0, 1)).unwrap();
            log.append(entry(1, 1)).unwrap();
        }
        let reopened = SegmentLog::open(dir.path()).unwrap();
        assert_eq!(reopened.last_index(), 1);
        assert_eq!(reopened.entries_from(0).len(), 2);
    }

    #[test]
    fn conflict_check_truncates_diverging_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let log = SegmentLog::open(dir.path()).unwrap();
        log.append(entry(0, 1)).unwrap();
        log.append(entry(1, 1)).unwrap();
        log.append(entry(2, 1)).unwrap();

        log.append_after_conflict_check(&[entry(1, 2)]).unwrap();

        assert_eq!(log.last_index(), 1);
        assert_eq!(log.last_term(), 2);
    }
}
