//! Append-only event log on disk.
//!
//! # Layout
//!
//! ```text
//! <dir>/events.log   record*           append-only
//! <dir>/events.ack   "<seqnum>\n"      replaced atomically
//!
//! record = len: u32 LE | checksum: [u8; 4] | body: [u8; len]
//! checksum = first 4 bytes of BLAKE3(body)
//! body = MessagePack-encoded EventRecord
//! ```
//!
//! The ack file holds the highest sequence number that was acknowledged (or
//! evicted). Records at or below it are skipped on open. A crash mid-append
//! leaves a short or corrupt final record; open truncates the log back to the
//! last intact record.
//!
//! The log only grows until it is compacted: once enough acknowledged records
//! have piled up, the pending records are rewritten to a fresh file that
//! replaces the old one by rename.

use std::io;
use std::path::{Path, PathBuf};

use engage_types::{EventRecord, SequenceNumber};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::QueueError;

const LOG_FILE: &str = "events.log";
const ACK_FILE: &str = "events.ack";
const HEADER_LEN: usize = 8;
const CHECKSUM_LEN: usize = 4;

/// Contents recovered by [`EventLog::open`].
#[derive(Debug)]
pub struct Recovered {
    /// Intact records above the ack marker, in file order.
    pub records: Vec<EventRecord>,
    /// The persisted ack marker.
    pub acked_through: SequenceNumber,
}

/// Durable storage for the event queue.
#[derive(Debug)]
pub struct EventLog {
    dir: PathBuf,
    file: File,
    /// Byte length of the intact records in `events.log`.
    len: u64,
    /// Records currently in `events.log`, acknowledged ones included.
    records_in_log: usize,
    /// Set when a failed append could not be rolled back.
    poisoned: bool,
    #[cfg(test)]
    fault: Option<Fault>,
}

/// Injected append failure.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fault {
    /// Bytes of the frame written before the append fails.
    pub(crate) written: usize,
    /// Whether the rollback fails too.
    pub(crate) rollback_fails: bool,
}

impl EventLog {
    /// Open (or create) the log in `dir` and recover its contents.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<(Self, Recovered), QueueError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| io_error(&dir, e))?;

        let acked_through = read_ack(&dir.join(ACK_FILE)).await?;

        let log_path = dir.join(LOG_FILE);
        let bytes = match fs::read(&log_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(io_error(&log_path, e)),
        };

        let (all_records, valid_len) = decode_records(&bytes);
        if valid_len < bytes.len() {
            tracing::warn!(
                "Truncating torn event log tail: {} of {} bytes kept",
                valid_len,
                bytes.len()
            );
            truncate(&log_path, valid_len as u64).await?;
        }

        let records_in_log = all_records.len();
        let records: Vec<EventRecord> = all_records
            .into_iter()
            .filter(|record| record.sequence > acked_through)
            .collect();

        let file = open_append(&log_path).await?;

        tracing::info!(
            "Event log opened at {}: {} pending, acked through {:?}",
            dir.display(),
            records.len(),
            acked_through
        );

        Ok((
            Self {
                dir,
                file,
                len: valid_len as u64,
                records_in_log,
                poisoned: false,
                #[cfg(test)]
                fault: None,
            },
            Recovered {
                records,
                acked_through,
            },
        ))
    }

    /// Directory holding the log files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of records in the log file, acknowledged ones included.
    pub fn records_in_log(&self) -> usize {
        self.records_in_log
    }

    /// Append a record and sync it to disk.
    ///
    /// A failed append is rolled back so the file ends with the last intact
    /// record. If the rollback fails too, the log refuses further appends.
    pub async fn append(&mut self, record: &EventRecord) -> Result<(), QueueError> {
        let path = self.dir.join(LOG_FILE);
        if self.poisoned {
            return Err(QueueError::Poisoned { path });
        }
        let frame = encode_record(record)?;

        if let Err(e) = self.write_frame(&frame).await {
            self.rollback(&path).await;
            return Err(io_error(&path, e));
        }

        self.len += frame.len() as u64;
        self.records_in_log += 1;
        Ok(())
    }

    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        if let Some(fault) = self.fault {
            self.file.write_all(&frame[..fault.written.min(frame.len())]).await?;
            self.file.flush().await?;
            return Err(io::Error::new(io::ErrorKind::Other, "injected append failure"));
        }

        self.file.write_all(frame).await?;
        self.file.sync_data().await
    }

    /// Cut the file back to the last intact record.
    async fn rollback(&mut self, path: &Path) {
        #[cfg(test)]
        if self.fault.take().is_some_and(|fault| fault.rollback_fails) {
            self.poisoned = true;
            return;
        }

        // Surfaces and clears any error left by the failed write
        let _ = self.file.flush().await;
        let result = async {
            self.file.set_len(self.len).await?;
            self.file.sync_data().await
        }
        .await;

        if let Err(e) = result {
            tracing::error!(
                "Failed to roll back event log {}: {}; refusing further appends",
                path.display(),
                e
            );
            self.poisoned = true;
        }
    }

    /// Make the next append fail after writing `fault.written` bytes.
    #[cfg(test)]
    pub(crate) fn inject_fault(&mut self, fault: Fault) {
        self.fault = Some(fault);
    }

    /// Persist the ack marker, replacing the previous one atomically.
    pub async fn persist_ack(&self, acked_through: SequenceNumber) -> Result<(), QueueError> {
        let contents = format!("{}\n", acked_through.value());
        write_atomic(&self.dir, ACK_FILE, contents.as_bytes()).await
    }

    /// Rewrite the log so it holds only `pending`.
    ///
    /// The new file is written and opened for appending before it replaces
    /// the old one, so a failure at any step leaves the current log in use.
    pub async fn compact<'a>(
        &mut self,
        pending: impl IntoIterator<Item = &'a EventRecord>,
    ) -> Result<(), QueueError> {
        let mut bytes = Vec::new();
        let mut count = 0usize;
        for record in pending {
            bytes.extend_from_slice(&encode_record(record)?);
            count += 1;
        }

        let path = self.dir.join(LOG_FILE);
        let temp = self.dir.join(format!(".{}.tmp", LOG_FILE));

        let result = async {
            match fs::remove_file(&temp).await {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
            let mut file = OpenOptions::new()
                .append(true)
                .create_new(true)
                .open(&temp)
                .await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            fs::rename(&temp, &path).await?;
            Ok(file)
        }
        .await;

        let file = match result {
            Ok(file) => file,
            Err(e) => {
                let _ = fs::remove_file(&temp).await;
                return Err(io_error(&path, e));
            }
        };

        let before = self.records_in_log;
        self.file = file;
        self.len = bytes.len() as u64;
        self.records_in_log = count;

        tracing::debug!("Compacted event log: {} -> {} records", before, count);
        Ok(())
    }
}

fn encode_record(record: &EventRecord) -> Result<Vec<u8>, QueueError> {
    let body = record.to_record_bytes()?;
    let len = u32::try_from(body.len()).map_err(|_| QueueError::RecordTooLarge {
        len: body.len(),
    })?;

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&checksum(&body));
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode intact records from the front of `bytes`.
///
/// Returns the records and the length of the intact prefix.
fn decode_records(bytes: &[u8]) -> (Vec<EventRecord>, usize) {
    let mut records = Vec::new();
    let mut offset = 0usize;

    while bytes.len() - offset >= HEADER_LEN {
        let header = &bytes[offset..offset + HEADER_LEN];
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let expected = &header[4..HEADER_LEN];

        let body_start = offset + HEADER_LEN;
        let Some(body) = bytes.get(body_start..body_start + len) else {
            break;
        };
        if checksum(body).as_slice() != expected {
            break;
        }
        match EventRecord::from_record_bytes(body) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!("Undecodable event record at offset {}: {}", offset, e);
                break;
            }
        }
        offset = body_start + len;
    }

    (records, offset)
}

fn checksum(body: &[u8]) -> [u8; CHECKSUM_LEN] {
    let hash = blake3::hash(body);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&hash.as_bytes()[..CHECKSUM_LEN]);
    out
}

async fn read_ack(path: &Path) -> Result<SequenceNumber, QueueError> {
    match fs::read_to_string(path).await {
        Ok(contents) => match contents.trim().parse::<u64>() {
            Ok(value) => Ok(SequenceNumber::new(value)),
            Err(_) => {
                // Resending is safe, skipping is not
                tracing::warn!("Unreadable ack marker {:?}; resending from start", contents);
                Ok(SequenceNumber::zero())
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(SequenceNumber::zero()),
        Err(e) => Err(io_error(path, e)),
    }
}

async fn open_append(path: &Path) -> Result<File, QueueError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| io_error(path, e))
}

async fn truncate(path: &Path, len: u64) -> Result<(), QueueError> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| io_error(path, e))?;
    file.set_len(len).await.map_err(|e| io_error(path, e))?;
    file.sync_all().await.map_err(|e| io_error(path, e))
}

/// Write `bytes` to `dir/name` via a synced temp file and rename.
/// Replace `dir/name` with `bytes` via a synced temp file and a rename.
pub(crate) async fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<(), QueueError> {
    let path = dir.join(name);
    let temp = dir.join(format!(".{}.tmp", name));

    let result = async {
        let mut file = File::create(&temp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp, &path).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&temp).await;
        return Err(io_error(&path, e));
    }
    Ok(())
}

fn io_error(path: &Path, source: io::Error) -> QueueError {
    QueueError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engage_types::{Attributes, Timestamp};
    use tempfile::TempDir;

    fn record(seq: u64) -> EventRecord {
        let mut payload = Attributes::new();
        payload.insert("n".into(), serde_json::json!(seq));
        EventRecord {
            event_type: "event".into(),
            timestamp: Timestamp::from_millis(1_700_000_000_000 + seq),
            parameters: Attributes::new(),
            payload,
            sequence: SequenceNumber::new(seq),
        }
    }

    #[tokio::test]
    async fn empty_directory_opens_clean() {
        let dir = TempDir::new().unwrap();
        let (log, recovered) = EventLog::open(dir.path()).await.unwrap();

        assert!(recovered.records.is_empty());
        assert_eq!(recovered.acked_through, SequenceNumber::zero());
        assert_eq!(log.records_in_log(), 0);
    }

    #[tokio::test]
    async fn appended_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let (mut log, _) = EventLog::open(dir.path()).await.unwrap();
            for seq in 1..=3 {
                log.append(&record(seq)).await.unwrap();
            }
        }

        let (_, recovered) = EventLog::open(dir.path()).await.unwrap();
        assert_eq!(recovered.records, vec![record(1), record(2), record(3)]);
    }

    #[tokio::test]
    async fn ack_marker_hides_acknowledged_records() {
        let dir = TempDir::new().unwrap();
        {
            let (mut log, _) = EventLog::open(dir.path()).await.unwrap();
            for seq in 1..=4 {
                log.append(&record(seq)).await.unwrap();
            }
            log.persist_ack(SequenceNumber::new(2)).await.unwrap();
        }

        let (log, recovered) = EventLog::open(dir.path()).await.unwrap();
        assert_eq!(recovered.acked_through, SequenceNumber::new(2));
        assert_eq!(recovered.records, vec![record(3), record(4)]);
        assert_eq!(log.records_in_log(), 4);
    }

    #[tokio::test]
    async fn torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        {
            let (mut log, _) = EventLog::open(dir.path()).await.unwrap();
            log.append(&record(1)).await.unwrap();
            log.append(&record(2)).await.unwrap();
        }

        // Simulate a crash halfway through a third append
        let path = dir.path().join(LOG_FILE);
        let intact = std::fs::metadata(&path).unwrap().len();
        let frame = encode_record(&record(3)).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(&frame[..frame.len() / 2]);
        std::fs::write(&path, bytes).unwrap();

        let (mut log, recovered) = EventLog::open(dir.path()).await.unwrap();
        assert_eq!(recovered.records, vec![record(1), record(2)]);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), intact);

        // Appends continue cleanly after the truncation point
        log.append(&record(3)).await.unwrap();
        drop(log);
        let (_, recovered) = EventLog::open(dir.path()).await.unwrap();
        assert_eq!(recovered.records.len(), 3);
    }

    #[tokio::test]
    async fn corrupt_record_stops_recovery() {
        let dir = TempDir::new().unwrap();
        {
            let (mut log, _) = EventLog::open(dir.path()).await.unwrap();
            log.append(&record(1)).await.unwrap();
            log.append(&record(2)).await.unwrap();
        }

        let path = dir.path().join(LOG_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        let (_, recovered) = EventLog::open(dir.path()).await.unwrap();
        assert_eq!(recovered.records, vec![record(1)]);
    }

    #[tokio::test]
    async fn unreadable_ack_resends_everything() {
        let dir = TempDir::new().unwrap();
        {
            let (mut log, _) = EventLog::open(dir.path()).await.unwrap();
            log.append(&record(1)).await.unwrap();
        }
        std::fs::write(dir.path().join(ACK_FILE), b"garbage").unwrap();

        let (_, recovered) = EventLog::open(dir.path()).await.unwrap();
        assert_eq!(recovered.acked_through, SequenceNumber::zero());
        assert_eq!(recovered.records, vec![record(1)]);
    }

    #[tokio::test]
    async fn compaction_keeps_only_pending() {
        let dir = TempDir::new().unwrap();
        let (mut log, _) = EventLog::open(dir.path()).await.unwrap();
        for seq in 1..=5 {
            log.append(&record(seq)).await.unwrap();
        }
        log.persist_ack(SequenceNumber::new(3)).await.unwrap();

        let pending = [record(4), record(5)];
        log.compact(pending.iter()).await.unwrap();
        assert_eq!(log.records_in_log(), 2);

        // New appends go to the compacted file
        log.append(&record(6)).await.unwrap();
        drop(log);

        let (log, recovered) = EventLog::open(dir.path()).await.unwrap();
        assert_eq!(recovered.records, vec![record(4), record(5), record(6)]);
        assert_eq!(log.records_in_log(), 3);
        assert!(!dir.path().join(".events.log.tmp").exists());
    }

    #[tokio::test]
    async fn failed_compaction_keeps_current_log_in_use() {
        let dir = TempDir::new().unwrap();
        let (mut log, _) = EventLog::open(dir.path()).await.unwrap();
        for seq in 1..=5 {
            log.append(&record(seq)).await.unwrap();
        }
        log.persist_ack(SequenceNumber::new(3)).await.unwrap();

        // The temp path is taken by a directory, so the rewrite cannot start
        std::fs::create_dir(dir.path().join(".events.log.tmp")).unwrap();
        let pending = [record(4), record(5)];
        assert!(log.compact(pending.iter()).await.is_err());
        assert_eq!(log.records_in_log(), 5);

        log.append(&record(6)).await.unwrap();
        drop(log);

        let (log, recovered) = EventLog::open(dir.path()).await.unwrap();
        assert_eq!(recovered.records, vec![record(4), record(5), record(6)]);
        assert_eq!(log.records_in_log(), 6);
    }

    #[tokio::test]
    async fn rolled_back_append_leaves_intact_file() {
        let dir = TempDir::new().unwrap();
        let (mut log, _) = EventLog::open(dir.path()).await.unwrap();
        log.append(&record(1)).await.unwrap();
        let path = dir.path().join(LOG_FILE);
        let intact = std::fs::metadata(&path).unwrap().len();

        log.inject_fault(Fault {
            written: 7,
            rollback_fails: false,
        });
        assert!(log.append(&record(2)).await.is_err());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), intact);
        assert_eq!(log.records_in_log(), 1);

        log.append(&record(2)).await.unwrap();
        drop(log);
        let (_, recovered) = EventLog::open(dir.path()).await.unwrap();
        assert_eq!(recovered.records, vec![record(1), record(2)]);
    }
}
