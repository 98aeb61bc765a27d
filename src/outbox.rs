use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::model::{Ms, now_ms};
use crate::store::StoreError;

pub const APPOINTMENT_CANCELLED: &str = "AppointmentCancelled";

/// Durable record of a domain occurrence awaiting downstream delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Ulid,
    pub event_type: String,
    pub aggregate_id: Ulid,
    pub payload_json: String,
    pub created_at: Ms,
    pub processed_at: Option<Ms>,
}

impl OutboxEvent {
    pub fn new(event_type: impl Into<String>, aggregate_id: Ulid, payload_json: String) -> Self {
        Self {
            id: Ulid::new(),
            event_type: event_type.into(),
            aggregate_id,
            payload_json,
            created_at: now_ms(),
            processed_at: None,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}

/// Append-only. The engine never reads back what it wrote.
#[async_trait]
pub trait OutboxSink: Send + Sync {
    async fn append(&self, event: OutboxEvent) -> Result<(), StoreError>;
}

/// The pump's view of the outbox.
#[async_trait]
pub trait OutboxSource: Send + Sync {
    /// Unprocessed events of `event_type`, oldest first.
    async fn pending(&self, event_type: &str) -> Result<Vec<OutboxEvent>, StoreError>;

    /// Returns false if the event is unknown or was already processed.
    async fn mark_processed(&self, id: Ulid, at: Ms) -> Result<bool, StoreError>;
}

// ── Log format ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum Record {
    Appended(OutboxEvent),
    Processed { id: Ulid, at: Ms },
}

/// Write `record` as one frame: little-endian length, bincode payload, crc32 of the payload.
fn write_frame(writer: &mut impl Write, record: &Record) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// The outbox file: a sequence of [`write_frame`] frames, each holding one [`Record`].
/// Replay keeps every frame up to the first torn or corrupt one.
struct LogFile {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl LogFile {
    fn open(path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append one record and fsync.
    fn append(&mut self, record: &Record) -> io::Result<()> {
        write_frame(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Rewrite the log with `records` via temp file + atomic rename.
    fn compact(&mut self, records: &[Record]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("log.tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            for record in records {
                write_frame(&mut writer, record)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    fn replay(path: &Path) -> io::Result<Vec<Record>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        while let Some(payload) = read_frame(&mut reader)? {
            match bincode::deserialize::<Record>(&payload) {
                Ok(record) => records.push(record),
                Err(_) => break,
            }
        }
        Ok(records)
    }
}

/// Next checksummed payload, or `None` at end of file or at a torn or corrupt frame.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut word = [0u8; 4];
    if !read_or_eof(reader, &mut word)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(word) as usize];
    if !read_or_eof(reader, &mut payload)? || !read_or_eof(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(Some(payload))
}

fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Rebuild the event list from log records.
///
/// `Appended` adds an event in log order. `Processed` stamps `processed_at` on an
/// event appended earlier in the log; a marker for an id not yet seen is dropped, so
/// the event it names stays pending and the pump marks it again.
fn fold(records: Vec<Record>) -> Vec<OutboxEvent> {
    let mut events: Vec<OutboxEvent> = Vec::new();
    for record in records {
        match record {
            Record::Appended(event) => events.push(event),
            Record::Processed { id, at } => {
                if let Some(e) = events.iter_mut().find(|e| e.id == id) {
                    e.processed_at = Some(at);
                }
            }
        }
    }
    events
}

// ── File-backed outbox ───────────────────────────────────────────

struct LogState {
    file: LogFile,
    /// Folded view, in append order.
    events: Vec<OutboxEvent>,
}

/// File-backed outbox. The file is read once, at [`OutboxLog::open`]; afterwards the
/// in-memory view is authoritative and only this handle writes the file. Every
/// producer and the pump must therefore share one `Arc<OutboxLog>`: a second handle on
/// the same path would not see the first one's appends, and compaction renames the
/// file out from under it.
pub struct OutboxLog {
    inner: Mutex<LogState>,
}

impl OutboxLog {
    /// Open (or create) the log at `path` and fold its records into memory. A
    /// processed marker only counts for an event appended before it.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = fold(LogFile::replay(path)?);
        let file = LogFile::open(path)?;
        Ok(Self {
            inner: Mutex::new(LogState { file, events }),
        })
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.inner.lock().await.file.appends_since_compact
    }

    /// Rewrite the log with one record per live event, dropping processed events.
    pub async fn compact(&self) -> io::Result<()> {
        let mut state = self.inner.lock().await;
        state.events.retain(|e| !e.is_processed());
        let records: Vec<Record> = state.events.iter().cloned().map(Record::Appended).collect();
        state.file.compact(&records)
    }
}

#[async_trait]
impl OutboxSink for OutboxLog {
    async fn append(&self, event: OutboxEvent) -> Result<(), StoreError> {
        let mut state = self.inner.lock().await;
        state.file.append(&Record::Appended(event.clone()))?;
        state.events.push(event);
        Ok(())
    }
}

#[async_trait]
impl OutboxSource for OutboxLog {
    async fn pending(&self, event_type: &str) -> Result<Vec<OutboxEvent>, StoreError> {
        let state = self.inner.lock().await;
        Ok(state
            .events
            .iter()
            .filter(|e| !e.is_processed() && e.event_type == event_type)
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, id: Ulid, at: Ms) -> Result<bool, StoreError> {
        let mut state = self.inner.lock().await;
        let Some(pos) = state
            .events
            .iter()
            .position(|e| e.id == id && !e.is_processed())
        else {
            return Ok(false);
        };
        state.file.append(&Record::Processed { id, at })?;
        state.events[pos].processed_at = Some(at);
        Ok(true)
    }
}

// ── In-memory outbox ─────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryOutbox {
    events: Mutex<Vec<OutboxEvent>>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<OutboxEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl OutboxSink for MemoryOutbox {
    async fn append(&self, event: OutboxEvent) -> Result<(), StoreError> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

#[async_trait]
impl OutboxSource for MemoryOutbox {
    async fn pending(&self, event_type: &str) -> Result<Vec<OutboxEvent>, StoreError> {
        Ok(self
            .events
            .lock()
            .await
            .iter()
            .filter(|e| !e.is_processed() && e.event_type == event_type)
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, id: Ulid, at: Ms) -> Result<bool, StoreError> {
        let mut events = self.events.lock().await;
        match events.iter_mut().find(|e| e.id == id && !e.is_processed()) {
            Some(e) => {
                e.processed_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
