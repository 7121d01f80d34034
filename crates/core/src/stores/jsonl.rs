//! Append-only JSON-lines chunk store. One record per line; the file is
//! replayed into memory on open.

use super::{poisoned, rank_records};
use crate::error::StoreError;
use crate::models::{ChunkRecord, ScoredChunk};
use crate::traits::ChunkStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::{debug, warn};

pub struct JsonlChunkStore {
    path: PathBuf,
    records: RwLock<HashMap<String, ChunkRecord>>,
    writer: Mutex<Option<RecordLog<File>>>,
}

/// Appends whole lines. After a failed write the tail may hold a partial
/// record, so the next append terminates it first.
struct RecordLog<W> {
    inner: W,
    torn: bool,
}

impl<W: Write> RecordLog<W> {
    fn append(&mut self, line: &[u8]) -> io::Result<()> {
        if self.torn {
            self.inner.write_all(b"\n")?;
            self.torn = false;
        }
        let written = self.inner.write_all(line).and_then(|()| self.inner.flush());
        if written.is_err() {
            self.torn = true;
        }
        written
    }
}

impl JsonlChunkStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let (records, needs_newline) = if path.exists() {
            let content = fs::read_to_string(&path)?;
            let needs_newline = !content.is_empty() && !content.ends_with('\n');
            (replay(&path, &content), needs_newline)
        } else {
            (HashMap::new(), false)
        };

        // A record cut short by a crash is terminated before the next append.
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        debug!(path = %path.display(), records = records.len(), "opened chunk store");

        Ok(Self {
            path,
            records: RwLock::new(records),
            writer: Mutex::new(Some(RecordLog {
                inner: file,
                torn: needs_newline,
            })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn replay(path: &Path, content: &str) -> HashMap<String, ChunkRecord> {
    let mut records = HashMap::new();
    for (line_number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ChunkRecord>(line) {
            Ok(record) => {
                records
                    .entry(record.chunk.chunk_id.clone())
                    .or_insert(record);
            }
            Err(error) => warn!(
                path = %path.display(),
                line = line_number + 1,
                %error,
                "skipping unreadable chunk record"
            ),
        }
    }
    records
}

#[async_trait]
impl ChunkStore for JsonlChunkStore {
    async fn contains(&self, chunk_id: &str) -> Result<bool, StoreError> {
        Ok(self.records.read().map_err(poisoned)?.contains_key(chunk_id))
    }

    async fn insert(&self, record: ChunkRecord) -> Result<(), StoreError> {
        if self.contains(&record.chunk.chunk_id).await? {
            return Ok(());
        }

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        {
            let mut writer = self.writer.lock().map_err(poisoned)?;
            let writer = writer.as_mut().ok_or_else(|| {
                StoreError::Request(format!("chunk store {} is closed", self.path.display()))
            })?;
            writer.append(line.as_bytes())?;
        }

        // Only a fully written record becomes searchable.
        self.records
            .write()
            .map_err(poisoned)?
            .entry(record.chunk.chunk_id.clone())
            .or_insert(record);
        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(rank_records(records.values(), query_vector, limit))
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.records.read().map_err(poisoned)?.len())
    }

    async fn close(&self) -> Result<(), StoreError> {
        let writer = self.writer.lock().map_err(poisoned)?.take();
        if let Some(log) = writer {
            log.inner.sync_all()?;
        }
        Ok(())
    }
}
