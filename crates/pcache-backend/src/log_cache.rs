#![forbid(unsafe_code)]

//! File-log storage engine.
//!
//! ## Format (normative)
//! - The data file is an append-only sequence of frames (see `frame`); the
//!   last frame for a key wins.
//! - The journal holds the frames of the write in flight: one frame for an
//!   insert, every live frame for a compaction.
//!
//! ## Insert protocol
//! 1. write the frame to the journal and sync it,
//! 2. append the frame to the data file and sync it,
//! 3. truncate the journal.
//!
//! ## Recovery on open
//! - Frames are scanned from the start of the data file to rebuild the index.
//!   A torn trailing frame is cut off.
//! - Complete frames left in the journal are appended again (redo). Replaying
//!   a frame that already reached the data file only duplicates it, which the
//!   last-write-wins rule makes harmless.
//! - When overwritten frames outweigh live ones (and pass [`COMPACT_MIN_DEAD`]),
//!   the data file is rewritten with only the live frames. The image goes
//!   through the journal first, so a crash mid-rewrite is redone on the next
//!   open.
//! - Read-only instances never modify either file.

use std::{
    collections::HashMap,
    fs::File,
    io::{self, BufReader, Read, Seek, SeekFrom, Write},
    time::{SystemTime, UNIX_EPOCH},
};

use tracing::{debug, trace, warn};

use crate::{
    BackendError, BackendParams, BackendResult, Entry, EntryMetadata,
    cache::{Backend, PersistentCache},
    frame::{self, ReadFrame},
};

/// Dead bytes a data file must carry before an open compacts it.
pub const COMPACT_MIN_DEAD: u64 = 64 * 1024;

/// Opens [`LogCache`] instances.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogBackend;

impl Backend for LogBackend {
    type Cache = LogCache;

    fn open(&self, params: BackendParams) -> BackendResult<LogCache> {
        LogCache::open(params)
    }
}

/// Where the latest frame of a key lives in the data file.
#[derive(Clone, Copy, Debug)]
struct Slot {
    offset: u64,
    len: u64,
}

/// One open record log.
#[derive(Debug)]
pub struct LogCache {
    db: File,
    journal: File,
    index: HashMap<String, Slot>,
    end: u64,
    writable: bool,
}

impl LogCache {
    /// Bind to `params` and recover the index.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidParams`] when a handle is missing, or an
    /// I/O error from recovery.
    pub fn open(params: BackendParams) -> BackendResult<Self> {
        let writable = params.is_writable();
        let db_path = params.db_path().to_path_buf();
        let (db, journal) = params.into_files().ok_or(BackendError::InvalidParams)?;

        let mut cache = Self {
            db,
            journal,
            index: HashMap::new(),
            end: 0,
            writable,
        };
        cache.recover()?;

        debug!(
            path = %db_path.display(),
            keys = cache.index.len(),
            bytes = cache.end,
            writable,
            "log cache opened"
        );
        Ok(cache)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Bytes of the data file taken by overwritten frames.
    pub fn dead_bytes(&self) -> u64 {
        let live: u64 = self.index.values().map(|slot| slot.len).sum();
        self.end.saturating_sub(live)
    }

    fn recover(&mut self) -> BackendResult<()> {
        let valid_len = self.scan()?;
        let file_len = self.db.metadata()?.len();

        if valid_len < file_len {
            if self.writable {
                warn!(valid_len, file_len, "cutting torn tail off data file");
                self.db.set_len(valid_len)?;
            } else {
                debug!(valid_len, file_len, "torn tail ignored on read-only open");
            }
        }
        self.end = valid_len;

        if self.writable {
            self.replay_journal()?;
            let dead = self.dead_bytes();
            if dead >= COMPACT_MIN_DEAD && dead > self.end - dead {
                self.compact()?;
            }
        }
        Ok(())
    }

    /// Rebuild the index; returns the offset just past the last good frame.
    fn scan(&mut self) -> BackendResult<u64> {
        self.db.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&self.db);
        let mut offset = 0u64;

        loop {
            match frame::read_frame(&mut reader)? {
                ReadFrame::Frame { payload, len } => match frame::decode(&payload) {
                    Ok(record) => {
                        self.index.insert(record.key, Slot { offset, len });
                        offset += len;
                    }
                    Err(e) => {
                        warn!(offset, error = %e, "undecodable frame, stopping scan");
                        break;
                    }
                },
                ReadFrame::End => break,
                ReadFrame::Torn => {
                    warn!(offset, "torn frame at end of data file");
                    break;
                }
            }
        }
        Ok(offset)
    }

    fn replay_journal(&mut self) -> BackendResult<()> {
        self.journal.seek(SeekFrom::Start(0))?;
        let mut pending = Vec::new();
        {
            let mut reader = BufReader::new(&self.journal);
            loop {
                match frame::read_frame(&mut reader)? {
                    ReadFrame::Frame { payload, .. } => match frame::decode(&payload) {
                        Ok(record) => pending.push(record),
                        Err(e) => {
                            warn!(error = %e, "discarding undecodable journal frame");
                            break;
                        }
                    },
                    ReadFrame::Torn => {
                        debug!("discarding incomplete journal frame");
                        break;
                    }
                    ReadFrame::End => break,
                }
            }
        }

        if !pending.is_empty() {
            debug!(frames = pending.len(), "replaying journal");
        }
        for record in pending {
            let frame = frame::encode(&record.key, &record.content, record.metadata)?;
            self.append(&record.key, &frame)?;
        }

        self.journal.set_len(0)?;
        Ok(())
    }

    /// Rewrite the data file with only the latest frame of every key.
    fn compact(&mut self) -> BackendResult<()> {
        let before = self.end;
        let mut live: Vec<(String, Slot)> =
            self.index.iter().map(|(key, slot)| (key.clone(), *slot)).collect();
        live.sort_by_key(|(_, slot)| slot.offset);

        let mut image = Vec::new();
        let mut index = HashMap::with_capacity(live.len());
        for (key, slot) in live {
            let start = image.len();
            let len = usize::try_from(slot.len)
                .map_err(|_| BackendError::Corrupt { offset: slot.offset })?;
            image.resize(start + len, 0);
            self.db.seek(SeekFrom::Start(slot.offset))?;
            self.db.read_exact(&mut image[start..])?;
            index.insert(
                key,
                Slot {
                    offset: start as u64,
                    len: slot.len,
                },
            );
        }

        self.write_journal(&image)?;
        self.db.set_len(0)?;
        write_synced_at(&mut self.db, 0, &image)?;
        self.journal.set_len(0)?;

        self.index = index;
        self.end = image.len() as u64;
        debug!(before, after = self.end, keys = self.index.len(), "data file compacted");
        Ok(())
    }

    fn append(&mut self, key: &str, frame: &[u8]) -> BackendResult<()> {
        let offset = self.end;
        if let Err(e) = write_synced_at(&mut self.db, offset, frame) {
            // Drop partial bytes so the next append starts on a frame boundary.
            if let Err(rollback) = self.db.set_len(offset) {
                warn!(offset, error = %rollback, "cannot roll back partial append");
            }
            return Err(e.into());
        }

        let len = frame.len() as u64;
        self.end = offset + len;
        self.index.insert(key.to_owned(), Slot { offset, len });
        Ok(())
    }

    fn write_journal(&mut self, frame: &[u8]) -> BackendResult<()> {
        self.journal.set_len(0)?;
        write_synced_at(&mut self.journal, 0, frame)?;
        Ok(())
    }
}

impl PersistentCache for LogCache {
    fn find(&mut self, key: &str) -> BackendResult<Option<Entry>> {
        let Some(&Slot { offset, .. }) = self.index.get(key) else {
            trace!(key, "miss");
            return Ok(None);
        };

        self.db.seek(SeekFrom::Start(offset))?;
        let mut reader = &self.db;
        let ReadFrame::Frame { payload, .. } = frame::read_frame(&mut reader)? else {
            return Err(BackendError::Corrupt { offset });
        };

        let record = frame::decode(&payload)?;
        if record.key != key {
            return Err(BackendError::Corrupt { offset });
        }
        trace!(key, bytes = record.content.len(), "hit");
        Ok(Some(Entry::new(record.content, record.metadata)))
    }

    fn insert(
        &mut self,
        key: &str,
        content: &[u8],
        metadata: EntryMetadata,
    ) -> BackendResult<()> {
        if !self.writable {
            return Err(BackendError::ReadOnly);
        }

        let mut metadata = metadata;
        if metadata.write_timestamp == 0 {
            metadata.write_timestamp = now_millis();
        }

        let frame = frame::encode(key, content, metadata)?;
        self.write_journal(&frame)?;
        self.append(key, &frame)?;
        self.journal.set_len(0)?;

        trace!(key, bytes = content.len(), "inserted");
        Ok(())
    }
}

fn write_synced_at(file: &mut File, offset: u64, data: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)?;
    file.sync_data()
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
