//! File-backed activity log.
//!
//! Single-node deployments (and tests) can keep the activity log in a
//! local append-only journal instead of the host database. Each entry is
//! a length-prefixed MessagePack encoding of an [`ActivityEvent`] followed
//! by a CRC32 of the encoded bytes.

use crate::activity::{ActivityEvent, ActivitySource};
use crate::error::{Result, SyncError};
use crate::types::ActivityId;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for journal files.
const JOURNAL_MAGIC: &[u8; 4] = b"ACT\0";

/// Current journal format version.
const JOURNAL_VERSION: u8 = 1;

/// Magic + version.
const HEADER_SIZE: u64 = 5;

/// Upper bound on a single encoded entry.
const MAX_ENTRY_SIZE: usize = 16 * 1024 * 1024;

/// Append-only activity journal.
pub struct ActivityJournal {
    path: PathBuf,

    /// Exclusively locked journal file.
    file: Mutex<File>,

    /// (activity id, entry offset) in append order.
    index: RwLock<Vec<(ActivityId, u64)>>,

    /// Offset where the next entry is written.
    end: Mutex<u64>,
}

impl ActivityJournal {
    /// Open or create a journal at `path`.
    ///
    /// A torn or corrupt tail (from a crash mid-append) is truncated away.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(SyncError::Locked);
        }

        let len = file.metadata()?.len();
        if len == 0 {
            file.write_all(JOURNAL_MAGIC)?;
            file.write_all(&[JOURNAL_VERSION])?;
            file.sync_all()?;
        }

        let (index, end) = Self::scan(&mut file)?;
        let file_len = file.metadata()?.len();
        if end < file_len {
            tracing::warn!(
                path = %path.display(),
                valid_bytes = end,
                file_bytes = file_len,
                "Truncating damaged journal tail"
            );
            file.set_len(end)?;
            file.sync_all()?;
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
            index: RwLock::new(index),
            end: Mutex::new(end),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event. Ids must increase and the encoded entry must fit
    /// within the size a reopen will accept.
    pub fn append(&self, event: &ActivityEvent) -> Result<()> {
        let mut file = self.file.lock();
        let mut end = self.end.lock();

        if let Some((last, _)) = self.index.read().last() {
            if &event.id <= last {
                return Err(SyncError::OutOfOrder {
                    last: last.clone(),
                    got: event.id.clone(),
                });
            }
        }

        let encoded = rmp_serde::to_vec_named(event)?;
        if encoded.len() > MAX_ENTRY_SIZE {
            return Err(SyncError::Serialization(format!(
                "Activity {} encodes to {} bytes, over the {} byte journal entry limit",
                event.id,
                encoded.len(),
                MAX_ENTRY_SIZE
            )));
        }
        let offset = *end;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&(encoded.len() as u32).to_le_bytes())?;
        file.write_all(&encoded)?;
        file.write_all(&crc32fast::hash(&encoded).to_le_bytes())?;

        *end = offset + 8 + encoded.len() as u64;
        self.index.write().push((event.id.clone(), offset));
        Ok(())
    }

    /// Flush appended entries to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Verify the header and read every intact entry.
    fn scan(file: &mut File) -> Result<(Vec<(ActivityId, u64)>, u64)> {
        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&mut *file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != JOURNAL_MAGIC {
            return Err(SyncError::InvalidFormat("Invalid journal magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != JOURNAL_VERSION {
            return Err(SyncError::InvalidFormat(format!(
                "Unsupported journal version: {}",
                version[0]
            )));
        }

        let mut index = Vec::new();
        let mut offset = HEADER_SIZE;
        while let Ok((event, size)) = Self::read_entry(&mut reader) {
            index.push((event.id, offset));
            offset += size;
        }

        Ok((index, offset))
    }

    /// Read one entry, returning it with its on-disk size.
    fn read_entry<R: Read>(reader: &mut R) -> Result<(ActivityEvent, u64)> {
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_ENTRY_SIZE {
            return Err(SyncError::Corruption("Journal entry too large".into()));
        }

        let mut encoded = vec![0u8; len];
        reader.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        if u32::from_le_bytes(checksum_bytes) != crc32fast::hash(&encoded) {
            return Err(SyncError::Corruption("Journal checksum mismatch".into()));
        }

        let event = rmp_serde::from_slice(&encoded)?;
        Ok((event, 8 + len as u64))
    }
}

impl ActivitySource for ActivityJournal {
    fn read_after(&self, after: Option<&ActivityId>, limit: usize) -> Result<Vec<ActivityEvent>> {
        let offsets: Vec<u64> = {
            let index = self.index.read();
            let start = match after {
                Some(after) => index.partition_point(|(id, _)| id <= after),
                None => 0,
            };
            index[start..]
                .iter()
                .take(limit)
                .map(|(_, offset)| *offset)
                .collect()
        };

        let Some(first) = offsets.first() else {
            return Ok(Vec::new());
        };

        // Entries are contiguous, so one sequential read covers the page.
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(*first))?;
        let mut reader = BufReader::new(&mut *file);
        let mut events = Vec::with_capacity(offsets.len());
        for _ in 0..offsets.len() {
            let (event, _) = Self::read_entry(&mut reader)?;
            events.push(event);
        }
        Ok(events)
    }

    fn head(&self) -> Result<Option<ActivityId>> {
        Ok(self.index.read().last().map(|(id, _)| id.clone()))
    }
}

impl Drop for ActivityJournal {
    fn drop(&mut self) {
        let file = self.file.get_mut();
        let _ = file.sync_all();
        let _ = FileExt::unlock(&*file);
    }
}
