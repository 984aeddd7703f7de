use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

const FRAME_OVERHEAD: usize = 8;

/// Larger length prefixes are treated as corruption, never allocated.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Frame one event as `[len][bincode][crc32]`, little-endian.
fn frame(event: &Event) -> io::Result<Vec<u8>> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "event too large for a wal frame",
        ));
    }
    let mut buf = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(buf)
}

/// Fill `buf` completely. `Ok(false)` means the log ended first.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next verified payload, or `None` at a clean end or torn tail.
fn next_payload(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut word = [0u8; 4];
    if !fill(reader, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_FRAME_LEN {
        tracing::warn!(len, "wal frame length out of range, dropping the tail");
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !fill(reader, &mut payload)? || !fill(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        tracing::warn!("wal entry failed its checksum, dropping the tail");
        return Ok(None);
    }
    Ok(Some(payload))
}

/// Every valid event, plus the byte length of the prefix holding them.
fn read_log(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let mut reader = match File::open(path) {
        Ok(f) => BufReader::new(f),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut events = Vec::new();
    let mut valid_len = 0u64;
    while let Some(payload) = next_payload(&mut reader)? {
        let Ok(event) = bincode::deserialize::<Event>(&payload) else {
            tracing::warn!("wal entry failed to decode, dropping the tail");
            break;
        };
        valid_len += (payload.len() + FRAME_OVERHEAD) as u64;
        events.push(event);
    }
    Ok((events, valid_len))
}

fn append_to(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// Compaction output before it replaces the live log.
fn staging_path(path: &Path) -> PathBuf {
    path.with_extension("wal.tmp")
}

/// Append-only write-ahead log of one business.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A torn or corrupt tail is cut off when the log is opened, so new
///   appends always follow the last valid entry.
/// - A failed batch is rolled back to the last durable length.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// Length on disk as of the last successful `flush_sync`.
    durable_len: u64,
    /// `durable_len` plus everything handed to the writer since.
    written_len: u64,
    unflushed: u64,
    /// Set while a rollback is incomplete; refuses appends until one succeeds.
    poisoned: bool,
    appends_since_compact: u64,
}

impl Wal {
    /// Replay the log at `path`, cut off any invalid tail, and open it for
    /// appending after the last valid entry.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, valid_len) = read_log(path)?;
        let on_disk = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        if on_disk > valid_len {
            tracing::warn!(
                "wal {}: truncating {} invalid trailing bytes",
                path.display(),
                on_disk - valid_len
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            writer: append_to(path)?,
            path: path.to_path_buf(),
            durable_len: valid_len,
            written_len: valid_len,
            unflushed: 0,
            poisoned: false,
            appends_since_compact: 0,
        };
        Ok((wal, events))
    }

    #[cfg(test)]
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::recover(path).map(|(wal, _)| wal)
    }

    /// Append and fsync one event. Production goes through
    /// `append_buffered` + `flush_sync` for group commit.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without flushing. Durable only after `flush_sync()`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("wal unusable after a failed rollback"));
        }
        let buf = frame(event)?;
        self.writer.write_all(&buf)?;
        self.written_len += buf.len() as u64;
        self.unflushed += 1;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.durable_len = self.written_len;
        self.unflushed = 0;
        Ok(())
    }

    /// Discard everything appended since the last successful `flush_sync`,
    /// whether still buffered or already written to the file.
    pub fn rollback(&mut self) -> io::Result<()> {
        self.poisoned = true;
        let fresh = append_to(&self.path)?;
        let (file, _discarded) = std::mem::replace(&mut self.writer, fresh).into_parts();
        file.set_len(self.durable_len)?;
        file.sync_all()?;
        self.written_len = self.durable_len;
        self.appends_since_compact -= self.unflushed;
        self.unflushed = 0;
        self.poisoned = false;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the compacted log to a temp file and fsync it. A failed write
    /// leaves the live log untouched and removes the partial temp file.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let staging = staging_path(path);
        let result = (|| {
            let mut out = BufWriter::new(File::create(&staging)?);
            for event in events {
                out.write_all(&frame(event)?)?;
            }
            out.flush()?;
            out.get_ref().sync_all()
        })();
        if result.is_err() {
            let _ = fs::remove_file(&staging);
        }
        result
    }

    /// Rename the temp file over the log and reopen for appending.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(staging_path(&self.path), &self.path)?;
        self.writer = append_to(&self.path)?;
        let len = fs::metadata(&self.path)?.len();
        self.durable_len = len;
        self.written_len = len;
        self.unflushed = 0;
        self.poisoned = false;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Every valid event in order. Reading stops at the first torn or
    /// corrupt entry.
    #[cfg(test)]
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        read_log(path).map(|(events, _)| events)
    }
}
