use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Outcome of reading one framed record.
enum Frame {
    /// A decoded event and the size of its frame in bytes.
    Event(Box<Event>, u64),
    /// Clean end of file.
    End,
    /// Short read, CRC mismatch or undecodable payload: everything from here on is dropped.
    Torn,
}

fn read_frame(reader: &mut impl Read) -> io::Result<Frame> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(Frame::End),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    let mut crc_buf = [0u8; 4];
    for buf in [payload.as_mut_slice(), crc_buf.as_mut_slice()] {
        match reader.read_exact(buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(Frame::Torn),
            Err(e) => return Err(e),
        }
    }

    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Frame::Torn);
    }
    Ok(match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Frame::Event(Box::new(event), 8 + len as u64),
        Err(_) => Frame::Torn,
    })
}

/// Append-only write-ahead log of booking and payment events.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A torn last entry (crash mid-write) is discarded on replay via length-prefix + CRC check.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// Appends buffered since the last successful `flush_sync`.
    pending: u64,
    /// File length after the last successful `flush_sync`. Everything past it
    /// belongs to a batch that was never acknowledged.
    durable_len: u64,
}

/// Events read back from a log, plus the byte length of its intact prefix.
pub struct Replay {
    pub events: Vec<Event>,
    pub valid_len: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let durable_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            pending: 0,
            durable_len,
        })
    }

    /// Replay the log at `path`, cut off any torn tail, then open it for appending.
    ///
    /// New records must never land behind a damaged frame: replay stops at the
    /// first one, so anything written after it would be lost on the next start.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let replay = Self::scan(path)?;
        if let Ok(meta) = fs::metadata(path)
            && meta.len() > replay.valid_len
        {
            tracing::warn!(
                "truncating {} torn bytes from {}",
                meta.len() - replay.valid_len,
                path.display()
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        Ok((Self::open(path)?, replay.events))
    }

    /// Append and fsync one event. Tests only; the engine batches through
    /// `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without flushing. Durable only after `flush_sync()`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.pending += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.durable_len = self.writer.get_ref().metadata()?.len();
        self.appends_since_compact += self.pending;
        self.pending = 0;
        Ok(())
    }

    /// Discard a failed batch: drop whatever is still buffered and cut the file
    /// back to its last durable length, so a retry starts on a frame boundary.
    pub fn rollback(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let (failed, _unwritten) = std::mem::replace(&mut self.writer, BufWriter::new(file)).into_parts();
        failed.set_len(self.durable_len)?;
        failed.sync_all()?;
        self.pending = 0;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_path(&self) -> PathBuf {
        self.path.with_extension("wal.tmp")
    }

    /// Replace the log with `events`: write a temp file, fsync, then rename over the WAL.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.compact_path();
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                encode_event(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.durable_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        self.pending = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay the WAL from disk, returning all valid events in append order.
    /// A missing file is an empty log; a torn tail is dropped with a warning.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(Self::scan(path)?.events)
    }

    /// Like `replay`, but also reports where the intact prefix ends.
    pub fn scan(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Replay {
                    events: Vec::new(),
                    valid_len: 0,
                });
            }
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid_len = 0u64;

        loop {
            match read_frame(&mut reader)? {
                Frame::Event(event, size) => {
                    events.push(*event);
                    valid_len += size;
                }
                Frame::End => break,
                Frame::Torn => {
                    tracing::warn!(
                        "discarding torn WAL tail in {} after {} events",
                        path.display(),
                        events.len()
                    );
                    break;
                }
            }
        }

        Ok(Replay { events, valid_len })
    }
}
