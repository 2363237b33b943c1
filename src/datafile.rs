//! Append-only segment files.
//!
//! A segment is an append-only byte log identified by an integer id. Write
//! modes open the file `append|create` and track the write offset, starting
//! from the current file length so reopening an existing segment continues
//! where it left off. Read modes hold a separate handle served by
//! positional reads.
//!
//! Every segment carries its own reader-writer lock: writers serialize,
//! readers run in parallel with each other and are serialized against
//! writers only for the duration of the OS call. Bytes returned by a read
//! always reflect a prefix that was fully written before the read was
//! issued.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[cfg(unix)]
use std::os::unix::fs::FileExt;

use crate::error::{Error, Result};

/// Access mode a segment file is opened with. Violating the mode is
/// reported as [`Error::InvalidMode`] rather than a panic so callers at
/// module boundaries can handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

#[derive(Debug)]
struct Handles {
    writer: Option<File>,
    reader: Option<File>,
    write_offset: u64,
}

/// An append-only data file with a tracked write offset.
#[derive(Debug)]
pub struct DataFile {
    id: u64,
    path: PathBuf,
    mode: Mode,
    inner: RwLock<Handles>,
}

impl DataFile {
    /// Opens (creating if necessary, in write modes) the file at `path`.
    pub fn open<P: AsRef<Path>>(path: P, id: u64, mode: Mode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut writer = None;
        let mut write_offset = 0;
        if matches!(mode, Mode::WriteOnly | Mode::ReadWrite) {
            let file = OpenOptions::new().append(true).create(true).open(&path)?;
            write_offset = file.metadata()?.len();
            writer = Some(file);
        }

        let mut reader = None;
        if matches!(mode, Mode::ReadOnly | Mode::ReadWrite) {
            reader = Some(File::open(&path)?);
        }

        Ok(Self {
            id,
            path,
            mode,
            inner: RwLock::new(Handles {
                writer,
                reader,
                write_offset,
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Appends `buf` and returns the offset the write started at. The
    /// tracked offset advances by the full buffer length.
    pub fn append(&self, buf: &[u8]) -> Result<u64> {
        use std::io::Write;

        let mut inner = self.inner.write()?;
        let offset = inner.write_offset;
        let writer = inner
            .writer
            .as_mut()
            .ok_or(Error::InvalidMode("write on a read-only data file"))?;

        writer.write_all(buf)?;
        inner.write_offset += buf.len() as u64;
        Ok(offset)
    }

    /// Offset the next append will start at.
    pub fn write_offset(&self) -> u64 {
        self.inner.read().map(|h| h.write_offset).unwrap_or(0)
    }

    /// Fills `buf` from the given byte offset. A short read fails with
    /// [`Error::CorruptRecord`].
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let inner = self.inner.read()?;
        let reader = inner
            .reader
            .as_ref()
            .ok_or(Error::InvalidMode("read on a write-only data file"))?;

        read_exact_at(reader, buf, offset).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::CorruptRecord(format!(
                "short read of {} bytes at offset {offset} in {}",
                buf.len(),
                self.path.display()
            )),
            _ => e.into(),
        })
    }

    /// Current file length from stat.
    pub fn size(&self) -> Result<u64> {
        let inner = self.inner.read()?;
        let file = inner
            .writer
            .as_ref()
            .or(inner.reader.as_ref())
            .ok_or(Error::InvalidMode("size of a closed data file"))?;
        Ok(file.metadata()?.len())
    }

    /// Forces OS buffers to stable storage.
    pub fn sync(&self) -> Result<()> {
        let inner = self.inner.read()?;
        if let Some(writer) = inner.writer.as_ref() {
            writer.sync_all()?;
        }
        Ok(())
    }

    /// Closes both handles. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write()?;
        inner.writer.take();
        inner.reader.take();
        Ok(())
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    file.read_exact_at(buf, offset)
}

#[cfg(not(unix))]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::io::{Read, Seek, SeekFrom};

    let mut handle = file.try_clone()?;
    handle.seek(SeekFrom::Start(offset))?;
    handle.read_exact(buf)
}

/// Fsyncs a directory so renames and deletions inside it are durable. On
/// platforms where directory fsync is unsupported this degrades to a no-op
/// and the metadata durability guarantee is correspondingly weaker.
pub fn sync_dir<P: AsRef<Path>>(dir: P) -> Result<()> {
    let handle = File::open(dir.as_ref())?;
    match handle.sync_all() {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EINVAL) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
