//! Backing resources for sections: files and shared in-memory buffers.

use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::header::SECTION_EXTENSION;

/// A resource a section can (re)open as a seekable byte stream.
pub trait Backing: Send {
    type Stream: Read + Write + Seek + Send;

    /// Open the resource.  With `create` set, a missing resource is created empty.
    fn open(&mut self, create: bool) -> io::Result<Self::Stream>;
    /// Irrevocably destroy the resource.
    fn destroy(&mut self) -> io::Result<()>;
    /// Human-readable location, used in log events.
    fn describe(&self) -> String;
}

// ── Files ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FileBacking {
    path: PathBuf,
}

impl FileBacking {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    /// Canonical location of section `number` inside `dir`.
    pub fn in_dir<P: AsRef<Path>>(dir: P, number: i32) -> Self {
        Self::new(dir.as_ref().join(section_file_name(number)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if `path` carries the section file extension.
    pub fn is_section_file(path: &Path) -> bool {
        path.extension().map_or(false, |ext| ext == SECTION_EXTENSION)
    }
}

impl Backing for FileBacking {
    type Stream = fs::File;

    fn open(&mut self, create: bool) -> io::Result<fs::File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(&self.path)
    }

    fn destroy(&mut self) -> io::Result<()> {
        fs::remove_file(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// `section_00000003.scroll`
pub fn section_file_name(number: i32) -> String {
    format!("section_{:08}.{}", number, SECTION_EXTENSION)
}

// ── Shared memory ─────────────────────────────────────────────────────────────

/// A growable byte buffer shared between owners.  Cloning shares the storage.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self { bytes: Arc::new(Mutex::new(bytes)) }
    }

    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    /// Run `f` with exclusive access to the underlying bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        f(&mut self.bytes.lock())
    }

    /// A fresh stream positioned at offset 0.
    pub fn cursor(&self) -> SharedCursor {
        SharedCursor { buffer: self.clone(), pos: 0 }
    }
}

/// Seekable stream over a [`SharedBuffer`]; writes past the end extend it.
#[derive(Debug, Clone)]
pub struct SharedCursor {
    buffer: SharedBuffer,
    pos:    u64,
}

impl Read for SharedCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes = self.buffer.bytes.lock();
        let start = (self.pos as usize).min(bytes.len());
        let n = buf.len().min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for SharedCursor {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut bytes = self.buffer.bytes.lock();
        let start = self.pos as usize;
        let end = start + data.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(data);
        self.pos = end as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for SharedCursor {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let len = self.buffer.len() as i128;
        let next = match target {
            SeekFrom::Start(n)   => n as i128,
            SeekFrom::End(d)     => len + d as i128,
            SeekFrom::Current(d) => self.pos as i128 + d as i128,
        };
        if next < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start of buffer"));
        }
        self.pos = next as u64;
        Ok(self.pos)
    }
}

/// In-memory backing.  The buffer outlives close/re-open cycles; `destroy`
/// clears it and makes later opens fail with `NotFound`.
#[derive(Debug, Clone, Default)]
pub struct MemoryBacking {
    buffer:    SharedBuffer,
    destroyed: bool,
}

impl MemoryBacking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer(buffer: SharedBuffer) -> Self {
        Self { buffer, destroyed: false }
    }

    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }
}

impl Backing for MemoryBacking {
    type Stream = SharedCursor;

    fn open(&mut self, _create: bool) -> io::Result<SharedCursor> {
        if self.destroyed {
            return Err(io::Error::new(io::ErrorKind::NotFound, "memory backing was destroyed"));
        }
        Ok(self.buffer.cursor())
    }

    fn destroy(&mut self) -> io::Result<()> {
        self.buffer.with_bytes(|b| {
            b.clear();
            b.shrink_to_fit();
        });
        self.destroyed = true;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("memory ({} bytes)", self.buffer.len())
    }
}
