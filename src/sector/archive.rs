//! Archive-backed sections: one archive entry per section.
//!
//! [`Archive`] is the container abstraction (open entry as stream, delete
//! entry, list entries).  Two containers ship with the crate:
//! [`MemoryArchive`] keeps entries in memory, [`DirectoryArchive`] stores each
//! entry as a file below a root directory.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::backing::{Backing, SharedBuffer, SharedCursor};

pub trait Archive: Send + Sync {
    type Entry: Read + Write + Seek + Send;

    fn open_entry(&self, name: &str, create: bool) -> io::Result<Self::Entry>;
    fn delete_entry(&self, name: &str) -> io::Result<()>;
    /// Entry names in lexical order.
    fn entry_names(&self) -> io::Result<Vec<String>>;
}

fn missing(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("archive entry not found: {name}"))
}

// ── In-memory archive ────────────────────────────────────────────────────────

/// Cloning shares the entry table.
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    entries: Arc<Mutex<BTreeMap<String, SharedBuffer>>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct access to an entry's bytes (diagnostics and tests).
    pub fn entry(&self, name: &str) -> Option<SharedBuffer> {
        self.entries.lock().get(name).cloned()
    }
}

impl Archive for MemoryArchive {
    type Entry = SharedCursor;

    fn open_entry(&self, name: &str, create: bool) -> io::Result<SharedCursor> {
        let mut entries = self.entries.lock();
        match entries.get(name) {
            Some(buffer) => Ok(buffer.cursor()),
            None if create => {
                let buffer = SharedBuffer::new();
                entries.insert(name.to_owned(), buffer.clone());
                Ok(buffer.cursor())
            }
            None => Err(missing(name)),
        }
    }

    fn delete_entry(&self, name: &str) -> io::Result<()> {
        self.entries.lock().remove(name).map(|_| ()).ok_or_else(|| missing(name))
    }

    fn entry_names(&self) -> io::Result<Vec<String>> {
        Ok(self.entries.lock().keys().cloned().collect())
    }
}

// ── Directory archive ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DirectoryArchive {
    root: PathBuf,
}

impl DirectoryArchive {
    /// Use `root` as the container, creating it if needed.
    pub fn open<P: AsRef<Path>>(root: P) -> io::Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        Ok(Self { root: root.as_ref().to_path_buf() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, name: &str) -> io::Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid archive entry name: {name:?}"),
            ));
        }
        Ok(self.root.join(name))
    }
}

impl Archive for DirectoryArchive {
    type Entry = fs::File;

    fn open_entry(&self, name: &str, create: bool) -> io::Result<fs::File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(self.entry_path(name)?)
    }

    fn delete_entry(&self, name: &str) -> io::Result<()> {
        fs::remove_file(self.entry_path(name)?)
    }

    fn entry_names(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for dirent in fs::read_dir(&self.root)? {
            let dirent = dirent?;
            if dirent.file_type()?.is_file() {
                if let Some(name) = dirent.file_name().to_str() {
                    names.push(name.to_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

// ── Backing adapter ──────────────────────────────────────────────────────────

/// A single archive entry used as a section backing.
pub struct ArchiveBacking<A: Archive> {
    archive: Arc<A>,
    name:    String,
}

impl<A: Archive> ArchiveBacking<A> {
    pub fn new(archive: Arc<A>, name: impl Into<String>) -> Self {
        Self { archive, name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<A: Archive> Backing for ArchiveBacking<A> {
    type Stream = A::Entry;

    fn open(&mut self, create: bool) -> io::Result<A::Entry> {
        self.archive.open_entry(&self.name, create)
    }

    fn destroy(&mut self) -> io::Result<()> {
        self.archive.delete_entry(&self.name)
    }

    fn describe(&self) -> String {
        format!("archive entry {}", self.name)
    }
}
