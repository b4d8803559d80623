//! Sector sources: where a [`SectorScroll`](crate::scroll::SectorScroll) gets
//! its sectors from.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::archive::{Archive, ArchiveBacking};
use super::backing::{section_file_name, FileBacking, MemoryBacking};
use super::header::SECTION_EXTENSION;
use super::ring::RingSector;
use super::section::Section;
use super::{Sector, SectorError};

pub trait SectorSource: Send {
    /// Sectors persisted by an earlier run, sorted by sequence number.
    fn existing(&mut self) -> Result<Vec<Box<dyn Sector>>, SectorError>;
    /// Allocate a fresh empty sector with sequence number `number`.
    fn allocate(&mut self, number: i32) -> Result<Box<dyn Sector>, SectorError>;
}

fn sort_by_number(mut sectors: Vec<Box<dyn Sector>>) -> Vec<Box<dyn Sector>> {
    sectors.sort_by_key(|s| s.number());
    sectors
}

// ── Memory ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MemorySectorSource {
    capacity: u64,
}

impl MemorySectorSource {
    pub fn new(capacity: u64) -> Self {
        Self { capacity }
    }
}

impl SectorSource for MemorySectorSource {
    fn existing(&mut self) -> Result<Vec<Box<dyn Sector>>, SectorError> {
        Ok(Vec::new())
    }

    fn allocate(&mut self, number: i32) -> Result<Box<dyn Sector>, SectorError> {
        Ok(Box::new(Section::create(MemoryBacking::new(), number, self.capacity)?))
    }
}

// ── Ring ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RingSectorSource {
    capacity: usize,
}

impl RingSectorSource {
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }
}

impl SectorSource for RingSectorSource {
    fn existing(&mut self) -> Result<Vec<Box<dyn Sector>>, SectorError> {
        Ok(Vec::new())
    }

    fn allocate(&mut self, number: i32) -> Result<Box<dyn Sector>, SectorError> {
        Ok(Box::new(RingSector::new(number, self.capacity)))
    }
}

// ── Files ────────────────────────────────────────────────────────────────────

/// Section files in one directory, recognised by [`SECTION_EXTENSION`].
#[derive(Debug, Clone)]
pub struct FileSectorSource {
    dir:      PathBuf,
    capacity: u64,
}

impl FileSectorSource {
    pub fn new<P: AsRef<Path>>(dir: P, capacity: u64) -> Result<Self, SectorError> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self { dir: dir.as_ref().to_path_buf(), capacity })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SectorSource for FileSectorSource {
    /// Every file with the section extension must authenticate; a foreign
    /// file in the directory fails the whole scan.
    fn existing(&mut self) -> Result<Vec<Box<dyn Sector>>, SectorError> {
        let mut sectors: Vec<Box<dyn Sector>> = Vec::new();
        for dirent in fs::read_dir(&self.dir)? {
            let path = dirent?.path();
            if path.is_file() && FileBacking::is_section_file(&path) {
                sectors.push(Box::new(Section::attach(FileBacking::new(&path), self.capacity)?));
            }
        }
        debug!(dir = %self.dir.display(), count = sectors.len(), "discovered section files");
        Ok(sort_by_number(sectors))
    }

    fn allocate(&mut self, number: i32) -> Result<Box<dyn Sector>, SectorError> {
        let backing = FileBacking::in_dir(&self.dir, number);
        Ok(Box::new(Section::create(backing, number, self.capacity)?))
    }
}

// ── Archive ──────────────────────────────────────────────────────────────────

/// One archive entry per section, named like section files.
pub struct ArchiveSectorSource<A: Archive> {
    archive:  Arc<A>,
    capacity: u64,
}

impl<A: Archive> ArchiveSectorSource<A> {
    pub fn new(archive: Arc<A>, capacity: u64) -> Self {
        Self { archive, capacity }
    }
}

impl<A: Archive + 'static> SectorSource for ArchiveSectorSource<A> {
    fn existing(&mut self) -> Result<Vec<Box<dyn Sector>>, SectorError> {
        let suffix = format!(".{SECTION_EXTENSION}");
        let mut sectors: Vec<Box<dyn Sector>> = Vec::new();
        for name in self.archive.entry_names()? {
            if name.ends_with(&suffix) {
                let backing = ArchiveBacking::new(self.archive.clone(), name);
                sectors.push(Box::new(Section::attach(backing, self.capacity)?));
            }
        }
        Ok(sort_by_number(sectors))
    }

    fn allocate(&mut self, number: i32) -> Result<Box<dyn Sector>, SectorError> {
        let backing = ArchiveBacking::new(self.archive.clone(), section_file_name(number));
        Ok(Box::new(Section::create(backing, number, self.capacity)?))
    }
}
