//! Sectors: bounded, mode-gated raw byte segments.
//!
//! # Modes
//!
//! | From | To | Effect |
//! |------|----|--------|
//! | Idle | Read | seek to the recorded start offset |
//! | Idle | Write | seek to the recorded end offset |
//! | Read | Idle | current position becomes the start offset |
//! | Write | Idle | current position becomes the end offset |
//! | any | Closed | record position, flush header, release the backing stream |
//! | Closed | Idle / Read / Write | re-open backing, re-validate header |
//!
//! Read ↔ Write must pass through Idle.  Reads are only legal in Read mode and
//! writes only in Write mode; both checks are performed in every build.
//!
//! # Length
//! `len()` is always "write position − read position": in Read mode that is
//! `end − cursor`, in Write mode `cursor − start`, otherwise `end − start`.

pub mod archive;
#[cfg(feature = "async")]
pub mod asynch;
pub mod backing;
pub mod header;
pub mod ring;
pub mod section;
pub mod source;

use std::fmt;
use std::io;
use thiserror::Error;

pub use archive::{Archive, ArchiveBacking, DirectoryArchive, MemoryArchive};
pub use backing::{Backing, FileBacking, MemoryBacking, SharedBuffer};
pub use header::{SectionHeader, HEADER_SIZE, SECTION_EXTENSION, SECTION_TOKEN};
pub use ring::RingSector;
pub use section::Section;
pub use source::{
    ArchiveSectorSource, FileSectorSource, MemorySectorSource, RingSectorSource, SectorSource,
};

// ── Mode ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectorMode {
    Idle,
    Read,
    Write,
    Closed,
}

impl SectorMode {
    /// Whether `self → to` is a legal single step.  Same-mode requests are no-ops
    /// and therefore always allowed.
    pub fn can_switch_to(self, to: SectorMode) -> bool {
        use SectorMode::*;
        match (self, to) {
            (a, b) if a == b => true,
            (Read, Write) | (Write, Read) => false,
            _ => true,
        }
    }
}

impl fmt::Display for SectorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SectorMode::Idle   => "idle",
            SectorMode::Read   => "read",
            SectorMode::Write  => "write",
            SectorMode::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SectorError {
    #[error("Sector is in {actual} mode, operation requires {expected} mode")]
    Mode { expected: SectorMode, actual: SectorMode },
    #[error("Illegal sector mode transition {from} -> {to}")]
    InvalidTransition { from: SectorMode, to: SectorMode },
    /// The header token does not match [`SECTION_TOKEN`]: not a section.
    #[error("Section authentication failed: header token {found:#010x}")]
    Authentication { found: u32 },
    #[error("Section header checksum mismatch")]
    HeaderChecksum,
    #[error("Corrupt section header: {0}")]
    CorruptHeader(String),
    #[error("Sector has been disposed")]
    Disposed,
    #[error("Read position {0} is outside the stored range")]
    InvalidPosition(u64),
    #[error("Unsupported sector operation: {0}")]
    Unsupported(&'static str),
    #[error("Operation canceled")]
    Canceled,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Sector trait ─────────────────────────────────────────────────────────────

/// A bounded raw byte segment.  Data is appended at the write position and
/// consumed from the read position, so a sector behaves as a persistent FIFO.
pub trait Sector: Send {
    /// Ordering number within a logical stream of sectors.
    fn number(&self) -> i32;
    fn mode(&self) -> SectorMode;
    fn set_mode(&mut self, mode: SectorMode) -> Result<(), SectorError>;

    /// Stored bytes between the read and write positions.
    fn len(&self) -> u64;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Maximum payload bytes the sector can hold.
    fn capacity(&self) -> u64;
    /// Bytes that can still be written.
    fn remaining(&self) -> u64;

    /// Read up to `buf.len()` bytes.  Read mode only.  Returns 0 when drained.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SectorError>;
    /// Write up to `data.len()` bytes.  Write mode only.  Returns 0 when full.
    fn write(&mut self, data: &[u8]) -> Result<usize, SectorError>;

    /// Logical read position, comparable with values previously returned.
    fn read_position(&self) -> u64;
    fn set_read_position(&mut self, pos: u64) -> Result<(), SectorError>;

    /// Switch to `Closed`: persist bookkeeping and release the backing stream.
    fn close(&mut self) -> Result<(), SectorError> {
        self.set_mode(SectorMode::Closed)
    }
    /// Release the backing stream for good.  Later calls fail with `Disposed`.
    fn dispose(&mut self) -> Result<(), SectorError>;
    /// Dispose and irrevocably destroy the backing resource.
    fn delete(self: Box<Self>) -> Result<(), SectorError>;
}

/// Move `sector` into `mode`, passing through `Idle` when switching directly
/// between Read and Write.
pub fn switch_mode(sector: &mut dyn Sector, mode: SectorMode) -> Result<(), SectorError> {
    let current = sector.mode();
    if !current.can_switch_to(mode) {
        sector.set_mode(SectorMode::Idle)?;
    }
    sector.set_mode(mode)
}

/// Fail with [`SectorError::Mode`] unless `actual == expected`.
pub(crate) fn require_mode(actual: SectorMode, expected: SectorMode) -> Result<(), SectorError> {
    if actual != expected {
        return Err(SectorError::Mode { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use SectorMode::*;

    #[test]
    fn direct_read_write_switch_is_illegal() {
        assert!(!Read.can_switch_to(Write));
        assert!(!Write.can_switch_to(Read));
        for from in [Idle, Read, Write, Closed] {
            assert!(from.can_switch_to(Closed));
            assert!(from.can_switch_to(from));
        }
        for to in [Idle, Read, Write] {
            assert!(Closed.can_switch_to(to));
            assert!(Idle.can_switch_to(to));
        }
    }
}
