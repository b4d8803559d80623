//! Scroll over an ordered chain of sectors.
//!
//! A sector scroll is a queue: inserts always append at the tail sector
//! (allocating the next one from its [`SectorSource`] when the tail is full),
//! removals consume from the read cursor and cross sector boundaries
//! transparently.  The cursor returned by `position()` is the read cursor.
//!
//! Pointer values are offsets relative to where the read cursor stood in that
//! sector when the scroll took hold of it, so a pointer to a sector that has
//! not been allocated yet (an empty scroll) is simply offset `0`.
//!
//! Sectors the cursor is not using are closed and re-opened on demand, which
//! re-authenticates their headers.

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Duplicate, Scroll};
use crate::config::ScrollOptions;
use crate::error::{Result, ScrollError};
use crate::pointer::{Pointer, ScrollTag};
use crate::sector::{
    switch_mode, Archive, ArchiveSectorSource, FileSectorSource, MemorySectorSource,
    RingSectorSource, Sector, SectorMode, SectorSource,
};

struct Slot {
    sector: Box<dyn Sector>,
    /// Read position when the scroll took hold of the sector.
    entry:  u64,
}

impl Slot {
    fn new(sector: Box<dyn Sector>) -> Self {
        Self { entry: sector.read_position(), sector }
    }

    /// Read cursor relative to `entry`.
    fn offset(&self) -> u64 {
        self.sector.read_position() - self.entry
    }

    /// Relative offset of the write position.
    fn end(&self) -> u64 {
        self.offset() + self.sector.len()
    }
}

pub struct SectorScroll {
    source:      Box<dyn SectorSource>,
    slots:       Vec<Slot>,
    read_index:  usize,
    next_number: i32,
    options:     ScrollOptions,
    family:      Uuid,
    generation:  u64,
    disposed:    bool,
}

impl SectorScroll {
    /// Take over the sectors `source` already holds, in sequence order.
    pub fn open<S: SectorSource + 'static>(mut source: S, options: ScrollOptions) -> Result<Self> {
        let existing = source.existing()?;
        let next_number = match existing.last() {
            Some(last) => last
                .number()
                .checked_add(1)
                .ok_or_else(|| ScrollError::InvalidOperation("sector numbers exhausted".into()))?,
            None => 0,
        };
        let slots: Vec<Slot> = existing.into_iter().map(Slot::new).collect();
        if !slots.is_empty() {
            info!(sectors = slots.len(), next_number, "recovered sector scroll");
        }
        Ok(Self::assemble(Box::new(source), slots, next_number, options))
    }

    pub fn in_memory(options: ScrollOptions) -> Self {
        let source = MemorySectorSource::new(options.sector_capacity);
        Self::assemble(Box::new(source), Vec::new(), 0, options)
    }

    /// Scroll over fixed-capacity ring sectors; they cannot be rewound.
    pub fn ring(options: ScrollOptions) -> Self {
        let source = RingSectorSource::new(options.sector_capacity as usize);
        Self::assemble(Box::new(source), Vec::new(), 0, options)
    }

    /// Section files in `dir`; sections left by an earlier run are resumed.
    pub fn in_directory<P: AsRef<Path>>(dir: P, options: ScrollOptions) -> Result<Self> {
        let source = FileSectorSource::new(dir, options.sector_capacity)?;
        Self::open(source, options)
    }

    pub fn in_archive<A: Archive + 'static>(archive: Arc<A>, options: ScrollOptions) -> Result<Self> {
        let source = ArchiveSectorSource::new(archive, options.sector_capacity);
        Self::open(source, options)
    }

    fn assemble(
        source: Box<dyn SectorSource>,
        slots: Vec<Slot>,
        next_number: i32,
        options: ScrollOptions,
    ) -> Self {
        Self {
            source,
            slots,
            read_index: 0,
            next_number,
            options,
            family: ScrollTag::new_family(),
            generation: 0,
            disposed: false,
        }
    }

    pub fn options(&self) -> &ScrollOptions {
        &self.options
    }

    /// Unread bytes across all sectors.
    pub fn len(&self) -> u64 {
        self.slots.iter().skip(self.read_index).map(|s| s.sector.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sector_count(&self) -> usize {
        self.slots.len()
    }

    /// Sequence numbers of the sectors currently held.
    pub fn sector_numbers(&self) -> Vec<i32> {
        self.slots.iter().map(|s| s.sector.number()).collect()
    }

    /// Delete every sector the read cursor has fully consumed.  Invalidates
    /// outstanding pointers when anything was deleted.
    pub fn compact(&mut self) -> Result<usize> {
        self.live()?;
        self.skip_drained();
        let drained = self.read_index;
        if drained == 0 {
            return Ok(0);
        }
        let doomed: Vec<Slot> = self.slots.drain(..drained).collect();
        self.read_index = 0;
        self.generation += 1;
        for slot in doomed {
            slot.sector.delete()?;
        }
        info!(deleted = drained, remaining = self.slots.len(), "compacted sector scroll");
        Ok(drained)
    }

    /// Flush and release every sector.  The scroll is unusable afterwards.
    pub fn close(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        let mut first_error = None;
        for slot in &mut self.slots {
            if let Err(e) = slot.sector.dispose() {
                first_error.get_or_insert(e);
            }
        }
        debug!(sectors = self.slots.len(), "closed sector scroll");
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn live(&self) -> Result<()> {
        if self.disposed {
            return Err(ScrollError::Disposed);
        }
        Ok(())
    }

    fn tag(&self, sector: i32) -> ScrollTag {
        ScrollTag { family: self.family, generation: self.generation, sector }
    }

    /// Move the read cursor past drained sectors, never past the tail.
    fn skip_drained(&mut self) {
        while self.read_index + 1 < self.slots.len() && self.slots[self.read_index].sector.is_empty() {
            self.read_index += 1;
        }
    }

    fn allocate(&mut self) -> Result<usize> {
        let number = self.next_number;
        let sector = self.source.allocate(number)?;
        self.next_number = number
            .checked_add(1)
            .ok_or_else(|| ScrollError::InvalidOperation("sector numbers exhausted".into()))?;
        debug!(number, capacity = sector.capacity(), "allocated sector");

        // The previous tail is idle from now on unless the reader is on it.
        let previous = self.slots.len().checked_sub(1);
        self.slots.push(Slot::new(sector));
        if let Some(prev) = previous {
            if prev != self.read_index {
                self.slots[prev].sector.close()?;
            }
        }
        Ok(self.slots.len() - 1)
    }

    /// Slot index and relative offset addressed by `ptr`.
    fn locate(&self, ptr: &Pointer) -> Result<(usize, u64)> {
        let tag = ScrollTag::current(ptr, self.family, self.generation)?;
        let value = ptr.value() as u64;
        match self.slots.iter().position(|s| s.sector.number() == tag.sector) {
            Some(index) if value <= self.slots[index].end() => Ok((index, value)),
            Some(_) => Err(ScrollError::InvalidPointer("pointer lies past the stored data")),
            None if self.slots.is_empty() && tag.sector == self.next_number && value == 0 => Ok((0, 0)),
            None => Err(ScrollError::InvalidPointer("pointer refers to a discarded sector")),
        }
    }
}

impl Scroll for SectorScroll {
    fn position(&self) -> Pointer {
        match self.slots.get(self.read_index) {
            Some(slot) => Pointer::with_tag(slot.offset() as usize, self.tag(slot.sector.number())),
            None => Pointer::with_tag(0, self.tag(self.next_number)),
        }
    }

    fn set_position(&mut self, ptr: Pointer) -> Result<()> {
        self.live()?;
        let (index, value) = self.locate(&ptr)?;
        if self.slots.is_empty() {
            return Ok(());
        }
        let low = index.min(self.read_index);
        let high = index.max(self.read_index).min(self.slots.len() - 1);
        for i in low..=high {
            let slot = &mut self.slots[i];
            let target = if i < index {
                slot.entry + slot.end()
            } else if i > index {
                slot.entry
            } else {
                slot.entry + value
            };
            slot.sector.set_read_position(target)?;
        }
        self.read_index = index;
        Ok(())
    }

    fn is_valid(&self, ptr: &Pointer) -> bool {
        !self.disposed && self.locate(ptr).is_ok()
    }

    /// Only spans within the sector under the read cursor are measurable.
    fn distance_in_bytes(&self, ptr: &Pointer) -> Option<u64> {
        let (index, value) = self.locate(ptr).ok()?;
        if index != self.read_index {
            return None;
        }
        let here = self.slots.get(index).map_or(0, Slot::offset);
        value.checked_sub(here)
    }

    fn insert_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.live()?;
        let mut rest = data;
        while !rest.is_empty() {
            let index = match self.slots.last() {
                Some(tail) if tail.sector.remaining() > 0 => self.slots.len() - 1,
                _ => self.allocate()?,
            };
            let sector = self.slots[index].sector.as_mut();
            switch_mode(sector, SectorMode::Write)?;
            let written = sector.write(rest)?;
            if written == 0 {
                return Err(ScrollError::InvalidOperation(format!(
                    "sector {} accepted no data",
                    sector.number()
                )));
            }
            rest = &rest[written..];
        }
        Ok(())
    }

    fn available(&self) -> Option<u64> {
        Some(if self.disposed { 0 } else { self.len() })
    }

    fn remove_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.live()?;
        let available = self.len();
        if (buf.len() as u64) > available {
            return Err(ScrollError::UnexpectedEnd { needed: buf.len(), available: available as usize });
        }
        let mut filled = 0;
        while filled < buf.len() {
            self.skip_drained_closing()?;
            let sector = self.slots[self.read_index].sector.as_mut();
            switch_mode(sector, SectorMode::Read)?;
            let read = sector.read(&mut buf[filled..])?;
            if read == 0 {
                return Err(ScrollError::UnexpectedEnd { needed: buf.len() - filled, available: 0 });
            }
            filled += read;
        }
        if self.options.compact_on_drain {
            self.compact()?;
        }
        Ok(())
    }
}

impl SectorScroll {
    /// [`skip_drained`](Self::skip_drained), closing each sector left behind
    /// unless it is the tail.
    fn skip_drained_closing(&mut self) -> Result<()> {
        let before = self.read_index;
        self.skip_drained();
        for i in before..self.read_index {
            self.slots[i].sector.close()?;
        }
        Ok(())
    }
}

/// Sector scrolls own their sectors exclusively and cannot be duplicated.
impl Duplicate for SectorScroll {
    fn copy(&self) -> Result<Self> {
        Err(ScrollError::InvalidOperation("sector scrolls cannot be duplicated".into()))
    }
}
