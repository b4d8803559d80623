//! Stream-backed section: header at offset 0, payload appended after it.
//!
//! The in-memory header is authoritative while the section is open; it is
//! written back to offset 0 on `close`, `dispose` and `Drop`.  While in Read
//! or Write mode the live position is tracked in `cursor` and folded into the
//! header when the mode is left.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, warn};

use super::backing::{Backing, FileBacking, MemoryBacking};
use super::header::{SectionHeader, HEADER_SIZE};
use super::{require_mode, Sector, SectorError, SectorMode};

#[derive(Debug)]
pub struct Section<B: Backing> {
    backing:  B,
    stream:   Option<B::Stream>,
    header:   SectionHeader,
    mode:     SectorMode,
    /// Live stream offset while in Read/Write mode.
    cursor:   u64,
    capacity: u64,
    disposed: bool,
}

impl<B: Backing> Section<B> {
    /// Allocate a fresh, empty section and write its header.
    pub fn create(mut backing: B, number: i32, capacity: u64) -> Result<Self, SectorError> {
        let mut stream = backing.open(true)?;
        let header = SectionHeader::new(number);
        stream.seek(SeekFrom::Start(0))?;
        header.write(&mut stream)?;
        stream.flush()?;
        debug!(section = %backing.describe(), number, capacity, "created section");
        Ok(Self {
            backing,
            stream: Some(stream),
            header,
            mode: SectorMode::Idle,
            cursor: header.start as u64,
            capacity,
            disposed: false,
        })
    }

    /// Attach to an existing section, authenticating its header.
    ///
    /// The effective capacity is never smaller than the payload already stored.
    pub fn attach(mut backing: B, capacity: u64) -> Result<Self, SectorError> {
        let mut stream = backing.open(false)?;
        let header = read_header(&mut stream, &backing)?;
        let stored = header.end as u64 - HEADER_SIZE as u64;
        debug!(section = %backing.describe(), number = header.number, stored, "attached section");
        Ok(Self {
            backing,
            stream: Some(stream),
            header,
            mode: SectorMode::Idle,
            cursor: header.start as u64,
            capacity: capacity.max(stored),
            disposed: false,
        })
    }

    /// Header with the live position folded in.
    pub fn header(&self) -> SectionHeader {
        SectionHeader {
            start: self.read_pos() as i64,
            end: self.write_pos() as i64,
            ..self.header
        }
    }

    pub fn backing(&self) -> &B {
        &self.backing
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn read_pos(&self) -> u64 {
        match self.mode {
            SectorMode::Read => self.cursor,
            _ => self.header.start as u64,
        }
    }

    fn write_pos(&self) -> u64 {
        match self.mode {
            SectorMode::Write => self.cursor,
            _ => self.header.end as u64,
        }
    }

    fn live(&self) -> Result<(), SectorError> {
        if self.disposed {
            return Err(SectorError::Disposed);
        }
        Ok(())
    }

    fn stream(&mut self) -> Result<&mut B::Stream, SectorError> {
        self.stream.as_mut().ok_or(SectorError::Mode {
            expected: SectorMode::Idle,
            actual:   SectorMode::Closed,
        })
    }

    /// Re-open the backing after a close and re-validate its header.
    fn ensure_open(&mut self) -> Result<(), SectorError> {
        if self.stream.is_none() {
            let mut stream = self.backing.open(false)?;
            self.header = read_header(&mut stream, &self.backing)?;
            self.stream = Some(stream);
            debug!(section = %self.backing.describe(), "re-opened section");
        }
        Ok(())
    }

    /// Fold the live cursor into the header.
    fn settle(&mut self) {
        match self.mode {
            SectorMode::Read  => self.header.start = self.cursor as i64,
            SectorMode::Write => self.header.end = self.cursor as i64,
            _ => {}
        }
    }

    fn flush_header(&mut self) -> Result<(), SectorError> {
        let header = self.header;
        if let Some(stream) = self.stream.as_mut() {
            stream.seek(SeekFrom::Start(0))?;
            header.write(&mut *stream)?;
            stream.flush()?;
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), SectorError> {
        self.settle();
        let flushed = self.flush_header();
        self.stream = None;
        flushed
    }
}

fn read_header<B: Backing>(stream: &mut B::Stream, backing: &B) -> Result<SectionHeader, SectorError> {
    stream.seek(SeekFrom::Start(0))?;
    SectionHeader::read(&mut *stream).map_err(|e| {
        if let SectorError::Authentication { found } = e {
            warn!(section = %backing.describe(), token = found, "section authentication failed");
        }
        e
    })
}

impl<B: Backing> Sector for Section<B> {
    fn number(&self) -> i32 {
        self.header.number
    }

    fn mode(&self) -> SectorMode {
        self.mode
    }

    fn set_mode(&mut self, to: SectorMode) -> Result<(), SectorError> {
        self.live()?;
        let from = self.mode;
        if from == to {
            return Ok(());
        }
        if !from.can_switch_to(to) {
            return Err(SectorError::InvalidTransition { from, to });
        }
        match to {
            SectorMode::Closed => {
                self.release()?;
            }
            SectorMode::Idle => {
                self.settle();
                self.ensure_open()?;
            }
            SectorMode::Read => {
                self.ensure_open()?;
                let start = self.header.start as u64;
                self.stream()?.seek(SeekFrom::Start(start))?;
                self.cursor = start;
            }
            SectorMode::Write => {
                self.ensure_open()?;
                let end = self.header.end as u64;
                self.stream()?.seek(SeekFrom::Start(end))?;
                self.cursor = end;
            }
        }
        self.mode = to;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.write_pos() - self.read_pos()
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn remaining(&self) -> u64 {
        let used = self.write_pos() - HEADER_SIZE as u64;
        self.capacity.saturating_sub(used)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SectorError> {
        self.live()?;
        require_mode(self.mode, SectorMode::Read)?;
        let available = self.header.end as u64 - self.cursor;
        let n = (buf.len() as u64).min(available) as usize;
        if n > 0 {
            self.stream()?.read_exact(&mut buf[..n])?;
            self.cursor += n as u64;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, SectorError> {
        self.live()?;
        require_mode(self.mode, SectorMode::Write)?;
        let n = (data.len() as u64).min(self.remaining()) as usize;
        if n > 0 {
            self.stream()?.write_all(&data[..n])?;
            self.cursor += n as u64;
        }
        Ok(n)
    }

    fn read_position(&self) -> u64 {
        self.read_pos()
    }

    fn set_read_position(&mut self, pos: u64) -> Result<(), SectorError> {
        self.live()?;
        if pos < HEADER_SIZE as u64 || pos > self.write_pos() {
            return Err(SectorError::InvalidPosition(pos));
        }
        match self.mode {
            SectorMode::Read => {
                self.stream()?.seek(SeekFrom::Start(pos))?;
                self.cursor = pos;
            }
            // The stored header is re-read on the next open, so persist it now.
            SectorMode::Closed => {
                self.ensure_open()?;
                self.header.start = pos as i64;
                let flushed = self.flush_header();
                self.stream = None;
                flushed?;
            }
            _ => self.header.start = pos as i64,
        }
        Ok(())
    }

    fn dispose(&mut self) -> Result<(), SectorError> {
        if self.disposed {
            return Ok(());
        }
        let result = self.release();
        self.mode = SectorMode::Closed;
        self.disposed = true;
        debug!(section = %self.backing.describe(), "disposed section");
        result
    }

    fn delete(self: Box<Self>) -> Result<(), SectorError> {
        let mut this = *self;
        this.dispose()?;
        this.backing.destroy()?;
        debug!(section = %this.backing.describe(), "deleted section");
        Ok(())
    }
}

impl<B: Backing> Drop for Section<B> {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            warn!(section = %self.backing.describe(), error = %e, "failed to flush section header on drop");
        }
    }
}

// ── Convenience constructors ─────────────────────────────────────────────────

impl Section<FileBacking> {
    pub fn create_file<P: AsRef<Path>>(path: P, number: i32, capacity: u64) -> Result<Self, SectorError> {
        Self::create(FileBacking::new(path), number, capacity)
    }

    pub fn open_file<P: AsRef<Path>>(path: P, capacity: u64) -> Result<Self, SectorError> {
        Self::attach(FileBacking::new(path), capacity)
    }
}

impl Section<MemoryBacking> {
    pub fn in_memory(number: i32, capacity: u64) -> Result<Self, SectorError> {
        Self::create(MemoryBacking::new(), number, capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector::backing::SharedBuffer;
    use crate::sector::switch_mode;
    use tempfile::TempDir;

    fn write_all(section: &mut dyn Sector, data: &[u8]) -> usize {
        switch_mode(section, SectorMode::Write).unwrap();
        section.write(data).unwrap()
    }

    fn read_n(section: &mut dyn Sector, n: usize) -> Vec<u8> {
        switch_mode(section, SectorMode::Read).unwrap();
        let mut buf = vec![0u8; n];
        let got = section.read(&mut buf).unwrap();
        buf.truncate(got);
        buf
    }

    #[test]
    fn fifo_roundtrip_in_memory() {
        let mut s = Section::in_memory(0, 64).unwrap();
        assert_eq!(write_all(&mut s, b"hello world"), 11);
        assert_eq!(read_n(&mut s, 5), b"hello");
        assert_eq!(s.len(), 6);
        assert_eq!(read_n(&mut s, 100), b" world");
        assert!(s.is_empty());
    }

    #[test]
    fn length_depends_on_mode() {
        let mut s = Section::in_memory(0, 64).unwrap();
        write_all(&mut s, &[1u8; 10]);
        assert_eq!(s.len(), 10); // write: cursor - start
        s.set_mode(SectorMode::Idle).unwrap();
        assert_eq!(s.len(), 10); // idle: end - start
        read_n(&mut s, 4);
        assert_eq!(s.len(), 6); // read: end - cursor
    }

    #[test]
    fn wrong_mode_calls_fail() {
        let mut s = Section::in_memory(0, 64).unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(s.read(&mut buf), Err(SectorError::Mode { .. })));
        assert!(matches!(s.write(b"x"), Err(SectorError::Mode { .. })));

        s.set_mode(SectorMode::Write).unwrap();
        assert!(matches!(s.read(&mut buf), Err(SectorError::Mode { .. })));
        assert!(matches!(
            s.set_mode(SectorMode::Read),
            Err(SectorError::InvalidTransition { .. })
        ));

        s.set_mode(SectorMode::Idle).unwrap();
        s.set_mode(SectorMode::Read).unwrap();
        assert!(matches!(s.write(b"x"), Err(SectorError::Mode { .. })));
        assert!(matches!(
            s.set_mode(SectorMode::Write),
            Err(SectorError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn write_stops_at_capacity() {
        let mut s = Section::in_memory(0, 8).unwrap();
        assert_eq!(write_all(&mut s, &[7u8; 12]), 8);
        assert_eq!(s.remaining(), 0);
        assert_eq!(s.write(b"more").unwrap(), 0);
    }

    #[test]
    fn close_flushes_header_and_reopen_revalidates() {
        let buffer = SharedBuffer::new();
        let mut s = Section::create(MemoryBacking::with_buffer(buffer.clone()), 4, 64).unwrap();
        write_all(&mut s, b"abcdef");
        s.close().unwrap();

        let bytes = buffer.to_vec();
        let mut raw = [0u8; HEADER_SIZE];
        raw.copy_from_slice(&bytes[..HEADER_SIZE]);
        let header = SectionHeader::from_bytes(&raw).unwrap();
        assert_eq!(header.end, HEADER_SIZE as i64 + 6);
        assert_eq!(header.number, 4);

        // corrupt the token while closed: re-entering Read must fail authentication
        buffer.with_bytes(|b| b[0x14] = b'X');
        assert!(matches!(
            s.set_mode(SectorMode::Read),
            Err(SectorError::Authentication { .. })
        ));
    }

    #[test]
    fn reopen_after_close_keeps_data() {
        let mut s = Section::in_memory(1, 64).unwrap();
        write_all(&mut s, b"persist");
        s.close().unwrap();
        assert_eq!(read_n(&mut s, 7), b"persist");
    }

    #[test]
    fn attach_rejects_foreign_stream() {
        let buffer = SharedBuffer::from_vec(vec![0xAB; 64]);
        let result = Section::attach(MemoryBacking::with_buffer(buffer), 64);
        assert!(matches!(result, Err(SectorError::Authentication { .. })));
    }

    #[test]
    fn file_section_survives_drop_and_reattach() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.scroll");
        {
            let mut s = Section::create_file(&path, 2, 1024).unwrap();
            write_all(&mut s, b"durable");
            s.set_mode(SectorMode::Idle).unwrap();
            read_n(&mut s, 3);
        } // drop flushes the header

        let mut s = Section::open_file(&path, 1024).unwrap();
        assert_eq!(s.number(), 2);
        assert_eq!(s.len(), 4);
        assert_eq!(read_n(&mut s, 10), b"able");
    }

    #[test]
    fn dispose_is_terminal_and_delete_destroys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.scroll");
        let mut s = Section::create_file(&path, 0, 16).unwrap();
        s.dispose().unwrap();
        assert!(matches!(s.set_mode(SectorMode::Read), Err(SectorError::Disposed)));
        assert!(path.exists());

        let s = Section::open_file(&path, 16).unwrap();
        Box::new(s).delete().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn read_position_rewinds() {
        let mut s = Section::in_memory(0, 64).unwrap();
        write_all(&mut s, b"xyz");
        switch_mode(&mut s, SectorMode::Read).unwrap();
        let mark = s.read_position();
        assert_eq!(read_n(&mut s, 3), b"xyz");
        s.set_read_position(mark).unwrap();
        assert_eq!(read_n(&mut s, 3), b"xyz");
        assert!(matches!(s.set_read_position(0), Err(SectorError::InvalidPosition(0))));
    }

    #[test]
    fn rewind_while_closed_survives_reopen() {
        let mut s = Section::in_memory(0, 64).unwrap();
        write_all(&mut s, b"abc");
        switch_mode(&mut s, SectorMode::Read).unwrap();
        let mark = s.read_position();
        read_n(&mut s, 3);
        s.close().unwrap();
        s.set_read_position(mark).unwrap();
        assert_eq!(s.mode(), SectorMode::Closed);
        assert_eq!(read_n(&mut s, 3), b"abc");
    }
}
