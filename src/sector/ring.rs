//! Fixed-capacity circular sector.
//!
//! `head` is the next byte to read, `tail` the next byte to write.  When
//! `head == tail` the buffer is either drained or completely full; the `empty`
//! flag tells the two apart.  Every read or write is at most two contiguous
//! copies: up to the end of the buffer, then from index 0.

use tracing::debug;

use super::{require_mode, Sector, SectorError, SectorMode};

pub struct RingSector {
    buf:      Vec<u8>,
    head:     usize,
    tail:     usize,
    empty:    bool,
    mode:     SectorMode,
    number:   i32,
    /// Total bytes consumed; the logical read position.
    consumed: u64,
    disposed: bool,
}

impl RingSector {
    pub fn new(number: i32, capacity: usize) -> Self {
        Self {
            buf:      vec![0u8; capacity.max(1)],
            head:     0,
            tail:     0,
            empty:    true,
            mode:     SectorMode::Idle,
            number,
            consumed: 0,
            disposed: false,
        }
    }

    pub fn is_full(&self) -> bool {
        !self.empty && self.head == self.tail
    }

    fn live(&self) -> Result<(), SectorError> {
        if self.disposed {
            return Err(SectorError::Disposed);
        }
        Ok(())
    }

    fn stored(&self) -> usize {
        if self.empty {
            0
        } else if self.tail > self.head {
            self.tail - self.head
        } else {
            self.buf.len() - self.head + self.tail
        }
    }
}

impl Sector for RingSector {
    fn number(&self) -> i32 {
        self.number
    }

    fn mode(&self) -> SectorMode {
        self.mode
    }

    fn set_mode(&mut self, to: SectorMode) -> Result<(), SectorError> {
        self.live()?;
        let from = self.mode;
        if !from.can_switch_to(to) {
            return Err(SectorError::InvalidTransition { from, to });
        }
        self.mode = to;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.stored() as u64
    }

    fn capacity(&self) -> u64 {
        self.buf.len() as u64
    }

    fn remaining(&self) -> u64 {
        self.capacity() - self.len()
    }

    fn read(&mut self, out: &mut [u8]) -> Result<usize, SectorError> {
        self.live()?;
        require_mode(self.mode, SectorMode::Read)?;
        let n = out.len().min(self.stored());
        if n == 0 {
            return Ok(0);
        }
        let cap = self.buf.len();
        let first = n.min(cap - self.head);
        out[..first].copy_from_slice(&self.buf[self.head..self.head + first]);
        let second = n - first;
        out[first..n].copy_from_slice(&self.buf[..second]);

        self.head = (self.head + n) % cap;
        if self.head == self.tail {
            self.empty = true;
        }
        self.consumed += n as u64;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, SectorError> {
        self.live()?;
        require_mode(self.mode, SectorMode::Write)?;
        let n = data.len().min(self.remaining() as usize);
        if n == 0 {
            return Ok(0);
        }
        let cap = self.buf.len();
        let first = n.min(cap - self.tail);
        self.buf[self.tail..self.tail + first].copy_from_slice(&data[..first]);
        let second = n - first;
        self.buf[..second].copy_from_slice(&data[first..n]);

        self.tail = (self.tail + n) % cap;
        self.empty = false;
        Ok(n)
    }

    fn read_position(&self) -> u64 {
        self.consumed
    }

    /// Consumed bytes may already be overwritten, so only the current
    /// position is accepted.
    fn set_read_position(&mut self, pos: u64) -> Result<(), SectorError> {
        self.live()?;
        if pos != self.consumed {
            return Err(SectorError::Unsupported("ring sectors cannot rewind"));
        }
        Ok(())
    }

    fn dispose(&mut self) -> Result<(), SectorError> {
        if !self.disposed {
            self.buf = Vec::new();
            self.head = 0;
            self.tail = 0;
            self.empty = true;
            self.mode = SectorMode::Closed;
            self.disposed = true;
            debug!(number = self.number, "disposed ring sector");
        }
        Ok(())
    }

    fn delete(mut self: Box<Self>) -> Result<(), SectorError> {
        self.dispose()
    }
}
