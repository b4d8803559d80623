//! Asynchronous file-backed section (cargo feature `async`).
//!
//! Same header layout and mode rules as [`Section`](super::Section).  Every
//! operation takes a [`CancelToken`] that is checked right before an I/O call
//! is issued; a canceled operation transfers nothing and leaves the section
//! usable.  `close` should be awaited before dropping; a section dropped while
//! open writes its header back synchronously as a last resort.  Buffered
//! writes are only flushed on drop inside a multi-thread runtime.  Under a
//! current-thread runtime (the `#[tokio::test]` default) the flush is skipped
//! with a warning, and data still in flight may land after the header.

use std::io::{Seek, SeekFrom as StdSeekFrom, Write};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::{debug, warn};

use super::header::{SectionHeader, HEADER_SIZE};
use super::{require_mode, SectorError, SectorMode};
use crate::cancel::CancelToken;

fn checkpoint(cancel: &CancelToken) -> Result<(), SectorError> {
    if cancel.is_canceled() {
        return Err(SectorError::Canceled);
    }
    Ok(())
}

pub struct AsyncSection {
    path:     PathBuf,
    file:     Option<File>,
    header:   SectionHeader,
    mode:     SectorMode,
    cursor:   u64,
    capacity: u64,
}

impl AsyncSection {
    pub async fn create<P: AsRef<Path>>(
        path: P,
        number: i32,
        capacity: u64,
        cancel: &CancelToken,
    ) -> Result<Self, SectorError> {
        checkpoint(cancel)?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())
            .await?;
        let header = SectionHeader::new(number);
        file.write_all(&header.to_bytes()).await?;
        file.flush().await?;
        debug!(section = %path.as_ref().display(), number, "created async section");
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            file: Some(file),
            header,
            mode: SectorMode::Idle,
            cursor: HEADER_SIZE as u64,
            capacity,
        })
    }

    pub async fn attach<P: AsRef<Path>>(
        path: P,
        capacity: u64,
        cancel: &CancelToken,
    ) -> Result<Self, SectorError> {
        let mut section = Self {
            path: path.as_ref().to_path_buf(),
            file: None,
            header: SectionHeader::new(0),
            mode: SectorMode::Closed,
            cursor: 0,
            capacity,
        };
        section.ensure_open(cancel).await?;
        section.mode = SectorMode::Idle;
        let stored = section.header.end as u64 - HEADER_SIZE as u64;
        section.capacity = capacity.max(stored);
        Ok(section)
    }

    pub fn mode(&self) -> SectorMode {
        self.mode
    }

    pub fn number(&self) -> i32 {
        self.header.number
    }

    pub fn header(&self) -> SectionHeader {
        SectionHeader { start: self.read_pos() as i64, end: self.write_pos() as i64, ..self.header }
    }

    pub fn len(&self) -> u64 {
        self.write_pos() - self.read_pos()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remaining(&self) -> u64 {
        self.capacity.saturating_sub(self.write_pos() - HEADER_SIZE as u64)
    }

    fn read_pos(&self) -> u64 {
        if self.mode == SectorMode::Read { self.cursor } else { self.header.start as u64 }
    }

    fn write_pos(&self) -> u64 {
        if self.mode == SectorMode::Write { self.cursor } else { self.header.end as u64 }
    }

    fn settle(&mut self) {
        match self.mode {
            SectorMode::Read  => self.header.start = self.cursor as i64,
            SectorMode::Write => self.header.end = self.cursor as i64,
            _ => {}
        }
    }

    fn file(&mut self) -> Result<&mut File, SectorError> {
        self.file.as_mut().ok_or(SectorError::Mode {
            expected: SectorMode::Idle,
            actual:   SectorMode::Closed,
        })
    }

    async fn ensure_open(&mut self, cancel: &CancelToken) -> Result<(), SectorError> {
        if self.file.is_some() {
            return Ok(());
        }
        checkpoint(cancel)?;
        let mut file = OpenOptions::new().read(true).write(true).open(&self.path).await?;
        let mut raw = [0u8; HEADER_SIZE];
        file.read_exact(&mut raw).await?;
        self.header = SectionHeader::from_bytes(&raw).map_err(|e| {
            if let SectorError::Authentication { found } = e {
                warn!(section = %self.path.display(), token = found, "section authentication failed");
            }
            e
        })?;
        self.file = Some(file);
        Ok(())
    }

    async fn flush_header(&mut self, cancel: &CancelToken) -> Result<(), SectorError> {
        checkpoint(cancel)?;
        let bytes = self.header.to_bytes();
        let file = self.file()?;
        file.seek(SeekFrom::Start(0)).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn set_mode(&mut self, to: SectorMode, cancel: &CancelToken) -> Result<(), SectorError> {
        let from = self.mode;
        if from == to {
            return Ok(());
        }
        if !from.can_switch_to(to) {
            return Err(SectorError::InvalidTransition { from, to });
        }
        match to {
            SectorMode::Closed => {
                self.settle();
                if self.file.is_some() {
                    self.flush_header(cancel).await?;
                }
                self.file = None;
            }
            SectorMode::Idle => {
                self.settle();
                self.ensure_open(cancel).await?;
            }
            SectorMode::Read | SectorMode::Write => {
                self.ensure_open(cancel).await?;
                checkpoint(cancel)?;
                let target = if to == SectorMode::Read { self.header.start } else { self.header.end } as u64;
                self.file()?.seek(SeekFrom::Start(target)).await?;
                self.cursor = target;
            }
        }
        self.mode = to;
        Ok(())
    }

    pub async fn read(&mut self, buf: &mut [u8], cancel: &CancelToken) -> Result<usize, SectorError> {
        require_mode(self.mode, SectorMode::Read)?;
        let n = (buf.len() as u64).min(self.header.end as u64 - self.cursor) as usize;
        if n == 0 {
            return Ok(0);
        }
        checkpoint(cancel)?;
        self.file()?.read_exact(&mut buf[..n]).await?;
        self.cursor += n as u64;
        Ok(n)
    }

    pub async fn write(&mut self, data: &[u8], cancel: &CancelToken) -> Result<usize, SectorError> {
        require_mode(self.mode, SectorMode::Write)?;
        let n = (data.len() as u64).min(self.remaining()) as usize;
        if n == 0 {
            return Ok(0);
        }
        checkpoint(cancel)?;
        self.file()?.write_all(&data[..n]).await?;
        self.cursor += n as u64;
        Ok(n)
    }

    pub async fn close(&mut self, cancel: &CancelToken) -> Result<(), SectorError> {
        self.set_mode(SectorMode::Closed, cancel).await
    }

    pub async fn delete(mut self, cancel: &CancelToken) -> Result<(), SectorError> {
        self.close(cancel).await?;
        checkpoint(cancel)?;
        tokio::fs::remove_file(&self.path).await?;
        debug!(section = %self.path.display(), "deleted async section");
        Ok(())
    }
}

impl Drop for AsyncSection {
    fn drop(&mut self) {
        let Some(mut file) = self.file.take() else { return };
        self.settle();
        // Pending buffered writes must land before the header is patched.
        match flush_blocking(&mut file) {
            Ok(true) => {}
            Ok(false) => {
                warn!(section = %self.path.display(), "async section dropped open outside a multi-thread runtime, buffered writes not flushed");
            }
            Err(e) => {
                warn!(section = %self.path.display(), error = %e, "failed to flush async section on drop");
            }
        }
        let bytes = self.header.to_bytes();
        let result = std::fs::OpenOptions::new()
            .write(true)
            .open(&self.path)
            .and_then(|mut f| {
                f.seek(StdSeekFrom::Start(0))?;
                f.write_all(&bytes)
            });
        if let Err(e) = result {
            warn!(section = %self.path.display(), error = %e, "failed to flush async section header on drop");
        }
    }
}

/// Flush a tokio file from a synchronous context.  `Ok(false)` when no
/// multi-thread runtime is available to block on.
fn flush_blocking(file: &mut File) -> std::io::Result<bool> {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| handle.block_on(file.flush())).map(|()| true)
        }
        _ => Ok(false),
    }
}
