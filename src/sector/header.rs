//! Section header: fixed 32-byte record at offset 0 of every section stream.
//!
//! ```text
//! 0x00  i64  start position (absolute stream offset of the first unread byte)
//! 0x08  i64  end position   (absolute stream offset one past the last byte)
//! 0x10  i32  sequence number
//! 0x14  u32  token          (must equal SECTION_TOKEN)
//! 0x18  u32  CRC32 of bytes 0x00..0x18
//! 0x1C  --   reserved, zero
//! ```
//!
//! All fields are little-endian.  The token is checked before the checksum so
//! that a foreign file is reported as an authentication failure rather than as
//! corruption.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use crc32fast::Hasher;
use std::io::{self, Read, Write};

use super::SectorError;

pub const HEADER_SIZE: usize = 32;
/// Magic discriminator: the bytes `SCRL` read as a little-endian u32.
pub const SECTION_TOKEN: u32 = u32::from_le_bytes(*b"SCRL");
/// Filename extension identifying section files on disk.
pub const SECTION_EXTENSION: &str = "scroll";

const CRC_OFFSET: usize = 0x18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    pub start:  i64,
    pub end:    i64,
    pub number: i32,
    pub token:  u32,
}

impl SectionHeader {
    /// Header of an empty section: both positions sit right after the header.
    pub fn new(number: i32) -> Self {
        Self {
            start:  HEADER_SIZE as i64,
            end:    HEADER_SIZE as i64,
            number,
            token:  SECTION_TOKEN,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        LittleEndian::write_i64(&mut buf[0x00..0x08], self.start);
        LittleEndian::write_i64(&mut buf[0x08..0x10], self.end);
        LittleEndian::write_i32(&mut buf[0x10..0x14], self.number);
        LittleEndian::write_u32(&mut buf[0x14..CRC_OFFSET], self.token);
        let crc = checksum(&buf[..CRC_OFFSET]);
        LittleEndian::write_u32(&mut buf[CRC_OFFSET..CRC_OFFSET + 4], crc);
        buf
    }

    /// Parse and authenticate a header block.
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Result<Self, SectorError> {
        let mut r = &buf[..];
        let start  = r.read_i64::<LittleEndian>()?;
        let end    = r.read_i64::<LittleEndian>()?;
        let number = r.read_i32::<LittleEndian>()?;
        let token  = r.read_u32::<LittleEndian>()?;
        if token != SECTION_TOKEN {
            return Err(SectorError::Authentication { found: token });
        }
        let stored = r.read_u32::<LittleEndian>()?;
        if stored != checksum(&buf[..CRC_OFFSET]) {
            return Err(SectorError::HeaderChecksum);
        }
        if start < HEADER_SIZE as i64 || end < start {
            return Err(SectorError::CorruptHeader(format!(
                "positions out of order: start {start}, end {end}"
            )));
        }
        Ok(Self { start, end, number, token })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    /// Read a header; a short stream surfaces as an I/O error.
    pub fn read<R: Read>(mut reader: R) -> Result<Self, SectorError> {
        let mut buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut buf)?;
        Self::from_bytes(&buf)
    }
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}
