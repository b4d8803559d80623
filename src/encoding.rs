//! Built-in value encodings.
//!
//! # Fixed-width layout
//! All multi-byte values are little-endian.  A GUID is written field by field:
//! a 32-bit field, two 16-bit fields, then the remaining 8 bytes in order.
//! `char` is its 32-bit scalar value; `bool` is one byte (0 or 1).  Date/time
//! values are 64-bit counts of 100 ns ticks since 0001-01-01T00:00:00Z.
//!
//! # Variable-length layout
//! | Type | Encoding |
//! |------|----------|
//! | `Option<T: Fixed>` | presence byte, then the value if present |
//! | `String` | i32 count of UTF-16 units (`-1` = null), then the units |
//! | `Vec<T>` | i32 element count (`-1` = null), then each element |
//! | `BigInt` | i32 byte count, then minimal two's complement, little-endian |

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use uuid::Uuid;

use crate::error::{Result, ScrollError};
use crate::scroll::{remove_vec, Scroll, ScrollExt};

/// 100 ns ticks per second.
pub const TICKS_PER_SECOND: i64 = 10_000_000;
/// Ticks between 0001-01-01 and the Unix epoch.
pub const UNIX_EPOCH_TICKS: i64 = 62_135_596_800 * TICKS_PER_SECOND;

// ── Fixed-layout values ──────────────────────────────────────────────────────

/// A value with a stable, fixed-width byte representation.
pub trait Fixed: Copy + Send + Sync + 'static {
    const SIZE: usize;

    /// Write exactly `SIZE` bytes into `out`.
    fn write_le(&self, out: &mut [u8]);
    /// Decode from exactly `SIZE` bytes.
    fn read_le(bytes: &[u8]) -> Result<Self>;
}

macro_rules! fixed_via_byteorder {
    ($($t:ty => $write:ident, $read:ident;)*) => {$(
        impl Fixed for $t {
            const SIZE: usize = std::mem::size_of::<$t>();

            #[inline]
            fn write_le(&self, out: &mut [u8]) {
                LittleEndian::$write(out, *self)
            }

            #[inline]
            fn read_le(bytes: &[u8]) -> Result<Self> {
                Ok(LittleEndian::$read(bytes))
            }
        }
    )*};
}

fixed_via_byteorder! {
    u16  => write_u16,  read_u16;
    u32  => write_u32,  read_u32;
    u64  => write_u64,  read_u64;
    u128 => write_u128, read_u128;
    i16  => write_i16,  read_i16;
    i32  => write_i32,  read_i32;
    i64  => write_i64,  read_i64;
    i128 => write_i128, read_i128;
    f32  => write_f32,  read_f32;
    f64  => write_f64,  read_f64;
}

impl Fixed for u8 {
    const SIZE: usize = 1;

    fn write_le(&self, out: &mut [u8]) {
        out[0] = *self;
    }

    fn read_le(bytes: &[u8]) -> Result<Self> {
        Ok(bytes[0])
    }
}

impl Fixed for i8 {
    const SIZE: usize = 1;

    fn write_le(&self, out: &mut [u8]) {
        out[0] = *self as u8;
    }

    fn read_le(bytes: &[u8]) -> Result<Self> {
        Ok(bytes[0] as i8)
    }
}

impl Fixed for bool {
    const SIZE: usize = 1;

    fn write_le(&self, out: &mut [u8]) {
        out[0] = u8::from(*self);
    }

    fn read_le(bytes: &[u8]) -> Result<Self> {
        match bytes[0] {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(ScrollError::InvalidData(format!("invalid boolean byte {b:#04x}"))),
        }
    }
}

impl Fixed for char {
    const SIZE: usize = 4;

    fn write_le(&self, out: &mut [u8]) {
        LittleEndian::write_u32(out, u32::from(*self))
    }

    fn read_le(bytes: &[u8]) -> Result<Self> {
        let scalar = LittleEndian::read_u32(bytes);
        char::from_u32(scalar)
            .ok_or_else(|| ScrollError::InvalidData(format!("invalid char scalar {scalar:#x}")))
    }
}

impl Fixed for Uuid {
    const SIZE: usize = 16;

    fn write_le(&self, out: &mut [u8]) {
        let (d1, d2, d3, d4) = self.as_fields();
        LittleEndian::write_u32(&mut out[0..4], d1);
        LittleEndian::write_u16(&mut out[4..6], d2);
        LittleEndian::write_u16(&mut out[6..8], d3);
        out[8..16].copy_from_slice(d4);
    }

    fn read_le(bytes: &[u8]) -> Result<Self> {
        let mut d4 = [0u8; 8];
        d4.copy_from_slice(&bytes[8..16]);
        Ok(Uuid::from_fields(
            LittleEndian::read_u32(&bytes[0..4]),
            LittleEndian::read_u16(&bytes[4..6]),
            LittleEndian::read_u16(&bytes[6..8]),
            &d4,
        ))
    }
}

/// Ticks since 0001-01-01, saturating outside the representable range.
pub fn to_ticks(at: &DateTime<Utc>) -> i64 {
    at.timestamp()
        .saturating_mul(TICKS_PER_SECOND)
        .saturating_add(i64::from(at.timestamp_subsec_nanos() / 100))
        .saturating_add(UNIX_EPOCH_TICKS)
}

pub fn from_ticks(ticks: i64) -> Result<DateTime<Utc>> {
    let since_unix = ticks - UNIX_EPOCH_TICKS;
    let secs = since_unix.div_euclid(TICKS_PER_SECOND);
    let nanos = (since_unix.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| ScrollError::InvalidData(format!("date/time ticks {ticks} out of range")))
}

impl Fixed for DateTime<Utc> {
    const SIZE: usize = 8;

    fn write_le(&self, out: &mut [u8]) {
        LittleEndian::write_i64(out, to_ticks(self))
    }

    fn read_le(bytes: &[u8]) -> Result<Self> {
        from_ticks(LittleEndian::read_i64(bytes))
    }
}

// ── Scrollable values ────────────────────────────────────────────────────────

/// A value with a scroll encoding, fixed or variable length.
pub trait Scrollable: Sized {
    fn insert_into<S: Scroll + ?Sized>(&self, scroll: &mut S) -> Result<()>;

    fn remove_from<S: Scroll + ?Sized>(scroll: &mut S) -> Result<Self>;

    /// Decode in place.  The default replaces `self` with a freshly decoded value.
    fn remove_into<S: Scroll + ?Sized>(&mut self, scroll: &mut S) -> Result<()> {
        *self = Self::remove_from(scroll)?;
        Ok(())
    }
}

macro_rules! scrollable_fixed {
    ($($t:ty),* $(,)?) => {$(
        impl Scrollable for $t {
            fn insert_into<S: Scroll + ?Sized>(&self, scroll: &mut S) -> Result<()> {
                scroll.insert_value(*self)
            }

            fn remove_from<S: Scroll + ?Sized>(scroll: &mut S) -> Result<Self> {
                scroll.remove_value()
            }

            fn remove_into<S: Scroll + ?Sized>(&mut self, scroll: &mut S) -> Result<()> {
                scroll.remove_value_into(self)
            }
        }
    )*};
}

scrollable_fixed!(
    u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64, bool, char, Uuid, DateTime<Utc>,
);

impl<T: Fixed> Scrollable for Option<T> {
    fn insert_into<S: Scroll + ?Sized>(&self, scroll: &mut S) -> Result<()> {
        scroll.insert_value(self.is_some())?;
        match self {
            Some(value) => scroll.insert_value(*value),
            None => Ok(()),
        }
    }

    fn remove_from<S: Scroll + ?Sized>(scroll: &mut S) -> Result<Self> {
        if scroll.remove_value::<bool>()? {
            Ok(Some(scroll.remove_value()?))
        } else {
            Ok(None)
        }
    }
}

/// Non-null strings.  Use [`ScrollExt::insert_str`] / [`ScrollExt::remove_str`]
/// for nullable ones.
impl Scrollable for String {
    fn insert_into<S: Scroll + ?Sized>(&self, scroll: &mut S) -> Result<()> {
        scroll.insert_str(Some(self.as_str()))
    }

    fn remove_from<S: Scroll + ?Sized>(scroll: &mut S) -> Result<Self> {
        scroll
            .remove_str()?
            .ok_or_else(|| ScrollError::InvalidData("null string where a value was expected".into()))
    }
}

/// Non-null arrays.  Use [`ScrollExt::insert_array`] / [`ScrollExt::remove_array`]
/// for nullable ones.
impl<T: Scrollable> Scrollable for Vec<T> {
    fn insert_into<S: Scroll + ?Sized>(&self, scroll: &mut S) -> Result<()> {
        scroll.insert_array(Some(self.as_slice()))
    }

    fn remove_from<S: Scroll + ?Sized>(scroll: &mut S) -> Result<Self> {
        scroll
            .remove_array()?
            .ok_or_else(|| ScrollError::InvalidData("null array where a value was expected".into()))
    }
}

impl Scrollable for BigInt {
    fn insert_into<S: Scroll + ?Sized>(&self, scroll: &mut S) -> Result<()> {
        let bytes = self.to_signed_bytes_le();
        let len = i32::try_from(bytes.len())
            .map_err(|_| ScrollError::InvalidOperation("integer too large to encode".into()))?;
        scroll.insert_value(len)?;
        scroll.insert_bytes(&bytes)
    }

    fn remove_from<S: Scroll + ?Sized>(scroll: &mut S) -> Result<Self> {
        let len = scroll.remove_value::<i32>()?;
        if len < 0 {
            return Err(ScrollError::InvalidData(format!("negative integer length {len}")));
        }
        let bytes = remove_vec(scroll, len as usize)?;
        Ok(BigInt::from_signed_bytes_le(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scroll::MemoryScroll;
    use chrono::TimeZone;

    #[test]
    fn guid_is_written_field_by_field() {
        let id = Uuid::parse_str("01234567-89ab-cdef-0123-456789abcdef").unwrap();
        let mut scroll = MemoryScroll::new();
        scroll.insert_value(id).unwrap();
        assert_eq!(
            scroll.as_bytes(),
            &[
                0x67, 0x45, 0x23, 0x01, // u32
                0xab, 0x89, // u16
                0xef, 0xcd, // u16
                0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef,
            ]
        );

        scroll.rewind();
        let back: Uuid = scroll.remove_value().unwrap();
        assert_eq!(back, id);
        assert_eq!(back.as_fields(), id.as_fields());
    }

    #[test]
    fn unix_epoch_tick_count() {
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        assert_eq!(to_ticks(&epoch), 621_355_968_000_000_000);
        assert_eq!(from_ticks(0).unwrap(), Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn datetime_roundtrip_keeps_tick_precision() {
        let at = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 58).unwrap()
            + chrono::Duration::microseconds(123_456);
        let mut scroll = MemoryScroll::new();
        scroll.insert_value(at).unwrap();
        scroll.rewind();
        assert_eq!(scroll.remove_value::<DateTime<Utc>>().unwrap(), at);
    }

    #[test]
    fn invalid_bool_and_char_are_rejected() {
        let mut scroll = MemoryScroll::from_vec(vec![2]);
        assert!(matches!(scroll.remove_value::<bool>(), Err(ScrollError::InvalidData(_))));

        let mut scroll = MemoryScroll::from_vec(0xD800u32.to_le_bytes().to_vec());
        assert!(matches!(scroll.remove_value::<char>(), Err(ScrollError::InvalidData(_))));
    }

    #[test]
    fn optional_values_use_presence_byte() {
        let mut scroll = MemoryScroll::new();
        scroll.insert(&Some(0x0102u16)).unwrap();
        scroll.insert(&None::<u16>).unwrap();
        assert_eq!(scroll.as_bytes(), &[1, 0x02, 0x01, 0]);
        scroll.rewind();
        assert_eq!(scroll.remove::<Option<u16>>().unwrap(), Some(0x0102));
        assert_eq!(scroll.remove::<Option<u16>>().unwrap(), None);
    }

    #[test]
    fn bigint_uses_minimal_twos_complement() {
        let mut scroll = MemoryScroll::new();
        scroll.insert(&BigInt::from(255)).unwrap();
        scroll.insert(&BigInt::from(-1)).unwrap();
        assert_eq!(scroll.as_bytes(), &[2, 0, 0, 0, 0xff, 0x00, 1, 0, 0, 0, 0xff]);

        let huge: BigInt = "-123456789012345678901234567890".parse().unwrap();
        scroll.insert(&huge).unwrap();
        scroll.rewind();
        assert_eq!(scroll.remove::<BigInt>().unwrap(), BigInt::from(255));
        assert_eq!(scroll.remove::<BigInt>().unwrap(), BigInt::from(-1));
        assert_eq!(scroll.remove::<BigInt>().unwrap(), huge);
    }

    #[test]
    fn bigint_length_is_checked_against_stored_bytes() {
        let mut scroll = MemoryScroll::from_vec(i32::MAX.to_le_bytes().to_vec());
        assert!(matches!(
            scroll.remove::<BigInt>(),
            Err(ScrollError::UnexpectedEnd { available: 0, .. })
        ));
    }

    #[test]
    fn nested_vectors_and_strings() {
        let value = vec![vec!["a".to_string()], vec![], vec!["b".into(), "cd".into()]];
        let mut scroll = MemoryScroll::new();
        scroll.insert(&value).unwrap();
        scroll.rewind();
        assert_eq!(scroll.remove::<Vec<Vec<String>>>().unwrap(), value);
    }

    #[test]
    fn non_null_string_rejects_null_prefix() {
        let mut scroll = MemoryScroll::new();
        scroll.insert_str(None).unwrap();
        scroll.rewind();
        assert!(matches!(scroll.remove::<String>(), Err(ScrollError::InvalidData(_))));
    }

    #[test]
    fn remove_into_overwrites_in_place() {
        let mut scroll = MemoryScroll::new();
        scroll.insert(&'λ').unwrap();
        scroll.insert(&-7i64).unwrap();
        scroll.rewind();
        let mut c = ' ';
        let mut n = 0i64;
        scroll.remove_into(&mut c).unwrap();
        scroll.remove_into(&mut n).unwrap();
        assert_eq!((c, n), ('λ', -7));
    }
}
