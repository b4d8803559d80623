//! Crate-wide error taxonomy.
//!
//! Each subsystem owns its own error enum ([`SectorError`], [`DispatchError`]);
//! [`ScrollError`] wraps them for callers of the typed scroll surface.  Nothing
//! here is retried internally; every variant propagates to the immediate caller.

use std::io;
use thiserror::Error;

use crate::dispatch::table::DispatchError;
use crate::sector::SectorError;

/// Array-removal shape mismatch between the encoded array and the caller's buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    /// Caller supplied no buffer (expects null) but the encoded array is non-null.
    #[error("Expected null array, got non-null")]
    ExpectedNull,
    /// Caller supplied a buffer but the encoded array is null.
    #[error("Expected non-null array, got null")]
    ExpectedNonNull,
    #[error("Array length mismatch: encoded {expected} element(s), destination holds {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum ScrollError {
    /// Pointer produced by another scroll, or invalidated by storage reorganisation.
    #[error("Invalid pointer: {0}")]
    InvalidPointer(&'static str),

    /// A removal ran past the logical end of the stored data.
    #[error("Unexpected end of scroll: needed {needed} byte(s), {available} available")]
    UnexpectedEnd { needed: usize, available: usize },

    #[error("Scroll has been disposed")]
    Disposed,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Array shape mismatch: {0}")]
    Shape(#[from] ShapeError),

    #[error("Sector error: {0}")]
    Sector(#[from] SectorError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ScrollError {
    /// True for the I/O class of failures (short transfers, stream errors, reads past the end).
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            ScrollError::Io(_)
                | ScrollError::UnexpectedEnd { .. }
                | ScrollError::Sector(SectorError::Io(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, ScrollError>;
