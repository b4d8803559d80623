//! Runtime configuration for scrolls and the dispatch table.
//!
//! ```
//! use scrolls::config::{ScrollOptions, ResolutionPolicy};
//!
//! let opts = ScrollOptions::from_json(r#"{ "sector_capacity": 4096 }"#)?;
//! assert_eq!(opts.sector_capacity, 4096);
//! assert_eq!(opts.resolution, ResolutionPolicy::BasesThenInterfaces);
//! # Ok::<(), serde_json::Error>(())
//! ```

use serde::{Deserialize, Serialize};

/// Default payload capacity of a freshly allocated sector: 64 KiB.
pub const DEFAULT_SECTOR_CAPACITY: u64 = 64 * 1024;

/// Fallback order used when a value's own type has no dispatch entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// Declared type, then base types (nearest first), then interfaces.
    #[default]
    BasesThenInterfaces,
    /// Declared type, then interfaces, then base types.
    InterfacesThenBases,
    /// Declared type only.
    ExactOnly,
}

/// Configuration for sector-backed scrolls and dispatch resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollOptions {
    /// Payload bytes per freshly allocated sector.
    pub sector_capacity:  u64,
    pub resolution:       ResolutionPolicy,
    /// Delete fully consumed sectors as soon as the read cursor leaves them.
    pub compact_on_drain: bool,
}

impl Default for ScrollOptions {
    fn default() -> Self {
        Self {
            sector_capacity:  DEFAULT_SECTOR_CAPACITY,
            resolution:       ResolutionPolicy::default(),
            compact_on_drain: false,
        }
    }
}

impl ScrollOptions {
    pub fn with_sector_capacity(mut self, capacity: u64) -> Self {
        self.sector_capacity = capacity.max(1);
        self
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let mut opts: Self = serde_json::from_str(text)?;
        opts.sector_capacity = opts.sector_capacity.max(1);
        Ok(opts)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
