pub mod error;
pub mod config;
pub mod cancel;
pub mod pointer;
pub mod sector;
pub mod scroll;
pub mod encoding;
pub mod dispatch;

pub use error::{Result, ScrollError, ShapeError};
pub use config::{ResolutionPolicy, ScrollOptions};
pub use cancel::CancelToken;
pub use pointer::{Pointer, PointerTag, ScrollTag};
pub use sector::{Sector, SectorError, SectorMode};
pub use scroll::{Duplicate, MemoryScroll, Scroll, ScrollExt, SectorScroll, SharedScroll};
pub use encoding::{Fixed, Scrollable};
pub use dispatch::{DispatchTable, Object, ObjectExt, TypeDescriptor, TypeIdentifier, Typed};
