//! Page buffer: a page-granularity write-back cache between a storage
//! library's object layer and a block-addressable file driver.
//!
//! In write mode the buffer also tracks which pages changed during each tick
//! and holds back on-disk writes of rewritten metadata pages until readers
//! navigating by an older published index can no longer reach them.

#![warn(missing_docs)]

pub mod primitives;
pub mod types;

pub use primitives::io::{FileDriver, MemDriver, StdFileDriver};
pub use primitives::pager::{PageBufOptions, PageBufStats, PageBuffer, TickSummary};
pub use types::{AccessMode, FlushScope, MemClass, PageBufError, PageId, Result};
