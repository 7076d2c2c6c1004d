#![forbid(unsafe_code)]

mod buffer;
mod frame;
mod index;
mod list;
mod lru;
mod options;
mod stats;
mod tick;

pub use buffer::{EntryInfo, ModifiedEntry, Occupancy, PageBuffer, TickSummary};
pub use index::IndexCounters;
pub use options::{
    PageBufOptions, DEFAULT_HASH_TABLE_LEN, DEFAULT_MAX_LAG, DEFAULT_MAX_SIZE, DEFAULT_PAGE_SIZE,
};
pub use stats::{ClassCounts, PageBufStats, StatClass};
