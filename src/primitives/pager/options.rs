use serde::{Deserialize, Serialize};

use crate::types::{PageBufError, Result};

/// Default page size in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 4096;
/// Default byte budget.
pub const DEFAULT_MAX_SIZE: usize = 4 * 1024 * 1024;
/// Default number of ticks a write to a previously published page is held back.
pub const DEFAULT_MAX_LAG: u64 = 3;
/// Default number of hash buckets.
pub const DEFAULT_HASH_TABLE_LEN: usize = 4096;

/// Configuration options for a [`super::PageBuffer`].
///
/// These options control page geometry, the byte budget and its per-class
/// reservations, and whether the buffer runs as a single-writer/multi-reader
/// writer with tick-delayed writes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageBufOptions {
    /// Size of each page in bytes; must be a power of two.
    pub page_size: usize,
    /// Soft byte budget; `0` disables caching entirely.
    pub max_size: usize,
    /// Bytes of the budget reserved for metadata pages.
    pub min_md_bytes: usize,
    /// Bytes of the budget reserved for raw-data pages.
    pub min_rd_bytes: usize,
    /// Whether the file is open as the writer in single-writer/multi-reader mode.
    pub write_mode: bool,
    /// Ticks a rewritten, previously loaded metadata page must wait before its write.
    pub max_lag: u64,
    /// Whether a raw-data read miss also loads the following page.
    pub prefetch_on_miss: bool,
    /// Number of hash buckets; must be a power of two.
    pub hash_table_len: usize,
}

impl Default for PageBufOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            min_md_bytes: 0,
            min_rd_bytes: 0,
            write_mode: false,
            max_lag: DEFAULT_MAX_LAG,
            prefetch_on_miss: false,
            hash_table_len: DEFAULT_HASH_TABLE_LEN,
        }
    }
}

impl PageBufOptions {
    /// Sets the page size.
    pub fn page_size(mut self, bytes: usize) -> Self {
        self.page_size = bytes;
        self
    }

    /// Sets the byte budget.
    pub fn max_size(mut self, bytes: usize) -> Self {
        self.max_size = bytes;
        self
    }

    /// Sets the byte budget to a whole number of pages.
    pub fn max_pages(mut self, pages: usize) -> Self {
        self.max_size = pages * self.page_size;
        self
    }

    /// Reserves bytes for metadata and raw-data pages.
    pub fn quotas(mut self, md_bytes: usize, rd_bytes: usize) -> Self {
        self.min_md_bytes = md_bytes;
        self.min_rd_bytes = rd_bytes;
        self
    }

    /// Enables writer mode with the given lag.
    pub fn write_mode(mut self, max_lag: u64) -> Self {
        self.write_mode = true;
        self.max_lag = max_lag;
        self
    }

    /// Enables or disables raw-data read-ahead.
    pub fn prefetch_on_miss(mut self, enabled: bool) -> Self {
        self.prefetch_on_miss = enabled;
        self
    }

    /// Sets the number of hash buckets.
    pub fn hash_table_len(mut self, len: usize) -> Self {
        self.hash_table_len = len;
        self
    }

    /// Checks the options for consistency.
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two() {
            return Err(PageBufError::Config("page size must be a power of two"));
        }
        if self.max_size != 0 && self.max_size < self.page_size {
            return Err(PageBufError::Config("max size smaller than one page"));
        }
        let reserved = self
            .min_md_bytes
            .checked_add(self.min_rd_bytes)
            .ok_or(PageBufError::Config("quota overflow"))?;
        if reserved > self.max_size {
            return Err(PageBufError::Config("quotas exceed max size"));
        }
        if !self.hash_table_len.is_power_of_two() {
            return Err(PageBufError::Config("hash table length must be a power of two"));
        }
        Ok(())
    }

    /// Whole pages the budget holds.
    pub fn max_pages_count(&self) -> usize {
        self.max_size / self.page_size
    }

    /// Whole pages reserved for metadata.
    pub fn min_md_pages(&self) -> usize {
        self.min_md_bytes / self.page_size
    }

    /// Whole pages reserved for raw data.
    pub fn min_rd_pages(&self) -> usize {
        self.min_rd_bytes / self.page_size
    }

    /// Parses options from TOML, filling omitted keys with defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: Self = toml::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    /// Renders the options as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
