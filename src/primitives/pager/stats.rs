use std::fmt;
use std::ops::{Index, IndexMut};

use crate::types::MemClass;

/// Statistics bucket an entry or access is counted under.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StatClass {
    /// Single-page metadata.
    Metadata,
    /// Raw data.
    RawData,
    /// Multi-page metadata entry.
    MultiPage,
}

impl StatClass {
    pub(crate) fn of(class: MemClass, is_mpmde: bool) -> Self {
        match (class, is_mpmde) {
            (MemClass::RawData, _) => StatClass::RawData,
            (MemClass::Metadata, true) => StatClass::MultiPage,
            (MemClass::Metadata, false) => StatClass::Metadata,
        }
    }
}

/// One counter per [`StatClass`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ClassCounts([u64; 3]);

impl ClassCounts {
    /// Sum over all classes.
    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }
}

impl Index<StatClass> for ClassCounts {
    type Output = u64;

    fn index(&self, class: StatClass) -> &u64 {
        &self.0[class as usize]
    }
}

impl IndexMut<StatClass> for ClassCounts {
    fn index_mut(&mut self, class: StatClass) -> &mut u64 {
        &mut self.0[class as usize]
    }
}

/// Statistics tracking page buffer operations.
#[derive(Default, Clone, Debug)]
pub struct PageBufStats {
    /// Accesses issued by callers.
    pub accesses: ClassCounts,
    /// Page lookups satisfied from the buffer.
    pub hits: ClassCounts,
    /// Page lookups that missed.
    pub misses: ClassCounts,
    /// Misses served straight from the driver without caching.
    pub bypasses: ClassCounts,
    /// Entries read from the driver.
    pub loads: ClassCounts,
    /// Entries inserted into the index.
    pub insertions: ClassCounts,
    /// Dirty entries written back.
    pub flushes: ClassCounts,
    /// Entries evicted.
    pub evictions: ClassCounts,
    /// Dirty entries discarded without a write.
    pub clears: ClassCounts,
    /// Successful hash searches.
    pub successful_ht_searches: u64,
    /// Chain links walked by successful searches.
    pub total_successful_ht_search_depth: u64,
    /// Failed hash searches.
    pub failed_ht_searches: u64,
    /// Chain links walked by failed searches.
    pub total_failed_ht_search_depth: u64,
    /// Hash index insertions.
    pub total_ht_insertions: u64,
    /// Hash index deletions.
    pub total_ht_deletions: u64,
    /// High-water mark of resident entries.
    pub max_index_len: usize,
    /// High-water mark of resident bytes.
    pub max_index_size: usize,
    /// High-water mark of dirty bytes.
    pub max_dirty_index_size: usize,
    /// High-water mark of the replacement policy length.
    pub max_lru_len: usize,
    /// High-water mark of the replacement policy bytes.
    pub max_lru_size: usize,
    /// High-water mark of the tick list length.
    pub max_tl_len: usize,
    /// High-water mark of the tick list bytes.
    pub max_tl_size: usize,
    /// High-water mark of the delayed-write list length.
    pub max_dwl_len: usize,
    /// High-water mark of the delayed-write list bytes.
    pub max_dwl_size: usize,
    /// Eviction candidates skipped to honor the metadata quota.
    pub lru_md_skips: u64,
    /// Eviction candidates skipped to honor the raw-data quota.
    pub lru_rd_skips: u64,
    /// Eviction candidates skipped because they were modified this tick.
    pub lru_tl_skips: u64,
    /// Writes placed on the delayed-write list.
    pub delayed_writes: u64,
    /// Sum of delays, in ticks, of all delayed writes.
    pub total_delay: u64,
    /// Sum of delayed-write list insertion scan depths.
    pub total_dwl_ins_depth: u64,
}

impl PageBufStats {
    /// Fraction of page lookups served from the buffer, or zero if none occurred.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.total();
        let lookups = hits + self.misses.total();
        if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        }
    }

    /// Mean chain depth of successful hash searches.
    pub fn avg_successful_search_depth(&self) -> f64 {
        if self.successful_ht_searches == 0 {
            0.0
        } else {
            self.total_successful_ht_search_depth as f64 / self.successful_ht_searches as f64
        }
    }

    pub(crate) fn record_search(&mut self, hit: bool, depth: usize) {
        if hit {
            self.successful_ht_searches += 1;
            self.total_successful_ht_search_depth += depth as u64;
        } else {
            self.failed_ht_searches += 1;
            self.total_failed_ht_search_depth += depth as u64;
        }
    }
}

impl fmt::Display for PageBufStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} bypasses={} insertions={} flushes={} evictions={} clears={} delayed_writes={}",
            self.hits.total(),
            self.misses.total(),
            self.bypasses.total(),
            self.insertions.total(),
            self.flushes.total(),
            self.evictions.total(),
            self.clears.total(),
            self.delayed_writes
        )
    }
}
