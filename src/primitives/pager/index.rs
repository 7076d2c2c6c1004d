//! Hash index: page number to entry, with a roster of every resident entry.

use super::frame::{EntryArena, EntryId, LinkKind};
use super::list::EntryList;
use crate::types::{MemClass, PageBufError, PageId, Result};

/// Running totals the index keeps in step with every insert, remove and
/// dirty/clean transition.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct IndexCounters {
    /// Resident entries.
    pub index_len: usize,
    /// Bytes held by resident entries.
    pub index_size: usize,
    /// Resident clean entries.
    pub clean_index_len: usize,
    /// Bytes held by clean entries.
    pub clean_index_size: usize,
    /// Resident dirty entries.
    pub dirty_index_len: usize,
    /// Bytes held by dirty entries.
    pub dirty_index_size: usize,
    /// Single-page metadata entries.
    pub md_pages: usize,
    /// Raw-data entries.
    pub rd_pages: usize,
    /// Multi-page metadata entries.
    pub mpmde_count: usize,
}

impl IndexCounters {
    /// Ordinary (single-page) entries currently resident.
    pub fn curr_pages(&self) -> usize {
        self.md_pages + self.rd_pages
    }
}

/// Outcome of [`HashIndex::search`]; `depth` is the number of chain links walked.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Search {
    pub hit: Option<EntryId>,
    pub depth: usize,
}

pub(crate) struct HashIndex {
    buckets: Vec<EntryList>,
    roster: EntryList,
    mask: u64,
    counters: IndexCounters,
}

impl HashIndex {
    pub fn new(table_len: usize) -> Self {
        debug_assert!(table_len.is_power_of_two());
        Self {
            buckets: (0..table_len)
                .map(|_| EntryList::new(LinkKind::Bucket))
                .collect(),
            roster: EntryList::new(LinkKind::Roster),
            mask: table_len as u64 - 1,
            counters: IndexCounters::default(),
        }
    }

    fn bucket(&self, page: PageId) -> usize {
        (page.0 & self.mask) as usize
    }

    pub fn counters(&self) -> IndexCounters {
        self.counters
    }

    pub fn roster(&self) -> &EntryList {
        &self.roster
    }

    pub fn insert(&mut self, arena: &mut EntryArena, id: EntryId) {
        let bucket = self.bucket(arena[id].page);
        debug_assert!(self.find(arena, arena[id].page).is_none(), "duplicate page in index");
        self.buckets[bucket].prepend(arena, id);
        self.roster.append(arena, id);
        self.account(arena, id, true);
    }

    pub fn remove(&mut self, arena: &mut EntryArena, id: EntryId) {
        let bucket = self.bucket(arena[id].page);
        self.buckets[bucket].remove(arena, id);
        self.roster.remove(arena, id);
        self.account(arena, id, false);
    }

    /// Looks `page` up and moves a hit to the front of its chain.
    pub fn search(&mut self, arena: &mut EntryArena, page: PageId) -> Search {
        let bucket = self.bucket(page);
        let chain = &mut self.buckets[bucket];
        let mut depth = 0;
        let mut cursor = chain.head();
        while let Some(id) = cursor {
            if arena[id].page == page {
                if depth > 0 {
                    chain.remove(arena, id);
                    chain.prepend(arena, id);
                }
                return Search {
                    hit: Some(id),
                    depth,
                };
            }
            depth += 1;
            cursor = chain.next(arena, id);
        }
        Search { hit: None, depth }
    }

    /// Lookup without reordering the chain.
    pub fn find(&self, arena: &EntryArena, page: PageId) -> Option<EntryId> {
        let chain = &self.buckets[self.bucket(page)];
        let mut cursor = chain.head();
        while let Some(id) = cursor {
            if arena[id].page == page {
                return Some(id);
            }
            cursor = chain.next(arena, id);
        }
        None
    }

    pub fn mark_dirty(&mut self, arena: &mut EntryArena, id: EntryId) {
        let entry = &mut arena[id];
        debug_assert!(!entry.is_dirty);
        entry.is_dirty = true;
        self.counters.clean_index_len -= 1;
        self.counters.clean_index_size -= entry.size;
        self.counters.dirty_index_len += 1;
        self.counters.dirty_index_size += entry.size;
    }

    pub fn mark_clean(&mut self, arena: &mut EntryArena, id: EntryId) {
        let entry = &mut arena[id];
        debug_assert!(entry.is_dirty);
        entry.is_dirty = false;
        self.counters.dirty_index_len -= 1;
        self.counters.dirty_index_size -= entry.size;
        self.counters.clean_index_len += 1;
        self.counters.clean_index_size += entry.size;
    }

    fn account(&mut self, arena: &EntryArena, id: EntryId, add: bool) {
        let entry = &arena[id];
        let c = &mut self.counters;
        let class_count = match (entry.class, entry.is_mpmde) {
            (MemClass::Metadata, true) => &mut c.mpmde_count,
            (MemClass::Metadata, false) => &mut c.md_pages,
            (MemClass::RawData, _) => &mut c.rd_pages,
        };
        if add {
            *class_count += 1;
            c.index_len += 1;
            c.index_size += entry.size;
            if entry.is_dirty {
                c.dirty_index_len += 1;
                c.dirty_index_size += entry.size;
            } else {
                c.clean_index_len += 1;
                c.clean_index_size += entry.size;
            }
        } else {
            *class_count -= 1;
            c.index_len -= 1;
            c.index_size -= entry.size;
            if entry.is_dirty {
                c.dirty_index_len -= 1;
                c.dirty_index_size -= entry.size;
            } else {
                c.clean_index_len -= 1;
                c.clean_index_size -= entry.size;
            }
        }
    }

    /// Recomputes every counter from the roster and checks every chain.
    pub fn check(&self, arena: &EntryArena, page_size: usize) -> Result<()> {
        let c = &self.counters;
        if c.index_size != c.clean_index_size + c.dirty_index_size
            || c.index_len != c.clean_index_len + c.dirty_index_len
        {
            return Err(PageBufError::Invariant("clean/dirty split does not sum"));
        }
        if c.index_len != c.md_pages + c.rd_pages + c.mpmde_count {
            return Err(PageBufError::Invariant("class counts do not sum"));
        }
        self.roster.check(arena)?;
        if self.roster.len() != c.index_len || self.roster.size() != c.index_size {
            return Err(PageBufError::Invariant("roster disagrees with index counters"));
        }
        if arena.len() != c.index_len {
            return Err(PageBufError::Invariant("arena holds unindexed entries"));
        }
        let mut recount = IndexCounters::default();
        for id in self.roster.ids(arena) {
            let entry = &arena[id];
            if entry.size < page_size
                || (entry.size > page_size) != entry.is_mpmde
                || (entry.is_mpmde && !entry.is_metadata())
                || entry.image.len() != entry.size
            {
                return Err(PageBufError::Invariant("malformed entry size"));
            }
            if self.find(arena, entry.page) != Some(id) {
                return Err(PageBufError::Invariant("roster entry missing from its chain"));
            }
            recount.index_len += 1;
            recount.index_size += entry.size;
            if entry.is_dirty {
                recount.dirty_index_len += 1;
                recount.dirty_index_size += entry.size;
            } else {
                recount.clean_index_len += 1;
                recount.clean_index_size += entry.size;
            }
            match (entry.class, entry.is_mpmde) {
                (MemClass::Metadata, true) => recount.mpmde_count += 1,
                (MemClass::Metadata, false) => recount.md_pages += 1,
                (MemClass::RawData, _) => recount.rd_pages += 1,
            }
        }
        if recount != *c {
            return Err(PageBufError::Invariant("index counters drifted from contents"));
        }
        let mut chained = 0;
        for (bucket, chain) in self.buckets.iter().enumerate() {
            chain.check(arena)?;
            for id in chain.ids(arena) {
                if self.bucket(arena[id].page) != bucket {
                    return Err(PageBufError::Invariant("entry hashed to wrong bucket"));
                }
            }
            chained += chain.len();
        }
        if chained != c.index_len {
            return Err(PageBufError::Invariant("bucket chains disagree with index length"));
        }
        Ok(())
    }
}
