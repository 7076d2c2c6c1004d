use std::ops::Range;

use tracing::{debug, trace, warn};

use super::frame::{EntryArena, EntryId, PageEntry};
use super::index::{HashIndex, IndexCounters};
use super::lru::ReplacementPolicy;
use super::options::PageBufOptions;
use super::stats::{PageBufStats, StatClass};
use super::tick::{DelayedWriteList, TickList};
use crate::primitives::io::FileDriver;
use crate::types::{AccessMode, FlushScope, MemClass, PageBufError, PageId, Result};

/// One direction of a caller transfer, split into page-sized pieces as needed.
enum Transfer<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

impl Transfer<'_> {
    fn len(&self) -> usize {
        match self {
            Transfer::Read(buf) => buf.len(),
            Transfer::Write(buf) => buf.len(),
        }
    }

    fn is_write(&self) -> bool {
        matches!(self, Transfer::Write(_))
    }

    fn sub(&mut self, range: Range<usize>) -> Transfer<'_> {
        match self {
            Transfer::Read(buf) => Transfer::Read(&mut buf[range]),
            Transfer::Write(buf) => Transfer::Write(&buf[range]),
        }
    }

    fn apply(self, image: &mut [u8], offset: usize) {
        match self {
            Transfer::Read(dst) => {
                let end = offset + dst.len();
                dst.copy_from_slice(&image[offset..end]);
            }
            Transfer::Write(src) => image[offset..offset + src.len()].copy_from_slice(src),
        }
    }

    fn bypass<D: FileDriver>(self, driver: &mut D, addr: u64) -> Result<()> {
        match self {
            Transfer::Read(dst) => driver.read(addr, dst),
            Transfer::Write(src) => driver.write(addr, src),
        }
    }
}

/// Copy of an entry modified during the tick that just ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModifiedEntry {
    /// Base file address of the entry.
    pub addr: u64,
    /// Entry size in bytes.
    pub len: usize,
    /// Address class of the entry.
    pub class: MemClass,
    /// Entry contents as of the tick boundary.
    pub image: Vec<u8>,
}

/// Result of [`PageBuffer::end_tick`].
#[derive(Clone, Debug, Default)]
pub struct TickSummary {
    /// The tick that ended.
    pub tick: u64,
    /// Entries drained from the tick list, most recently modified first.
    pub modified: Vec<ModifiedEntry>,
    /// Delayed writes whose window closed at this boundary.
    pub released: usize,
    /// Multi-page metadata entries written back (if dirty) and dropped.
    pub evicted_mpmdes: usize,
}

/// Read-only view of one resident entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryInfo {
    /// Page number the entry is keyed by.
    pub page: PageId,
    /// Base file address.
    pub addr: u64,
    /// Size in bytes.
    pub size: usize,
    /// Address class.
    pub class: MemClass,
    /// Whether the image differs from the file.
    pub is_dirty: bool,
    /// Whether this is a multi-page metadata entry.
    pub is_mpmde: bool,
    /// Whether the image was read from the file rather than materialized.
    pub loaded: bool,
    /// Whether the entry is on the tick list.
    pub modified_this_tick: bool,
    /// Tick before which the entry may not be written; `0` when unconstrained.
    pub delay_write_until: u64,
    /// Whether the entry is on the replacement policy list.
    pub on_lru: bool,
    /// Whether the entry is on the delayed-write list.
    pub on_dwl: bool,
}

/// Index counters plus the length and byte size of every list.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Occupancy {
    /// Hash index totals.
    pub index: IndexCounters,
    /// Entries on the replacement policy list.
    pub lru_len: usize,
    /// Bytes on the replacement policy list.
    pub lru_size: usize,
    /// Entries on the tick list.
    pub tl_len: usize,
    /// Bytes on the tick list.
    pub tl_size: usize,
    /// Entries on the delayed-write list.
    pub dwl_len: usize,
    /// Bytes on the delayed-write list.
    pub dwl_size: usize,
    /// Highest delay tick ever placed on the delayed-write list.
    pub max_delay: u64,
}

impl Occupancy {
    /// Ordinary (single-page) entries currently resident.
    pub fn curr_pages(&self) -> usize {
        self.index.curr_pages()
    }
}

/// Page-granularity write-back cache over a [`FileDriver`].
///
/// Entries live in one arena and are threaded through a hash index, a
/// replacement policy list and, in write mode, the tick and delayed-write
/// lists. An entry is on at most one of the replacement policy and the
/// delayed-write list at any time.
///
/// The byte budget is soft: when nothing more can be evicted the buffer runs
/// over budget rather than failing.
pub struct PageBuffer<D: FileDriver> {
    driver: D,
    options: PageBufOptions,
    arena: EntryArena,
    index: HashIndex,
    lru: ReplacementPolicy,
    tick: TickList,
    dwl: DelayedWriteList,
    cur_tick: u64,
    stats: PageBufStats,
}

impl<D: FileDriver> PageBuffer<D> {
    /// Creates an empty page buffer over `driver`.
    pub fn create(driver: D, options: PageBufOptions) -> Result<Self> {
        options.validate()?;
        debug!(
            page_size = options.page_size,
            max_size = options.max_size,
            min_md_bytes = options.min_md_bytes,
            min_rd_bytes = options.min_rd_bytes,
            write_mode = options.write_mode,
            max_lag = options.max_lag,
            "pagebuf.create"
        );
        Ok(Self {
            driver,
            index: HashIndex::new(options.hash_table_len),
            options,
            arena: EntryArena::default(),
            lru: ReplacementPolicy::new(),
            tick: TickList::new(),
            dwl: DelayedWriteList::new(),
            cur_tick: 0,
            stats: PageBufStats::default(),
        })
    }

    /// Returns the options the buffer was created with.
    pub fn options(&self) -> &PageBufOptions {
        &self.options
    }

    /// Returns the current tick.
    pub fn cur_tick(&self) -> u64 {
        self.cur_tick
    }

    /// Borrows the underlying driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Mutably borrows the underlying driver.
    ///
    /// Writes issued directly against the driver are not seen by cached
    /// entries; use [`PageBuffer::update_entry`] to keep them coherent.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Returns a snapshot of the statistics.
    pub fn stats(&self) -> PageBufStats {
        self.stats.clone()
    }

    /// Clears all statistics.
    pub fn reset_stats(&mut self) {
        self.stats = PageBufStats::default();
    }

    /// Copies `buf.len()` bytes at `addr` into `buf`.
    pub fn read(&mut self, addr: u64, class: MemClass, buf: &mut [u8]) -> Result<()> {
        self.transfer(addr, class, Transfer::Read(buf))
    }

    /// Copies `buf` into the buffer at `addr`, dirtying every page it touches.
    pub fn write(&mut self, addr: u64, class: MemClass, buf: &[u8]) -> Result<()> {
        self.transfer(addr, class, Transfer::Write(buf))
    }

    /// Reads into or writes from `buf` at `addr`, depending on `mode`.
    ///
    /// A metadata access longer than one page in write mode is handled as a
    /// single multi-page metadata entry keyed by `addr`, which must then be
    /// page aligned. Every other access is split across the pages it spans;
    /// a piece that falls inside a cached multi-page entry is read from that
    /// entry, and writing such a piece is rejected.
    pub fn access(
        &mut self,
        addr: u64,
        class: MemClass,
        mode: AccessMode,
        buf: &mut [u8],
    ) -> Result<()> {
        match mode {
            AccessMode::Read => self.transfer(addr, class, Transfer::Read(buf)),
            AccessMode::Write => self.transfer(addr, class, Transfer::Write(buf)),
        }
    }

    fn transfer(&mut self, addr: u64, class: MemClass, mut xfer: Transfer<'_>) -> Result<()> {
        let len = xfer.len();
        if len == 0 {
            return Ok(());
        }
        addr.checked_add(len as u64)
            .ok_or(PageBufError::Invalid("access range overflows the address space"))?;
        let page_size = self.options.page_size;
        let multi_page = self.options.write_mode && class == MemClass::Metadata && len > page_size;
        self.stats.accesses[StatClass::of(class, multi_page)] += 1;
        if multi_page {
            self.access_mpmde(addr, xfer)?;
        } else {
            let mut done = 0;
            while done < len {
                let cursor = addr + done as u64;
                let page = PageId::containing(cursor, page_size);
                let offset = (cursor - page.addr(page_size)) as usize;
                let chunk = (page_size - offset).min(len - done);
                self.access_page(page, class, offset, xfer.sub(done..done + chunk))?;
                done += chunk;
            }
        }
        self.note_high_water();
        self.debug_validate()
    }

    fn access_page(
        &mut self,
        page: PageId,
        class: MemClass,
        offset: usize,
        xfer: Transfer<'_>,
    ) -> Result<()> {
        let page_size = self.options.page_size;
        let sc = StatClass::of(class, false);
        let search = self.index.search(&mut self.arena, page);
        self.stats.record_search(search.hit.is_some(), search.depth);
        let covering = match search.hit {
            Some(id) if self.arena[id].is_mpmde => Some(id),
            Some(_) => None,
            None => self.covering_mpmde(page),
        };
        if let Some(id) = covering {
            return self.read_within_mpmde(id, page, class, offset, xfer);
        }
        let (id, inserted) = match search.hit {
            Some(id) => {
                let entry = &self.arena[id];
                if entry.class != class {
                    return Err(PageBufError::Invalid("page cached under another memory class"));
                }
                self.stats.hits[sc] += 1;
                (id, false)
            }
            None => {
                self.stats.misses[sc] += 1;
                if self.bypasses(class) {
                    self.stats.bypasses[sc] += 1;
                    trace!(page = page.0, class = class.as_str(), "pagebuf.bypass");
                    return xfer.bypass(&mut self.driver, page.addr(page_size) + offset as u64);
                }
                let whole_page = xfer.is_write() && offset == 0 && xfer.len() == page_size;
                (self.insert_entry(page, class, page_size, !whole_page)?, true)
            }
        };
        if !self.dwl.contains(&self.arena, id) {
            self.lru.touch(&mut self.arena, id);
        }
        let is_write = xfer.is_write();
        xfer.apply(&mut self.arena[id].image, offset);
        if is_write {
            self.dirty(id);
        }
        if inserted {
            if class == MemClass::RawData && !is_write && self.options.prefetch_on_miss {
                if let Some(next) = page.0.checked_add(1) {
                    self.prefetch(PageId(next));
                }
            }
            self.make_space(Some(id))?;
        }
        Ok(())
    }

    /// Finds a cached multi-page entry keyed below `page` whose span covers it.
    fn covering_mpmde(&self, page: PageId) -> Option<EntryId> {
        if self.index.counters().mpmde_count == 0 {
            return None;
        }
        let start = page.addr(self.options.page_size);
        self.index.roster().ids(&self.arena).into_iter().find(|&id| {
            let entry = &self.arena[id];
            entry.is_mpmde
                && entry.page.0 < page.0
                && entry.addr.saturating_add(entry.size as u64) > start
        })
    }

    /// Serves a page-sized piece of a read from a cached multi-page entry.
    ///
    /// Writes must go through the entry's base address and cover it whole.
    fn read_within_mpmde(
        &mut self,
        id: EntryId,
        page: PageId,
        class: MemClass,
        offset: usize,
        xfer: Transfer<'_>,
    ) -> Result<()> {
        let entry = &self.arena[id];
        if xfer.is_write() {
            return Err(PageBufError::Invalid(
                "partial write to a multi-page metadata entry",
            ));
        }
        if entry.class != class {
            return Err(PageBufError::Invalid("page cached under another memory class"));
        }
        let start = (page.addr(self.options.page_size) - entry.addr) as usize + offset;
        if start + xfer.len() > entry.size {
            return Err(PageBufError::Invalid(
                "read runs past the end of a multi-page metadata entry",
            ));
        }
        self.stats.hits[StatClass::MultiPage] += 1;
        xfer.apply(&mut self.arena[id].image, start);
        Ok(())
    }

    fn access_mpmde(&mut self, addr: u64, xfer: Transfer<'_>) -> Result<()> {
        let page_size = self.options.page_size;
        if addr % page_size as u64 != 0 {
            return Err(PageBufError::Invalid(
                "multi-page metadata access must be page aligned",
            ));
        }
        let page = PageId::containing(addr, page_size);
        let len = xfer.len();
        let search = self.index.search(&mut self.arena, page);
        self.stats.record_search(search.hit.is_some(), search.depth);
        let id = match search.hit {
            Some(id) => {
                let entry = &self.arena[id];
                if !entry.is_mpmde {
                    return Err(PageBufError::Invalid(
                        "multi-page metadata access collides with a cached page",
                    ));
                }
                if xfer.is_write() && len != entry.size {
                    return Err(PageBufError::Invalid(
                        "multi-page metadata write must cover the whole entry",
                    ));
                }
                if len > entry.size {
                    return Err(PageBufError::Invalid(
                        "multi-page metadata read exceeds the cached entry",
                    ));
                }
                self.stats.hits[StatClass::MultiPage] += 1;
                id
            }
            None => {
                self.stats.misses[StatClass::MultiPage] += 1;
                if self.bypasses(MemClass::Metadata) {
                    self.stats.bypasses[StatClass::MultiPage] += 1;
                    trace!(page = page.0, len, class = "multi_page", "pagebuf.bypass");
                    return xfer.bypass(&mut self.driver, addr);
                }
                if self.covering_mpmde(page).is_some() {
                    return Err(PageBufError::Invalid(
                        "multi-page metadata access overlaps a cached multi-page entry",
                    ));
                }
                let span = len.div_ceil(page_size) as u64;
                for covered in 1..span {
                    if self.index.find(&self.arena, PageId(page.0 + covered)).is_some() {
                        return Err(PageBufError::Invalid(
                            "multi-page metadata access overlaps cached pages",
                        ));
                    }
                }
                self.insert_entry(page, MemClass::Metadata, len, !xfer.is_write())?
            }
        };
        let is_write = xfer.is_write();
        xfer.apply(&mut self.arena[id].image, 0);
        if is_write {
            self.dirty(id);
        }
        Ok(())
    }

    /// Whether a miss of `class` should go straight to the driver.
    fn bypasses(&self, class: MemClass) -> bool {
        let opts = &self.options;
        if opts.max_size == 0 {
            return true;
        }
        match class {
            MemClass::RawData => opts.min_md_bytes == opts.max_size,
            MemClass::Metadata => opts.min_rd_bytes == opts.max_size,
        }
    }

    /// Creates an entry, reading it from the driver when `load` is set.
    fn insert_entry(
        &mut self,
        page: PageId,
        class: MemClass,
        size: usize,
        load: bool,
    ) -> Result<EntryId> {
        let page_size = self.options.page_size;
        let addr = page.addr(page_size);
        let sc = StatClass::of(class, class == MemClass::Metadata && size > page_size);
        let eoa = self.driver.get_eoa(class);
        if addr >= eoa {
            return Err(PageBufError::Invalid("page lies beyond the end of allocation"));
        }
        let mut image = vec![0u8; size].into_boxed_slice();
        if load {
            let avail = (eoa - addr).min(size as u64) as usize;
            self.driver.read(addr, &mut image[..avail])?;
            self.stats.loads[sc] += 1;
        }
        let mut entry = PageEntry::new(page, page_size, image, class);
        entry.loaded = load;
        let id = self.arena.insert(entry);
        self.index.insert(&mut self.arena, id);
        self.stats.insertions[sc] += 1;
        self.stats.total_ht_insertions += 1;
        trace!(page = page.0, size, loaded = load, class = class.as_str(), "pagebuf.insert");
        Ok(id)
    }

    fn prefetch(&mut self, page: PageId) {
        let Some(addr) = page.0.checked_mul(self.options.page_size as u64) else {
            return;
        };
        if self.index.counters().curr_pages() >= self.options.max_pages_count()
            || addr >= self.driver.get_eoa(MemClass::RawData)
            || self.index.find(&self.arena, page).is_some()
            || self.covering_mpmde(page).is_some()
        {
            return;
        }
        match self.insert_entry(page, MemClass::RawData, self.options.page_size, true) {
            Ok(id) => self.lru.touch_append(&mut self.arena, id),
            Err(err) => debug!(page = page.0, error = %err, "pagebuf.prefetch.failed"),
        }
    }

    /// Marks `id` dirty and applies the write-mode tick and delay policy.
    fn dirty(&mut self, id: EntryId) {
        let was_clean = !self.arena[id].is_dirty;
        if was_clean {
            self.index.mark_dirty(&mut self.arena, id);
        }
        if !self.options.write_mode {
            return;
        }
        self.tick.mark_modified(&mut self.arena, id);
        let entry = &self.arena[id];
        if !(was_clean && entry.is_metadata() && entry.loaded && self.options.max_lag > 0) {
            return;
        }
        let until = self.cur_tick + self.options.max_lag;
        self.arena[id].delay_write_until = until;
        if self.lru.contains(&self.arena, id) {
            self.lru.remove_for_delay(&mut self.arena, id);
        }
        let placed = self.dwl.insert(&mut self.arena, id, self.cur_tick);
        self.stats.delayed_writes += 1;
        self.stats.total_delay += placed.delay;
        self.stats.total_dwl_ins_depth += placed.depth as u64;
        trace!(
            page = self.arena[id].page.0,
            until,
            depth = placed.depth,
            "pagebuf.delay_write"
        );
    }

    /// Evicts from the replacement policy tail until the ordinary pages fit
    /// the budget, writing each dirty victim back just before it goes. `keep`
    /// is never chosen.
    fn make_space(&mut self, keep: Option<EntryId>) -> Result<()> {
        let max_pages = self.options.max_pages_count();
        let min_md = self.options.min_md_pages();
        let min_rd = self.options.min_rd_pages();
        let mut cursor = self.lru.tail();
        while self.index.counters().curr_pages() > max_pages {
            let Some(id) = cursor else {
                break;
            };
            cursor = self.lru.prev(&self.arena, id);
            if Some(id) == keep {
                continue;
            }
            let counters = self.index.counters();
            let entry = &self.arena[id];
            if self.options.write_mode && entry.modified_this_tick {
                self.stats.lru_tl_skips += 1;
                continue;
            }
            if entry.is_metadata() && counters.md_pages <= min_md {
                self.stats.lru_md_skips += 1;
                continue;
            }
            if !entry.is_metadata() && counters.rd_pages <= min_rd {
                self.stats.lru_rd_skips += 1;
                continue;
            }
            if entry.is_dirty {
                self.flush_entry(id)?;
            }
            self.evict_entry(id);
        }
        let pages = self.index.counters().curr_pages();
        if pages > max_pages {
            warn!(pages, max_pages, "pagebuf.make_space.over_budget");
        }
        Ok(())
    }

    /// Writes a dirty entry back, clipped to the end of allocation.
    fn flush_entry(&mut self, id: EntryId) -> Result<()> {
        let entry = &self.arena[id];
        debug_assert!(entry.is_dirty && entry.delay_write_until == 0);
        let eoa = self.driver.get_eoa(entry.class);
        if entry.addr >= eoa {
            return Err(PageBufError::Invalid("dirty entry lies beyond the end of allocation"));
        }
        let len = (eoa - entry.addr).min(entry.size as u64) as usize;
        self.driver.write(entry.addr, &entry.image[..len])?;
        let sc = StatClass::of(entry.class, entry.is_mpmde);
        trace!(page = entry.page.0, addr = entry.addr, len, "pagebuf.flush.entry");
        self.index.mark_clean(&mut self.arena, id);
        self.stats.flushes[sc] += 1;
        if self.lru.contains(&self.arena, id) {
            self.lru.touch(&mut self.arena, id);
        }
        Ok(())
    }

    fn evict_entry(&mut self, id: EntryId) {
        debug_assert!(!self.arena[id].is_dirty && !self.dwl.contains(&self.arena, id));
        if self.lru.contains(&self.arena, id) {
            self.lru.remove(&mut self.arena, id);
        }
        self.tick.remove(&mut self.arena, id);
        self.index.remove(&mut self.arena, id);
        let entry = self.arena.remove(id);
        let sc = StatClass::of(entry.class, entry.is_mpmde);
        self.stats.evictions[sc] += 1;
        self.stats.total_ht_deletions += 1;
        trace!(page = entry.page.0, size = entry.size, "pagebuf.evict");
    }

    /// Drops an entry without writing it, clearing it first if dirty.
    fn discard(&mut self, id: EntryId) {
        if self.dwl.contains(&self.arena, id) {
            self.dwl.remove(&mut self.arena, id);
            self.arena[id].delay_write_until = 0;
        }
        if self.arena[id].is_dirty {
            self.index.mark_clean(&mut self.arena, id);
            let entry = &self.arena[id];
            self.stats.clears[StatClass::of(entry.class, entry.is_mpmde)] += 1;
        }
        self.evict_entry(id);
    }

    /// Writes back every dirty entry that is not inside a delay window.
    ///
    /// Entries on the delayed-write list are skipped and stay dirty. A global
    /// flush also asks the driver to sync.
    pub fn flush(&mut self, scope: FlushScope) -> Result<()> {
        let mut written = 0usize;
        let mut deferred = 0usize;
        for id in self.index.roster().ids(&self.arena) {
            if !self.arena[id].is_dirty {
                continue;
            }
            if self.dwl.contains(&self.arena, id) {
                deferred += 1;
                continue;
            }
            self.flush_entry(id)?;
            written += 1;
        }
        if scope == FlushScope::Global {
            self.driver.sync_all()?;
        }
        debug!(scope = ?scope, written, deferred, tick = self.cur_tick, "pagebuf.flush");
        self.debug_validate()
    }

    /// Evicts the clean entry holding `addr`.
    ///
    /// Fails with [`PageBufError::Invariant`] if the entry is dirty (and so
    /// also if it waits on a delayed write) or was modified this tick; the
    /// caller must flush first.
    pub fn evict(&mut self, addr: u64) -> Result<()> {
        let page = PageId::containing(addr, self.options.page_size);
        let id = self
            .index
            .find(&self.arena, page)
            .ok_or(PageBufError::NotFound)?;
        let entry = &self.arena[id];
        if entry.is_dirty {
            return Err(PageBufError::Invariant("cannot evict a dirty entry"));
        }
        if entry.modified_this_tick {
            return Err(PageBufError::Invariant(
                "cannot evict an entry modified this tick",
            ));
        }
        self.evict_entry(id);
        self.debug_validate()
    }

    /// Closes the current tick.
    ///
    /// Drains the tick list into the returned summary, advances the tick,
    /// releases delayed writes whose window has closed, and writes back and
    /// drops the multi-page metadata entries not waiting on a delay.
    pub fn end_tick(&mut self) -> Result<TickSummary> {
        if !self.options.write_mode {
            return Err(PageBufError::Invalid("end_tick requires write mode"));
        }
        let modified = self
            .tick
            .drain(&mut self.arena)
            .into_iter()
            .map(|id| {
                let entry = &self.arena[id];
                ModifiedEntry {
                    addr: entry.addr,
                    len: entry.size,
                    class: entry.class,
                    image: entry.image.to_vec(),
                }
            })
            .collect::<Vec<_>>();
        let ended = self.cur_tick;
        self.cur_tick += 1;
        let released = self.release_delayed_writes()?;
        let evicted_mpmdes = self.evict_transient_mpmdes()?;
        debug!(
            tick = ended,
            modified = modified.len(),
            released,
            evicted_mpmdes,
            "pagebuf.end_tick"
        );
        self.debug_validate()?;
        Ok(TickSummary {
            tick: ended,
            modified,
            released,
            evicted_mpmdes,
        })
    }

    fn release_delayed_writes(&mut self) -> Result<usize> {
        if self.dwl.list().is_empty() {
            return Ok(0);
        }
        let ready = self.dwl.take_ready(&mut self.arena, self.cur_tick);
        let released = ready.len();
        let mut mpmdes = Vec::new();
        for id in ready {
            if self.arena[id].is_mpmde {
                mpmdes.push(id);
            } else {
                self.lru.touch_append(&mut self.arena, id);
            }
        }
        for id in mpmdes {
            self.flush_entry(id)?;
            self.evict_entry(id);
        }
        Ok(released)
    }

    fn evict_transient_mpmdes(&mut self) -> Result<usize> {
        if self.index.counters().mpmde_count == 0 {
            return Ok(0);
        }
        let transient: Vec<EntryId> = self
            .index
            .roster()
            .ids(&self.arena)
            .into_iter()
            .filter(|&id| self.arena[id].is_mpmde && !self.dwl.contains(&self.arena, id))
            .collect();
        for &id in &transient {
            if self.arena[id].is_dirty {
                self.flush_entry(id)?;
            }
            self.evict_entry(id);
        }
        Ok(transient.len())
    }

    /// Caches a freshly allocated page as a clean zero image, without a read.
    ///
    /// Does nothing when misses of `class` bypass the buffer.
    pub fn add_new_page(&mut self, addr: u64, class: MemClass) -> Result<()> {
        let page_size = self.options.page_size;
        if addr % page_size as u64 != 0 {
            return Err(PageBufError::Invalid("new page address must be page aligned"));
        }
        if self.bypasses(class) {
            return Ok(());
        }
        let page = PageId::containing(addr, page_size);
        if self.index.find(&self.arena, page).is_some() {
            return Err(PageBufError::Invalid("page already cached"));
        }
        let id = self.insert_entry(page, class, page_size, false)?;
        self.lru.touch(&mut self.arena, id);
        self.make_space(Some(id))?;
        self.note_high_water();
        self.debug_validate()
    }

    /// Patches resident entries overlapping `addr..addr + bytes.len()` with
    /// data written to the file around the buffer. Never dirties an entry.
    ///
    /// A multi-page entry is patched even when the range starts past its
    /// base page.
    pub fn update_entry(&mut self, addr: u64, class: MemClass, bytes: &[u8]) -> Result<()> {
        let page_size = self.options.page_size;
        let end = addr
            .checked_add(bytes.len() as u64)
            .ok_or(PageBufError::Invalid("update range overflows the address space"))?;
        if bytes.is_empty() {
            return Ok(());
        }
        let first = PageId::containing(addr, page_size);
        let last = PageId::containing(end - 1, page_size).0;
        let mut overlapping: Vec<EntryId> = self.covering_mpmde(first).into_iter().collect();
        overlapping.extend(
            (first.0..=last).filter_map(|page| self.index.find(&self.arena, PageId(page))),
        );
        for id in overlapping {
            let entry = &mut self.arena[id];
            if entry.class != class {
                return Err(PageBufError::Invalid("page cached under another memory class"));
            }
            let lo = addr.max(entry.addr);
            let hi = end.min(entry.addr.saturating_add(entry.size as u64));
            if lo >= hi {
                continue;
            }
            let src = &bytes[(lo - addr) as usize..(hi - addr) as usize];
            let dst = (lo - entry.addr) as usize;
            entry.image[dst..dst + src.len()].copy_from_slice(src);
            trace!(page = entry.page.0, len = src.len(), "pagebuf.update_entry");
        }
        Ok(())
    }

    /// Drops the entry holding `addr` without writing it.
    ///
    /// Used when the file space under the entry has been freed; a dirty
    /// entry is counted as cleared.
    pub fn remove_entry(&mut self, addr: u64) -> Result<()> {
        let page = PageId::containing(addr, self.options.page_size);
        let id = self
            .index
            .find(&self.arena, page)
            .ok_or(PageBufError::NotFound)?;
        self.discard(id);
        self.debug_validate()
    }

    /// Moves the end of allocation for `class` and drops, without writing,
    /// every cached entry of that class at or beyond it.
    pub fn set_eoa(&mut self, class: MemClass, addr: u64) -> Result<()> {
        self.driver.set_eoa(class, addr)?;
        let doomed: Vec<EntryId> = self
            .index
            .roster()
            .ids(&self.arena)
            .into_iter()
            .filter(|&id| {
                let entry = &self.arena[id];
                entry.class == class && entry.addr >= addr
            })
            .collect();
        for &id in &doomed {
            self.discard(id);
        }
        debug!(class = class.as_str(), eoa = addr, dropped = doomed.len(), "pagebuf.set_eoa");
        self.debug_validate()
    }

    /// Lifts outstanding write delays, writes everything back, syncs, and
    /// returns the driver.
    ///
    /// On failure the buffer is dropped with the driver; use
    /// [`PageBuffer::try_close`] to keep both.
    pub fn close(self) -> Result<D> {
        self.try_close().map_err(|(_, err)| err)
    }

    /// Like [`PageBuffer::close`], but hands the buffer back when the final
    /// write-back fails so the caller can retry or recover the driver.
    ///
    /// Write delays stay lifted after a failed attempt.
    pub fn try_close(mut self) -> std::result::Result<D, (Self, PageBufError)> {
        for id in self.dwl.list().ids(&self.arena) {
            self.dwl.remove(&mut self.arena, id);
            self.arena[id].delay_write_until = 0;
            if !self.arena[id].is_mpmde {
                self.lru.touch_append(&mut self.arena, id);
            }
        }
        self.tick.drain(&mut self.arena);
        if let Err(err) = self.flush(FlushScope::Global) {
            warn!(error = %err, "pagebuf.close.failed");
            return Err((self, err));
        }
        let resident = self.index.roster().ids(&self.arena);
        for &id in &resident {
            self.evict_entry(id);
        }
        debug!(evicted = resident.len(), stats = %self.stats, "pagebuf.close");
        Ok(self.driver)
    }

    /// Returns the driver without writing anything back.
    ///
    /// Dirty entries are lost.
    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Describes the entry holding `addr` without touching recency or stats.
    pub fn entry_info(&self, addr: u64) -> Option<EntryInfo> {
        let page = PageId::containing(addr, self.options.page_size);
        let id = self.index.find(&self.arena, page)?;
        let entry = &self.arena[id];
        Some(EntryInfo {
            page: entry.page,
            addr: entry.addr,
            size: entry.size,
            class: entry.class,
            is_dirty: entry.is_dirty,
            is_mpmde: entry.is_mpmde,
            loaded: entry.loaded,
            modified_this_tick: entry.modified_this_tick,
            delay_write_until: entry.delay_write_until,
            on_lru: self.lru.contains(&self.arena, id),
            on_dwl: self.dwl.contains(&self.arena, id),
        })
    }

    /// Returns index counters and list sizes.
    pub fn occupancy(&self) -> Occupancy {
        Occupancy {
            index: self.index.counters(),
            lru_len: self.lru.list().len(),
            lru_size: self.lru.list().size(),
            tl_len: self.tick.list().len(),
            tl_size: self.tick.list().size(),
            dwl_len: self.dwl.list().len(),
            dwl_size: self.dwl.list().size(),
            max_delay: self.dwl.max_delay(),
        }
    }

    fn note_high_water(&mut self) {
        let c = self.index.counters();
        let s = &mut self.stats;
        s.max_index_len = s.max_index_len.max(c.index_len);
        s.max_index_size = s.max_index_size.max(c.index_size);
        s.max_dirty_index_size = s.max_dirty_index_size.max(c.dirty_index_size);
        s.max_lru_len = s.max_lru_len.max(self.lru.list().len());
        s.max_lru_size = s.max_lru_size.max(self.lru.list().size());
        s.max_tl_len = s.max_tl_len.max(self.tick.list().len());
        s.max_tl_size = s.max_tl_size.max(self.tick.list().size());
        s.max_dwl_len = s.max_dwl_len.max(self.dwl.list().len());
        s.max_dwl_size = s.max_dwl_size.max(self.dwl.list().size());
    }

    /// Checks every structural and accounting invariant.
    pub fn validate(&self) -> Result<()> {
        self.index.check(&self.arena, self.options.page_size)?;
        self.lru.list().check(&self.arena)?;
        self.tick.check(&self.arena)?;
        self.dwl.check(&self.arena)?;
        for id in self.index.roster().ids(&self.arena) {
            let entry = &self.arena[id];
            let on_lru = self.lru.contains(&self.arena, id);
            let on_dwl = self.dwl.contains(&self.arena, id);
            if on_lru && on_dwl {
                return Err(PageBufError::Invariant(
                    "entry on both replacement and delayed-write lists",
                ));
            }
            if entry.is_mpmde && on_lru {
                return Err(PageBufError::Invariant(
                    "multi-page entry on the replacement policy",
                ));
            }
            if !entry.is_mpmde && !on_lru && !on_dwl {
                return Err(PageBufError::Invariant("page entry on no eviction list"));
            }
            if on_dwl != (entry.delay_write_until != 0) {
                return Err(PageBufError::Invariant(
                    "delay mark disagrees with delayed-write membership",
                ));
            }
            if on_dwl && entry.delay_write_until <= self.cur_tick {
                return Err(PageBufError::Invariant("expired delay still pending"));
            }
            if !self.options.write_mode && (entry.modified_this_tick || on_dwl) {
                return Err(PageBufError::Invariant("tick state outside write mode"));
            }
            if entry.is_mpmde && !self.options.write_mode {
                return Err(PageBufError::Invariant("multi-page entry outside write mode"));
            }
        }
        Ok(())
    }

    #[cfg(debug_assertions)]
    fn debug_validate(&self) -> Result<()> {
        if let Err(err) = self.validate() {
            warn!(error = %err, tick = self.cur_tick, "pagebuf.validate.failed");
            return Err(err);
        }
        Ok(())
    }

    #[cfg(not(debug_assertions))]
    fn debug_validate(&self) -> Result<()> {
        Ok(())
    }
}
