use std::ops::{Index, IndexMut};

use crate::types::{MemClass, PageId};

/// List roles an entry can be linked into; each role owns one link slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum LinkKind {
    Bucket = 0,
    Roster = 1,
    Policy = 2,
    Tick = 3,
    Delayed = 4,
}

const LINK_KINDS: usize = 5;

/// Generational handle into the [`EntryArena`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct EntryId {
    idx: u32,
    gen: u32,
}

#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct Link {
    pub prev: Option<EntryId>,
    pub next: Option<EntryId>,
}

pub(crate) struct PageEntry {
    pub page: PageId,
    pub addr: u64,
    pub size: usize,
    pub image: Box<[u8]>,
    pub class: MemClass,
    pub is_dirty: bool,
    pub is_mpmde: bool,
    pub loaded: bool,
    pub modified_this_tick: bool,
    pub delay_write_until: u64,
    links: [Link; LINK_KINDS],
}

impl PageEntry {
    pub fn new(page: PageId, page_size: usize, image: Box<[u8]>, class: MemClass) -> Self {
        let size = image.len();
        Self {
            page,
            addr: page.addr(page_size),
            size,
            image,
            class,
            is_dirty: false,
            is_mpmde: class == MemClass::Metadata && size > page_size,
            loaded: false,
            modified_this_tick: false,
            delay_write_until: 0,
            links: [Link::default(); LINK_KINDS],
        }
    }

    pub fn is_metadata(&self) -> bool {
        self.class == MemClass::Metadata
    }

    pub fn link(&self, kind: LinkKind) -> Link {
        self.links[kind as usize]
    }

    pub fn link_mut(&mut self, kind: LinkKind) -> &mut Link {
        &mut self.links[kind as usize]
    }
}

struct Slot {
    gen: u32,
    entry: Option<PageEntry>,
}

/// Slab of page entries addressed by generational handles.
///
/// Lists store [`EntryId`]s rather than references, so a removed entry can
/// never be reached through a stale link: its slot generation moves on.
#[derive(Default)]
pub(crate) struct EntryArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl EntryArena {
    pub fn insert(&mut self, entry: PageEntry) -> EntryId {
        self.live += 1;
        if let Some(idx) = self.free.pop() {
            let slot = &mut self.slots[idx as usize];
            slot.entry = Some(entry);
            return EntryId { idx, gen: slot.gen };
        }
        let idx = self.slots.len() as u32;
        self.slots.push(Slot {
            gen: 0,
            entry: Some(entry),
        });
        EntryId { idx, gen: 0 }
    }

    pub fn remove(&mut self, id: EntryId) -> PageEntry {
        let slot = &mut self.slots[id.idx as usize];
        assert_eq!(slot.gen, id.gen, "stale page entry handle");
        let entry = match slot.entry.take() {
            Some(entry) => entry,
            None => panic!("page entry slot already vacant"),
        };
        slot.gen = slot.gen.wrapping_add(1);
        self.free.push(id.idx);
        self.live -= 1;
        entry
    }

    pub fn get(&self, id: EntryId) -> Option<&PageEntry> {
        self.slots
            .get(id.idx as usize)
            .filter(|slot| slot.gen == id.gen)
            .and_then(|slot| slot.entry.as_ref())
    }

    pub fn len(&self) -> usize {
        self.live
    }
}

impl Index<EntryId> for EntryArena {
    type Output = PageEntry;

    fn index(&self, id: EntryId) -> &PageEntry {
        match self.get(id) {
            Some(entry) => entry,
            None => panic!("stale page entry handle {id:?}"),
        }
    }
}

impl IndexMut<EntryId> for EntryArena {
    fn index_mut(&mut self, id: EntryId) -> &mut PageEntry {
        match self
            .slots
            .get_mut(id.idx as usize)
            .filter(|slot| slot.gen == id.gen)
            .and_then(|slot| slot.entry.as_mut())
        {
            Some(entry) => entry,
            None => panic!("stale page entry handle {id:?}"),
        }
    }
}
