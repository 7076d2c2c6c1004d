//! Modified LRU replacement policy.
//!
//! The head is the most recently used end; eviction always starts from the
//! tail. Entries waiting on a delayed write and multi-page metadata entries
//! never appear here.

use super::frame::{EntryArena, EntryId, LinkKind};
use super::list::EntryList;

pub(crate) struct ReplacementPolicy {
    list: EntryList,
}

impl ReplacementPolicy {
    pub fn new() -> Self {
        Self {
            list: EntryList::new(LinkKind::Policy),
        }
    }

    pub fn list(&self) -> &EntryList {
        &self.list
    }

    pub fn contains(&self, arena: &EntryArena, id: EntryId) -> bool {
        self.list.contains(arena, id)
    }

    /// Marks `id` most recently used, inserting it if absent.
    pub fn touch(&mut self, arena: &mut EntryArena, id: EntryId) {
        debug_assert!(!arena[id].is_mpmde);
        if self.list.contains(arena, id) {
            if self.list.head() == Some(id) {
                return;
            }
            self.list.remove(arena, id);
        }
        self.list.prepend(arena, id);
    }

    /// Marks `id` least recently used, inserting it if absent.
    pub fn touch_append(&mut self, arena: &mut EntryArena, id: EntryId) {
        debug_assert!(!arena[id].is_mpmde);
        if self.list.contains(arena, id) {
            self.list.remove(arena, id);
        }
        self.list.append(arena, id);
    }

    /// Unlinks `id` ahead of its move to the delayed-write list.
    pub fn remove_for_delay(&mut self, arena: &mut EntryArena, id: EntryId) {
        self.list.remove(arena, id);
    }

    /// Unlinks `id` ahead of its eviction.
    pub fn remove(&mut self, arena: &mut EntryArena, id: EntryId) {
        self.list.remove(arena, id);
    }

    pub fn tail(&self) -> Option<EntryId> {
        self.list.tail()
    }

    pub fn prev(&self, arena: &EntryArena, id: EntryId) -> Option<EntryId> {
        self.list.prev(arena, id)
    }
}
