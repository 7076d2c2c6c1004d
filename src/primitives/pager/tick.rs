//! Tick-synchronized lists used in write mode.
//!
//! The tick list records what changed during the current tick so the writer
//! can publish it at the tick boundary. The delayed-write list holds dirty
//! entries whose on-disk write must wait until `cur_tick >= delay_write_until`;
//! writing earlier could hand a reader that still navigates by the previous
//! published index a page that is newer than that index.

use super::frame::{EntryArena, EntryId, LinkKind};
use super::list::EntryList;
use crate::types::{PageBufError, Result};

pub(crate) struct TickList {
    list: EntryList,
}

impl TickList {
    pub fn new() -> Self {
        Self {
            list: EntryList::new(LinkKind::Tick),
        }
    }

    pub fn list(&self) -> &EntryList {
        &self.list
    }

    /// Records `id` as modified this tick; returns false if it already was.
    pub fn mark_modified(&mut self, arena: &mut EntryArena, id: EntryId) -> bool {
        if arena[id].modified_this_tick {
            debug_assert!(self.list.contains(arena, id));
            return false;
        }
        self.list.prepend(arena, id);
        arena[id].modified_this_tick = true;
        true
    }

    pub fn remove(&mut self, arena: &mut EntryArena, id: EntryId) {
        if arena[id].modified_this_tick {
            self.list.remove(arena, id);
            arena[id].modified_this_tick = false;
        }
    }

    /// Empties the list, clearing every member's flag. Membership in the
    /// index and the other lists is untouched.
    pub fn drain(&mut self, arena: &mut EntryArena) -> Vec<EntryId> {
        let mut drained = Vec::with_capacity(self.list.len());
        while let Some(id) = self.list.head() {
            self.list.remove(arena, id);
            arena[id].modified_this_tick = false;
            drained.push(id);
        }
        drained
    }

    pub fn check(&self, arena: &EntryArena) -> Result<()> {
        self.list.check(arena)?;
        for id in self.list.ids(arena) {
            if !arena[id].modified_this_tick {
                return Err(PageBufError::Invariant("tick list member not flagged"));
            }
        }
        Ok(())
    }
}

/// Telemetry produced by a delayed-write insertion.
#[derive(Copy, Clone, Debug)]
pub(crate) struct DelayedInsert {
    pub depth: usize,
    pub delay: u64,
}

pub(crate) struct DelayedWriteList {
    list: EntryList,
    max_delay: u64,
}

impl DelayedWriteList {
    pub fn new() -> Self {
        Self {
            list: EntryList::new(LinkKind::Delayed),
            max_delay: 0,
        }
    }

    pub fn list(&self) -> &EntryList {
        &self.list
    }

    /// Highest `delay_write_until` ever inserted.
    pub fn max_delay(&self) -> u64 {
        self.max_delay
    }

    pub fn contains(&self, arena: &EntryArena, id: EntryId) -> bool {
        self.list.contains(arena, id)
    }

    /// Inserts keeping `delay_write_until` non-increasing from head to tail.
    pub fn insert(&mut self, arena: &mut EntryArena, id: EntryId, cur_tick: u64) -> DelayedInsert {
        let until = arena[id].delay_write_until;
        debug_assert!(until > cur_tick);
        let mut depth = 0;
        let mut succ = self.list.head();
        while let Some(s) = succ {
            if arena[s].delay_write_until <= until {
                break;
            }
            depth += 1;
            succ = self.list.next(arena, s);
        }
        self.list.insert_before(arena, id, succ);
        self.max_delay = self.max_delay.max(until);
        DelayedInsert {
            depth,
            delay: until - cur_tick,
        }
    }

    pub fn remove(&mut self, arena: &mut EntryArena, id: EntryId) {
        self.list.remove(arena, id);
    }

    /// Unlinks, from the tail, every entry whose delay has expired by
    /// `cur_tick` and clears its `delay_write_until`.
    pub fn take_ready(&mut self, arena: &mut EntryArena, cur_tick: u64) -> Vec<EntryId> {
        let mut ready = Vec::new();
        while let Some(tail) = self.list.tail() {
            if arena[tail].delay_write_until > cur_tick {
                break;
            }
            self.list.remove(arena, tail);
            arena[tail].delay_write_until = 0;
            ready.push(tail);
        }
        ready
    }

    pub fn check(&self, arena: &EntryArena) -> Result<()> {
        self.list.check(arena)?;
        let mut last = u64::MAX;
        for id in self.list.ids(arena) {
            let entry = &arena[id];
            if entry.delay_write_until > last {
                return Err(PageBufError::Invariant("delayed-write list out of order"));
            }
            if !entry.is_dirty || entry.delay_write_until == 0 {
                return Err(PageBufError::Invariant("delayed-write member not pending"));
            }
            last = entry.delay_write_until;
        }
        Ok(())
    }
}
