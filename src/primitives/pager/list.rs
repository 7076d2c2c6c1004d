//! Doubly linked list threaded through one link slot of each [`PageEntry`].
//!
//! Every list in the page buffer (hash chains, the roster, the replacement
//! policy, the tick list and the delayed-write list) is an [`EntryList`]
//! over a different [`LinkKind`]. Each list keeps its own length and the sum
//! of its members' sizes.

use super::frame::{EntryArena, EntryId, LinkKind};
use crate::types::{PageBufError, Result};

pub(crate) struct EntryList {
    kind: LinkKind,
    head: Option<EntryId>,
    tail: Option<EntryId>,
    len: usize,
    size: usize,
}

impl EntryList {
    pub fn new(kind: LinkKind) -> Self {
        Self {
            kind,
            head: None,
            tail: None,
            len: 0,
            size: 0,
        }
    }

    pub fn head(&self) -> Option<EntryId> {
        self.head
    }

    pub fn tail(&self) -> Option<EntryId> {
        self.tail
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn next(&self, arena: &EntryArena, id: EntryId) -> Option<EntryId> {
        arena[id].link(self.kind).next
    }

    pub fn prev(&self, arena: &EntryArena, id: EntryId) -> Option<EntryId> {
        arena[id].link(self.kind).prev
    }

    /// Membership test in O(1): only the head of a list has no predecessor.
    /// Exact only when this list is the sole user of its link slot, which
    /// holds for every role except hash buckets.
    pub fn contains(&self, arena: &EntryArena, id: EntryId) -> bool {
        self.head == Some(id) || arena[id].link(self.kind).prev.is_some()
    }

    pub fn append(&mut self, arena: &mut EntryArena, id: EntryId) {
        self.debug_pre_insert(arena, id);
        match self.tail {
            None => self.head = Some(id),
            Some(tail) => {
                arena[tail].link_mut(self.kind).next = Some(id);
                arena[id].link_mut(self.kind).prev = Some(tail);
            }
        }
        self.tail = Some(id);
        self.len += 1;
        self.size += arena[id].size;
    }

    pub fn prepend(&mut self, arena: &mut EntryArena, id: EntryId) {
        self.debug_pre_insert(arena, id);
        match self.head {
            None => self.tail = Some(id),
            Some(head) => {
                arena[head].link_mut(self.kind).prev = Some(id);
                arena[id].link_mut(self.kind).next = Some(head);
            }
        }
        self.head = Some(id);
        self.len += 1;
        self.size += arena[id].size;
    }

    /// Links `id` directly in front of `succ`; `None` appends.
    pub fn insert_before(&mut self, arena: &mut EntryArena, id: EntryId, succ: Option<EntryId>) {
        let Some(succ) = succ else {
            self.append(arena, id);
            return;
        };
        let Some(pred) = arena[succ].link(self.kind).prev else {
            self.prepend(arena, id);
            return;
        };
        self.debug_pre_insert(arena, id);
        debug_assert_eq!(arena[pred].link(self.kind).next, Some(succ));
        {
            let link = arena[id].link_mut(self.kind);
            link.prev = Some(pred);
            link.next = Some(succ);
        }
        arena[pred].link_mut(self.kind).next = Some(id);
        arena[succ].link_mut(self.kind).prev = Some(id);
        self.len += 1;
        self.size += arena[id].size;
    }

    pub fn remove(&mut self, arena: &mut EntryArena, id: EntryId) {
        debug_assert!(self.contains(arena, id), "{:?} list remove of non-member", self.kind);
        debug_assert!(self.len > 0 && self.size >= arena[id].size);
        let link = arena[id].link(self.kind);
        match link.prev {
            Some(prev) => arena[prev].link_mut(self.kind).next = link.next,
            None => self.head = link.next,
        }
        match link.next {
            Some(next) => arena[next].link_mut(self.kind).prev = link.prev,
            None => self.tail = link.prev,
        }
        *arena[id].link_mut(self.kind) = Default::default();
        self.len -= 1;
        self.size -= arena[id].size;
    }

    /// Collects member handles head to tail.
    pub fn ids(&self, arena: &EntryArena) -> Vec<EntryId> {
        let mut out = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(id) = cursor {
            out.push(id);
            cursor = arena[id].link(self.kind).next;
        }
        out
    }

    fn debug_pre_insert(&self, arena: &EntryArena, id: EntryId) {
        debug_assert!(
            !self.contains(arena, id) && arena[id].link(self.kind).next.is_none(),
            "{:?} list insert of linked entry",
            self.kind
        );
    }

    /// Walks the list and cross-checks links, length and aggregate size.
    pub fn check(&self, arena: &EntryArena) -> Result<()> {
        if self.head.is_none() != self.tail.is_none() || self.head.is_none() != (self.len == 0) {
            return Err(PageBufError::Invariant("list head/tail/len disagree"));
        }
        let mut count = 0usize;
        let mut size = 0usize;
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let Some(entry) = arena.get(id) else {
                return Err(PageBufError::Invariant("list links a vacant entry"));
            };
            let link = entry.link(self.kind);
            if link.prev != prev {
                return Err(PageBufError::Invariant("list back link mismatch"));
            }
            count += 1;
            if count > self.len {
                return Err(PageBufError::Invariant("list longer than its length"));
            }
            size += entry.size;
            prev = Some(id);
            cursor = link.next;
        }
        if prev != self.tail {
            return Err(PageBufError::Invariant("list tail mismatch"));
        }
        if count != self.len || size != self.size {
            return Err(PageBufError::Invariant("list length or size mismatch"));
        }
        Ok(())
    }
}
