//! Relocation map for Ligature.
//!
//! A document stores pointers as the addresses its writer happened to use.
//! While reading, every block's address is registered here with the live
//! value that replaces it (an arena handle for objects, a data-block index
//! for plain data), and pointer fields are rewritten by looking their stale
//! address up.
//!
//! # Key Types
//!
//! - [`RelocMap`] -- Insertion-ordered open-addressing map keyed by stale address
//! - [`Entry`] -- One registered address
//! - [`Tag`] -- Use count (data) or type code (objects)

use lig_types::TypeCode;
use tracing::trace;

const EMPTY: u32 = u32::MAX;
const MIN_SLOTS: usize = 16;

/// Extra information carried by an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Number of successful lookups; unused data blocks are dropped.
    Uses(u32),
    /// Type of the registered object; typed lookups must match it.
    Type(TypeCode),
}

/// One registered stale address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry<V> {
    pub stale: u64,
    pub live: V,
    pub tag: Tag,
}

/// Map from as-written addresses to live values.
///
/// Entries live in a vector in insertion order; the slot table holds entry
/// indices and is probed linearly. The table is a power of two in size and
/// doubles once three quarters full.
#[derive(Clone, Debug)]
pub struct RelocMap<V> {
    entries: Vec<Entry<V>>,
    slots: Vec<u32>,
}

impl<V: Clone> Default for RelocMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

fn hash(stale: u64, mask: usize) -> usize {
    // Fibonacci hashing; block addresses are usually aligned so the low bits
    // carry little information on their own.
    (stale.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32) as usize & mask
}

impl<V: Clone> RelocMap<V> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let wanted = (capacity * 4 / 3 + 1).max(MIN_SLOTS).next_power_of_two();
        Self {
            entries: Vec::with_capacity(capacity),
            slots: vec![EMPTY; wanted],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register `stale → live`. An existing entry for `stale` is
    /// overwritten (its use count restarts).
    pub fn insert(&mut self, stale: u64, live: V, tag: Tag) {
        match self.find(stale) {
            Ok(slot) => {
                let entry = &mut self.entries[self.slots[slot] as usize];
                entry.live = live;
                entry.tag = tag;
            }
            Err(slot) => {
                self.slots[slot] = self.entries.len() as u32;
                self.entries.push(Entry { stale, live, tag });
                if self.entries.len() * 4 >= self.slots.len() * 3 {
                    self.grow();
                }
            }
        }
    }

    /// Resolve a stale address, counting the use.
    pub fn lookup(&mut self, stale: u64) -> Option<V> {
        let slot = self.find(stale).ok()?;
        let entry = &mut self.entries[self.slots[slot] as usize];
        if let Tag::Uses(n) = &mut entry.tag {
            *n = n.saturating_add(1);
        }
        Some(entry.live.clone())
    }

    /// Resolve a stale address that must refer to an object of type `want`.
    ///
    /// Returns `None` when the entry is typed and the type differs. Untyped
    /// entries and `want == None` match anything.
    pub fn lookup_typed(&mut self, stale: u64, want: Option<TypeCode>) -> Option<V> {
        let slot = self.find(stale).ok()?;
        let entry = &mut self.entries[self.slots[slot] as usize];
        match (&mut entry.tag, want) {
            (Tag::Type(have), Some(want)) if *have != want => None,
            (Tag::Uses(n), _) => {
                *n = n.saturating_add(1);
                Some(entry.live.clone())
            }
            _ => Some(entry.live.clone()),
        }
    }

    /// Entry for a stale address, without counting a use.
    pub fn get(&self, stale: u64) -> Option<&Entry<V>> {
        let slot = self.find(stale).ok()?;
        Some(&self.entries[self.slots[slot] as usize])
    }

    /// Whether `stale` is registered.
    pub fn contains(&self, stale: u64) -> bool {
        self.find(stale).is_ok()
    }

    /// Drop every entry with a zero use count, returning their live values
    /// in insertion order. Typed entries are kept.
    pub fn remove_unused(&mut self) -> Vec<V> {
        let (kept, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.tag != Tag::Uses(0));
        self.entries = kept;
        self.rebuild(self.slots.len());
        dropped.into_iter().map(|e| e.live).collect()
    }

    /// Remove every entry, keeping the allocation.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.slots.fill(EMPTY);
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry<V>> {
        self.entries.iter()
    }

    /// Point every entry whose live value is `old` at `new` instead.
    pub fn retarget(&mut self, old: &V, new: V) -> usize
    where
        V: PartialEq,
    {
        let mut count = 0;
        for entry in self.entries.iter_mut().filter(|e| e.live == *old) {
            entry.live = new.clone();
            count += 1;
        }
        count
    }

    /// `Ok(slot)` holding `stale`, or `Err(slot)` where it would go.
    fn find(&self, stale: u64) -> Result<usize, usize> {
        let mask = self.slots.len() - 1;
        let mut slot = hash(stale, mask);
        loop {
            match self.slots[slot] {
                EMPTY => return Err(slot),
                i if self.entries[i as usize].stale == stale => return Ok(slot),
                _ => slot = (slot + 1) & mask,
            }
        }
    }

    fn grow(&mut self) {
        let size = self.slots.len() * 2;
        trace!(entries = self.entries.len(), slots = size, "growing relocation table");
        self.rebuild(size);
    }

    fn rebuild(&mut self, size: usize) {
        self.slots = vec![EMPTY; size];
        for i in 0..self.entries.len() {
            if let Err(slot) = self.find(self.entries[i].stale) {
                self.slots[slot] = i as u32;
            }
        }
    }
}
