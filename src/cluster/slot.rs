//! Cluster slot calculation and the slot ownership table.
//!
//! Keys map to one of 16384 slots through CRC16 (XMODEM) modulo 16384.
//! The [`SlotTable`] maps each slot to the connection that owns it.

use std::fmt;

use crc::{Crc, CRC_16_XMODEM};
use tracing::warn;

/// Number of hash slots in the cluster.
pub const SLOT_COUNT: u16 = 16384;

/// CRC-16/XMODEM, the checksum cluster nodes use for slot assignment.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Calculates the slot for a key, hashing the whole key.
///
/// # Examples
///
/// ```
/// use shardmux::key_slot;
///
/// assert_eq!(key_slot("foo"), 12182);
/// assert_eq!(key_slot(b"somekey"), 11058);
/// ```
pub fn key_slot(key: impl AsRef<[u8]>) -> u16 {
    CRC16.checksum(key.as_ref()) % SLOT_COUNT
}

/// Calculates the slot for a key, honouring `{...}` hash tags when
/// `hash_tags` is set.
///
/// With hash tags, `{user1000}.following` and `{user1000}.followers` share a
/// slot because only `user1000` is hashed.
pub fn hash_slot(key: &[u8], hash_tags: bool) -> u16 {
    if hash_tags {
        key_slot(extract_hash_tag(key))
    } else {
        key_slot(key)
    }
}

/// Extracts the hash tag from a key.
///
/// - `{user1000}.following` → `user1000`
/// - `foo{bar}baz` → `bar`
/// - `foo{}{bar}` → whole key (first tag is empty)
/// - `foo` → whole key
fn extract_hash_tag(key: &[u8]) -> &[u8] {
    if let Some(start) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[start + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[start + 1..start + 1 + len];
            }
        }
    }
    key
}

/// An inclusive range of slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    /// Start of the range (inclusive).
    pub start: u16,
    /// End of the range (inclusive).
    pub end: u16,
}

impl SlotRange {
    /// Creates a range covering `start..=end`.
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Returns true if the given slot is within this range.
    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }

    /// Returns the number of slots in this range.
    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            usize::from(self.end - self.start) + 1
        }
    }

    /// Returns true if the range holds no slot (`start > end`).
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Maps each of the 16384 slots to its owner.
///
/// `C` is usually a cheap-to-clone connection handle.
#[derive(Debug, Clone)]
pub struct SlotTable<C> {
    slots: Vec<Option<C>>,
}

impl<C: Clone> SlotTable<C> {
    /// Creates a table with every slot unassigned.
    pub fn new() -> Self {
        Self {
            slots: vec![None; usize::from(SLOT_COUNT)],
        }
    }

    /// Returns the owner of a slot.
    pub fn get(&self, slot: u16) -> Option<&C> {
        self.slots.get(usize::from(slot)).and_then(Option::as_ref)
    }

    /// Points every slot in `start..=end` at `owner`.
    ///
    /// Slots outside the table are rejected one by one with a warning; the
    /// rest of the range is still assigned. Returns how many slots were
    /// assigned.
    pub fn assign_range(&mut self, start: usize, end: usize, owner: &C) -> usize {
        if start > end {
            return 0;
        }

        let mut assigned = 0;
        let mut rejected = 0;
        for slot in start..=end {
            match self.slots.get_mut(slot) {
                Some(entry) => {
                    *entry = Some(owner.clone());
                    assigned += 1;
                }
                None => rejected += 1,
            }
        }

        if rejected > 0 {
            warn!(start, end, rejected, "rejected out-of-range slots");
        }
        assigned
    }

    /// Points every slot at `owner`.
    pub fn fill(&mut self, owner: &C) {
        for entry in &mut self.slots {
            *entry = Some(owner.clone());
        }
    }

    /// Unassigns every slot.
    pub fn clear(&mut self) {
        for entry in &mut self.slots {
            *entry = None;
        }
    }

    /// Returns the number of assigned slots.
    pub fn covered(&self) -> usize {
        self.slots.iter().filter(|entry| entry.is_some()).count()
    }

    /// Returns true if every slot has an owner.
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Returns each distinct owner once, in slot order.
    pub fn owners(&self) -> Vec<C>
    where
        C: PartialEq,
    {
        let mut owners: Vec<C> = Vec::new();
        for owner in self.slots.iter().flatten() {
            if owners.last() != Some(owner) && !owners.contains(owner) {
                owners.push(owner.clone());
            }
        }
        owners
    }
}

impl<C: Clone> Default for SlotTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_xmodem_check_value() {
        assert_eq!(CRC16.checksum(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_key_slot_known_values() {
        assert_eq!(key_slot("foo"), 12182);
        assert_eq!(key_slot("somekey"), 11058);
        assert_eq!(key_slot("123456789"), 0x31C3 % SLOT_COUNT);
    }

    #[test]
    fn test_key_slot_in_range_and_stable() {
        for i in 0..1000 {
            let key = format!("key:{}", i);
            let slot = key_slot(&key);
            assert!(slot < SLOT_COUNT);
            assert_eq!(slot, key_slot(&key));
        }
    }

    #[test]
    fn test_key_slot_distribution() {
        let mut slots = std::collections::HashSet::new();
        for i in 0..100 {
            slots.insert(key_slot(format!("key{}", i)));
        }
        assert!(slots.len() >= 50, "Keys should distribute across slots");
    }

    #[test]
    fn test_hash_slot_ignores_tags_when_disabled() {
        assert_eq!(hash_slot(b"{user1000}.following", false), key_slot("{user1000}.following"));
        assert_ne!(
            hash_slot(b"{user1000}.following", false),
            hash_slot(b"{user1000}.followers", false)
        );
    }

    #[test]
    fn test_hash_slot_with_tags() {
        let slot1 = hash_slot(b"{user1000}.following", true);
        let slot2 = hash_slot(b"{user1000}.followers", true);
        assert_eq!(slot1, slot2);
        assert_eq!(slot1, key_slot("user1000"));
    }

    #[test]
    fn test_extract_hash_tag() {
        assert_eq!(extract_hash_tag(b"foo{bar}"), b"bar");
        assert_eq!(extract_hash_tag(b"prefix{tag}suffix"), b"tag");
        assert_eq!(extract_hash_tag(b"foo{bar}{baz}"), b"bar");
        assert_eq!(extract_hash_tag(b"simple_key"), b"simple_key");
        assert_eq!(extract_hash_tag(b"foo{}bar"), b"foo{}bar");
        assert_eq!(extract_hash_tag(b"foo{bar"), b"foo{bar");
        assert_eq!(extract_hash_tag(b"}"), b"}");
    }

    #[test]
    fn test_slot_range() {
        let range = SlotRange::new(0, 5460);
        assert!(range.contains(0));
        assert!(range.contains(5460));
        assert!(!range.contains(5461));
        assert_eq!(range.len(), 5461);
        assert_eq!(range.to_string(), "0-5460");
        assert!(SlotRange::new(10, 9).is_empty());
        assert_eq!(SlotRange::new(10, 9).len(), 0);
    }

    #[test]
    fn test_slot_table_assign_range() {
        let mut table = SlotTable::new();
        assert_eq!(table.assign_range(0, 100, &"a"), 101);
        assert_eq!(table.assign_range(101, 200, &"b"), 100);
        assert_eq!(table.get(0), Some(&"a"));
        assert_eq!(table.get(100), Some(&"a"));
        assert_eq!(table.get(101), Some(&"b"));
        assert_eq!(table.get(201), None);
        assert_eq!(table.covered(), 201);
    }

    #[test]
    fn test_slot_table_last_writer_wins() {
        let mut table = SlotTable::new();
        table.assign_range(0, 100, &"a");
        table.assign_range(50, 60, &"b");
        assert_eq!(table.get(49), Some(&"a"));
        assert_eq!(table.get(55), Some(&"b"));
        assert_eq!(table.get(61), Some(&"a"));
    }

    #[test]
    fn test_slot_table_rejects_out_of_range_per_slot() {
        let mut table = SlotTable::new();
        assert_eq!(table.assign_range(16380, 16390, &1u8), 4);
        assert_eq!(table.get(16383), Some(&1));
        assert_eq!(table.assign_range(20000, 20010, &1u8), 0);
        assert_eq!(table.assign_range(5, 4, &1u8), 0);
        assert_eq!(table.covered(), 4);
    }

    #[test]
    fn test_slot_table_fill_and_clear() {
        let mut table = SlotTable::new();
        table.fill(&"solo");
        assert!(table.is_complete());
        assert_eq!(table.get(SLOT_COUNT - 1), Some(&"solo"));
        assert_eq!(table.get(SLOT_COUNT), None);
        table.clear();
        assert_eq!(table.covered(), 0);
    }

    #[test]
    fn test_slot_table_owners() {
        let mut table = SlotTable::new();
        table.assign_range(0, 10, &"a");
        table.assign_range(11, 20, &"b");
        table.assign_range(21, 30, &"a");
        assert_eq!(table.owners(), vec!["a", "b"]);
    }
}
