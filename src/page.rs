use std::{fmt::Debug, ops::Range, sync::Arc};

use crate::{
    error::{DbError, Result},
    ids::{PageId, RecordId},
    tuple::{Tuple, TupleLayout},
    PAGE_SIZE,
};

/// A heap page: a slot-occupancy bitmap followed by fixed-width tuple slots.
///
/// Layout of the `PAGE_SIZE` bytes:
/// - header: one bit per slot, bit `i` lives in byte `i / 8` at position `i % 8`
///   (least significant bit first), rounded up to a whole byte
/// - slots: `num_slots` slots of `layout.width()` bytes each, immediately after the header
/// - whatever is left over is zero padding
///
/// Invariants:
/// - a slot's bit is set iff the slot holds a valid serialized tuple
/// - header bits past `num_slots` are always zero
/// - the bytes of a cleared slot are ignored, they are not wiped on delete
pub struct HeapPage {
    id: PageId,
    layout: Arc<TupleLayout>,
    data: Vec<u8>,
}

impl HeapPage {
    /// Number of slots a page holds for this layout. Each slot costs its width plus one header bit.
    pub fn slots_per_page(layout: &TupleLayout) -> usize {
        (PAGE_SIZE * 8) / (layout.width() * 8 + 1)
    }

    /// Number of header bytes needed for the given slot count
    pub fn header_size(num_slots: usize) -> usize {
        num_slots.div_ceil(8)
    }

    /// The raw contents of a page with every slot empty
    pub fn empty_page_data() -> Vec<u8> {
        vec![0; PAGE_SIZE]
    }

    /// Create a new page with every slot empty
    pub fn empty(id: PageId, layout: Arc<TupleLayout>) -> Self {
        Self {
            id,
            layout,
            data: Self::empty_page_data(),
        }
    }

    /// Parse a page read from storage. The header and every occupied slot are validated.
    pub fn from_bytes(id: PageId, layout: Arc<TupleLayout>, bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != PAGE_SIZE {
            return Err(DbError::CorruptPage {
                page: id,
                reason: format!("expected {PAGE_SIZE} bytes, got {}", bytes.len()),
            });
        }
        let page = Self {
            id,
            layout,
            data: bytes,
        };

        let num_slots = page.num_slots();
        let header_size = Self::header_size(num_slots);
        let has_stray_bits = (num_slots..header_size * 8).any(|bit| page.bit(bit));
        if has_stray_bits {
            return Err(DbError::CorruptPage {
                page: id,
                reason: "header has bits set past the last slot".to_string(),
            });
        }
        for slot in (0..num_slots).filter(|slot| page.is_slot_used(*slot)) {
            if let Err(reason) = page.layout.decode(&page.data[page.slot_range(slot)]) {
                return Err(DbError::CorruptPage {
                    page: id,
                    reason: format!("slot {slot}: {reason}"),
                });
            }
        }
        Ok(page)
    }

    /// Serialize the page back into exactly `PAGE_SIZE` bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        debug_assert_eq!(self.data.len(), PAGE_SIZE);
        self.data.clone()
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn layout(&self) -> &Arc<TupleLayout> {
        &self.layout
    }

    pub fn num_slots(&self) -> usize {
        Self::slots_per_page(&self.layout)
    }

    pub fn empty_slot_count(&self) -> usize {
        (0..self.num_slots())
            .filter(|slot| !self.is_slot_used(*slot))
            .count()
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.num_slots() && self.bit(slot)
    }

    fn bit(&self, idx: usize) -> bool {
        self.data[idx / 8] & (1 << (idx % 8)) != 0
    }

    fn set_slot_used(&mut self, slot: usize, used: bool) {
        let mask = 1 << (slot % 8);
        if used {
            self.data[slot / 8] |= mask;
        } else {
            self.data[slot / 8] &= !mask;
        }
    }

    /// The byte range of a slot within the page
    fn slot_range(&self, slot: usize) -> Range<usize> {
        let width = self.layout.width();
        let start = Self::header_size(self.num_slots()) + slot * width;
        start..start + width
    }

    /// Insert the tuple into the lowest-numbered empty slot and stamp its [`RecordId`]
    pub fn insert(&mut self, tuple: &mut Tuple) -> Result<RecordId> {
        let slot = (0..self.num_slots())
            .find(|slot| !self.is_slot_used(*slot))
            .ok_or(DbError::PageFull(self.id))?;
        let range = self.slot_range(slot);
        self.layout.encode(tuple, &mut self.data[range])?;
        self.set_slot_used(slot, true);

        let record_id = RecordId::new(self.id, slot);
        tuple.set_record_id(Some(record_id));
        Ok(record_id)
    }

    /// Clear the slot addressed by the record id
    pub fn delete(&mut self, record_id: RecordId) -> Result<()> {
        if record_id.page != self.id {
            return Err(DbError::TupleNotOnThisPage {
                page: self.id,
                record: record_id,
            });
        }
        if !self.is_slot_used(record_id.slot) {
            return Err(DbError::SlotNotOccupied {
                page: self.id,
                slot: record_id.slot,
            });
        }
        self.set_slot_used(record_id.slot, false);
        Ok(())
    }

    /// Read the tuple stored in a slot, if the slot is occupied
    pub fn tuple(&self, slot: usize) -> Option<Tuple> {
        if !self.is_slot_used(slot) {
            return None;
        }
        //  occupied slots are validated on load and written through encode, so decoding succeeds
        let fields = self.layout.decode(&self.data[self.slot_range(slot)]).ok()?;
        Some(Tuple::with_record_id(fields, RecordId::new(self.id, slot)))
    }

    /// Iterate over the occupied slots in increasing slot order.
    /// Clone the iterator (or call this again) to restart.
    pub fn iter(&self) -> PageIter<'_> {
        PageIter {
            page: self,
            next_slot: 0,
        }
    }

    /// Copy out every tuple currently on the page
    pub fn tuples(&self) -> Vec<Tuple> {
        self.iter().collect()
    }
}

impl PartialEq for HeapPage {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.layout == other.layout && self.data == other.data
    }
}

impl Debug for HeapPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapPage")
            .field("id", &self.id)
            .field("num_slots", &self.num_slots())
            .field("empty_slots", &self.empty_slot_count())
            .finish()
    }
}

/// Iterator over the occupied slots of a [`HeapPage`]
#[derive(Clone)]
pub struct PageIter<'a> {
    page: &'a HeapPage,
    next_slot: usize,
}

impl Iterator for PageIter<'_> {
    type Item = Tuple;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next_slot < self.page.num_slots() {
            let slot = self.next_slot;
            self.next_slot += 1;
            if let Some(tuple) = self.page.tuple(slot) {
                return Some(tuple);
            }
        }
        None
    }
}

#[cfg(test)]
mod page_tests {
    use quickcheck::{quickcheck, TestResult};

    use super::*;
    use crate::{
        ids::TableId,
        test_utils::{four_slot_layout, four_slot_tuple, small_layout},
        tuple::{Field, FieldType},
    };

    fn page_id() -> PageId {
        PageId::new(TableId(1), 0)
    }

    fn int_tuple(a: i32, b: i32) -> Tuple {
        Tuple::new(vec![Field::Int(a), Field::Int(b)])
    }

    #[test]
    fn test_slot_count_formula() {
        let layout = TupleLayout::new(vec![FieldType::Int, FieldType::Int]);
        assert_eq!(HeapPage::slots_per_page(&layout), PAGE_SIZE * 8 / 65);
        assert_eq!(HeapPage::slots_per_page(&four_slot_layout()), 4);

        //  header plus slots never exceed the page
        let slots = HeapPage::slots_per_page(&layout);
        assert!(HeapPage::header_size(slots) + slots * layout.width() <= PAGE_SIZE);
    }

    #[test]
    fn test_empty_page() {
        let page = HeapPage::empty(page_id(), small_layout());
        assert_eq!(page.empty_slot_count(), page.num_slots());
        assert_eq!(page.iter().count(), 0);
        assert_eq!(page.to_bytes().len(), PAGE_SIZE);
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        let result = HeapPage::from_bytes(page_id(), small_layout(), vec![0; PAGE_SIZE - 1]);
        assert!(matches!(result, Err(DbError::CorruptPage { .. })));
    }

    #[test]
    fn test_from_bytes_rejects_stray_header_bits() {
        let layout = four_slot_layout();
        let mut bytes = HeapPage::empty_page_data();
        //  only 4 slots, so bit 5 of the single header byte must be clear
        bytes[0] = 0b0010_0000;
        let result = HeapPage::from_bytes(page_id(), layout, bytes);
        assert!(matches!(result, Err(DbError::CorruptPage { .. })));
    }

    #[test]
    fn test_from_bytes_rejects_garbage_in_occupied_slot() {
        let layout = four_slot_layout();
        let mut bytes = HeapPage::empty_page_data();
        bytes[0] = 0b0000_0001;
        //  string length prefix of slot 0 far beyond its capacity
        let header = HeapPage::header_size(4);
        bytes[header + 4..header + 8].copy_from_slice(&u32::MAX.to_be_bytes());
        let result = HeapPage::from_bytes(page_id(), layout, bytes);
        assert!(matches!(result, Err(DbError::CorruptPage { .. })));
    }

    #[test]
    fn test_insert_uses_lowest_empty_slot() {
        let mut page = HeapPage::empty(page_id(), small_layout());
        let mut t0 = int_tuple(0, 0);
        let mut t1 = int_tuple(1, 1);
        let mut t2 = int_tuple(2, 2);
        assert_eq!(page.insert(&mut t0).unwrap().slot, 0);
        assert_eq!(page.insert(&mut t1).unwrap().slot, 1);
        assert_eq!(t1.record_id(), Some(RecordId::new(page_id(), 1)));

        page.delete(RecordId::new(page_id(), 0)).unwrap();
        assert_eq!(page.insert(&mut t2).unwrap().slot, 0);
        let values: Vec<Tuple> = page.iter().collect();
        assert_eq!(values, vec![t2, t1]);
    }

    #[test]
    fn test_insert_into_full_page() {
        let mut page = HeapPage::empty(page_id(), four_slot_layout());
        for i in 0..4 {
            page.insert(&mut four_slot_tuple(i)).unwrap();
        }
        assert_eq!(page.empty_slot_count(), 0);
        assert!(matches!(
            page.insert(&mut four_slot_tuple(4)),
            Err(DbError::PageFull(_))
        ));
        assert_eq!(page.iter().count(), 4);
    }

    #[test]
    fn test_insert_rejects_mismatched_tuple_without_side_effects() {
        let mut page = HeapPage::empty(page_id(), small_layout());
        let mut bad = Tuple::new(vec![Field::Int(1)]);
        assert!(matches!(
            page.insert(&mut bad),
            Err(DbError::LayoutMismatch(_))
        ));
        assert_eq!(page.empty_slot_count(), page.num_slots());
        assert!(bad.record_id().is_none());
    }

    #[test]
    fn test_delete_errors() {
        let mut page = HeapPage::empty(page_id(), small_layout());
        let rid = page.insert(&mut int_tuple(1, 2)).unwrap();

        let elsewhere = RecordId::new(PageId::new(TableId(1), 9), rid.slot);
        assert!(matches!(
            page.delete(elsewhere),
            Err(DbError::TupleNotOnThisPage { .. })
        ));

        page.delete(rid).unwrap();
        assert!(matches!(
            page.delete(rid),
            Err(DbError::SlotNotOccupied { slot: 0, .. })
        ));
        assert!(matches!(
            page.delete(RecordId::new(page_id(), page.num_slots() + 10)),
            Err(DbError::SlotNotOccupied { .. })
        ));
    }

    #[test]
    fn test_iterator_is_restartable() {
        let mut page = HeapPage::empty(page_id(), small_layout());
        for i in 0..5 {
            page.insert(&mut int_tuple(i, i)).unwrap();
        }
        let iter = page.iter();
        let first: Vec<Tuple> = iter.clone().collect();
        let second: Vec<Tuple> = iter.collect();
        assert_eq!(first, second);
        assert_eq!(page.tuples(), first);
    }

    #[test]
    fn test_round_trip_after_deletes() {
        let mut page = HeapPage::empty(page_id(), four_slot_layout());
        for i in 0..4 {
            page.insert(&mut four_slot_tuple(i)).unwrap();
        }
        page.delete(RecordId::new(page_id(), 2)).unwrap();
        let copy = HeapPage::from_bytes(page_id(), four_slot_layout(), page.to_bytes()).unwrap();
        assert_eq!(copy, page);
        assert_eq!(copy.tuples(), page.tuples());
        assert_eq!(copy.empty_slot_count(), 1);
    }

    quickcheck! {
        fn prop_insert_is_visible_exactly_once(values: Vec<(i32, i32)>) -> TestResult {
            let mut page = HeapPage::empty(page_id(), small_layout());
            if values.len() > page.num_slots() {
                return TestResult::discard();
            }
            for (a, b) in values {
                let before = page.empty_slot_count();
                let mut tuple = int_tuple(a, b);
                let already = page.iter().filter(|t| *t == tuple).count();
                page.insert(&mut tuple).unwrap();
                let after = page.iter().filter(|t| *t == tuple).count();
                if page.empty_slot_count() != before - 1 || after != already + 1 {
                    return TestResult::failed();
                }
            }
            TestResult::passed()
        }

        fn prop_bytes_round_trip(values: Vec<(i32, String)>, deletes: Vec<usize>) -> TestResult {
            let layout = Arc::new(TupleLayout::new(vec![FieldType::Int, FieldType::Str(16)]));
            let mut page = HeapPage::empty(page_id(), Arc::clone(&layout));
            for (n, s) in values.into_iter().take(page.num_slots()) {
                if s.len() > 16 {
                    continue;
                }
                page.insert(&mut Tuple::new(vec![Field::Int(n), Field::Str(s)])).unwrap();
            }
            for slot in deletes {
                let _ = page.delete(RecordId::new(page_id(), slot % page.num_slots()));
            }
            let copy = HeapPage::from_bytes(page_id(), layout, page.to_bytes()).unwrap();
            TestResult::from_bool(copy == page && copy.tuples() == page.tuples())
        }
    }
}
