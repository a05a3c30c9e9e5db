// Lock-free reservation of read and write slots for fixed-length records.
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::error::{Error, ErrorKind};

/// A reserved record position: `offset == seq * record_len`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Slot {
    pub(crate) seq: u64,
    pub(crate) offset: u64,
}

/// Two independent byte cursors advanced by `record_len` per reservation.
///
/// Each side hands out every offset exactly once and leaves no gaps. The read
/// cursor may run ahead of the write cursor; readers absorb that by waiting
/// on the frontier, not here.
#[derive(Debug)]
pub(crate) struct SlotAllocator {
    record_len: u64,
    write_off: AtomicU64,
    read_off: AtomicU64,
}

impl SlotAllocator {
    #[cfg(test)]
    pub(crate) fn new(record_len: u32) -> Self {
        Self::resume(record_len, 0, 0)
    }

    /// Seeds both cursors at the given sequence numbers.
    pub(crate) fn resume(record_len: u32, write_seq: u64, read_seq: u64) -> Self {
        let record_len = u64::from(record_len);
        Self {
            record_len,
            write_off: AtomicU64::new(write_seq * record_len),
            read_off: AtomicU64::new(read_seq * record_len),
        }
    }

    pub(crate) fn reserve_write(&self) -> Slot {
        self.slot_at(self.write_off.fetch_add(self.record_len, Ordering::AcqRel))
    }

    pub(crate) fn reserve_read(&self) -> Slot {
        self.slot_at(self.read_off.fetch_add(self.record_len, Ordering::AcqRel))
    }

    pub(crate) fn write_seq(&self) -> u64 {
        self.write_off.load(Ordering::Acquire) / self.record_len
    }

    pub(crate) fn read_seq(&self) -> u64 {
        self.read_off.load(Ordering::Acquire) / self.record_len
    }

    /// Slot for an explicit sequence number; the whole record must be
    /// addressable as a `u64` byte range.
    pub(crate) fn slot_for_seq(&self, seq: u64) -> Result<Slot, Error> {
        let offset = seq
            .checked_mul(self.record_len)
            .filter(|offset| offset.checked_add(self.record_len).is_some())
            .ok_or_else(|| {
                Error::new(ErrorKind::Usage)
                    .with_message("sequence number is past the addressable range")
                    .with_seq(seq)
            })?;
        Ok(Slot { seq, offset })
    }

    fn slot_at(&self, offset: u64) -> Slot {
        Slot {
            seq: offset / self.record_len,
            offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Slot, SlotAllocator};
    use crate::core::error::ErrorKind;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn reservations_advance_by_record_len() {
        let slots = SlotAllocator::new(3);
        assert_eq!(slots.reserve_write(), Slot { seq: 0, offset: 0 });
        assert_eq!(slots.reserve_write(), Slot { seq: 1, offset: 3 });
        assert_eq!(slots.write_seq(), 2);
        assert_eq!(slots.read_seq(), 0);

        assert_eq!(slots.reserve_read(), Slot { seq: 0, offset: 0 });
        assert_eq!(slots.read_seq(), 1);
    }

    #[test]
    fn slot_for_seq_rejects_overflowing_offsets() {
        let slots = SlotAllocator::new(3);
        assert_eq!(slots.slot_for_seq(4).expect("slot"), Slot { seq: 4, offset: 12 });

        let err = slots.slot_for_seq(u64::MAX / 2).expect_err("overflow");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(err.seq(), Some(u64::MAX / 2));

        // Start fits but the record's last byte would not.
        let err = slots.slot_for_seq(u64::MAX / 3).expect_err("end overflow");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn read_cursor_may_outrun_write_cursor() {
        let slots = SlotAllocator::new(8);
        for _ in 0..4 {
            slots.reserve_read();
        }
        assert_eq!(slots.read_seq(), 4);
        assert_eq!(slots.write_seq(), 0);
    }

    #[test]
    fn resume_seeds_both_cursors() {
        let slots = SlotAllocator::resume(4, 5, 2);
        assert_eq!(slots.reserve_write(), Slot { seq: 5, offset: 20 });
        assert_eq!(slots.reserve_read(), Slot { seq: 2, offset: 8 });
    }

    #[test]
    fn concurrent_reservations_are_unique_and_dense() {
        let slots = Arc::new(SlotAllocator::new(3));
        let threads = 8;
        let per_thread = 2_000;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let slots = Arc::clone(&slots);
                thread::spawn(move || {
                    (0..per_thread)
                        .map(|_| slots.reserve_write().seq)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = BTreeSet::new();
        for handle in handles {
            for seq in handle.join().expect("join") {
                assert!(seen.insert(seq), "duplicate seq {seq}");
            }
        }
        let total = (threads * per_thread) as u64;
        assert_eq!(seen.len() as u64, total);
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&(total - 1)));
    }
}
