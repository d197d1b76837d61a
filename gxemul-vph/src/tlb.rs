//! The reverse-direction TLB array backing a VPH table: `N` entries
//! recording `{valid, writable, timestamp, vaddr_page, paddr_page}`, split
//! half for data and half for code, evicted oldest-first.

/// One reverse-mapping slot.
#[derive(Clone, Copy, Debug)]
pub struct TlbSlot {
    pub valid: bool,
    pub writable: bool,
    pub timestamp: u64,
    pub vaddr_page: u64,
    pub paddr_page: u64,
}

impl Default for TlbSlot {
    fn default() -> Self {
        Self {
            valid: false,
            writable: false,
            timestamp: 0,
            vaddr_page: 0,
            paddr_page: 0,
        }
    }
}

/// Whether an update/invalidation concerns the code half or the data half
/// of the TLB array.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TlbHalf {
    Data,
    Code,
}

/// How a single `update_translation_table` call should change a mapping
/// that is already live.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UpdateKind {
    Read,
    Write,
    /// Demote a writable mapping back to read-only without otherwise
    /// disturbing it.
    Downgrade,
    ReadUser,
}

impl UpdateKind {
    pub fn is_writable(self) -> bool {
        matches!(self, UpdateKind::Write)
    }
}

/// Fixed-capacity array of TLB slots, split into two halves, with
/// monotonic-timestamp oldest-first eviction within a half.
pub struct TlbArray {
    slots: alloc::vec::Vec<TlbSlot>,
    data_half: core::ops::Range<usize>,
    code_half: core::ops::Range<usize>,
    clock: u64,
}

impl TlbArray {
    pub fn new(capacity: usize) -> Self {
        let half = capacity / 2;
        Self {
            slots: alloc::vec![TlbSlot::default(); capacity],
            data_half: 0..half,
            code_half: half..capacity,
            clock: 0,
        }
    }

    fn half_range(&self, half: TlbHalf) -> core::ops::Range<usize> {
        match half {
            TlbHalf::Data => self.data_half.clone(),
            TlbHalf::Code => self.code_half.clone(),
        }
    }

    pub fn slot(&self, index: usize) -> &TlbSlot {
        &self.slots[index]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut TlbSlot {
        &mut self.slots[index]
    }

    /// Finds a live slot for `vaddr_page` within `half`.
    pub fn find(&self, half: TlbHalf, vaddr_page: u64) -> Option<usize> {
        self.half_range(half)
            .find(|&i| self.slots[i].valid && self.slots[i].vaddr_page == vaddr_page)
    }

    /// Picks the oldest slot (by timestamp; an invalid slot is always
    /// oldest) within `half` to evict for a new mapping.
    pub fn oldest(&self, half: TlbHalf) -> usize {
        self.half_range(half)
            .min_by_key(|&i| {
                if self.slots[i].valid {
                    self.slots[i].timestamp
                } else {
                    0
                }
            })
            .expect("TLB half must be non-empty")
    }

    pub fn next_timestamp(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub fn invalidate_all(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = TlbSlot::default();
        }
    }

    pub fn iter_valid(&self) -> impl Iterator<Item = (usize, &TlbSlot)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.valid)
    }
}
