//! The per-CPU tick scheduler (§4.7): a small table of callbacks, each
//! driven down by the number of cycles the CPU actually executed between
//! dispatch batches, invoked (possibly more than once) whenever its
//! counter goes non-positive.

use alloc::vec::Vec;

/// One tick entry's `extra` is left to the owner (cast back from a
/// `usize` rather than stored as `Box<dyn Any>`) so registering a tick
/// costs nothing beyond a table slot; the scheduler itself never
/// interprets it.
pub struct TickEntry {
    ticks_till_next: i64,
    ticks_reset_value: i64,
    pub extra: usize,
}

impl TickEntry {
    /// `clockshift` is the `e` in `ticks_reset_value = 1 << clockshift`;
    /// the §4.7 constraint that it stay above a safe minimum so batching
    /// does not starve high-rate devices is the caller's responsibility
    /// (enforced by whoever configures the machine, not by this type).
    pub fn new(clockshift: u32, extra: usize) -> Self {
        let reset = 1i64 << clockshift;
        Self {
            ticks_till_next: reset,
            ticks_reset_value: reset,
            extra,
        }
    }

    pub fn reset_value(&self) -> i64 {
        self.ticks_reset_value
    }
}

/// The scheduler for one CPU. Holds no knowledge of what a tick callback
/// *does* — [`TickScheduler::advance`] returns how many times each entry
/// fired so the caller (which owns the concrete callbacks, e.g. in
/// `gxemul-runner`) can invoke them.
#[derive(Default)]
pub struct TickScheduler {
    entries: Vec<TickEntry>,
}

impl TickScheduler {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, entry: TickEntry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    pub fn entry(&self, index: usize) -> crate::error::Result<&TickEntry> {
        self.entries
            .get(index)
            .ok_or(crate::error::CpuError::UnknownTickEntry(index))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `min(ticks_reset_value[*]) / 2`, the `a_few_cycles` the top-level
    /// runner batches instructions by. `1` with no registered entries or
    /// in SMP mode without random-chunk mixing (the latter is the
    /// caller's call, not this scheduler's).
    pub fn a_few_cycles(&self) -> i64 {
        self.entries
            .iter()
            .map(TickEntry::reset_value)
            .min()
            .map(|m| (m / 2).max(1))
            .unwrap_or(1)
    }

    /// Subtracts `n` executed cycles from every entry; whenever an
    /// entry's counter goes non-positive, rewinds it by its reset value
    /// until positive again, and records how many times it fired into
    /// `fired` (indexed the same as `register` returned). `fired` is
    /// cleared and resized by this call.
    pub fn advance(&mut self, n: i64, fired: &mut Vec<u32>) {
        fired.clear();
        fired.resize(self.entries.len(), 0);
        for (entry, count) in self.entries.iter_mut().zip(fired.iter_mut()) {
            entry.ticks_till_next -= n;
            while entry.ticks_till_next <= 0 {
                entry.ticks_till_next += entry.ticks_reset_value;
                *count += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_entry_fires_once_per_reset_value() {
        let mut sched = TickScheduler::new();
        sched.register(TickEntry::new(2, 0)); // reset value 4
        let mut fired = Vec::new();
        sched.advance(10, &mut fired);
        assert_eq!(fired, alloc::vec![2]); // 10 / 4 == 2, with 2 remaining
    }

    #[test]
    fn unregistered_index_is_an_error() {
        let sched = TickScheduler::new();
        assert!(sched.entry(0).is_err());
    }

    #[test]
    fn a_few_cycles_is_half_the_smallest_reset_value() {
        let mut sched = TickScheduler::new();
        sched.register(TickEntry::new(4, 0)); // reset value 16
        sched.register(TickEntry::new(2, 0)); // reset value 4
        assert_eq!(sched.a_few_cycles(), 2);
    }

    #[test]
    fn no_entries_defaults_to_one_cycle() {
        let sched = TickScheduler::new();
        assert_eq!(sched.a_few_cycles(), 1);
    }

    #[test]
    fn invocation_count_matches_n_divided_by_reset_value() {
        let mut sched = TickScheduler::new();
        sched.register(TickEntry::new(3, 0)); // reset value 8, starts full at 8
        let mut fired = Vec::new();
        sched.advance(100, &mut fired);
        // Starts at 8: after subtracting 100 it takes ceil((100 - 8) / 8) + 1
        // rewinds to go non-positive, i.e. floor(100 / 8) = 12.
        assert_eq!(fired[0], 12);
    }
}
