//! Load-linked / store-conditional tracking shared across CPUs.
//!
//! Per §5, LL/SC state is per-CPU (`rmw`, `rmw_addr`, `rmw_len`) but an
//! intervening store by *any* CPU to the same cache line must clear it;
//! that cross-CPU visibility is mediated by a small shared table rather
//! than a lock, consistent with the single-threaded, chunk-boundary
//! scheduling model — the table is only ever consulted between chunks.

use alloc::vec::Vec;
use spin::Mutex;

/// One outstanding reservation: the cache line address and the id of the
/// CPU that holds it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Reservation {
    line: u64,
    cpu_id: u32,
}

/// Shared table of outstanding LL reservations, one slot per CPU.
pub struct LlscTable {
    line_shift: u32,
    reservations: Mutex<Vec<Option<Reservation>>>,
}

impl LlscTable {
    pub fn new(cpu_count: usize, line_shift: u32) -> Self {
        Self {
            line_shift,
            reservations: Mutex::new(alloc::vec![None; cpu_count]),
        }
    }

    fn line_of(&self, addr: u64) -> u64 {
        addr >> self.line_shift
    }

    /// Records a load-linked reservation for `cpu_id` at `addr`.
    pub fn link(&self, cpu_id: u32, addr: u64) {
        let mut table = self.reservations.lock();
        table[cpu_id as usize] = Some(Reservation {
            line: self.line_of(addr),
            cpu_id,
        });
    }

    /// Clears every reservation (from any CPU) whose cache line matches a
    /// store to `addr`. Must be called on every write, not just
    /// store-conditional ones: an ordinary store by CPU B must break
    /// CPU A's reservation.
    pub fn invalidate(&self, addr: u64) {
        let line = self.line_of(addr);
        let mut table = self.reservations.lock();
        for slot in table.iter_mut() {
            if matches!(slot, Some(r) if r.line == line) {
                *slot = None;
            }
        }
    }

    /// Attempts a store-conditional for `cpu_id` at `addr`: returns `true`
    /// (and clears the reservation) iff the reservation is still live.
    pub fn store_conditional(&self, cpu_id: u32, addr: u64) -> bool {
        let mut table = self.reservations.lock();
        let slot = &mut table[cpu_id as usize];
        let succeeds = matches!(slot, Some(r) if r.line == self.line_of(addr));
        *slot = None;
        succeeds
    }
}
