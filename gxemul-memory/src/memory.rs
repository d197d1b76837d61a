//! Guest physical memory: RAM blocks plus the device registry, bound
//! together as in the original `memory` object. This is the physical-only
//! half of the `memory_rw` contract (§4.5): the virtual-address decomposition
//! and page-boundary probing live with the CPU's address translator, which
//! calls down into [`Memory::access_physical`] once a page has been
//! resolved to a physical address.

use crate::block::MemBlocks;
use crate::device::DeviceTable;
use crate::error::AccessFault;
use crate::flags::{AccessFlags, DeviceFlags};
use crate::llsc::LlscTable;
use log::warn;

/// Guest physical memory: a sparse RAM backing store plus the registered
/// device table, shared by every CPU in the emulation. Also owns the
/// LL/SC reservation table (§5): every CPU reaches the same `Memory`
/// through its own `Rc<RefCell<_>>`, so this is the natural place for
/// state that must be visible across CPUs without its own lock.
pub struct Memory {
    ram: MemBlocks,
    devices: DeviceTable,
    max_physical: u64,
    warned_oob: bool,
    llsc: LlscTable,
}

impl Memory {
    /// `block_shift` sizes each lazily-allocated RAM block (`1 <<
    /// block_shift` bytes); `fill_byte` is what unbacked RAM reads as
    /// (0x00 for most guests, 0xFF for x86); `max_physical` bounds the
    /// configured physical address space for the one-time out-of-range
    /// diagnostic; `cpu_count`/`llsc_line_shift` size the LL/SC
    /// reservation table (one slot per CPU, reservations tracked per
    /// cache line of `1 << llsc_line_shift` bytes).
    pub fn new(block_shift: u32, fill_byte: u8, max_physical: u64, cpu_count: usize, llsc_line_shift: u32) -> Self {
        Self {
            ram: MemBlocks::new(block_shift, fill_byte),
            devices: DeviceTable::new(),
            max_physical,
            warned_oob: false,
            llsc: LlscTable::new(cpu_count, llsc_line_shift),
        }
    }

    pub fn devices(&mut self) -> &mut DeviceTable {
        &mut self.devices
    }

    pub fn llsc(&self) -> &LlscTable {
        &self.llsc
    }

    /// Performs one physical-address access. `buf.len()` bytes are read
    /// from, or written to, `paddr`. The caller must have already
    /// ensured the access does not itself span a translation-page
    /// boundary; that decomposition is the translator's job.
    pub fn access_physical(
        &mut self,
        paddr: u64,
        buf: &mut [u8],
        flags: AccessFlags,
    ) -> Result<u32, AccessFault> {
        if let Some(index) = self.devices.find(paddr, buf.len() as u64) {
            if flags.contains(AccessFlags::NO_EXCEPTIONS)
                && !flags.is_write()
                && !self
                    .devices
                    .get_mut(index)
                    .flags
                    .contains(DeviceFlags::READING_HAS_NO_SIDE_EFFECTS)
            {
                // A probe access must never trigger a side-effecting
                // device read; treat it as a successful no-op instead.
                buf.fill(0);
                return Ok(0);
            }
            let result = self.devices.dispatch(index, paddr, buf, flags);
            if result.is_ok() && flags.is_write() {
                self.llsc.invalidate(paddr);
            }
            return result;
        }

        let end = paddr + buf.len() as u64;
        let out_of_range = end > self.max_physical && !self.ram.is_backed(paddr);
        if out_of_range && !flags.contains(AccessFlags::NO_EXCEPTIONS) {
            if !self.warned_oob {
                warn!(
                    "physical access at {:#x} is outside the configured physical memory ({:#x} bytes)",
                    paddr, self.max_physical
                );
                self.warned_oob = true;
            }
            return Err(AccessFault::OutOfRange);
        }

        if flags.is_write() {
            self.ram.write(paddr, buf);
            self.llsc.invalidate(paddr);
        } else {
            self.ram.read(paddr, buf);
        }
        Ok(0)
    }

    /// Offers the device at `dirty` up for invalidation: callers check
    /// this after a write that landed on a `DYNTRANS_WRITE_OK` device to
    /// learn which byte range changed.
    pub fn take_device_dirty_window(&mut self, paddr: u64, len: u64) -> Option<(u64, u64)> {
        let index = self.devices.find(paddr, len)?;
        self.devices.get_mut(index).take_dirty_window()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceHandler;
    use alloc::boxed::Box;
    use alloc::vec;

    struct Ram(vec::Vec<u8>);
    impl DeviceHandler for Ram {
        fn access(
            &mut self,
            off: u64,
            buf: &mut [u8],
            flags: AccessFlags,
        ) -> Result<u32, ()> {
            let off = off as usize;
            if flags.is_write() {
                self.0[off..off + buf.len()].copy_from_slice(buf);
            } else {
                buf.copy_from_slice(&self.0[off..off + buf.len()]);
            }
            Ok(3)
        }
    }

    #[test]
    fn plain_ram_round_trips() {
        let mut mem = Memory::new(12, 0x00, 0x1000_0000, 1, 6);
        mem.access_physical(0x2000, &mut [1, 2, 3, 4], AccessFlags::WRITE)
            .unwrap();
        let mut buf = [0u8; 4];
        mem.access_physical(0x2000, &mut buf, AccessFlags::empty())
            .unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn device_access_takes_priority_over_ram() {
        let mut mem = Memory::new(12, 0x00, 0x2000_0000, 1, 6);
        mem.devices()
            .register(
                0x10000000,
                0x1000,
                DeviceFlags::DYNTRANS_OK | DeviceFlags::DYNTRANS_WRITE_OK,
                Box::new(Ram(vec![0xAA; 0x1000])),
            )
            .unwrap();
        let mut buf = [0u8; 2];
        let latency = mem
            .access_physical(0x10000010, &mut buf, AccessFlags::empty())
            .unwrap();
        assert_eq!(buf, [0xAA, 0xAA]);
        assert_eq!(latency, 3);
    }

    #[test]
    fn out_of_range_real_access_is_reported_once() {
        let mut mem = Memory::new(12, 0x00, 0x1000, 1, 6);
        let mut buf = [0u8; 4];
        assert!(mem
            .access_physical(0x5000, &mut buf, AccessFlags::empty())
            .is_err());
        assert!(mem.warned_oob);
    }

    #[test]
    fn probe_access_never_reports_out_of_range() {
        let mut mem = Memory::new(12, 0x00, 0x1000, 1, 6);
        let mut buf = [0u8; 4];
        assert!(mem
            .access_physical(0x5000, &mut buf, AccessFlags::NO_EXCEPTIONS)
            .is_ok());
    }

    #[test]
    fn ram_write_clears_an_outstanding_reservation() {
        let mut mem = Memory::new(12, 0x00, 0x1000_0000, 2, 6);
        mem.llsc().link(0, 0x2000);
        mem.access_physical(0x2000, &mut [0u8; 4], AccessFlags::WRITE)
            .unwrap();
        assert!(!mem.llsc().store_conditional(0, 0x2000));
    }
}
