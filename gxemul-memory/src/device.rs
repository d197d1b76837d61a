//! Memory-mapped device registry.
//!
//! Devices are matched against a physical address by linear scan, the same
//! way the original dispatcher works: a single-entry hint cache remembers
//! the last device that matched so that back-to-back accesses to the same
//! peripheral (the overwhelmingly common case) don't re-scan the table.

use crate::error::{AccessFault, MemoryError, Result};
use crate::flags::{AccessFlags, DeviceFlags};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::Cell;

/// Memory-mapped device callback.
///
/// Returns the number of cycles of latency to charge on success (zero is
/// a valid "free" success), or a negative/zero-or-less failure is instead
/// reported through the `Err` variant by the device table, matching the
/// external interface's "positive for success ... zero or negative for
/// failure" contract.
pub trait DeviceHandler {
    fn access(
        &mut self,
        paddr_in_device: u64,
        buf: &mut [u8],
        flags: AccessFlags,
    ) -> core::result::Result<u32, ()>;
}

/// A single registered memory-mapped device.
pub struct Device {
    pub base: u64,
    pub length: u64,
    pub flags: DeviceFlags,
    handler: Box<dyn DeviceHandler>,
    /// `[low, high)` byte offsets (relative to `base`) written since the
    /// last time a read re-entered the device, used to invalidate the
    /// VPH-cached buffer only over the part that actually changed.
    dirty: Option<(u64, u64)>,
    /// A snapshot of the whole device's backing buffer, standing in for
    /// the host pointer a `DYNTRANS_OK` device's page would be cached
    /// under in VPH: once populated, reads are served straight from here
    /// with no call to `handler.access`, until a write drops it.
    cache: Option<Box<[u8]>>,
}

impl Device {
    pub fn new(base: u64, length: u64, flags: DeviceFlags, handler: Box<dyn DeviceHandler>) -> Self {
        Self {
            base,
            length,
            flags,
            handler,
            dirty: None,
            cache: None,
        }
    }

    fn contains_range(&self, paddr: u64, len: u64) -> bool {
        paddr >= self.base
            && len <= self.length
            && paddr - self.base <= self.length - len
    }

    /// Returns and clears the dirty window, if any.
    pub fn take_dirty_window(&mut self) -> Option<(u64, u64)> {
        self.dirty.take()
    }

    /// Reads the whole device once through `handler.access` and keeps the
    /// result as `cache`, the snapshot later reads are served from.
    fn fill_cache(&mut self) -> core::result::Result<(), ()> {
        let mut buf = alloc::vec![0u8; self.length as usize];
        self.handler.access(0, &mut buf, AccessFlags::empty())?;
        self.cache = Some(buf.into_boxed_slice());
        Ok(())
    }
}

/// The device table: a registry searched linearly, with a one-entry hint
/// cache recording the index that matched last time.
pub struct DeviceTable {
    devices: Vec<Device>,
    hint: Cell<usize>,
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceTable {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            hint: Cell::new(0),
        }
    }

    pub fn register(
        &mut self,
        base: u64,
        length: u64,
        flags: DeviceFlags,
        handler: Box<dyn DeviceHandler>,
    ) -> Result<usize> {
        for d in &self.devices {
            let overlap = base < d.base + d.length && d.base < base + length;
            if overlap {
                return Err(MemoryError::OverlappingDevice);
            }
        }
        self.devices.push(Device::new(base, length, flags, handler));
        Ok(self.devices.len() - 1)
    }

    /// Finds the device fully covering `[paddr, paddr+len)`, consulting
    /// the hint first.
    pub fn find(&self, paddr: u64, len: u64) -> Option<usize> {
        let hint = self.hint.get();
        if hint < self.devices.len() && self.devices[hint].contains_range(paddr, len) {
            return Some(hint);
        }
        self.devices
            .iter()
            .position(|d| d.contains_range(paddr, len))
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Device {
        &mut self.devices[index]
    }

    /// Dispatches an access to the device at `index`, updating the hint
    /// cache and the device's dirty-write window on success.
    ///
    /// For a `DYNTRANS_OK` device, a read is served from the cached
    /// snapshot (populated by one `handler.access` call the first time it
    /// is needed) rather than re-entering `handler.access` on every
    /// access, matching the external interface's "the runtime will cache
    /// the device's backing buffer directly into a VPH entry and only
    /// re-enter `device_f` when a dirty window is written".
    pub fn dispatch(
        &mut self,
        index: usize,
        paddr: u64,
        buf: &mut [u8],
        flags: AccessFlags,
    ) -> core::result::Result<u32, AccessFault> {
        self.hint.set(index);
        let device = &mut self.devices[index];
        let offset = paddr - device.base;

        if !flags.is_write() && device.flags.contains(DeviceFlags::DYNTRANS_OK) {
            if device.cache.is_none() && device.fill_cache().is_err() {
                return Err(AccessFault::DeviceError);
            }
            let cache = device.cache.as_ref().expect("just filled");
            let off = offset as usize;
            buf.copy_from_slice(&cache[off..off + buf.len()]);
            return Ok(0);
        }

        let result = device.handler.access(offset, buf, flags);
        match result {
            Ok(latency) => {
                if flags.is_write() && device.flags.contains(DeviceFlags::DYNTRANS_WRITE_OK) {
                    let (lo, hi) = device.dirty.unwrap_or((offset, offset));
                    device.dirty = Some((
                        core::cmp::min(lo, offset),
                        core::cmp::max(hi, offset + buf.len() as u64),
                    ));
                }
                if flags.is_write() && device.flags.contains(DeviceFlags::DYNTRANS_OK) {
                    // The backing buffer may have changed; force the next
                    // read to re-enter `handler.access` and refresh it.
                    device.cache = None;
                }
                Ok(latency)
            }
            Err(()) => Err(AccessFault::DeviceError),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysOk(Vec<u8>);
    impl DeviceHandler for AlwaysOk {
        fn access(
            &mut self,
            paddr_in_device: u64,
            buf: &mut [u8],
            flags: AccessFlags,
        ) -> core::result::Result<u32, ()> {
            let off = paddr_in_device as usize;
            if flags.is_write() {
                self.0[off..off + buf.len()].copy_from_slice(buf);
            } else {
                buf.copy_from_slice(&self.0[off..off + buf.len()]);
            }
            Ok(1)
        }
    }

    struct Counting {
        backing: Vec<u8>,
        calls: alloc::rc::Rc<core::cell::Cell<u32>>,
    }
    impl DeviceHandler for Counting {
        fn access(
            &mut self,
            paddr_in_device: u64,
            buf: &mut [u8],
            flags: AccessFlags,
        ) -> core::result::Result<u32, ()> {
            self.calls.set(self.calls.get() + 1);
            let off = paddr_in_device as usize;
            if flags.is_write() {
                self.backing[off..off + buf.len()].copy_from_slice(buf);
            } else {
                buf.copy_from_slice(&self.backing[off..off + buf.len()]);
            }
            Ok(1)
        }
    }

    #[test]
    fn hint_cache_avoids_rescan_after_first_hit() {
        let mut table = DeviceTable::new();
        table
            .register(
                0x1000,
                0x100,
                DeviceFlags::DYNTRANS_OK,
                Box::new(AlwaysOk(vec![0; 0x100])),
            )
            .unwrap();
        assert_eq!(table.find(0x1010, 4), Some(0));
        assert_eq!(table.hint.get(), 0);
        assert_eq!(table.find(0x1020, 4), Some(0));
    }

    #[test]
    fn dirty_window_grows_to_cover_every_write() {
        let mut table = DeviceTable::new();
        table
            .register(
                0x10000000,
                0x1000,
                DeviceFlags::DYNTRANS_OK | DeviceFlags::DYNTRANS_WRITE_OK,
                Box::new(AlwaysOk(vec![0; 0x1000])),
            )
            .unwrap();
        let mut buf = [1u8; 4];
        table
            .dispatch(0, 0x10000400, &mut buf, AccessFlags::WRITE)
            .unwrap();
        let mut buf2 = [1u8; 4];
        table
            .dispatch(0, 0x10000FF0, &mut buf2, AccessFlags::WRITE)
            .unwrap();
        let window = table.get_mut(0).take_dirty_window().unwrap();
        assert_eq!(window, (0x400, 0xFF4));
    }

    #[test]
    fn dyntrans_ok_read_is_cached_until_a_write_invalidates_it() {
        let mut table = DeviceTable::new();
        let calls = alloc::rc::Rc::new(core::cell::Cell::new(0u32));
        table
            .register(
                0x10000000,
                0x1000,
                DeviceFlags::DYNTRANS_OK | DeviceFlags::DYNTRANS_WRITE_OK,
                Box::new(Counting {
                    backing: vec![0xAA; 0x1000],
                    calls: calls.clone(),
                }),
            )
            .unwrap();

        let mut buf = [0u8; 4];
        table.dispatch(0, 0x10000400, &mut buf, AccessFlags::empty()).unwrap();
        assert_eq!(calls.get(), 1);

        // Same vaddr page, no intervening write: served from the cache.
        table.dispatch(0, 0x10000400, &mut buf, AccessFlags::empty()).unwrap();
        assert_eq!(calls.get(), 1);

        // A write re-enters the device (to let it react) and drops the
        // cache, so the following read re-enters it too.
        let mut wbuf = [1u8; 4];
        table.dispatch(0, 0x10000400, &mut wbuf, AccessFlags::WRITE).unwrap();
        assert_eq!(calls.get(), 2);
        table.dispatch(0, 0x10000400, &mut buf, AccessFlags::empty()).unwrap();
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn overlapping_registration_is_rejected() {
        let mut table = DeviceTable::new();
        table
            .register(0x1000, 0x100, DeviceFlags::empty(), Box::new(AlwaysOk(vec![0; 0x100])))
            .unwrap();
        let err = table.register(0x1080, 0x100, DeviceFlags::empty(), Box::new(AlwaysOk(vec![0; 0x100])));
        assert!(err.is_err());
    }
}
