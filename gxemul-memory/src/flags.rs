//! Flags shared by the `memory_rw` contract and the device dispatch table.

use bitflags::bitflags;

bitflags! {
    /// Flags accompanying a single `memory_rw`-style access.
    ///
    /// `WRITE` distinguishes a store from a load; the rest mirror the
    /// cache-kind flag named in the access contract (`NONE` is simply the
    /// absence of `DATA`/`INSTRUCTION`).
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct AccessFlags: u8 {
        /// The access is a store rather than a load.
        const WRITE         = 1 << 0;
        /// Never deliver a guest exception on failure; just report it.
        /// Used by debugger/symbol-scanning probes.
        const NO_EXCEPTIONS = 1 << 1;
        /// `vaddr` is already a physical address; skip translation.
        const PHYSICAL      = 1 << 2;
        /// The access fetches an instruction rather than data.
        const INSTRUCTION   = 1 << 3;
    }
}

impl AccessFlags {
    pub fn is_write(self) -> bool {
        self.contains(AccessFlags::WRITE)
    }

    pub fn is_probe(self) -> bool {
        self.contains(AccessFlags::NO_EXCEPTIONS)
    }
}

bitflags! {
    /// Flags a device is registered with, mirroring the external device
    /// callback interface.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct DeviceFlags: u8 {
        /// Reading this device has no side effects (safe to probe).
        const READING_HAS_NO_SIDE_EFFECTS = 1 << 0;
        /// The runtime may cache this device's backing buffer directly
        /// into a VPH entry for reads.
        const DYNTRANS_OK       = 1 << 1;
        /// As `DYNTRANS_OK`, but writes may also be cached; a dirty
        /// window is tracked so writes that land in it can cheaply
        /// invalidate translations.
        const DYNTRANS_WRITE_OK = 1 << 2;
    }
}
