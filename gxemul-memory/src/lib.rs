//! Guest Physical Memory
//!
//! This crate provides the guest memory model described in the dyntrans
//! core specification: sparse, lazily-backed RAM blocks, a
//! memory-mapped-device registry with dirty-window tracking for
//! translation-cache invalidation, and the cross-CPU load-linked /
//! store-conditional reservation table.
//!
//! Address translation (vaddr -> paddr) and the VPH fast path are *not*
//! part of this crate; they live in `gxemul-vph` and are driven by
//! `gxemul-cpu`. This crate only ever deals in physical addresses.

#![no_std]

extern crate alloc;

pub mod block;
pub mod device;
pub mod error;
pub mod flags;
pub mod llsc;
pub mod memory;

pub use device::{Device, DeviceHandler, DeviceTable};
pub use error::{AccessFault, MemoryError, Result};
pub use flags::{AccessFlags, DeviceFlags};
pub use llsc::LlscTable;
pub use memory::Memory;
