//! Thin driver binary: builds one `mips_lite` machine from a hardcoded
//! [`MachineConfig`] and runs it to completion. There is no flag parsing,
//! machine template, or ELF loader here — this exists to give the
//! library crates an executable, not to be a full emulator frontend.

use gxemul_cpu::{end_of_page, end_of_page2, to_be_translated, CpuState, GuestVph};
use gxemul_memory::Memory;
use gxemul_runner::{install_default_logger, MachineConfig, Runner};
use gxemul_vph::{InstrCall, TranslationCache, Vph32};
use log::{info, LevelFilter};
use mips_lite::MipsLite;
use std::cell::RefCell;
use std::rc::Rc;

fn encode_lui(rt: u32, imm: u16) -> u32 {
    (0x0F << 26) | (rt << 16) | imm as u32
}
fn encode_ori(rt: u32, rs: u32, imm: u16) -> u32 {
    (0x0D << 26) | (rs << 21) | (rt << 16) | imm as u32
}
fn encode_sw(rt: u32, rs: u32, imm: u16) -> u32 {
    (0x2B << 26) | (rs << 21) | (rt << 16) | imm as u32
}
fn encode_lw(rt: u32, rs: u32, imm: u16) -> u32 {
    (0x23 << 26) | (rs << 21) | (rt << 16) | imm as u32
}

fn main() {
    install_default_logger(LevelFilter::Info);

    let config = MachineConfig {
        num_cpus: 1,
        cache_size_mib: 1,
        tick_unroll_factor: 4,
        max_instructions: 1_000,
        single_step: false,
    };

    let mem = Rc::new(RefCell::new(Memory::new(16, 0x00, 0x1000_0000, config.num_cpus, 6)));
    let vph = GuestVph::ThirtyTwo(Vph32::new(12, 32, 0x10_0000));
    let cache = TranslationCache::new(
        config.cache_size_mib,
        10,
        12,
        1024,
        InstrCall::new(to_be_translated::<MipsLite>, [0; 3]),
        vec![
            InstrCall::new(end_of_page::<MipsLite>, [0; 3]),
            InstrCall::new(end_of_page2::<MipsLite>, [0; 3]),
        ],
    );
    let mut cpu = CpuState::new(0, vph, cache, mem.clone());

    // r3 preset to a writable data page; text and data share one
    // identity-mapped page each (no unmapped segments in mips_lite).
    MipsLite::map_identity(&mut cpu, 0xBFC0_0000 >> 12, 0xBFC0_0000 >> 12, true);
    MipsLite::map_identity(&mut cpu, 0x1000_0000 >> 12, 0x1000_0000 >> 12, true);
    cpu.regs.gpr_write(3, 0x1000_0000);
    cpu.pc = 0xBFC0_0000;

    // lui r2,1; ori r2,r2,0x2345; sw r2,0(r3); lw r4,0(r3)
    let program = [
        encode_lui(2, 1),
        encode_ori(2, 2, 0x2345),
        encode_sw(2, 3, 0),
        encode_lw(4, 3, 0),
    ];
    for (i, word) in program.iter().enumerate() {
        let mut buf = word.to_le_bytes();
        mem.borrow_mut()
            .access_physical(0xBFC0_0000 + (i as u64) * 4, &mut buf, gxemul_memory::AccessFlags::WRITE)
            .expect("identity-mapped RAM write cannot fail");
    }

    let mut runner = Runner::new(config, vec![cpu]).expect("valid MachineConfig");
    runner.run(|| false);

    info!(
        "halted after {} instruction(s): r2={:#x} r4={:#x}",
        runner.total_instructions(),
        runner.cpus()[0].regs.gpr_read(2),
        runner.cpus()[0].regs.gpr_read(4),
    );
}
