//! The top-level runner: single-threaded, round-robin chunking across
//! every CPU in the machine. Everything genuinely ISA-specific stays
//! behind [`Isa`]; this module only implements the chunk loop, tick
//! servicing for CPU 0, and the exit criteria.

use crate::config::MachineConfig;
use crate::error::{Result, RunnerError};
use gxemul_cpu::{run_instr, CpuState, Isa};
use log::info;

/// A chunk is `2^15` cycles, the budget the runner recomputes before
/// dispatching into every CPU for one round.
const CHUNK_CYCLES: u64 = 1 << 15;
/// Print a statistics line every `2^22` CPU-0 cycles. GUI event polling
/// and console flushing at `2^16` are not reproduced here: there is no
/// GUI/console surface in this workspace.
const STATS_INTERVAL: u64 = 1 << 22;

/// Drives one machine's worth of CPUs to completion. Generic over the
/// concrete [`Isa`] so the same chunk loop serves any ISA plug-in, not
/// just the bundled `mips_lite`.
pub struct Runner<I: Isa> {
    cpus: Vec<CpuState<I>>,
    config: MachineConfig,
    total_instructions: u64,
    stats_counter: u64,
}

impl<I: Isa> Runner<I> {
    pub fn new(config: MachineConfig, cpus: Vec<CpuState<I>>) -> Result<Self> {
        if cpus.is_empty() {
            return Err(RunnerError::BadConfiguration("machine has no CPUs"));
        }
        if cpus.len() != config.num_cpus {
            return Err(RunnerError::BadConfiguration(
                "MachineConfig::num_cpus does not match the number of CpuStates supplied",
            ));
        }
        Ok(Self {
            cpus,
            config,
            total_instructions: 0,
            stats_counter: 0,
        })
    }

    pub fn cpus(&self) -> &[CpuState<I>] {
        &self.cpus
    }

    pub fn cpus_mut(&mut self) -> &mut [CpuState<I>] {
        &mut self.cpus
    }

    pub fn total_instructions(&self) -> u64 {
        self.total_instructions
    }

    fn any_running(&self) -> bool {
        self.cpus.iter().any(|c| !c.halted)
    }

    /// Runs until `max_instructions` is reached, every CPU halts, or
    /// `should_stop` returns true at a chunk boundary (a user-requested
    /// quit is only honored between chunks, never mid-chunk). On exit,
    /// CPU 0's tick callbacks are advanced by zero cycles twice more so
    /// any trailing device state (e.g. a framebuffer) gets its last
    /// flush.
    pub fn run(&mut self, mut should_stop: impl FnMut() -> bool) {
        let mut fired = Vec::new();

        while self.any_running() && self.total_instructions < self.config.max_instructions {
            if should_stop() {
                break;
            }

            let chunk_budget = self.config.max_instructions - self.total_instructions;
            let chunk_end = CHUNK_CYCLES.min(chunk_budget);
            let mut cpu0_executed: u64 = 0;

            for (idx, cpu) in self.cpus.iter_mut().enumerate() {
                if cpu.halted {
                    continue;
                }

                if self.config.single_step {
                    let n = run_instr(cpu, 1) as u64;
                    if idx == 0 {
                        cpu0_executed += n;
                    }
                    self.total_instructions += n;
                    continue;
                }

                let a_few = cpu.ticks.a_few_cycles().max(1) as u64;
                let budget = a_few
                    .saturating_mul(self.config.tick_unroll_factor.max(1) as u64)
                    .min(chunk_end);
                let mut done = 0u64;
                while done < budget && !cpu.halted {
                    // Cap this call at the chunk's remaining budget so the
                    // dispatch loop's own unrolled batch can never retire
                    // more instructions than the runner accounted for.
                    let remaining = (budget - done).min(u32::MAX as u64) as u32;
                    let n = run_instr(cpu, remaining) as u64;
                    if n == 0 {
                        break;
                    }
                    done += n;
                }
                if idx == 0 {
                    cpu0_executed += done;
                }
                self.total_instructions += done;
            }

            // Only CPU 0's ticks drive hardware timer interrupts,
            // framebuffer refresh, etc.
            if let Some(cpu0) = self.cpus.get_mut(0) {
                cpu0.ticks.advance(cpu0_executed as i64, &mut fired);
            }

            self.stats_counter += cpu0_executed.max(1);
            if self.stats_counter >= STATS_INTERVAL {
                info!(
                    "{} instructions executed across {} CPU(s)",
                    self.total_instructions,
                    self.cpus.len()
                );
                self.stats_counter = 0;
            }
        }

        if let Some(cpu0) = self.cpus.get_mut(0) {
            cpu0.ticks.advance(0, &mut fired);
            cpu0.ticks.advance(0, &mut fired);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gxemul_cpu::{end_of_page, end_of_page2, to_be_translated, GuestVph};
    use gxemul_memory::{AccessFlags, Memory};
    use gxemul_vph::{InstrCall, TranslationCache, Vph32};
    use mips_lite::{MipsLite, VEC_TLB_REFILL};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn one_cpu() -> CpuState<MipsLite> {
        // Large enough to cover the MIPS boot vector (0xBFC0_0000) that
        // `stops_at_max_instructions` below writes its program at, as
        // well as every other in-module test's addresses.
        let mem = Rc::new(RefCell::new(Memory::new(12, 0x00, 0xC000_0000, 1, 6)));
        let vph = GuestVph::ThirtyTwo(Vph32::new(12, 8, 0x1000));
        let cache = TranslationCache::new(
            1,
            6,
            12,
            1024,
            InstrCall::new(to_be_translated::<MipsLite>, [0; 3]),
            vec![
                InstrCall::new(end_of_page::<MipsLite>, [0; 3]),
                InstrCall::new(end_of_page2::<MipsLite>, [0; 3]),
            ],
        );
        CpuState::new(0, vph, cache, mem)
    }

    #[test]
    fn rejects_cpu_count_mismatch() {
        let cfg = MachineConfig {
            num_cpus: 2,
            ..MachineConfig::default()
        };
        let result = Runner::new(cfg, vec![one_cpu()]);
        assert!(result.is_err());
    }

    #[test]
    fn halted_cpu_stops_the_run_immediately() {
        let mut cpu = one_cpu();
        cpu.halted = true;
        let cfg = MachineConfig {
            num_cpus: 1,
            ..MachineConfig::default()
        };
        let mut runner = Runner::new(cfg, vec![cpu]).unwrap();
        runner.run(|| false);
        assert_eq!(runner.total_instructions(), 0);
    }

    #[test]
    fn stops_at_max_instructions() {
        let mut cpu = one_cpu();
        MipsLite::map_identity(&mut cpu, 0xBFC0_0000u64 >> 12, 0xBFC0_0000u64 >> 12, true);
        cpu.pc = 0xBFC0_0000;

        // Two harmless `lui` instructions so fetch/decode never faults.
        let lui = |rt: u32, imm: u16| -> u32 { (0x0F << 26) | (rt << 16) | imm as u32 };
        for (i, word) in [lui(2, 1), lui(2, 2)].iter().enumerate() {
            let mut buf = word.to_le_bytes();
            cpu.memory_rw(
                0xBFC0_0000 + (i as u64) * 4,
                &mut buf,
                gxemul_memory::AccessFlags::WRITE | gxemul_memory::AccessFlags::PHYSICAL,
            )
            .unwrap();
        }

        let cfg = MachineConfig {
            num_cpus: 1,
            max_instructions: 2,
            ..MachineConfig::default()
        };
        let mut runner = Runner::new(cfg, vec![cpu]).unwrap();
        runner.run(|| false);
        assert_eq!(runner.total_instructions(), 2);
    }

    fn mapped_cpu(pages: &[u64]) -> CpuState<MipsLite> {
        let mut cpu = one_cpu();
        for &p in pages {
            MipsLite::map_identity(&mut cpu, p >> 12, p >> 12, true);
        }
        cpu
    }

    fn write_program(cpu: &mut CpuState<MipsLite>, base: u64, words: &[u32]) {
        for (i, word) in words.iter().enumerate() {
            let mut buf = word.to_le_bytes();
            cpu.memory_rw(base + (i as u64) * 4, &mut buf, AccessFlags::WRITE | AccessFlags::PHYSICAL)
                .unwrap();
        }
    }

    fn encode_lui(rt: u32, imm: u16) -> u32 {
        (0x0F << 26) | (rt << 16) | imm as u32
    }
    fn encode_ori(rt: u32, rs: u32, imm: u16) -> u32 {
        (0x0D << 26) | (rs << 21) | (rt << 16) | imm as u32
    }
    fn encode_addiu(rt: u32, rs: u32, imm: u16) -> u32 {
        (0x09 << 26) | (rs << 21) | (rt << 16) | imm as u32
    }
    fn encode_sw(rt: u32, rs: u32, imm: u16) -> u32 {
        (0x2B << 26) | (rs << 21) | (rt << 16) | imm as u32
    }
    fn encode_lw(rt: u32, rs: u32, imm: u16) -> u32 {
        (0x23 << 26) | (rs << 21) | (rt << 16) | imm as u32
    }
    fn encode_beq(rs: u32, rt: u32, imm: u16) -> u32 {
        (0x04 << 26) | (rs << 21) | (rt << 16) | imm as u32
    }
    fn encode_beql(rs: u32, rt: u32, imm: u16) -> u32 {
        (0x14 << 26) | (rs << 21) | (rt << 16) | imm as u32
    }
    fn encode_bne(rs: u32, rt: u32, imm: u16) -> u32 {
        (0x05 << 26) | (rs << 21) | (rt << 16) | imm as u32
    }

    /// `lui r2,1; ori r2,r2,0x2345; sw r2,0(r3); lw r4,0(r3)` round-trips
    /// 0x1_2345 through guest memory.
    #[test]
    fn scenario1_lui_ori_sw_lw_round_trips_through_memory() {
        let mut cpu = mapped_cpu(&[0x1000, 0x2000]);
        cpu.pc = 0x1000;
        cpu.regs.gpr_write(3, 0x2000);

        write_program(
            &mut cpu,
            0x1000,
            &[
                encode_lui(2, 1),
                encode_ori(2, 2, 0x2345),
                encode_sw(2, 3, 0),
                encode_lw(4, 3, 0),
            ],
        );

        let cfg = MachineConfig {
            num_cpus: 1,
            max_instructions: 4,
            ..MachineConfig::default()
        };
        let mut runner = Runner::new(cfg, vec![cpu]).unwrap();
        runner.run(|| false);

        assert_eq!(runner.total_instructions(), 4);
        assert_eq!(runner.cpus()[0].regs.gpr_read(4), 0x1_2345);
    }

    /// A load with no matching TLB entry delivers a TLB-miss exception
    /// to the refill vector, with BadVAddr/EPC set from the faulting
    /// load itself (no delay slot here, so no `-4` adjustment).
    #[test]
    fn scenario2_unmapped_load_delivers_tlb_miss_to_the_refill_vector() {
        let mut cpu = mapped_cpu(&[0x1000]);
        cpu.pc = 0x1000;
        cpu.single_step = true; // stop right after the one faulting fetch
        cpu.regs.gpr_write(5, 0x9000); // never mapped

        write_program(&mut cpu, 0x1000, &[encode_lw(6, 5, 0)]);

        run_instr(&mut cpu, u32::MAX);

        assert_eq!(cpu.pc, VEC_TLB_REFILL);
        assert_eq!(cpu.regs.badvaddr, 0x9000);
        assert_eq!(cpu.regs.epc, 0x1000);
        assert_eq!((cpu.regs.cause >> 2) & 0x1F, 2); // TLBL
    }

    /// The nullify invariant: a not-taken `beql`'s delay slot is skipped
    /// outright, never reaching the handler that would otherwise mutate
    /// guest state.
    #[test]
    fn beql_not_taken_nullifies_its_delay_slot() {
        let mut cpu = mapped_cpu(&[0x1000]);
        cpu.pc = 0x1000;
        cpu.single_step = true;
        cpu.regs.gpr_write(1, 5);
        cpu.regs.gpr_write(2, 6); // r1 != r2: not taken

        write_program(
            &mut cpu,
            0x1000,
            &[
                encode_beql(1, 2, 0),
                encode_addiu(6, 0, 99), // delay slot: must never run
                encode_addiu(7, 0, 1),
            ],
        );

        for _ in 0..3 {
            run_instr(&mut cpu, u32::MAX);
        }

        assert_eq!(cpu.regs.gpr_read(6), 0);
        assert_eq!(cpu.regs.gpr_read(7), 1);
    }

    /// The delay-slot fault invariant: a fault taken while executing a
    /// delay slot reports EPC as the branch instruction's own address,
    /// with Cause.BD set, not the delay slot's address.
    #[test]
    fn fault_in_a_delay_slot_reports_epc_as_the_branch_address() {
        let mut cpu = mapped_cpu(&[0x1000]);
        cpu.pc = 0x1000;
        cpu.single_step = true;
        cpu.regs.gpr_write(9, 0x9000); // unmapped: the delay slot's load faults

        write_program(
            &mut cpu,
            0x1000,
            &[
                encode_beq(0, 0, 0), // always taken (r0 == r0)
                encode_lw(5, 9, 0),  // delay slot, always executes, faults
            ],
        );

        run_instr(&mut cpu, u32::MAX); // the beq itself
        run_instr(&mut cpu, u32::MAX); // the delay slot, faulting mid-flight

        assert_eq!(cpu.regs.epc, 0x1000);
        assert_ne!(cpu.regs.cause & (1 << 31), 0); // Cause.BD
        assert_eq!(cpu.pc, VEC_TLB_REFILL);
    }

    /// spec.md §8 scenario 5: a `DYNTRANS_OK` device is read through the
    /// dispatch loop's normal `lw` path twice without an intervening
    /// write — the second read must not re-enter the device handler — and
    /// a `sw` in between forces the next read to do so.
    #[test]
    fn scenario5_device_read_is_cached_across_dispatch_steps_until_a_store() {
        use gxemul_memory::flags::DeviceFlags;
        use gxemul_memory::DeviceHandler;
        use std::cell::Cell;
        use std::rc::Rc as StdRc;

        struct Counting {
            backing: Vec<u8>,
            calls: StdRc<Cell<u32>>,
        }
        impl DeviceHandler for Counting {
            fn access(
                &mut self,
                off: u64,
                buf: &mut [u8],
                flags: AccessFlags,
            ) -> core::result::Result<u32, ()> {
                self.calls.set(self.calls.get() + 1);
                let off = off as usize;
                if flags.is_write() {
                    self.backing[off..off + buf.len()].copy_from_slice(buf);
                } else {
                    buf.copy_from_slice(&self.backing[off..off + buf.len()]);
                }
                Ok(1)
            }
        }

        let mut cpu = mapped_cpu(&[0x1000, 0x3000]);
        cpu.pc = 0x1000;
        cpu.regs.gpr_write(3, 0x3000);
        cpu.regs.gpr_write(7, 0xAA55); // value the later sw stores

        let calls = StdRc::new(Cell::new(0u32));
        cpu.mem
            .borrow_mut()
            .devices()
            .register(
                0x3000,
                0x1000,
                DeviceFlags::DYNTRANS_OK | DeviceFlags::DYNTRANS_WRITE_OK,
                Box::new(Counting {
                    backing: vec![0u8; 0x1000],
                    calls: calls.clone(),
                }),
            )
            .unwrap();

        write_program(
            &mut cpu,
            0x1000,
            &[
                encode_lw(4, 3, 0),
                encode_lw(5, 3, 0),
                encode_sw(7, 3, 0),
                encode_lw(6, 3, 0),
            ],
        );

        cpu.single_step = true;
        run_instr(&mut cpu, u32::MAX); // lw r4: first read, fills the cache
        assert_eq!(calls.get(), 1);
        run_instr(&mut cpu, u32::MAX); // lw r5: served from the cache
        assert_eq!(calls.get(), 1);
        run_instr(&mut cpu, u32::MAX); // sw: re-enters the device and drops the cache
        assert_eq!(calls.get(), 2);
        run_instr(&mut cpu, u32::MAX); // lw r6: cache miss, re-enters the device
        assert_eq!(calls.get(), 3);
        assert_eq!(cpu.regs.gpr_read(6), 0xAA55);
    }
}
