//! Machine configuration (§10.3): the only configuration surface this
//! workspace exposes. No flag parsing, no machine templates, no ELF
//! loading — those are out of scope (spec §1) — a caller builds one of
//! these directly, the same way `hypervisor::vm::Vm::new()` takes no
//! parser and is wired up by its own caller.

/// Settings for one emulated machine, shared by every CPU in it.
#[derive(Clone, Copy, Debug)]
pub struct MachineConfig {
    /// Number of CPUs to emulate.
    pub num_cpus: usize,
    /// Per-CPU translation cache size, in MiB.
    pub cache_size_mib: usize,
    /// Multiplies `TickScheduler::a_few_cycles()` to get the per-chunk,
    /// per-CPU instruction budget (§4.8 step 2's `instrs_per_cycle`).
    pub tick_unroll_factor: u32,
    /// Upper bound on the total number of guest instructions retired
    /// across every CPU before [`crate::Runner::run`] stops on its own.
    pub max_instructions: u64,
    /// When set, each CPU executes exactly one instruction per chunk
    /// instead of a full batch (§4.8 step 2's single-stepping branch).
    pub single_step: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            num_cpus: 1,
            cache_size_mib: 4,
            tick_unroll_factor: 1,
            max_instructions: u64::MAX,
            single_step: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_single_cpu_unbounded() {
        let cfg = MachineConfig::default();
        assert_eq!(cfg.num_cpus, 1);
        assert!(!cfg.single_step);
    }
}
