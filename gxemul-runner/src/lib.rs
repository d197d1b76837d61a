//! The top-level runner (§4.8): drives a machine's CPUs via round-robin
//! chunking until `max_instructions`, every CPU halting, or an external
//! stop request ends the run. A thin library on top of `gxemul-cpu`; all
//! ISA-specific behaviour stays behind [`gxemul_cpu::Isa`].

mod config;
mod error;
mod logger;
mod runner;

pub use config::MachineConfig;
pub use error::{Result, RunnerError};
pub use logger::install_default_logger;
pub use runner::Runner;
