// aplusb-harness: host-side orchestration for an elementwise a+b kernel.
//
// Resolves a compute device, moves two input vectors to it, builds and
// dispatches the kernel repeatedly for timing, reads the result back and
// checks it against the CPU reference.
//
// The CPU-side pieces live at the crate root; everything that talks to the
// device lives under `gpu`.

pub mod config;
pub mod error;
pub mod harness;
pub mod random;
pub mod timer;
pub mod verify;

pub mod gpu;

pub use config::{HarnessConfig, SyncPolicy};
pub use error::{HarnessError, Result};
pub use harness::{run, run_with_source, RunReport};
