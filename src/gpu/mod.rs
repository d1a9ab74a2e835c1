// gpu/mod.rs — device-side orchestration on wgpu.
//
// Components, in the order the harness uses them:
//
//   device    platform enumeration and GPU-preferred device selection
//   context   logical device + its single command queue
//   buffer    device buffers and blocking host↔device transfers
//   program   kernel source, build options, compilation with build log
//   kernel    entry point lookup and positional argument binding
//   dispatch  work sizing, submission and timed runs
//
// The CPU reference in `verify` stays authoritative: every device result is
// checked against it element by element.

pub mod buffer;
pub mod context;
pub mod device;
pub mod dispatch;
pub mod kernel;
pub mod program;
