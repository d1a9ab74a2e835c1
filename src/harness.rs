// harness.rs — the end-to-end a+b benchmark.
//
// Strictly linear, one stage at a time:
//
//   resolve device → context + queue → buffers → build program
//     → bind kernel → timed dispatches → timed readbacks → verify
//
// Console lines go to the caller's writer as each stage completes, so a
// failure leaves the lines of every stage that did succeed. Diagnostics go
// through `log`.
//
// Every handle is a local declared in acquisition order. Rust drops locals
// in reverse, so kernel, program, buffers, queue and context are released in
// that order whether `execute` returns normally or through `?`.

use std::io::Write;

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::gpu::buffer::{self, AccessMode};
use crate::gpu::context::Context;
use crate::gpu::device::{self, AdapterInfo, DeviceKind};
use crate::gpu::dispatch::{self, Throughput, WorkSize};
use crate::gpu::kernel::{Kernel, KernelArg};
use crate::gpu::program::{BuildOptions, KernelSource, Program};
use crate::random::FastRandom;
use crate::timer::{Timer, TimingStats};
use crate::verify::{self, Verified};

/// Entry point the kernel resource must export.
pub const KERNEL_NAME: &str = "aplusb";

/// Measurements and outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub platform_count: usize,
    pub kind: DeviceKind,
    pub adapter: AdapterInfo,
    pub work: WorkSize,
    pub kernel: TimingStats,
    pub throughput: Throughput,
    pub transfer: TimingStats,
    pub transfer_bandwidth_gib: f64,
    pub verified: Verified,
}

/// Run the benchmark with the kernel resource at `config.kernel_path`.
pub fn run<W: Write>(config: &HarnessConfig, out: &mut W) -> Result<RunReport> {
    execute(config, || KernelSource::load(&config.kernel_path), out)
}

/// Run the benchmark with an already loaded kernel source.
pub fn run_with_source<W: Write>(
    config: &HarnessConfig,
    source: KernelSource,
    out: &mut W,
) -> Result<RunReport> {
    execute(config, move || Ok(source), out)
}

fn execute<W: Write>(
    config: &HarnessConfig,
    load_source: impl FnOnce() -> Result<KernelSource>,
    out: &mut W,
) -> Result<RunReport> {
    config.validate()?;
    let n = config.n;

    // --- Device resolution ---
    let instance = device::create_instance(config.backends);
    let platforms = device::enumerate_platforms(&instance, config.backends);
    let platform_count = platforms.len();
    writeln!(out, "Number of platforms: {platform_count}")?;

    let resolution = match device::resolve(platforms) {
        Ok(r) => r,
        Err(err) => {
            match &err {
                HarnessError::NoPlatform => writeln!(out, "Platforms not found")?,
                HarnessError::NoDevice { .. } => writeln!(out, "GPU and CPU devices not found")?,
                _ => {}
            }
            return Err(err);
        }
    };
    if !resolution.gpu_found {
        writeln!(out, "GPU devices not found")?;
    }

    // --- Context and queue ---
    let mut context = Context::create(instance, resolution.device)?;
    let queue = context.create_queue()?;
    writeln!(
        out,
        "Using {} device on {}: {}",
        resolution.kind, resolution.platform_name, context.adapter_info
    )?;

    // --- Host data ---
    let mut rng = FastRandom::new(config.seed);
    let mut a = Vec::with_capacity(n);
    let mut b = Vec::with_capacity(n);
    for _ in 0..n {
        a.push(rng.next_f32());
        b.push(rng.next_f32());
    }
    let mut c = vec![0.0f32; n];
    writeln!(out, "Data generated for n={n}!")?;

    // --- Buffers ---
    let bytes = config.buffer_bytes();
    let a_buf = buffer::allocate(&context, bytes, AccessMode::ReadOnly)?;
    buffer::write_buffer(&queue, &a_buf, &a, true)?;
    let b_buf = buffer::allocate(&context, bytes, AccessMode::ReadOnly)?;
    buffer::write_buffer(&queue, &b_buf, &b, true)?;
    let c_buf = buffer::allocate(&context, bytes, AccessMode::WriteOnly)?;
    writeln!(out, "Buffers successfully created")?;

    // --- Program ---
    let source = load_source()?;
    let program = Program::build(&context, &source, &BuildOptions::for_local_size(config.local_size))?;

    // --- Kernel ---
    let mut kernel = Kernel::create(&context, &program, KERNEL_NAME)?;
    kernel.set_arg(0, KernelArg::Buffer(&a_buf))?;
    kernel.set_arg(1, KernelArg::Buffer(&b_buf))?;
    kernel.set_arg(2, KernelArg::Buffer(&c_buf))?;
    kernel.set_count_arg(3, n)?;

    let work = WorkSize::new(n, config.local_size)?;
    let kernel_stats = dispatch::run_timed(&queue, &mut kernel, work, config.iterations, config.sync)?;
    let throughput = Throughput::from_stats(n, &kernel_stats);
    writeln!(out, "Kernel average time: {}+-{} s", kernel_stats.mean, kernel_stats.stddev)?;
    writeln!(out, "GFlops: {}", throughput.gflops)?;
    writeln!(out, "VRAM bandwidth: {} GB/s", throughput.bandwidth_gib)?;

    // --- Readback ---
    let mut timer = Timer::new();
    for _ in 0..config.iterations {
        buffer::read_buffer(&queue, &c_buf, &mut c)?;
        timer.next_lap();
    }
    let transfer = timer.stats();
    let transfer_bandwidth_gib = dispatch::transfer_bandwidth_gib(bytes, &transfer);
    writeln!(out, "Result data transfer time: {}+-{} s", transfer.mean, transfer.stddev)?;
    writeln!(out, "VRAM -> RAM bw: {transfer_bandwidth_gib} GB/s")?;

    // --- Verification ---
    let verified = verify::verify(&a, &b, &c)?;
    writeln!(out, "Results verified: {} elements match", verified.checked)?;

    Ok(RunReport {
        platform_count,
        kind: resolution.kind,
        adapter: context.adapter_info.clone(),
        work,
        kernel: kernel_stats,
        throughput,
        transfer,
        transfer_bandwidth_gib,
        verified,
    })
}
