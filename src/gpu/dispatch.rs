// gpu/dispatch.rs — work sizing, kernel submission and timed runs.
//
// WORK SIZING
// ───────────
// The local (work-group) size L is fixed. The global size G is n rounded up
// to the next multiple of L, so every element has a work item:
//
//   G = ceil(n / L) * L        G >= n,  G % L == 0,  G < n + L
//
// The kernel guards the tail itself (`if i >= n { return; }`).
//
// 2-D GRID
// ────────
// wgpu caps the number of work groups per dimension
// (`max_compute_workgroups_per_dimension`, usually 65535). A full-size run
// needs 100_000_000 / 128 = 781_250 groups, so the groups are laid out on a
// 2-D grid and the kernel linearises:
//
//   i = gid.y * (num_workgroups.x * L) + gid.x
//
// The grid may launch a few more groups than G / L; those fall in the tail
// and are discarded by the same bounds check.
//
// SYNCHRONISATION
// ───────────────
// `SyncPolicy::PerIteration` waits for each dispatch before recording its
// lap, giving independent back-to-back samples. `SyncPolicy::Batched`
// submits all iterations and waits once; every sample is the mean.

use std::fmt;
use std::time::Instant;

use crate::config::SyncPolicy;
use crate::error::{HarnessError, Result, RuntimeFailure, Status};
use crate::gpu::context::{capture, CommandQueue};
use crate::gpu::kernel::Kernel;
use crate::timer::{Timer, TimingStats};

const GIB: f64 = (1u64 << 30) as f64;

#[track_caller]
fn dispatch_error(op: &'static str, status: Status, detail: impl Into<String>) -> HarnessError {
    HarnessError::Dispatch(RuntimeFailure::new(op, status, detail))
}

// ---------------------------------------------------------------------------
// WorkSize
// ---------------------------------------------------------------------------

/// Global and local work sizes for a 1-D launch over `n` elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkSize {
    pub n: usize,
    pub local: u32,
    pub global: u64,
}

impl WorkSize {
    /// Round `n` up to a multiple of `local`.
    pub fn new(n: usize, local: u32) -> Result<Self> {
        if local == 0 {
            return Err(dispatch_error("work_size", Status::InvalidValue, "local size must be positive"));
        }
        let l = u64::from(local);
        let global = (n as u64).div_ceil(l) * l;
        Ok(WorkSize { n, local, global })
    }

    /// Number of work groups, G / L.
    pub fn groups(&self) -> u64 {
        self.global / u64::from(self.local)
    }

    /// Lay the work groups out on an `(x, y)` grid with at most
    /// `max_per_dim` groups per dimension.
    ///
    /// # Errors
    /// `Dispatch` if even a square grid cannot hold all groups.
    pub fn grid(&self, max_per_dim: u32) -> Result<(u32, u32)> {
        let groups = self.groups();
        if groups == 0 {
            return Ok((0, 0));
        }
        let max = u64::from(max_per_dim.max(1));
        let x = groups.min(max);
        let y = groups.div_ceil(x);
        if y > max {
            return Err(dispatch_error(
                "dispatch_workgroups",
                Status::OutOfResources,
                format!("{groups} work groups exceed a {max}x{max} grid"),
            ));
        }
        Ok((x as u32, y as u32))
    }
}

impl fmt::Display for WorkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "global {} / local {} (n = {})", self.global, self.local, self.n)
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// A submitted dispatch that has not been waited on yet.
#[must_use = "a dispatch is only complete after wait()"]
pub struct Completion<'q> {
    queue: &'q CommandQueue,
    index: wgpu::SubmissionIndex,
}

impl Completion<'_> {
    /// Block until the dispatch has finished on the device.
    pub fn wait(self) {
        self.queue.wait_for(self.index);
    }
}

/// Submit one launch of `kernel` over `work`.
///
/// # Errors
/// - `ArgumentBinding` if an argument is unbound.
/// - `Dispatch` if the local size disagrees with the kernel's declared
///   work-group size, the grid does not fit the device, or the device
///   rejects the submission.
pub fn dispatch<'q>(queue: &'q CommandQueue, kernel: &mut Kernel<'_>, work: WorkSize) -> Result<Completion<'q>> {
    if kernel.local_size() != work.local {
        return Err(dispatch_error(
            "dispatch_workgroups",
            Status::InvalidValue,
            format!(
                "kernel {} declares work-group size {}, launch uses {}",
                kernel.name,
                kernel.local_size(),
                work.local
            ),
        ));
    }

    kernel.prepare()?;
    let device = kernel.device();
    let (x, y) = work.grid(device.limits().max_compute_workgroups_per_dimension)?;
    let bind_group = kernel.bind_group()?;

    let (index, err) = capture(device, || {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("kernel dispatch"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.name.as_str()),
                timestamp_writes: None,
            });
            pass.set_pipeline(kernel.pipeline());
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(x, y, 1);
        }
        queue.queue.submit(std::iter::once(encoder.finish()))
    });
    if let Some(e) = err {
        return Err(dispatch_error("dispatch_workgroups", Status::from(&e), e.to_string()));
    }

    Ok(Completion { queue, index })
}

/// Run `kernel` `iterations` times and return one timing sample per run.
pub fn run_timed(
    queue: &CommandQueue,
    kernel: &mut Kernel<'_>,
    work: WorkSize,
    iterations: usize,
    policy: SyncPolicy,
) -> Result<TimingStats> {
    log::debug!("timing {} x{iterations} ({policy}), {work}", kernel.name);
    let mut timer = Timer::new();

    match policy {
        SyncPolicy::PerIteration => {
            for _ in 0..iterations {
                dispatch(queue, kernel, work)?.wait();
                timer.next_lap();
            }
        }
        SyncPolicy::Batched => {
            let start = Instant::now();
            let mut last = None;
            for _ in 0..iterations {
                last = Some(dispatch(queue, kernel, work)?);
            }
            if let Some(completion) = last {
                completion.wait();
            }
            if iterations > 0 {
                let each = start.elapsed().div_f64(iterations as f64);
                for _ in 0..iterations {
                    timer.push_lap(each);
                }
            }
        }
    }

    Ok(timer.stats())
}

// ---------------------------------------------------------------------------
// Throughput
// ---------------------------------------------------------------------------

/// Derived kernel throughput.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    /// Billions of additions per second.
    pub gflops: f64,
    /// Device memory traffic (two reads, one write per element) in GiB/s.
    pub bandwidth_gib: f64,
}

impl Throughput {
    pub fn from_stats(n: usize, stats: &TimingStats) -> Self {
        if stats.mean <= 0.0 {
            return Throughput { gflops: 0.0, bandwidth_gib: 0.0 };
        }
        let bytes = 3.0 * n as f64 * std::mem::size_of::<f32>() as f64;
        Throughput {
            gflops: n as f64 / stats.mean / 1e9,
            bandwidth_gib: bytes / stats.mean / GIB,
        }
    }
}

/// Transfer bandwidth in GiB/s for moving `bytes` in `stats.mean` seconds.
pub fn transfer_bandwidth_gib(bytes: u64, stats: &TimingStats) -> f64 {
    if stats.mean <= 0.0 {
        return 0.0;
    }
    bytes as f64 / stats.mean / GIB
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_size_rounds_up() {
        let w = WorkSize::new(1000, 128).unwrap();
        assert_eq!(w.global, 1024);
        assert_eq!(w.groups(), 8);

        let exact = WorkSize::new(1024, 128).unwrap();
        assert_eq!(exact.global, 1024);

        let one = WorkSize::new(1, 128).unwrap();
        assert_eq!(one.global, 128);
    }

    #[test]
    fn zero_local_size_is_rejected() {
        assert!(matches!(WorkSize::new(16, 0), Err(HarnessError::Dispatch(_))));
    }

    #[test]
    fn reference_run_needs_a_2d_grid() {
        let w = WorkSize::new(100_000_000, 128).unwrap();
        assert_eq!(w.groups(), 781_250);
        let (x, y) = w.grid(65_535).unwrap();
        assert_eq!(x, 65_535);
        assert_eq!(y, 12);
        assert!(u64::from(x) * u64::from(y) >= w.groups());
    }

    #[test]
    fn small_runs_use_a_single_row() {
        let w = WorkSize::new(16, 128).unwrap();
        assert_eq!(w.grid(65_535).unwrap(), (1, 1));
        assert_eq!(WorkSize::new(0, 128).unwrap().grid(65_535).unwrap(), (0, 0));
    }

    #[test]
    fn grid_overflow_is_a_dispatch_error() {
        let w = WorkSize::new(1 << 20, 1).unwrap();
        assert!(matches!(w.grid(16), Err(HarnessError::Dispatch(_))));
    }

    #[test]
    fn throughput_math() {
        let stats = TimingStats { mean: 0.01, stddev: 0.0, samples: 20 };
        let t = Throughput::from_stats(100_000_000, &stats);
        assert!((t.gflops - 10.0).abs() < 1e-9);
        let expected_bw = 1.2e9 / 0.01 / GIB;
        assert!((t.bandwidth_gib - expected_bw).abs() < 1e-9);

        let bw = transfer_bandwidth_gib(1 << 30, &TimingStats { mean: 0.5, stddev: 0.0, samples: 1 });
        assert!((bw - 2.0).abs() < 1e-12);
    }

    #[test]
    fn zero_mean_gives_zero_throughput() {
        let stats = TimingStats::from_secs(&[]);
        assert_eq!(Throughput::from_stats(16, &stats).gflops, 0.0);
        assert_eq!(transfer_bandwidth_gib(64, &stats), 0.0);
    }
}
