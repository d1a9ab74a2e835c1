// config.rs — run configuration.
//
// The element count `n` is an explicit value threaded through every stage,
// so the same pipeline runs with n = 100M from the command line and n = 16
// in tests.

use std::fmt;
use std::path::PathBuf;

use crate::error::{HarnessError, Result};

/// Default element count for a benchmark run.
pub const DEFAULT_N: usize = 100_000_000;
/// Default number of timed iterations per measurement.
pub const DEFAULT_ITERATIONS: usize = 20;
/// Default work-group size.
pub const DEFAULT_LOCAL_SIZE: u32 = 128;
/// Default location of the kernel resource, relative to the working directory.
pub const DEFAULT_KERNEL_PATH: &str = "src/shaders/aplusb.wgsl";

/// How dispatches are synchronised during a timed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// Submit, wait, record a lap. One independent sample per iteration.
    #[default]
    PerIteration,
    /// Submit every iteration, wait once on the last one. The total time is
    /// split evenly across the samples, so the standard deviation is zero.
    Batched,
}

impl fmt::Display for SyncPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPolicy::PerIteration => write!(f, "per-iteration"),
            SyncPolicy::Batched => write!(f, "batched"),
        }
    }
}

impl std::str::FromStr for SyncPolicy {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per-iteration" | "blocking" => Ok(SyncPolicy::PerIteration),
            "batched" | "pipelined" => Ok(SyncPolicy::Batched),
            other => Err(HarnessError::Config(format!(
                "unknown sync policy '{other}' (expected per-iteration|batched)"
            ))),
        }
    }
}

/// Full configuration of one harness run.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub n: usize,
    pub iterations: usize,
    pub local_size: u32,
    pub kernel_path: PathBuf,
    pub seed: u64,
    pub sync: SyncPolicy,
    pub backends: wgpu::Backends,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            n: DEFAULT_N,
            iterations: DEFAULT_ITERATIONS,
            local_size: DEFAULT_LOCAL_SIZE,
            kernel_path: PathBuf::from(DEFAULT_KERNEL_PATH),
            seed: DEFAULT_N as u64,
            sync: SyncPolicy::PerIteration,
            backends: wgpu::Backends::all(),
        }
    }
}

impl HarnessConfig {
    /// Default configuration for `n` elements, seeded with `n` like the
    /// reference run.
    pub fn with_n(n: usize) -> Self {
        HarnessConfig { n, seed: n as u64, ..Default::default() }
    }

    /// Reject values no run can succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.n == 0 {
            return Err(HarnessError::Config("element count must be positive".into()));
        }
        if u32::try_from(self.n).is_err() {
            return Err(HarnessError::Config(format!(
                "element count {} does not fit the kernel's u32 count argument",
                self.n
            )));
        }
        if self.iterations == 0 {
            return Err(HarnessError::Config("iterations must be positive".into()));
        }
        if self.local_size == 0 {
            return Err(HarnessError::Config("local size must be positive".into()));
        }
        if self.backends.is_empty() {
            return Err(HarnessError::Config("no backends enabled".into()));
        }
        Ok(())
    }

    /// Size in bytes of each of the three buffers.
    pub fn buffer_bytes(&self) -> u64 {
        (self.n * std::mem::size_of::<f32>()) as u64
    }
}

/// Parse a comma-separated backend list such as `vulkan,metal` or `all`.
pub fn parse_backends(list: &str) -> Result<wgpu::Backends> {
    let mut backends = wgpu::Backends::empty();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        backends |= match name.to_ascii_lowercase().as_str() {
            "all" => wgpu::Backends::all(),
            "primary" => wgpu::Backends::PRIMARY,
            "vulkan" | "vk" => wgpu::Backends::VULKAN,
            "metal" | "mtl" => wgpu::Backends::METAL,
            "dx12" | "d3d12" => wgpu::Backends::DX12,
            "gl" | "gles" | "opengl" => wgpu::Backends::GL,
            other => {
                return Err(HarnessError::Config(format!("unknown backend '{other}'")));
            }
        };
    }
    if backends.is_empty() {
        return Err(HarnessError::Config(format!("empty backend list '{list}'")));
    }
    Ok(backends)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_run() {
        let c = HarnessConfig::default();
        assert_eq!(c.n, 100_000_000);
        assert_eq!(c.iterations, 20);
        assert_eq!(c.local_size, 128);
        assert_eq!(c.sync, SyncPolicy::PerIteration);
        assert!(c.validate().is_ok());
        assert_eq!(c.buffer_bytes(), 400_000_000);
    }

    #[test]
    fn validate_rejects_zero_n_and_zero_iterations() {
        assert!(matches!(HarnessConfig::with_n(0).validate(), Err(HarnessError::Config(_))));
        let c = HarnessConfig { iterations: 0, ..HarnessConfig::with_n(16) };
        assert!(matches!(c.validate(), Err(HarnessError::Config(_))));
        let c = HarnessConfig { local_size: 0, ..HarnessConfig::with_n(16) };
        assert!(c.validate().is_err());
    }

    #[test]
    fn parse_backends_accepts_lists() {
        let b = parse_backends("vulkan, metal").unwrap();
        assert!(b.contains(wgpu::Backends::VULKAN));
        assert!(b.contains(wgpu::Backends::METAL));
        assert!(!b.contains(wgpu::Backends::DX12));
        assert_eq!(parse_backends("all").unwrap(), wgpu::Backends::all());
        assert!(parse_backends("cuda").is_err());
        assert!(parse_backends(" , ").is_err());
    }

    #[test]
    fn sync_policy_parses() {
        assert_eq!("batched".parse::<SyncPolicy>().unwrap(), SyncPolicy::Batched);
        assert_eq!("Per-Iteration".parse::<SyncPolicy>().unwrap(), SyncPolicy::PerIteration);
        assert!("eventually".parse::<SyncPolicy>().is_err());
    }
}
