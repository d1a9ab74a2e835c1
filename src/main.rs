// main.rs — `aplusb` command-line benchmark.
//
// USAGE
//   cargo run --release
//   cargo run --release -- --n 16 --iterations 3 --backends vulkan
//   RUST_LOG=debug cargo run --release -- --sync batched
//
// Exit status: 0 on success, 1 when no platform or device is found, 2 on
// any other fatal error.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use aplusb_harness::config::{self, HarnessConfig, SyncPolicy};
use aplusb_harness::harness;

/// Benchmark and validate an elementwise a+b kernel on a compute device.
#[derive(Parser, Debug)]
#[command(name = "aplusb", version, about, long_about = None)]
struct Cli {
    /// Number of f32 elements per vector
    #[arg(short, long, default_value_t = config::DEFAULT_N)]
    n: usize,

    /// Timed iterations for the kernel and for the readback
    #[arg(short, long, default_value_t = config::DEFAULT_ITERATIONS)]
    iterations: usize,

    /// Work-group size
    #[arg(short, long, default_value_t = config::DEFAULT_LOCAL_SIZE)]
    local_size: u32,

    /// Path to the WGSL kernel resource
    #[arg(short, long, default_value = config::DEFAULT_KERNEL_PATH)]
    kernel: PathBuf,

    /// Seed for the input generator (defaults to n)
    #[arg(long)]
    seed: Option<u64>,

    /// Dispatch synchronisation: per-iteration or batched
    #[arg(long, default_value = "per-iteration")]
    sync: SyncPolicy,

    /// Comma-separated backends to probe: all, vulkan, metal, dx12, gl
    #[arg(long, default_value = "all")]
    backends: String,
}

impl Cli {
    fn into_config(self) -> aplusb_harness::Result<HarnessConfig> {
        Ok(HarnessConfig {
            n: self.n,
            iterations: self.iterations,
            local_size: self.local_size,
            kernel_path: self.kernel,
            seed: self.seed.unwrap_or(self.n as u64),
            sync: self.sync,
            backends: config::parse_backends(&self.backends)?,
        })
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let result = cli.into_config().and_then(|config| {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let report = harness::run(&config, &mut out);
        let _ = out.flush();
        report
    });

    match result {
        Ok(report) => {
            log::info!(
                "{} on {}: {:.3} GFlop/s, {} samples",
                report.work,
                report.adapter,
                report.throughput.gflops,
                report.kernel.samples
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}
