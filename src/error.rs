// error.rs — error taxonomy for the harness.
//
// Every call into wgpu that can fail is wrapped so that a failure becomes a
// `RuntimeFailure` carrying three things:
//
//   - a numeric `Status` code (wgpu reports typed errors, not integers, so we
//     translate them into a small fixed table),
//   - the name of the operation that failed,
//   - the `CallSite` (file:line) of the wrapper that observed it.
//
// Raw wgpu errors never leave the component that observed them; the message
// text survives in `detail`.
//
// NEW RUST CONCEPTS
// ──────────────────
// - `#[track_caller]` — makes `std::panic::Location::caller()` report the
//   location of the *caller* instead of the function body. This is how we get
//   a file+line for free without a macro.
// - `thiserror::Error` — derives `Display` and `std::error::Error` from the
//   `#[error(...)]` attributes.

use std::fmt;
use std::panic::Location;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Status codes
// ---------------------------------------------------------------------------

/// Numeric status of a failed runtime call.
///
/// Values mirror the conventional compute-runtime status table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    DeviceNotAvailable = -2,
    MemAllocationFailure = -4,
    OutOfResources = -5,
    MapFailure = -12,
    InvalidValue = -30,
    InvalidOperation = -59,
    DeviceLost = -9999,
}

impl Status {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.code(), self)
    }
}

impl From<&wgpu::Error> for Status {
    fn from(err: &wgpu::Error) -> Self {
        match err {
            wgpu::Error::OutOfMemory { .. } => Status::MemAllocationFailure,
            wgpu::Error::Validation { .. } => Status::InvalidValue,
            #[allow(unreachable_patterns)]
            _ => Status::OutOfResources,
        }
    }
}

impl From<&wgpu::RequestDeviceError> for Status {
    fn from(_: &wgpu::RequestDeviceError) -> Self {
        Status::DeviceNotAvailable
    }
}

impl From<&wgpu::BufferAsyncError> for Status {
    fn from(_: &wgpu::BufferAsyncError) -> Self {
        Status::MapFailure
    }
}

// ---------------------------------------------------------------------------
// Call site
// ---------------------------------------------------------------------------

/// Source location at which a runtime failure was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    pub file: &'static str,
    pub line: u32,
}

impl CallSite {
    #[track_caller]
    pub fn here() -> Self {
        let loc = Location::caller();
        CallSite { file: loc.file(), line: loc.line() }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// A non-success status from the compute runtime, with its origin.
#[derive(Debug, Clone)]
pub struct RuntimeFailure {
    pub op: &'static str,
    pub status: Status,
    pub site: CallSite,
    pub detail: String,
}

impl RuntimeFailure {
    #[track_caller]
    pub fn new(op: &'static str, status: Status, detail: impl Into<String>) -> Self {
        RuntimeFailure { op, status, site: CallSite::here(), detail: detail.into() }
    }
}

impl fmt::Display for RuntimeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed with status {} at {}",
            self.op, self.status, self.site
        )?;
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HarnessError
// ---------------------------------------------------------------------------

/// Every way a harness run can fail. All of them are fatal.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("no compute platforms found")]
    NoPlatform,

    #[error("GPU and CPU devices not found on platform {platform}")]
    NoDevice { platform: String },

    #[error("device allocation error: {0}")]
    DeviceAllocation(RuntimeFailure),

    #[error("buffer allocation error: {0}")]
    BufferAllocation(RuntimeFailure),

    #[error("transfer error: {0}")]
    Transfer(RuntimeFailure),

    #[error("empty kernel source from {origin}; is the working directory configured properly?")]
    EmptySource { origin: String },

    #[error("failed to read kernel source {}: {source}", path.display())]
    SourceLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The build log is always captured before this error is raised.
    #[error("kernel compilation failed for {origin}:\n{log}")]
    Compilation { origin: String, log: String },

    #[error("kernel entry point `{name}` not found (available: {})", available.join(", "))]
    KernelNotFound { name: String, available: Vec<String> },

    #[error("argument binding error: {0}")]
    ArgumentBinding(RuntimeFailure),

    #[error("dispatch error: {0}")]
    Dispatch(RuntimeFailure),

    #[error("CPU and GPU results differ at index {index}: expected {expected}, got {actual}")]
    ResultMismatch { index: usize, expected: f32, actual: f32 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to write report: {0}")]
    Report(#[from] std::io::Error),
}

impl HarnessError {
    /// Process exit status for this failure.
    ///
    /// Missing platform or device exits with 1; everything else is a fatal
    /// error surfaced by a lower layer and exits with 2.
    pub fn exit_code(&self) -> u8 {
        match self {
            HarnessError::NoPlatform | HarnessError::NoDevice { .. } => 1,
            _ => 2,
        }
    }

    /// The runtime failure behind this error, if it came from a runtime call.
    pub fn runtime_failure(&self) -> Option<&RuntimeFailure> {
        match self {
            HarnessError::DeviceAllocation(f)
            | HarnessError::BufferAllocation(f)
            | HarnessError::Transfer(f)
            | HarnessError::ArgumentBinding(f)
            | HarnessError::Dispatch(f) => Some(f),
            _ => None,
        }
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_site_points_at_caller() {
        let site = CallSite::here();
        assert!(site.file.ends_with("error.rs"));
        assert!(site.line > 0);
    }

    #[test]
    fn runtime_failure_display_carries_code_op_and_site() {
        let f = RuntimeFailure::new("create_buffer", Status::MemAllocationFailure, "too big");
        let s = f.to_string();
        assert!(s.contains("create_buffer"), "{s}");
        assert!(s.contains("-4"), "{s}");
        assert!(s.contains("error.rs:"), "{s}");
        assert!(s.ends_with("too big"), "{s}");
    }

    #[test]
    fn exit_codes_distinguish_missing_device() {
        assert_eq!(HarnessError::NoPlatform.exit_code(), 1);
        assert_eq!(HarnessError::NoDevice { platform: "Vulkan".into() }.exit_code(), 1);
        let mismatch = HarnessError::ResultMismatch { index: 0, expected: 3.0, actual: 1.0 };
        assert_eq!(mismatch.exit_code(), 2);
        let empty = HarnessError::EmptySource { origin: "x".into() };
        assert_ne!(empty.exit_code(), 0);
    }

    #[test]
    fn runtime_failure_accessor() {
        let err = HarnessError::Transfer(RuntimeFailure::new("read_buffer", Status::MapFailure, ""));
        assert_eq!(err.runtime_failure().map(|f| f.status), Some(Status::MapFailure));
        assert!(HarnessError::NoPlatform.runtime_failure().is_none());
    }

    #[test]
    fn kernel_not_found_lists_available_entry_points() {
        let err = HarnessError::KernelNotFound {
            name: "aplusb".into(),
            available: vec!["main".into(), "copy".into()],
        };
        assert!(err.to_string().contains("main, copy"));
    }
}
