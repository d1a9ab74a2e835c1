// gpu/buffer.rs — device buffers and host↔device transfers.
//
// RESPONSIBILITIES
// ─────────────────
// 1. `allocate()` — create a storage buffer of a fixed byte size with an
//    access mode, validating the size against the device limits first.
//
// 2. `write_buffer()` — upload host floats. wgpu stages `queue.write_buffer`
//    data and only copies it at the next submit, so a blocking write submits
//    an empty command list and waits for it.
//
// 3. `read_buffer()` — download device floats via a MAP_READ staging buffer.
//    Always blocking: the host slice is filled before returning.
//
//
// READBACK STAGING
// ─────────────────
// Storage buffers cannot be mapped directly (MAP_READ may only be combined
// with COPY_DST). Every readable buffer therefore gets a lazily created
// staging buffer of the same size, kept for the buffer's lifetime so that
// repeated timed reads measure the copy, not the allocation.
//
//
// NEW RUST CONCEPTS
// ──────────────────
// - `std::cell::OnceCell` — single-threaded lazy initialisation through a
//   shared reference. The staging buffer is created on first read.
// - `bytemuck::cast_slice` / `cast_slice_mut` — view `[f32]` as `[u8]`
//   without copying or `unsafe`. Casting *to* bytes never fails on
//   alignment, which is why reads copy into `cast_slice_mut(host)` rather
//   than casting the mapped bytes to floats.

use std::cell::OnceCell;
use std::fmt;
use std::sync::Arc;

use crate::error::{HarnessError, Result, RuntimeFailure, Status};
use crate::gpu::context::{capture, CommandQueue, Context};

const ELEMENT_SIZE: u64 = std::mem::size_of::<f32>() as u64;

/// How kernels access a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Kernel input. Written by the host, never by the device.
    ReadOnly,
    /// Kernel output. Read by the host only after the kernel has run.
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    fn usage(self) -> wgpu::BufferUsages {
        let base = wgpu::BufferUsages::STORAGE;
        match self {
            AccessMode::ReadOnly => base | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            AccessMode::WriteOnly => base | wgpu::BufferUsages::COPY_SRC,
            AccessMode::ReadWrite => base | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
        }
    }

    pub fn host_writable(self) -> bool {
        !matches!(self, AccessMode::WriteOnly)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::ReadOnly => write!(f, "read-only"),
            AccessMode::WriteOnly => write!(f, "write-only"),
            AccessMode::ReadWrite => write!(f, "read-write"),
        }
    }
}

/// A device-resident array of `f32`. Dropping it releases the device memory.
pub struct DeviceBuffer {
    pub(crate) buffer: wgpu::Buffer,
    staging: OnceCell<wgpu::Buffer>,
    device: Arc<wgpu::Device>,
    pub access: AccessMode,
    len: usize,
}

impl DeviceBuffer {
    /// Number of `f32` elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn size_bytes(&self) -> u64 {
        self.buffer.size()
    }

    fn staging(&self) -> &wgpu::Buffer {
        self.staging.get_or_init(|| {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("readback staging"),
                size: self.size_bytes(),
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("len", &self.len)
            .field("access", &self.access)
            .finish()
    }
}

/// Check a requested byte size against the context's limits.
pub fn check_size(limits: &wgpu::Limits, size_bytes: u64) -> std::result::Result<(), String> {
    if size_bytes == 0 {
        return Err("buffer size must be positive".into());
    }
    if size_bytes % ELEMENT_SIZE != 0 {
        return Err(format!("{size_bytes} bytes is not a whole number of f32 elements"));
    }
    if size_bytes > limits.max_buffer_size {
        return Err(format!(
            "requested {size_bytes} bytes exceeds device max_buffer_size {}",
            limits.max_buffer_size
        ));
    }
    if size_bytes > u64::from(limits.max_storage_buffer_binding_size) {
        return Err(format!(
            "requested {size_bytes} bytes exceeds device max_storage_buffer_binding_size {}",
            limits.max_storage_buffer_binding_size
        ));
    }
    Ok(())
}

/// Allocate a device buffer of `size_bytes` with the given access mode.
///
/// Contents are unspecified until written; never rely on zero-fill.
///
/// # Errors
/// `BufferAllocation` for invalid sizes or when the device runs out of memory.
pub fn allocate(ctx: &Context, size_bytes: u64, access: AccessMode) -> Result<DeviceBuffer> {
    check_size(&ctx.limits, size_bytes).map_err(|detail| {
        HarnessError::BufferAllocation(RuntimeFailure::new("create_buffer", Status::InvalidValue, detail))
    })?;

    let (buffer, err) = capture(ctx.device(), || {
        ctx.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("aplusb data"),
            size: size_bytes,
            usage: access.usage(),
            mapped_at_creation: false,
        })
    });
    if let Some(e) = err {
        return Err(HarnessError::BufferAllocation(RuntimeFailure::new(
            "create_buffer",
            Status::from(&e),
            e.to_string(),
        )));
    }

    log::debug!("allocated {size_bytes} byte {access} buffer");
    Ok(DeviceBuffer {
        buffer,
        staging: OnceCell::new(),
        device: Arc::clone(&ctx.device),
        access,
        len: (size_bytes / ELEMENT_SIZE) as usize,
    })
}

#[track_caller]
fn transfer_error(op: &'static str, status: Status, detail: impl Into<String>) -> HarnessError {
    HarnessError::Transfer(RuntimeFailure::new(op, status, detail))
}

/// Upload `host` into `buf`.
///
/// With `blocking = true` the call returns only after the data has reached
/// the device. Non-blocking writes are ordered before any later submission
/// on the same queue.
pub fn write_buffer(queue: &CommandQueue, buf: &DeviceBuffer, host: &[f32], blocking: bool) -> Result<()> {
    if host.len() != buf.len() {
        return Err(transfer_error(
            "write_buffer",
            Status::InvalidValue,
            format!("host slice has {} elements, buffer has {}", host.len(), buf.len()),
        ));
    }
    if !buf.access.host_writable() {
        return Err(transfer_error(
            "write_buffer",
            Status::InvalidOperation,
            format!("buffer is {}", buf.access),
        ));
    }

    let (index, err) = capture(&queue.device, || {
        queue.queue.write_buffer(&buf.buffer, 0, bytemuck::cast_slice(host));
        queue.queue.submit(std::iter::empty())
    });
    if let Some(e) = err {
        return Err(transfer_error("write_buffer", Status::from(&e), e.to_string()));
    }
    if blocking {
        queue.wait_for(index);
    }
    Ok(())
}

/// Download `buf` into `host`. Blocks until the data is on the host.
pub fn read_buffer(queue: &CommandQueue, buf: &DeviceBuffer, host: &mut [f32]) -> Result<()> {
    if host.len() != buf.len() {
        return Err(transfer_error(
            "read_buffer",
            Status::InvalidValue,
            format!("host slice has {} elements, buffer has {}", host.len(), buf.len()),
        ));
    }

    let staging = buf.staging();
    let size = buf.size_bytes();

    let (_index, err) = capture(&queue.device, || {
        let mut encoder = queue.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("read_buffer"),
        });
        encoder.copy_buffer_to_buffer(&buf.buffer, 0, staging, 0, size);
        queue.queue.submit(std::iter::once(encoder.finish()))
    });
    if let Some(e) = err {
        return Err(transfer_error("read_buffer", Status::from(&e), e.to_string()));
    }

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        let _ = tx.send(r);
    });
    queue.finish();

    rx.recv()
        .map_err(|_| transfer_error("map_async", Status::MapFailure, "map callback dropped"))?
        .map_err(|e| transfer_error("map_async", Status::from(&e), e.to_string()))?;

    {
        let mapped = slice.get_mapped_range();
        bytemuck::cast_slice_mut::<f32, u8>(host).copy_from_slice(&mapped);
    }
    staging.unmap();
    Ok(())
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> wgpu::Limits {
        wgpu::Limits::default()
    }

    #[test]
    fn check_size_rejects_zero_and_partial_elements() {
        assert!(check_size(&limits(), 0).is_err());
        assert!(check_size(&limits(), 6).is_err());
        assert!(check_size(&limits(), 64).is_ok());
    }

    #[test]
    fn check_size_respects_limits() {
        let l = limits();
        let max_binding = u64::from(l.max_storage_buffer_binding_size);
        assert!(check_size(&l, max_binding).is_ok());
        let err = check_size(&l, max_binding + 4).unwrap_err();
        assert!(err.contains("max_storage_buffer_binding_size"), "{err}");

        let tiny = wgpu::Limits { max_buffer_size: 16, ..wgpu::Limits::default() };
        let err = check_size(&tiny, 32).unwrap_err();
        assert!(err.contains("max_buffer_size"), "{err}");
    }

    #[test]
    fn full_size_run_needs_more_than_default_limits() {
        // 100M floats do not fit the conservative defaults; the context
        // requests the adapter's limits instead.
        assert!(check_size(&limits(), 400_000_000).is_err());
    }

    #[test]
    fn usage_flags_by_access_mode() {
        assert!(AccessMode::ReadOnly.usage().contains(wgpu::BufferUsages::COPY_DST));
        assert!(!AccessMode::WriteOnly.usage().contains(wgpu::BufferUsages::COPY_DST));
        assert!(AccessMode::WriteOnly.usage().contains(wgpu::BufferUsages::COPY_SRC));
        assert!(!AccessMode::WriteOnly.host_writable());
    }
}
