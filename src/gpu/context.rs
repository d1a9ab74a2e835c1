// gpu/context.rs — device context and command queue.
//
// wgpu hands out the logical device and its queue together from
// `request_device`. We keep them apart the way the pipeline uses them:
// `Context` owns the device and allocates resources, `CommandQueue` owns the
// single submission queue and performs transfers and dispatches.
//
// # Release order
// Locals drop in reverse declaration order, so the pipeline's
//   context → queue → buffers → program → kernel
// acquisition releases kernel first and context last, on both the success
// path and any early `?` return. `CommandQueue` holds its own `Arc` of the
// device, so it stays valid even if dropped after the context.
//
// ERROR CAPTURE:
// wgpu reports most failures asynchronously through the device's error
// handler. `capture()` pushes Validation + OutOfMemory error scopes around a
// call and pops them immediately, turning the reported error into a value the
// caller converts to a `RuntimeFailure`. Anything escaping a scope reaches
// the uncaptured-error handler installed in `Context::create`.

use std::sync::Arc;

use crate::error::{HarnessError, Result, RuntimeFailure, Status};
use crate::gpu::device::AdapterInfo;

/// Device-side resource allocation scope for one adapter.
///
/// # Field drop order
/// `_instance` is declared last so the `wgpu::Instance` outlives the device.
/// Destroying the instance while device objects still reference it crashes
/// some layered drivers (dzn on WSL2).
pub struct Context {
    pub(crate) device: Arc<wgpu::Device>,
    queue: Option<wgpu::Queue>,
    pub adapter_info: AdapterInfo,
    pub limits: wgpu::Limits,
    _instance: wgpu::Instance,
}

impl Context {
    /// Request a logical device on `adapter`.
    ///
    /// The adapter's own limits are requested rather than the wgpu defaults,
    /// which cap storage buffers at 128 MiB and would reject the 400 MB
    /// buffers of a full-size run.
    ///
    /// # Errors
    /// `DeviceAllocation` if the driver refuses the device.
    pub fn create(instance: wgpu::Instance, adapter: wgpu::Adapter) -> Result<Self> {
        let adapter_info = AdapterInfo::from(adapter.get_info());
        let limits = adapter.limits();

        let (device, queue): (wgpu::Device, wgpu::Queue) = pollster::block_on(
            adapter.request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("aplusb"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits.clone(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            ),
        )
        .map_err(|e| {
            HarnessError::DeviceAllocation(RuntimeFailure::new(
                "request_device",
                Status::from(&e),
                e.to_string(),
            ))
        })?;

        device.on_uncaptured_error(Box::new(|err| {
            log::error!("uncaptured device error: {err}");
        }));
        device.set_device_lost_callback(|reason, message| {
            log::error!("device lost ({reason:?}): {message}");
        });

        log::info!(
            "context created on {adapter_info}: max_buffer_size={} max_storage_binding={} max_workgroups_per_dim={}",
            limits.max_buffer_size,
            limits.max_storage_buffer_binding_size,
            limits.max_compute_workgroups_per_dimension,
        );

        Ok(Context {
            device: Arc::new(device),
            queue: Some(queue),
            adapter_info,
            limits,
            _instance: instance,
        })
    }

    /// Claim the device's submission queue.
    ///
    /// wgpu exposes exactly one queue per device, so this succeeds once.
    pub fn create_queue(&mut self) -> Result<CommandQueue> {
        let queue = self.queue.take().ok_or_else(|| {
            HarnessError::DeviceAllocation(RuntimeFailure::new(
                "create_queue",
                Status::InvalidOperation,
                "the device queue has already been claimed",
            ))
        })?;
        Ok(CommandQueue { queue, device: Arc::clone(&self.device) })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }
}

/// Ordered submission channel for transfers and dispatches.
pub struct CommandQueue {
    pub(crate) queue: wgpu::Queue,
    pub(crate) device: Arc<wgpu::Device>,
}

impl CommandQueue {
    /// Block until every submitted command has completed.
    pub fn finish(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }

    /// Block until the given submission has completed.
    pub(crate) fn wait_for(&self, index: wgpu::SubmissionIndex) {
        self.device.poll(wgpu::Maintain::WaitForSubmissionIndex(index));
    }
}

/// Run `f` inside Validation and OutOfMemory error scopes and return the
/// first error either scope caught.
pub(crate) fn capture<T>(device: &wgpu::Device, f: impl FnOnce() -> T) -> (T, Option<wgpu::Error>) {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    let validation = pollster::block_on(device.pop_error_scope());
    let oom = pollster::block_on(device.pop_error_scope());
    (value, validation.or(oom))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::device::{create_instance, enumerate_platforms, resolve};

    fn context() -> Context {
        let instance = create_instance(wgpu::Backends::all());
        let platforms = enumerate_platforms(&instance, wgpu::Backends::all());
        let resolution = resolve(platforms).expect("need a compute device");
        Context::create(instance, resolution.device).expect("device request")
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn queue_can_be_claimed_once() {
        let mut ctx = context();
        let queue = ctx.create_queue().expect("first claim");
        queue.finish();
        let err = ctx.create_queue().err().expect("second claim must fail");
        match err {
            HarnessError::DeviceAllocation(f) => {
                assert_eq!(f.op, "create_queue");
                assert_eq!(f.status, Status::InvalidOperation);
            }
            other => panic!("expected DeviceAllocation, got {other:?}"),
        }
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn capture_reports_validation_errors() {
        let ctx = context();
        // Mapping and storage usage together is invalid without a feature.
        let (_buf, err) = capture(ctx.device(), || {
            ctx.device().create_buffer(&wgpu::BufferDescriptor {
                label: Some("invalid"),
                size: 16,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::STORAGE,
                mapped_at_creation: false,
            })
        });
        let err = err.expect("scope should catch the validation error");
        assert_eq!(Status::from(&err), Status::InvalidValue);
    }
}
