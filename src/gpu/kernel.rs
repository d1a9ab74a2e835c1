// gpu/kernel.rs — kernel entry points and positional argument binding.
//
// A `Kernel` is one compute entry point of a built `Program` plus the
// arguments bound to it. Arguments are positional: index i is
// `@group(0) @binding(i)` in the shader. For the a+b kernel:
//
//   0  a   read-only buffer
//   1  b   read-only buffer
//   2  c   write-only buffer (read_write storage in WGSL)
//   3  n   u32 element count (uniform)
//
// The bind group is rebuilt lazily on the first dispatch after any
// `set_arg`, so binding once and dispatching many times costs nothing.
//
// # Lifetimes
// `Kernel<'a>` borrows the program and every bound buffer. The borrow checker
// therefore guarantees the kernel is released before the program and the
// buffers it refers to.

use wgpu::util::DeviceExt;

use crate::error::{HarnessError, Result, RuntimeFailure, Status};
use crate::gpu::buffer::DeviceBuffer;
use crate::gpu::context::{capture, Context};
use crate::gpu::program::{EntryPoint, ParamKind, Program};

/// Size of the uniform buffer backing a scalar argument. Uniform bindings
/// are padded to 16 bytes.
const SCALAR_UNIFORM_SIZE: usize = 16;

/// A value for one kernel argument.
#[derive(Debug, Clone, Copy)]
pub enum KernelArg<'a> {
    Buffer(&'a DeviceBuffer),
    U32(u32),
}

enum Bound<'a> {
    Buffer(&'a DeviceBuffer),
    Scalar(wgpu::Buffer),
}

/// A named compute entry point with its bound arguments.
pub struct Kernel<'a> {
    pub name: String,
    pub entry_point: EntryPoint,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    params: Vec<ParamKind>,
    args: Vec<Option<Bound<'a>>>,
    bind_group: Option<wgpu::BindGroup>,
    device: &'a wgpu::Device,
    program: &'a Program,
}

#[track_caller]
fn binding_error(detail: impl Into<String>) -> HarnessError {
    HarnessError::ArgumentBinding(RuntimeFailure::new("set_kernel_arg", Status::InvalidValue, detail))
}

fn layout_entry(binding: u32, kind: ParamKind) -> wgpu::BindGroupLayoutEntry {
    let ty = match kind {
        ParamKind::ReadOnlyBuffer => wgpu::BufferBindingType::Storage { read_only: true },
        ParamKind::ReadWriteBuffer => wgpu::BufferBindingType::Storage { read_only: false },
        ParamKind::Scalar => wgpu::BufferBindingType::Uniform,
    };
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer { ty, has_dynamic_offset: false, min_binding_size: None },
        count: None,
    }
}

impl<'a> Kernel<'a> {
    /// Look up `name` in `program` and create its compute pipeline.
    ///
    /// # Errors
    /// - `KernelNotFound` if the program has no compute entry point `name`.
    /// - `Dispatch` if the device rejects the pipeline.
    pub fn create(ctx: &'a Context, program: &'a Program, name: &str) -> Result<Self> {
        let entry_point = program.compiled.entry_point(name).cloned().ok_or_else(|| {
            HarnessError::KernelNotFound {
                name: name.to_string(),
                available: program.compiled.entry_point_names(),
            }
        })?;

        let params: Vec<ParamKind> = program.compiled.params.iter().map(|p| p.kind).collect();
        let device = ctx.device();

        let ((layout, pipeline), err) = capture(device, || {
            let entries: Vec<wgpu::BindGroupLayoutEntry> = params
                .iter()
                .enumerate()
                .map(|(i, kind)| layout_entry(i as u32, *kind))
                .collect();
            let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("kernel args"),
                entries: &entries,
            });
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("kernel pipeline layout"),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(name),
                layout: Some(&pipeline_layout),
                module: &program.shader,
                entry_point: name,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
            (layout, pipeline)
        });
        if let Some(e) = err {
            return Err(HarnessError::Dispatch(RuntimeFailure::new(
                "create_compute_pipeline",
                Status::from(&e),
                e.to_string(),
            )));
        }

        log::debug!(
            "kernel {name}: {} parameter(s), workgroup size {:?}",
            params.len(),
            entry_point.workgroup_size
        );

        let args = params.iter().map(|_| None).collect();
        Ok(Kernel {
            name: name.to_string(),
            entry_point,
            pipeline,
            layout,
            params,
            args,
            bind_group: None,
            device,
            program,
        })
    }

    /// Number of positional parameters the kernel declares.
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Bind `arg` to parameter `index`.
    ///
    /// Only the buffer/scalar distinction is checked; binding a buffer to the
    /// wrong buffer slot is the caller's responsibility.
    ///
    /// # Errors
    /// `ArgumentBinding` if `index` is out of range or the argument is a
    /// buffer where a scalar is declared (or vice versa).
    pub fn set_arg(&mut self, index: usize, arg: KernelArg<'a>) -> Result<()> {
        let kind = *self.params.get(index).ok_or_else(|| {
            binding_error(format!(
                "kernel {} has {} parameter(s), no index {index}",
                self.name,
                self.params.len()
            ))
        })?;

        let bound = match (kind, arg) {
            (ParamKind::Scalar, KernelArg::U32(value)) => {
                let mut bytes = [0u8; SCALAR_UNIFORM_SIZE];
                bytes[..4].copy_from_slice(bytemuck::bytes_of(&value));
                Bound::Scalar(self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("scalar arg"),
                    contents: &bytes,
                    usage: wgpu::BufferUsages::UNIFORM,
                }))
            }
            (ParamKind::ReadOnlyBuffer | ParamKind::ReadWriteBuffer, KernelArg::Buffer(buf)) => {
                Bound::Buffer(buf)
            }
            (kind, arg) => {
                return Err(binding_error(format!(
                    "argument {index} of kernel {} is a {kind}, got {arg:?}",
                    self.name
                )));
            }
        };

        self.args[index] = Some(bound);
        self.bind_group = None;
        Ok(())
    }

    /// Bind an element count, checking that it fits the kernel's u32 scalar.
    pub fn set_count_arg(&mut self, index: usize, count: usize) -> Result<()> {
        let value = u32::try_from(count)
            .map_err(|_| binding_error(format!("element count {count} exceeds u32")))?;
        self.set_arg(index, KernelArg::U32(value))
    }

    /// Build the bind group for the current arguments if it is stale.
    ///
    /// # Errors
    /// `ArgumentBinding` if any argument is unbound or the device rejects
    /// the bind group.
    pub(crate) fn prepare(&mut self) -> Result<()> {
        if self.bind_group.is_some() {
            return Ok(());
        }

        let mut entries = Vec::with_capacity(self.args.len());
        for (i, arg) in self.args.iter().enumerate() {
            let resource = match arg {
                Some(Bound::Buffer(buf)) => buf.buffer.as_entire_binding(),
                Some(Bound::Scalar(buf)) => buf.as_entire_binding(),
                None => {
                    return Err(binding_error(format!(
                        "argument {i} of kernel {} is not bound",
                        self.name
                    )));
                }
            };
            entries.push(wgpu::BindGroupEntry { binding: i as u32, resource });
        }

        let (group, err) = capture(self.device, || {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("kernel args"),
                layout: &self.layout,
                entries: &entries,
            })
        });
        if let Some(e) = err {
            return Err(HarnessError::ArgumentBinding(RuntimeFailure::new(
                "create_bind_group",
                Status::from(&e),
                e.to_string(),
            )));
        }
        self.bind_group = Some(group);
        Ok(())
    }

    /// The bind group built by the last `prepare`.
    pub(crate) fn bind_group(&self) -> Result<&wgpu::BindGroup> {
        self.bind_group
            .as_ref()
            .ok_or_else(|| binding_error(format!("arguments of kernel {} are not prepared", self.name)))
    }

    pub(crate) fn pipeline(&self) -> &wgpu::ComputePipeline {
        &self.pipeline
    }

    pub(crate) fn device(&self) -> &'a wgpu::Device {
        self.device
    }

    /// Work-group size along x declared by the entry point.
    pub fn local_size(&self) -> u32 {
        self.entry_point.workgroup_size[0]
    }

    pub fn program_origin(&self) -> &str {
        &self.program.origin
    }
}
