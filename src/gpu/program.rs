// gpu/program.rs — kernel source loading and program building.
//
// BUILD STATES
// ────────────
//
//   SourceLoaded ──compile──▶ Succeeded
//                     │
//                     └─────▶ Failed  (build log captured, then Compilation error)
//
// An empty source never reaches SourceLoaded: `KernelSource` refuses to hold
// empty text. An empty resource almost always means the working directory is
// wrong, not that the kernel is broken, so it gets its own error.
//
// TWO COMPILE STAGES
// ──────────────────
// 1. Front end (naga, no device): parse + validate the WGSL. naga's
//    diagnostics are rendered against the source with line/column markers
//    and become the build log on failure. This stage also reflects the
//    module: entry points, their workgroup sizes, and the group-0 bindings
//    that form the kernel's positional parameters.
//
// 2. Device compile (wgpu): `create_shader_module` inside an error scope,
//    plus `get_compilation_info()` for backend messages. Warnings on a
//    successful build are kept in `Program::build_log`.
//
// BUILD FLAGS
// ───────────
// WGSL has no preprocessor. `BuildOptions` substitutes `{{KEY}}` placeholders
// in the source before compilation. The same template approach is used for
// workgroup sizes, which must be literals in the shader. An unresolved
// placeholder is a syntax error and fails the build with a log.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::{HarnessError, Result};
use crate::gpu::context::{capture, Context};

// ---------------------------------------------------------------------------
// Kernel source
// ---------------------------------------------------------------------------

/// Non-empty kernel source text and where it came from.
#[derive(Debug, Clone)]
pub struct KernelSource {
    origin: String,
    text: String,
}

impl KernelSource {
    /// Wrap source text.
    ///
    /// # Errors
    /// `EmptySource` if `text` has zero length.
    pub fn from_text(origin: impl Into<String>, text: impl Into<String>) -> Result<Self> {
        let origin = origin.into();
        let text = text.into();
        if text.is_empty() {
            return Err(HarnessError::EmptySource { origin });
        }
        Ok(KernelSource { origin, text })
    }

    /// Read the kernel resource at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| HarnessError::SourceLoad {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_text(path.display().to_string(), text)
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

// ---------------------------------------------------------------------------
// Build options
// ---------------------------------------------------------------------------

/// `{{KEY}}` substitutions applied to the source before compilation.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    defines: BTreeMap<String, String>,
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.defines.insert(key.into(), value.to_string());
        self
    }

    /// Options for a kernel launched with work-group size `local_size`.
    pub fn for_local_size(local_size: u32) -> Self {
        Self::new().define("LOCAL_SIZE", local_size)
    }

    pub fn apply(&self, text: &str) -> String {
        self.defines.iter().fold(text.to_string(), |src, (key, value)| {
            src.replace(&format!("{{{{{key}}}}}"), value)
        })
    }
}

// ---------------------------------------------------------------------------
// Reflection
// ---------------------------------------------------------------------------

/// Kind of a positional kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// `var<storage, read>`
    ReadOnlyBuffer,
    /// `var<storage, read_write>`
    ReadWriteBuffer,
    /// `var<uniform>` holding a single scalar.
    Scalar,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::ReadOnlyBuffer => write!(f, "read-only buffer"),
            ParamKind::ReadWriteBuffer => write!(f, "read-write buffer"),
            ParamKind::Scalar => write!(f, "scalar"),
        }
    }
}

/// One positional parameter. Its index is its binding number in group 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
}

/// A compute entry point and its declared work-group size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub name: String,
    pub workgroup_size: [u32; 3],
}

/// Result of the device-independent front end.
#[derive(Debug, Clone)]
pub struct CompiledModule {
    /// Source after `BuildOptions` substitution.
    pub source: String,
    pub entry_points: Vec<EntryPoint>,
    pub params: Vec<Param>,
}

impl CompiledModule {
    pub fn entry_point(&self, name: &str) -> Option<&EntryPoint> {
        self.entry_points.iter().find(|ep| ep.name == name)
    }

    pub fn entry_point_names(&self) -> Vec<String> {
        self.entry_points.iter().map(|ep| ep.name.clone()).collect()
    }
}

fn compilation_error(source: &KernelSource, log: String) -> HarnessError {
    HarnessError::Compilation { origin: source.origin.clone(), log }
}

/// Parse, validate and reflect `source` without touching a device.
///
/// # Errors
/// `Compilation` with naga's rendered diagnostic as the log.
pub fn compile_module(source: &KernelSource, options: &BuildOptions) -> Result<CompiledModule> {
    let text = options.apply(&source.text);

    let module = naga::front::wgsl::parse_str(&text)
        .map_err(|e| compilation_error(source, e.emit_to_string(&text)))?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    )
    .validate(&module)
    .map_err(|e| compilation_error(source, e.emit_to_string(&text)))?;

    let entry_points = module
        .entry_points
        .iter()
        .filter(|ep| ep.stage == naga::ShaderStage::Compute)
        .map(|ep| EntryPoint { name: ep.name.clone(), workgroup_size: ep.workgroup_size })
        .collect();

    let params = reflect_params(&module).map_err(|log| compilation_error(source, log))?;

    Ok(CompiledModule { source: text, entry_points, params })
}

/// Collect group-0 bindings as positional parameters.
///
/// Bindings must be numbered 0..k without gaps so that binding number and
/// argument index coincide.
fn reflect_params(module: &naga::Module) -> std::result::Result<Vec<Param>, String> {
    let mut bound: Vec<(u32, Param)> = Vec::new();
    for (_, var) in module.global_variables.iter() {
        let Some(binding) = &var.binding else { continue };
        if binding.group != 0 {
            log::warn!(
                "binding @group({}) @binding({}) ignored: only group 0 carries kernel arguments",
                binding.group,
                binding.binding
            );
            continue;
        }
        let kind = match var.space {
            naga::AddressSpace::Storage { access } if access.contains(naga::StorageAccess::STORE) => {
                ParamKind::ReadWriteBuffer
            }
            naga::AddressSpace::Storage { .. } => ParamKind::ReadOnlyBuffer,
            naga::AddressSpace::Uniform => ParamKind::Scalar,
            other => {
                return Err(format!(
                    "binding {} uses unsupported address space {other:?}",
                    binding.binding
                ));
            }
        };
        let name = var.name.clone().unwrap_or_else(|| format!("arg{}", binding.binding));
        bound.push((binding.binding, Param { name, kind }));
    }

    bound.sort_by_key(|(b, _)| *b);
    for (expected, (b, p)) in bound.iter().enumerate() {
        if *b as usize != expected {
            return Err(format!(
                "kernel parameters must use contiguous bindings from 0; `{}` is at binding {b}, expected {expected}",
                p.name
            ));
        }
    }
    Ok(bound.into_iter().map(|(_, p)| p).collect())
}

// ---------------------------------------------------------------------------
// Program
// ---------------------------------------------------------------------------

/// Build state of a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    SourceLoaded,
    Succeeded,
    Failed,
}

/// A kernel program compiled for the context's device.
pub struct Program {
    pub(crate) shader: wgpu::ShaderModule,
    pub compiled: CompiledModule,
    pub origin: String,
    /// Backend messages from a successful build (usually empty).
    pub build_log: String,
    status: BuildStatus,
}

impl Program {
    /// Compile `source` for the device of `ctx`.
    ///
    /// # Errors
    /// `Compilation` on any front-end or device-side failure. The full build
    /// log is logged at error level and carried in the error.
    pub fn build(ctx: &Context, source: &KernelSource, options: &BuildOptions) -> Result<Self> {
        let mut status = BuildStatus::SourceLoaded;
        log::debug!("program {}: {status:?}", source.origin);

        let outcome = compile_module(source, options).and_then(|compiled| {
            Self::compile_on_device(ctx, source, &compiled).map(|(shader, log)| (compiled, shader, log))
        });

        match outcome {
            Ok((compiled, shader, build_log)) => {
                status = BuildStatus::Succeeded;
                log::debug!("program {}: {status:?}", source.origin);
                if !build_log.is_empty() {
                    log::warn!("build log for {}:\n{build_log}", source.origin);
                }
                Ok(Program { shader, compiled, origin: source.origin.clone(), build_log, status })
            }
            Err(err) => {
                status = BuildStatus::Failed;
                log::debug!("program {}: {status:?}", source.origin);
                if let HarnessError::Compilation { log, .. } = &err {
                    if log.len() > 1 {
                        log::error!("Log:\n{log}");
                    }
                }
                Err(err)
            }
        }
    }

    fn compile_on_device(
        ctx: &Context,
        source: &KernelSource,
        compiled: &CompiledModule,
    ) -> Result<(wgpu::ShaderModule, String)> {
        let (shader, err) = capture(ctx.device(), || {
            ctx.device().create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(source.origin.as_str()),
                source: wgpu::ShaderSource::Wgsl(compiled.source.as_str().into()),
            })
        });

        let info = pollster::block_on(shader.get_compilation_info());
        let mut log = String::new();
        let mut failed = false;
        for msg in &info.messages {
            failed |= matches!(msg.message_type, wgpu::CompilationMessageType::Error);
            let kind = match msg.message_type {
                wgpu::CompilationMessageType::Error => "error",
                wgpu::CompilationMessageType::Warning => "warning",
                wgpu::CompilationMessageType::Info => "info",
            };
            match &msg.location {
                Some(loc) => log.push_str(&format!(
                    "{}:{}:{}: {kind}: {}\n",
                    source.origin, loc.line_number, loc.line_position, msg.message
                )),
                None => log.push_str(&format!("{}: {kind}: {}\n", source.origin, msg.message)),
            }
        }

        if let Some(e) = err {
            failed = true;
            log.push_str(&e.to_string());
        }
        if failed {
            return Err(compilation_error(source, log));
        }
        Ok((shader, log))
    }

    pub fn status(&self) -> BuildStatus {
        self.status
    }

    pub fn entry_points(&self) -> &[EntryPoint] {
        &self.compiled.entry_points
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SCALE: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<uniform> n: u32;

@compute @workgroup_size({{LOCAL_SIZE}})
fn scale(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= n) { return; }
    dst[gid.x] = 2.0 * src[gid.x];
}
"#;

    #[test]
    fn empty_source_is_rejected_before_compilation() {
        let err = KernelSource::from_text("src/shaders/missing.wgsl", "").unwrap_err();
        match err {
            HarnessError::EmptySource { origin } => assert_eq!(origin, "src/shaders/missing.wgsl"),
            other => panic!("expected EmptySource, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_source_load_error() {
        let err = KernelSource::load("/nonexistent/kernel.wgsl").unwrap_err();
        assert!(matches!(err, HarnessError::SourceLoad { .. }));
    }

    #[test]
    fn build_options_substitute_placeholders() {
        let opts = BuildOptions::for_local_size(64).define("EXTRA", "1u");
        assert_eq!(opts.apply("a {{LOCAL_SIZE}} b {{EXTRA}} {{LOCAL_SIZE}}"), "a 64 b 1u 64");
        assert_eq!(opts.apply("{{UNKNOWN}}"), "{{UNKNOWN}}");
    }

    #[test]
    fn syntax_error_yields_compilation_error_with_log() {
        let src = KernelSource::from_text("broken.wgsl", "fn oops( { }").unwrap();
        match compile_module(&src, &BuildOptions::new()) {
            Err(HarnessError::Compilation { origin, log }) => {
                assert_eq!(origin, "broken.wgsl");
                assert!(!log.is_empty());
            }
            other => panic!("expected Compilation, got {other:?}"),
        }
    }

    #[test]
    fn unresolved_placeholder_fails_to_compile() {
        let src = KernelSource::from_text("scale.wgsl", SCALE).unwrap();
        assert!(matches!(
            compile_module(&src, &BuildOptions::new()),
            Err(HarnessError::Compilation { .. })
        ));
    }

    #[test]
    fn type_error_is_reported_by_validation() {
        let text = r#"
@group(0) @binding(0) var<storage, read_write> dst: array<f32>;
@compute @workgroup_size(1)
fn bad(@builtin(global_invocation_id) gid: vec3<u32>) {
    dst[gid.x] = gid.x;
}
"#;
        let src = KernelSource::from_text("bad.wgsl", text).unwrap();
        match compile_module(&src, &BuildOptions::new()) {
            Err(HarnessError::Compilation { log, .. }) => assert!(!log.is_empty()),
            other => panic!("expected Compilation, got {other:?}"),
        }
    }

    #[test]
    fn reflects_entry_points_and_params() {
        let src = KernelSource::from_text("scale.wgsl", SCALE).unwrap();
        let m = compile_module(&src, &BuildOptions::for_local_size(32)).unwrap();
        assert_eq!(m.entry_point_names(), vec!["scale".to_string()]);
        assert_eq!(m.entry_point("scale").unwrap().workgroup_size, [32, 1, 1]);
        assert!(m.entry_point("aplusb").is_none());
        let kinds: Vec<ParamKind> = m.params.iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![ParamKind::ReadOnlyBuffer, ParamKind::ReadWriteBuffer, ParamKind::Scalar]);
        assert_eq!(m.params[2].name, "n");
    }

    #[test]
    fn gapped_bindings_are_rejected() {
        let text = r#"
@group(0) @binding(0) var<storage, read> a: array<f32>;
@group(0) @binding(2) var<storage, read_write> c: array<f32>;
@compute @workgroup_size(1)
fn k(@builtin(global_invocation_id) gid: vec3<u32>) {
    c[gid.x] = a[gid.x];
}
"#;
        let src = KernelSource::from_text("gap.wgsl", text).unwrap();
        match compile_module(&src, &BuildOptions::new()) {
            Err(HarnessError::Compilation { log, .. }) => assert!(log.contains("contiguous"), "{log}"),
            other => panic!("expected Compilation, got {other:?}"),
        }
    }
}
