// gpu/device.rs — platform enumeration and device selection.
//
// Responsibilities:
//   - Enumerate wgpu backends ("platforms") and their adapters ("devices").
//   - Select one device with a two-tier, first-fit policy:
//       1. first platform in enumeration order (no scoring),
//       2. first GPU-kind device on it, else first CPU-kind device.
//
// PLATFORMS:
// wgpu does not group adapters by vendor runtime the way an ICD loader does.
// The closest equivalent is the backend: each backend (Vulkan, Metal, DX12,
// GL) is a separate driver stack with its own adapter list. We probe them in
// a fixed order and keep only backends that expose at least one adapter, so
// "first platform" is deterministic on a given machine.
//
// DEVICE KINDS:
//   DiscreteGpu / IntegratedGpu / VirtualGpu  -> Gpu
//   Other (e.g. dzn, D3D12-to-Vulkan on WSL2) -> Gpu
//   Cpu (llvmpipe, WARP, SwiftShader)         -> Cpu
//
// First-fit, not best-fit: a discrete GPU listed after an integrated one is
// not preferred. Enumeration order is the only tie-breaker.
//
// The selection logic is generic over `Platform` so it runs against fake
// platforms in unit tests, without a driver.

use std::fmt;

use crate::error::{HarnessError, Result};

/// Coarse classification of a compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Gpu,
    Cpu,
}

impl DeviceKind {
    pub fn classify(device_type: wgpu::DeviceType) -> Self {
        match device_type {
            wgpu::DeviceType::Cpu => DeviceKind::Cpu,
            wgpu::DeviceType::DiscreteGpu
            | wgpu::DeviceType::IntegratedGpu
            | wgpu::DeviceType::VirtualGpu
            | wgpu::DeviceType::Other => DeviceKind::Gpu,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Gpu => write!(f, "GPU"),
            DeviceKind::Cpu => write!(f, "CPU"),
        }
    }
}

/// A compute platform exposing devices of some kind.
pub trait Platform {
    type Device;

    fn name(&self) -> String;

    /// All devices on this platform, in enumeration order.
    fn into_devices(self) -> Vec<(DeviceKind, Self::Device)>;
}

/// Outcome of device resolution.
#[derive(Debug)]
pub struct Resolution<D> {
    /// How many platforms were discovered (only the first is used).
    pub platform_count: usize,
    pub platform_name: String,
    /// False when the selection fell back to a CPU device.
    pub gpu_found: bool,
    pub kind: DeviceKind,
    pub device: D,
}

/// Select a device from `platforms` using the GPU-preferred fallback policy.
///
/// # Errors
/// - `NoPlatform` when `platforms` is empty. Devices are never inspected.
/// - `NoDevice` when the first platform has neither GPU nor CPU devices.
pub fn resolve<P: Platform>(platforms: Vec<P>) -> Result<Resolution<P::Device>> {
    let platform_count = platforms.len();
    let platform = platforms.into_iter().next().ok_or(HarnessError::NoPlatform)?;
    let platform_name = platform.name();

    let mut devices = platform.into_devices();
    log::debug!("platform {platform_name}: {} device(s)", devices.len());

    let gpu = devices.iter().position(|(kind, _)| *kind == DeviceKind::Gpu);
    let index = match gpu {
        Some(i) => i,
        None => {
            log::warn!("GPU devices not found on {platform_name}, falling back to CPU");
            devices
                .iter()
                .position(|(kind, _)| *kind == DeviceKind::Cpu)
                .ok_or_else(|| HarnessError::NoDevice { platform: platform_name.clone() })?
        }
    };

    let (kind, device) = devices.swap_remove(index);
    Ok(Resolution { platform_count, platform_name, gpu_found: gpu.is_some(), kind, device })
}

// ============================================================
// wgpu platforms
// ============================================================

/// Backends probed as platforms, in enumeration order.
const PLATFORM_ORDER: [(wgpu::Backends, wgpu::Backend); 4] = [
    (wgpu::Backends::VULKAN, wgpu::Backend::Vulkan),
    (wgpu::Backends::METAL, wgpu::Backend::Metal),
    (wgpu::Backends::DX12, wgpu::Backend::Dx12),
    (wgpu::Backends::GL, wgpu::Backend::Gl),
];

/// Cached adapter information for logging and reporting.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
    pub driver: String,
}

impl From<wgpu::AdapterInfo> for AdapterInfo {
    fn from(raw: wgpu::AdapterInfo) -> Self {
        AdapterInfo {
            name: raw.name,
            vendor: raw.vendor,
            device: raw.device,
            device_type: raw.device_type,
            backend: raw.backend,
            driver: raw.driver,
        }
    }
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

/// One wgpu backend together with the adapters it exposes.
pub struct BackendPlatform {
    pub backend: wgpu::Backend,
    adapters: Vec<wgpu::Adapter>,
}

impl Platform for BackendPlatform {
    type Device = wgpu::Adapter;

    fn name(&self) -> String {
        format!("{:?}", self.backend)
    }

    fn into_devices(self) -> Vec<(DeviceKind, wgpu::Adapter)> {
        self.adapters
            .into_iter()
            .map(|a| (DeviceKind::classify(a.get_info().device_type), a))
            .collect()
    }
}

/// Create the instance used for enumeration. Validation layers are enabled in
/// debug builds for shader error feedback.
pub fn create_instance(backends: wgpu::Backends) -> wgpu::Instance {
    let flags = if cfg!(debug_assertions) {
        wgpu::InstanceFlags::VALIDATION
            | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
    } else {
        wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
    };
    wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends,
        flags,
        ..Default::default()
    })
}

/// Enumerate every enabled backend that exposes at least one adapter.
pub fn enumerate_platforms(
    instance: &wgpu::Instance,
    backends: wgpu::Backends,
) -> Vec<BackendPlatform> {
    PLATFORM_ORDER
        .iter()
        .filter(|(bit, _)| backends.contains(*bit))
        .filter_map(|&(bit, backend)| {
            let adapters = instance.enumerate_adapters(bit);
            for a in &adapters {
                log::debug!("{backend:?} adapter: {}", AdapterInfo::from(a.get_info()));
            }
            (!adapters.is_empty()).then_some(BackendPlatform { backend, adapters })
        })
        .collect()
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct FakePlatform {
        name: &'static str,
        devices: Vec<(DeviceKind, &'static str)>,
    }

    impl Platform for FakePlatform {
        type Device = &'static str;

        fn name(&self) -> String {
            self.name.to_string()
        }

        fn into_devices(self) -> Vec<(DeviceKind, &'static str)> {
            self.devices
        }
    }

    /// Panics if devices are inspected at all.
    struct UntouchablePlatform;

    impl Platform for UntouchablePlatform {
        type Device = ();

        fn name(&self) -> String {
            unreachable!("name() called")
        }

        fn into_devices(self) -> Vec<(DeviceKind, ())> {
            unreachable!("into_devices() called")
        }
    }

    fn fake(name: &'static str, devices: &[(DeviceKind, &'static str)]) -> FakePlatform {
        FakePlatform { name, devices: devices.to_vec() }
    }

    #[test]
    fn zero_platforms_is_no_platform_error() {
        let err = resolve(Vec::<UntouchablePlatform>::new()).unwrap_err();
        assert!(matches!(err, HarnessError::NoPlatform));
    }

    #[test]
    fn platform_without_devices_is_no_device_error() {
        let err = resolve(vec![fake("empty", &[])]).unwrap_err();
        match err {
            HarnessError::NoDevice { platform } => assert_eq!(platform, "empty"),
            other => panic!("expected NoDevice, got {other:?}"),
        }
    }

    #[test]
    fn cpu_only_platform_selects_cpu() {
        let r = resolve(vec![fake("p", &[(DeviceKind::Cpu, "llvmpipe")])]).unwrap();
        assert_eq!(r.kind, DeviceKind::Cpu);
        assert_eq!(r.device, "llvmpipe");
        assert!(!r.gpu_found);
    }

    #[test]
    fn gpu_preferred_over_earlier_cpu() {
        let r = resolve(vec![fake(
            "p",
            &[(DeviceKind::Cpu, "llvmpipe"), (DeviceKind::Gpu, "igpu"), (DeviceKind::Gpu, "dgpu")],
        )])
        .unwrap();
        assert_eq!(r.kind, DeviceKind::Gpu);
        // First-fit: the first GPU wins even if a later one is "better".
        assert_eq!(r.device, "igpu");
        assert!(r.gpu_found);
    }

    #[test]
    fn only_first_platform_is_considered() {
        let platforms = vec![
            fake("first", &[(DeviceKind::Cpu, "cpu0")]),
            fake("second", &[(DeviceKind::Gpu, "gpu1")]),
        ];
        let r = resolve(platforms).unwrap();
        assert_eq!(r.platform_count, 2);
        assert_eq!(r.platform_name, "first");
        assert_eq!(r.device, "cpu0");

        let platforms = vec![fake("first", &[]), fake("second", &[(DeviceKind::Gpu, "gpu1")])];
        assert!(matches!(resolve(platforms), Err(HarnessError::NoDevice { .. })));
    }

    #[test]
    fn classify_device_types() {
        assert_eq!(DeviceKind::classify(wgpu::DeviceType::DiscreteGpu), DeviceKind::Gpu);
        assert_eq!(DeviceKind::classify(wgpu::DeviceType::IntegratedGpu), DeviceKind::Gpu);
        assert_eq!(DeviceKind::classify(wgpu::DeviceType::VirtualGpu), DeviceKind::Gpu);
        assert_eq!(DeviceKind::classify(wgpu::DeviceType::Other), DeviceKind::Gpu);
        assert_eq!(DeviceKind::classify(wgpu::DeviceType::Cpu), DeviceKind::Cpu);
    }

    #[test]
    fn platform_order_starts_with_vulkan() {
        assert_eq!(PLATFORM_ORDER[0].1, wgpu::Backend::Vulkan);
        assert_eq!(PLATFORM_ORDER.len(), 4);
    }
}
