//! Numerical backends and the lazily acquired scoring device.
//!
//! Acquiring a GPU device claims it for the whole process. The coordinator
//! therefore never acquires one on the ensemble path; each worker process
//! acquires its own through a [`DeviceProvider`] when it is about to score.

use std::env;
use std::panic::AssertUnwindSafe;
use std::sync::OnceLock;

use burn::backend::ndarray::{NdArray, NdArrayDevice};
#[cfg(target_os = "macos")]
use burn::backend::wgpu::{self, WgpuDevice, graphics::Metal};
#[cfg(not(target_os = "macos"))]
use burn::backend::wgpu::{self, WgpuDevice, graphics::Vulkan};
#[cfg(feature = "cuda")]
use burn::backend::{Cuda, cuda::CudaDevice};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::RunConfig;

pub type CpuBackend = NdArray;
pub type WgpuBackend = wgpu::Wgpu;
#[cfg(feature = "cuda")]
pub type CudaBackend = Cuda;

const BACKEND_ENV: &str = "TZLINK_BACKEND";

static WGPU_INIT: OnceLock<()> = OnceLock::new();

/// Backend selection as written in the config (`general.backend`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Cpu,
    Wgpu,
    Cuda,
}

impl BackendKind {
    /// Apply the `TZLINK_BACKEND` override, if set.
    pub fn resolve(configured: BackendKind) -> BackendKind {
        let requested = env::var(BACKEND_ENV)
            .ok()
            .map(|value| value.trim().to_ascii_lowercase());
        match requested.as_deref() {
            None | Some("") => configured,
            Some("cpu") | Some("ndarray") => BackendKind::Cpu,
            Some("wgpu") | Some("vulkan") | Some("metal") => BackendKind::Wgpu,
            Some("cuda") => BackendKind::Cuda,
            Some(other) => {
                warn!("Unknown backend '{other}' in {BACKEND_ENV}, using {configured:?}.");
                configured
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum DeviceError {
    /// The backend was requested but its cargo feature is off.
    #[error("backend {0:?} is not compiled into this build")]
    Unavailable(BackendKind),
    /// Device setup failed or panicked.
    #[error("failed to initialise {kind:?} device: {reason}")]
    Init { kind: BackendKind, reason: String },
}

/// An acquired device handle. Holding one means the backend owns the device.
#[derive(Debug, Clone)]
pub enum ScoringDevice {
    Cpu(NdArrayDevice),
    Wgpu(WgpuDevice),
    #[cfg(feature = "cuda")]
    Cuda(CudaDevice),
}

impl ScoringDevice {
    pub fn cpu() -> Self {
        ScoringDevice::Cpu(NdArrayDevice::default())
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            ScoringDevice::Cpu(_) => BackendKind::Cpu,
            ScoringDevice::Wgpu(_) => BackendKind::Wgpu,
            #[cfg(feature = "cuda")]
            ScoringDevice::Cuda(_) => BackendKind::Cuda,
        }
    }
}

/// Capability that claims a scoring device when, and where, it is needed.
pub trait DeviceProvider: Send + Sync {
    fn acquire(&self) -> Result<ScoringDevice, DeviceError>;
}

/// Provider resolved from the run configuration. Constructing it claims nothing.
#[derive(Debug, Clone, Copy)]
pub struct ConfiguredDevices {
    kind: BackendKind,
}

impl ConfiguredDevices {
    pub fn new(kind: BackendKind) -> Self {
        Self { kind }
    }

    /// Uses `general.backend` as is; the env override is applied when launching.
    pub fn from_config(conf: &RunConfig) -> Self {
        Self::new(conf.general.backend)
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }
}

impl DeviceProvider for ConfiguredDevices {
    fn acquire(&self) -> Result<ScoringDevice, DeviceError> {
        let device = match self.kind {
            BackendKind::Cpu => ScoringDevice::cpu(),
            BackendKind::Wgpu => {
                init_cubecl_config();
                let device = WgpuDevice::default();
                init_wgpu(&device)?;
                ScoringDevice::Wgpu(device)
            }
            #[cfg(feature = "cuda")]
            BackendKind::Cuda => ScoringDevice::Cuda(CudaDevice::default()),
            #[cfg(not(feature = "cuda"))]
            BackendKind::Cuda => return Err(DeviceError::Unavailable(BackendKind::Cuda)),
        };
        info!("Acquired {:?} scoring device", device.kind());
        Ok(device)
    }
}

fn init_wgpu(device: &WgpuDevice) -> Result<(), DeviceError> {
    if WGPU_INIT.get().is_some() {
        return Ok(());
    }
    let setup = std::panic::catch_unwind(AssertUnwindSafe(|| {
        #[cfg(target_os = "macos")]
        wgpu::init_setup::<Metal>(device, Default::default());
        #[cfg(not(target_os = "macos"))]
        wgpu::init_setup::<Vulkan>(device, Default::default());
    }));
    match setup {
        Ok(()) => {
            let _ = WGPU_INIT.set(());
            Ok(())
        }
        Err(_) => Err(DeviceError::Init {
            kind: BackendKind::Wgpu,
            reason: "no usable graphics adapter".to_string(),
        }),
    }
}

fn init_cubecl_config() {
    static CUBECL_CONFIG: OnceLock<()> = OnceLock::new();
    CUBECL_CONFIG.get_or_init(|| {
        let mut config = cubecl_runtime::config::GlobalConfig::default();
        config.compilation.cache = Some(cubecl_runtime::config::cache::CacheConfig::Global);
        config.autotune.cache = cubecl_runtime::config::cache::CacheConfig::Global;
        let _ = std::panic::catch_unwind(|| cubecl_runtime::config::GlobalConfig::set(config));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_lowercase_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            backend: BackendKind,
        }
        let parsed: Wrapper = toml::from_str("backend = \"wgpu\"").unwrap();
        assert_eq!(parsed.backend, BackendKind::Wgpu);
    }

    #[test]
    fn provider_from_config_uses_configured_kind() {
        let mut conf = RunConfig::default();
        conf.general.backend = BackendKind::Wgpu;
        assert_eq!(ConfiguredDevices::from_config(&conf).kind(), BackendKind::Wgpu);
        conf.general.backend = BackendKind::Cpu;
        assert_eq!(ConfiguredDevices::from_config(&conf).kind(), BackendKind::Cpu);
    }

    #[test]
    fn cpu_provider_acquires_cpu_device() {
        let device = ConfiguredDevices::new(BackendKind::Cpu).acquire().unwrap();
        assert_eq!(device.kind(), BackendKind::Cpu);
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn cuda_without_feature_is_unavailable() {
        let err = ConfiguredDevices::new(BackendKind::Cuda).acquire().unwrap_err();
        assert!(matches!(err, DeviceError::Unavailable(BackendKind::Cuda)));
    }
}
