use std::fmt;

use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use tracing::debug;

/// Compute device a model is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cuda { device_id: i32 },
    Cpu,
}

impl Device {
    pub const fn is_accelerated(&self) -> bool {
        matches!(self, Self::Cuda { .. })
    }

    /// Execution providers to register on a session bound to this device, in priority
    /// order. Providers missing from the runtime are skipped at registration.
    pub fn execution_providers(&self) -> Vec<ExecutionProviderDispatch> {
        match *self {
            Self::Cuda { device_id } => vec![
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CPUExecutionProvider::default().build(),
            ],
            Self::Cpu => vec![CPUExecutionProvider::default().build()],
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cuda { device_id } => write!(f, "cuda:{device_id}"),
            Self::Cpu => f.write_str("cpu"),
        }
    }
}

/// Picks CUDA when the runtime reports it, CPU otherwise.
///
/// A failed availability query counts as "not available".
pub fn select_device(device_id: i32, force_cpu: bool) -> Device {
    if force_cpu {
        return Device::Cpu;
    }

    let cuda = CUDAExecutionProvider::default().with_device_id(device_id);
    match cuda.is_available() {
        Ok(true) => Device::Cuda { device_id },
        Ok(false) => Device::Cpu,
        Err(e) => {
            debug!("CUDA availability query failed, using CPU: {}", e);
            Device::Cpu
        }
    }
}
