use ::ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider,
    ExecutionProviderDispatch,
};
use std::fmt;
use tracing::{debug, info};

/// Execution target for the ONNX graphs, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cuda,
    CoreMl,
    Cpu,
}

impl Device {
    pub const PREFERENCE: [Device; 3] = [Device::Cuda, Device::CoreMl, Device::Cpu];

    fn probe(self) -> bool {
        let available = match self {
            Device::Cuda => CUDAExecutionProvider::default().is_available(),
            Device::CoreMl => CoreMLExecutionProvider::default().is_available(),
            Device::Cpu => return true,
        };
        match available {
            Ok(v) => v,
            Err(e) => {
                debug!(device = %self, error = %e, "execution provider probe failed");
                false
            }
        }
    }

    pub fn execution_provider(self) -> ExecutionProviderDispatch {
        match self {
            Device::Cuda => CUDAExecutionProvider::default().build(),
            Device::CoreMl => CoreMLExecutionProvider::default().build(),
            Device::Cpu => CPUExecutionProvider::default().build(),
        }
    }

    /// Picks the first available device. Evaluated once per generator.
    pub fn select() -> Device {
        let device = select_with(Device::probe);
        info!(device = %device, "selected execution device");
        device
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Device::Cuda => "cuda",
            Device::CoreMl => "coreml",
            Device::Cpu => "cpu",
        })
    }
}

fn select_with(mut is_available: impl FnMut(Device) -> bool) -> Device {
    Device::PREFERENCE
        .into_iter()
        .find(|device| *device == Device::Cpu || is_available(*device))
        .unwrap_or(Device::Cpu)
}
