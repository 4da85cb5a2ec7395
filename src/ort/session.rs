use anyhow::{Context, Result};
use ::ort::session::Session;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use super::device::Device;

/// Lazily loads and caches ONNX sessions from one model directory.
pub struct OrtSessionManager {
    model_dir: PathBuf,
    device: Device,
    sessions: HashMap<String, Session>,
}

impl OrtSessionManager {
    pub fn new(model_dir: PathBuf, device: Device) -> Self {
        Self {
            model_dir,
            device,
            sessions: HashMap::new(),
        }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn get_mut(&mut self, model_name: &str) -> Result<&mut Session> {
        if !self.sessions.contains_key(model_name) {
            let model_path = self.model_path(model_name);
            let session = Session::builder()
                .with_context(|| "create session builder")?
                .with_execution_providers([self.device.execution_provider()])
                .with_context(|| format!("register {} execution provider", self.device))?
                .commit_from_file(model_path.as_path())
                .with_context(|| format!("load onnx: {}", model_path.display()))?;
            info!(model = %model_path.display(), device = %self.device, "loaded onnx session");
            self.sessions.insert(model_name.to_string(), session);
        }
        self.sessions
            .get_mut(model_name)
            .with_context(|| format!("session {model_name} missing after load"))
    }

    /// Loads `model_name` now so a bad path fails at construction time.
    pub fn preload(&mut self, model_name: &str) -> Result<()> {
        self.get_mut(model_name).map(|_| ())
    }

    pub fn model_path(&self, model_name: &str) -> PathBuf {
        let path = Path::new(model_name);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.model_dir.join(model_name)
        }
    }
}
