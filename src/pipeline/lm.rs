use anyhow::{Context, Result};
use ndarray::{s, Array2, ArrayD, ArrayViewD, Ix3};
use ::ort::value::TensorRef;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::ort::device::Device;
use crate::ort::session::OrtSessionManager;

pub const IO_CONTRACT_FILE: &str = "io_contract_lm.json";

/// Describes the exported prefill/decode graph pair.
#[derive(Debug, Clone, Deserialize)]
pub struct LmIoContract {
    pub num_layers: usize,
    pub prefill_path: String,
    pub decode_path: String,
    /// Maximum sequence length the model was trained with, if known.
    #[serde(default)]
    pub context_length: Option<usize>,
}

impl LmIoContract {
    pub fn from_dir(model_dir: &Path) -> Result<Self> {
        let contract_path = model_dir.join(IO_CONTRACT_FILE);
        let contract_text = std::fs::read_to_string(&contract_path)
            .with_context(|| format!("read lm contract: {}", contract_path.display()))?;
        serde_json::from_str(&contract_text).with_context(|| format!("parse lm contract: {}", contract_path.display()))
    }
}

/// Autoregressive next-token scorer. Implementations keep their own
/// attention cache between calls.
pub trait CausalLm {
    /// Maximum total sequence length, if the model declares one.
    fn context_window(&self) -> Option<usize>;

    /// Runs the prompt and returns logits for the position after it.
    fn prefill(&mut self, prompt_ids: &[i64]) -> Result<Vec<f32>>;

    /// Feeds one token; `total_len` counts every token seen so far including it.
    fn decode(&mut self, token_id: i64, total_len: usize) -> Result<Vec<f32>>;
}

/// Which exported graph a step runs through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Whole prompt, no cache in.
    Prefill,
    /// One token, cache in.
    Decode,
}

/// Attention cache handed back by the last graph run, laid out as
/// `[key_0, value_0, key_1, value_1, ...]`.
#[derive(Default)]
struct KvCache {
    tensors: Vec<ArrayD<f32>>,
}

impl KvCache {
    fn from_outputs(outputs: &::ort::session::SessionOutputs<'_>, num_layers: usize) -> Result<Self> {
        let mut tensors = Vec::with_capacity(num_layers * 2);
        for layer in 0..num_layers {
            for kind in ["key", "value"] {
                let name = format!("present_{kind}_{layer}");
                let view = outputs
                    .get(name.as_str())
                    .with_context(|| format!("lm output missing {name}"))?
                    .try_extract_array::<f32>()?;
                tensors.push(view.to_owned());
            }
        }
        Ok(Self { tensors })
    }

    fn covers(&self, num_layers: usize) -> bool {
        num_layers > 0 && self.tensors.len() == num_layers * 2
    }
}

/// Causal LM exported to ONNX as a prefill graph and a single-step decode
/// graph sharing `past_key_{i}` / `past_value_{i}` cache tensors.
pub struct OrtCausalLm {
    sessions: OrtSessionManager,
    contract: LmIoContract,
    cache: KvCache,
}

impl OrtCausalLm {
    pub fn load(model_dir: PathBuf, device: Device) -> Result<Self> {
        let contract = LmIoContract::from_dir(&model_dir)?;
        let mut sessions = OrtSessionManager::new(model_dir, device);
        sessions
            .preload(&contract.prefill_path)
            .with_context(|| format!("load prefill graph {}", contract.prefill_path))?;
        sessions
            .preload(&contract.decode_path)
            .with_context(|| format!("load decode graph {}", contract.decode_path))?;
        info!(
            layers = contract.num_layers,
            context_length = ?contract.context_length,
            device = %sessions.device(),
            "causal lm ready"
        );
        Ok(Self {
            sessions,
            contract,
            cache: KvCache::default(),
        })
    }

    /// Runs `token_ids` through one graph, replaces the cache with the
    /// graph's `present_*` outputs and returns next-token logits.
    fn step(&mut self, step: Step, token_ids: &[i64], total_len: usize) -> Result<Vec<f32>> {
        let num_layers = self.contract.num_layers;
        let graph = match step {
            Step::Prefill => &self.contract.prefill_path,
            Step::Decode => &self.contract.decode_path,
        };
        let sess = self.sessions.get_mut(graph).with_context(|| format!("load {graph}"))?;

        let input_ids = Array2::<i64>::from_shape_vec((1, token_ids.len()), token_ids.to_vec())
            .with_context(|| format!("{step:?} input_ids shape"))?;
        let attention_mask = Array2::<i64>::ones((1, total_len));
        let mut inputs = ::ort::inputs![
            "input_ids" => TensorRef::from_array_view(&input_ids)?,
            "attention_mask" => TensorRef::from_array_view(&attention_mask)?,
        ];
        if step == Step::Decode {
            for (layer, pair) in self.cache.tensors.chunks_exact(2).enumerate() {
                inputs.push((format!("past_key_{layer}").into(), TensorRef::from_array_view(&pair[0])?.into()));
                inputs.push((format!("past_value_{layer}").into(), TensorRef::from_array_view(&pair[1])?.into()));
            }
        }

        let outputs = sess.run(inputs)?;
        let logits = outputs
            .get("logits")
            .context("lm output missing logits")?
            .try_extract_array::<f32>()?;
        let next = final_position(logits)?;
        self.cache = KvCache::from_outputs(&outputs, num_layers)?;
        Ok(next)
    }
}

impl CausalLm for OrtCausalLm {
    fn context_window(&self) -> Option<usize> {
        self.contract.context_length
    }

    fn prefill(&mut self, prompt_ids: &[i64]) -> Result<Vec<f32>> {
        self.cache = KvCache::default();
        let logits = self.step(Step::Prefill, prompt_ids, prompt_ids.len())?;
        debug!(prompt_tokens = prompt_ids.len(), "prefill done");
        Ok(logits)
    }

    fn decode(&mut self, token_id: i64, total_len: usize) -> Result<Vec<f32>> {
        if !self.cache.covers(self.contract.num_layers) {
            anyhow::bail!("decode called before prefill");
        }
        self.step(Step::Decode, &[token_id], total_len)
    }
}

/// Logits at the last sequence position of a `[B,T,V]` output.
fn final_position(logits: ArrayViewD<'_, f32>) -> Result<Vec<f32>> {
    let logits = logits
        .into_dimensionality::<Ix3>()
        .context("lm logits shape should be [B,T,V]")?;
    let seq_len = logits.shape()[1];
    if seq_len == 0 {
        anyhow::bail!("lm logits has zero sequence length")
    }
    Ok(logits.slice(s![0, seq_len - 1, ..]).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn last_logits_come_from_final_position() {
        let logits = Array3::<f32>::from_shape_fn((1, 3, 4), |(_, t, v)| (t * 10 + v) as f32).into_dyn();
        assert_eq!(final_position(logits.view()).unwrap(), vec![20.0, 21.0, 22.0, 23.0]);
    }

    #[test]
    fn rejects_non_3d_logits() {
        let logits = ndarray::Array2::<f32>::zeros((1, 4)).into_dyn();
        assert!(final_position(logits.view()).is_err());

        let empty = Array3::<f32>::zeros((1, 0, 4)).into_dyn();
        assert!(final_position(empty.view()).is_err());
    }

    #[test]
    fn empty_cache_covers_no_layers() {
        let mut cache = KvCache::default();
        assert!(!cache.covers(2));
        cache.tensors = vec![Array3::<f32>::zeros((1, 1, 1)).into_dyn(); 4];
        assert!(cache.covers(2));
        assert!(!cache.covers(3));
        assert!(!KvCache::default().covers(0));
    }

    #[test]
    fn contract_context_length_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(IO_CONTRACT_FILE),
            r#"{"num_layers": 12, "prefill_path": "prefill.onnx", "decode_path": "decode.onnx"}"#,
        )
        .unwrap();
        let contract = LmIoContract::from_dir(dir.path()).unwrap();
        assert_eq!(contract.num_layers, 12);
        assert_eq!(contract.context_length, None);
    }

    #[test]
    fn missing_model_dir_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-model");
        assert!(OrtCausalLm::load(missing, Device::Cpu).is_err());
    }
}
