use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::slots::{MAX_LENGTH, MIN_LENGTH};

/// Sampling and budgeting knobs for one generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub top_p: f32,
    pub top_k: usize,
    pub temperature: f32,
    /// 1.0 disables the penalty.
    pub repetition_penalty: f32,
    /// Empirical words-to-tokens ratio used for the new-token budget.
    pub tokens_per_word: f64,
    pub min_words: i64,
    pub max_words: i64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            top_p: 0.9,
            top_k: 40,
            temperature: 1.1,
            repetition_penalty: 1.0,
            tokens_per_word: 1.4,
            min_words: MIN_LENGTH,
            max_words: MAX_LENGTH,
        }
    }
}

impl GeneratorConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("read config: {}", path.display()))?;
        let config: GeneratorConfig =
            serde_json::from_str(&text).with_context(|| format!("parse config: {}", path.display()))?;
        config.validate().with_context(|| format!("validate config: {}", path.display()))?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            anyhow::bail!("top_p must be in (0, 1], got {}", self.top_p);
        }
        if self.temperature <= 0.0 {
            anyhow::bail!("temperature must be positive, got {}", self.temperature);
        }
        if self.repetition_penalty <= 0.0 {
            anyhow::bail!("repetition_penalty must be positive, got {}", self.repetition_penalty);
        }
        if self.tokens_per_word <= 0.0 {
            anyhow::bail!("tokens_per_word must be positive, got {}", self.tokens_per_word);
        }
        if self.min_words > self.max_words {
            anyhow::bail!("min_words {} exceeds max_words {}", self.min_words, self.max_words);
        }
        Ok(())
    }

    pub fn clamp_words(&self, words: i64) -> i64 {
        words.clamp(self.min_words, self.max_words)
    }

    /// Maximum number of new tokens for a requested word count.
    pub fn token_budget(&self, words: i64) -> usize {
        let words = self.clamp_words(words);
        (words as f64 * self.tokens_per_word).round() as usize
    }
}
