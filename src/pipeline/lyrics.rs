use anyhow::{Context, Result};
use std::path::Path;
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use crate::config::GeneratorConfig;
use crate::ort::device::Device;
use crate::pipeline::lm::{CausalLm, OrtCausalLm};
use crate::pipeline::sampling::{apply_repetition_penalty, sample_token, SamplingParams};
use crate::slots::AttributeSet;

pub const LYRICS_MARKER: &str = "### LYRICS START BELOW ###";

const TOKENIZER_FILE: &str = "tokenizer.json";
const EOS_CANDIDATES: [&str; 3] = ["<|endoftext|>", "</s>", "<eos>"];

const DEFAULT_GENRE: &str = "pop";
const DEFAULT_EMOTION: &str = "joy";
const DEFAULT_TOPIC: &str = "love";
const DEFAULT_LENGTH: i64 = 200;

/// Attributes handed to the model, with defaults filled in for anything
/// the tracker did not collect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub genre: String,
    pub topic: String,
    pub emotion: String,
    pub length: i64,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            genre: DEFAULT_GENRE.to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            emotion: DEFAULT_EMOTION.to_string(),
            length: DEFAULT_LENGTH,
        }
    }
}

impl From<&AttributeSet> for GenerationRequest {
    fn from(slots: &AttributeSet) -> Self {
        let defaults = GenerationRequest::default();
        Self {
            genre: slots.genre.map(|g| g.as_str().to_string()).unwrap_or(defaults.genre),
            topic: slots.topic.map(|t| t.label().to_string()).unwrap_or(defaults.topic),
            emotion: slots.emotion.clone().unwrap_or(defaults.emotion),
            length: slots.length.unwrap_or(defaults.length),
        }
    }
}

pub fn build_prompt(request: &GenerationRequest) -> String {
    let GenerationRequest {
        genre,
        topic,
        emotion,
        length,
    } = request;
    format!(
        "You are a professional {genre} songwriter.\n\
         Your task is to write original lyrics in the style of {genre} music.\n\
         - Use themes, rhythm, and vocabulary that are typical of {genre} songs.\n\
         - The song should convey a strong sense of {emotion}.\n\
         - The central theme or topic of the lyrics is: {topic}.\n\
         - Target length: around {length} words.\n\
         \n{LYRICS_MARKER}\n"
    )
}

/// Pulls the lyrics out of the decoded prompt + continuation.
pub fn extract_lyrics(full_text: &str, prompt: &str) -> String {
    if let Some((_, after)) = full_text.split_once(LYRICS_MARKER) {
        after.trim().to_string()
    } else if let Some(rest) = full_text.strip_prefix(prompt) {
        rest.trim().to_string()
    } else {
        full_text.trim().to_string()
    }
}

/// Outcome of one generation call.
#[derive(Debug, Clone)]
pub struct Generation {
    pub lyrics: String,
    pub prompt_tokens: usize,
    pub new_tokens: usize,
    pub max_new_tokens: usize,
}

pub struct LyricGenerator<M = OrtCausalLm> {
    model: M,
    tokenizer: Tokenizer,
    eos_token_id: Option<u32>,
    pad_token_id: Option<u32>,
    config: GeneratorConfig,
}

impl LyricGenerator<OrtCausalLm> {
    /// Loads `tokenizer.json` and the ONNX graphs from `model_dir`.
    pub fn load(model_dir: &Path, config: GeneratorConfig) -> Result<Self> {
        let started = Instant::now();
        let tokenizer_path = model_dir.join(TOKENIZER_FILE);
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("load tokenizer {}: {}", tokenizer_path.display(), e))?;
        let device = Device::select();
        let model = OrtCausalLm::load(model_dir.to_path_buf(), device)
            .with_context(|| format!("load causal lm from {}", model_dir.display()))?;
        info!(
            model_dir = %model_dir.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "lyric generator loaded"
        );
        Ok(Self::from_parts(model, tokenizer, config))
    }
}

impl<M: CausalLm> LyricGenerator<M> {
    pub fn from_parts(model: M, tokenizer: Tokenizer, config: GeneratorConfig) -> Self {
        let eos_token_id = EOS_CANDIDATES.iter().find_map(|t| tokenizer.token_to_id(t));
        if eos_token_id.is_none() {
            warn!("tokenizer has no end-of-sequence token; generation runs to the token budget");
        }
        Self {
            model,
            tokenizer,
            eos_token_id,
            pad_token_id: eos_token_id,
            config,
        }
    }

    pub fn generate(&mut self, request: &GenerationRequest) -> Result<String> {
        self.generate_with_stats(request).map(|g| g.lyrics)
    }

    pub fn generate_with_stats(&mut self, request: &GenerationRequest) -> Result<Generation> {
        let started = Instant::now();
        let words = self.config.clamp_words(request.length);
        let max_new_tokens = self.config.token_budget(words);

        let prompt = build_prompt(request);
        let encoding = self
            .tokenizer
            .encode(prompt.as_str(), true)
            .map_err(|e| anyhow::anyhow!("tokenize lyric prompt: {}", e))?;
        let mut prompt_ids: Vec<u32> = encoding.get_ids().to_vec();
        if prompt_ids.is_empty() {
            anyhow::bail!("lyric prompt tokenized to nothing");
        }
        let context_window = self.model.context_window();
        if let Some(window) = context_window {
            if prompt_ids.len() > window {
                warn!(prompt_tokens = prompt_ids.len(), window, "truncating prompt to context window");
                prompt_ids.truncate(window);
            }
        }
        info!(
            genre = %request.genre,
            topic = %request.topic,
            emotion = %request.emotion,
            words,
            max_new_tokens,
            prompt_tokens = prompt_ids.len(),
            "generating lyrics"
        );

        let params = SamplingParams::from(&self.config);
        let prompt_i64: Vec<i64> = prompt_ids.iter().copied().map(i64::from).collect();
        let mut logits = self.model.prefill(&prompt_i64).context("run prefill")?;
        let mut sequence = prompt_ids.clone();
        let mut new_tokens = 0usize;
        let mut rng = rand::rng();

        while new_tokens < max_new_tokens {
            apply_repetition_penalty(&mut logits, &sequence, params.repetition_penalty);
            let next = sample_token(&logits, &params, &mut rng).context("lm produced no finite logits")? as u32;
            sequence.push(next);
            new_tokens += 1;

            if Some(next) == self.eos_token_id || Some(next) == self.pad_token_id {
                debug!(new_tokens, "end of sequence");
                break;
            }
            if new_tokens == max_new_tokens {
                break;
            }
            if let Some(window) = context_window {
                if sequence.len() >= window {
                    warn!(window, new_tokens, "context window exhausted");
                    break;
                }
            }
            logits = self
                .model
                .decode(i64::from(next), sequence.len())
                .with_context(|| format!("decode step {new_tokens}"))?;
        }

        let full_text = self
            .tokenizer
            .decode(&sequence, true)
            .map_err(|e| anyhow::anyhow!("decode lm output: {}", e))?;
        let lyrics = extract_lyrics(&full_text, &prompt);
        info!(
            new_tokens,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "lyrics generated"
        );
        Ok(Generation {
            lyrics,
            prompt_tokens: prompt_ids.len(),
            new_tokens,
            max_new_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::{SlotName, SlotTracker};
    use std::str::FromStr;

    const VOCAB_SIZE: usize = 9;
    const EOS: u32 = 0;
    const VERSE: u32 = 6;
    const ONE: u32 = 7;
    const LA: u32 = 8;

    fn word_tokenizer() -> Tokenizer {
        let json = r####"{
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [
                {"id": 0, "content": "<|endoftext|>", "single_word": false, "lstrip": false,
                 "rstrip": false, "normalized": false, "special": true}
            ],
            "normalizer": null,
            "pre_tokenizer": {"type": "Whitespace"},
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": {"<|endoftext|>": 0, "[UNK]": 1, "###": 2, "LYRICS": 3, "START": 4,
                          "BELOW": 5, "Verse": 6, "1": 7, "la": 8},
                "unk_token": "[UNK]"
            }
        }"####;
        Tokenizer::from_str(json).unwrap()
    }

    /// Emits a fixed token script, then repeats the last entry.
    struct ScriptedLm {
        script: Vec<u32>,
        context_window: Option<usize>,
        prefill_len: usize,
        decode_calls: usize,
        last_total_len: usize,
        emitted: usize,
    }

    impl ScriptedLm {
        fn new(script: Vec<u32>) -> Self {
            Self {
                script,
                context_window: None,
                prefill_len: 0,
                decode_calls: 0,
                last_total_len: 0,
                emitted: 0,
            }
        }

        fn next_logits(&mut self) -> Vec<f32> {
            let idx = self.emitted.min(self.script.len() - 1);
            self.emitted += 1;
            let mut logits = vec![0.0; VOCAB_SIZE];
            logits[self.script[idx] as usize] = 50.0;
            logits
        }
    }

    impl CausalLm for ScriptedLm {
        fn context_window(&self) -> Option<usize> {
            self.context_window
        }

        fn prefill(&mut self, prompt_ids: &[i64]) -> Result<Vec<f32>> {
            self.prefill_len = prompt_ids.len();
            Ok(self.next_logits())
        }

        fn decode(&mut self, _token_id: i64, total_len: usize) -> Result<Vec<f32>> {
            self.decode_calls += 1;
            self.last_total_len = total_len;
            Ok(self.next_logits())
        }
    }

    fn request(length: i64) -> GenerationRequest {
        GenerationRequest {
            length,
            ..GenerationRequest::default()
        }
    }

    #[test]
    fn prompt_contains_every_directive() {
        let prompt = build_prompt(&GenerationRequest::default());
        assert!(prompt.contains("professional pop songwriter"));
        assert!(prompt.contains("strong sense of joy"));
        assert!(prompt.contains("central theme or topic of the lyrics is: love"));
        assert!(prompt.contains("around 200 words"));
        assert!(prompt.ends_with("### LYRICS START BELOW ###\n"));
    }

    #[test]
    fn missing_attributes_fall_back_to_defaults() {
        let mut tracker = SlotTracker::default();
        tracker.update_slot(SlotName::Genre, "rap").unwrap();
        tracker.update_slot(SlotName::Emotion, "Grief").unwrap();
        let req = GenerationRequest::from(tracker.slots());
        assert_eq!(
            req,
            GenerationRequest {
                genre: "hiphop".to_string(),
                topic: "love".to_string(),
                emotion: "Grief".to_string(),
                length: 200,
            }
        );
    }

    #[test]
    fn extraction_prefers_marker_then_prompt_prefix() {
        let prompt = build_prompt(&GenerationRequest::default());
        let decoded = format!("{prompt}  Verse 1...  ");
        assert_eq!(extract_lyrics(&decoded, &prompt), "Verse 1...");

        let body = prompt.strip_suffix(&format!("{LYRICS_MARKER}\n")).unwrap();
        let decoded = format!("{body}{LYRICS_MARKER}\n  Verse 1...  ");
        assert_eq!(extract_lyrics(&decoded, &prompt), "Verse 1...");

        // decoder dropped the marker but kept the prompt verbatim
        let markerless_prompt = "Write a pop song about love.\n";
        let decoded = format!("{markerless_prompt}  chorus line ");
        assert_eq!(extract_lyrics(&decoded, markerless_prompt), "chorus line");

        assert_eq!(extract_lyrics("  something else entirely ", "prompt"), "something else entirely");
    }

    #[test]
    fn extraction_splits_on_first_marker_only() {
        let decoded = format!("intro {LYRICS_MARKER} first {LYRICS_MARKER} second");
        assert_eq!(extract_lyrics(&decoded, "unrelated"), format!("first {LYRICS_MARKER} second"));
    }

    #[test]
    fn generate_returns_only_the_continuation() {
        let lm = ScriptedLm::new(vec![VERSE, ONE, LA, LA, EOS]);
        let mut generator = LyricGenerator::from_parts(lm, word_tokenizer(), GeneratorConfig::default());
        let generation = generator.generate_with_stats(&request(300)).unwrap();
        assert_eq!(generation.lyrics, "Verse 1 la la");
        assert_eq!(generation.new_tokens, 5);
        assert_eq!(generation.max_new_tokens, 420);
        assert_eq!(generator.model.decode_calls, 4);
    }

    #[test]
    fn generation_stops_at_token_budget() {
        let lm = ScriptedLm::new(vec![LA]);
        let mut generator = LyricGenerator::from_parts(lm, word_tokenizer(), GeneratorConfig::default());
        let generation = generator.generate_with_stats(&request(50)).unwrap();
        assert_eq!(generation.max_new_tokens, 280);
        assert_eq!(generation.new_tokens, 280);
        assert_eq!(generator.model.decode_calls, 279);
        assert_eq!(generator.model.last_total_len, generation.prompt_tokens + 279);
    }

    #[test]
    fn oversized_length_is_clamped() {
        let lm = ScriptedLm::new(vec![EOS]);
        let mut generator = LyricGenerator::from_parts(lm, word_tokenizer(), GeneratorConfig::default());
        let generation = generator.generate_with_stats(&request(5000)).unwrap();
        assert_eq!(generation.max_new_tokens, 1680);
        assert_eq!(generation.new_tokens, 1);
        assert_eq!(generation.lyrics, "");
    }

    #[test]
    fn prompt_is_truncated_to_context_window() {
        let mut lm = ScriptedLm::new(vec![LA]);
        lm.context_window = Some(12);
        let mut generator = LyricGenerator::from_parts(lm, word_tokenizer(), GeneratorConfig::default());
        let generation = generator.generate_with_stats(&request(500)).unwrap();
        assert_eq!(generator.model.prefill_len, 12);
        assert_eq!(generation.prompt_tokens, 12);
        assert_eq!(generation.new_tokens, 1);
        assert_eq!(generator.model.decode_calls, 0);
    }
}
