//! Stochastic next-token selection: repetition penalty, temperature,
//! top-k, nucleus (top-p), then a multinomial draw.

use rand::Rng;

use crate::config::GeneratorConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub top_p: f32,
    pub top_k: usize,
    pub temperature: f32,
    pub repetition_penalty: f32,
}

impl From<&GeneratorConfig> for SamplingParams {
    fn from(cfg: &GeneratorConfig) -> Self {
        Self {
            top_p: cfg.top_p,
            top_k: cfg.top_k,
            temperature: cfg.temperature,
            repetition_penalty: cfg.repetition_penalty,
        }
    }
}

/// Applies the usual CTRL-style penalty to every token already in `history`.
pub fn apply_repetition_penalty(logits: &mut [f32], history: &[u32], penalty: f32) {
    if (penalty - 1.0).abs() < f32::EPSILON {
        return;
    }
    for id in history {
        let idx = *id as usize;
        if let Some(v) = logits.get_mut(idx) {
            *v = if *v > 0.0 { *v / penalty } else { *v * penalty };
        }
    }
}

/// Candidate tokens and their renormalized probabilities after temperature,
/// top-k and top-p filtering, most probable first.
pub fn filtered_distribution(logits: &[f32], params: &SamplingParams) -> Vec<(usize, f32)> {
    let temperature = params.temperature.max(1e-5);
    let mut candidates: Vec<(usize, f32)> = logits
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .map(|(idx, v)| (idx, *v / temperature))
        .collect();
    if candidates.is_empty() {
        return Vec::new();
    }
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

    if params.top_k > 0 && candidates.len() > params.top_k {
        candidates.truncate(params.top_k);
    }

    let max = candidates[0].1;
    let mut total = 0.0f32;
    for (_, v) in candidates.iter_mut() {
        *v = (*v - max).exp();
        total += *v;
    }
    for (_, v) in candidates.iter_mut() {
        *v /= total;
    }

    // Keep the smallest prefix whose mass reaches top_p; the top token always survives.
    if params.top_p < 1.0 {
        let mut cumulative = 0.0f32;
        let mut keep = candidates.len();
        for (i, (_, p)) in candidates.iter().enumerate() {
            cumulative += *p;
            if cumulative >= params.top_p {
                keep = i + 1;
                break;
            }
        }
        candidates.truncate(keep);
        let kept: f32 = candidates.iter().map(|(_, p)| *p).sum();
        for (_, p) in candidates.iter_mut() {
            *p /= kept;
        }
    }
    candidates
}

/// Draws one token id. Returns `None` when no logit is finite.
pub fn sample_token<R: Rng>(logits: &[f32], params: &SamplingParams, rng: &mut R) -> Option<usize> {
    let candidates = filtered_distribution(logits, params);
    let last = candidates.last()?.0;
    let draw: f32 = rng.random();
    let mut cumulative = 0.0f32;
    for (idx, p) in &candidates {
        cumulative += *p;
        if draw < cumulative {
            return Some(*idx);
        }
    }
    // float rounding
    Some(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn params() -> SamplingParams {
        SamplingParams::from(&GeneratorConfig::default())
    }

    #[test]
    fn top_k_limits_candidate_count() {
        let logits: Vec<f32> = (0..100).map(|i| i as f32 * 0.01).collect();
        let dist = filtered_distribution(&logits, &SamplingParams { top_p: 1.0, ..params() });
        assert_eq!(dist.len(), 40);
        assert_eq!(dist[0].0, 99);
        let mass: f32 = dist.iter().map(|(_, p)| p).sum();
        assert!((mass - 1.0).abs() < 1e-4);
    }

    #[test]
    fn top_p_drops_the_tail() {
        let logits = vec![10.0, 0.0, 0.0, 0.0];
        let dist = filtered_distribution(&logits, &params());
        assert_eq!(dist, vec![(0, 1.0)]);
    }

    #[test]
    fn masked_logits_are_never_sampled() {
        let logits = vec![f32::NEG_INFINITY, 1.0, f32::NEG_INFINITY, 1.0];
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let id = sample_token(&logits, &params(), &mut rng).unwrap();
            assert!(id == 1 || id == 3);
        }
    }

    #[test]
    fn no_finite_logits_yields_none() {
        let logits = vec![f32::NEG_INFINITY; 4];
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(sample_token(&logits, &params(), &mut rng), None);
    }

    #[test]
    fn penalty_of_one_is_a_no_op() {
        let mut logits = vec![2.0, -2.0, 1.0];
        apply_repetition_penalty(&mut logits, &[0, 1], 1.0);
        assert_eq!(logits, vec![2.0, -2.0, 1.0]);

        apply_repetition_penalty(&mut logits, &[0, 1], 2.0);
        assert_eq!(logits, vec![1.0, -4.0, 1.0]);
    }
}
