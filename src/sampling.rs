//! Token sampling
//!
//! Logits-level token selection driven by [`PredictionConfig`]. The default
//! configuration is deterministic arg-max; probabilistic paths use a seeded
//! xorshift RNG so generations are reproducible for a fixed seed.

use thiserror::Error;

use crate::engine::TokenId;
use crate::types::{MirostatMode, PredictionConfig};

/// Sampling failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SamplingError {
    #[error("Empty logits vector")]
    EmptyLogits,

    #[error("No candidate tokens survived filtering")]
    NoCandidates,
}

/// Deterministic RNG for reproducible sampling (xorshift64).
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        // Zero state would produce all zeros
        Self {
            state: if seed == 0 { 0x9E3779B97F4A7C15 } else { seed },
        }
    }

    /// Next random float in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        (self.state >> 40) as f32 / (1u64 << 24) as f32
    }
}

/// Derives a seed from system entropy when the configured seed is 0.
pub fn entropy_seed() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}

/// Stateful per-call token selector.
///
/// One selector lives for one generation call; Mirostat state does not leak
/// across calls.
pub struct TokenSampler {
    config: PredictionConfig,
    rng: SeededRng,
    mirostat_mu: f32,
}

impl TokenSampler {
    pub fn new(config: PredictionConfig, seed: u32) -> Self {
        let seed = if seed == 0 { entropy_seed() } else { seed };
        let mirostat_mu = 2.0 * config.mirostat_tau;
        Self {
            config,
            rng: SeededRng::new(seed as u64),
            mirostat_mu,
        }
    }

    /// Select the next token from `logits`. `recent` is the tail of
    /// generated tokens the repetition penalties consider.
    pub fn select(&mut self, logits: &[f32], recent: &[TokenId]) -> Result<TokenId, SamplingError> {
        if logits.is_empty() {
            return Err(SamplingError::EmptyLogits);
        }

        let mut work = logits.to_vec();
        self.apply_penalties(&mut work, recent);

        if self.config.is_greedy() {
            return argmax(&work).ok_or(SamplingError::NoCandidates);
        }

        if self.config.mirostat == MirostatMode::V2 {
            return self.sample_mirostat(&work);
        }

        let temperature = self.config.temperature.max(0.05);
        for logit in &mut work {
            *logit /= temperature;
        }

        if self.config.top_k > 0 {
            apply_top_k(&mut work, self.config.top_k as usize);
        }

        let mut probs = softmax(&work);
        if self.config.min_p > 0.0 {
            apply_min_p(&mut probs, self.config.min_p);
        }
        if self.config.typical_p < 1.0 {
            apply_typical_p(&mut probs, self.config.typical_p);
        }
        if self.config.top_p < 1.0 {
            apply_top_p(&mut probs, self.config.top_p);
        }

        self.sample_from(&probs)
    }

    fn apply_penalties(&self, logits: &mut [f32], recent: &[TokenId]) {
        let window_start = recent.len().saturating_sub(self.config.repeat_window);
        let window = &recent[window_start..];
        if window.is_empty() {
            return;
        }

        let repeat = self.config.repeat_penalty;
        let frequency = self.config.frequency_penalty;
        let presence = self.config.presence_penalty;
        if repeat <= 1.0 && frequency == 0.0 && presence == 0.0 {
            return;
        }

        let mut counts = std::collections::HashMap::new();
        for &token in window {
            *counts.entry(token).or_insert(0u32) += 1;
        }

        for (&token, &count) in &counts {
            let Some(logit) = logits.get_mut(token as usize) else {
                continue;
            };
            if repeat > 1.0 {
                // Push repeated tokens toward zero regardless of sign.
                if *logit > 0.0 {
                    *logit /= repeat;
                } else {
                    *logit *= repeat;
                }
            }
            *logit -= frequency * count as f32 + presence;
        }
    }

    fn sample_mirostat(&mut self, logits: &[f32]) -> Result<TokenId, SamplingError> {
        let probs = softmax(logits);

        // Keep tokens whose surprise (-log2 p) stays under the running
        // threshold; always keep the arg-max so the pool is never empty.
        let best = argmax(logits).ok_or(SamplingError::NoCandidates)?;
        let mut filtered = vec![0.0f32; probs.len()];
        for (i, &p) in probs.iter().enumerate() {
            if p > 0.0 && (-p.log2() <= self.mirostat_mu || i as TokenId == best) {
                filtered[i] = p;
            }
        }
        renormalize(&mut filtered);

        let token = self.sample_from(&filtered)?;
        let observed = -probs[token as usize].max(f32::MIN_POSITIVE).log2();
        self.mirostat_mu -= self.config.mirostat_eta * (observed - self.config.mirostat_tau);
        Ok(token)
    }

    fn sample_from(&mut self, probs: &[f32]) -> Result<TokenId, SamplingError> {
        let r = self.rng.next_f32();
        let mut cumsum = 0.0;
        for (i, &p) in probs.iter().enumerate() {
            cumsum += p;
            if r < cumsum {
                return Ok(i as TokenId);
            }
        }
        // Rounding residue: fall back to the last token with mass.
        probs
            .iter()
            .rposition(|&p| p > 0.0)
            .map(|i| i as TokenId)
            .ok_or(SamplingError::NoCandidates)
    }
}

/// Index of the largest finite logit.
pub fn argmax(logits: &[f32]) -> Option<TokenId> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &logit) in logits.iter().enumerate() {
        if logit == f32::NEG_INFINITY {
            continue;
        }
        match best {
            Some((_, b)) if logit <= b => {}
            _ => best = Some((i, logit)),
        }
    }
    best.map(|(i, _)| i as TokenId)
}

fn apply_top_k(logits: &mut [f32], k: usize) {
    if k == 0 || k >= logits.len() {
        return;
    }
    let mut sorted: Vec<f32> = logits.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let threshold = sorted[k - 1];
    for logit in logits.iter_mut() {
        if *logit < threshold {
            *logit = f32::NEG_INFINITY;
        }
    }
}

fn apply_top_p(probs: &mut [f32], p: f32) {
    let mut indexed: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut cumsum = 0.0;
    let mut cutoff = indexed.len();
    for (rank, (_, prob)) in indexed.iter().enumerate() {
        cumsum += prob;
        if cumsum >= p {
            cutoff = rank + 1;
            break;
        }
    }

    for (i, _) in indexed.iter().skip(cutoff) {
        probs[*i] = 0.0;
    }
    renormalize(probs);
}

fn apply_min_p(probs: &mut [f32], min_p: f32) {
    let max_p = probs.iter().copied().fold(0.0f32, f32::max);
    let floor = max_p * min_p;
    for p in probs.iter_mut() {
        if *p < floor {
            *p = 0.0;
        }
    }
    renormalize(probs);
}

fn apply_typical_p(probs: &mut [f32], typical_p: f32) {
    // Locally typical sampling: keep tokens whose surprise is closest to
    // the distribution's entropy until the kept mass reaches typical_p.
    let entropy: f32 = probs
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| -p * p.ln())
        .sum();

    let mut indexed: Vec<(usize, f32, f32)> = probs
        .iter()
        .enumerate()
        .filter(|(_, &p)| p > 0.0)
        .map(|(i, &p)| (i, p, ((-p.ln()) - entropy).abs()))
        .collect();
    indexed.sort_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep = vec![false; probs.len()];
    let mut cumsum = 0.0;
    for (i, p, _) in &indexed {
        keep[*i] = true;
        cumsum += p;
        if cumsum >= typical_p {
            break;
        }
    }

    for (i, p) in probs.iter_mut().enumerate() {
        if !keep[i] {
            *p = 0.0;
        }
    }
    renormalize(probs);
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max_logit).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 {
        exps.iter().map(|&e| e / sum).collect()
    } else {
        vec![1.0 / logits.len() as f32; logits.len()]
    }
}

fn renormalize(probs: &mut [f32]) {
    let sum: f32 = probs.iter().sum();
    if sum > 0.0 {
        for p in probs.iter_mut() {
            *p /= sum;
        }
    }
}
