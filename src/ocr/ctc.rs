//! CTC greedy decoding.
//!
//! Best-path decoding of a `[timesteps, classes]` score matrix:
//! 1. argmax per timestep
//! 2. collapse adjacent repeats
//! 3. drop the blank class
//!
//! Scores may be probabilities, logits or log-probabilities. Rows that are
//! not already a distribution are passed through softmax first.

use ndarray::ArrayView2;

use super::charset::Charset;
use crate::error::RecognitionError;

/// One emitted symbol and the timesteps that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct CharSegment {
    pub symbol: String,
    /// Highest top-class probability over the symbol's run.
    pub confidence: f32,
    pub start_step: usize,
    /// Exclusive.
    pub end_step: usize,
}

/// Decoder output.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub text: String,
    /// Mean of per-symbol confidences; 0.0 when nothing was emitted.
    pub confidence: f32,
    pub segments: Vec<CharSegment>,
    pub timesteps: usize,
}

#[derive(Debug, Clone)]
pub struct CtcDecoder {
    charset: Charset,
}

impl CtcDecoder {
    pub fn new(charset: Charset) -> Self {
        Self { charset }
    }

    pub fn decode(&self, scores: ArrayView2<'_, f32>) -> Result<Decoded, RecognitionError> {
        let (steps, classes) = scores.dim();
        if classes == 0 {
            return Err(RecognitionError::Output(
                "score matrix has no classes".to_string(),
            ));
        }
        let blank = self.charset.blank_index();

        let mut segments: Vec<CharSegment> = Vec::new();
        let mut prev: Option<usize> = None;

        for (t, row) in scores.outer_iter().enumerate() {
            if row.iter().any(|v| !v.is_finite()) {
                return Err(RecognitionError::Numeric { step: t });
            }
            let probs = as_distribution(row.to_vec());

            // Ties resolve to the lowest index.
            let (best, best_p) = probs
                .iter()
                .enumerate()
                .fold((0usize, f32::NEG_INFINITY), |acc, (i, &p)| {
                    if p > acc.1 {
                        (i, p)
                    } else {
                        acc
                    }
                });

            if best == blank {
                prev = None;
                continue;
            }

            if prev == Some(best) {
                if let Some(seg) = segments.last_mut() {
                    seg.end_step = t + 1;
                    seg.confidence = seg.confidence.max(best_p);
                }
                continue;
            }

            let symbol = self
                .charset
                .symbol(best)
                .ok_or(RecognitionError::Vocabulary {
                    index: best,
                    size: self.charset.class_count(),
                })?;
            segments.push(CharSegment {
                symbol: symbol.to_string(),
                confidence: best_p,
                start_step: t,
                end_step: t + 1,
            });
            prev = Some(best);
        }

        let text: String = segments.iter().map(|s| s.symbol.as_str()).collect();
        let confidence = if segments.is_empty() {
            0.0
        } else {
            segments.iter().map(|s| s.confidence).sum::<f32>() / segments.len() as f32
        };

        Ok(Decoded {
            text,
            confidence,
            segments,
            timesteps: steps,
        })
    }
}

/// Return the row as probabilities, applying softmax unless it already is one.
fn as_distribution(row: Vec<f32>) -> Vec<f32> {
    let in_range = row.iter().all(|v| (0.0..=1.0).contains(v));
    let sum: f32 = row.iter().sum();
    if in_range && (sum - 1.0).abs() < 1e-3 {
        return row;
    }
    let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = row.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}
