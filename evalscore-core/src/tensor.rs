//! Tensor helpers for the scoring pass: segmenting long inputs, masking logits,
//! and turning logits into predictions.

use crate::error::EvalError;
use ndarray::{Array2, ArrayD, Axis, Slice, concatenate};
use std::ops::Range;

/// Maximum number of positions along axis 1 fed to a single forward call.
pub const SEGMENT_LENGTH: usize = 10;

/// Value subtracted from logits at masked positions.
pub const MASKED_LOGIT_PENALTY: f32 = 10_000.0;

/// Consecutive `[start, end)` ranges of at most `segment_length` covering `0..len`.
pub fn segment_bounds(len: usize, segment_length: usize) -> Vec<Range<usize>> {
    if len == 0 || segment_length == 0 {
        return Vec::new();
    }
    let count = (len - 1) / segment_length + 1;
    (0..count)
        .map(|i| {
            let start = i * segment_length;
            start..(start + segment_length).min(len)
        })
        .collect()
}

/// Split every input along axis 1 into the same consecutive segments.
///
/// Returns one input list per segment, in segment order. All inputs must have
/// at least two axes and agree on the length of axis 1.
pub fn split_segments(
    inputs: &[ArrayD<i64>],
    segment_length: usize,
) -> Result<Vec<Vec<ArrayD<i64>>>, EvalError> {
    let Some(first) = inputs.first() else {
        return Ok(Vec::new());
    };
    let len = sequence_len(first)?;
    for (i, input) in inputs.iter().enumerate().skip(1) {
        let other = sequence_len(input)?;
        if other != len {
            return Err(EvalError::shape_mismatch(format!(
                "input {i} has {other} positions on axis 1, expected {len}"
            )));
        }
    }

    Ok(segment_bounds(len, segment_length)
        .into_iter()
        .map(|range| {
            inputs
                .iter()
                .map(|input| {
                    input
                        .slice_axis(Axis(1), Slice::from(range.clone()))
                        .to_owned()
                })
                .collect()
        })
        .collect())
}

/// Join per-segment logits back together along axis 1.
pub fn concat_segments(parts: &[Array2<f32>]) -> Result<Array2<f32>, EvalError> {
    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    concatenate(Axis(1), &views).map_err(|e| EvalError::shape_mismatch(e.to_string()))
}

/// Length of axis 1, the axis that gets segmented.
pub fn sequence_len(input: &ArrayD<i64>) -> Result<usize, EvalError> {
    if input.ndim() < 2 {
        return Err(EvalError::shape_mismatch(format!(
            "expected at least 2 axes, got shape {:?}",
            input.shape()
        )));
    }
    Ok(input.shape()[1])
}

/// `logits * mask - 10000 * (1 - mask)`.
///
/// Positions with mask 1 are unchanged; positions with mask 0 are pushed far
/// below any real logit so they never win an argmax.
pub fn apply_loss_mask(
    logits: &Array2<f32>,
    mask: &Array2<f32>,
) -> Result<Array2<f32>, EvalError> {
    if logits.shape() != mask.shape() {
        return Err(EvalError::shape_mismatch(format!(
            "loss mask shape {:?} does not match logits {:?}",
            mask.shape(),
            logits.shape()
        )));
    }
    Ok(logits * mask - mask.mapv(|m| MASKED_LOGIT_PENALTY * (1.0 - m)))
}

/// Row-wise softmax, computed with the row max subtracted for stability.
pub fn softmax_rows(logits: &Array2<f32>) -> Vec<Vec<f32>> {
    logits
        .rows()
        .into_iter()
        .map(|row| {
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let exps: Vec<f32> = row.iter().map(|&x| (x - max).exp()).collect();
            let sum: f32 = exps.iter().sum();
            exps.into_iter().map(|e| e / sum).collect()
        })
        .collect()
}

/// Index of the largest logit in each row. Ties resolve to the first index.
pub fn argmax_rows(logits: &Array2<f32>) -> Vec<usize> {
    logits
        .rows()
        .into_iter()
        .map(|row| {
            let mut best = 0;
            let mut best_value = f32::NEG_INFINITY;
            for (i, &v) in row.iter().enumerate() {
                if v > best_value {
                    best = i;
                    best_value = v;
                }
            }
            best
        })
        .collect()
}
