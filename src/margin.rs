//! Margin decision layer: scores embeddings by negative squared distance to
//! each class mean.
use crate::error::{EvalError, Result};
use crate::means::ClassMeans;
use crate::MMFloat;
use ndarray::{Array2, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Post-processing applied to the raw negative-distance scores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScorePolicy {
    /// Normalise into a probability simplex.
    Softmax,
    /// Return `-||e - mu_c||^2` unchanged.
    RawScores,
}

impl ScorePolicy {
    /// Raw scores only when margin-mode and the ball score are on and output
    /// normalisation is off.
    pub const fn resolve(use_mmlda: bool, use_ball: bool, normalize_output: bool) -> Self {
        if use_mmlda && use_ball && !normalize_output {
            Self::RawScores
        } else {
            Self::Softmax
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarginLayer {
    means: ClassMeans,
    policy: ScorePolicy,
}

impl MarginLayer {
    pub const fn new(means: ClassMeans, policy: ScorePolicy) -> Self {
        Self { means, policy }
    }

    pub const fn policy(&self) -> ScorePolicy {
        self.policy
    }

    pub const fn means(&self) -> &ClassMeans {
        &self.means
    }

    pub fn num_classes(&self) -> usize {
        self.means.num_classes()
    }

    pub fn dim(&self) -> usize {
        self.means.dim()
    }

    /// `score[b, c] = -sum_d (embedding[b, d] - mean[c, d])^2`
    pub fn raw_scores(&self, embeddings: &ArrayView2<MMFloat>) -> Array2<MMFloat> {
        debug_assert_eq!(embeddings.ncols(), self.dim());
        let means = self.means.view();
        let mut scores = Array2::zeros((embeddings.nrows(), self.num_classes()));
        Zip::from(scores.rows_mut())
            .and(embeddings.rows())
            .for_each(|mut row, e| {
                Zip::from(&mut row).and(means.rows()).for_each(|s, m| {
                    *s = -e
                        .iter()
                        .zip(m.iter())
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum::<MMFloat>();
                });
            });
        scores
    }

    /// Scores with the configured post-processing applied.
    ///
    /// # Errors
    /// `NumericAnomaly` if any score is NaN or infinite.
    pub fn forward(&self, embeddings: &ArrayView2<MMFloat>) -> Result<Array2<MMFloat>> {
        let raw = self.raw_scores(embeddings);
        ensure_finite(&raw.view(), "margin scores")?;
        Ok(match self.policy {
            ScorePolicy::RawScores => raw,
            ScorePolicy::Softmax => softmax(&raw.view()),
        })
    }

    /// Pulls a gradient on the raw scores back to the embeddings:
    /// `-2 (E * rowsum(G) - G M)`.
    pub fn backward_raw(
        &self,
        embeddings: &ArrayView2<MMFloat>,
        grad_scores: &ArrayView2<MMFloat>,
    ) -> Array2<MMFloat> {
        let row_sums = grad_scores.sum_axis(Axis(1)).insert_axis(Axis(1));
        let pulled = grad_scores.dot(&self.means.view());
        (embeddings * &row_sums - pulled) * -2.
    }
}

/// Row-wise softmax, shifted by the row maximum before exponentiating.
pub fn softmax(scores: &ArrayView2<MMFloat>) -> Array2<MMFloat> {
    let mut out = scores.to_owned();
    for mut row in out.rows_mut() {
        let max = row.fold(MMFloat::NEG_INFINITY, |m, &x| m.max(x));
        row.mapv_inplace(|x| (x - max).exp());
        let total = row.sum();
        row.mapv_inplace(|x| x / total);
    }
    out
}

/// Vector-Jacobian product of the row-wise softmax given its output `probs`.
pub fn softmax_backward(probs: &ArrayView2<MMFloat>, grad: &ArrayView2<MMFloat>) -> Array2<MMFloat> {
    let inner = (probs * grad).sum_axis(Axis(1)).insert_axis(Axis(1));
    probs * &(grad - &inner)
}

/// # Errors
/// `NumericAnomaly` tagged with `stage` on the first NaN or infinity.
pub fn ensure_finite(values: &ArrayView2<MMFloat>, stage: &'static str) -> Result<()> {
    if values.iter().all(|x| x.is_finite()) {
        Ok(())
    } else {
        Err(EvalError::NumericAnomaly { stage })
    }
}
