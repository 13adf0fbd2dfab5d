//! End-to-end scoring function: backbone embedding followed by either the
//! margin decision layer or a trained dense softmax head.
use crate::backbone::{Backbone, Dense, Layer};
use crate::error::{EvalError, Result};
use crate::margin::{ensure_finite, softmax, MarginLayer};
use crate::MMFloat;
use ndarray::{Array1, Array2, ArrayView2};
use ndarray_stats::QuantileExt;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A classifier whose input gradients are available to attacks.
pub trait DifferentiableModel {
    fn num_classes(&self) -> usize;

    fn input_dim(&self) -> usize;

    /// Scores before any normalisation; attacks treat these as logits.
    ///
    /// # Errors
    /// On a wrong input width or non-finite scores.
    fn logits(&self, x: &ArrayView2<MMFloat>) -> Result<Array2<MMFloat>>;

    /// Post-processed score vectors, one row per sample.
    ///
    /// # Errors
    /// On a wrong input width or non-finite scores.
    fn predict(&self, x: &ArrayView2<MMFloat>) -> Result<Array2<MMFloat>>;

    /// Gradient w.r.t. `x` of `sum_b CE(labels[b], softmax(logits[b]))`.
    ///
    /// # Errors
    /// On a wrong input width or non-finite scores.
    fn cross_entropy_gradient(
        &self,
        x: &ArrayView2<MMFloat>,
        labels: &ArrayView2<MMFloat>,
    ) -> Result<Array2<MMFloat>>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Head {
    Margin(MarginLayer),
    Softmax(Dense),
}

impl Head {
    pub fn num_classes(&self) -> usize {
        match self {
            Self::Margin(layer) => layer.num_classes(),
            Self::Softmax(dense) => dense.output_dim(),
        }
    }

    pub fn input_dim(&self) -> usize {
        match self {
            Self::Margin(layer) => layer.dim(),
            Self::Softmax(dense) => dense.input_dim(),
        }
    }

    fn logits(&self, embeddings: &ArrayView2<MMFloat>) -> Array2<MMFloat> {
        match self {
            Self::Margin(layer) => layer.raw_scores(embeddings),
            Self::Softmax(dense) => dense.forward2(embeddings),
        }
    }

    fn backward(
        &self,
        embeddings: &ArrayView2<MMFloat>,
        grad_logits: &ArrayView2<MMFloat>,
    ) -> Array2<MMFloat> {
        match self {
            Self::Margin(layer) => layer.backward_raw(embeddings, grad_logits),
            Self::Softmax(dense) => dense.backward2(embeddings, grad_logits),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Classifier {
    backbone: Backbone,
    head: Head,
}

impl Classifier {
    /// # Errors
    /// `DimensionMismatch` when the backbone's embedding width differs from the
    /// width the head expects.
    pub fn new(backbone: Backbone, head: Head) -> Result<Self> {
        if backbone.embedding_dim() != head.input_dim() {
            return Err(EvalError::DimensionMismatch {
                embedding_dim: backbone.embedding_dim(),
                means_dim: head.input_dim(),
            });
        }
        Ok(Self { backbone, head })
    }

    pub const fn backbone(&self) -> &Backbone {
        &self.backbone
    }

    pub const fn head(&self) -> &Head {
        &self.head
    }

    /// # Errors
    /// `ClassCountMismatch` when the head scores a different number of classes
    /// than the dataset defines.
    pub fn check_num_classes(&self, expected: usize) -> Result<()> {
        if self.head.num_classes() == expected {
            Ok(())
        } else {
            Err(EvalError::ClassCountMismatch {
                expected,
                found: self.head.num_classes(),
            })
        }
    }

    fn check_input(&self, x: &ArrayView2<MMFloat>) -> Result<()> {
        if x.ncols() == self.backbone.input_dim() {
            Ok(())
        } else {
            Err(EvalError::ShapeMismatch {
                what: "classifier input width",
                expected: self.backbone.input_dim(),
                found: x.ncols(),
            })
        }
    }

    /// # Errors
    /// On a wrong input width or a non-finite embedding.
    pub fn embed(&self, x: &ArrayView2<MMFloat>) -> Result<Array2<MMFloat>> {
        self.check_input(x)?;
        let embeddings = self.backbone.forward(x);
        ensure_finite(&embeddings.view(), "embedding")?;
        Ok(embeddings)
    }
}

impl DifferentiableModel for Classifier {
    fn num_classes(&self) -> usize {
        self.head.num_classes()
    }

    fn input_dim(&self) -> usize {
        self.backbone.input_dim()
    }

    fn logits(&self, x: &ArrayView2<MMFloat>) -> Result<Array2<MMFloat>> {
        let logits = self.head.logits(&self.embed(x)?.view());
        ensure_finite(&logits.view(), "logits")?;
        Ok(logits)
    }

    fn predict(&self, x: &ArrayView2<MMFloat>) -> Result<Array2<MMFloat>> {
        let embeddings = self.embed(x)?;
        let scores = match &self.head {
            Head::Margin(layer) => layer.forward(&embeddings.view())?,
            Head::Softmax(dense) => softmax(&dense.forward2(&embeddings.view()).view()),
        };
        ensure_finite(&scores.view(), "prediction")?;
        Ok(scores)
    }

    fn cross_entropy_gradient(
        &self,
        x: &ArrayView2<MMFloat>,
        labels: &ArrayView2<MMFloat>,
    ) -> Result<Array2<MMFloat>> {
        self.check_input(x)?;
        if labels.nrows() != x.nrows() {
            return Err(EvalError::ShapeMismatch {
                what: "label matrix rows",
                expected: x.nrows(),
                found: labels.nrows(),
            });
        }
        if labels.ncols() != self.num_classes() {
            return Err(EvalError::ShapeMismatch {
                what: "label matrix columns",
                expected: self.num_classes(),
                found: labels.ncols(),
            });
        }
        let activations = self.backbone.activations(x);
        let embeddings = activations[activations.len() - 1].view();
        let logits = self.head.logits(&embeddings);
        ensure_finite(&logits.view(), "logits")?;
        let grad_logits = softmax(&logits.view()) - labels;
        let grad_embeddings = self.head.backward(&embeddings, &grad_logits.view());
        let grad = self.backbone.backward(&activations, &grad_embeddings.view());
        ensure_finite(&grad.view(), "input gradient")?;
        Ok(grad)
    }
}

/// Index of the top score in each row.
///
/// # Errors
/// `NumericAnomaly` when a row contains NaN.
pub fn predicted_classes(scores: &ArrayView2<MMFloat>) -> Result<Array1<usize>> {
    scores
        .rows()
        .into_iter()
        .map(|row| {
            row.argmax().map_err(|_| EvalError::NumericAnomaly {
                stage: "class prediction",
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(Array1::from)
}

impl fmt::Display for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let head = match &self.head {
            Head::Margin(layer) => format!("Margin({:?}, {} classes)", layer.policy(), layer.num_classes()),
            Head::Softmax(dense) => format!("Softmax({})", dense),
        };
        write!(f, "{} => {}", self.backbone, head)
    }
}
