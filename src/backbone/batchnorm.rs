use crate::backbone::layer::Layer;
use crate::error::{EvalError, Result};
use crate::MMFloat;
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Batch normalisation in inference mode: `gamma (x - mean) / sqrt(var + eps) + beta`
/// with frozen running statistics.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct BatchNorm {
    gamma: Array1<MMFloat>,
    beta: Array1<MMFloat>,
    running_mean: Array1<MMFloat>,
    running_var: Array1<MMFloat>,
    epsilon: MMFloat,
}

impl BatchNorm {
    pub fn new(
        gamma: Array1<MMFloat>,
        beta: Array1<MMFloat>,
        running_mean: Array1<MMFloat>,
        running_var: Array1<MMFloat>,
        epsilon: MMFloat,
    ) -> Self {
        debug_assert_eq!(gamma.len(), beta.len());
        debug_assert_eq!(gamma.len(), running_mean.len());
        debug_assert_eq!(gamma.len(), running_var.len());
        Self {
            gamma,
            beta,
            running_mean,
            running_var,
            epsilon,
        }
    }

    /// Freshly initialised statistics, i.e. the identity up to `epsilon`.
    pub fn identity(ndims: usize) -> Self {
        Self::new(
            Array1::ones(ndims),
            Array1::zeros(ndims),
            Array1::zeros(ndims),
            Array1::ones(ndims),
            1e-3,
        )
    }

    fn scale(&self) -> Array1<MMFloat> {
        &self.gamma / &self.running_var.mapv(|v| (v + self.epsilon).sqrt())
    }
}

#[typetag::serde]
impl Layer for BatchNorm {
    fn input_dim(&self) -> usize {
        self.gamma.len()
    }

    fn output_dim(&self) -> usize {
        self.gamma.len()
    }

    fn check_shapes(&self) -> Result<()> {
        let expected = self.gamma.len();
        for (what, len) in [
            ("batchnorm beta length", self.beta.len()),
            ("batchnorm running mean length", self.running_mean.len()),
            ("batchnorm running variance length", self.running_var.len()),
        ] {
            if len != expected {
                return Err(EvalError::ShapeMismatch {
                    what,
                    expected,
                    found: len,
                });
            }
        }
        Ok(())
    }

    fn forward2(&self, input: &ArrayView2<MMFloat>) -> Array2<MMFloat> {
        (input - &self.running_mean) * &self.scale() + &self.beta
    }

    fn backward2(
        &self,
        _input: &ArrayView2<MMFloat>,
        grad_output: &ArrayView2<MMFloat>,
    ) -> Array2<MMFloat> {
        grad_output * &self.scale()
    }
}

impl fmt::Display for BatchNorm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BatchNorm {}", self.gamma.len())
    }
}
