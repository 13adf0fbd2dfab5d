use crate::affine::Affine2;
use crate::backbone::layer::Layer;
use crate::error::{EvalError, Result};
use crate::MMFloat;
use ndarray::{Array1, Array2, ArrayView2};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Dense {
    aff: Affine2,
}

impl Dense {
    pub fn from_parts(mul: Array2<MMFloat>, add: Array1<MMFloat>) -> Self {
        Self {
            aff: Affine2::new(mul, add),
        }
    }

    /// He-normal weights and zero bias.
    ///
    /// # Panics
    /// If `input_dim` is zero
    pub fn he_normal<R: Rng>(input_dim: usize, output_dim: usize, rng: &mut R) -> Self {
        let std = (2. / input_dim as MMFloat).sqrt();
        let dist = Normal::new(0., std).unwrap();
        Self::from_parts(
            Array2::random_using((output_dim, input_dim), dist, rng),
            Array1::zeros(output_dim),
        )
    }
}

#[typetag::serde]
impl Layer for Dense {
    fn input_dim(&self) -> usize {
        self.aff.input_dim()
    }

    fn output_dim(&self) -> usize {
        self.aff.output_dim()
    }

    fn check_shapes(&self) -> Result<()> {
        if self.aff.shift().len() == self.aff.output_dim() {
            Ok(())
        } else {
            Err(EvalError::ShapeMismatch {
                what: "dense bias length",
                expected: self.aff.output_dim(),
                found: self.aff.shift().len(),
            })
        }
    }

    fn forward2(&self, input: &ArrayView2<MMFloat>) -> Array2<MMFloat> {
        self.aff.apply_batch(input)
    }

    fn backward2(
        &self,
        _input: &ArrayView2<MMFloat>,
        grad_output: &ArrayView2<MMFloat>,
    ) -> Array2<MMFloat> {
        self.aff.pullback_batch(grad_output)
    }
}

impl fmt::Display for Dense {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Dense {}", self.aff.output_dim())
    }
}
