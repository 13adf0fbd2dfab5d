use crate::backbone::layer::{check_chain, Layer};
use crate::error::{EvalError, Result};
use crate::MMFloat;
use itertools::Itertools;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `x + f(x)` where `f` is a chain of layers preserving the width.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Residual {
    branch: Vec<Box<dyn Layer>>,
}

impl Residual {
    /// # Panics
    /// If the branch does not map its input width back onto itself
    pub fn new(branch: Vec<Box<dyn Layer>>) -> Self {
        if let (Some(first), Some(last)) = (branch.first(), branch.last()) {
            assert_eq!(first.input_dim(), last.output_dim());
        }
        Self { branch }
    }

    fn branch_forward(&self, input: &ArrayView2<MMFloat>) -> Vec<Array2<MMFloat>> {
        let mut activations = vec![input.to_owned()];
        for layer in &self.branch {
            let next = layer.forward2(&activations[activations.len() - 1].view());
            activations.push(next);
        }
        activations
    }
}

#[typetag::serde]
impl Layer for Residual {
    fn input_dim(&self) -> usize {
        self.branch.first().map_or(0, |l| l.input_dim())
    }

    fn output_dim(&self) -> usize {
        self.input_dim()
    }

    fn check_shapes(&self) -> Result<()> {
        let output_dim = check_chain(self.input_dim(), &self.branch)?;
        if output_dim == self.input_dim() {
            Ok(())
        } else {
            Err(EvalError::ShapeMismatch {
                what: "residual branch output width",
                expected: self.input_dim(),
                found: output_dim,
            })
        }
    }

    fn forward2(&self, input: &ArrayView2<MMFloat>) -> Array2<MMFloat> {
        if self.branch.is_empty() {
            return input.to_owned();
        }
        let mut activations = self.branch_forward(input);
        let out = activations.pop().unwrap_or_else(|| input.to_owned());
        out + input
    }

    fn backward2(
        &self,
        input: &ArrayView2<MMFloat>,
        grad_output: &ArrayView2<MMFloat>,
    ) -> Array2<MMFloat> {
        if self.branch.is_empty() {
            return grad_output.to_owned();
        }
        let activations = self.branch_forward(input);
        let mut grad = grad_output.to_owned();
        for (layer, layer_input) in self.branch.iter().zip(activations.iter()).rev() {
            grad = layer.backward2(&layer_input.view(), &grad.view());
        }
        grad + grad_output
    }
}

impl fmt::Display for Residual {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Residual[{}]", self.branch.iter().join(" => "))
    }
}
