use crate::error::{EvalError, Result};
use crate::MMFloat;
use dyn_clone::DynClone;
use ndarray::{Array2, ArrayView2};
use std::fmt::{Debug, Display};

/// A differentiable map over (batch, features) matrices.
///
/// Layers are stateless: `backward2` recomputes whatever it needs from the
/// layer input, so the same input passed to `forward2` must be given back.
#[typetag::serde(tag = "type")]
pub trait Layer: DynClone + Display + Debug + Send + Sync {
    fn input_dim(&self) -> usize;

    fn output_dim(&self) -> usize;

    /// Consistency of the layer's own parameters. Layers read from disk bypass
    /// the constructors, so this is the only check they get.
    ///
    /// # Errors
    /// `ShapeMismatch` naming the first inconsistent parameter.
    fn check_shapes(&self) -> Result<()> {
        Ok(())
    }

    fn forward2(&self, input: &ArrayView2<MMFloat>) -> Array2<MMFloat>;

    /// Vector-Jacobian product: the gradient w.r.t. `input` given the gradient
    /// w.r.t. this layer's output.
    fn backward2(
        &self,
        input: &ArrayView2<MMFloat>,
        grad_output: &ArrayView2<MMFloat>,
    ) -> Array2<MMFloat>;
}

// This implements `Clone` for the trait
dyn_clone::clone_trait_object!(Layer);

/// Checks every layer of `layers` and that each accepts its predecessor's
/// output, starting from `input_dim`. Returns the width of the final output.
///
/// # Errors
/// `ShapeMismatch` at the first layer that does not fit.
pub fn check_chain(input_dim: usize, layers: &[Box<dyn Layer>]) -> Result<usize> {
    layers.iter().try_fold(input_dim, |width, layer| {
        layer.check_shapes()?;
        if layer.input_dim() == width {
            Ok(layer.output_dim())
        } else {
            Err(EvalError::ShapeMismatch {
                what: "layer input width",
                expected: width,
                found: layer.input_dim(),
            })
        }
    })
}
