use crate::backbone::layer::{check_chain, Layer};
use crate::error::{EvalError, Result};
use crate::MMFloat;
use itertools::Itertools;
use log::trace;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequential stack of layers producing the embedding ("final features").
///
/// A backbone without layers is the identity map on its input.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Backbone {
    input_dim: usize,
    layers: Vec<Box<dyn Layer>>,
}

impl Backbone {
    pub fn new(input_dim: usize) -> Self {
        Self {
            input_dim,
            layers: vec![],
        }
    }

    /// # Errors
    /// `ShapeMismatch` if any layer does not accept the previous layer's output.
    pub fn from_layers(input_dim: usize, layers: Vec<Box<dyn Layer>>) -> Result<Self> {
        let mut backbone = Self::new(input_dim);
        for layer in layers {
            backbone.add_layer(layer)?;
        }
        Ok(backbone)
    }

    /// # Errors
    /// `ShapeMismatch` if `layer` is internally inconsistent or does not accept
    /// the current embedding width.
    pub fn add_layer(&mut self, layer: Box<dyn Layer>) -> Result<()> {
        layer.check_shapes()?;
        if layer.input_dim() != self.embedding_dim() {
            return Err(EvalError::ShapeMismatch {
                what: "layer input width",
                expected: self.embedding_dim(),
                found: layer.input_dim(),
            });
        }
        self.layers.push(layer);
        Ok(())
    }

    /// Re-checks the whole layer chain, residual branches included.
    ///
    /// # Errors
    /// `ShapeMismatch` at the first layer whose parameters or input width
    /// do not fit.
    pub fn check_shapes(&self) -> Result<()> {
        check_chain(self.input_dim, &self.layers).map(|_| ())
    }

    pub const fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn embedding_dim(&self) -> usize {
        self.layers.last().map_or(self.input_dim, |l| l.output_dim())
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn forward(&self, input: &ArrayView2<MMFloat>) -> Array2<MMFloat> {
        self.layers
            .iter()
            .fold(input.to_owned(), |x, layer| layer.forward2(&x.view()))
    }

    /// Inputs of every layer followed by the final embedding.
    pub fn activations(&self, input: &ArrayView2<MMFloat>) -> Vec<Array2<MMFloat>> {
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(input.to_owned());
        for layer in &self.layers {
            let next = layer.forward2(&activations[activations.len() - 1].view());
            activations.push(next);
        }
        activations
    }

    /// Backpropagates `grad_embedding` to the input, given the `activations` of the
    /// same forward pass.
    pub fn backward(
        &self,
        activations: &[Array2<MMFloat>],
        grad_embedding: &ArrayView2<MMFloat>,
    ) -> Array2<MMFloat> {
        debug_assert_eq!(activations.len(), self.layers.len() + 1);
        let mut grad = grad_embedding.to_owned();
        for (idx, (layer, layer_input)) in self.layers.iter().zip(activations).enumerate().rev() {
            trace!("backward through layer {} ({})", idx, layer);
            grad = layer.backward2(&layer_input.view(), &grad.view());
        }
        grad
    }
}

impl fmt::Display for Backbone {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Input {} => [{}] => Embedding {}",
            self.input_dim,
            self.layers.iter().join(" => "),
            self.embedding_dim()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backbone::{BatchNorm, Dense, ReLU, Residual};
    use ndarray::Array;
    use ndarray_rand::rand_distr::Normal;
    use ndarray_rand::RandomExt;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    fn small_backbone(rng: &mut Pcg64) -> Backbone {
        let branch: Vec<Box<dyn Layer>> = vec![
            Box::new(Dense::he_normal(4, 4, rng)),
            Box::new(BatchNorm::identity(4)),
            Box::new(ReLU::new(4)),
            Box::new(Dense::he_normal(4, 4, rng)),
        ];
        Backbone::from_layers(
            3,
            vec![
                Box::new(Dense::he_normal(3, 4, rng)),
                Box::new(ReLU::new(4)),
                Box::new(Residual::new(branch)),
                Box::new(Dense::he_normal(4, 2, rng)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn empty_backbone_is_identity() {
        let backbone = Backbone::new(3);
        let x = Array::random((2, 3), Normal::new(0., 1.).unwrap());
        assert_eq!(backbone.forward(&x.view()), x);
        assert_eq!(backbone.embedding_dim(), 3);
    }

    #[test]
    fn rejects_mismatched_layer() {
        let mut backbone = Backbone::new(3);
        let err = backbone.add_layer(Box::new(ReLU::new(5))).unwrap_err();
        assert!(matches!(err, EvalError::ShapeMismatch { expected: 3, found: 5, .. }));
    }

    #[test]
    fn rejects_broken_residual_branch() {
        let mut rng = Pcg64::seed_from_u64(3);
        let branch: Vec<Box<dyn Layer>> = vec![
            Box::new(Dense::he_normal(4, 3, &mut rng)),
            Box::new(Dense::he_normal(2, 4, &mut rng)),
        ];
        let err = Backbone::from_layers(4, vec![Box::new(Residual::new(branch))]).unwrap_err();
        assert!(matches!(err, EvalError::ShapeMismatch { expected: 3, found: 2, .. }));
    }

    #[test]
    fn deserialised_chain_is_rechecked() {
        let mut rng = Pcg64::seed_from_u64(8);
        let mut value = serde_json::to_value(&small_backbone(&mut rng)).unwrap();
        assert!(serde_json::from_value::<Backbone>(value.clone()).unwrap().check_shapes().is_ok());
        value["input_dim"] = serde_json::json!(5);
        let restored: Backbone = serde_json::from_value(value).unwrap();
        let err = restored.check_shapes().unwrap_err();
        assert!(matches!(err, EvalError::ShapeMismatch { expected: 5, found: 3, .. }));
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut rng = Pcg64::seed_from_u64(11);
        let backbone = small_backbone(&mut rng);
        let x = Array::random_using((2, 3), Normal::new(0., 1.).unwrap(), &mut rng);
        let g = Array::random_using((2, 2), Normal::new(0., 1.).unwrap(), &mut rng);
        let analytic = backbone.backward(&backbone.activations(&x.view()), &g.view());
        let f = |x: &Array2<MMFloat>| (backbone.forward(&x.view()) * &g).sum();
        let h = 1e-6;
        for idx in ndarray::indices((2, 3)) {
            let mut plus = x.clone();
            plus[idx] += h;
            let mut minus = x.clone();
            minus[idx] -= h;
            let numeric = (f(&plus) - f(&minus)) / (2. * h);
            assert!(
                (analytic[idx] - numeric).abs() < 1e-4 * (1. + numeric.abs()),
                "analytic {} numeric {}",
                analytic[idx],
                numeric
            );
        }
    }

    #[test]
    fn serialises_through_trait_objects() {
        let mut rng = Pcg64::seed_from_u64(5);
        let backbone = small_backbone(&mut rng);
        let json = serde_json::to_string(&backbone).unwrap();
        let restored: Backbone = serde_json::from_str(&json).unwrap();
        let x = Array::random_using((3, 3), Normal::new(0., 1.).unwrap(), &mut rng);
        let before = backbone.forward(&x.view());
        let after = restored.forward(&x.view());
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
        assert_eq!(restored.to_string(), backbone.to_string());
    }
}
