#![allow(clippy::module_name_repetitions)]
//! Representation of affine transformations applied to row-major batches
use crate::MMFloat;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Affine map data structure, `f(x) = Ax + b` with `A` of shape (out, in)
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Affine2 {
    basis: Array2<MMFloat>,
    shift: Array1<MMFloat>,
}

impl Display for Affine2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        write!(
            f,
            "Basis {:?} Shift {:?}",
            self.basis.shape(),
            self.shift.shape()
        )
    }
}

impl Affine2 {
    /// # Panics
    /// If improper shapes are passed in
    pub fn new(basis: Array2<MMFloat>, shift: Array1<MMFloat>) -> Self {
        debug_assert_eq!(basis.shape()[0], shift.len());
        Self { basis, shift }
    }

    pub fn basis(&self) -> ArrayView2<MMFloat> {
        self.basis.view()
    }

    pub fn shift(&self) -> ArrayView1<MMFloat> {
        self.shift.view()
    }

    pub fn input_dim(&self) -> usize {
        self.basis.shape()[1]
    }

    pub fn output_dim(&self) -> usize {
        self.shift.len()
    }

    pub fn apply(&self, x: &ArrayView1<MMFloat>) -> Array1<MMFloat> {
        self.basis.dot(x) + &self.shift
    }

    /// Applies the map to every row of a (batch, in) matrix.
    pub fn apply_batch(&self, x: &ArrayView2<MMFloat>) -> Array2<MMFloat> {
        debug_assert_eq!(x.ncols(), self.input_dim());
        x.dot(&self.basis.t()) + &self.shift
    }

    /// Pulls a (batch, out) gradient back through the linear part.
    pub fn pullback_batch(&self, grad: &ArrayView2<MMFloat>) -> Array2<MMFloat> {
        debug_assert_eq!(grad.ncols(), self.output_dim());
        grad.dot(&self.basis)
    }
}

#[cfg(test)]
mod tests {
    use super::Affine2;
    use crate::test_util::*;
    use ndarray::Axis;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn batch_apply_matches_rowwise_apply(batch in array2(5, 3), aff in affine2(3, 4)) {
            let out = aff.apply_batch(&batch.view());
            for (row, out_row) in batch.axis_iter(Axis(0)).zip(out.axis_iter(Axis(0))) {
                let expected = aff.apply(&row);
                for (a, b) in expected.iter().zip(out_row.iter()) {
                    prop_assert!((a - b).abs() < 1e-8);
                }
            }
        }

        #[test]
        fn pullback_is_the_transpose(grad in array2(2, 4), aff in affine2(3, 4)) {
            let pulled = aff.pullback_batch(&grad.view());
            prop_assert_eq!(pulled.shape(), &[2, 3]);
            let expected = grad.dot(&aff.basis());
            for (a, b) in pulled.iter().zip(expected.iter()) {
                prop_assert!((a - b).abs() < 1e-8);
            }
        }
    }
}
