#![allow(clippy::module_name_repetitions)]
//! Per-feature valid input range used to clip adversarial inputs.
use crate::MMFloat;
use ndarray::iter::Lanes;
use ndarray::stack;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayViewMut2;
use ndarray::Axis;
use ndarray::Ix1;
use ndarray::Zip;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Lower bounds in row 0, upper bounds in row 1, one column per input feature.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ClipBounds {
    data: Array2<MMFloat>,
}

impl ClipBounds {
    /// # Panics
    /// If `lower` and `upper` differ in length
    pub fn new<'a>(lower: ArrayView1<'a, MMFloat>, upper: ArrayView1<'a, MMFloat>) -> Self {
        assert_eq!(lower.len(), upper.len());
        let data = stack(Axis(0), &[lower, upper]).unwrap();
        Self { data }
    }

    /// The same `[lo, hi]` range for every one of `dim` features.
    pub fn uniform(dim: usize, lo: MMFloat, hi: MMFloat) -> Self {
        Self::new(
            Array1::from_elem(dim, lo).view(),
            Array1::from_elem(dim, hi).view(),
        )
    }

    pub fn lower(&self) -> ArrayView1<MMFloat> {
        self.data.index_axis(Axis(0), 0)
    }

    pub fn upper(&self) -> ArrayView1<MMFloat> {
        self.data.index_axis(Axis(0), 1)
    }

    pub fn ndim(&self) -> usize {
        self.data.ncols()
    }

    pub fn bounds_iter(&self) -> Lanes<MMFloat, Ix1> {
        self.data.lanes(Axis(0))
    }

    pub fn is_all_finite(&self) -> bool {
        self.data.iter().all(|&x| MMFloat::is_finite(x))
    }

    /// Bounds after the per-feature `mean` has been subtracted from the inputs.
    ///
    /// # Panics
    /// If `mean` does not have one entry per feature
    pub fn shifted(&self, mean: &ArrayView1<MMFloat>) -> Self {
        assert_eq!(mean.len(), self.ndim());
        Self {
            data: &self.data - mean,
        }
    }

    pub fn is_member(&self, x: &ArrayView1<MMFloat>) -> bool {
        let eps = 1e-9;
        Zip::from(x)
            .and(self.bounds_iter())
            .all(|&x, bounds| bounds[0] - eps <= x && x <= bounds[1] + eps)
    }

    /// Clamps every row of `batch` into the bounds.
    pub fn clip(&self, mut batch: ArrayViewMut2<MMFloat>) {
        debug_assert_eq!(batch.ncols(), self.ndim());
        for mut row in batch.rows_mut() {
            Zip::from(&mut row)
                .and(self.bounds_iter())
                .for_each(|x, bounds| *x = x.max(bounds[0]).min(bounds[1]));
        }
    }
}

impl Display for ClipBounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        write!(f, "Lower: {}\nUpper: {}", self.lower(), self.upper())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::*;
    use ndarray::arr1;
    use proptest::prelude::*;

    #[test]
    fn separate_rows_are_stacked() {
        let lower = arr1(&[-1., 0.]);
        let upper = arr1(&[1., 2.]);
        let bounds = ClipBounds::new(lower.view(), upper.view());
        assert_eq!(bounds.lower(), lower);
        assert_eq!(bounds.upper(), upper);
        assert_eq!(bounds.ndim(), 2);
    }

    #[test]
    fn shifting_moves_both_ends() {
        let bounds = ClipBounds::uniform(3, 0., 1.);
        let shifted = bounds.shifted(&arr1(&[0.5, 0.25, 0.]).view());
        assert_eq!(shifted.lower(), arr1(&[-0.5, -0.25, 0.]));
        assert_eq!(shifted.upper(), arr1(&[0.5, 0.75, 1.]));
    }

    proptest! {
        #[test]
        fn clipped_rows_are_members(bounds in clip_bounds(6), mut batch in array2(4, 6)) {
            bounds.clip(batch.view_mut());
            for row in batch.rows() {
                prop_assert!(bounds.is_member(&row));
            }
        }

        #[test]
        fn clipping_keeps_members_unchanged(bounds in clip_bounds(6)) {
            let mid = (&bounds.lower() + &bounds.upper()) / 2.;
            let mut batch = mid.clone().insert_axis(Axis(0));
            bounds.clip(batch.view_mut());
            prop_assert_eq!(batch.row(0), mid.view());
        }
    }
}
