#![cfg(test)]
use crate::affine::Affine2;
use crate::bounds::ClipBounds;
use crate::MMFloat;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::Axis;
use ndarray::Zip;
use proptest::arbitrary::functor::ArbitraryF1;
use proptest::prelude::*;
use proptest::sample::SizeRange;
use std::mem;

prop_compose! {
    pub fn array1(len: usize)(v in Vec::lift1_with(-10. .. 10., SizeRange::new(len..=len))) -> Array1<MMFloat> {
        Array1::from_vec(v)
    }
}

prop_compose! {
    pub fn array2(rows: usize, cols: usize)(v in Vec::lift1_with(array1(cols), SizeRange::new(rows..=rows))) -> Array2<MMFloat> {
        assert!(rows > 0);
        ndarray::stack(Axis(0), &v.iter().map(|x| x.view()).collect::<Vec<ArrayView1<MMFloat>>>()).unwrap()
    }
}

prop_compose! {
    pub fn affine2(in_dim: usize, out_dim: usize)(basis in array2(out_dim, in_dim), shift in array1(out_dim)) -> Affine2 {
        Affine2::new(basis, shift)
    }
}

prop_compose! {
    pub fn clip_bounds(len: usize)(mut lower in array1(len), mut upper in array1(len)) -> ClipBounds {
        Zip::from(&mut lower).and(&mut upper).for_each(|l, u| if *l > *u {mem::swap(l, u)});
        assert!(Zip::from(&lower).and(&upper).all(|l, u| l <= u));
        ClipBounds::new(lower.view(), upper.view())
    }
}

prop_compose! {
    /// Labels paired with a class count strictly larger than every label.
    pub fn labels_with_classes(max_len: usize)(num_classes in 2_usize..20)(labels in proptest::collection::vec(0..num_classes, 1..max_len), num_classes in Just(num_classes)) -> (Vec<usize>, usize) {
        (labels, num_classes)
    }
}
