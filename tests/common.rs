#![allow(dead_code)]
use mmlda_rs::backbone::{Backbone, Dense};
use mmlda_rs::dataset::TestSet;
use mmlda_rs::{ClassMeans, Classifier, ClipBounds, Head, MarginLayer, ScorePolicy};
use ndarray::{Array, Array1, Array2};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::Rng;

/// Identity embedding of the plane with class means at `(1, 0)` and `(-1, 0)`;
/// the decision boundary is the vertical axis.
pub fn planar_classifier(policy: ScorePolicy) -> Classifier {
    let means = ClassMeans::new(ndarray::arr2(&[[1., 0.], [-1., 0.]])).unwrap();
    Classifier::new(Backbone::new(2), Head::Margin(MarginLayer::new(means, policy))).unwrap()
}

/// Points on the horizontal axis at the given distances from the boundary,
/// mirrored to both sides and labelled by side.
pub fn planar_test_set(offsets: &[f64]) -> TestSet {
    let mut rows = Vec::new();
    let mut labels = Vec::new();
    for &offset in offsets {
        rows.extend_from_slice(&[offset, 0.]);
        labels.push(0);
        rows.extend_from_slice(&[-offset, 0.]);
        labels.push(1);
    }
    let images = Array2::from_shape_vec((labels.len(), 2), rows).unwrap();
    TestSet::new(images, Array1::from_vec(labels), 2).unwrap()
}

pub fn planar_clip() -> ClipBounds {
    ClipBounds::uniform(2, -1., 1.)
}

/// The class each sample of `test_set` is not.
pub fn opposite_targets(test_set: &TestSet) -> Array1<usize> {
    test_set.labels().mapv(|label| 1 - label)
}

/// One dense layer from `input_dim` to `embedding_dim`.
pub fn dense_backbone<R: Rng>(input_dim: usize, embedding_dim: usize, rng: &mut R) -> Backbone {
    Backbone::from_layers(input_dim, vec![Box::new(Dense::he_normal(input_dim, embedding_dim, rng))]).unwrap()
}

pub fn random_means<R: Rng>(num_classes: usize, dim: usize, rng: &mut R) -> Array2<f64> {
    Array::random_using((num_classes, dim), Normal::new(0., 1.).unwrap(), rng)
}
