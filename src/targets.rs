//! Target labels for the targeted threat model.
use crate::error::{EvalError, Result};
use log::info;
use ndarray::{Array1, ArrayView1};
use rand::Rng;

/// Draws, for every true label, a uniformly random different class in `[0, num_classes)`.
///
/// # Errors
/// `InvalidParameter` when there is no other class to pick from, or a label is out of range.
pub fn sample_target_labels<R: Rng>(
    labels: &ArrayView1<usize>,
    num_classes: usize,
    rng: &mut R,
) -> Result<Array1<usize>> {
    if num_classes < 2 {
        return Err(EvalError::invalid(format!(
            "targeted attacks need at least 2 classes, got {}",
            num_classes
        )));
    }
    if let Some(&bad) = labels.iter().find(|&&l| l >= num_classes) {
        return Err(EvalError::ClassCountMismatch {
            expected: num_classes,
            found: bad + 1,
        });
    }
    let targets: Array1<usize> = labels
        .iter()
        .map(|&label| {
            let mut target = rng.gen_range(0..num_classes);
            while target == label {
                target = rng.gen_range(0..num_classes);
            }
            target
        })
        .collect();
    info!("Crafted {} target labels", targets.len());
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::labels_with_classes;
    use ndarray::arr1;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    proptest! {
        #[test]
        fn targets_differ_from_labels_and_stay_in_range((labels, num_classes) in labels_with_classes(64), seed in any::<u64>()) {
            let mut rng = Pcg64::seed_from_u64(seed);
            let labels = Array1::from_vec(labels);
            let targets = sample_target_labels(&labels.view(), num_classes, &mut rng).unwrap();
            prop_assert_eq!(targets.len(), labels.len());
            for (&t, &l) in targets.iter().zip(labels.iter()) {
                prop_assert_ne!(t, l);
                prop_assert!(t < num_classes);
            }
        }
    }

    #[test]
    fn two_classes_always_flip() {
        let mut rng = Pcg64::seed_from_u64(7);
        let targets = sample_target_labels(&arr1(&[0, 1, 1, 0]).view(), 2, &mut rng).unwrap();
        assert_eq!(targets, arr1(&[1, 0, 0, 1]));
    }

    #[test]
    fn single_class_is_rejected() {
        let mut rng = Pcg64::seed_from_u64(0);
        assert!(sample_target_labels(&arr1(&[0]).view(), 1, &mut rng).is_err());
    }

    #[test]
    fn same_seed_same_targets() {
        let labels = arr1(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        let a = sample_target_labels(&labels.view(), 10, &mut Pcg64::seed_from_u64(3)).unwrap();
        let b = sample_target_labels(&labels.view(), 10, &mut Pcg64::seed_from_u64(3)).unwrap();
        assert_eq!(a, b);
    }
}
