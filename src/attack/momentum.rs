use super::{attack_labels, objective_gradient, project_linf, sign, Attack, AttackParams};
use crate::classifier::DifferentiableModel;
use crate::error::Result;
use crate::MMFloat;
use log::trace;
use ndarray::{Array2, ArrayView2, Axis};
use rand::rngs::StdRng;

/// Smallest per-sample mean absolute gradient used as a normaliser.
const NORM_FLOOR: MMFloat = 1e-12;

/// Iterative attack along an accumulated gradient: each step's gradient is
/// scaled to unit mean absolute value per sample before being added to the
/// decayed running momentum.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MomentumIterativeMethod {
    decay_factor: MMFloat,
}

impl MomentumIterativeMethod {
    pub const fn new(decay_factor: MMFloat) -> Self {
        Self { decay_factor }
    }

    pub const fn decay_factor(&self) -> MMFloat {
        self.decay_factor
    }
}

impl Default for MomentumIterativeMethod {
    fn default() -> Self {
        Self::new(1.)
    }
}

/// Divides each row by `max(NORM_FLOOR, mean |row|)`.
fn normalize_rows(grad: &mut Array2<MMFloat>) {
    for mut row in grad.axis_iter_mut(Axis(0)) {
        let mean_abs = row.iter().map(|g| g.abs()).sum::<MMFloat>() / row.len() as MMFloat;
        let norm = mean_abs.max(NORM_FLOOR);
        row.mapv_inplace(|g| g / norm);
    }
}

impl Attack for MomentumIterativeMethod {
    fn perturb(
        &self,
        model: &dyn DifferentiableModel,
        x: &ArrayView2<MMFloat>,
        y_target: Option<&ArrayView2<MMFloat>>,
        params: &AttackParams,
        _rng: &mut StdRng,
    ) -> Result<Array2<MMFloat>> {
        let schedule = params.schedule()?;
        let (labels, targeted) = attack_labels(model, x, y_target)?;
        let mut momentum: Array2<MMFloat> = Array2::zeros(x.raw_dim());
        let mut adv = x.to_owned();
        for step in 0..schedule.nb_iter {
            let mut grad = objective_gradient(model, &adv.view(), &labels, targeted)?;
            normalize_rows(&mut grad);
            momentum = momentum * self.decay_factor + grad;
            adv = &adv + &(sign(&momentum) * schedule.eps_iter);
            project_linf(&mut adv, x, params.eps);
            params.clip.clip(adv.view_mut());
            trace!("momentum step {} of {}", step + 1, schedule.nb_iter);
        }
        Ok(adv)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{planar_model, wide_clip};
    use super::super::{AttackKind, IterativeSchedule};
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;
    use rand::SeedableRng;

    #[test]
    fn rows_normalise_to_unit_mean_magnitude() {
        let mut grad = arr2(&[[2., -6.], [0., 0.]]);
        normalize_rows(&mut grad);
        for (g, e) in grad.iter().zip(&[0.5, -1.5, 0., 0.]) {
            assert_abs_diff_eq!(*g, *e);
        }
    }

    #[test]
    fn consistent_gradient_saturates_at_eps() {
        let model = planar_model();
        let x = arr2(&[[0.5, 0.]]);
        let params = AttackParams::build(
            AttackKind::MomentumIterativeMethod,
            8. / 256.,
            &IterativeSchedule::default(),
            &wide_clip(),
            None,
        );
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(MomentumIterativeMethod::default().decay_factor(), 1.);
        let adv = MomentumIterativeMethod::default()
            .perturb(&model, &x.view(), None, &params, &mut rng)
            .unwrap();
        assert_abs_diff_eq!(adv[[0, 0]], 0.5 - 8. / 256., epsilon = 1e-12);
        assert_abs_diff_eq!(adv[[0, 1]], 0., epsilon = 1e-12);
    }

    #[test]
    fn zero_decay_reduces_to_basic_iterative() {
        let model = planar_model();
        let x = arr2(&[[0.2, 0.3], [-0.4, 0.1]]);
        let schedule = IterativeSchedule::default();
        let momentum_params = AttackParams::build(
            AttackKind::MomentumIterativeMethod,
            16. / 256.,
            &schedule,
            &wide_clip(),
            None,
        );
        let mut rng = StdRng::seed_from_u64(0);
        let momentum = MomentumIterativeMethod::new(0.)
            .perturb(&model, &x.view(), None, &momentum_params, &mut rng)
            .unwrap();
        let basic = super::super::BasicIterativeMethod
            .perturb(&model, &x.view(), None, &momentum_params, &mut rng)
            .unwrap();
        for (m, b) in momentum.iter().zip(basic.iter()) {
            assert_abs_diff_eq!(*m, *b, epsilon = 1e-12);
        }
    }
}
