use super::{attack_labels, objective_gradient, sign, Attack, AttackParams};
use crate::classifier::DifferentiableModel;
use crate::error::Result;
use crate::MMFloat;
use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;

/// `x' = clip(x + eps * sign(grad))`, a single L-infinity step.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FastGradientMethod;

impl Attack for FastGradientMethod {
    fn perturb(
        &self,
        model: &dyn DifferentiableModel,
        x: &ArrayView2<MMFloat>,
        y_target: Option<&ArrayView2<MMFloat>>,
        params: &AttackParams,
        _rng: &mut StdRng,
    ) -> Result<Array2<MMFloat>> {
        let (labels, targeted) = attack_labels(model, x, y_target)?;
        let grad = objective_gradient(model, x, &labels, targeted)?;
        let mut adv = x + &(sign(&grad) * params.eps);
        params.clip.clip(adv.view_mut());
        Ok(adv)
    }
}
