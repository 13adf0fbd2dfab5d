use super::{attack_labels, objective_gradient, project_linf, sign, Attack, AttackParams};
use crate::classifier::DifferentiableModel;
use crate::error::Result;
use crate::MMFloat;
use log::trace;
use ndarray::{Array, Array2, ArrayView2};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;

/// Repeated signed-gradient steps of size `eps_iter`, each followed by a
/// projection onto the eps ball and the clip bounds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BasicIterativeMethod;

/// Projected gradient descent: the basic iterative method started from a
/// uniformly random point of the eps ball.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MadryEtAl;

/// Runs the projected sign-gradient loop from `start`.
fn projected_steps(
    model: &dyn DifferentiableModel,
    x: &ArrayView2<MMFloat>,
    mut adv: Array2<MMFloat>,
    y_target: Option<&ArrayView2<MMFloat>>,
    params: &AttackParams,
) -> Result<Array2<MMFloat>> {
    let schedule = params.schedule()?;
    let (labels, targeted) = attack_labels(model, x, y_target)?;
    for step in 0..schedule.nb_iter {
        let grad = objective_gradient(model, &adv.view(), &labels, targeted)?;
        adv = &adv + &(sign(&grad) * schedule.eps_iter);
        params.clip.clip(adv.view_mut());
        project_linf(&mut adv, x, params.eps);
        params.clip.clip(adv.view_mut());
        trace!("projected step {} of {}", step + 1, schedule.nb_iter);
    }
    Ok(adv)
}

impl Attack for BasicIterativeMethod {
    fn perturb(
        &self,
        model: &dyn DifferentiableModel,
        x: &ArrayView2<MMFloat>,
        y_target: Option<&ArrayView2<MMFloat>>,
        params: &AttackParams,
        _rng: &mut StdRng,
    ) -> Result<Array2<MMFloat>> {
        projected_steps(model, x, x.to_owned(), y_target, params)
    }
}

impl Attack for MadryEtAl {
    fn perturb(
        &self,
        model: &dyn DifferentiableModel,
        x: &ArrayView2<MMFloat>,
        y_target: Option<&ArrayView2<MMFloat>>,
        params: &AttackParams,
        rng: &mut StdRng,
    ) -> Result<Array2<MMFloat>> {
        let mut start = if params.eps > 0. {
            x + &Array::random_using(x.raw_dim(), Uniform::new_inclusive(-params.eps, params.eps), rng)
        } else {
            x.to_owned()
        };
        params.clip.clip(start.view_mut());
        projected_steps(model, x, start, y_target, params)
    }
}
