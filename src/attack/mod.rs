//! Gradient-based attack strategies and the parameter contract they share.
//!
//! Strategies are a closed set dispatched through [`AttackStrategy`]; each one
//! perturbs a batch inside the L-infinity ball of radius `eps` around the clean
//! inputs and inside the clip bounds. Outputs are plain owned arrays, so nothing
//! downstream can differentiate through the perturbation process.
pub mod fgsm;
pub mod iterative;
pub mod momentum;

pub use fgsm::FastGradientMethod;
pub use iterative::{BasicIterativeMethod, MadryEtAl};
pub use momentum::MomentumIterativeMethod;

use crate::bounds::ClipBounds;
use crate::classifier::{predicted_classes, DifferentiableModel};
use crate::dataset::to_categorical;
use crate::error::{EvalError, Result};
use crate::MMFloat;
use enum_dispatch::enum_dispatch;
use log::debug;
use ndarray::{s, Array2, ArrayView2, Axis, Zip};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum AttackKind {
    /// Single signed-gradient step.
    #[value(name = "FastGradientMethod")]
    FastGradientMethod,
    /// Repeated signed-gradient steps projected back onto the eps ball.
    #[value(name = "BasicIterativeMethod")]
    BasicIterativeMethod,
    /// Iterative steps along accumulated, normalised gradients.
    #[value(name = "MomentumIterativeMethod")]
    MomentumIterativeMethod,
    /// Projected gradient descent from a random start.
    #[value(name = "MadryEtAl")]
    MadryEtAl,
}

impl AttackKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FastGradientMethod => "FastGradientMethod",
            Self::BasicIterativeMethod => "BasicIterativeMethod",
            Self::MomentumIterativeMethod => "MomentumIterativeMethod",
            Self::MadryEtAl => "MadryEtAl",
        }
    }

    pub const fn is_iterative(self) -> bool {
        !matches!(self, Self::FastGradientMethod)
    }
}

impl FromStr for AttackKind {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "FastGradientMethod" => Ok(Self::FastGradientMethod),
            "BasicIterativeMethod" => Ok(Self::BasicIterativeMethod),
            "MomentumIterativeMethod" => Ok(Self::MomentumIterativeMethod),
            "MadryEtAl" => Ok(Self::MadryEtAl),
            _ => Err(EvalError::UnknownAttack { name: s.to_owned() }),
        }
    }
}

impl fmt::Display for AttackKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step size and step count shared by every iterative strategy. The step size
/// does not depend on `eps` or on the number of steps.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IterativeSchedule {
    pub eps_iter: MMFloat,
    pub nb_iter: usize,
}

impl Default for IterativeSchedule {
    fn default() -> Self {
        Self {
            eps_iter: 2. / 256.,
            nb_iter: 10,
        }
    }
}

/// Parameters handed to a strategy for one budget.
#[derive(Clone, Debug)]
pub struct AttackParams {
    pub eps: MMFloat,
    pub eps_iter: Option<MMFloat>,
    pub clip: ClipBounds,
    pub nb_iter: Option<usize>,
    /// One-hot target rows for the whole evaluated set; `None` when untargeted.
    pub y_target: Option<Array2<MMFloat>>,
}

impl AttackParams {
    /// Single-step strategies get `{eps, clip, y_target}`; iterative ones also get
    /// `{eps_iter, nb_iter}` from `schedule`. Pass `y_target = None` for the
    /// untargeted threat model.
    pub fn build(
        kind: AttackKind,
        eps: MMFloat,
        schedule: &IterativeSchedule,
        clip: &ClipBounds,
        y_target: Option<&Array2<MMFloat>>,
    ) -> Self {
        let (eps_iter, nb_iter) = if kind.is_iterative() {
            (Some(schedule.eps_iter), Some(schedule.nb_iter))
        } else {
            (None, None)
        };
        Self {
            eps,
            eps_iter,
            clip: clip.clone(),
            nb_iter,
            y_target: y_target.cloned(),
        }
    }

    pub const fn is_targeted(&self) -> bool {
        self.y_target.is_some()
    }

    /// # Errors
    /// `InvalidParameter` if an iterative strategy is run without a schedule.
    pub fn schedule(&self) -> Result<IterativeSchedule> {
        match (self.eps_iter, self.nb_iter) {
            (Some(eps_iter), Some(nb_iter)) => Ok(IterativeSchedule { eps_iter, nb_iter }),
            _ => Err(EvalError::invalid(
                "iterative attacks need both eps_iter and nb_iter",
            )),
        }
    }

    /// # Errors
    /// On a negative or non-finite radius, clip bounds of the wrong width, or a
    /// target matrix that is not one-hot over `num_classes` for `num_samples` rows.
    pub fn validate(&self, num_samples: usize, num_features: usize, num_classes: usize) -> Result<()> {
        if !(self.eps.is_finite() && self.eps >= 0.) {
            return Err(EvalError::invalid(format!("eps must be >= 0, got {}", self.eps)));
        }
        if let Some(eps_iter) = self.eps_iter {
            if !(eps_iter.is_finite() && eps_iter > 0.) {
                return Err(EvalError::invalid(format!(
                    "eps_iter must be > 0, got {}",
                    eps_iter
                )));
            }
        }
        if !self.clip.is_all_finite() {
            return Err(EvalError::invalid("clip bounds must be finite"));
        }
        if self.clip.ndim() != num_features {
            return Err(EvalError::ShapeMismatch {
                what: "clip bounds width",
                expected: num_features,
                found: self.clip.ndim(),
            });
        }
        if let Some(y) = &self.y_target {
            if y.nrows() != num_samples {
                return Err(EvalError::ShapeMismatch {
                    what: "target matrix rows",
                    expected: num_samples,
                    found: y.nrows(),
                });
            }
            if y.ncols() != num_classes {
                return Err(EvalError::ClassCountMismatch {
                    expected: num_classes,
                    found: y.ncols(),
                });
            }
            if !is_one_hot(&y.view()) {
                return Err(EvalError::invalid("y_target rows must be one-hot"));
            }
        }
        Ok(())
    }
}

pub fn is_one_hot(y: &ArrayView2<MMFloat>) -> bool {
    y.rows().into_iter().all(|row| {
        row.iter().all(|&v| v == 0. || v == 1.) && row.iter().filter(|&&v| v == 1.).count() == 1
    })
}

#[enum_dispatch]
pub trait Attack {
    /// Adversarial version of the batch `x`. With `y_target` the attack pulls
    /// predictions toward those rows, otherwise away from the model's own
    /// predictions on `x`.
    ///
    /// # Errors
    /// On invalid parameters or a numerical failure of the model.
    fn perturb(
        &self,
        model: &dyn DifferentiableModel,
        x: &ArrayView2<MMFloat>,
        y_target: Option<&ArrayView2<MMFloat>>,
        params: &AttackParams,
        rng: &mut StdRng,
    ) -> Result<Array2<MMFloat>>;
}

#[enum_dispatch(Attack)]
#[derive(Clone, Debug)]
pub enum AttackStrategy {
    FastGradient(FastGradientMethod),
    BasicIterative(BasicIterativeMethod),
    MomentumIterative(MomentumIterativeMethod),
    Madry(MadryEtAl),
}

impl AttackStrategy {
    pub fn from_kind(kind: AttackKind, decay_factor: MMFloat) -> Self {
        match kind {
            AttackKind::FastGradientMethod => FastGradientMethod.into(),
            AttackKind::BasicIterativeMethod => BasicIterativeMethod.into(),
            AttackKind::MomentumIterativeMethod => {
                MomentumIterativeMethod::new(decay_factor).into()
            }
            AttackKind::MadryEtAl => MadryEtAl.into(),
        }
    }

    pub const fn kind(&self) -> AttackKind {
        match self {
            Self::FastGradient(_) => AttackKind::FastGradientMethod,
            Self::BasicIterative(_) => AttackKind::BasicIterativeMethod,
            Self::MomentumIterative(_) => AttackKind::MomentumIterativeMethod,
            Self::Madry(_) => AttackKind::MadryEtAl,
        }
    }
}

/// Runs `strategy` over `x` in chunks of `batch_size` rows, slicing the target
/// rows alongside.
///
/// # Errors
/// On invalid parameters or a numerical failure while attacking any batch.
pub fn generate_batched(
    strategy: &AttackStrategy,
    model: &dyn DifferentiableModel,
    x: &ArrayView2<MMFloat>,
    params: &AttackParams,
    batch_size: usize,
    rng: &mut StdRng,
) -> Result<Array2<MMFloat>> {
    if batch_size == 0 {
        return Err(EvalError::invalid("batch_size must be positive"));
    }
    params.validate(x.nrows(), x.ncols(), model.num_classes())?;
    let mut adversarial = Array2::zeros(x.raw_dim());
    for (batch_idx, (x_batch, mut out_batch)) in x
        .axis_chunks_iter(Axis(0), batch_size)
        .zip(adversarial.axis_chunks_iter_mut(Axis(0), batch_size))
        .enumerate()
    {
        let start = batch_idx * batch_size;
        let end = start + x_batch.nrows();
        let y_batch = params
            .y_target
            .as_ref()
            .map(|y| y.slice(s![start..end, ..]));
        debug!(
            "{} on samples {}..{} (eps {})",
            strategy.kind(),
            start,
            end,
            params.eps
        );
        let adv = strategy.perturb(model, &x_batch, y_batch.as_ref(), params, rng)?;
        out_batch.assign(&adv);
    }
    Ok(adversarial)
}

/// One-hot labels the attack works with, and whether it descends toward them.
fn attack_labels(
    model: &dyn DifferentiableModel,
    x: &ArrayView2<MMFloat>,
    y_target: Option<&ArrayView2<MMFloat>>,
) -> Result<(Array2<MMFloat>, bool)> {
    match y_target {
        Some(y) => Ok((y.to_owned(), true)),
        None => {
            let predicted = predicted_classes(&model.predict(x)?.view())?;
            Ok((to_categorical(&predicted.view(), model.num_classes()), false))
        }
    }
}

/// Gradient of the attack objective: ascent on the loss when untargeted,
/// descent toward the target otherwise.
fn objective_gradient(
    model: &dyn DifferentiableModel,
    x: &ArrayView2<MMFloat>,
    labels: &Array2<MMFloat>,
    targeted: bool,
) -> Result<Array2<MMFloat>> {
    let grad = model.cross_entropy_gradient(x, &labels.view())?;
    Ok(if targeted { -grad } else { grad })
}

/// Elementwise sign with `sign(0) = 0`.
fn sign(x: &Array2<MMFloat>) -> Array2<MMFloat> {
    x.mapv(|v| {
        if v > 0. {
            1.
        } else if v < 0. {
            -1.
        } else {
            0.
        }
    })
}

/// Clamps `adv - x` into `[-eps, eps]` elementwise.
fn project_linf(adv: &mut Array2<MMFloat>, x: &ArrayView2<MMFloat>, eps: MMFloat) {
    Zip::from(adv)
        .and(x)
        .for_each(|a, &x0| *a = x0 + (*a - x0).max(-eps).min(eps));
}
