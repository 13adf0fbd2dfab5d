//! Budget sweep: attack the whole test set once per perturbation budget and
//! report accuracy under the configured threat model.
use crate::attack::{generate_batched, AttackParams, AttackStrategy, IterativeSchedule};
use crate::bounds::ClipBounds;
use crate::classifier::{predicted_classes, DifferentiableModel};
use crate::dataset::{to_categorical, TestSet};
use crate::error::{EvalError, Result};
use crate::MMFloat;
use log::{debug, info};
use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Perturbation budgets in 0..255 pixel units, `pixel_step * (1..=num_budgets)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSweep {
    pixel_step: u32,
    num_budgets: usize,
}

impl BudgetSweep {
    /// Pixel values are divided by this to land in the normalised input range.
    pub const SCALE: MMFloat = 256.;

    /// # Errors
    /// `InvalidParameter` when the largest budget `pixel_step * num_budgets`
    /// does not fit in a `u32`.
    pub fn new(pixel_step: u32, num_budgets: usize) -> Result<Self> {
        u32::try_from(num_budgets)
            .ok()
            .and_then(|n| pixel_step.checked_mul(n))
            .ok_or_else(|| {
                EvalError::invalid(format!(
                    "pixel_step {} times num_budgets {} overflows",
                    pixel_step, num_budgets
                ))
            })?;
        Ok(Self {
            pixel_step,
            num_budgets,
        })
    }

    /// `{8, 16, 24, 32} / 256`
    pub const fn reference() -> Self {
        Self {
            pixel_step: 8,
            num_budgets: 4,
        }
    }

    pub fn pixel_steps(&self) -> impl Iterator<Item = u32> + '_ {
        (1..=self.num_budgets as u32).map(move |i| self.pixel_step * i)
    }

    pub fn eps(pixel_step: u32) -> MMFloat {
        MMFloat::from(pixel_step) / Self::SCALE
    }

    pub fn eps_values(&self) -> Vec<MMFloat> {
        self.pixel_steps().map(Self::eps).collect()
    }

    pub const fn len(&self) -> usize {
        self.num_budgets
    }

    pub const fn is_empty(&self) -> bool {
        self.num_budgets == 0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ThreatModel {
    /// Push predictions away from the clean prediction; score against true labels.
    Untargeted,
    /// Pull predictions toward a fixed per-sample target; score by how often it was missed.
    Targeted { targets: Array1<usize> },
}

impl ThreatModel {
    pub const fn is_targeted(&self) -> bool {
        matches!(self, Self::Targeted { .. })
    }
}

/// Accuracy of one budget.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BudgetReport {
    pub pixel_step: u32,
    pub eps: MMFloat,
    pub accuracy: MMFloat,
    pub targeted: bool,
}

impl fmt::Display for BudgetReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "eps is {}", self.pixel_step)?;
        if self.targeted {
            write!(f, "adv_acc_target: {:.3}", self.accuracy)
        } else {
            write!(f, "adv_acc: {:.3}", self.accuracy)
        }
    }
}

/// Fraction of rows whose predicted class equals the true label.
///
/// # Errors
/// `ShapeMismatch` on differing lengths, `InvalidParameter` on an empty set.
pub fn untargeted_accuracy(predicted: &ArrayView1<usize>, labels: &ArrayView1<usize>) -> Result<MMFloat> {
    agreement(predicted, labels, true)
}

/// Fraction of rows whose predicted class is NOT the attacker's target,
/// regardless of the true label.
///
/// # Errors
/// `ShapeMismatch` on differing lengths, `InvalidParameter` on an empty set.
pub fn targeted_complement_accuracy(
    predicted: &ArrayView1<usize>,
    targets: &ArrayView1<usize>,
) -> Result<MMFloat> {
    agreement(predicted, targets, false)
}

fn agreement(predicted: &ArrayView1<usize>, reference: &ArrayView1<usize>, equal: bool) -> Result<MMFloat> {
    if predicted.len() != reference.len() {
        return Err(EvalError::ShapeMismatch {
            what: "prediction count",
            expected: reference.len(),
            found: predicted.len(),
        });
    }
    if predicted.is_empty() {
        return Err(EvalError::invalid("accuracy of an empty set"));
    }
    let hits = predicted
        .iter()
        .zip(reference.iter())
        .filter(|(p, r)| (p == r) == equal)
        .count();
    Ok(hits as MMFloat / predicted.len() as MMFloat)
}

/// Everything a sweep shares across budgets: the model and its weights, the
/// normalised test set, the targets and the seeded generator. Built once and
/// released once.
pub struct EvaluationContext<M: DifferentiableModel> {
    model: M,
    test_set: TestSet,
    clip: ClipBounds,
    threat: ThreatModel,
    y_target: Option<Array2<MMFloat>>,
    strategy: AttackStrategy,
    schedule: IterativeSchedule,
    batch_size: usize,
    rng: StdRng,
}

impl<M: DifferentiableModel> EvaluationContext<M> {
    /// # Errors
    /// When the test set, clip bounds or targets disagree with the model, or
    /// `batch_size` is zero.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: M,
        test_set: TestSet,
        clip: ClipBounds,
        threat: ThreatModel,
        strategy: AttackStrategy,
        schedule: IterativeSchedule,
        batch_size: usize,
        seed: u64,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(EvalError::invalid("batch_size must be positive"));
        }
        if test_set.feature_dim() != model.input_dim() {
            return Err(EvalError::ShapeMismatch {
                what: "test set feature width",
                expected: model.input_dim(),
                found: test_set.feature_dim(),
            });
        }
        if clip.ndim() != model.input_dim() {
            return Err(EvalError::ShapeMismatch {
                what: "clip bounds width",
                expected: model.input_dim(),
                found: clip.ndim(),
            });
        }
        let y_target = match &threat {
            ThreatModel::Untargeted => None,
            ThreatModel::Targeted { targets } => {
                if targets.len() != test_set.len() {
                    return Err(EvalError::ShapeMismatch {
                        what: "target label count",
                        expected: test_set.len(),
                        found: targets.len(),
                    });
                }
                if let Some(&bad) = targets.iter().find(|&&t| t >= model.num_classes()) {
                    return Err(EvalError::ClassCountMismatch {
                        expected: model.num_classes(),
                        found: bad + 1,
                    });
                }
                Some(to_categorical(&targets.view(), model.num_classes()))
            }
        };
        info!(
            "Evaluating {} samples against {} ({})",
            test_set.len(),
            strategy.kind(),
            if threat.is_targeted() { "targeted" } else { "untargeted" }
        );
        Ok(Self {
            model,
            test_set,
            clip,
            threat,
            y_target,
            strategy,
            schedule,
            batch_size,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub const fn model(&self) -> &M {
        &self.model
    }

    pub const fn threat(&self) -> &ThreatModel {
        &self.threat
    }

    pub fn attack_params(&self, eps: MMFloat) -> AttackParams {
        AttackParams::build(
            self.strategy.kind(),
            eps,
            &self.schedule,
            &self.clip,
            self.y_target.as_ref(),
        )
    }

    /// Predicted class of every row of `x`, computed in batches.
    ///
    /// # Errors
    /// On a numerical failure of the model.
    pub fn predict_batched(&self, x: &ArrayView2<MMFloat>) -> Result<Array1<usize>> {
        let batches = x
            .axis_chunks_iter(Axis(0), self.batch_size)
            .map(|batch| predicted_classes(&self.model.predict(&batch)?.view()))
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<_> = batches.iter().map(Array1::view).collect();
        concatenate(Axis(0), &views).map_err(|e| EvalError::invalid(e.to_string()))
    }

    /// Attacks the full test set at one budget and scores the result.
    ///
    /// # Errors
    /// On invalid attack parameters or a numerical failure of the model.
    pub fn evaluate_budget(&mut self, pixel_step: u32) -> Result<BudgetReport> {
        let eps = BudgetSweep::eps(pixel_step);
        let params = self.attack_params(eps);
        debug!(
            "eps {} eps_iter {:?} nb_iter {:?} targeted {}",
            eps,
            params.eps_iter,
            params.nb_iter,
            params.is_targeted()
        );
        let adversarial = generate_batched(
            &self.strategy,
            &self.model,
            &self.test_set.images().view(),
            &params,
            self.batch_size,
            &mut self.rng,
        )?;
        let predicted = self.predict_batched(&adversarial.view())?;
        let accuracy = match &self.threat {
            ThreatModel::Untargeted => untargeted_accuracy(&predicted.view(), &self.test_set.labels().view())?,
            ThreatModel::Targeted { targets } => targeted_complement_accuracy(&predicted.view(), &targets.view())?,
        };
        info!("Budget {}/256 accuracy {:.3}", pixel_step, accuracy);
        Ok(BudgetReport {
            pixel_step,
            eps,
            accuracy,
            targeted: self.threat.is_targeted(),
        })
    }

    /// One report per budget, in sweep order.
    ///
    /// # Errors
    /// On the first budget that fails.
    pub fn run_sweep(&mut self, sweep: &BudgetSweep) -> Result<Vec<BudgetReport>> {
        sweep
            .pixel_steps()
            .map(|step| self.evaluate_budget(step))
            .collect()
    }

    /// Ends the session, handing the model back.
    pub fn release(self) -> M {
        debug!("Releasing evaluation context");
        self.model
    }
}
