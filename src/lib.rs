#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]
//! Adversarial robustness evaluation for classifiers that score by distance to
//! fixed class means (max-mahalanobis / large-margin decision rule).
//!
//! The crate is organised leaf-first: an embedding [`backbone`] feeds the
//! [`margin`] decision layer, both are assembled into a [`classifier`], the
//! [`attack`] strategies perturb inputs through the classifier's gradients and
//! [`eval`] sweeps perturbation budgets and reports accuracy.
extern crate ndarray;
extern crate ndarray_rand;
extern crate ndarray_stats;
extern crate rand;

pub mod affine;
pub mod artifact;
pub mod attack;
pub mod backbone;
pub mod bounds;
pub mod classifier;
pub mod config;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod margin;
pub mod means;
pub mod targets;
pub mod tensorshape;

#[cfg(test)]
mod test_util;

pub type MMFloat = f64;

pub use crate::attack::{AttackKind, AttackParams, AttackStrategy};
pub use crate::bounds::ClipBounds;
pub use crate::classifier::{Classifier, DifferentiableModel, Head};
pub use crate::config::EvalConfig;
pub use crate::error::{EvalError, Result};
pub use crate::eval::{BudgetReport, BudgetSweep, EvaluationContext, ThreatModel};
pub use crate::margin::{MarginLayer, ScorePolicy};
pub use crate::means::ClassMeans;
