//! Flat run configuration, shared by the command line and JSON config files.
use crate::artifact::ArtifactKey;
use crate::attack::{AttackKind, IterativeSchedule};
use crate::backbone::ModelVersion;
use crate::dataset::DatasetKind;
use crate::error::{EvalError, Result};
use crate::eval::BudgetSweep;
use crate::margin::ScorePolicy;
use crate::MMFloat;
use clap::ArgAction;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, clap::Args)]
#[serde(default)]
pub struct EvalConfig {
    /// Samples per attack and prediction batch.
    #[arg(long, default_value_t = 50)]
    pub batch_size: usize,

    /// Optimizer the weights were trained with; only names the artifact.
    #[arg(long, default_value = "Adam")]
    pub optimizer: String,

    /// Magnitude the unit class means are scaled by.
    #[arg(long, default_value_t = 10.)]
    pub mean_var: MMFloat,

    #[arg(long, value_enum, default_value_t = AttackKind::FastGradientMethod)]
    pub attack_method: AttackKind,

    /// Attack used during adversarial training; only names the artifact.
    #[arg(long, value_enum, default_value_t = AttackKind::FastGradientMethod)]
    pub attack_method_for_advtrain: AttackKind,

    #[arg(long, value_enum, default_value_t = ModelVersion::V2)]
    pub version: ModelVersion,

    #[arg(long, default_value_t = 0.001)]
    pub lr: MMFloat,

    /// Evaluate under the targeted threat model.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub target: bool,

    /// Whether adversarial training used targeted attacks; only names the artifact.
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    pub use_target: bool,

    /// Steps of the iterative attacks.
    #[arg(long, default_value_t = 10)]
    pub num_iter: usize,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub use_ball: bool,

    /// Score with the margin decision layer instead of a softmax head.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub use_mmlda: bool,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub use_advtrain: bool,

    #[arg(long, default_value_t = 1.)]
    pub adv_ratio: MMFloat,

    /// Checkpoint epoch to load.
    #[arg(long, default_value_t = 1)]
    pub epoch: usize,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub use_bn: bool,

    #[arg(long, value_enum, default_value_t = DatasetKind::Mnist)]
    pub dataset: DatasetKind,

    /// Softmax the margin scores even in ball mode.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub normalize_output_for_ball: bool,

    /// Step size of the iterative attacks, independent of eps.
    #[arg(long, default_value_t = 2. / 256.)]
    pub eps_iter: MMFloat,

    /// Budget increment in 0..255 pixel units.
    #[arg(long, default_value_t = 8)]
    pub pixel_step: u32,

    #[arg(long, default_value_t = 4)]
    pub num_budgets: usize,

    /// Momentum decay of the momentum iterative method.
    #[arg(long, default_value_t = 1.)]
    pub decay_factor: MMFloat,

    /// Seed for target sampling and random starts.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub subtract_pixel_mean: bool,

    /// Directory holding the class mean artifacts.
    #[arg(long, default_value = "kernel_paras")]
    pub kernel_dir: PathBuf,

    /// Directory the weights artifact paths are relative to.
    #[arg(long, default_value = ".")]
    pub model_root: PathBuf,

    /// Directory holding the test splits.
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            optimizer: "Adam".to_owned(),
            mean_var: 10.,
            attack_method: AttackKind::FastGradientMethod,
            attack_method_for_advtrain: AttackKind::FastGradientMethod,
            version: ModelVersion::V2,
            lr: 0.001,
            target: true,
            use_target: false,
            num_iter: 10,
            use_ball: true,
            use_mmlda: true,
            use_advtrain: true,
            adv_ratio: 1.,
            epoch: 1,
            use_bn: true,
            dataset: DatasetKind::Mnist,
            normalize_output_for_ball: true,
            eps_iter: 2. / 256.,
            pixel_step: 8,
            num_budgets: 4,
            decay_factor: 1.,
            seed: 0,
            subtract_pixel_mean: true,
            kernel_dir: PathBuf::from("kernel_paras"),
            model_root: PathBuf::from("."),
            data_dir: PathBuf::from("data"),
        }
    }
}

impl EvalConfig {
    /// Reads a JSON config; absent keys keep their defaults.
    ///
    /// # Errors
    /// On a missing or malformed file, or a configuration `validate` rejects.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        info!("Reading configuration from {}", path.display());
        let file = File::open(path).map_err(|e| EvalError::from_io(path.to_owned(), e))?;
        let config: Self = serde_json::from_reader(BufReader::new(file)).map_err(|source| {
            EvalError::ArtifactFormat {
                path: path.to_owned(),
                source,
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// `InvalidParameter` for settings no evaluation can run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EvalError::invalid("batch_size must be positive"));
        }
        if self.attack_method.is_iterative() && self.num_iter == 0 {
            return Err(EvalError::invalid(format!(
                "{} needs num_iter > 0",
                self.attack_method
            )));
        }
        if self.attack_method.is_iterative() && !(self.eps_iter.is_finite() && self.eps_iter > 0.) {
            return Err(EvalError::invalid("eps_iter must be positive"));
        }
        if !(self.mean_var.is_finite() && self.mean_var > 0.) {
            return Err(EvalError::invalid("mean_var must be positive"));
        }
        if self.num_budgets == 0 {
            return Err(EvalError::invalid("num_budgets must be positive"));
        }
        self.sweep()?;
        Ok(())
    }

    pub fn score_policy(&self) -> ScorePolicy {
        ScorePolicy::resolve(self.use_mmlda, self.use_ball, self.normalize_output_for_ball)
    }

    pub fn schedule(&self) -> IterativeSchedule {
        IterativeSchedule {
            eps_iter: self.eps_iter,
            nb_iter: self.num_iter,
        }
    }

    /// # Errors
    /// When the largest budget overflows.
    pub fn sweep(&self) -> Result<BudgetSweep> {
        BudgetSweep::new(self.pixel_step, self.num_budgets)
    }

    pub fn artifact_key(&self) -> ArtifactKey {
        ArtifactKey {
            dataset: self.dataset,
            version: self.version,
            mean_var: self.mean_var,
            optimizer: self.optimizer.clone(),
            lr: self.lr,
            batch_size: self.batch_size,
            use_advtrain: self.use_advtrain,
            use_target: self.use_target,
            attack_method_for_advtrain: self.attack_method_for_advtrain,
            adv_ratio: self.adv_ratio,
            use_bn: self.use_bn,
            use_mmlda: self.use_mmlda,
            use_ball: self.use_ball,
            epoch: self.epoch,
        }
    }

    /// Weights location under `model_root`.
    pub fn weights_path(&self) -> PathBuf {
        self.model_root
            .join(crate::artifact::resolve_artifact_path(&self.artifact_key()))
    }
}
