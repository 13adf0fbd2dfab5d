//! Deterministic location and (de)serialisation of trained model weights.
use crate::attack::AttackKind;
use crate::backbone::{Backbone, Dense, Layer, ModelVersion};
use crate::dataset::DatasetKind;
use crate::error::{EvalError, Result};
use crate::MMFloat;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Every training setting that distinguishes one weights artifact from another.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub dataset: DatasetKind,
    pub version: ModelVersion,
    pub mean_var: MMFloat,
    pub optimizer: String,
    pub lr: MMFloat,
    pub batch_size: usize,
    pub use_advtrain: bool,
    pub use_target: bool,
    pub attack_method_for_advtrain: AttackKind,
    pub adv_ratio: MMFloat,
    pub use_bn: bool,
    pub use_mmlda: bool,
    pub use_ball: bool,
    pub epoch: usize,
}

/// Renders a float the way the training scripts named directories:
/// integral values keep a trailing `.0`, and decimal exponents below -4 or
/// from 16 up switch to `1e-05` / `1e+16` notation.
fn float_name(x: MMFloat) -> String {
    if !x.is_finite() {
        return format!("{}", x);
    }
    let scientific = format!("{:e}", x);
    if let Some((mantissa, exponent)) = scientific.split_once('e') {
        if let Ok(exponent) = exponent.parse::<i32>() {
            if !(-4..16).contains(&exponent) {
                let sign = if exponent < 0 { '-' } else { '+' };
                return format!("{}e{}{:02}", mantissa, sign, exponent.abs());
            }
        }
    }
    if x.fract() == 0. {
        format!("{:.1}", x)
    } else {
        format!("{}", x)
    }
}

/// Relative path of the weights file for `key`. Pure: touches no filesystem.
pub fn resolve_artifact_path(key: &ArtifactKey) -> PathBuf {
    let (root, advtrain_name, adv_ratio_name) = if key.use_advtrain {
        let target = if key.use_target { "target" } else { "" };
        (
            "advtrained_models",
            format!("_{}{}", target, key.attack_method_for_advtrain),
            format!("_advratio{}", float_name(key.adv_ratio)),
        )
    } else {
        ("trained_models", String::new(), String::new())
    };
    let bn_name = if key.use_bn { "_withBN" } else { "_noBN" };

    let mut dir = format!("resnet32v{}", key.version);
    if key.use_mmlda {
        dir.push_str(&format!("_meanvar{}", float_name(key.mean_var)));
    }
    dir.push_str(&format!(
        "_{}_lr{}_batchsize{}{}{}{}",
        key.optimizer,
        float_name(key.lr),
        key.batch_size,
        advtrain_name,
        adv_ratio_name,
        bn_name
    ));
    if key.use_mmlda && !key.use_ball {
        dir.push_str("_softmax");
    }

    PathBuf::from(root)
        .join(key.dataset.as_str())
        .join(dir)
        .join(format!("model.{:03}.json", key.epoch))
}

/// Trained parameters: the backbone and, for the baseline variant, its softmax head.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelWeights {
    pub backbone: Backbone,
    #[serde(default)]
    pub softmax_head: Option<Dense>,
}

impl ModelWeights {
    /// # Errors
    /// `ArtifactNotFound` when nothing exists at `path`; there is no fallback.
    /// `ArtifactFormat` on malformed JSON and `ShapeMismatch` when the stored
    /// layers do not fit together.
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading model weights from {}", path.display());
        let file = File::open(path).map_err(|e| EvalError::from_io(path.to_owned(), e))?;
        let weights: Self =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| EvalError::ArtifactFormat {
                path: path.to_owned(),
                source,
            })?;
        weights.check_shapes()?;
        Ok(weights)
    }

    /// # Errors
    /// `ShapeMismatch` if the backbone chain or the softmax head is inconsistent.
    pub fn check_shapes(&self) -> Result<()> {
        self.backbone.check_shapes()?;
        if let Some(head) = &self.softmax_head {
            head.check_shapes()?;
        }
        Ok(())
    }

    /// # Errors
    /// On any I/O or serialisation failure.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|source| EvalError::ArtifactIo {
                    path: parent.to_owned(),
                    source,
                })?;
        }
        let file = File::create(path).map_err(|source| EvalError::ArtifactIo {
            path: path.to_owned(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self).map_err(|source| EvalError::ArtifactFormat {
            path: path.to_owned(),
            source,
        })?;
        writer.flush().map_err(|source| EvalError::ArtifactIo {
            path: path.to_owned(),
            source,
        })
    }
}
