//! Residual network variants used as embedding models.
use crate::backbone::{Backbone, BatchNorm, Dense, Layer, ReLU, Residual};
use crate::error::{EvalError, Result};
use log::info;
use ndarray::{Array1, Array2};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

/// Residual blocks per stage.
const BLOCKS_PER_STAGE: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(try_from = "u32", into = "u32")]
pub enum ModelVersion {
    /// Post-activation basic blocks, 64-dimensional embedding.
    #[value(name = "1")]
    V1,
    /// Pre-activation bottleneck blocks, 256-dimensional embedding.
    #[value(name = "2")]
    V2,
}

impl ModelVersion {
    pub const fn number(self) -> u32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }

    pub const fn depth(self) -> usize {
        match self {
            Self::V1 => BLOCKS_PER_STAGE * 6 + 2,
            Self::V2 => BLOCKS_PER_STAGE * 9 + 2,
        }
    }

    pub const fn feature_dim(self) -> usize {
        self.stage_widths()[2]
    }

    const fn stage_widths(self) -> [usize; 3] {
        match self {
            Self::V1 => [16, 32, 64],
            Self::V2 => [64, 128, 256],
        }
    }
}

impl TryFrom<u32> for ModelVersion {
    type Error = EvalError;

    fn try_from(version: u32) -> Result<Self> {
        match version {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            _ => Err(EvalError::UnknownModelVersion { version }),
        }
    }
}

impl From<ModelVersion> for u32 {
    fn from(version: ModelVersion) -> Self {
        version.number()
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

fn maybe_bn(use_bn: bool, width: usize) -> Option<Box<dyn Layer>> {
    if use_bn {
        Some(Box::new(BatchNorm::identity(width)))
    } else {
        None
    }
}

/// Final projection of a residual branch starts at zero so each block is the identity.
fn zero_dense(input_dim: usize, output_dim: usize) -> Box<dyn Layer> {
    Box::new(Dense::from_parts(
        Array2::zeros((output_dim, input_dim)),
        Array1::zeros(output_dim),
    ))
}

fn basic_block<R: Rng>(width: usize, use_bn: bool, rng: &mut R) -> Residual {
    let mut branch: Vec<Box<dyn Layer>> = vec![Box::new(Dense::he_normal(width, width, rng))];
    branch.extend(maybe_bn(use_bn, width));
    branch.push(Box::new(ReLU::new(width)));
    branch.push(zero_dense(width, width));
    branch.extend(maybe_bn(use_bn, width));
    Residual::new(branch)
}

fn bottleneck_block<R: Rng>(width: usize, use_bn: bool, rng: &mut R) -> Residual {
    let inner = width / 4;
    let mut branch: Vec<Box<dyn Layer>> = vec![];
    branch.extend(maybe_bn(use_bn, width));
    branch.push(Box::new(ReLU::new(width)));
    branch.push(Box::new(Dense::he_normal(width, inner, rng)));
    branch.extend(maybe_bn(use_bn, inner));
    branch.push(Box::new(ReLU::new(inner)));
    branch.push(Box::new(Dense::he_normal(inner, inner, rng)));
    branch.extend(maybe_bn(use_bn, inner));
    branch.push(Box::new(ReLU::new(inner)));
    branch.push(zero_dense(inner, width));
    Residual::new(branch)
}

/// Builds a freshly initialised residual backbone for flattened inputs of
/// `input_dim` features, plus the dense softmax head of the baseline variant.
///
/// # Errors
/// Only if the layer stack is inconsistent, which indicates a bug in the builder.
pub fn resnet<R: Rng>(
    version: ModelVersion,
    input_dim: usize,
    num_classes: usize,
    use_bn: bool,
    rng: &mut R,
) -> Result<(Backbone, Dense)> {
    let widths = version.stage_widths();
    let mut backbone = Backbone::new(input_dim);
    backbone.add_layer(Box::new(Dense::he_normal(input_dim, widths[0], rng)))?;
    if version == ModelVersion::V1 {
        if let Some(bn) = maybe_bn(use_bn, widths[0]) {
            backbone.add_layer(bn)?;
        }
        backbone.add_layer(Box::new(ReLU::new(widths[0])))?;
    }

    for (stage, &width) in widths.iter().enumerate() {
        if stage > 0 {
            backbone.add_layer(Box::new(Dense::he_normal(widths[stage - 1], width, rng)))?;
        }
        for _ in 0..BLOCKS_PER_STAGE {
            match version {
                ModelVersion::V1 => {
                    backbone.add_layer(Box::new(basic_block(width, use_bn, rng)))?;
                    backbone.add_layer(Box::new(ReLU::new(width)))?;
                }
                ModelVersion::V2 => {
                    backbone.add_layer(Box::new(bottleneck_block(width, use_bn, rng)))?;
                }
            }
        }
    }

    if version == ModelVersion::V2 {
        let width = version.feature_dim();
        if let Some(bn) = maybe_bn(use_bn, width) {
            backbone.add_layer(bn)?;
        }
        backbone.add_layer(Box::new(ReLU::new(width)))?;
    }

    info!(
        "Built resnet{}v{} backbone: {} -> {}",
        version.depth(),
        version,
        input_dim,
        backbone.embedding_dim()
    );
    let head = Dense::he_normal(version.feature_dim(), num_classes, rng);
    Ok((backbone, head))
}
