//! Precomputed class means of the max-mahalanobis decision rule.
use crate::error::{EvalError, Result};
use crate::MMFloat;
use log::info;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// One mean vector per class, already scaled by the configured magnitude.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassMeans {
    means: Array2<MMFloat>,
}

/// JSON layout of the means artifact.
#[derive(Debug, Deserialize, Serialize)]
struct MeansArtifact {
    mean_logits: Vec<Vec<MMFloat>>,
}

impl ClassMeans {
    /// # Errors
    /// If there are no classes or the matrix has no columns.
    pub fn new(means: Array2<MMFloat>) -> Result<Self> {
        if means.nrows() == 0 || means.ncols() == 0 {
            return Err(EvalError::invalid("class means must be a non-empty matrix"));
        }
        if means.iter().any(|x| !x.is_finite()) {
            return Err(EvalError::NumericAnomaly {
                stage: "class means",
            });
        }
        Ok(Self { means })
    }

    /// Artifact name for a given embedding dimension and class count.
    pub fn file_name(feature_dim: usize, num_classes: usize) -> String {
        format!(
            "meanvar1_featuredim{}_class{}.json",
            feature_dim, num_classes
        )
    }

    pub fn artifact_path(dir: &Path, feature_dim: usize, num_classes: usize) -> PathBuf {
        dir.join(Self::file_name(feature_dim, num_classes))
    }

    /// Loads the unit-variance means for (`feature_dim`, `num_classes`) from `dir`
    /// and scales them by `mean_var`.
    ///
    /// # Errors
    /// `ArtifactNotFound` for a missing file, `ArtifactFormat` for bad JSON,
    /// `ClassCountMismatch`/`DimensionMismatch` when the matrix disagrees with the request.
    pub fn load(dir: &Path, feature_dim: usize, num_classes: usize, mean_var: MMFloat) -> Result<Self> {
        let path = Self::artifact_path(dir, feature_dim, num_classes);
        info!("Loading class means from {}", path.display());
        let file = File::open(&path).map_err(|e| EvalError::from_io(path.clone(), e))?;
        let artifact: MeansArtifact = serde_json::from_reader(BufReader::new(file))
            .map_err(|source| EvalError::ArtifactFormat {
                path: path.clone(),
                source,
            })?;
        Self::from_rows(&artifact.mean_logits, feature_dim, num_classes, mean_var)
    }

    /// # Errors
    /// When the rows do not form a `num_classes` x `feature_dim` matrix.
    pub fn from_rows(
        rows: &[Vec<MMFloat>],
        feature_dim: usize,
        num_classes: usize,
        mean_var: MMFloat,
    ) -> Result<Self> {
        if rows.len() != num_classes {
            return Err(EvalError::ClassCountMismatch {
                expected: num_classes,
                found: rows.len(),
            });
        }
        if let Some(row) = rows.iter().find(|row| row.len() != feature_dim) {
            return Err(EvalError::DimensionMismatch {
                embedding_dim: feature_dim,
                means_dim: row.len(),
            });
        }
        let flat: Vec<MMFloat> = rows.iter().flatten().map(|&x| x * mean_var).collect();
        let means = Array2::from_shape_vec((num_classes, feature_dim), flat)
            .map_err(|e| EvalError::invalid(e.to_string()))?;
        Self::new(means)
    }

    pub fn num_classes(&self) -> usize {
        self.means.nrows()
    }

    pub fn dim(&self) -> usize {
        self.means.ncols()
    }

    pub fn view(&self) -> ArrayView2<MMFloat> {
        self.means.view()
    }

    pub fn class(&self, idx: usize) -> ArrayView1<MMFloat> {
        self.means.index_axis(Axis(0), idx)
    }
}
