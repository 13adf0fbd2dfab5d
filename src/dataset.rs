//! Dataset identifiers and the glue that turns a raw test split into
//! normalised, mean-shifted batches.
use crate::bounds::ClipBounds;
use crate::error::{EvalError, Result};
use crate::tensorshape::TensorShape;
use crate::MMFloat;
use log::info;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Mnist,
    Cifar10,
    Cifar100,
}

impl DatasetKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mnist => "mnist",
            Self::Cifar10 => "cifar10",
            Self::Cifar100 => "cifar100",
        }
    }

    pub fn image_shape(self) -> TensorShape {
        match self {
            Self::Mnist => TensorShape::new(vec![28, 28, 1]),
            Self::Cifar10 | Self::Cifar100 => TensorShape::new(vec![32, 32, 3]),
        }
    }

    pub const fn num_classes(self) -> usize {
        match self {
            Self::Mnist | Self::Cifar10 => 10,
            Self::Cifar100 => 100,
        }
    }

    /// Location of the test split inside `data_dir`.
    pub fn test_file(self, data_dir: &Path) -> PathBuf {
        data_dir.join(format!("{}_test.json", self.as_str()))
    }
}

impl FromStr for DatasetKind {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mnist" => Ok(Self::Mnist),
            "cifar10" => Ok(Self::Cifar10),
            "cifar100" => Ok(Self::Cifar100),
            _ => Err(EvalError::UnknownDataset { name: s.to_owned() }),
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// On-disk layout of a test split: raw 0..=255 pixels, flattened per image.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RawTestSplit {
    pub x_test: Vec<Vec<MMFloat>>,
    pub y_test: Vec<usize>,
    /// Per-feature mean of the normalised training images.
    #[serde(default)]
    pub pixel_mean: Option<Vec<MMFloat>>,
}

impl RawTestSplit {
    /// # Errors
    /// `ArtifactNotFound` when the file is missing, `ArtifactFormat` when it does not parse.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| EvalError::from_io(path.to_owned(), e))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| {
            EvalError::ArtifactFormat {
                path: path.to_owned(),
                source,
            }
        })
    }
}

/// Normalised test images with their integer labels.
#[derive(Clone, Debug)]
pub struct TestSet {
    images: Array2<MMFloat>,
    labels: Array1<usize>,
}

impl TestSet {
    /// # Errors
    /// When the number of images and labels differ, or a label is out of range.
    pub fn new(images: Array2<MMFloat>, labels: Array1<usize>, num_classes: usize) -> Result<Self> {
        if images.nrows() != labels.len() {
            return Err(EvalError::ShapeMismatch {
                what: "labels per image",
                expected: images.nrows(),
                found: labels.len(),
            });
        }
        if let Some(&bad) = labels.iter().find(|&&l| l >= num_classes) {
            return Err(EvalError::ClassCountMismatch {
                expected: num_classes,
                found: bad + 1,
            });
        }
        Ok(Self { images, labels })
    }

    pub fn images(&self) -> &Array2<MMFloat> {
        &self.images
    }

    pub fn labels(&self) -> &Array1<usize> {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn feature_dim(&self) -> usize {
        self.images.ncols()
    }
}

/// Scales pixels into [0, 1] and optionally subtracts the training pixel mean.
///
/// Returns the test set together with the clip bounds, shifted by the same mean.
///
/// # Errors
/// On a feature count that disagrees with the dataset's image shape, on bad labels,
/// or when the mean is to be subtracted but the split does not carry one.
pub fn prepare(
    kind: DatasetKind,
    raw: RawTestSplit,
    subtract_pixel_mean: bool,
) -> Result<(TestSet, ClipBounds)> {
    let feature_dim = kind.image_shape().dims();
    let n = raw.x_test.len();
    let mut flat = Vec::with_capacity(n * feature_dim);
    for image in &raw.x_test {
        if image.len() != feature_dim {
            return Err(EvalError::ShapeMismatch {
                what: "pixels per image",
                expected: feature_dim,
                found: image.len(),
            });
        }
        flat.extend(image.iter().map(|&p| p / 255.));
    }
    let mut images = Array2::from_shape_vec((n, feature_dim), flat)
        .map_err(|e| EvalError::invalid(e.to_string()))?;
    let mut clip = ClipBounds::uniform(feature_dim, 0., 1.);

    if subtract_pixel_mean {
        let mean = raw.pixel_mean.ok_or_else(|| {
            EvalError::invalid(format!(
                "subtract_pixel_mean is set but the {} test split has no `pixel_mean`",
                kind
            ))
        })?;
        if mean.len() != feature_dim {
            return Err(EvalError::ShapeMismatch {
                what: "pixel mean",
                expected: feature_dim,
                found: mean.len(),
            });
        }
        let mean = Array1::from_vec(mean);
        subtract_mean(&mut images, &mean.view());
        clip = clip.shifted(&mean.view());
        info!("Subtracted training pixel mean from {} test images", n);
    }

    let labels = Array1::from_vec(raw.y_test);
    Ok((TestSet::new(images, labels, kind.num_classes())?, clip))
}

fn subtract_mean(images: &mut Array2<MMFloat>, mean: &ArrayView1<MMFloat>) {
    for mut row in images.axis_iter_mut(Axis(0)) {
        row -= mean;
    }
}

/// One-hot encoding of `labels` over `num_classes` columns.
pub fn to_categorical(labels: &ArrayView1<usize>, num_classes: usize) -> Array2<MMFloat> {
    let mut onehot = Array2::zeros((labels.len(), num_classes));
    for (mut row, &label) in onehot.axis_iter_mut(Axis(0)).zip(labels.iter()) {
        row[label] = 1.;
    }
    onehot
}
