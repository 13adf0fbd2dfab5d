//! Error taxonomy of an evaluation run. Every variant is fatal.
use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, EvalError>;

#[derive(Debug)]
pub enum EvalError {
    UnknownDataset {
        name: String,
    },
    UnknownAttack {
        name: String,
    },
    UnknownModelVersion {
        version: u32,
    },
    DimensionMismatch {
        embedding_dim: usize,
        means_dim: usize,
    },
    ClassCountMismatch {
        expected: usize,
        found: usize,
    },
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    InvalidParameter {
        reason: String,
    },
    ArtifactNotFound {
        path: PathBuf,
    },
    ArtifactIo {
        path: PathBuf,
        source: std::io::Error,
    },
    ArtifactFormat {
        path: PathBuf,
        source: serde_json::Error,
    },
    NumericAnomaly {
        stage: &'static str,
    },
}

impl EvalError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            reason: reason.into(),
        }
    }

    /// Errors raised before any numerical work starts.
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownDataset { .. }
                | Self::UnknownAttack { .. }
                | Self::UnknownModelVersion { .. }
                | Self::DimensionMismatch { .. }
                | Self::ClassCountMismatch { .. }
                | Self::ShapeMismatch { .. }
                | Self::InvalidParameter { .. }
        )
    }

    pub const fn is_artifact(&self) -> bool {
        matches!(
            self,
            Self::ArtifactNotFound { .. } | Self::ArtifactIo { .. } | Self::ArtifactFormat { .. }
        )
    }

    /// Maps an I/O failure on `path`, turning `NotFound` into `ArtifactNotFound`.
    pub fn from_io(path: PathBuf, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::ArtifactNotFound { path }
        } else {
            Self::ArtifactIo { path, source }
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownDataset { name } => write!(f, "unknown dataset `{}`", name),
            Self::UnknownAttack { name } => write!(f, "unknown attack method `{}`", name),
            Self::UnknownModelVersion { version } => {
                write!(f, "unknown model version {} (expected 1 or 2)", version)
            }
            Self::DimensionMismatch {
                embedding_dim,
                means_dim,
            } => write!(
                f,
                "embedding dimension {} does not match class mean dimension {}",
                embedding_dim, means_dim
            ),
            Self::ClassCountMismatch { expected, found } => write!(
                f,
                "expected {} classes but found {}",
                expected, found
            ),
            Self::ShapeMismatch {
                what,
                expected,
                found,
            } => write!(f, "{}: expected size {}, found {}", what, expected, found),
            Self::InvalidParameter { reason } => write!(f, "invalid parameter: {}", reason),
            Self::ArtifactNotFound { path } => {
                write!(f, "artifact not found at {}", path.display())
            }
            Self::ArtifactIo { path, .. } => {
                write!(f, "failed to access artifact {}", path.display())
            }
            Self::ArtifactFormat { path, .. } => {
                write!(f, "malformed artifact {}", path.display())
            }
            Self::NumericAnomaly { stage } => {
                write!(f, "non-finite values produced during {}", stage)
            }
        }
    }
}

impl std::error::Error for EvalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ArtifactIo { source, .. } => Some(source),
            Self::ArtifactFormat { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn missing_file_becomes_artifact_not_found() {
        let err = EvalError::from_io(
            PathBuf::from("nowhere/model.001.json"),
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, EvalError::ArtifactNotFound { .. }));
        assert!(err.is_artifact());
        assert!(!err.is_configuration());
    }

    #[test]
    fn other_io_errors_keep_their_source() {
        let err = EvalError::from_io(
            PathBuf::from("x"),
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn configuration_errors_are_classified() {
        assert!(EvalError::UnknownAttack {
            name: "CarliniWagnerL2".into()
        }
        .is_configuration());
        assert!(EvalError::DimensionMismatch {
            embedding_dim: 64,
            means_dim: 256
        }
        .is_configuration());
        assert!(!EvalError::NumericAnomaly { stage: "margin" }.is_configuration());
    }
}
