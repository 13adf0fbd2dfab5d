//! Embedding backbone: a residual network mapping flattened images to
//! fixed-length feature vectors, with the gradient plumbing attacks need.
pub mod backbone;
pub mod batchnorm;
pub mod dense;
pub mod layer;
pub mod relu;
pub mod residual;
pub mod resnet;

pub use backbone::Backbone;
pub use batchnorm::BatchNorm;
pub use dense::Dense;
pub use layer::Layer;
pub use relu::ReLU;
pub use residual::Residual;
pub use resnet::{resnet, ModelVersion};
