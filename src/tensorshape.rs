use std::fmt;
use std::ops::Index;

/// Shape of a single image, e.g. `[height, width, channels]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorShape {
	dims: Vec<usize>,
}

impl TensorShape {
	pub fn new(dims: Vec<usize>) -> Self {
		Self { dims }
	}

	pub fn rank(&self) -> usize {
		self.dims.len()
	}

	/// Number of features once the image is flattened.
	pub fn dims(&self) -> usize {
		self.dims.iter().product()
	}
}

impl Index<usize> for TensorShape {
	type Output = usize;

	fn index(&self, idx: usize) -> &usize {
		&self.dims[idx]
	}
}

impl From<Vec<usize>> for TensorShape {
	fn from(v: Vec<usize>) -> Self {
		Self { dims: v }
	}
}

impl fmt::Display for TensorShape {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let dims: Vec<String> = self.dims.iter().map(ToString::to_string).collect();
		write!(f, "({})", dims.join(", "))
	}
}
