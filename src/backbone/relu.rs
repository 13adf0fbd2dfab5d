use crate::backbone::layer::Layer;
use crate::MMFloat;
use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ReLU {
    ndims: usize,
}

impl ReLU {
    pub const fn new(ndims: usize) -> Self {
        Self { ndims }
    }
}

impl Display for ReLU {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "ReLU")
    }
}

#[typetag::serde]
impl Layer for ReLU {
    fn input_dim(&self) -> usize {
        self.ndims
    }

    fn output_dim(&self) -> usize {
        self.ndims
    }

    fn forward2(&self, input: &ArrayView2<MMFloat>) -> Array2<MMFloat> {
        input.mapv(|x| if x.lt(&0.) { 0. } else { x })
    }

    fn backward2(
        &self,
        input: &ArrayView2<MMFloat>,
        grad_output: &ArrayView2<MMFloat>,
    ) -> Array2<MMFloat> {
        Zip::from(input)
            .and(grad_output)
            .map_collect(|&x, &g| if x > 0. { g } else { 0. })
    }
}
