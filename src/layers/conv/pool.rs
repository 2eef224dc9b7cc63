use crate::autograd::Tensor;
use crate::module::Module;
use crate::ops::convolution::max_pool2d;

/// Square max pooling, window == stride, SAME padding.
pub struct MaxPool2D {
    pub size: usize,
}

impl MaxPool2D {
    pub fn new(size: usize) -> Self {
        MaxPool2D { size }
    }
}

impl Module for MaxPool2D {
    fn forward(&self, input: Tensor) -> Tensor {
        max_pool2d(&input, (self.size, self.size), (self.size, self.size))
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![]
    }
}
