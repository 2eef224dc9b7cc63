// src/ops/arithmetic.rs
use crate::autograd::Tensor;
use ndarray::{arr0, ArrayD};

/// Sum of all elements as a 0-d tensor.
pub fn sum(input: &Tensor) -> Tensor {
    let total = input.data_ref().sum();

    let input_clone = input.clone();
    Tensor::from_op(arr0(total).into_dyn(), vec![input.clone()], move |grad| {
        let g = grad.first().copied().unwrap_or(0.0);
        let shape = input_clone.shape();
        input_clone.add_grad(ArrayD::from_elem(shape, g));
    })
}
