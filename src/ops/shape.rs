// src/ops/shape.rs
use crate::autograd::Tensor;
use crate::error::{CaeError, Result};
use ndarray::IxDyn;

/// Row-major reshape; fails when the element count changes.
pub fn reshape(input: &Tensor, shape: &[usize]) -> Result<Tensor> {
    let old_shape = input.shape();
    let reshaped = input
        .data_ref()
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order(IxDyn(shape))
        .map_err(|_| {
            CaeError::shape(format!("cannot reshape {:?} into {:?}", old_shape, shape))
        })?;

    let input_clone = input.clone();
    Ok(Tensor::from_op(reshaped, vec![input.clone()], move |grad| {
        let g = grad
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order(IxDyn(&old_shape))
            .expect("backward reshape: element count changed");
        input_clone.add_grad(g);
    }))
}
