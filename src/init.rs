use crate::autograd::Tensor;
use crate::error::{CaeError, Result};
use ndarray::{Array, ArrayD, IxDyn};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InitType {
    /// Gaussian weights. `std == 0` gives every entry the mean.
    Normal { mean: f32, std: f32 },
    Constant(f32),
}

pub fn tensor_init(shape: &[usize], init_type: InitType) -> Result<Tensor> {
    let shape_dyn = IxDyn(shape);

    let data: ArrayD<f32> = match init_type {
        InitType::Constant(v) => ArrayD::from_elem(shape_dyn, v),
        InitType::Normal { mean, std } if std == 0.0 => ArrayD::from_elem(shape_dyn, mean),
        InitType::Normal { mean, std } => {
            let dist = Normal::new(mean, std)
                .map_err(|e| CaeError::config(format!("weight init N({}, {}): {}", mean, std, e)))?;
            Array::random(shape_dyn, dist)
        }
    };

    Ok(Tensor::parameter(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_stddev_is_constant() {
        let t = tensor_init(&[2, 1, 3, 3], InitType::Normal { mean: 1.0, std: 0.0 }).unwrap();
        assert!(t.data().iter().all(|&v| v == 1.0));
        assert!(t.requires_grad());
    }

    #[test]
    fn normal_init_spreads_around_mean() {
        let t = tensor_init(&[4000], InitType::Normal { mean: 0.5, std: 0.1 }).unwrap();
        let d = t.data();
        let mean = d.sum() / d.len() as f32;
        assert!((mean - 0.5).abs() < 0.02);
        assert!(d.iter().any(|&v| v != d[[0]]));
    }

    #[test]
    fn constant_bias() {
        let t = tensor_init(&[3], InitType::Constant(0.1)).unwrap();
        assert_eq!(t.data().as_slice().unwrap(), &[0.1, 0.1, 0.1]);
    }
}
