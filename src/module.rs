// src/module.rs
use crate::autograd::Tensor;
use crate::error::{CaeError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Raw parameter dump, in `Module::parameters()` order.
#[derive(Serialize, Deserialize)]
pub struct ModelCheckpoint {
    pub params: Vec<(Vec<usize>, Vec<f32>)>,
}

pub trait Module {
    fn forward(&self, input: Tensor) -> Tensor;
    fn parameters(&self) -> Vec<Tensor>;

    fn save(&self, path: &Path) -> Result<()> {
        let checkpoint = ModelCheckpoint {
            params: self.parameters().iter().map(|p| p.get_raw_data()).collect(),
        };
        let file = File::create(path).map_err(|e| CaeError::io(path, e))?;
        bincode::serialize_into(BufWriter::new(file), &checkpoint)?;
        tracing::debug!(path = %path.display(), "parameters saved");
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<()> {
        let file = File::open(path).map_err(|e| CaeError::io(path, e))?;
        let checkpoint: ModelCheckpoint = bincode::deserialize_from(BufReader::new(file))?;

        let my_params = self.parameters();
        if checkpoint.params.len() != my_params.len() {
            return Err(CaeError::shape(format!(
                "checkpoint '{}' holds {} tensors, model has {}",
                path.display(),
                checkpoint.params.len(),
                my_params.len()
            )));
        }

        for (param, (shape, data)) in my_params.iter().zip(checkpoint.params) {
            param.set_raw_data(shape, data)?;
        }

        tracing::debug!(path = %path.display(), "parameters loaded");
        Ok(())
    }
}

pub struct Sequential {
    layers: Vec<Box<dyn Module>>,
}

impl Sequential {
    pub fn new(layers: Vec<Box<dyn Module>>) -> Self {
        Sequential { layers }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Module for Sequential {
    fn forward(&self, mut input: Tensor) -> Tensor {
        for layer in &self.layers {
            input = layer.forward(input);
        }
        input
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }
}

#[macro_export]
macro_rules! sequential {
    ($($layer:expr),* $(,)?) => {
        $crate::module::Sequential::new(vec![
            $(Box::new($layer) as Box<dyn $crate::module::Module>),*
        ])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{LeakyReLU, Sigmoid};
    use ndarray::{arr1, ArrayD, IxDyn};

    struct Affine {
        w: Tensor,
    }

    impl Module for Affine {
        fn forward(&self, input: Tensor) -> Tensor {
            input
        }
        fn parameters(&self) -> Vec<Tensor> {
            vec![self.w.clone()]
        }
    }

    #[test]
    fn sequential_chains_layers() {
        let net = crate::sequential![LeakyReLU::relu(), Sigmoid];
        assert_eq!(net.len(), 2);
        let y = net.forward(Tensor::from_data_no_grad(arr1(&[-1.0f32, 0.0]).into_dyn()));
        assert_eq!(y.data().as_slice().unwrap(), &[0.5, 0.5]);
    }

    #[test]
    fn save_then_load_restores_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.bin");

        let a = Affine { w: Tensor::parameter(arr1(&[1.0f32, 2.0]).into_dyn()) };
        a.save(&path).unwrap();

        let b = Affine { w: Tensor::parameter(ArrayD::zeros(IxDyn(&[2]))) };
        b.load(&path).unwrap();
        assert_eq!(b.w.data().as_slice().unwrap(), &[1.0, 2.0]);

        let c = Affine { w: Tensor::parameter(ArrayD::zeros(IxDyn(&[3]))) };
        assert!(matches!(c.load(&path), Err(CaeError::Shape(_))));
    }
}
