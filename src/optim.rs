use crate::autograd::Tensor;
use ndarray::Zip;

pub trait Optimizer {
    fn step(&mut self);
    fn params(&self) -> &[Tensor];

    fn zero_grad(&self) {
        for param in self.params() {
            param.zero_grad();
        }
    }
}

/// Plain gradient descent: `w -= lr * grad`.
pub struct SGD {
    params: Vec<Tensor>,
    lr: f32,
}

impl SGD {
    pub fn new(params: Vec<Tensor>, lr: f32) -> Self {
        SGD { params, lr }
    }
}

impl Optimizer for SGD {
    fn params(&self) -> &[Tensor] {
        &self.params
    }

    fn step(&mut self) {
        let lr = self.lr;
        for param in &self.params {
            let mut p_inner = param.0.borrow_mut();
            // Take the grad out so it can be read while data is borrowed mutably.
            let grad = match p_inner.grad.take() {
                Some(g) => g,
                None => continue,
            };
            Zip::from(&mut p_inner.data)
                .and(&grad)
                .for_each(|w, &g| *w -= lr * g);
            p_inner.grad = Some(grad);
        }
    }
}
