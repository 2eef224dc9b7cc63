// src/autograd.rs
use crate::error::{CaeError, Result};
use ndarray::prelude::*;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashSet;
use std::rc::Rc;

// Per thread: tensors are `Rc` and never leave the thread that built them.
thread_local! {
    static NO_GRAD_DEPTH: Cell<usize> = const { Cell::new(0) };
}

pub struct NoGradGuard {
    _priv: (),
}

impl NoGradGuard {
    pub fn enter() -> Self {
        NO_GRAD_DEPTH.with(|d| d.set(d.get() + 1));
        Self { _priv: () }
    }
}

impl Drop for NoGradGuard {
    fn drop(&mut self) {
        NO_GRAD_DEPTH.with(|d| d.set(d.get() - 1));
    }
}

/// True inside a `NoGradGuard` scope: ops skip recording backward closures.
#[inline]
pub fn is_no_grad() -> bool {
    NO_GRAD_DEPTH.with(|d| d.get() > 0)
}

pub fn no_grad<R>(f: impl FnOnce() -> R) -> R {
    let _g = NoGradGuard::enter();
    f()
}

pub type BackwardOp = Box<dyn Fn(&ArrayD<f32>)>;

pub struct TensorData {
    pub data: ArrayD<f32>,
    pub grad: Option<ArrayD<f32>>,
    pub parents: Vec<Tensor>,
    pub backward_op: Option<BackwardOp>,
    pub requires_grad: bool,
}

/// Reference-counted graph node. Cloning a `Tensor` clones the handle, not
/// the data; two clones are the same parameter.
#[derive(Clone)]
pub struct Tensor(pub(crate) Rc<RefCell<TensorData>>);

impl Tensor {
    fn leaf(data: ArrayD<f32>, requires_grad: bool) -> Tensor {
        Tensor(Rc::new(RefCell::new(TensorData {
            data,
            grad: None,
            parents: Vec::new(),
            backward_op: None,
            requires_grad,
        })))
    }

    /// Constant input: never receives gradients.
    pub fn from_data_no_grad(data: ArrayD<f32>) -> Tensor {
        Tensor::leaf(data, false)
    }

    /// Trainable leaf.
    pub fn parameter(data: ArrayD<f32>) -> Tensor {
        Tensor::leaf(data, true)
    }

    /// Result of an op. The backward closure is only recorded when grad
    /// tracking is on and some parent needs a gradient.
    pub fn from_op(
        data: ArrayD<f32>,
        parents: Vec<Tensor>,
        backward_op: impl Fn(&ArrayD<f32>) + 'static,
    ) -> Tensor {
        let track = !is_no_grad() && parents.iter().any(|p| p.requires_grad());
        if !track {
            return Tensor::from_data_no_grad(data);
        }
        Tensor(Rc::new(RefCell::new(TensorData {
            data,
            grad: None,
            parents,
            backward_op: Some(Box::new(backward_op)),
            requires_grad: true,
        })))
    }

    pub fn data_ref(&self) -> Ref<'_, ArrayD<f32>> {
        let borrow = self.0.borrow();
        Ref::map(borrow, |t| &t.data)
    }

    pub fn data_mut(&self) -> RefMut<'_, ArrayD<f32>> {
        let borrow = self.0.borrow_mut();
        RefMut::map(borrow, |t| &mut t.data)
    }

    pub fn data(&self) -> ArrayD<f32> {
        self.0.borrow().data.clone()
    }

    pub fn grad(&self) -> Option<ArrayD<f32>> {
        self.0.borrow().grad.clone()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.0.borrow().data.shape().to_vec()
    }

    /// First element; the value of a scalar loss.
    pub fn item(&self) -> f32 {
        self.0.borrow().data.first().copied().unwrap_or(0.0)
    }

    #[inline]
    pub fn requires_grad(&self) -> bool {
        self.0.borrow().requires_grad
    }

    pub fn sum(&self) -> Tensor {
        crate::ops::arithmetic::sum(self)
    }

    /// Whether both handles point at the same storage.
    pub fn ptr_eq(&self, other: &Tensor) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn zero_grad(&self) {
        self.0.borrow_mut().grad = None;
    }

    /// Accumulates into `grad`. A parameter used twice in one graph (tied
    /// weights) receives the sum of both contributions.
    pub fn add_grad(&self, grad: ArrayD<f32>) {
        let mut inner = self.0.borrow_mut();
        if !inner.requires_grad {
            return;
        }

        if inner.data.shape() != grad.shape() {
            panic!(
                "gradient shape mismatch: parameter {:?}, gradient {:?}",
                inner.data.shape(),
                grad.shape()
            );
        }

        match inner.grad.as_mut() {
            Some(existing) => *existing += &grad,
            None => inner.grad = Some(grad),
        }
    }

    pub fn backward(&self) {
        let mut topo = Vec::new();
        let mut visited = HashSet::new();

        fn build_topo(
            node: &Tensor,
            topo: &mut Vec<Tensor>,
            visited: &mut HashSet<*const RefCell<TensorData>>,
        ) {
            let ptr = Rc::as_ptr(&node.0);
            if !visited.insert(ptr) {
                return;
            }
            for parent in &node.0.borrow().parents {
                build_topo(parent, topo, visited);
            }
            topo.push(node.clone());
        }

        build_topo(self, &mut topo, &mut visited);

        let seed = ArrayD::ones(self.shape());
        self.add_grad(seed);

        for node in topo.iter().rev() {
            let inner = node.0.borrow();
            if let (Some(grad), Some(op)) = (&inner.grad, &inner.backward_op) {
                op(grad);
            }
        }
    }

    pub fn get_raw_data(&self) -> (Vec<usize>, Vec<f32>) {
        let inner = self.0.borrow();
        (
            inner.data.shape().to_vec(),
            inner.data.iter().cloned().collect(),
        )
    }

    /// Overwrites the data in place; the shape must not change so that every
    /// handle sharing this tensor stays consistent.
    pub fn set_raw_data(&self, shape: Vec<usize>, raw_data: Vec<f32>) -> Result<()> {
        let current = self.shape();
        if current != shape {
            return Err(CaeError::shape(format!(
                "cannot load {:?} into parameter of shape {:?}",
                shape, current
            )));
        }
        let new_data = Array::from_shape_vec(IxDyn(&shape), raw_data)
            .map_err(|e| CaeError::shape(e.to_string()))?;
        self.0.borrow_mut().data = new_data;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_leaf_accumulates_gradients() {
        let w = Tensor::parameter(ArrayD::zeros(IxDyn(&[2])));
        let alias = w.clone();
        w.add_grad(ArrayD::ones(IxDyn(&[2])));
        alias.add_grad(ArrayD::ones(IxDyn(&[2])));
        assert!(w.ptr_eq(&alias));
        assert_eq!(w.grad().unwrap(), ArrayD::from_elem(IxDyn(&[2]), 2.0));
    }

    #[test]
    fn constants_ignore_gradients() {
        let x = Tensor::from_data_no_grad(ArrayD::zeros(IxDyn(&[3])));
        x.add_grad(ArrayD::ones(IxDyn(&[3])));
        assert!(x.grad().is_none());
    }

    #[test]
    fn no_grad_ops_do_not_record() {
        let w = Tensor::parameter(ArrayD::zeros(IxDyn(&[1])));
        let out = no_grad(|| Tensor::from_op(w.data(), vec![w.clone()], |_| {}));
        assert!(!out.requires_grad());
        let out = Tensor::from_op(w.data(), vec![w.clone()], |_| {});
        assert!(out.requires_grad());
    }

    #[test]
    fn set_raw_data_rejects_new_shape() {
        let w = Tensor::parameter(ArrayD::zeros(IxDyn(&[2, 2])));
        assert!(w.set_raw_data(vec![4], vec![0.0; 4]).is_err());
        w.set_raw_data(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(w.get_raw_data().1, vec![1.0, 2.0, 3.0, 4.0]);
    }
}
