use crate::autograd::Tensor;
use crate::config::ErrorFunction;
use ndarray::{arr0, Zip};

/// Reconstructions are clamped into `[EPS, 1 - EPS]` before taking logs.
pub const BCE_EPS: f32 = 1e-7;

// --- MSE Loss ---
pub struct MSELoss;

impl MSELoss {
    pub fn apply(output: &Tensor, target: &Tensor) -> Tensor {
        let loss_val = {
            let out_ref = output.data_ref();
            let tar_ref = target.data_ref();
            let n = out_ref.len() as f32;
            let sum_sq: f32 = Zip::from(&*out_ref)
                .and(&*tar_ref)
                .par_map_collect(|&o, &t| (o - t).powi(2))
                .sum();
            sum_sq / n
        };

        let output_clone = output.clone();
        let target_clone = target.clone();
        Tensor::from_op(
            arr0(loss_val).into_dyn(),
            vec![output.clone(), target.clone()],
            move |grad_output| {
                let g = grad_output.first().copied().unwrap_or(0.0);
                // dL/dx = 2/N * (x - y) * g
                let grad = {
                    let out_d = output_clone.data_ref();
                    let tar_d = target_clone.data_ref();
                    let factor = 2.0 / out_d.len() as f32 * g;
                    Zip::from(&*out_d)
                        .and(&*tar_d)
                        .par_map_collect(|&o, &t| (o - t) * factor)
                };
                if target_clone.requires_grad() {
                    target_clone.add_grad(grad.mapv(|x| -x));
                }
                output_clone.add_grad(grad);
            },
        )
    }
}

// --- Binary cross entropy ---
/// Mean over elements of `-(t ln r + (1 - t) ln(1 - r))`, target in `[0, 1]`.
pub struct BinaryCrossEntropyLoss;

impl BinaryCrossEntropyLoss {
    pub fn apply(reconstruction: &Tensor, target: &Tensor) -> Tensor {
        let loss_val = {
            let r_ref = reconstruction.data_ref();
            let t_ref = target.data_ref();
            let n = r_ref.len() as f32;
            let total: f32 = Zip::from(&*r_ref)
                .and(&*t_ref)
                .par_map_collect(|&r, &t| {
                    let r = r.clamp(BCE_EPS, 1.0 - BCE_EPS);
                    -(t * r.ln() + (1.0 - t) * (1.0 - r).ln())
                })
                .sum();
            total / n
        };

        let r_clone = reconstruction.clone();
        let t_clone = target.clone();
        Tensor::from_op(
            arr0(loss_val).into_dyn(),
            vec![reconstruction.clone()],
            move |grad_output| {
                let g = grad_output.first().copied().unwrap_or(0.0);
                let grad = {
                    let r_d = r_clone.data_ref();
                    let t_d = t_clone.data_ref();
                    let factor = g / r_d.len() as f32;
                    // Clamped entries are constant in r and get no gradient.
                    Zip::from(&*r_d).and(&*t_d).par_map_collect(|&r, &t| {
                        if r <= BCE_EPS || r >= 1.0 - BCE_EPS {
                            0.0
                        } else {
                            (r - t) / (r * (1.0 - r)) * factor
                        }
                    })
                };
                r_clone.add_grad(grad);
            },
        )
    }
}

pub fn reconstruction_error(function: ErrorFunction, reconstruction: &Tensor, target: &Tensor) -> Tensor {
    match function {
        ErrorFunction::CrossEntropy => BinaryCrossEntropyLoss::apply(reconstruction, target),
        ErrorFunction::MeanSquaredError => MSELoss::apply(reconstruction, target),
    }
}
