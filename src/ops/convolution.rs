// src/ops/convolution.rs
//
// NCHW convolution, transposed convolution and max pooling. Both
// convolutions go through im2col + GEMM per sample; samples are processed in
// parallel with rayon.
use crate::autograd::Tensor;
use ndarray::{s, Array1, Array2, Array4, ArrayView3, ArrayView4, ArrayViewMut3, Axis, Ix1, Ix4, Zip};
use rayon::prelude::*;

/// Zero padding around the spatial dims. TensorFlow-style SAME padding puts
/// the odd pixel at the bottom/right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Padding {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

/// Output size of a SAME-padded window op.
pub fn same_output_dim(input: usize, stride: usize) -> usize {
    (input + stride - 1) / stride
}

fn same_pad_total(input: usize, kernel: usize, stride: usize) -> usize {
    let out = same_output_dim(input, stride);
    ((out - 1) * stride + kernel).saturating_sub(input)
}

impl Padding {
    pub fn same(input: (usize, usize), kernel: (usize, usize), stride: (usize, usize)) -> Padding {
        let ph = same_pad_total(input.0, kernel.0, stride.0);
        let pw = same_pad_total(input.1, kernel.1, stride.1);
        Padding {
            top: ph / 2,
            bottom: ph - ph / 2,
            left: pw / 2,
            right: pw - pw / 2,
        }
    }

    fn is_zero(&self) -> bool {
        *self == Padding::default()
    }

    fn padded(&self, h: usize, w: usize) -> (usize, usize) {
        (h + self.top + self.bottom, w + self.left + self.right)
    }
}

fn as_4d<'a>(a: &'a ndarray::ArrayD<f32>, what: &str) -> ArrayView4<'a, f32> {
    a.view()
        .into_dimensionality::<Ix4>()
        .unwrap_or_else(|_| panic!("{} must be 4D, got {:?}", what, a.shape()))
}

fn padding_array(input: ArrayView4<f32>, pad: Padding) -> Array4<f32> {
    if pad.is_zero() {
        return input.to_owned();
    }
    let (b, c, h, w) = input.dim();
    let (hp, wp) = pad.padded(h, w);
    let mut padded = Array4::zeros((b, c, hp, wp));
    padded
        .slice_mut(s![.., .., pad.top..pad.top + h, pad.left..pad.left + w])
        .assign(&input);
    padded
}

fn crop(padded: &Array4<f32>, pad: Padding, h: usize, w: usize) -> Array4<f32> {
    if pad.is_zero() {
        return padded.clone();
    }
    padded
        .slice(s![.., .., pad.top..pad.top + h, pad.left..pad.left + w])
        .to_owned()
}

// [C, H, W] -> [C*KH*KW, OH*OW]
fn im2col(
    input: &ArrayView3<f32>,
    kernel: (usize, usize),
    stride: (usize, usize),
    out_dim: (usize, usize),
) -> Array2<f32> {
    let (cin, _, _) = input.dim();
    let (kh, kw) = kernel;
    let (sh, sw) = stride;
    let (hout, wout) = out_dim;

    let mut col = Array2::<f32>::zeros((cin * kh * kw, hout * wout));
    let mut col_idx = 0;
    for y in 0..hout {
        for x in 0..wout {
            let mut row_idx = 0;
            for ic in 0..cin {
                for ky in 0..kh {
                    for kx in 0..kw {
                        // SAFETY: out_dim was derived from the padded input
                        // size, so every window lies inside `input`.
                        unsafe {
                            *col.uget_mut((row_idx, col_idx)) =
                                *input.uget((ic, y * sh + ky, x * sw + kx));
                        }
                        row_idx += 1;
                    }
                }
            }
            col_idx += 1;
        }
    }
    col
}

// [C*KH*KW, OH*OW] accumulated into [C, H, W]; overlapping windows add up.
fn col2im(
    col: &Array2<f32>,
    img: &mut ArrayViewMut3<f32>,
    kernel: (usize, usize),
    stride: (usize, usize),
    out_dim: (usize, usize),
) {
    let (cin, _, _) = img.dim();
    let (kh, kw) = kernel;
    let (sh, sw) = stride;
    let (hout, wout) = out_dim;

    let mut col_idx = 0;
    for y in 0..hout {
        for x in 0..wout {
            let mut row_idx = 0;
            for ic in 0..cin {
                for ky in 0..kh {
                    for kx in 0..kw {
                        // SAFETY: same geometry as im2col.
                        unsafe {
                            *img.uget_mut((ic, y * sh + ky, x * sw + kx)) +=
                                *col.uget((row_idx, col_idx));
                        }
                        row_idx += 1;
                    }
                }
            }
            col_idx += 1;
        }
    }
}

fn kernel_matrix(w: ArrayView4<f32>) -> Array2<f32> {
    let (oc, ic, kh, kw) = w.dim();
    w.as_standard_layout()
        .into_owned()
        .into_shape_with_order((oc, ic * kh * kw))
        .expect("kernel reshape")
}

fn add_channel_bias(out: &mut Array4<f32>, bias: &Array1<f32>) {
    Zip::from(out.outer_iter_mut()).par_for_each(|mut sample| {
        for (mut plane, &b) in sample.outer_iter_mut().zip(bias.iter()) {
            plane.mapv_inplace(|v| v + b);
        }
    });
}

fn bias_grad(g: ArrayView4<f32>) -> ndarray::ArrayD<f32> {
    g.sum_axis(Axis(0))
        .sum_axis(Axis(1))
        .sum_axis(Axis(1))
        .into_dyn()
}

/// Sum of per-sample `[OC, OH*OW] x [OH*OW, K]` products, reduced in
/// sample order so the result does not depend on thread scheduling.
fn weight_grad(
    outputs: ArrayView4<f32>,
    inputs_padded: &Array4<f32>,
    kernel: (usize, usize),
    stride: (usize, usize),
) -> Array2<f32> {
    let (batch, oc, oh, ow) = outputs.dim();
    let per_sample: Vec<Array2<f32>> = (0..batch)
        .into_par_iter()
        .map(|i| {
            let cols = im2col(
                &inputs_padded.index_axis(Axis(0), i),
                kernel,
                stride,
                (oh, ow),
            );
            let o = outputs.index_axis(Axis(0), i);
            let o_col = o.to_shape((oc, oh * ow)).expect("output reshape");
            o_col.dot(&cols.t())
        })
        .collect();

    let k_dim = inputs_padded.shape()[1] * kernel.0 * kernel.1;
    per_sample
        .into_iter()
        .fold(Array2::zeros((oc, k_dim)), |acc, g| acc + g)
}

/// `input: [B, C_in, H, W]`, `weight: [C_out, C_in, KH, KW]`,
/// `bias: [C_out]` -> `[B, C_out, OH, OW]`.
pub fn conv2d(
    input: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
    stride: (usize, usize),
    padding: Padding,
) -> Tensor {
    let x_pad = padding_array(as_4d(&input.data_ref(), "conv2d input"), padding);
    let w_data = weight.data();
    let w4 = as_4d(&w_data, "conv2d weight");
    let (batch, in_c, in_h, in_w) = as_4d(&input.data_ref(), "conv2d input").dim();
    let (out_c, w_in_c, kh, kw) = w4.dim();
    assert_eq!(in_c, w_in_c, "conv2d: input has {} channels, kernel expects {}", in_c, w_in_c);

    let (_, _, hp, wp) = x_pad.dim();
    assert!(hp >= kh && wp >= kw, "conv2d: kernel larger than padded input");
    let out_h = (hp - kh) / stride.0 + 1;
    let out_w = (wp - kw) / stride.1 + 1;

    let w_col = kernel_matrix(w4);
    let mut output = Array4::<f32>::zeros((batch, out_c, out_h, out_w));
    Zip::from(output.outer_iter_mut())
        .and(x_pad.outer_iter())
        .par_for_each(|mut out_sample, x_sample| {
            let cols = im2col(&x_sample, (kh, kw), stride, (out_h, out_w));
            let out = w_col
                .dot(&cols)
                .into_shape_with_order((out_c, out_h, out_w))
                .expect("conv2d output reshape");
            out_sample.assign(&out);
        });

    let bias_data = bias.map(|b| b.data().into_dimensionality::<Ix1>().expect("bias must be 1D"));
    if let Some(b) = &bias_data {
        add_channel_bias(&mut output, b);
    }

    let mut parents = vec![input.clone(), weight.clone()];
    parents.extend(bias.cloned());

    let input_c = input.clone();
    let weight_c = weight.clone();
    let bias_c = bias.cloned();

    Tensor::from_op(output.into_dyn(), parents, move |grad_output| {
        let g = as_4d(grad_output, "conv2d grad");

        if input_c.requires_grad() {
            let w_col = kernel_matrix(as_4d(&weight_c.data_ref(), "conv2d weight"));
            let w_col_t = w_col.t();
            let mut gx_pad = Array4::<f32>::zeros(x_pad.dim());
            Zip::from(gx_pad.outer_iter_mut())
                .and(g.outer_iter())
                .par_for_each(|mut gx, gy| {
                    let gy_col = gy.to_shape((out_c, out_h * out_w)).expect("grad reshape");
                    let d_col = w_col_t.dot(&gy_col);
                    col2im(&d_col, &mut gx, (kh, kw), stride, (out_h, out_w));
                });
            input_c.add_grad(crop(&gx_pad, padding, in_h, in_w).into_dyn());
        }

        let gw = weight_grad(g, &x_pad, (kh, kw), stride);
        let gw = gw
            .into_shape_with_order((out_c, in_c, kh, kw))
            .expect("weight grad reshape");
        weight_c.add_grad(gw.into_dyn());

        if let Some(b) = &bias_c {
            b.add_grad(bias_grad(g));
        }
    })
}

/// Adjoint of [`conv2d`] with the same kernel layout.
///
/// `input: [B, C_out, h, w]`, `weight: [C_out, C_in, KH, KW]`,
/// `bias: [C_in]` -> `[B, C_in, out_hw.0, out_hw.1]`, where `out_hw` is the
/// size the matching `conv2d` consumed. A decoder built this way can take
/// the encoder's kernel handle as-is: the kernel is applied transposed
/// without copying it.
pub fn conv_transpose2d(
    input: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
    stride: (usize, usize),
    padding: Padding,
    out_hw: (usize, usize),
) -> Tensor {
    let x = input.data();
    let x4 = as_4d(&x, "conv_transpose2d input");
    let w_data = weight.data();
    let w4 = as_4d(&w_data, "conv_transpose2d weight");
    let (batch, x_c, h, w) = x4.dim();
    let (out_c, in_c, kh, kw) = w4.dim();
    assert_eq!(
        x_c, out_c,
        "conv_transpose2d: input has {} channels, kernel produces {}",
        x_c, out_c
    );

    let (out_h, out_w) = out_hw;
    let (hp, wp) = padding.padded(out_h, out_w);
    assert!(
        (h - 1) * stride.0 + kh <= hp && (w - 1) * stride.1 + kw <= wp,
        "conv_transpose2d: {}x{} input does not fit a {}x{} output",
        h,
        w,
        out_h,
        out_w
    );

    let w_col = kernel_matrix(w4);
    let w_col_t = w_col.t();
    let mut y_pad = Array4::<f32>::zeros((batch, in_c, hp, wp));
    Zip::from(y_pad.outer_iter_mut())
        .and(x4.outer_iter())
        .par_for_each(|mut y, x_sample| {
            let x_col = x_sample.to_shape((out_c, h * w)).expect("input reshape");
            let cols = w_col_t.dot(&x_col);
            col2im(&cols, &mut y, (kh, kw), stride, (h, w));
        });
    let mut output = crop(&y_pad, padding, out_h, out_w);

    let bias_data = bias.map(|b| b.data().into_dimensionality::<Ix1>().expect("bias must be 1D"));
    if let Some(b) = &bias_data {
        add_channel_bias(&mut output, b);
    }

    let mut parents = vec![input.clone(), weight.clone()];
    parents.extend(bias.cloned());

    let input_c = input.clone();
    let weight_c = weight.clone();
    let bias_c = bias.cloned();

    Tensor::from_op(output.into_dyn(), parents, move |grad_output| {
        let g = as_4d(grad_output, "conv_transpose2d grad");
        // Gradients of the adjoint are the forward conv of the upstream grad.
        let g_pad = padding_array(g, padding);

        if input_c.requires_grad() {
            let w_col = kernel_matrix(as_4d(&weight_c.data_ref(), "conv_transpose2d weight"));
            let mut gx = Array4::<f32>::zeros((batch, out_c, h, w));
            Zip::from(gx.outer_iter_mut())
                .and(g_pad.outer_iter())
                .par_for_each(|mut gx_sample, gy| {
                    let cols = im2col(&gy, (kh, kw), stride, (h, w));
                    let d = w_col
                        .dot(&cols)
                        .into_shape_with_order((out_c, h, w))
                        .expect("input grad reshape");
                    gx_sample.assign(&d);
                });
            input_c.add_grad(gx.into_dyn());
        }

        let x = input_c.data();
        let gw = weight_grad(as_4d(&x, "conv_transpose2d input"), &g_pad, (kh, kw), stride);
        let gw = gw
            .into_shape_with_order((out_c, in_c, kh, kw))
            .expect("weight grad reshape");
        weight_c.add_grad(gw.into_dyn());

        if let Some(b) = &bias_c {
            b.add_grad(bias_grad(g));
        }
    })
}

/// Max pooling over `window` with SAME padding; padded cells never win.
pub fn max_pool2d(input: &Tensor, window: (usize, usize), stride: (usize, usize)) -> Tensor {
    let x = input.data();
    let x4 = as_4d(&x, "max_pool2d input");
    let (b, c, h, w) = x4.dim();
    let (kh, kw) = window;
    let (sh, sw) = stride;
    let pad = Padding::same((h, w), window, stride);
    let out_h = same_output_dim(h, sh);
    let out_w = same_output_dim(w, sw);

    let mut output = Array4::<f32>::zeros((b, c, out_h, out_w));
    // Flat index (row * w + col) of each window's maximum.
    let mut argmax = Array4::<usize>::zeros((b, c, out_h, out_w));

    Zip::from(output.outer_iter_mut())
        .and(argmax.outer_iter_mut())
        .and(x4.outer_iter())
        .par_for_each(|mut out_sample, mut arg_sample, x_sample| {
            for ch in 0..c {
                let plane = x_sample.index_axis(Axis(0), ch);
                for y in 0..out_h {
                    let y0 = (y * sh).saturating_sub(pad.top);
                    let y1 = (y * sh + kh).saturating_sub(pad.top).min(h);
                    for xx in 0..out_w {
                        let x0 = (xx * sw).saturating_sub(pad.left);
                        let x1 = (xx * sw + kw).saturating_sub(pad.left).min(w);
                        let mut best = f32::NEG_INFINITY;
                        let mut best_idx = y0 * w + x0;
                        for yy in y0..y1 {
                            for xw in x0..x1 {
                                let v = plane[[yy, xw]];
                                if v > best {
                                    best = v;
                                    best_idx = yy * w + xw;
                                }
                            }
                        }
                        out_sample[[ch, y, xx]] = best;
                        arg_sample[[ch, y, xx]] = best_idx;
                    }
                }
            }
        });

    let input_c = input.clone();
    Tensor::from_op(output.into_dyn(), vec![input.clone()], move |grad_output| {
        let g = as_4d(grad_output, "max_pool2d grad");
        let mut gx = Array4::<f32>::zeros((b, c, h, w));
        Zip::from(gx.outer_iter_mut())
            .and(g.outer_iter())
            .and(argmax.outer_iter())
            .par_for_each(|mut gx_sample, g_sample, arg_sample| {
                for ((ch, y, xx), &gv) in g_sample.indexed_iter() {
                    let idx = arg_sample[[ch, y, xx]];
                    gx_sample[[ch, idx / w, idx % w]] += gv;
                }
            });
        input_c.add_grad(gx.into_dyn());
    })
}

/// Reference conv used by the tests: direct sliding-window sum.
#[cfg(test)]
fn naive_conv2d(x: &Array4<f32>, w: &Array4<f32>, stride: (usize, usize), pad: Padding) -> Array4<f32> {
    let xp = padding_array(x.view(), pad);
    let (b, _, hp, wp) = xp.dim();
    let (oc, ic, kh, kw) = w.dim();
    let oh = (hp - kh) / stride.0 + 1;
    let ow = (wp - kw) / stride.1 + 1;
    let mut out = Array4::zeros((b, oc, oh, ow));
    for n in 0..b {
        for o in 0..oc {
            for y in 0..oh {
                for xx in 0..ow {
                    let mut acc = 0.0;
                    for i in 0..ic {
                        for ky in 0..kh {
                            for kx in 0..kw {
                                acc += xp[[n, i, y * stride.0 + ky, xx * stride.1 + kx]] * w[[o, i, ky, kx]];
                            }
                        }
                    }
                    out[[n, o, y, xx]] = acc;
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::MSELoss;
    use ndarray::{Array, ArrayD};

    fn ramp(shape: (usize, usize, usize, usize), scale: f32) -> Array4<f32> {
        let n = shape.0 * shape.1 * shape.2 * shape.3;
        Array::from_shape_vec(shape, (0..n).map(|i| ((i % 7) as f32 - 3.0) * scale).collect()).unwrap()
    }

    fn close(a: &ArrayD<f32>, b: &ArrayD<f32>, tol: f32) -> bool {
        a.shape() == b.shape() && a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= tol)
    }

    #[test]
    fn same_padding_matches_tensorflow() {
        assert_eq!(Padding::same((28, 28), (5, 5), (1, 1)), Padding { top: 2, bottom: 2, left: 2, right: 2 });
        assert_eq!(Padding::same((7, 7), (2, 2), (2, 2)), Padding { top: 0, bottom: 1, left: 0, right: 1 });
        assert_eq!(Padding::same((28, 28), (1, 1), (2, 2)), Padding::default());
        assert_eq!(Padding::same((6, 6), (4, 4), (1, 1)), Padding { top: 1, bottom: 2, left: 1, right: 2 });
    }

    #[test]
    fn conv2d_matches_naive_sum() {
        let x = ramp((2, 2, 6, 5), 0.1);
        let w = ramp((3, 2, 3, 3), 0.05);
        let pad = Padding::same((6, 5), (3, 3), (2, 2));
        let expected = naive_conv2d(&x, &w, (2, 2), pad);

        let out = conv2d(
            &Tensor::from_data_no_grad(x.into_dyn()),
            &Tensor::parameter(w.into_dyn()),
            None,
            (2, 2),
            pad,
        );
        assert_eq!(out.shape(), vec![2, 3, 3, 3]);
        assert!(close(&out.data(), &expected.into_dyn(), 1e-5));
    }

    #[test]
    fn conv_transpose_is_adjoint_of_conv() {
        // <conv(x), y> == <x, conv_t(y)> for the same kernel.
        let x = ramp((1, 2, 5, 5), 0.3);
        let y = ramp((1, 3, 3, 3), 0.2);
        let w = Tensor::parameter(ramp((3, 2, 2, 2), 0.1).into_dyn());
        let pad = Padding::same((5, 5), (2, 2), (2, 2));

        let cx = conv2d(&Tensor::from_data_no_grad(x.clone().into_dyn()), &w, None, (2, 2), pad);
        let ty = conv_transpose2d(&Tensor::from_data_no_grad(y.clone().into_dyn()), &w, None, (2, 2), pad, (5, 5));
        assert_eq!(ty.shape(), vec![1, 2, 5, 5]);

        let lhs: f32 = (&cx.data() * &y.into_dyn()).sum();
        let rhs: f32 = (&ty.data() * &x.into_dyn()).sum();
        assert!((lhs - rhs).abs() < 1e-4, "{} vs {}", lhs, rhs);
    }

    #[test]
    fn conv2d_weight_grad_matches_finite_difference() {
        let x = Tensor::from_data_no_grad(ramp((2, 1, 4, 4), 0.25).into_dyn());
        let w = Tensor::parameter(ramp((2, 1, 3, 3), 0.1).into_dyn());
        let b = Tensor::parameter(Array1::<f32>::zeros(2).into_dyn());
        let pad = Padding::same((4, 4), (3, 3), (1, 1));

        let out = conv2d(&x, &w, Some(&b), (1, 1), pad);
        crate::ops::arithmetic::sum(&out).backward();
        let analytic = w.grad().unwrap();

        let eps = 1e-2;
        let base = w.data();
        for idx in [0usize, 4, 13] {
            let mut plus = base.clone();
            plus.as_slice_mut().unwrap()[idx] += eps;
            let mut minus = base.clone();
            minus.as_slice_mut().unwrap()[idx] -= eps;
            let f = |k: ArrayD<f32>| {
                conv2d(&x, &Tensor::from_data_no_grad(k), None, (1, 1), pad).data().sum()
            };
            let numeric = (f(plus) - f(minus)) / (2.0 * eps);
            let got = analytic.as_slice().unwrap()[idx];
            assert!((numeric - got).abs() < 1e-2, "idx {}: {} vs {}", idx, numeric, got);
        }
        // d(sum)/d(bias_c) = number of output pixels per channel over the batch.
        assert_eq!(b.grad().unwrap(), Array1::from_elem(2, 32.0).into_dyn());
    }

    #[test]
    fn conv_transpose2d_strided_weight_grad_matches_finite_difference() {
        let y = Tensor::from_data_no_grad(ramp((2, 3, 3, 3), 0.2).into_dyn());
        let w = Tensor::parameter(ramp((3, 2, 3, 3), 0.1).into_dyn());
        let b = Tensor::parameter(Array1::<f32>::zeros(2).into_dyn());
        let pad = Padding::same((5, 5), (3, 3), (2, 2));
        // MSE against a ramp weighs every output pixel differently.
        let target = ramp((2, 2, 5, 5), 0.5).into_dyn();
        let n = target.len() as f32;

        let out = conv_transpose2d(&y, &w, Some(&b), (2, 2), pad, (5, 5));
        assert_eq!(out.shape(), vec![2, 2, 5, 5]);
        MSELoss::apply(&out, &Tensor::from_data_no_grad(target.clone())).backward();
        let analytic = w.grad().unwrap();

        let eps = 1e-2;
        let base = w.data();
        for idx in [0usize, 7, 23, 40, 53] {
            let mut plus = base.clone();
            plus.as_slice_mut().unwrap()[idx] += eps;
            let mut minus = base.clone();
            minus.as_slice_mut().unwrap()[idx] -= eps;
            let f = |k: ArrayD<f32>| {
                let r = conv_transpose2d(&y, &Tensor::from_data_no_grad(k), None, (2, 2), pad, (5, 5)).data();
                (&r - &target).mapv(|d| d * d).sum() / n
            };
            let numeric = (f(plus) - f(minus)) / (2.0 * eps);
            let got = analytic.as_slice().unwrap()[idx];
            assert!((numeric - got).abs() < 1e-2, "idx {}: {} vs {}", idx, numeric, got);
        }

        let residual = (&out.data() - &target).mapv(|d| 2.0 * d / n);
        let bias_grad: Vec<f32> = (0..2).map(|c| residual.index_axis(Axis(1), c).sum()).collect();
        assert!(close(&b.grad().unwrap(), &Array1::from(bias_grad).into_dyn(), 1e-4));
    }

    #[test]
    fn tied_kernel_collects_both_gradients() {
        let x = Tensor::from_data_no_grad(ramp((1, 1, 4, 4), 0.2).into_dyn());
        let w = Tensor::parameter(ramp((2, 1, 2, 2), 0.1).into_dyn());
        let pad = Padding::same((4, 4), (2, 2), (1, 1));

        let h = conv2d(&x, &w, None, (1, 1), pad);
        let r = conv_transpose2d(&h, &w, None, (1, 1), pad, (4, 4));
        crate::ops::arithmetic::sum(&r).backward();
        let tied = w.grad().unwrap();

        // Same graph with an untied copy: the two partial grads must add up.
        let w_enc = Tensor::parameter(w.data());
        let w_dec = Tensor::parameter(w.data());
        let h = conv2d(&x, &w_enc, None, (1, 1), pad);
        let r = conv_transpose2d(&h, &w_dec, None, (1, 1), pad, (4, 4));
        crate::ops::arithmetic::sum(&r).backward();
        let split = w_enc.grad().unwrap() + w_dec.grad().unwrap();
        assert!(close(&tied, &split, 1e-4));
    }

    #[test]
    fn max_pool_handles_odd_sizes_and_routes_grad() {
        let x = Array::from_shape_vec((1, 1, 3, 3), vec![1., 5., 2., 0., 3., 9., 4., 8., 7.]).unwrap();
        let xt = Tensor::parameter(x.into_dyn());
        let out = max_pool2d(&xt, (2, 2), (2, 2));
        assert_eq!(out.shape(), vec![1, 1, 2, 2]);
        assert_eq!(out.data().as_slice().unwrap(), &[5., 9., 8., 7.]);

        crate::ops::arithmetic::sum(&out).backward();
        let g = xt.grad().unwrap();
        assert_eq!(g.as_slice().unwrap(), &[0., 1., 0., 0., 0., 1., 0., 1., 1.]);
    }
}
