use crate::autograd::Tensor;
use crate::error::Result;
use crate::init::{tensor_init, InitType};
use crate::module::Module;
use crate::ops::convolution::{conv2d, conv_transpose2d, same_output_dim, Padding};
use ndarray::ArrayD;

/// SAME-padded convolution. Weight layout `[C_out, C_in, KH, KW]`.
pub struct Conv2D {
    pub weight: Tensor,
    pub bias: Option<Tensor>,
    pub stride: usize,
    pub padding: Padding,
    /// Spatial size of the input this layer was built for.
    pub input_hw: (usize, usize),
}

impl Conv2D {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize),
        stride: usize,
        input_hw: (usize, usize),
        weight_init: InitType,
        bias_init: InitType,
    ) -> Result<Self> {
        let weight = tensor_init(&[out_channels, in_channels, kernel.0, kernel.1], weight_init)?;
        let bias = tensor_init(&[out_channels], bias_init)?;
        Ok(Conv2D {
            weight,
            bias: Some(bias),
            stride,
            padding: Padding::same(input_hw, kernel, (stride, stride)),
            input_hw,
        })
    }

    pub fn output_hw(&self) -> (usize, usize) {
        (
            same_output_dim(self.input_hw.0, self.stride),
            same_output_dim(self.input_hw.1, self.stride),
        )
    }
}

impl Module for Conv2D {
    fn forward(&self, input: Tensor) -> Tensor {
        conv2d(
            &input,
            &self.weight,
            self.bias.as_ref(),
            (self.stride, self.stride),
            self.padding,
        )
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut params = vec![self.weight.clone()];
        if let Some(b) = &self.bias {
            params.push(b.clone());
        }
        params
    }
}

/// Kernel of a decoder layer.
#[derive(Clone)]
pub enum DecoderKernel {
    /// Handle to the mirrored encoder layer's weight; not a parameter of
    /// the decoder, so the optimizer sees it once.
    Tied(Tensor),
    Own(Tensor),
}

impl DecoderKernel {
    pub fn tensor(&self) -> &Tensor {
        match self {
            DecoderKernel::Tied(t) | DecoderKernel::Own(t) => t,
        }
    }

    pub fn is_tied(&self) -> bool {
        matches!(self, DecoderKernel::Tied(_))
    }
}

/// Transposed convolution mapping an encoder layer's output back onto its
/// input geometry.
pub struct ConvTranspose2D {
    pub kernel: DecoderKernel,
    pub bias: Option<Tensor>,
    pub stride: usize,
    pub padding: Padding,
    pub output_hw: (usize, usize),
}

impl ConvTranspose2D {
    /// Decoder sharing `encoder`'s kernel.
    pub fn tied(encoder: &Conv2D, stride: usize, bias_init: InitType) -> Result<Self> {
        let shape = encoder.weight.shape();
        let kernel = DecoderKernel::Tied(encoder.weight.clone());
        Self::build(kernel, shape[1], (shape[2], shape[3]), stride, encoder.input_hw, bias_init)
    }

    /// Decoder with its own kernel of the same shape as `encoder`'s.
    pub fn untied(
        encoder: &Conv2D,
        stride: usize,
        weight_init: InitType,
        bias_init: InitType,
    ) -> Result<Self> {
        let shape = encoder.weight.shape();
        let kernel = DecoderKernel::Own(tensor_init(&shape, weight_init)?);
        Self::build(kernel, shape[1], (shape[2], shape[3]), stride, encoder.input_hw, bias_init)
    }

    fn build(
        kernel: DecoderKernel,
        out_channels: usize,
        kernel_hw: (usize, usize),
        stride: usize,
        output_hw: (usize, usize),
        bias_init: InitType,
    ) -> Result<Self> {
        Ok(ConvTranspose2D {
            kernel,
            bias: Some(tensor_init(&[out_channels], bias_init)?),
            stride,
            padding: Padding::same(output_hw, kernel_hw, (stride, stride)),
            output_hw,
        })
    }

    /// The kernel as this layer applies it, `[C_in, C_out, KH, KW]`.
    pub fn transposed_kernel(&self) -> ArrayD<f32> {
        transpose_kernel(&self.kernel.tensor().data_ref())
    }
}

impl Module for ConvTranspose2D {
    fn forward(&self, input: Tensor) -> Tensor {
        conv_transpose2d(
            &input,
            self.kernel.tensor(),
            self.bias.as_ref(),
            (self.stride, self.stride),
            self.padding,
            self.output_hw,
        )
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut params = Vec::new();
        if let DecoderKernel::Own(k) = &self.kernel {
            params.push(k.clone());
        }
        if let Some(b) = &self.bias {
            params.push(b.clone());
        }
        params
    }
}

/// `[C_out, C_in, KH, KW]` -> `[C_in, C_out, KH, KW]`.
pub fn transpose_kernel(k: &ArrayD<f32>) -> ArrayD<f32> {
    let mut t = k.clone();
    t.swap_axes(0, 1);
    t.as_standard_layout().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::Tensor;
    use ndarray::{ArrayD, IxDyn};

    fn encoder() -> Conv2D {
        Conv2D::new(
            1,
            3,
            (3, 3),
            2,
            (7, 7),
            InitType::Normal { mean: 0.0, std: 0.1 },
            InitType::Constant(0.0),
        )
        .unwrap()
    }

    #[test]
    fn tied_decoder_shares_storage_and_owns_only_bias() {
        let enc = encoder();
        let dec = ConvTranspose2D::tied(&enc, 2, InitType::Constant(0.0)).unwrap();
        assert!(dec.kernel.tensor().ptr_eq(&enc.weight));
        assert_eq!(dec.parameters().len(), 1);
        assert_eq!(dec.parameters()[0].shape(), vec![1]);

        enc.weight.data_mut().fill(0.5);
        assert!(dec.transposed_kernel().iter().all(|&v| v == 0.5));
        assert_eq!(dec.transposed_kernel().shape(), &[3, 1, 3, 3]);
    }

    #[test]
    fn untied_decoder_has_independent_kernel() {
        let enc = encoder();
        let dec = ConvTranspose2D::untied(
            &enc,
            2,
            InitType::Normal { mean: 0.0, std: 0.1 },
            InitType::Constant(0.0),
        )
        .unwrap();
        assert!(!dec.kernel.tensor().ptr_eq(&enc.weight));
        assert_eq!(dec.parameters().len(), 2);
    }

    #[test]
    fn round_trip_restores_geometry() {
        let enc = encoder();
        assert_eq!(enc.output_hw(), (4, 4));
        let dec = ConvTranspose2D::tied(&enc, 2, InitType::Constant(0.0)).unwrap();
        let x = Tensor::from_data_no_grad(ArrayD::ones(IxDyn(&[2, 1, 7, 7])));
        let y = dec.forward(enc.forward(x));
        assert_eq!(y.shape(), vec![2, 1, 7, 7]);
    }
}
