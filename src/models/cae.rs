// src/models/cae.rs
use crate::autograd::{no_grad, Tensor};
use crate::config::{AutoencoderConfig, InputShape, PoolingType};
use crate::error::{CaeError, Result};
use crate::init::InitType;
use crate::layers::{activation_layer, Conv2D, ConvTranspose2D, DecoderKernel, MaxPool2D};
use crate::loss::reconstruction_error;
use crate::module::{Module, Sequential};
use crate::ops::convolution::same_output_dim;
use crate::ops::shape::reshape;
use ndarray::ArrayD;

/// One encoder stage: conv, optional max pool, activation.
struct EncoderLayer {
    /// Same handle as the kernel inside `block`.
    kernel: Tensor,
    block: Sequential,
    out_channels: usize,
    output_hw: (usize, usize),
}

/// One decoder stage: transposed conv back to the mirrored encoder
/// layer's input geometry, then activation.
struct DecoderLayer {
    kernel: DecoderKernel,
    block: Sequential,
}

/// Hidden activations of one forward pass: every encoder output, then
/// every decoder output except the reconstruction.
pub struct Walkthrough {
    layers: Vec<Tensor>,
}

impl Walkthrough {
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Tensor> {
        self.layers.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tensor> {
        self.layers.iter()
    }
}

pub struct ForwardPass {
    pub encoding: Tensor,
    pub reconstruction: Tensor,
    /// Scalar reconstruction error; call `backward()` on it to train.
    pub error: Tensor,
    pub walkthrough: Walkthrough,
}

/// Convolutional autoencoder over `[B, C, H, W]` batches.
pub struct ConvAutoencoder {
    config: AutoencoderConfig,
    input: InputShape,
    encoder: Vec<EncoderLayer>,
    /// In application order: `decoder[0]` mirrors the last encoder layer.
    decoder: Vec<DecoderLayer>,
}

impl ConvAutoencoder {
    pub fn new(config: AutoencoderConfig, input: InputShape) -> Result<Self> {
        config.validate()?;
        if input.height == 0 || input.width == 0 || input.channels == 0 {
            return Err(CaeError::shape(format!(
                "input geometry {}x{}x{} has a zero dimension",
                input.height, input.width, input.channels
            )));
        }

        let weight_init = InitType::Normal {
            mean: config.weight_init_mean as f32,
            std: config.weight_init_stddev as f32,
        };
        let bias_init = InitType::Constant(config.initial_bias as f32);

        let mut encoder = Vec::with_capacity(config.layers.len());
        let mut decoder = Vec::with_capacity(config.layers.len());
        let mut hw = (input.height, input.width);
        let mut in_channels = input.channels;

        for spec in &config.layers {
            let conv = Conv2D::new(
                in_channels,
                spec.channels,
                (spec.filter_height, spec.filter_width),
                config.conv_stride(),
                hw,
                weight_init,
                bias_init,
            )?;

            let transpose = if config.tie_weights {
                ConvTranspose2D::tied(&conv, config.decoder_stride(), bias_init)?
            } else {
                ConvTranspose2D::untied(&conv, config.decoder_stride(), weight_init, bias_init)?
            };

            let kernel = conv.weight.clone();
            let mut output_hw = conv.output_hw();
            let mut stages: Vec<Box<dyn Module>> = vec![Box::new(conv)];
            if config.pooling == PoolingType::MaxPooling {
                output_hw = (
                    same_output_dim(output_hw.0, config.pooling_stride),
                    same_output_dim(output_hw.1, config.pooling_stride),
                );
                stages.push(Box::new(MaxPool2D::new(config.pooling_stride)));
            }
            stages.push(activation_layer(config.activation, config.relu_leak));

            decoder.push(DecoderLayer {
                kernel: transpose.kernel.clone(),
                block: Sequential::new(vec![
                    Box::new(transpose),
                    activation_layer(config.activation, config.relu_leak),
                ]),
            });
            encoder.push(EncoderLayer {
                kernel,
                block: Sequential::new(stages),
                out_channels: spec.channels,
                output_hw,
            });

            hw = output_hw;
            in_channels = spec.channels;
        }
        decoder.reverse();

        let model = ConvAutoencoder {
            config,
            input,
            encoder,
            decoder,
        };
        tracing::info!(
            layers = model.encoder.len(),
            pooling = %model.config.pooling,
            activation = %model.config.activation,
            tied = model.config.tie_weights,
            parameters = model.parameters().len(),
            encoded = ?model.encoded_shape(),
            "autoencoder built"
        );
        Ok(model)
    }

    pub fn config(&self) -> &AutoencoderConfig {
        &self.config
    }

    pub fn input_shape(&self) -> InputShape {
        self.input
    }

    pub fn hidden_channels(&self) -> Vec<usize> {
        self.config.hidden_channels()
    }

    /// `(channels, height, width)` of the encoding of one image.
    pub fn encoded_shape(&self) -> (usize, usize, usize) {
        let last = &self.encoder[self.encoder.len() - 1];
        (last.out_channels, last.output_hw.0, last.output_hw.1)
    }

    /// Checks a batch against the input geometry and returns its size.
    /// Accepts flattened rows `[B, H*W*C]` or `[B, C, H, W]`.
    pub fn check_batch(&self, batch: &ArrayD<f32>) -> Result<usize> {
        let shape = batch.shape();
        let ok = match shape.len() {
            2 => shape[1] == self.input.pixels(),
            4 => shape[1..] == [self.input.channels, self.input.height, self.input.width],
            _ => false,
        };
        if !ok || shape[0] == 0 {
            return Err(CaeError::shape(format!(
                "batch of shape {:?} does not fit input {}x{}x{}; expected [B, {}] or [B, {}, {}, {}] with B > 0",
                shape,
                self.input.height,
                self.input.width,
                self.input.channels,
                self.input.pixels(),
                self.input.channels,
                self.input.height,
                self.input.width
            )));
        }
        Ok(shape[0])
    }

    pub fn forward(&self, batch: &ArrayD<f32>) -> Result<ForwardPass> {
        let batch_size = self.check_batch(batch)?;
        let x = reshape(
            &Tensor::from_data_no_grad(batch.clone()),
            &[batch_size, self.input.channels, self.input.height, self.input.width],
        )?;

        let mut walkthrough = Vec::with_capacity(2 * self.encoder.len() - 1);
        let mut h = x.clone();
        for layer in &self.encoder {
            h = layer.block.forward(h);
            walkthrough.push(h.clone());
        }
        let encoding = h.clone();

        let last = self.decoder.len() - 1;
        for (i, layer) in self.decoder.iter().enumerate() {
            h = layer.block.forward(h);
            if i < last {
                walkthrough.push(h.clone());
            }
        }

        let error = reconstruction_error(self.config.error_function, &h, &x);
        Ok(ForwardPass {
            encoding,
            reconstruction: h,
            error,
            walkthrough: Walkthrough { layers: walkthrough },
        })
    }

    /// Reconstruction error on `batch` without recording a graph.
    pub fn error(&self, batch: &ArrayD<f32>) -> Result<f32> {
        no_grad(|| self.forward(batch).map(|pass| pass.error.item()))
    }

    /// Encoder kernels, `[C_out, C_in, KH, KW]` per layer.
    pub fn filters(&self) -> Vec<ArrayD<f32>> {
        self.encoder.iter().map(|l| l.kernel.data()).collect()
    }

    pub fn encoder_kernel(&self, layer: usize) -> Option<&Tensor> {
        self.encoder.get(layer).map(|l| &l.kernel)
    }

    /// Kernel of the decoder layer mirroring encoder layer `layer`.
    pub fn decoder_kernel(&self, layer: usize) -> Option<&DecoderKernel> {
        let n = self.decoder.len();
        if layer >= n {
            return None;
        }
        Some(&self.decoder[n - 1 - layer].kernel)
    }
}

impl Module for ConvAutoencoder {
    /// Reconstruction of an already shaped `[B, C, H, W]` tensor.
    fn forward(&self, input: Tensor) -> Tensor {
        let h = self.encoder.iter().fold(input, |h, l| l.block.forward(h));
        self.decoder.iter().fold(h, |h, l| l.block.forward(h))
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.encoder
            .iter()
            .flat_map(|l| l.block.parameters())
            .chain(self.decoder.iter().flat_map(|l| l.block.parameters()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ActivationFunction, ErrorFunction, LayerSpec};
    use crate::layers::conv::conv2d::transpose_kernel;
    use crate::optim::{Optimizer, SGD};
    use ndarray::{Array, IxDyn};
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;

    fn config(layers: Vec<LayerSpec>, pooling: PoolingType, tie: bool) -> AutoencoderConfig {
        AutoencoderConfig {
            layers,
            pooling,
            tie_weights: tie,
            weight_init_mean: 0.0,
            weight_init_stddev: 0.1,
            initial_bias: 0.1,
            ..AutoencoderConfig::default()
        }
    }

    fn two_layers() -> Vec<LayerSpec> {
        vec![LayerSpec::new(3, 3, 4), LayerSpec::new(3, 3, 2)]
    }

    fn batch(b: usize, pixels: usize) -> ArrayD<f32> {
        Array::random(IxDyn(&[b, pixels]), Uniform::new(0.0f32, 1.0))
    }

    #[test]
    fn reconstruction_matches_input_shape_for_every_pooling() {
        for pooling in [PoolingType::None, PoolingType::MaxPooling, PoolingType::StridedConv] {
            for (h, w) in [(28, 28), (9, 7)] {
                let input = InputShape::grayscale(h, w);
                let model = ConvAutoencoder::new(config(two_layers(), pooling, true), input).unwrap();
                let pass = model.forward(&batch(3, input.pixels())).unwrap();
                assert_eq!(pass.reconstruction.shape(), vec![3, 1, h, w], "{:?}", pooling);
                assert_eq!(pass.walkthrough.len(), 3);
            }
        }
    }

    #[test]
    fn pooling_halves_the_encoding() {
        let input = InputShape::grayscale(28, 28);
        let model = ConvAutoencoder::new(config(two_layers(), PoolingType::MaxPooling, true), input).unwrap();
        assert_eq!(model.encoded_shape(), (2, 7, 7));
        let pass = model.forward(&batch(2, 784)).unwrap();
        assert_eq!(pass.encoding.shape(), vec![2, 2, 7, 7]);
        assert_eq!(pass.walkthrough.get(0).unwrap().shape(), vec![2, 4, 14, 14]);
        assert_eq!(pass.walkthrough.get(2).unwrap().shape(), vec![2, 4, 14, 14]);

        let model = ConvAutoencoder::new(config(two_layers(), PoolingType::None, true), input).unwrap();
        assert_eq!(model.encoded_shape(), (2, 28, 28));
    }

    #[test]
    fn tied_kernels_share_storage_through_updates() {
        let input = InputShape::grayscale(8, 8);
        let model = ConvAutoencoder::new(config(two_layers(), PoolingType::StridedConv, true), input).unwrap();

        let before = model.filters();
        let mut opt = SGD::new(model.parameters(), 0.5);
        let pass = model.forward(&batch(4, 64)).unwrap();
        pass.error.backward();
        opt.step();

        for i in 0..2 {
            let enc = model.encoder_kernel(i).unwrap();
            let dec = model.decoder_kernel(i).unwrap();
            assert!(dec.is_tied());
            assert!(dec.tensor().ptr_eq(enc));
            assert_ne!(enc.data(), before[i]);
            assert_eq!(transpose_kernel(&dec.tensor().data()), transpose_kernel(&enc.data()));
        }
        assert!(model.decoder_kernel(2).is_none());
    }

    #[test]
    fn tying_halves_kernel_parameters() {
        let input = InputShape::grayscale(8, 8);
        let tied = ConvAutoencoder::new(config(two_layers(), PoolingType::None, true), input).unwrap();
        let untied = ConvAutoencoder::new(config(two_layers(), PoolingType::None, false), input).unwrap();

        let kernels = |m: &ConvAutoencoder| m.parameters().iter().filter(|p| p.shape().len() == 4).count();
        assert_eq!(kernels(&tied), 2);
        assert_eq!(kernels(&untied), 4);
        assert!(!untied.decoder_kernel(0).unwrap().tensor().ptr_eq(untied.encoder_kernel(0).unwrap()));
    }

    #[test]
    fn error_is_non_negative_for_both_functions() {
        let input = InputShape::grayscale(6, 6);
        for error_function in [ErrorFunction::CrossEntropy, ErrorFunction::MeanSquaredError] {
            for activation in [ActivationFunction::Sigmoid, ActivationFunction::Relu, ActivationFunction::LeakyRelu] {
                let cfg = AutoencoderConfig {
                    error_function,
                    activation,
                    ..config(two_layers(), PoolingType::MaxPooling, true)
                };
                let model = ConvAutoencoder::new(cfg, input).unwrap();
                let e = model.error(&batch(2, 36)).unwrap();
                assert!(e >= 0.0 && e.is_finite(), "{:?}/{:?}: {}", error_function, activation, e);
            }
        }
    }

    #[test]
    fn error_does_not_record_gradients() {
        let input = InputShape::grayscale(4, 4);
        let model = ConvAutoencoder::new(config(two_layers(), PoolingType::None, true), input).unwrap();
        model.error(&batch(1, 16)).unwrap();
        assert!(model.parameters().iter().all(|p| p.grad().is_none()));
    }

    #[test]
    fn accepts_nchw_batches() {
        let input = InputShape::grayscale(5, 5);
        let model = ConvAutoencoder::new(config(two_layers(), PoolingType::None, true), input).unwrap();
        let x = Array::random(IxDyn(&[2, 1, 5, 5]), Uniform::new(0.0f32, 1.0));
        let flat = x.clone().into_shape_with_order(IxDyn(&[2, 25])).unwrap();
        let a = model.error(&x).unwrap();
        let b = model.error(&flat).unwrap();
        assert!((a - b).abs() < 1e-6);
    }

    #[test]
    fn rejects_mismatched_batches() {
        let input = InputShape::grayscale(28, 28);
        let model = ConvAutoencoder::new(config(two_layers(), PoolingType::None, true), input).unwrap();
        for shape in [vec![10, 783], vec![784], vec![2, 1, 28, 27], vec![2, 3, 28, 28], vec![0, 784]] {
            let bad = ArrayD::<f32>::zeros(IxDyn(&shape));
            assert!(matches!(model.forward(&bad), Err(CaeError::Shape(_))), "{:?}", shape);
        }
    }

    #[test]
    fn construction_fails_fast() {
        let input = InputShape::grayscale(28, 28);
        assert!(matches!(
            ConvAutoencoder::new(config(vec![], PoolingType::None, true), input),
            Err(CaeError::Configuration(_))
        ));
        assert!(matches!(
            ConvAutoencoder::new(config(vec![LayerSpec::new(3, 3, 0)], PoolingType::None, true), input),
            Err(CaeError::Configuration(_))
        ));
        assert!(matches!(
            ConvAutoencoder::new(config(two_layers(), PoolingType::None, true), InputShape::grayscale(0, 28)),
            Err(CaeError::Shape(_))
        ));
    }

    #[test]
    fn constant_init_gives_identical_filters() {
        let cfg = AutoencoderConfig {
            layers: vec![LayerSpec::new(2, 2, 3)],
            ..AutoencoderConfig::default()
        };
        let model = ConvAutoencoder::new(cfg, InputShape::grayscale(4, 4)).unwrap();
        let filters = model.filters();
        assert_eq!(filters[0].shape(), &[3, 1, 2, 2]);
        assert!(filters[0].iter().all(|&v| v == 1.0));
    }
}
