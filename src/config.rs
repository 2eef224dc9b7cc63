// src/config.rs
//
// Run configuration. Everything a run depends on lives in these structs and
// is fixed once a model or trainer has been built from them.
use crate::error::{CaeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolingType {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "max_pooling")]
    MaxPooling,
    #[serde(rename = "strided_conv")]
    StridedConv,
}

impl PoolingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolingType::None => "none",
            PoolingType::MaxPooling => "max_pooling",
            PoolingType::StridedConv => "strided_conv",
        }
    }

    /// Whether a layer with this pooling shrinks its spatial size.
    pub fn downsamples(&self) -> bool {
        !matches!(self, PoolingType::None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivationFunction {
    #[serde(rename = "sigmoid")]
    Sigmoid,
    #[serde(rename = "relu")]
    Relu,
    #[serde(rename = "leaky_relu")]
    LeakyRelu,
}

impl ActivationFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationFunction::Sigmoid => "sigmoid",
            ActivationFunction::Relu => "relu",
            ActivationFunction::LeakyRelu => "leaky_relu",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ErrorFunction {
    #[default]
    #[serde(rename = "cross-entropy")]
    CrossEntropy,
    #[serde(rename = "mean-squared-error")]
    MeanSquaredError,
}

impl ErrorFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorFunction::CrossEntropy => "cross-entropy",
            ErrorFunction::MeanSquaredError => "mean-squared-error",
        }
    }
}

macro_rules! impl_option_str {
    ($ty:ty, $what:literal, [$($name:literal => $variant:expr),+ $(,)?]) => {
        impl FromStr for $ty {
            type Err = CaeError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($name => Ok($variant),)+
                    other => Err(CaeError::config(format!(
                        concat!("unknown ", $what, " '{}' (expected one of: {})"),
                        other,
                        [$($name),+].join(", ")
                    ))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

impl_option_str!(PoolingType, "pooling_type", [
    "none" => PoolingType::None,
    "max_pooling" => PoolingType::MaxPooling,
    "strided_conv" => PoolingType::StridedConv,
]);

impl_option_str!(ActivationFunction, "activation_function", [
    "sigmoid" => ActivationFunction::Sigmoid,
    "relu" => ActivationFunction::Relu,
    "leaky_relu" => ActivationFunction::LeakyRelu,
]);

impl_option_str!(ErrorFunction, "error_function", [
    "cross-entropy" => ErrorFunction::CrossEntropy,
    "mean-squared-error" => ErrorFunction::MeanSquaredError,
]);

/// One encoder layer: filter size and number of output feature maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerSpec {
    pub filter_height: usize,
    pub filter_width: usize,
    pub channels: usize,
}

impl LayerSpec {
    pub fn new(filter_height: usize, filter_width: usize, channels: usize) -> Self {
        LayerSpec {
            filter_height,
            filter_width,
            channels,
        }
    }
}

/// Geometry of a single input image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl InputShape {
    pub fn grayscale(height: usize, width: usize) -> Self {
        InputShape {
            height,
            width,
            channels: 1,
        }
    }

    pub fn pixels(&self) -> usize {
        self.height * self.width * self.channels
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoencoderConfig {
    pub layers: Vec<LayerSpec>,
    pub pooling: PoolingType,
    /// Window and stride of max pooling, stride of strided convolutions.
    pub pooling_stride: usize,
    pub activation: ActivationFunction,
    /// Negative slope, only read for `leaky_relu`.
    pub relu_leak: f32,
    pub tie_weights: bool,
    pub weight_init_mean: f64,
    pub weight_init_stddev: f64,
    pub initial_bias: f64,
    #[serde(default)]
    pub error_function: ErrorFunction,
}

impl Default for AutoencoderConfig {
    fn default() -> Self {
        AutoencoderConfig {
            layers: vec![LayerSpec::new(1, 1, 1)],
            pooling: PoolingType::None,
            pooling_stride: 2,
            activation: ActivationFunction::Sigmoid,
            relu_leak: 0.2,
            tie_weights: true,
            weight_init_mean: 1.0,
            weight_init_stddev: 0.0,
            initial_bias: 0.0,
            error_function: ErrorFunction::CrossEntropy,
        }
    }
}

impl AutoencoderConfig {
    /// Zips parallel filter-size and channel lists into layer specs.
    pub fn layers_from_parts(
        filter_dims: &[(usize, usize)],
        hidden_channels: &[usize],
    ) -> Result<Vec<LayerSpec>> {
        if filter_dims.len() != hidden_channels.len() {
            return Err(CaeError::config(format!(
                "{} filter sizes but {} hidden channel counts",
                filter_dims.len(),
                hidden_channels.len()
            )));
        }
        Ok(filter_dims
            .iter()
            .zip(hidden_channels)
            .map(|(&(h, w), &c)| LayerSpec::new(h, w, c))
            .collect())
    }

    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(CaeError::config("at least one layer is required"));
        }
        for (i, l) in self.layers.iter().enumerate() {
            if l.filter_height == 0 || l.filter_width == 0 {
                return Err(CaeError::config(format!(
                    "layer {}: filter size {}x{} must be positive",
                    i, l.filter_height, l.filter_width
                )));
            }
            if l.channels == 0 {
                return Err(CaeError::config(format!("layer {}: channel count must be positive", i)));
            }
        }
        if self.pooling_stride == 0 {
            return Err(CaeError::config("pooling stride must be positive"));
        }
        if !self.weight_init_stddev.is_finite() || self.weight_init_stddev < 0.0 {
            return Err(CaeError::config(format!(
                "weight init stddev must be finite and >= 0, got {}",
                self.weight_init_stddev
            )));
        }
        if !self.weight_init_mean.is_finite() || !self.initial_bias.is_finite() {
            return Err(CaeError::config("weight init mean and bias must be finite"));
        }
        if self.activation == ActivationFunction::LeakyRelu && !self.relu_leak.is_finite() {
            return Err(CaeError::config("relu leak must be finite"));
        }
        Ok(())
    }

    /// Copy with the settings the chosen options never read reset, so two
    /// configs that build the same network compare equal.
    pub fn canonical(&self) -> AutoencoderConfig {
        let mut cfg = self.clone();
        if cfg.activation != ActivationFunction::LeakyRelu {
            cfg.relu_leak = 0.0;
        }
        if !cfg.pooling.downsamples() {
            cfg.pooling_stride = 1;
        }
        cfg
    }

    pub fn hidden_channels(&self) -> Vec<usize> {
        self.layers.iter().map(|l| l.channels).collect()
    }

    /// Stride applied by the convolution itself.
    pub fn conv_stride(&self) -> usize {
        match self.pooling {
            PoolingType::StridedConv => self.pooling_stride,
            _ => 1,
        }
    }

    /// Stride the decoder needs to undo one encoder layer.
    pub fn decoder_stride(&self) -> usize {
        if self.pooling.downsamples() {
            self.pooling_stride
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub max_iterations: usize,
    /// Report/checkpoint every this many iterations.
    pub chk_iterations: usize,
    pub step_size: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            batch_size: 100,
            max_iterations: 5,
            chk_iterations: 1,
            step_size: 0.0001,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(CaeError::config("batch size must be positive"));
        }
        if self.chk_iterations == 0 {
            return Err(CaeError::config("checkpoint interval must be positive"));
        }
        if !self.step_size.is_finite() || self.step_size <= 0.0 {
            return Err(CaeError::config(format!(
                "step size must be finite and positive, got {}",
                self.step_size
            )));
        }
        Ok(())
    }
}

/// Everything the binary needs for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub dataset_dir: PathBuf,
    pub weights_dir: PathBuf,
    pub log_dir: PathBuf,
    pub output_dir: PathBuf,
    pub folder_name: String,
    pub run_name: String,
    pub restore_if_exists: bool,
    pub visualize_images: usize,
    /// Draw the visualized images from the training split instead of test.
    #[serde(default)]
    pub use_training_set: bool,
    /// Also write the `cae_example<i>.png` filter panels.
    #[serde(default)]
    pub filter_panel: bool,
    /// Panels share one symmetric scale per row instead of per tile.
    #[serde(default)]
    pub common_scaling: bool,
    pub input: InputShape,
    pub autoencoder: AutoencoderConfig,
    pub training: TrainingConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            dataset_dir: PathBuf::from("MNIST_data"),
            weights_dir: PathBuf::from("models/cae/weights"),
            log_dir: PathBuf::from("logs"),
            output_dir: PathBuf::from("."),
            folder_name: "scaling_walkthrough".to_string(),
            run_name: "sigmoid_it_05".to_string(),
            restore_if_exists: false,
            visualize_images: 2,
            use_training_set: false,
            filter_panel: false,
            common_scaling: false,
            input: InputShape::grayscale(28, 28),
            autoencoder: AutoencoderConfig::default(),
            training: TrainingConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| CaeError::io(path, e))?;
        let cfg: RunConfig = serde_json::from_str(&json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.input.height == 0 || self.input.width == 0 || self.input.channels == 0 {
            return Err(CaeError::config(format!("degenerate input shape {:?}", self.input)));
        }
        self.autoencoder.validate()?;
        self.training.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_names_parse() {
        assert_eq!("max_pooling".parse::<PoolingType>().unwrap(), PoolingType::MaxPooling);
        assert_eq!("leaky_relu".parse::<ActivationFunction>().unwrap(), ActivationFunction::LeakyRelu);
        assert_eq!(
            "mean-squared-error".parse::<ErrorFunction>().unwrap(),
            ErrorFunction::MeanSquaredError
        );
        assert_eq!(PoolingType::StridedConv.to_string(), "strided_conv");
    }

    #[test]
    fn unknown_option_is_configuration_error() {
        let err = "avg_pooling".parse::<PoolingType>().unwrap_err();
        assert!(matches!(err, CaeError::Configuration(_)));
        let err = "tanh".parse::<ActivationFunction>().unwrap_err();
        assert!(err.to_string().contains("tanh"));
    }

    #[test]
    fn mismatched_layer_lists_rejected() {
        let err = AutoencoderConfig::layers_from_parts(&[(3, 3), (5, 5)], &[4]).unwrap_err();
        assert!(matches!(err, CaeError::Configuration(_)));
        let layers = AutoencoderConfig::layers_from_parts(&[(3, 3), (5, 5)], &[4, 8]).unwrap();
        assert_eq!(layers[1], LayerSpec::new(5, 5, 8));
    }

    #[test]
    fn validate_rejects_degenerate_layers() {
        let mut cfg = AutoencoderConfig::default();
        cfg.layers.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = AutoencoderConfig::default();
        cfg.layers[0].channels = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AutoencoderConfig::default();
        cfg.weight_init_stddev = -1.0;
        assert!(cfg.validate().is_err());

        assert!(AutoencoderConfig::default().validate().is_ok());
    }

    #[test]
    fn strides_follow_pooling() {
        let mut cfg = AutoencoderConfig::default();
        assert_eq!((cfg.conv_stride(), cfg.decoder_stride()), (1, 1));
        cfg.pooling = PoolingType::MaxPooling;
        assert_eq!((cfg.conv_stride(), cfg.decoder_stride()), (1, 2));
        cfg.pooling = PoolingType::StridedConv;
        assert_eq!((cfg.conv_stride(), cfg.decoder_stride()), (2, 2));
    }

    #[test]
    fn run_config_json_uses_option_names() {
        let json = serde_json::to_string(&RunConfig::default()).unwrap();
        assert!(json.contains("\"none\""));
        assert!(json.contains("\"sigmoid\""));
        let back: RunConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RunConfig::default());
    }

    #[test]
    fn visualization_switches_default_off() {
        let mut value = serde_json::to_value(RunConfig::default()).unwrap();
        let obj = value.as_object_mut().unwrap();
        for k in ["use_training_set", "filter_panel", "common_scaling"] {
            obj.remove(k);
        }
        let back: RunConfig = serde_json::from_value(value).unwrap();
        assert!(!back.use_training_set && !back.filter_panel && !back.common_scaling);
    }

    #[test]
    fn canonical_resets_unread_settings() {
        let a = AutoencoderConfig {
            relu_leak: 0.3,
            pooling_stride: 4,
            ..AutoencoderConfig::default()
        };
        assert_eq!(a.canonical(), AutoencoderConfig::default().canonical());

        let leaky = AutoencoderConfig {
            activation: ActivationFunction::LeakyRelu,
            pooling: PoolingType::MaxPooling,
            ..a.clone()
        };
        assert_eq!(leaky.canonical(), leaky);
    }
}
