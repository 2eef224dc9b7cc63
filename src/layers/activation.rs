use crate::autograd::Tensor;
use crate::config::ActivationFunction;
use crate::module::Module;
use ndarray::Zip;

// --- Sigmoid ---
pub struct Sigmoid;

impl Module for Sigmoid {
    fn forward(&self, input: Tensor) -> Tensor {
        let data = Zip::from(&*input.data_ref()).par_map_collect(|&x| 1.0 / (1.0 + (-x).exp()));

        let output_data = data.clone();
        let input_clone = input.clone();
        Tensor::from_op(data, vec![input], move |grad| {
            // grad * y * (1 - y)
            let grad_input = Zip::from(grad)
                .and(&output_data)
                .par_map_collect(|&g, &y| g * y * (1.0 - y));
            input_clone.add_grad(grad_input);
        })
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![]
    }
}

// --- ReLU / leaky ReLU ---
/// `max(x, leak * x)`; `leak == 0` is the plain ReLU.
pub struct LeakyReLU {
    pub leak: f32,
}

impl LeakyReLU {
    pub fn relu() -> Self {
        LeakyReLU { leak: 0.0 }
    }
}

impl Module for LeakyReLU {
    fn forward(&self, input: Tensor) -> Tensor {
        let leak = self.leak;
        let data = Zip::from(&*input.data_ref())
            .par_map_collect(|&x| if x > 0.0 { x } else { leak * x });

        let input_clone = input.clone();
        Tensor::from_op(data, vec![input], move |grad| {
            let x = input_clone.data_ref();
            let grad_input = Zip::from(grad)
                .and(&*x)
                .par_map_collect(|&g, &x| if x > 0.0 { g } else { leak * g });
            drop(x);
            input_clone.add_grad(grad_input);
        })
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![]
    }
}

pub fn activation_layer(function: ActivationFunction, relu_leak: f32) -> Box<dyn Module> {
    match function {
        ActivationFunction::Sigmoid => Box::new(Sigmoid),
        ActivationFunction::Relu => Box::new(LeakyReLU::relu()),
        ActivationFunction::LeakyRelu => Box::new(LeakyReLU { leak: relu_leak }),
    }
}
