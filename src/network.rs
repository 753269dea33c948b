use crate::error::{GanError, Result};
use ndarray::{Array, Array1, Array2, Axis, Zip};
use ndarray_rand::{RandomExt, rand::Rng, rand_distr::Uniform};

/// Elementwise nonlinearity applied after a dense layer's affine map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    /// `max(z, slope * z)`
    LeakyRelu(f64),
    Tanh,
    Sigmoid,
}

impl Activation {
    pub fn apply(self, z: f64) -> f64 {
        match self {
            Activation::LeakyRelu(slope) => {
                if z > 0.0 {
                    z
                } else {
                    slope * z
                }
            }
            Activation::Tanh => z.tanh(),
            Activation::Sigmoid => sigmoid(z),
        }
    }

    // Derivative with respect to the pre-activation z. Tanh and sigmoid are cheaper to
    // differentiate from their own output a, so both are passed in.
    fn derivative(self, z: f64, a: f64) -> f64 {
        match self {
            Activation::LeakyRelu(slope) => {
                if z > 0.0 {
                    1.0
                } else {
                    slope
                }
            }
            Activation::Tanh => 1.0 - a * a,
            Activation::Sigmoid => a * (1.0 - a),
        }
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + f64::exp(-z))
}

/// A fully connected layer. Weights are stored `[inputs x outputs]` so a batch with one sample per
/// row maps through it as `x.dot(w) + b`.
#[derive(Debug, Clone)]
pub struct Dense {
    pub weights: Array2<f64>,
    pub biases: Array1<f64>,
    pub activation: Activation,
    /// Probability of zeroing each unit of this layer's output while training.
    pub dropout: Option<f64>,
}

impl Dense {
    // Glorot-uniform weights and zero biases.
    pub fn new<R: Rng + ?Sized>(
        inputs: usize,
        outputs: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Dense {
        let limit = (6.0 / (inputs + outputs) as f64).sqrt();
        Dense {
            weights: Array::random_using((inputs, outputs), Uniform::new(-limit, limit), rng),
            biases: Array1::zeros(outputs),
            activation,
            dropout: None,
        }
    }

    pub fn inputs(&self) -> usize {
        self.weights.nrows()
    }

    pub fn outputs(&self) -> usize {
        self.weights.ncols()
    }
}

/// Everything a training-mode forward pass needs to remember for backpropagation.
pub struct Trace {
    inputs: Vec<Array2<f64>>,
    zs: Vec<Array2<f64>>,
    activations: Vec<Array2<f64>>,
    masks: Vec<Option<Array2<f64>>>,
    pub output: Array2<f64>,
}

/// Loss gradients for every weight and bias of a network, in layer order.
#[derive(Debug, Clone)]
pub struct Gradients {
    pub weights: Vec<Array2<f64>>,
    pub biases: Vec<Array1<f64>>,
}

#[derive(Debug, Clone)]
pub struct Network {
    layers: Vec<Dense>,
}

impl Network {
    pub fn new<R: Rng + ?Sized>(
        sizes: &[usize],
        hidden_activation: Activation,
        output_activation: Activation,
        rng: &mut R,
    ) -> Result<Network> {
        if sizes.len() < 2 {
            return Err(GanError::ShapeMismatch {
                context: "layer sizes (input and output at least)",
                expected: 2,
                found: sizes.len(),
            });
        }

        let last = sizes.len() - 2;
        let layers = sizes
            // For each size in sizes...
            .iter()
            // Paired with the following size in sizes...
            .zip(sizes.iter().skip(1))
            .enumerate()
            // Make a dense layer between them, with the output activation on the last one.
            .map(|(index, (&current_size, &next_size))| {
                let activation = if index == last {
                    output_activation
                } else {
                    hidden_activation
                };
                Dense::new(current_size, next_size, activation, rng)
            })
            .collect();

        Ok(Network { layers })
    }

    pub fn layers(&self) -> &[Dense] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Dense] {
        &mut self.layers
    }

    pub fn input_size(&self) -> usize {
        self.layers[0].inputs()
    }

    pub fn output_size(&self) -> usize {
        self.layers[self.layers.len() - 1].outputs()
    }

    pub fn parameter_count(&self) -> usize {
        self.layers
            .iter()
            .map(|layer| layer.weights.len() + layer.biases.len())
            .sum()
    }

    fn check_input(&self, input: &Array2<f64>) -> Result<()> {
        if input.ncols() == self.input_size() {
            Ok(())
        } else {
            Err(GanError::ShapeMismatch {
                context: "network input width",
                expected: self.input_size(),
                found: input.ncols(),
            })
        }
    }

    // Calculates the output for a batch with one sample per row. Dropout is inactive, so the same
    // input always gives the same output.
    pub fn feedforward(&self, input: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_input(input)?;

        let mut activation = input.to_owned();
        for layer in &self.layers {
            activation = activation.dot(&layer.weights) + &layer.biases;
            activation.mapv_inplace(|z| layer.activation.apply(z));
        }
        Ok(activation)
    }

    // Same as feedforward, but with dropout active and with every intermediate value kept for
    // backpropagate. The network itself is not touched, so a fixed network can still be run in
    // training mode while gradients flow through it to whatever produced its input.
    pub fn forward_train<R: Rng + ?Sized>(
        &self,
        input: &Array2<f64>,
        rng: &mut R,
    ) -> Result<Trace> {
        self.check_input(input)?;

        let count = self.layers.len();
        let mut inputs = Vec::with_capacity(count);
        let mut zs = Vec::with_capacity(count);
        let mut activations = Vec::with_capacity(count);
        let mut masks = Vec::with_capacity(count);

        let mut activation = input.to_owned();
        for layer in &self.layers {
            let z = activation.dot(&layer.weights) + &layer.biases;
            let a = z.mapv(|z| layer.activation.apply(z));

            // Inverted dropout: kept units are scaled up so inference needs no rescaling.
            let mask = layer.dropout.map(|p| {
                let keep_scale = 1.0 / (1.0 - p);
                Array::random_using(a.raw_dim(), Uniform::new(0.0, 1.0), rng)
                    .mapv(|u: f64| if u < p { 0.0 } else { keep_scale })
            });
            let next = match &mask {
                Some(mask) => &a * mask,
                None => a.clone(),
            };

            inputs.push(activation);
            zs.push(z);
            activations.push(a);
            masks.push(mask);
            activation = next;
        }

        Ok(Trace {
            inputs,
            zs,
            activations,
            masks,
            output: activation,
        })
    }

    // Given the gradient of the loss with respect to the network output, calculate the gradient
    // for every weight and bias, plus the gradient with respect to the network input (which is
    // what lets the generator learn from the discriminator's verdict).
    pub fn backpropagate(
        &self,
        trace: Trace,
        output_gradient: Array2<f64>,
    ) -> Result<(Gradients, Array2<f64>)> {
        if output_gradient.nrows() != trace.output.nrows() {
            return Err(GanError::ShapeMismatch {
                context: "output gradient rows",
                expected: trace.output.nrows(),
                found: output_gradient.nrows(),
            });
        }
        if output_gradient.ncols() != trace.output.ncols() {
            return Err(GanError::ShapeMismatch {
                context: "output gradient columns",
                expected: trace.output.ncols(),
                found: output_gradient.ncols(),
            });
        }

        let count = self.layers.len();
        let mut nabla_weights = Vec::with_capacity(count);
        let mut nabla_biases = Vec::with_capacity(count);

        let Trace {
            inputs,
            zs,
            activations,
            masks,
            ..
        } = trace;

        let mut delta = output_gradient;
        for ((((layer, input), z), a), mask) in self
            .layers
            .iter()
            .zip(inputs)
            .zip(zs)
            .zip(activations)
            .zip(masks)
            .rev()
        {
            if let Some(mask) = mask {
                delta *= &mask;
            }
            Zip::from(&mut delta)
                .and(&z)
                .and(&a)
                .for_each(|d, &z, &a| *d *= layer.activation.derivative(z, a));

            // Summing over the batch happens inside the dot product: every row of input pairs
            // with the same row of delta.
            nabla_weights.push(input.t().dot(&delta));
            nabla_biases.push(delta.sum_axis(Axis(0)));
            delta = delta.dot(&layer.weights.t());
        }

        nabla_weights.reverse();
        nabla_biases.reverse();

        Ok((
            Gradients {
                weights: nabla_weights,
                biases: nabla_biases,
            },
            delta,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use ndarray_rand::rand::{SeedableRng, rngs::StdRng};

    fn small_network(rng: &mut StdRng) -> Network {
        Network::new(&[3, 4, 2], Activation::Tanh, Activation::Sigmoid, rng).unwrap()
    }

    // Loss used for gradient checks: a fixed weighted sum of the outputs, so the output gradient
    // is just the weights.
    fn weighted_sum(output: &Array2<f64>, weights: &Array2<f64>) -> f64 {
        (output * weights).sum()
    }

    #[test]
    fn activations_match_their_definitions() {
        assert_abs_diff_eq!(Activation::LeakyRelu(0.2).apply(-2.0), -0.4);
        assert_abs_diff_eq!(Activation::LeakyRelu(0.2).apply(3.0), 3.0);
        assert_abs_diff_eq!(Activation::Sigmoid.apply(0.0), 0.5);
        assert_abs_diff_eq!(Activation::Tanh.apply(0.0), 0.0);
    }

    #[test]
    fn layers_chain_sizes() {
        let mut rng = StdRng::seed_from_u64(0);
        let network = Network::new(
            &[100, 256, 512, 1024, 784],
            Activation::LeakyRelu(0.2),
            Activation::Tanh,
            &mut rng,
        )
        .unwrap();
        assert_eq!(network.layers().len(), 4);
        assert_eq!(network.input_size(), 100);
        assert_eq!(network.output_size(), 784);
        assert_eq!(network.layers()[3].activation, Activation::Tanh);
        assert_eq!(network.layers()[0].activation, Activation::LeakyRelu(0.2));
        assert_eq!(
            network.parameter_count(),
            100 * 256 + 256 + 256 * 512 + 512 + 512 * 1024 + 1024 + 1024 * 784 + 784
        );
    }

    #[test]
    fn rejects_too_few_sizes_and_wrong_input_width() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(Network::new(&[4], Activation::Tanh, Activation::Tanh, &mut rng).is_err());

        let network = small_network(&mut rng);
        let err = network.feedforward(&Array2::zeros((2, 5))).unwrap_err();
        assert!(matches!(
            err,
            GanError::ShapeMismatch {
                expected: 3,
                found: 5,
                ..
            }
        ));
    }

    #[test]
    fn output_gradient_reports_the_mismatched_axis() {
        let mut rng = StdRng::seed_from_u64(5);
        let network = small_network(&mut rng);
        let input = Array2::zeros((2, 3));

        let trace = network.forward_train(&input, &mut rng).unwrap();
        let err = network
            .backpropagate(trace, Array2::zeros((2, 5)))
            .unwrap_err();
        assert!(matches!(
            err,
            GanError::ShapeMismatch {
                context: "output gradient columns",
                expected: 2,
                found: 5,
            }
        ));

        let trace = network.forward_train(&input, &mut rng).unwrap();
        let err = network
            .backpropagate(trace, Array2::zeros((3, 2)))
            .unwrap_err();
        assert!(matches!(
            err,
            GanError::ShapeMismatch {
                context: "output gradient rows",
                expected: 2,
                found: 3,
            }
        ));
    }

    #[test]
    fn train_and_inference_agree_without_dropout() {
        let mut rng = StdRng::seed_from_u64(1);
        let network = small_network(&mut rng);
        let input = array![[0.1, -0.2, 0.3], [1.0, 0.5, -0.5]];
        let trace = network.forward_train(&input, &mut rng).unwrap();
        let output = network.feedforward(&input).unwrap();
        for (a, b) in trace.output.iter().zip(output.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn dropout_zeroes_or_rescales_units() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut network = Network::new(
            &[2, 200, 1],
            Activation::LeakyRelu(0.2),
            Activation::Sigmoid,
            &mut rng,
        )
        .unwrap();
        network.layers_mut()[0].dropout = Some(0.3);

        let input = array![[0.5, -0.5]];
        let trace = network.forward_train(&input, &mut rng).unwrap();
        let mask = trace.masks[0].as_ref().unwrap();
        let dropped = mask.iter().filter(|&&m| m == 0.0).count();
        assert!(mask.iter().all(|&m| m == 0.0 || (m - 1.0 / 0.7).abs() < 1e-12));
        assert!(dropped > 20 && dropped < 100, "dropped {dropped} of 200");
        assert!(trace.masks[1].is_none());
    }

    #[test]
    fn gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(4);
        let network = small_network(&mut rng);
        let input = array![[0.3, -0.7, 0.2], [-0.1, 0.4, 0.9]];
        let loss_weights = array![[1.0, -2.0], [0.5, 1.5]];

        let trace = network.forward_train(&input, &mut rng).unwrap();
        let (gradients, input_gradient) =
            network.backpropagate(trace, loss_weights.clone()).unwrap();

        let h = 1e-6;
        for layer in 0..network.layers().len() {
            for ((i, j), &analytic) in gradients.weights[layer].indexed_iter() {
                let mut plus = network.clone();
                plus.layers_mut()[layer].weights[[i, j]] += h;
                let mut minus = network.clone();
                minus.layers_mut()[layer].weights[[i, j]] -= h;
                let numeric = (weighted_sum(&plus.feedforward(&input).unwrap(), &loss_weights)
                    - weighted_sum(&minus.feedforward(&input).unwrap(), &loss_weights))
                    / (2.0 * h);
                assert_abs_diff_eq!(analytic, numeric, epsilon = 1e-6);
            }
            for (j, &analytic) in gradients.biases[layer].indexed_iter() {
                let mut plus = network.clone();
                plus.layers_mut()[layer].biases[j] += h;
                let mut minus = network.clone();
                minus.layers_mut()[layer].biases[j] -= h;
                let numeric = (weighted_sum(&plus.feedforward(&input).unwrap(), &loss_weights)
                    - weighted_sum(&minus.feedforward(&input).unwrap(), &loss_weights))
                    / (2.0 * h);
                assert_abs_diff_eq!(analytic, numeric, epsilon = 1e-6);
            }
        }

        for ((i, j), &analytic) in input_gradient.indexed_iter() {
            let mut plus = input.clone();
            plus[[i, j]] += h;
            let mut minus = input.clone();
            minus[[i, j]] -= h;
            let numeric = (weighted_sum(&network.feedforward(&plus).unwrap(), &loss_weights)
                - weighted_sum(&network.feedforward(&minus).unwrap(), &loss_weights))
                / (2.0 * h);
            assert_abs_diff_eq!(analytic, numeric, epsilon = 1e-6);
        }
    }
}
