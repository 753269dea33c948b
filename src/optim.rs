use crate::error::{GanError, Result};
use crate::network::{Gradients, Network};
use ndarray::{Array1, Array2, Dimension, Ix2, Zip};

/// Hyperparameters for [`Adam`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

impl Default for AdamConfig {
    // Shared by both players of the GAN.
    fn default() -> Self {
        Self {
            learning_rate: 0.0002,
            beta1: 0.5,
            beta2: 0.999,
            epsilon: 1e-7,
        }
    }
}

/// Adam optimizer state for exactly one network's parameters.
///
/// The moment buffers are shaped after the network handed to [`Adam::new`], so an optimizer can
/// only ever step the parameter group it was created for; stepping anything else is a shape error.
#[derive(Debug, Clone)]
pub struct Adam {
    config: AdamConfig,
    steps: u64,
    weight_moments: Vec<(Array2<f64>, Array2<f64>)>,
    bias_moments: Vec<(Array1<f64>, Array1<f64>)>,
}

impl Adam {
    pub fn new(config: AdamConfig, network: &Network) -> Adam {
        let zeros_like = |shape: Ix2| (Array2::zeros(shape), Array2::zeros(shape));
        Adam {
            config,
            steps: 0,
            weight_moments: network
                .layers()
                .iter()
                .map(|layer| zeros_like(layer.weights.raw_dim()))
                .collect(),
            bias_moments: network
                .layers()
                .iter()
                .map(|layer| (Array1::zeros(layer.outputs()), Array1::zeros(layer.outputs())))
                .collect(),
        }
    }

    /// Number of updates applied so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn step(&mut self, network: &mut Network, gradients: &Gradients) -> Result<()> {
        let layers = network.layers_mut();
        if layers.len() != self.weight_moments.len()
            || gradients.weights.len() != layers.len()
            || gradients.biases.len() != layers.len()
        {
            return Err(GanError::ShapeMismatch {
                context: "optimizer parameter group layers",
                expected: self.weight_moments.len(),
                found: gradients.weights.len(),
            });
        }

        let shapes = layers
            .iter()
            .zip(&self.weight_moments)
            .zip(&gradients.weights)
            .zip(&gradients.biases);
        for (((layer, (mw, _)), gw), gb) in shapes {
            check_dim(&mw.raw_dim(), &layer.weights.raw_dim())?;
            check_dim(&layer.weights.raw_dim(), &gw.raw_dim())?;
            check_dim(&layer.biases.raw_dim(), &gb.raw_dim())?;
        }

        self.steps += 1;
        let AdamConfig {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        } = self.config;
        let t = self.steps as i32;
        let step_size = learning_rate * (1.0 - beta2.powi(t)).sqrt() / (1.0 - beta1.powi(t));

        let moments = self.weight_moments.iter_mut().zip(self.bias_moments.iter_mut());
        let grads = gradients.weights.iter().zip(gradients.biases.iter());
        for ((layer, ((mw, vw), (mb, vb))), (gw, gb)) in
            layers.iter_mut().zip(moments).zip(grads)
        {
            Zip::from(&mut layer.weights)
                .and(mw)
                .and(vw)
                .and(gw)
                .for_each(|w, m, v, &g| update(w, m, v, g, beta1, beta2, step_size, epsilon));
            Zip::from(&mut layer.biases)
                .and(mb)
                .and(vb)
                .and(gb)
                .for_each(|w, m, v, &g| update(w, m, v, g, beta1, beta2, step_size, epsilon));
        }
        Ok(())
    }
}

fn check_dim<D: Dimension>(expected: &D, found: &D) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(GanError::ShapeMismatch {
            context: "gradient shape",
            expected: expected.size(),
            found: found.size(),
        })
    }
}

#[allow(clippy::too_many_arguments)]
#[inline]
fn update(
    w: &mut f64,
    m: &mut f64,
    v: &mut f64,
    g: f64,
    beta1: f64,
    beta2: f64,
    step_size: f64,
    epsilon: f64,
) {
    *m = beta1 * *m + (1.0 - beta1) * g;
    *v = beta2 * *v + (1.0 - beta2) * g * g;
    *w -= step_size * *m / (v.sqrt() + epsilon);
}
