use crate::error::{GanError, Result};
use crate::loss::{binary_cross_entropy, binary_cross_entropy_gradient};
use crate::network::{Activation, Network};
use crate::optim::{Adam, AdamConfig};
use ndarray::{Array, Array2};
use ndarray_rand::{RandomExt, rand::Rng, rand_distr::StandardNormal};

/// Architecture and optimizer settings for both players.
#[derive(Debug, Clone, PartialEq)]
pub struct GanConfig {
    pub latent_dim: usize,
    pub image_dim: usize,
    pub generator_hidden: Vec<usize>,
    pub discriminator_hidden: Vec<usize>,
    pub leaky_slope: f64,
    /// Drop probability for the discriminator's regularised hidden layers.
    pub dropout: f64,
    /// How many of the discriminator's hidden layers, counted from the input, get dropout.
    pub dropout_layers: usize,
    pub generator_optimizer: AdamConfig,
    pub discriminator_optimizer: AdamConfig,
}

impl Default for GanConfig {
    fn default() -> Self {
        Self {
            latent_dim: 100,
            image_dim: 28 * 28,
            generator_hidden: vec![256, 512, 1024],
            discriminator_hidden: vec![1024, 512, 256],
            leaky_slope: 0.2,
            dropout: 0.3,
            dropout_layers: 2,
            generator_optimizer: AdamConfig::default(),
            discriminator_optimizer: AdamConfig::default(),
        }
    }
}

// latent -> hidden... -> image, leaky ReLU between layers and tanh at the end so outputs land in
// the same [-1, 1] range as the rescaled MNIST pixels.
pub fn build_generator<R: Rng + ?Sized>(config: &GanConfig, rng: &mut R) -> Result<Network> {
    let sizes = std::iter::once(config.latent_dim)
        .chain(config.generator_hidden.iter().copied())
        .chain(std::iter::once(config.image_dim))
        .collect::<Vec<_>>();
    Network::new(
        &sizes,
        Activation::LeakyRelu(config.leaky_slope),
        Activation::Tanh,
        rng,
    )
}

// image -> hidden... -> 1, leaky ReLU (plus dropout on the first few hidden layers) and a sigmoid
// at the end, giving the probability that the image is real.
pub fn build_discriminator<R: Rng + ?Sized>(config: &GanConfig, rng: &mut R) -> Result<Network> {
    let sizes = std::iter::once(config.image_dim)
        .chain(config.discriminator_hidden.iter().copied())
        .chain(std::iter::once(1))
        .collect::<Vec<_>>();
    let mut network = Network::new(
        &sizes,
        Activation::LeakyRelu(config.leaky_slope),
        Activation::Sigmoid,
        rng,
    )?;

    let hidden = network.layers().len() - 1;
    for layer in network
        .layers_mut()
        .iter_mut()
        .take(config.dropout_layers.min(hidden))
    {
        layer.dropout = Some(config.dropout);
    }
    Ok(network)
}

/// A `[batch_size x latent_dim]` matrix of standard-normal noise.
pub fn sample_noise<R: Rng + ?Sized>(
    batch_size: usize,
    latent_dim: usize,
    rng: &mut R,
) -> Array2<f64> {
    Array::random_using((batch_size, latent_dim), StandardNormal, rng)
}

/// Generator and discriminator, each paired with the one optimizer allowed to update it.
pub struct Gan {
    generator: Network,
    discriminator: Network,
    generator_optimizer: Adam,
    discriminator_optimizer: Adam,
}

impl Gan {
    pub fn new<R: Rng + ?Sized>(config: &GanConfig, rng: &mut R) -> Result<Gan> {
        let generator = build_generator(config, rng)?;
        let discriminator = build_discriminator(config, rng)?;

        if generator.output_size() != discriminator.input_size() {
            return Err(GanError::ShapeMismatch {
                context: "generator output feeding the discriminator",
                expected: discriminator.input_size(),
                found: generator.output_size(),
            });
        }

        Ok(Gan {
            generator_optimizer: Adam::new(config.generator_optimizer, &generator),
            discriminator_optimizer: Adam::new(config.discriminator_optimizer, &discriminator),
            generator,
            discriminator,
        })
    }

    pub fn generator(&self) -> &Network {
        &self.generator
    }

    pub fn discriminator(&self) -> &Network {
        &self.discriminator
    }

    pub fn discriminator_optimizer(&self) -> &Adam {
        &self.discriminator_optimizer
    }

    pub fn generator_optimizer(&self) -> &Adam {
        &self.generator_optimizer
    }

    pub fn latent_dim(&self) -> usize {
        self.generator.input_size()
    }

    /// Map a noise batch to images, one per row.
    pub fn generate(&self, noise: &Array2<f64>) -> Result<Array2<f64>> {
        self.generator.feedforward(noise)
    }

    /// Probability that each row of `images` is real, as a `[batch x 1]` column.
    pub fn discriminate(&self, images: &Array2<f64>) -> Result<Array2<f64>> {
        self.discriminator.feedforward(images)
    }

    /// One Adam step on the discriminator's own parameters. The generator is not involved.
    pub fn train_discriminator<R: Rng + ?Sized>(
        &mut self,
        images: &Array2<f64>,
        labels: &Array2<f64>,
        rng: &mut R,
    ) -> Result<f64> {
        let trace = self.discriminator.forward_train(images, rng)?;
        let loss = binary_cross_entropy(&trace.output, labels)?;
        let output_gradient = binary_cross_entropy_gradient(&trace.output, labels)?;
        let (gradients, _) = self.discriminator.backpropagate(trace, output_gradient)?;
        self.discriminator_optimizer.step(&mut self.discriminator, &gradients)?;
        Ok(loss)
    }

    /// The generator chained into a read-only discriminator.
    pub fn adversarial(&mut self) -> AdversarialModel<'_> {
        AdversarialModel {
            generator: &mut self.generator,
            optimizer: &mut self.generator_optimizer,
            discriminator: &self.discriminator,
        }
    }
}

/// Noise in, probability out. Only the generator is borrowed mutably, so training through this
/// model can never write the discriminator's weights or its optimizer's moments.
pub struct AdversarialModel<'a> {
    generator: &'a mut Network,
    optimizer: &'a mut Adam,
    discriminator: &'a Network,
}

impl AdversarialModel<'_> {
    pub fn predict(&self, noise: &Array2<f64>) -> Result<Array2<f64>> {
        self.discriminator.feedforward(&self.generator.feedforward(noise)?)
    }

    // The discriminator still runs in training mode (dropout on) but its own gradients are thrown
    // away; only the gradient with respect to its input is passed back into the generator.
    pub fn train_on_batch<R: Rng + ?Sized>(
        &mut self,
        noise: &Array2<f64>,
        targets: &Array2<f64>,
        rng: &mut R,
    ) -> Result<f64> {
        let generator_trace = self.generator.forward_train(noise, rng)?;
        let discriminator_trace = self.discriminator.forward_train(&generator_trace.output, rng)?;

        let loss = binary_cross_entropy(&discriminator_trace.output, targets)?;
        let output_gradient = binary_cross_entropy_gradient(&discriminator_trace.output, targets)?;

        let (_, image_gradient) = self
            .discriminator
            .backpropagate(discriminator_trace, output_gradient)?;
        let (gradients, _) = self.generator.backpropagate(generator_trace, image_gradient)?;
        self.optimizer.step(&mut *self.generator, &gradients)?;
        Ok(loss)
    }
}
