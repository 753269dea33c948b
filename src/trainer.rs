use crate::error::Result;
use crate::gan::{Gan, sample_noise};
use crate::mnist::sample_batch;
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array2, ArrayView2, Axis, concatenate};
use ndarray_rand::rand::Rng;
use tracing::{debug, info, warn};

/// How many discriminator/generator step pairs make up one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepsPerEpoch {
    /// As many steps as there are samples in a batch. This is how the digit GAN has always been
    /// run, even though it does not cover the dataset once per epoch.
    #[default]
    BatchSize,
    /// `dataset_size / batch_size` steps.
    FullDataset,
}

impl StepsPerEpoch {
    pub fn steps(self, dataset_size: usize, batch_size: usize) -> usize {
        match self {
            StepsPerEpoch::BatchSize => batch_size,
            StepsPerEpoch::FullDataset => (dataset_size / batch_size.max(1)).max(1),
        }
    }
}

/// Decides after which epochs a snapshot of the generator's output is rendered.
pub trait SnapshotPolicy {
    fn should_snapshot(&self, epoch: usize) -> bool;
}

/// Snapshot after the first epoch and after every `n`th one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirstAndEvery(pub usize);

impl SnapshotPolicy for FirstAndEvery {
    fn should_snapshot(&self, epoch: usize) -> bool {
        epoch == 1 || (self.0 > 0 && epoch % self.0 == 0)
    }
}

impl<F: Fn(usize) -> bool> SnapshotPolicy for F {
    fn should_snapshot(&self, epoch: usize) -> bool {
        self(epoch)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Target for real images, kept below 1 so the discriminator never gets fully confident.
    pub real_label: f64,
    pub fake_label: f64,
    pub steps_per_epoch: StepsPerEpoch,
    pub show_progress: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 400,
            batch_size: 256,
            real_label: 0.9,
            fake_label: 0.0,
            steps_per_epoch: StepsPerEpoch::BatchSize,
            show_progress: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepLosses {
    pub discriminator: f64,
    pub generator: f64,
}

/// Mean losses over one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    pub steps: usize,
    pub discriminator_loss: f64,
    pub generator_loss: f64,
}

// Stack the real batch on top of the fake batch and label them accordingly: the first
// real.nrows() labels are real_label, the rest fake_label.
pub fn discriminator_batch<'a>(
    real: ArrayView2<'a, f64>,
    fake: ArrayView2<'a, f64>,
    real_label: f64,
    fake_label: f64,
) -> Result<(Array2<f64>, Array2<f64>)> {
    let images = concatenate(Axis(0), &[real, fake])?;
    let labels = Array2::from_shape_fn((images.nrows(), 1), |(i, _j)| {
        if i < real.nrows() {
            real_label
        } else {
            fake_label
        }
    });
    Ok((images, labels))
}

pub struct Trainer<P = FirstAndEvery> {
    config: TrainingConfig,
    policy: P,
}

impl<P: SnapshotPolicy> Trainer<P> {
    pub fn new(config: TrainingConfig, policy: P) -> Trainer<P> {
        Trainer { config, policy }
    }

    /// The labelled `[2 * batch_size x image_dim]` batch the discriminator is trained on: fresh
    /// generator output below a uniform draw of real images.
    pub fn real_and_fake_batch<R: Rng + ?Sized>(
        &self,
        gan: &Gan,
        images: &Array2<f64>,
        rng: &mut R,
    ) -> Result<(Array2<f64>, Array2<f64>)> {
        let batch_size = self.config.batch_size;
        let noise = sample_noise(batch_size, gan.latent_dim(), rng);
        let generated_images = gan.generate(&noise)?;
        let image_batch = sample_batch(images, batch_size, rng)?;

        discriminator_batch(
            image_batch.view(),
            generated_images.view(),
            self.config.real_label,
            self.config.fake_label,
        )
    }

    // One round of the adversarial game: a discriminator step on half real, half generated
    // images, then a generator step through the fixed discriminator with every target set to 1.
    pub fn train_step<R: Rng + ?Sized>(
        &self,
        gan: &mut Gan,
        images: &Array2<f64>,
        rng: &mut R,
    ) -> Result<StepLosses> {
        let batch_size = self.config.batch_size;

        let (batch, labels) = self.real_and_fake_batch(gan, images, rng)?;
        let discriminator = gan.train_discriminator(&batch, &labels, rng)?;

        let noise = sample_noise(batch_size, gan.latent_dim(), rng);
        let targets = Array2::ones((batch_size, 1));
        let generator = gan.adversarial().train_on_batch(&noise, &targets, rng)?;

        debug!(discriminator, generator, "step");
        Ok(StepLosses {
            discriminator,
            generator,
        })
    }

    // Run every epoch, calling on_snapshot whenever the policy asks for one. The callback gets
    // the rng so snapshots draw from the same reproducible stream as training.
    pub fn train<R, F>(
        &self,
        gan: &mut Gan,
        images: &Array2<f64>,
        rng: &mut R,
        mut on_snapshot: F,
    ) -> Result<Vec<EpochSummary>>
    where
        R: Rng + ?Sized,
        F: FnMut(usize, &Gan, &mut R) -> Result<()>,
    {
        let steps = self
            .config
            .steps_per_epoch
            .steps(images.nrows(), self.config.batch_size);
        info!(
            epochs = self.config.epochs,
            batch_size = self.config.batch_size,
            steps,
            "starting training"
        );

        let mut history = Vec::with_capacity(self.config.epochs);
        for epoch in 1..=self.config.epochs {
            info!("Epoch {epoch}");
            let progress = self.progress_bar(steps);

            let (mut discriminator_total, mut generator_total) = (0.0, 0.0);
            for _ in 0..steps {
                let losses = self.train_step(gan, images, rng)?;
                discriminator_total += losses.discriminator;
                generator_total += losses.generator;
                progress.inc(1);
            }
            progress.finish_and_clear();

            let summary = EpochSummary {
                epoch,
                steps,
                discriminator_loss: discriminator_total / steps.max(1) as f64,
                generator_loss: generator_total / steps.max(1) as f64,
            };
            if !summary.discriminator_loss.is_finite() || !summary.generator_loss.is_finite() {
                warn!(epoch, "loss is no longer finite");
            }
            info!(
                "Epoch {epoch}: d_loss = {:.4}, g_loss = {:.4}",
                summary.discriminator_loss, summary.generator_loss
            );
            history.push(summary);

            if self.policy.should_snapshot(epoch) {
                on_snapshot(epoch, &*gan, rng)?;
            }
        }

        Ok(history)
    }

    fn progress_bar(&self, steps: usize) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let progress = ProgressBar::new(steps as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({eta})")
        {
            progress.set_style(style.progress_chars("##-"));
        }
        progress
    }
}
