use crate::gan::{Gan, GanConfig, sample_noise};
use crate::mnist::MnistData;
use crate::trainer::{FirstAndEvery, StepsPerEpoch, Trainer, TrainingConfig};
use crate::visualize::{SNAPSHOT_EXAMPLES, SNAPSHOT_GRID, plot_generated_images};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use ndarray_rand::rand::{SeedableRng, rngs::StdRng};
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

mod error;
mod gan;
mod loss;
mod mnist;
mod network;
mod optim;
mod trainer;
mod visualize;

/// Train a GAN to draw handwritten digits.
#[derive(Parser)]
#[command(name = "mnist-gan", version)]
struct Cli {
    /// Directory holding the gzipped MNIST IDX files
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Directory the snapshot PNGs are written to
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    #[arg(long, default_value_t = 400)]
    epochs: usize,

    #[arg(long, default_value_t = 256, value_parser = clap::value_parser!(u64).range(1..))]
    batch_size: u64,

    /// Render a snapshot after epoch 1 and every this many epochs
    #[arg(long, default_value_t = 20)]
    snapshot_every: usize,

    #[arg(long, value_enum, default_value_t = Steps::BatchSize)]
    steps_per_epoch: Steps,

    /// Seed for a reproducible run
    #[arg(long)]
    seed: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    verbosity: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum Steps {
    BatchSize,
    FullDataset,
}

impl From<Steps> for StepsPerEpoch {
    fn from(steps: Steps) -> Self {
        match steps {
            Steps::BatchSize => StepsPerEpoch::BatchSize,
            Steps::FullDataset => StepsPerEpoch::FullDataset,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbosity.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mnist_data = MnistData::load(&cli.data_dir)
        .with_context(|| format!("loading MNIST from {}", cli.data_dir.display()))?;
    info!(
        shape = ?mnist_data.train_images.dim(),
        labels = mnist_data.train_labels.len(),
        "training images"
    );

    let mut gan = Gan::new(&GanConfig::default(), &mut rng).context("building networks")?;
    info!(
        generator = gan.generator().parameter_count(),
        discriminator = gan.discriminator().parameter_count(),
        "built networks"
    );

    let trainer = Trainer::new(
        TrainingConfig {
            epochs: cli.epochs,
            batch_size: cli.batch_size as usize,
            steps_per_epoch: cli.steps_per_epoch.into(),
            ..TrainingConfig::default()
        },
        FirstAndEvery(cli.snapshot_every),
    );

    let output_dir = cli.output_dir;
    let history = trainer
        .train(
            &mut gan,
            &mnist_data.train_images,
            &mut rng,
            |epoch, gan, rng| {
                plot_generated_images(
                    epoch,
                    gan,
                    rng,
                    SNAPSHOT_EXAMPLES,
                    SNAPSHOT_GRID,
                    &output_dir,
                )
                .map(|_| ())
            },
        )
        .context("training")?;
    if let Some(last) = history.last() {
        info!(
            epoch = last.epoch,
            steps = last.steps,
            d_loss = last.discriminator_loss,
            g_loss = last.generator_loss,
            "final epoch"
        );
    }

    // How convinced the final discriminator is by the held-out digits.
    let verdicts = gan
        .discriminate(&mnist_data.test_images)
        .context("scoring test images")?;
    // And by fresh fakes, through the combined model.
    let noise = sample_noise(SNAPSHOT_EXAMPLES, gan.latent_dim(), &mut rng);
    let fake_verdicts = gan
        .adversarial()
        .predict(&noise)
        .context("scoring generated images")?;
    info!(
        generator_steps = gan.generator_optimizer().steps(),
        discriminator_steps = gan.discriminator_optimizer().steps(),
        test_images = mnist_data.test_labels.len(),
        mean_real_probability = verdicts.mean().unwrap_or(f64::NAN),
        mean_fake_probability = fake_verdicts.mean().unwrap_or(f64::NAN),
        "training finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_must_be_positive() {
        assert!(Cli::try_parse_from(["mnist-gan", "--batch-size", "0"]).is_err());

        let cli = Cli::try_parse_from(["mnist-gan", "--batch-size", "2"]).unwrap();
        assert_eq!(cli.batch_size, 2);
        assert_eq!(Cli::try_parse_from(["mnist-gan"]).unwrap().batch_size, 256);
    }
}
