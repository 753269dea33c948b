use crate::error::{GanError, Result};
use flate2::read::GzDecoder;
use itertools::Itertools;
use ndarray::{Array2, Axis};
use ndarray_rand::rand::Rng;
use std::{fs::File, io::Read, path::Path};
use tracing::{debug, info};

const IMAGE_MAGIC: u32 = 2051;
const LABEL_MAGIC: u32 = 2049;

pub const TRAIN_IMAGES: &str = "train-images-idx3-ubyte.gz";
pub const TRAIN_LABELS: &str = "train-labels-idx1-ubyte.gz";
pub const TEST_IMAGES: &str = "t10k-images-idx3-ubyte.gz";
pub const TEST_LABELS: &str = "t10k-labels-idx1-ubyte.gz";

// The full MNIST corpus. Every row of an image matrix is one flattened 28x28 digit with its pixel
// intensities rescaled from 0..=255 to [-1, 1], which is the range the generator's tanh output
// layer produces. The labels are kept alongside the images even though adversarial training only
// ever looks at the training images.
pub struct MnistData {
    pub train_images: Array2<f64>,
    pub train_labels: Vec<u8>,
    pub test_images: Array2<f64>,
    pub test_labels: Vec<u8>,
}

impl MnistData {
    pub fn load(data_dir: impl AsRef<Path>) -> Result<MnistData> {
        let data_dir = data_dir.as_ref();
        info!(dir = %data_dir.display(), "loading MNIST");

        let (train_images, train_labels) = load_pair(data_dir, TRAIN_IMAGES, TRAIN_LABELS)?;
        let (test_images, test_labels) = load_pair(data_dir, TEST_IMAGES, TEST_LABELS)?;

        info!(
            train = ?train_images.dim(),
            test = ?test_images.dim(),
            "MNIST loaded"
        );

        Ok(MnistData {
            train_images,
            train_labels,
            test_images,
            test_labels,
        })
    }
}

fn load_pair(data_dir: &Path, images: &str, labels: &str) -> Result<(Array2<f64>, Vec<u8>)> {
    let image_matrix = parse_images(&read_bytes(&data_dir.join(images))?, images)?;
    let label_vec = parse_labels(&read_bytes(&data_dir.join(labels))?, labels)?;

    // There should be an equal number of images and labels. If not, the two files do not belong
    // together.
    if image_matrix.nrows() != label_vec.len() {
        return Err(GanError::CountMismatch {
            images: image_matrix.nrows(),
            labels: label_vec.len(),
        });
    }

    Ok((image_matrix, label_vec))
}

// Take a file path to gzipped MNIST data, and return the decompressed bytes.
fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    debug!(path = %path.display(), "reading");
    let file = File::open(path)?;
    let mut unzipped_file = GzDecoder::new(file);
    let mut bytes = Vec::new();
    unzipped_file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

// Read `words` big-endian 32-bit header words off the front of an IDX file.
fn header_words(bytes: &[u8], words: usize, file: &str) -> Result<impl Iterator<Item = u32>> {
    let header = bytes
        .get(..words * 4)
        .ok_or_else(|| truncated(file, words * 4, bytes.len()))?;
    Ok(header
        .chunks_exact(4)
        .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])))
}

// Check the magic number before requiring the rest of a `words` long header, and return the words
// after it.
fn check_header(bytes: &[u8], words: usize, file: &str, magic: u32) -> Result<Vec<u32>> {
    let found = header_words(bytes, 1, file)?
        .next()
        .ok_or_else(|| truncated(file, 4, bytes.len()))?;
    check_magic(file, magic, found)?;
    Ok(header_words(bytes, words, file)?.skip(1).collect())
}

fn check_magic(file: &str, expected: u32, found: u32) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(GanError::InvalidMagic {
            file: file.to_string(),
            expected,
            found,
        })
    }
}

// Decode the raw bytes of an IDX image file. The header is four 32-bit integers, which represent
// in order: the magic number (2051), the number of images, the number of rows per image, and the
// number of columns per image. Every image after that is rows*columns bytes, which become one
// rows*columns wide row of the returned matrix.
pub fn parse_images(bytes: &[u8], file: &str) -> Result<Array2<f64>> {
    let (images, rows, columns) = check_header(bytes, 4, file, IMAGE_MAGIC)?
        .into_iter()
        .map(|word| word as usize)
        .collect_tuple()
        .ok_or_else(|| truncated(file, 16, bytes.len()))?;

    // A corrupt header can claim far more pixels than fit in memory, or even in a usize.
    let pixels = rows.checked_mul(columns);
    let expected = pixels
        .and_then(|pixels| pixels.checked_mul(images))
        .and_then(|payload| payload.checked_add(16));
    let (pixels, expected) = match (pixels, expected) {
        (Some(pixels), Some(expected)) if expected <= bytes.len() => (pixels, expected),
        _ => return Err(truncated(file, expected.unwrap_or(usize::MAX), bytes.len())),
    };

    let scaled = bytes[16..expected]
        .iter()
        .map(|&value| scale_pixel(value))
        .collect();
    Ok(Array2::from_shape_vec((images, pixels), scaled)?)
}

// Decode the raw bytes of an IDX label file. These headers are just two 32-bit integers: the magic
// number (2049) and the number of labels. Each label is then a single byte.
pub fn parse_labels(bytes: &[u8], file: &str) -> Result<Vec<u8>> {
    let labels = check_header(bytes, 2, file, LABEL_MAGIC)?
        .into_iter()
        .exactly_one()
        .map_err(|_| truncated(file, 8, bytes.len()))? as usize;

    bytes
        .get(8..8 + labels)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| truncated(file, 8 + labels, bytes.len()))
}

fn truncated(file: &str, expected: usize, found: usize) -> GanError {
    GanError::Truncated {
        file: file.to_string(),
        expected,
        found,
    }
}

/// Map a raw 0..=255 intensity onto [-1, 1].
pub fn scale_pixel(value: u8) -> f64 {
    (value as f64 - 127.5) / 127.5
}

/// Pick `batch_size` rows uniformly at random, with replacement.
pub fn sample_batch<R: Rng + ?Sized>(
    images: &Array2<f64>,
    batch_size: usize,
    rng: &mut R,
) -> Result<Array2<f64>> {
    if images.nrows() == 0 {
        return Err(GanError::EmptyDataset);
    }
    let indices = (0..batch_size)
        .map(|_| rng.gen_range(0..images.nrows()))
        .collect::<Vec<_>>();
    Ok(images.select(Axis(0), &indices))
}
