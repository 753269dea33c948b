use crate::error::{GanError, Result};
use crate::gan::{Gan, sample_noise};
use image::{GrayImage, Luma};
use ndarray::Array2;
use ndarray_rand::rand::Rng;
use std::path::{Path, PathBuf};
use tracing::info;

pub const SNAPSHOT_EXAMPLES: usize = 100;
pub const SNAPSHOT_GRID: (usize, usize) = (10, 10);

pub fn snapshot_file_name(epoch: usize) -> String {
    format!("gan_generated_image {epoch}.png")
}

/// Map a generator output in [-1, 1] back to a grayscale intensity.
pub fn to_gray(value: f64) -> u8 {
    ((value.clamp(-1.0, 1.0) + 1.0) * 127.5).round() as u8
}

// Lay every row of `images` out as one square panel of a rows x cols grid, filled row by row.
// Panels touch each other directly; there are no axes, ticks or labels, only pixels.
pub fn render_grid(images: &Array2<f64>, (rows, cols): (usize, usize)) -> Result<GrayImage> {
    if images.nrows() != rows * cols || images.nrows() == 0 {
        return Err(GanError::InvalidGrid {
            examples: images.nrows(),
            rows,
            cols,
        });
    }

    let side = (images.ncols() as f64).sqrt().round() as usize;
    if side * side != images.ncols() {
        return Err(GanError::ShapeMismatch {
            context: "square image pixels",
            expected: side * side,
            found: images.ncols(),
        });
    }

    Ok(GrayImage::from_fn(
        (cols * side) as u32,
        (rows * side) as u32,
        |x, y| {
            let (x, y) = (x as usize, y as usize);
            let panel = (y / side) * cols + x / side;
            let pixel = (y % side) * side + x % side;
            Luma([to_gray(images[[panel, pixel]])])
        },
    ))
}

// Draw fresh noise, run the generator and write the resulting grid for this epoch.
pub fn plot_generated_images<R: Rng + ?Sized>(
    epoch: usize,
    gan: &Gan,
    rng: &mut R,
    examples: usize,
    dim: (usize, usize),
    output_dir: &Path,
) -> Result<PathBuf> {
    let noise = sample_noise(examples, gan.latent_dim(), rng);
    let generated_images = gan.generate(&noise)?;
    let grid = render_grid(&generated_images, dim)?;

    let path = output_dir.join(snapshot_file_name(epoch));
    grid.save(&path)?;
    info!(path = %path.display(), "saved generated images");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gan::tests::tiny_config;
    use ndarray_rand::rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn gray_levels_cover_the_tanh_range() {
        assert_eq!(to_gray(-1.0), 0);
        assert_eq!(to_gray(1.0), 255);
        assert_eq!(to_gray(0.0), 128);
        assert_eq!(to_gray(7.0), 255);
    }

    #[test]
    fn four_examples_make_exactly_four_panels() {
        // Four 28x28 images, each a single flat shade.
        let shades = [-1.0, -0.5, 0.5, 1.0];
        let images = Array2::from_shape_fn((4, 784), |(i, _j)| shades[i]);

        let grid = render_grid(&images, (2, 2)).unwrap();
        assert_eq!(grid.dimensions(), (56, 56));

        let panel = |x: u32, y: u32| grid.get_pixel(x, y).0[0];
        for (index, &shade) in shades.iter().enumerate() {
            let (x0, y0) = ((index % 2) as u32 * 28, (index / 2) as u32 * 28);
            let expected = to_gray(shade);
            assert!((0..28).all(|dy| (0..28).all(|dx| panel(x0 + dx, y0 + dy) == expected)));
        }
    }

    #[test]
    fn panels_keep_pixel_order() {
        let images = Array2::from_shape_fn((1, 4), |(_i, j)| if j == 1 { 1.0 } else { -1.0 });
        let grid = render_grid(&images, (1, 1)).unwrap();
        assert_eq!(grid.get_pixel(1, 0).0[0], 255);
        assert_eq!(grid.get_pixel(0, 1).0[0], 0);
    }

    #[test]
    fn example_count_must_fill_the_grid() {
        let images = Array2::zeros((5, 784));
        assert!(matches!(
            render_grid(&images, (2, 2)),
            Err(GanError::InvalidGrid {
                examples: 5,
                rows: 2,
                cols: 2
            })
        ));
    }

    #[test]
    fn images_must_be_square() {
        let images = Array2::zeros((1, 10));
        assert!(matches!(
            render_grid(&images, (1, 1)),
            Err(GanError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn writes_png_named_after_the_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let gan = Gan::new(&tiny_config(), &mut rng).unwrap();

        let path = plot_generated_images(20, &gan, &mut rng, 4, (2, 2), dir.path()).unwrap();

        assert_eq!(path, dir.path().join("gan_generated_image 20.png"));
        let written = image::open(&path).unwrap().to_luma8();
        assert_eq!(written.dimensions(), (6, 6));
    }
}
