use thiserror::Error;

/// Everything that can abort a training run.
#[derive(Error, Debug)]
pub enum GanError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{file}: expected magic number {expected}, found {found}")]
    InvalidMagic {
        file: String,
        expected: u32,
        found: u32,
    },

    #[error("{images} images but {labels} labels")]
    CountMismatch { images: usize, labels: usize },

    #[error("{file}: payload truncated, expected {expected} bytes, found {found}")]
    Truncated {
        file: String,
        expected: usize,
        found: usize,
    },

    #[error("{context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("cannot lay out {examples} panels on a {rows}x{cols} grid")]
    InvalidGrid {
        examples: usize,
        rows: usize,
        cols: usize,
    },

    #[error("cannot sample from an empty dataset")]
    EmptyDataset,
}

pub type Result<T> = std::result::Result<T, GanError>;
