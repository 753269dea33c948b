use crate::error::{GanError, Result};
use ndarray::{Array2, Zip};

// Predictions are clamped away from 0 and 1 so the logarithms stay finite.
const EPSILON: f64 = 1e-7;

fn check_shapes(predictions: &Array2<f64>, targets: &Array2<f64>) -> Result<()> {
    if predictions.dim() == targets.dim() {
        Ok(())
    } else {
        Err(GanError::ShapeMismatch {
            context: "loss targets",
            expected: predictions.len(),
            found: targets.len(),
        })
    }
}

/// Mean binary cross-entropy between predicted probabilities and targets.
pub fn binary_cross_entropy(predictions: &Array2<f64>, targets: &Array2<f64>) -> Result<f64> {
    check_shapes(predictions, targets)?;

    let total = Zip::from(predictions)
        .and(targets)
        .fold(0.0, |sum, &p, &y| {
            let p = p.clamp(EPSILON, 1.0 - EPSILON);
            sum - (y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        });
    Ok(total / predictions.len() as f64)
}

/// Gradient of [`binary_cross_entropy`] with respect to each prediction.
pub fn binary_cross_entropy_gradient(
    predictions: &Array2<f64>,
    targets: &Array2<f64>,
) -> Result<Array2<f64>> {
    check_shapes(predictions, targets)?;

    let count = predictions.len() as f64;
    Ok(Zip::from(predictions).and(targets).map_collect(|&p, &y| {
        let p = p.clamp(EPSILON, 1.0 - EPSILON);
        (p - y) / (p * (1.0 - p)) / count
    }))
}
