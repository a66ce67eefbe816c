//! Loss functions and per-epoch metrics.

use std::fmt;

use crate::error::{check_len, Result};
use crate::utils::argmax;

/// Measures how far an output is from its target.
pub trait Loss: fmt::Debug + Send {
    /// Returns the loss for one pattern.
    fn loss(&self, output: &[f64], target: &[f64]) -> Result<f64>;

    /// Returns the gradient of the loss with respect to `output`.
    fn gradient(&self, output: &[f64], target: &[f64]) -> Result<Vec<f64>>;
}

/// Half the summed squared error, `0.5 * Σ (y - t)²`, whose gradient is
/// simply `y - t`.
#[derive(Copy, Clone, Debug, Default)]
pub struct Mse;

impl Loss for Mse {
    fn loss(&self, output: &[f64], target: &[f64]) -> Result<f64> {
        check_len("loss target", target.len(), output.len())?;
        Ok(output
            .iter()
            .zip(target)
            .map(|(y, t)| 0.5 * (y - t) * (y - t))
            .sum())
    }

    fn gradient(&self, output: &[f64], target: &[f64]) -> Result<Vec<f64>> {
        check_len("loss target", target.len(), output.len())?;
        Ok(output.iter().zip(target).map(|(y, t)| y - t).collect())
    }
}

/// Returns true if `output` picks the same category as `target`.
///
/// With several outputs the largest one is the category; a single output is
/// read as a binary decision at 0.5.
pub fn is_correct(output: &[f64], target: &[f64]) -> bool {
    if output.len() == 1 && target.len() == 1 {
        return (output[0] >= 0.5) == (target[0] >= 0.5);
    }
    match (argmax(output), argmax(target)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Mean loss and accuracy over one pass of a pattern source.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Metrics {
    pub loss: f64,
    pub accuracy: f64,
    pub patterns: usize,
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "loss={:.6} accuracy={:.2}%",
            self.loss,
            100.0 * self.accuracy
        )
    }
}

/// Running sums for [`Metrics`].
#[derive(Clone, Debug, Default)]
pub(crate) struct MetricsAccumulator {
    loss: f64,
    correct: usize,
    patterns: usize,
}

impl MetricsAccumulator {
    pub(crate) fn record(&mut self, loss: f64, output: &[f64], target: &[f64]) {
        self.loss += loss;
        if is_correct(output, target) {
            self.correct += 1;
        }
        self.patterns += 1;
    }

    pub(crate) fn finish(&self) -> Metrics {
        if self.patterns == 0 {
            return Metrics::default();
        }
        let n = self.patterns as f64;
        Metrics {
            loss: self.loss / n,
            accuracy: self.correct as f64 / n,
            patterns: self.patterns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn mse_and_its_gradient() {
        let loss = Mse.loss(&[1.0, 0.0], &[0.0, 0.0]).unwrap();
        assert_eq!(loss, 0.5);
        assert_eq!(Mse.gradient(&[1.0, 0.5], &[0.0, 1.0]).unwrap(), vec![1.0, -0.5]);
        assert!(matches!(
            Mse.loss(&[1.0], &[1.0, 0.0]),
            Err(Error::Shape { .. })
        ));
    }

    #[test]
    fn correctness_by_category() {
        assert!(is_correct(&[0.2, 0.7, 0.1], &[0.0, 1.0, 0.0]));
        assert!(!is_correct(&[0.8, 0.7], &[0.0, 1.0]));
        assert!(is_correct(&[0.9], &[1.0]));
        assert!(!is_correct(&[0.4], &[1.0]));
    }

    #[test]
    fn accumulator_averages() {
        let mut acc = MetricsAccumulator::default();
        assert_eq!(acc.finish(), Metrics::default());
        acc.record(1.0, &[1.0, 0.0], &[1.0, 0.0]);
        acc.record(3.0, &[1.0, 0.0], &[0.0, 1.0]);
        let metrics = acc.finish();
        assert_eq!(metrics.loss, 2.0);
        assert_eq!(metrics.accuracy, 0.5);
        assert_eq!(metrics.patterns, 2);
    }
}
