//! Loss Functions
//!
//! Terminal layers mapping raw class scores and integer labels to a
//! scalar loss and the gradient of that loss with respect to the scores.
//! Both losses average over the batch, so the returned gradient already
//! carries the `1/N` factor the classifiers expect.
//!
//! Labels are a caller contract: each `y[i]` must satisfy `0 <= y[i] < C`.
//!
//! ## Softmax (cross-entropy)
//!
//! ```text
//! probs = exp(x - rowmax(x)) / sum(exp(x - rowmax(x)))
//! loss  = mean(-log(probs[i, y_i]))
//! dx    = (probs - one_hot(y)) / N
//! ```
//!
//! Subtracting the row maximum before exponentiating prevents overflow
//! without changing the result, since the shift cancels in the ratio.
//!
//! ## Multiclass hinge (SVM)
//!
//! ```text
//! margin[i, j] = max(0, x[i, j] - x[i, y_i] + 1)   for j != y_i
//! loss         = mean(sum_j(margin[i, j]))
//! dx[i, j]     = 1/N per violated margin
//! dx[i, y_i]   = -(number of violations)/N
//! ```

use crate::tensor::Tensor;

/// Softmax cross-entropy loss and gradient
///
/// # Arguments
///
/// * `x` - Raw class scores of shape `[N, C]`
/// * `y` - Integer labels, one per example
///
/// # Returns
///
/// Tuple of (mean loss, gradient of the loss with respect to `x`)
pub fn softmax_loss(x: &Tensor, y: &[usize]) -> (f64, Tensor) {
    assert_eq!(
        x.shape.len(),
        2,
        "softmax loss expects [N, C] scores, got {:?}",
        x.shape
    );
    let n = x.shape[0];
    let c = x.shape[1];
    assert_eq!(
        y.len(),
        n,
        "softmax loss: {} score rows but {} labels",
        n,
        y.len()
    );

    let mut total_loss = 0.0;
    let mut grad = Tensor::zeros(x.shape.clone());

    for (i, &label) in y.iter().enumerate() {
        let row = &x.data[i * c..(i + 1) * c];

        // Shift by the row max for numerical stability
        let max = row.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        let exp_vals: Vec<f64> = row.iter().map(|&v| (v - max).exp()).collect();
        let sum: f64 = exp_vals.iter().sum();

        let log_prob = (row[label] - max) - sum.ln();
        total_loss -= log_prob;

        for j in 0..c {
            let prob = exp_vals[j] / sum;
            let g = if j == label { prob - 1.0 } else { prob };
            grad.data[i * c + j] = g / n as f64;
        }
    }

    (total_loss / n as f64, grad)
}

/// Multiclass hinge (SVM) loss and gradient
///
/// # Arguments
///
/// * `x` - Raw class scores of shape `[N, C]`
/// * `y` - Integer labels, one per example
///
/// # Returns
///
/// Tuple of (mean loss, gradient of the loss with respect to `x`)
pub fn svm_loss(x: &Tensor, y: &[usize]) -> (f64, Tensor) {
    assert_eq!(
        x.shape.len(),
        2,
        "svm loss expects [N, C] scores, got {:?}",
        x.shape
    );
    let n = x.shape[0];
    let c = x.shape[1];
    assert_eq!(
        y.len(),
        n,
        "svm loss: {} score rows but {} labels",
        n,
        y.len()
    );

    let mut total_loss = 0.0;
    let mut grad = Tensor::zeros(x.shape.clone());

    for (i, &label) in y.iter().enumerate() {
        let row = &x.data[i * c..(i + 1) * c];
        let correct = row[label];

        let mut violations = 0usize;
        for j in 0..c {
            if j == label {
                continue;
            }
            let margin = row[j] - correct + 1.0;
            if margin > 0.0 {
                total_loss += margin;
                violations += 1;
                grad.data[i * c + j] = 1.0 / n as f64;
            }
        }
        grad.data[i * c + label] = -(violations as f64) / n as f64;
    }

    (total_loss / n as f64, grad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_uniform_scores() {
        // Equal scores give loss ln(C) and symmetric gradients.
        let x = Tensor::zeros(vec![2, 4]);
        let (loss, dx) = softmax_loss(&x, &[0, 3]);
        assert!((loss - (4.0f64).ln()).abs() < 1e-12);
        // Each row of dx sums to zero
        for i in 0..2 {
            let row_sum: f64 = dx.data[i * 4..(i + 1) * 4].iter().sum();
            assert!(row_sum.abs() < 1e-12);
        }
    }

    #[test]
    fn test_softmax_large_scores_stay_finite() {
        let x = Tensor::new(vec![1000.0, 999.0, 998.0], vec![1, 3]);
        let (loss, dx) = softmax_loss(&x, &[0]);
        assert!(loss.is_finite());
        assert!(dx.data.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_svm_no_loss_with_wide_margin() {
        let x = Tensor::new(vec![10.0, 0.0, 0.0, 10.0], vec![2, 2]);
        let (loss, dx) = svm_loss(&x, &[0, 1]);
        assert_eq!(loss, 0.0);
        assert!(dx.data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_svm_counts_violations() {
        // One example, correct class 0 at score 0, both others violate.
        let x = Tensor::new(vec![0.0, 0.5, 0.5], vec![1, 3]);
        let (loss, dx) = svm_loss(&x, &[0]);
        assert!((loss - 3.0).abs() < 1e-12); // (0.5 + 1) * 2
        assert_eq!(dx.data[0], -2.0);
        assert_eq!(dx.data[1], 1.0);
        assert_eq!(dx.data[2], 1.0);
    }
}
