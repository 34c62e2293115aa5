//! Activation Functions
//!
//! This module provides the ReLU activation and its derivative for
//! backpropagation.
//!
//! ## ReLU (Rectified Linear Unit)
//!
//! ```text
//! ReLU(x) = max(0, x)
//! ```
//!
//! The gradient is 1 where the input was strictly positive and 0
//! everywhere else. At exactly x = 0 the function is not differentiable;
//! this implementation picks the subgradient 0, so inputs at zero pass no
//! gradient.

use crate::tensor::Tensor;
use rayon::prelude::*;

/// Cache for the ReLU backward pass: the pre-activation input.
pub struct ReluCache {
    pub x: Tensor,
}

/// ReLU activation (forward pass)
///
/// # Arguments
///
/// * `x` - Input tensor of any shape
///
/// # Returns
///
/// Tuple of (elementwise `max(0, x)`, cache holding the pre-activation)
pub fn relu_forward(x: &Tensor) -> (Tensor, ReluCache) {
    let result: Vec<f64> = x.data.par_iter().map(|&val| val.max(0.0)).collect();
    let out = Tensor::new(result, x.shape.clone());
    (out, ReluCache { x: x.clone() })
}

/// ReLU derivative (backward pass)
///
/// Passes the upstream gradient through wherever the cached input was
/// strictly positive and zeroes it elsewhere.
///
/// # Arguments
///
/// * `dout` - Upstream gradient, same shape as the forward input
/// * `cache` - Cache from the paired forward call
pub fn relu_backward(dout: &Tensor, cache: &ReluCache) -> Tensor {
    let result: Vec<f64> = cache
        .x
        .data
        .par_iter()
        .zip(&dout.data)
        .map(|(&x_val, &grad)| if x_val > 0.0 { grad } else { 0.0 })
        .collect();
    Tensor::new(result, cache.x.shape.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relu_forward_clamps_negatives() {
        let x = Tensor::new(vec![-2.0, -0.5, 0.0, 0.5, 2.0], vec![5]);
        let (out, _) = relu_forward(&x);
        assert_eq!(out.data, vec![0.0, 0.0, 0.0, 0.5, 2.0]);
    }

    #[test]
    fn test_relu_backward_gates_gradient() {
        let x = Tensor::new(vec![-1.0, 0.0, 1.0], vec![3]);
        let (_, cache) = relu_forward(&x);
        let dout = Tensor::new(vec![5.0, 5.0, 5.0], vec![3]);
        let dx = relu_backward(&dout, &cache);
        // Zero input passes no gradient
        assert_eq!(dx.data, vec![0.0, 0.0, 5.0]);
    }
}
