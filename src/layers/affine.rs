//! Affine Layer (Fully Connected)
//!
//! The affine layer is the fundamental building block of the classifiers
//! in this crate. It performs the transformation: y = x @ W + b
//!
//! ## Forward Pass
//!
//! ```text
//! Input:  x [N, d_1, ..., d_k]  (flattened per example to [N, D])
//! Weight: W [D, M]
//! Bias:   b [M]
//! Output: y = x_flat @ W + b  [N, M]
//! ```
//!
//! Inputs with more than two dimensions (images, say) are flattened
//! per example before the product and the gradient is reshaped back on
//! the way out, so callers never deal with the flat view themselves.
//!
//! ## Backward Pass
//!
//! Using the chain rule:
//! ```text
//! grad_W = x_flat^T @ grad_y
//! grad_b = sum(grad_y, axis=0)
//! grad_x = (grad_y @ W^T) reshaped to x's shape
//! ```
//!
//! ## Why These Gradients?
//!
//! - **grad_W**: Each weight W[i,j] affects output y[*,j] through input x[*,i]
//! - **grad_b**: Each bias b[j] affects all outputs y[*,j] equally
//! - **grad_x**: Needed to backprop to the previous layer

use crate::tensor::Tensor;

/// Cache produced by [`affine_forward`], consumed by [`affine_backward`].
///
/// Holds the original (unflattened) input together with the weights and
/// bias used in the forward call.
pub struct AffineCache {
    pub x: Tensor,
    pub w: Tensor,
    pub b: Tensor,
}

/// Gradients for the affine layer
pub struct AffineGradients {
    /// Gradient to pass to the previous layer, shaped like the input
    pub x: Tensor,
    pub weight: Tensor,
    pub bias: Tensor,
}

/// Forward pass for an affine layer
///
/// Flattens each example of `x` to a row of `D` features and computes
/// `x_flat @ w + b`.
///
/// # Arguments
///
/// * `x` - Input of shape `[N, d_1, ..., d_k]` with `d_1 * ... * d_k = D`
/// * `w` - Weights of shape `[D, M]`
/// * `b` - Bias of shape `[M]`
///
/// # Returns
///
/// Tuple of (output `[N, M]`, cache for the backward pass)
///
/// # Panics
///
/// Panics if the flattened feature count doesn't match the weight rows.
pub fn affine_forward(x: &Tensor, w: &Tensor, b: &Tensor) -> (Tensor, AffineCache) {
    let n = x.shape[0];
    let d: usize = x.shape[1..].iter().product();
    assert_eq!(
        d, w.shape[0],
        "affine: input features ({}) do not match weight rows ({})",
        d, w.shape[0]
    );

    let x_flat = x.reshape(&[n, d]);
    let out = x_flat.matmul(w).add(b);

    let cache = AffineCache {
        x: x.clone(),
        w: w.clone(),
        b: b.clone(),
    };
    (out, cache)
}

/// Backward pass for an affine layer
///
/// # Arguments
///
/// * `dout` - Upstream gradient of shape `[N, M]`
/// * `cache` - Cache from the paired forward call
pub fn affine_backward(dout: &Tensor, cache: &AffineCache) -> AffineGradients {
    let n = cache.x.shape[0];
    let d: usize = cache.x.shape[1..].iter().product();
    let m = dout.shape[1];
    let x_flat = cache.x.reshape(&[n, d]);

    // grad_b = sum of upstream rows
    let mut grad_bias = vec![0.0; m];
    for row in 0..n {
        for j in 0..m {
            grad_bias[j] += dout.data[row * m + j];
        }
    }

    // grad_W = x_flat^T @ dout
    let grad_weight = x_flat.transpose().matmul(dout);

    // grad_x = dout @ W^T, restored to the caller's input shape
    let grad_x = dout
        .matmul(&cache.w.transpose())
        .reshape(&cache.x.shape);

    AffineGradients {
        x: grad_x,
        weight: grad_weight,
        bias: Tensor::new(grad_bias, vec![m]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affine_forward_known_values() {
        // x: 2 examples of 2x2, flattened to 4 features
        let x = Tensor::new((0..8).map(|i| i as f64).collect(), vec![2, 2, 2]);
        let w = Tensor::ones(vec![4, 3]);
        let b = Tensor::new(vec![1.0, 2.0, 3.0], vec![3]);

        let (out, cache) = affine_forward(&x, &w, &b);
        assert_eq!(out.shape, vec![2, 3]);
        // First example sums 0+1+2+3 = 6 for each output, plus bias
        assert_eq!(&out.data[..3], &[7.0, 8.0, 9.0]);
        // Second example sums 4+5+6+7 = 22
        assert_eq!(&out.data[3..], &[23.0, 24.0, 25.0]);
        assert_eq!(cache.x.shape, vec![2, 2, 2]);
    }

    #[test]
    fn test_affine_backward_shapes() {
        let x = Tensor::new((0..12).map(|i| i as f64 * 0.1).collect(), vec![3, 2, 2]);
        let w = Tensor::ones(vec![4, 5]);
        let b = Tensor::zeros(vec![5]);
        let (out, cache) = affine_forward(&x, &w, &b);

        let dout = Tensor::ones(out.shape.clone());
        let grads = affine_backward(&dout, &cache);
        assert_eq!(grads.x.shape, vec![3, 2, 2]);
        assert_eq!(grads.weight.shape, vec![4, 5]);
        assert_eq!(grads.bias.shape, vec![5]);
        // db with all-ones upstream is the batch size per output
        assert!(grads.bias.data.iter().all(|&v| v == 3.0));
    }
}
