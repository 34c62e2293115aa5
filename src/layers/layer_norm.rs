//! Layer Normalization
//!
//! Layer normalization applies the same whitening algebra as batch
//! normalization with the reduction axis swapped: statistics are computed
//! over the features of each individual example rather than over the
//! batch. Each example normalizes itself, so there are no running
//! statistics and no train/test distinction.
//!
//! ## Forward Pass
//!
//! ```text
//! 1. mean[i] = E[x[i, :]]                     (over the feature axis)
//! 2. var[i]  = E[(x[i, :] - mean[i])^2]       (biased, divide by D)
//! 3. x_norm  = (x - mean) / sqrt(var + eps)
//! 4. y       = gamma * x_norm + beta
//! ```
//!
//! ## Backward Pass
//!
//! Mirrors the staged batch-norm backward with the axis swapped: dvar and
//! dmean are per-example scalars and the divisor is the feature count D.
//! Gamma and beta are still per-feature, so their gradients sum over the
//! batch axis exactly as in batch norm.

use crate::tensor::Tensor;

/// Hyperparameters for a layer normalization layer.
#[derive(Clone, Debug)]
pub struct LayerNormConfig {
    /// Small constant added to the variance for numerical stability
    pub eps: f64,
}

impl Default for LayerNormConfig {
    fn default() -> Self {
        Self { eps: 1e-5 }
    }
}

/// Cache for the layer normalization backward pass.
pub struct LayerNormCache {
    pub x: Tensor,
    /// Per-example mean over the feature axis
    pub mean: Vec<f64>,
    /// Per-example biased variance over the feature axis
    pub var: Vec<f64>,
    pub x_norm: Tensor,
    pub gamma: Tensor,
    pub eps: f64,
}

/// Gradients for layer normalization
pub struct LayerNormGradients {
    pub x: Tensor,
    pub gamma: Tensor,
    pub beta: Tensor,
}

/// Forward pass for layer normalization
///
/// Behavior is identical in training and at test time, so no mode flag is
/// taken.
///
/// # Arguments
///
/// * `x` - Input of shape `[N, D]`
/// * `gamma` - Scale parameter of shape `[D]`
/// * `beta` - Shift parameter of shape `[D]`
/// * `config` - Epsilon
///
/// # Returns
///
/// Tuple of (output `[N, D]`, cache for the backward pass)
pub fn layernorm_forward(
    x: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    config: &LayerNormConfig,
) -> (Tensor, LayerNormCache) {
    assert_eq!(
        x.shape.len(),
        2,
        "layernorm expects a [N, D] input, got {:?}",
        x.shape
    );
    let n = x.shape[0];
    let d = x.shape[1];
    assert_eq!(
        gamma.len(),
        d,
        "layernorm: gamma has {} entries but input has {} features",
        gamma.len(),
        d
    );

    let mut mean = vec![0.0; n];
    let mut var = vec![0.0; n];
    for i in 0..n {
        let row = &x.data[i * d..(i + 1) * d];
        mean[i] = row.iter().sum::<f64>() / d as f64;
        var[i] = row.iter().map(|&v| (v - mean[i]) * (v - mean[i])).sum::<f64>() / d as f64;
    }

    let mut x_norm = Tensor::zeros(x.shape.clone());
    let mut out = Tensor::zeros(x.shape.clone());
    for i in 0..n {
        let std = (var[i] + config.eps).sqrt();
        for j in 0..d {
            let idx = i * d + j;
            x_norm.data[idx] = (x.data[idx] - mean[i]) / std;
            out.data[idx] = gamma.data[j] * x_norm.data[idx] + beta.data[j];
        }
    }

    let cache = LayerNormCache {
        x: x.clone(),
        mean,
        var,
        x_norm,
        gamma: gamma.clone(),
        eps: config.eps,
    };
    (out, cache)
}

/// Backward pass for layer normalization
///
/// The batch-norm staged backward with the reduction axis swapped:
///
/// ```text
/// dbeta   = sum(dout, axis=0)
/// dgamma  = sum(dout * x_norm, axis=0)
/// dx_norm = dout * gamma
/// dvar[i] = sum_j(dx_norm * (x - mean)) * -1/2 * (var + eps)^(-3/2)
/// dmean[i]= sum_j(dx_norm) * -1/sqrt(var + eps)
///           + dvar * -2 * mean_j(x - mean)
/// dx      = dx_norm / sqrt(var + eps)
///           + dvar * 2 (x - mean) / D
///           + dmean / D
/// ```
pub fn layernorm_backward(dout: &Tensor, cache: &LayerNormCache) -> LayerNormGradients {
    let n = cache.x.shape[0];
    let d = cache.x.shape[1];

    let mut grad_gamma = vec![0.0; d];
    let mut grad_beta = vec![0.0; d];
    for i in 0..n {
        for j in 0..d {
            let idx = i * d + j;
            grad_gamma[j] += dout.data[idx] * cache.x_norm.data[idx];
            grad_beta[j] += dout.data[idx];
        }
    }

    let mut grad_x = Tensor::zeros(cache.x.shape.clone());
    for i in 0..n {
        let std = (cache.var[i] + cache.eps).sqrt();

        // Per-example reductions over the feature axis
        let mut dvar = 0.0;
        let mut dmean = 0.0;
        let mut mean_centered = 0.0;
        for j in 0..d {
            let idx = i * d + j;
            let dxn = dout.data[idx] * cache.gamma.data[j];
            let centered = cache.x.data[idx] - cache.mean[i];
            dvar += dxn * centered;
            dmean += dxn * (-1.0 / std);
            mean_centered += centered / d as f64;
        }
        dvar *= -0.5 / (std * std * std);
        dmean += dvar * -2.0 * mean_centered;

        for j in 0..d {
            let idx = i * d + j;
            let dxn = dout.data[idx] * cache.gamma.data[j];
            let centered = cache.x.data[idx] - cache.mean[i];
            grad_x.data[idx] =
                dxn / std + dvar * 2.0 * centered / d as f64 + dmean / d as f64;
        }
    }

    LayerNormGradients {
        x: grad_x,
        gamma: Tensor::new(grad_gamma, vec![d]),
        beta: Tensor::new(grad_beta, vec![d]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layernorm_whitens_each_row() {
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0], vec![2, 4]);
        let gamma = Tensor::ones(vec![4]);
        let beta = Tensor::zeros(vec![4]);
        let (out, _) = layernorm_forward(&x, &gamma, &beta, &LayerNormConfig::default());

        for i in 0..2 {
            let row = &out.data[i * 4..(i + 1) * 4];
            let mean: f64 = row.iter().sum::<f64>() / 4.0;
            let var: f64 = row.iter().map(|&v| (v - mean) * (v - mean)).sum::<f64>() / 4.0;
            assert!(mean.abs() < 1e-10, "row {} mean {}", i, mean);
            assert!((var - 1.0).abs() < 1e-4, "row {} var {}", i, var);
        }
    }

    #[test]
    fn test_layernorm_independent_of_other_rows() {
        // Row statistics only involve that row, so changing one example
        // must not change the other's output.
        let gamma = Tensor::ones(vec![3]);
        let beta = Tensor::zeros(vec![3]);
        let config = LayerNormConfig::default();

        let a = Tensor::new(vec![1.0, 2.0, 3.0, 7.0, 8.0, 9.0], vec![2, 3]);
        let b = Tensor::new(vec![1.0, 2.0, 3.0, -50.0, 0.0, 50.0], vec![2, 3]);
        let (out_a, _) = layernorm_forward(&a, &gamma, &beta, &config);
        let (out_b, _) = layernorm_forward(&b, &gamma, &beta, &config);

        assert_eq!(&out_a.data[..3], &out_b.data[..3]);
    }
}
