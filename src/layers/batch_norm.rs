//! Batch Normalization
//!
//! Batch normalization normalizes each feature to zero mean and unit
//! variance across the batch, then applies learnable scale (gamma) and
//! shift (beta) parameters.
//!
//! ## Forward Pass (training)
//!
//! ```text
//! 1. mean[j] = E[x[:, j]]                       (over the batch axis)
//! 2. var[j]  = E[(x[:, j] - mean[j])^2]         (biased, divide by N)
//! 3. x_norm  = (x - mean) / sqrt(var + eps)
//! 4. y       = gamma * x_norm + beta
//! ```
//!
//! Training also maintains exponentially decaying running averages:
//!
//! ```text
//! running = momentum * running + (1 - momentum) * batch_stat
//! ```
//!
//! At test time the stored running statistics replace the batch
//! statistics, so single examples normalize deterministically.
//!
//! ## The Tricky Part: Backward Pass
//!
//! The mean and variance depend on every element in the batch column, so
//! each input receives gradient through three paths: directly through
//! x_norm, through the mean, and through the variance. Two equivalent
//! formulations are provided:
//!
//! - [`batchnorm_backward`] walks the computation graph stage by stage
//!   (dvar and dmean as explicit intermediates).
//! - [`batchnorm_backward_alt`] is the algebraically collapsed
//!   single-expression form.
//!
//! Both produce identical gradients; the staged form is easier to follow,
//! the collapsed form shows what the algebra simplifies to.

use crate::layers::Mode;
use crate::tensor::Tensor;

/// Hyperparameters for a batch normalization layer.
#[derive(Clone, Debug)]
pub struct BatchNormConfig {
    /// Small constant added to the variance for numerical stability
    pub eps: f64,
    /// Decay for the running statistics: `running = momentum * running +
    /// (1 - momentum) * batch`
    pub momentum: f64,
}

impl Default for BatchNormConfig {
    fn default() -> Self {
        Self {
            eps: 1e-5,
            momentum: 0.9,
        }
    }
}

/// Running statistics owned by the caller, one record per normalization
/// layer instance.
///
/// Zero-initialized on first use, updated in place by every train-mode
/// forward call and read (never written) by test-mode forward calls.
#[derive(Clone, Debug)]
pub struct BatchNormState {
    pub running_mean: Tensor,
    pub running_var: Tensor,
}

impl BatchNormState {
    /// Fresh state for a layer with `dim` features.
    pub fn new(dim: usize) -> Self {
        Self {
            running_mean: Tensor::zeros(vec![dim]),
            running_var: Tensor::zeros(vec![dim]),
        }
    }
}

/// Cache for the batch normalization backward pass.
///
/// Produced only by train-mode forward calls; test mode has no backward
/// path and produces no cache.
pub struct BatchNormCache {
    pub x: Tensor,
    pub mean: Vec<f64>,
    pub var: Vec<f64>,
    pub x_norm: Tensor,
    pub gamma: Tensor,
    pub eps: f64,
}

/// Gradients for batch normalization
pub struct BatchNormGradients {
    pub x: Tensor,
    pub gamma: Tensor,
    pub beta: Tensor,
}

/// Forward pass for batch normalization
///
/// Dispatches on `mode`: training computes batch statistics, updates the
/// running averages in `state` and returns a cache; test mode normalizes
/// with the stored running statistics, leaves `state` untouched, and
/// returns no cache.
///
/// # Arguments
///
/// * `x` - Input of shape `[N, D]`
/// * `gamma` - Scale parameter of shape `[D]`
/// * `beta` - Shift parameter of shape `[D]`
/// * `mode` - `Mode::Train` or `Mode::Test`
/// * `config` - Epsilon and running-average momentum
/// * `state` - The layer's running statistics record
///
/// # Returns
///
/// Tuple of (output `[N, D]`, `Some(cache)` in training, `None` at test
/// time)
pub fn batchnorm_forward(
    x: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    mode: Mode,
    config: &BatchNormConfig,
    state: &mut BatchNormState,
) -> (Tensor, Option<BatchNormCache>) {
    match mode {
        Mode::Train => {
            let (out, cache) = batchnorm_train_forward(x, gamma, beta, config, state);
            (out, Some(cache))
        }
        Mode::Test => (batchnorm_test_forward(x, gamma, beta, config, state), None),
    }
}

/// Training-time forward pass: batch statistics, running-average update,
/// cache for the backward pass.
pub(crate) fn batchnorm_train_forward(
    x: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    config: &BatchNormConfig,
    state: &mut BatchNormState,
) -> (Tensor, BatchNormCache) {
    let (n, d) = check_shapes(x, gamma, beta);
    assert_eq!(
        state.running_mean.len(),
        d,
        "batchnorm: state tracks {} features but input has {}",
        state.running_mean.len(),
        d
    );

    // Per-feature batch mean
    let mut mean = vec![0.0; d];
    for i in 0..n {
        for j in 0..d {
            mean[j] += x.data[i * d + j];
        }
    }
    for m in &mut mean {
        *m /= n as f64;
    }

    // Per-feature biased variance
    let mut var = vec![0.0; d];
    for i in 0..n {
        for j in 0..d {
            let diff = x.data[i * d + j] - mean[j];
            var[j] += diff * diff;
        }
    }
    for v in &mut var {
        *v /= n as f64;
    }

    let std: Vec<f64> = var.iter().map(|&v| (v + config.eps).sqrt()).collect();

    // Normalize, then scale and shift
    let mut x_norm = Tensor::zeros(x.shape.clone());
    let mut out = Tensor::zeros(x.shape.clone());
    for i in 0..n {
        for j in 0..d {
            let idx = i * d + j;
            x_norm.data[idx] = (x.data[idx] - mean[j]) / std[j];
            out.data[idx] = gamma.data[j] * x_norm.data[idx] + beta.data[j];
        }
    }

    // Exponential moving average of the batch statistics
    for j in 0..d {
        state.running_mean.data[j] =
            config.momentum * state.running_mean.data[j] + (1.0 - config.momentum) * mean[j];
        state.running_var.data[j] =
            config.momentum * state.running_var.data[j] + (1.0 - config.momentum) * var[j];
    }

    let cache = BatchNormCache {
        x: x.clone(),
        mean,
        var,
        x_norm,
        gamma: gamma.clone(),
        eps: config.eps,
    };
    (out, cache)
}

/// Test-time forward pass: normalize with the stored running statistics.
pub(crate) fn batchnorm_test_forward(
    x: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    config: &BatchNormConfig,
    state: &BatchNormState,
) -> Tensor {
    let (n, d) = check_shapes(x, gamma, beta);

    let mut out = Tensor::zeros(x.shape.clone());
    for i in 0..n {
        for j in 0..d {
            let idx = i * d + j;
            let x_norm = (x.data[idx] - state.running_mean.data[j])
                / (state.running_var.data[j] + config.eps).sqrt();
            out.data[idx] = gamma.data[j] * x_norm + beta.data[j];
        }
    }
    out
}

/// Backward pass for batch normalization, staged computation-graph form
///
/// Propagates the upstream gradient backward through the scale/shift,
/// the normalization, the variance and the mean as explicit stages:
///
/// ```text
/// dbeta   = sum(dout, axis=0)
/// dgamma  = sum(dout * x_norm, axis=0)
/// dx_norm = dout * gamma
/// dvar    = sum(dx_norm * (x - mean)) * -1/2 * (var + eps)^(-3/2)
/// dmean   = sum(dx_norm) * -1/sqrt(var + eps)
///           + dvar * -2 * mean(x - mean)
/// dx      = dx_norm / sqrt(var + eps)
///           + dvar * 2 (x - mean) / N
///           + dmean / N
/// ```
pub fn batchnorm_backward(dout: &Tensor, cache: &BatchNormCache) -> BatchNormGradients {
    let n = cache.x.shape[0];
    let d = cache.x.shape[1];
    let std: Vec<f64> = cache.var.iter().map(|&v| (v + cache.eps).sqrt()).collect();

    let mut grad_gamma = vec![0.0; d];
    let mut grad_beta = vec![0.0; d];
    for i in 0..n {
        for j in 0..d {
            let idx = i * d + j;
            grad_gamma[j] += dout.data[idx] * cache.x_norm.data[idx];
            grad_beta[j] += dout.data[idx];
        }
    }

    // dx_norm = dout * gamma
    let mut dx_norm = vec![0.0; n * d];
    for i in 0..n {
        for j in 0..d {
            let idx = i * d + j;
            dx_norm[idx] = dout.data[idx] * cache.gamma.data[j];
        }
    }

    // dvar = sum(dx_norm * (x - mean)) * -1/2 * (var + eps)^(-3/2)
    let mut dvar = vec![0.0; d];
    for i in 0..n {
        for j in 0..d {
            let idx = i * d + j;
            dvar[j] += dx_norm[idx] * (cache.x.data[idx] - cache.mean[j]);
        }
    }
    for j in 0..d {
        dvar[j] *= -0.5 / (std[j] * std[j] * std[j]);
    }

    // dmean: direct term plus the variance's dependence on the mean
    let mut dmean = vec![0.0; d];
    let mut mean_centered = vec![0.0; d];
    for i in 0..n {
        for j in 0..d {
            let idx = i * d + j;
            dmean[j] += dx_norm[idx] * (-1.0 / std[j]);
            mean_centered[j] += (cache.x.data[idx] - cache.mean[j]) / n as f64;
        }
    }
    for j in 0..d {
        dmean[j] += dvar[j] * -2.0 * mean_centered[j];
    }

    let mut grad_x = Tensor::zeros(cache.x.shape.clone());
    for i in 0..n {
        for j in 0..d {
            let idx = i * d + j;
            let centered = cache.x.data[idx] - cache.mean[j];
            grad_x.data[idx] = dx_norm[idx] / std[j]
                + dvar[j] * 2.0 * centered / n as f64
                + dmean[j] / n as f64;
        }
    }

    BatchNormGradients {
        x: grad_x,
        gamma: Tensor::new(grad_gamma, vec![d]),
        beta: Tensor::new(grad_beta, vec![d]),
    }
}

/// Backward pass for batch normalization, collapsed single-expression form
///
/// Algebraically equivalent to [`batchnorm_backward`]; after working the
/// partials through by hand the input gradient collapses to
///
/// ```text
/// dx = (dx_norm - mean(dx_norm) - x_norm * mean(dx_norm * x_norm))
///      / sqrt(var + eps)
/// ```
///
/// where the means are taken over the batch axis. Accepts the same cache.
pub fn batchnorm_backward_alt(dout: &Tensor, cache: &BatchNormCache) -> BatchNormGradients {
    let n = cache.x.shape[0];
    let d = cache.x.shape[1];
    let std: Vec<f64> = cache.var.iter().map(|&v| (v + cache.eps).sqrt()).collect();

    let mut grad_gamma = vec![0.0; d];
    let mut grad_beta = vec![0.0; d];
    for i in 0..n {
        for j in 0..d {
            let idx = i * d + j;
            grad_gamma[j] += dout.data[idx] * cache.x_norm.data[idx];
            grad_beta[j] += dout.data[idx];
        }
    }

    // Column means of dx_norm and dx_norm * x_norm
    let mut mean_dxn = vec![0.0; d];
    let mut mean_dxn_xn = vec![0.0; d];
    for i in 0..n {
        for j in 0..d {
            let idx = i * d + j;
            let dxn = dout.data[idx] * cache.gamma.data[j];
            mean_dxn[j] += dxn;
            mean_dxn_xn[j] += dxn * cache.x_norm.data[idx];
        }
    }
    for j in 0..d {
        mean_dxn[j] /= n as f64;
        mean_dxn_xn[j] /= n as f64;
    }

    let mut grad_x = Tensor::zeros(cache.x.shape.clone());
    for i in 0..n {
        for j in 0..d {
            let idx = i * d + j;
            let dxn = dout.data[idx] * cache.gamma.data[j];
            grad_x.data[idx] =
                (dxn - mean_dxn[j] - cache.x_norm.data[idx] * mean_dxn_xn[j]) / std[j];
        }
    }

    BatchNormGradients {
        x: grad_x,
        gamma: Tensor::new(grad_gamma, vec![d]),
        beta: Tensor::new(grad_beta, vec![d]),
    }
}

fn check_shapes(x: &Tensor, gamma: &Tensor, beta: &Tensor) -> (usize, usize) {
    assert_eq!(
        x.shape.len(),
        2,
        "batchnorm expects a [N, D] input, got {:?}",
        x.shape
    );
    let n = x.shape[0];
    let d = x.shape[1];
    assert_eq!(
        gamma.len(),
        d,
        "batchnorm: gamma has {} entries but input has {} features",
        gamma.len(),
        d
    );
    assert_eq!(
        beta.len(),
        d,
        "batchnorm: beta has {} entries but input has {} features",
        beta.len(),
        d
    );
    (n, d)
}
