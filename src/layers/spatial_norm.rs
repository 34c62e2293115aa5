//! Spatial Normalization (Batch and Group)
//!
//! Two normalization schemes for 4D image tensors of shape `[N, C, H, W]`.
//!
//! ## Spatial batch normalization
//!
//! A pure shape adapter around plain batch normalization: the channel
//! axis becomes the feature axis and every (example, row, column)
//! position becomes a batch entry. The `[N, C, H, W]` input is permuted
//! and flattened to `[N*H*W, C]`, run through [`batchnorm_forward`], and
//! permuted back. No new math.
//!
//! ## Spatial group normalization
//!
//! Splits the C channels into G contiguous groups and whitens each
//! (example, group) block of `(C/G) * H * W` values independently, the
//! per-example flavor of the batch-norm algebra. Scale and shift stay
//! per-channel with broadcast shape `[1, C, 1, 1]`. Like layer norm,
//! group norm has no running state and no train/test distinction.

use crate::layers::batch_norm::{
    batchnorm_backward, batchnorm_forward, BatchNormCache, BatchNormConfig, BatchNormGradients,
    BatchNormState,
};
use crate::layers::Mode;
use crate::tensor::Tensor;

/// Hyperparameters for spatial group normalization.
#[derive(Clone, Debug)]
pub struct GroupNormConfig {
    /// Number of contiguous channel groups; must divide C
    pub groups: usize,
    /// Small constant added to the variance for numerical stability
    pub eps: f64,
}

impl GroupNormConfig {
    pub fn new(groups: usize) -> Self {
        Self { groups, eps: 1e-5 }
    }
}

/// Cache for the group normalization backward pass.
pub struct GroupNormCache {
    pub x: Tensor,
    /// Per-(example, group) mean, `N * G` entries
    pub mean: Vec<f64>,
    /// Per-(example, group) biased variance, `N * G` entries
    pub var: Vec<f64>,
    pub x_norm: Tensor,
    pub gamma: Tensor,
    pub groups: usize,
    pub eps: f64,
}

/// Gradients for group normalization; gamma and beta keep the broadcast
/// shape `[1, C, 1, 1]`.
pub struct GroupNormGradients {
    pub x: Tensor,
    pub gamma: Tensor,
    pub beta: Tensor,
}

/// Permute `[N, C, H, W]` to a `[N*H*W, C]` matrix with channels as
/// columns.
fn nchw_to_rows(x: &Tensor) -> Tensor {
    let (n, c, h, w) = dims4(x);
    let mut out = vec![0.0; n * c * h * w];
    for ni in 0..n {
        for ci in 0..c {
            for hi in 0..h {
                for wi in 0..w {
                    let src = ((ni * c + ci) * h + hi) * w + wi;
                    let row = (ni * h + hi) * w + wi;
                    out[row * c + ci] = x.data[src];
                }
            }
        }
    }
    Tensor::new(out, vec![n * h * w, c])
}

/// Inverse of [`nchw_to_rows`].
fn rows_to_nchw(rows: &Tensor, n: usize, c: usize, h: usize, w: usize) -> Tensor {
    let mut out = vec![0.0; n * c * h * w];
    for ni in 0..n {
        for ci in 0..c {
            for hi in 0..h {
                for wi in 0..w {
                    let dst = ((ni * c + ci) * h + hi) * w + wi;
                    let row = (ni * h + hi) * w + wi;
                    out[dst] = rows.data[row * c + ci];
                }
            }
        }
    }
    Tensor::new(out, vec![n, c, h, w])
}

fn dims4(x: &Tensor) -> (usize, usize, usize, usize) {
    assert_eq!(
        x.shape.len(),
        4,
        "spatial norm expects a [N, C, H, W] input, got {:?}",
        x.shape
    );
    (x.shape[0], x.shape[1], x.shape[2], x.shape[3])
}

/// Forward pass for spatial batch normalization
///
/// # Arguments
///
/// * `x` - Input of shape `[N, C, H, W]`
/// * `gamma` - Per-channel scale of shape `[C]`
/// * `beta` - Per-channel shift of shape `[C]`
/// * `mode`, `config`, `state` - As in [`batchnorm_forward`]
///
/// # Returns
///
/// Tuple of (output `[N, C, H, W]`, `Some(cache)` in training, `None` at
/// test time). The cache is the delegated batch-norm cache over the
/// flattened view and must go back through
/// [`spatial_batchnorm_backward`].
pub fn spatial_batchnorm_forward(
    x: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    mode: Mode,
    config: &BatchNormConfig,
    state: &mut BatchNormState,
) -> (Tensor, Option<BatchNormCache>) {
    let (n, c, h, w) = dims4(x);
    let rows = nchw_to_rows(x);
    let (out_rows, cache) = batchnorm_forward(&rows, gamma, beta, mode, config, state);
    (rows_to_nchw(&out_rows, n, c, h, w), cache)
}

/// Backward pass for spatial batch normalization
///
/// # Arguments
///
/// * `dout` - Upstream gradient of shape `[N, C, H, W]`
/// * `cache` - Cache from the paired [`spatial_batchnorm_forward`] call
pub fn spatial_batchnorm_backward(dout: &Tensor, cache: &BatchNormCache) -> BatchNormGradients {
    let (n, c, h, w) = dims4(dout);
    let dout_rows = nchw_to_rows(dout);
    let grads = batchnorm_backward(&dout_rows, cache);
    BatchNormGradients {
        x: rows_to_nchw(&grads.x, n, c, h, w),
        gamma: grads.gamma,
        beta: grads.beta,
    }
}

/// Forward pass for spatial group normalization
///
/// # Arguments
///
/// * `x` - Input of shape `[N, C, H, W]`
/// * `gamma` - Per-channel scale with `C` entries (broadcast `[1, C, 1, 1]`)
/// * `beta` - Per-channel shift with `C` entries
/// * `config` - Group count and epsilon
///
/// # Panics
///
/// Panics if the channel count is not divisible by the group count.
pub fn spatial_groupnorm_forward(
    x: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    config: &GroupNormConfig,
) -> (Tensor, GroupNormCache) {
    let (n, c, h, w) = dims4(x);
    let g = config.groups;
    assert!(
        g > 0 && c % g == 0,
        "groupnorm: {} channels are not divisible into {} groups",
        c,
        g
    );
    assert_eq!(
        gamma.len(),
        c,
        "groupnorm: gamma has {} entries but input has {} channels",
        gamma.len(),
        c
    );
    let cg = c / g;
    let group_size = (cg * h * w) as f64;

    let mut mean = vec![0.0; n * g];
    let mut var = vec![0.0; n * g];
    for ni in 0..n {
        for gi in 0..g {
            let mut sum = 0.0;
            for ci in gi * cg..(gi + 1) * cg {
                for hi in 0..h {
                    for wi in 0..w {
                        sum += x.data[((ni * c + ci) * h + hi) * w + wi];
                    }
                }
            }
            let m = sum / group_size;

            let mut sq = 0.0;
            for ci in gi * cg..(gi + 1) * cg {
                for hi in 0..h {
                    for wi in 0..w {
                        let diff = x.data[((ni * c + ci) * h + hi) * w + wi] - m;
                        sq += diff * diff;
                    }
                }
            }
            mean[ni * g + gi] = m;
            var[ni * g + gi] = sq / group_size;
        }
    }

    let mut x_norm = Tensor::zeros(x.shape.clone());
    let mut out = Tensor::zeros(x.shape.clone());
    for ni in 0..n {
        for ci in 0..c {
            let gi = ci / cg;
            let m = mean[ni * g + gi];
            let std = (var[ni * g + gi] + config.eps).sqrt();
            for hi in 0..h {
                for wi in 0..w {
                    let idx = ((ni * c + ci) * h + hi) * w + wi;
                    x_norm.data[idx] = (x.data[idx] - m) / std;
                    out.data[idx] = gamma.data[ci] * x_norm.data[idx] + beta.data[ci];
                }
            }
        }
    }

    let cache = GroupNormCache {
        x: x.clone(),
        mean,
        var,
        x_norm,
        gamma: gamma.clone(),
        groups: g,
        eps: config.eps,
    };
    (out, cache)
}

/// Backward pass for spatial group normalization
///
/// Reduces within exactly the (example, group) blocks the forward pass
/// normalized over. Gamma and beta gradients are per-channel sums over
/// the batch and spatial axes, returned with shape `[1, C, 1, 1]`.
pub fn spatial_groupnorm_backward(dout: &Tensor, cache: &GroupNormCache) -> GroupNormGradients {
    let (n, c, h, w) = dims4(&cache.x);
    let g = cache.groups;
    let cg = c / g;
    let group_size = (cg * h * w) as f64;

    // Per-channel parameter gradients
    let mut grad_gamma = vec![0.0; c];
    let mut grad_beta = vec![0.0; c];
    for ni in 0..n {
        for ci in 0..c {
            for hi in 0..h {
                for wi in 0..w {
                    let idx = ((ni * c + ci) * h + hi) * w + wi;
                    grad_gamma[ci] += dout.data[idx] * cache.x_norm.data[idx];
                    grad_beta[ci] += dout.data[idx];
                }
            }
        }
    }

    // Per-group dvar/dmean, then the three-path input gradient
    let mut grad_x = Tensor::zeros(cache.x.shape.clone());
    for ni in 0..n {
        for gi in 0..g {
            let m = cache.mean[ni * g + gi];
            let std = (cache.var[ni * g + gi] + cache.eps).sqrt();

            let mut dvar = 0.0;
            let mut dmean = 0.0;
            let mut mean_centered = 0.0;
            for ci in gi * cg..(gi + 1) * cg {
                for hi in 0..h {
                    for wi in 0..w {
                        let idx = ((ni * c + ci) * h + hi) * w + wi;
                        let dxn = dout.data[idx] * cache.gamma.data[ci];
                        let centered = cache.x.data[idx] - m;
                        dvar += dxn * centered;
                        dmean += dxn * (-1.0 / std);
                        mean_centered += centered / group_size;
                    }
                }
            }
            dvar *= -0.5 / (std * std * std);
            dmean += dvar * -2.0 * mean_centered;

            for ci in gi * cg..(gi + 1) * cg {
                for hi in 0..h {
                    for wi in 0..w {
                        let idx = ((ni * c + ci) * h + hi) * w + wi;
                        let dxn = dout.data[idx] * cache.gamma.data[ci];
                        let centered = cache.x.data[idx] - m;
                        grad_x.data[idx] = dxn / std
                            + dvar * 2.0 * centered / group_size
                            + dmean / group_size;
                    }
                }
            }
        }
    }

    GroupNormGradients {
        x: grad_x,
        gamma: Tensor::new(grad_gamma, vec![1, c, 1, 1]),
        beta: Tensor::new(grad_beta, vec![1, c, 1, 1]),
    }
}
