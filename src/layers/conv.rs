//! Naive Convolution
//!
//! A direct sliding-window implementation of the 2D convolution layer,
//! written as explicit loop nests so every multiply-accumulate is visible.
//! There is no im2col/GEMM lowering and no FFT; the cost is the full
//! `O(N * F * H' * W' * C * HH * WW)`.
//!
//! ## Shapes
//!
//! ```text
//! Input:   x [N, C, H, W]
//! Filters: w [F, C, HH, WW]
//! Bias:    b [F]
//! Output:  y [N, F, H', W']
//!   H' = 1 + (H + 2*pad - HH) / stride
//!   W' = 1 + (W + 2*pad - WW) / stride
//! ```
//!
//! Padding places `pad` zeros symmetrically on both sides of the height
//! and width axes.
//!
//! ## Backward Pass
//!
//! Every output location contributes three gradients: the receptive field
//! times the upstream scalar into the filter gradient, the upstream
//! scalar itself into the bias gradient, and the filter weights times the
//! upstream scalar scattered back into the padded input gradient. The
//! padding border is stripped at the end.

use crate::tensor::Tensor;
use rayon::prelude::*;

/// Convolution hyperparameters.
#[derive(Clone, Debug)]
pub struct ConvConfig {
    /// Pixels between adjacent receptive fields, both axes
    pub stride: usize,
    /// Zeros added symmetrically to each side of the height and width axes
    pub pad: usize,
}

/// Cache for the convolution backward pass.
pub struct ConvCache {
    pub x: Tensor,
    pub w: Tensor,
    pub b: Tensor,
    pub config: ConvConfig,
}

/// Gradients for the convolution layer
pub struct ConvGradients {
    pub x: Tensor,
    pub weight: Tensor,
    pub bias: Tensor,
}

/// Zero-pad the spatial axes of a `[N, C, H, W]` tensor.
fn pad_spatial(x: &Tensor, pad: usize) -> Tensor {
    let (n, c, h, w) = dims4(x);
    let hp = h + 2 * pad;
    let wp = w + 2 * pad;
    let mut out = Tensor::zeros(vec![n, c, hp, wp]);
    for ni in 0..n {
        for ci in 0..c {
            for hi in 0..h {
                for wi in 0..w {
                    out.data[((ni * c + ci) * hp + hi + pad) * wp + wi + pad] =
                        x.data[((ni * c + ci) * h + hi) * w + wi];
                }
            }
        }
    }
    out
}

fn dims4(x: &Tensor) -> (usize, usize, usize, usize) {
    assert_eq!(
        x.shape.len(),
        4,
        "conv expects a [N, C, H, W] tensor, got {:?}",
        x.shape
    );
    (x.shape[0], x.shape[1], x.shape[2], x.shape[3])
}

/// Forward pass for the naive convolution
///
/// # Arguments
///
/// * `x` - Input of shape `[N, C, H, W]`
/// * `w` - Filters of shape `[F, C, HH, WW]`
/// * `b` - Per-filter bias of shape `[F]`
/// * `config` - Stride and padding
///
/// # Returns
///
/// Tuple of (output `[N, F, H', W']`, cache for the backward pass)
///
/// # Performance
///
/// Output planes (one per example/filter pair) are computed in parallel;
/// each plane's sums run in a fixed sequential order, so the result is
/// identical to a fully sequential evaluation.
pub fn conv_forward_naive(
    x: &Tensor,
    w: &Tensor,
    b: &Tensor,
    config: &ConvConfig,
) -> (Tensor, ConvCache) {
    let (n, c, h, w_in) = dims4(x);
    let (f, cf, hh, ww) = dims4(w);
    assert_eq!(
        c, cf,
        "conv: input has {} channels but filters expect {}",
        c, cf
    );
    assert_eq!(b.len(), f, "conv: {} filters but {} biases", f, b.len());

    let stride = config.stride;
    let pad = config.pad;
    assert!(
        h + 2 * pad >= hh && w_in + 2 * pad >= ww,
        "conv: filter {}x{} larger than padded input {}x{}",
        hh,
        ww,
        h + 2 * pad,
        w_in + 2 * pad
    );
    let h_out = 1 + (h + 2 * pad - hh) / stride;
    let w_out = 1 + (w_in + 2 * pad - ww) / stride;

    let x_padded = pad_spatial(x, pad);
    let hp = h + 2 * pad;
    let wp = w_in + 2 * pad;

    let mut out = Tensor::zeros(vec![n, f, h_out, w_out]);
    out.data
        .par_chunks_mut(h_out * w_out)
        .enumerate()
        .for_each(|(plane_idx, plane)| {
            let ni = plane_idx / f;
            let fi = plane_idx % f;
            for i in 0..h_out {
                for j in 0..w_out {
                    let h_start = i * stride;
                    let w_start = j * stride;
                    let mut sum = 0.0;
                    for ci in 0..c {
                        for kh in 0..hh {
                            for kw in 0..ww {
                                let xv = x_padded.data
                                    [((ni * c + ci) * hp + h_start + kh) * wp + w_start + kw];
                                let wv = w.data[((fi * c + ci) * hh + kh) * ww + kw];
                                sum += xv * wv;
                            }
                        }
                    }
                    plane[i * w_out + j] = sum + b.data[fi];
                }
            }
        });

    let cache = ConvCache {
        x: x.clone(),
        w: w.clone(),
        b: b.clone(),
        config: config.clone(),
    };
    (out, cache)
}

/// Backward pass for the naive convolution
///
/// # Arguments
///
/// * `dout` - Upstream gradient of shape `[N, F, H', W']`
/// * `cache` - Cache from the paired forward call
pub fn conv_backward_naive(dout: &Tensor, cache: &ConvCache) -> ConvGradients {
    let (n, c, h, w_in) = dims4(&cache.x);
    let (f, _, hh, ww) = dims4(&cache.w);
    let stride = cache.config.stride;
    let pad = cache.config.pad;
    let h_out = dout.shape[2];
    let w_out = dout.shape[3];

    let x_padded = pad_spatial(&cache.x, pad);
    let hp = h + 2 * pad;
    let wp = w_in + 2 * pad;

    let mut dx_padded = Tensor::zeros(vec![n, c, hp, wp]);
    let mut grad_weight = Tensor::zeros(cache.w.shape.clone());
    let mut grad_bias = vec![0.0; f];

    for ni in 0..n {
        for fi in 0..f {
            for i in 0..h_out {
                for j in 0..w_out {
                    let g = dout.data[((ni * f + fi) * h_out + i) * w_out + j];
                    let h_start = i * stride;
                    let w_start = j * stride;

                    grad_bias[fi] += g;
                    for ci in 0..c {
                        for kh in 0..hh {
                            for kw in 0..ww {
                                let x_idx =
                                    ((ni * c + ci) * hp + h_start + kh) * wp + w_start + kw;
                                let w_idx = ((fi * c + ci) * hh + kh) * ww + kw;
                                grad_weight.data[w_idx] += x_padded.data[x_idx] * g;
                                dx_padded.data[x_idx] += cache.w.data[w_idx] * g;
                            }
                        }
                    }
                }
            }
        }
    }

    // Strip the padding border (an interior copy, so pad = 0 works too)
    let mut grad_x = Tensor::zeros(cache.x.shape.clone());
    for ni in 0..n {
        for ci in 0..c {
            for hi in 0..h {
                for wi in 0..w_in {
                    grad_x.data[((ni * c + ci) * h + hi) * w_in + wi] =
                        dx_padded.data[((ni * c + ci) * hp + hi + pad) * wp + wi + pad];
                }
            }
        }
    }

    ConvGradients {
        x: grad_x,
        weight: grad_weight,
        bias: Tensor::new(grad_bias, vec![f]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_shape() {
        // 4x4 input, 3x3 filter, pad 1, stride 1 -> 4x4 output
        let x = Tensor::zeros(vec![2, 3, 4, 4]);
        let w = Tensor::zeros(vec![5, 3, 3, 3]);
        let b = Tensor::zeros(vec![5]);
        let (out, _) = conv_forward_naive(&x, &w, &b, &ConvConfig { stride: 1, pad: 1 });
        assert_eq!(out.shape, vec![2, 5, 4, 4]);
    }

    #[test]
    fn test_identity_filter() {
        // A 1x1 filter of weight 1 with no padding copies the input plane.
        let x = Tensor::new((0..9).map(|i| i as f64).collect(), vec![1, 1, 3, 3]);
        let w = Tensor::ones(vec![1, 1, 1, 1]);
        let b = Tensor::zeros(vec![1]);
        let (out, _) = conv_forward_naive(&x, &w, &b, &ConvConfig { stride: 1, pad: 0 });
        assert_eq!(out.data, x.data);
    }

    #[test]
    fn test_bias_reaches_every_position() {
        let x = Tensor::zeros(vec![1, 1, 3, 3]);
        let w = Tensor::ones(vec![2, 1, 3, 3]);
        let b = Tensor::new(vec![1.5, -2.5], vec![2]);
        let (out, _) = conv_forward_naive(&x, &w, &b, &ConvConfig { stride: 1, pad: 1 });
        assert!(out.data[..9].iter().all(|&v| v == 1.5));
        assert!(out.data[9..].iter().all(|&v| v == -2.5));
    }

    #[test]
    fn test_backward_bias_sums_upstream() {
        let x = Tensor::new((0..18).map(|i| i as f64 * 0.1).collect(), vec![1, 2, 3, 3]);
        let w = Tensor::ones(vec![1, 2, 2, 2]);
        let b = Tensor::zeros(vec![1]);
        let (out, cache) = conv_forward_naive(&x, &w, &b, &ConvConfig { stride: 1, pad: 0 });

        let dout = Tensor::ones(out.shape.clone());
        let grads = conv_backward_naive(&dout, &cache);
        assert_eq!(grads.bias.data[0], out.data.len() as f64);
        assert_eq!(grads.x.shape, x.shape);
        assert_eq!(grads.weight.shape, w.shape);
    }
}
