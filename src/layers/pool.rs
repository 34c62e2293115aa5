//! Max Pooling
//!
//! Reduces each spatial window of a `[N, C, H, W]` tensor to its maximum.
//! The caller guarantees that the windows tile the input exactly:
//! `(H - pool_height)` and `(W - pool_width)` must both be divisible by
//! the stride.
//!
//! ## Backward Pass
//!
//! The gradient of a max routes entirely to the element that attained it.
//! Ties are broken by a fixed rule: the first maximum in row-major window
//! order wins (a strict `>` scan), matching the behavior of an argmax
//! over the flattened window. When strided windows overlap, contributions
//! to a shared input location accumulate.

use crate::tensor::Tensor;

/// Pooling hyperparameters.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub pool_height: usize,
    pub pool_width: usize,
    /// Distance between adjacent pooling windows
    pub stride: usize,
}

/// Cache for the max pooling backward pass.
pub struct MaxPoolCache {
    pub x: Tensor,
    pub config: PoolConfig,
}

/// Forward pass for max pooling
///
/// # Arguments
///
/// * `x` - Input of shape `[N, C, H, W]`
/// * `config` - Window size and stride
///
/// # Returns
///
/// Tuple of (output `[N, C, H', W']` with `H' = 1 + (H - pool_height) /
/// stride`, cache for the backward pass)
///
/// # Panics
///
/// Panics if the windows do not tile the input exactly.
pub fn max_pool_forward(x: &Tensor, config: &PoolConfig) -> (Tensor, MaxPoolCache) {
    assert_eq!(
        x.shape.len(),
        4,
        "max pool expects a [N, C, H, W] tensor, got {:?}",
        x.shape
    );
    let (n, c, h, w) = (x.shape[0], x.shape[1], x.shape[2], x.shape[3]);
    let ph = config.pool_height;
    let pw = config.pool_width;
    let stride = config.stride;
    assert!(
        h >= ph && (h - ph) % stride == 0,
        "max pool: height {} with window {} and stride {} leaves a partial window",
        h,
        ph,
        stride
    );
    assert!(
        w >= pw && (w - pw) % stride == 0,
        "max pool: width {} with window {} and stride {} leaves a partial window",
        w,
        pw,
        stride
    );

    let h_out = 1 + (h - ph) / stride;
    let w_out = 1 + (w - pw) / stride;

    let mut out = Tensor::zeros(vec![n, c, h_out, w_out]);
    for ni in 0..n {
        for ci in 0..c {
            for i in 0..h_out {
                for j in 0..w_out {
                    let h_start = i * stride;
                    let w_start = j * stride;
                    let mut best = f64::NEG_INFINITY;
                    for kh in 0..ph {
                        for kw in 0..pw {
                            let v =
                                x.data[((ni * c + ci) * h + h_start + kh) * w + w_start + kw];
                            if v > best {
                                best = v;
                            }
                        }
                    }
                    out.data[((ni * c + ci) * h_out + i) * w_out + j] = best;
                }
            }
        }
    }

    let cache = MaxPoolCache {
        x: x.clone(),
        config: config.clone(),
    };
    (out, cache)
}

/// Backward pass for max pooling
///
/// Each upstream value is added to the input location that won its
/// window (first maximum in row-major order on ties); all other window
/// positions receive zero.
pub fn max_pool_backward(dout: &Tensor, cache: &MaxPoolCache) -> Tensor {
    let (n, c, h, w) = (
        cache.x.shape[0],
        cache.x.shape[1],
        cache.x.shape[2],
        cache.x.shape[3],
    );
    let ph = cache.config.pool_height;
    let pw = cache.config.pool_width;
    let stride = cache.config.stride;
    let h_out = 1 + (h - ph) / stride;
    let w_out = 1 + (w - pw) / stride;

    let mut grad_x = Tensor::zeros(cache.x.shape.clone());
    for ni in 0..n {
        for ci in 0..c {
            for i in 0..h_out {
                for j in 0..w_out {
                    let h_start = i * stride;
                    let w_start = j * stride;

                    // Strict > keeps the first maximum on ties
                    let mut best = f64::NEG_INFINITY;
                    let mut best_kh = 0;
                    let mut best_kw = 0;
                    for kh in 0..ph {
                        for kw in 0..pw {
                            let v = cache.x.data
                                [((ni * c + ci) * h + h_start + kh) * w + w_start + kw];
                            if v > best {
                                best = v;
                                best_kh = kh;
                                best_kw = kw;
                            }
                        }
                    }

                    let g = dout.data[((ni * c + ci) * h_out + i) * w_out + j];
                    grad_x.data
                        [((ni * c + ci) * h + h_start + best_kh) * w + w_start + best_kw] += g;
                }
            }
        }
    }
    grad_x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_picks_window_max() {
        let x = Tensor::new(
            vec![1.0, 2.0, 5.0, 6.0, 3.0, 4.0, 7.0, 8.0, 9.0, 10.0, 13.0, 14.0, 11.0, 12.0, 15.0, 16.0],
            vec![1, 1, 4, 4],
        );
        let config = PoolConfig {
            pool_height: 2,
            pool_width: 2,
            stride: 2,
        };
        let (out, _) = max_pool_forward(&x, &config);
        assert_eq!(out.shape, vec![1, 1, 2, 2]);
        assert_eq!(out.data, vec![4.0, 8.0, 12.0, 16.0]);
    }

    #[test]
    fn test_backward_routes_to_first_max_on_ties() {
        // All equal values: the first element of each window wins.
        let x = Tensor::ones(vec![1, 1, 2, 2]);
        let config = PoolConfig {
            pool_height: 2,
            pool_width: 2,
            stride: 2,
        };
        let (_, cache) = max_pool_forward(&x, &config);
        let dout = Tensor::new(vec![3.0], vec![1, 1, 1, 1]);
        let dx = max_pool_backward(&dout, &cache);
        assert_eq!(dx.data, vec![3.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_backward_conserves_gradient_mass() {
        let x = Tensor::new((0..32).map(|i| ((i * 7) % 13) as f64).collect(), vec![1, 2, 4, 4]);
        let config = PoolConfig {
            pool_height: 2,
            pool_width: 2,
            stride: 2,
        };
        let (out, cache) = max_pool_forward(&x, &config);
        let dout = Tensor::new((0..out.len()).map(|i| i as f64 + 1.0).collect(), out.shape.clone());
        let dx = max_pool_backward(&dout, &cache);
        assert!((dx.sum() - dout.sum()).abs() < 1e-12);
    }

    #[test]
    #[should_panic(expected = "partial window")]
    fn test_partial_windows_rejected() {
        let x = Tensor::zeros(vec![1, 1, 5, 4]);
        let config = PoolConfig {
            pool_height: 2,
            pool_width: 2,
            stride: 2,
        };
        max_pool_forward(&x, &config);
    }
}
