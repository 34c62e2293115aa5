//! Dropout Layer (Inverted)
//!
//! Dropout is a regularization technique that randomly zeros activations
//! during training to prevent overfitting. This is the inverted variant:
//! kept activations are scaled by `1/p` so the expected magnitude of the
//! output matches the input, and test time becomes a plain identity.
//!
//! `p` is the probability of *keeping* an activation, not of dropping it.
//!
//! The random source is an explicit handle passed by the caller. Nothing
//! here touches process-wide RNG state, which keeps layers composable and
//! lets a caller reseed locally when a gradient check needs the same mask
//! across repeated forward passes.

use crate::layers::Mode;
use crate::tensor::Tensor;
use rand::Rng;

/// Dropout hyperparameters.
#[derive(Clone, Debug)]
pub struct DropoutConfig {
    /// Probability of keeping each activation, in (0, 1]. A value of 1
    /// keeps everything and makes the layer the identity.
    pub p: f64,
}

impl DropoutConfig {
    pub fn new(p: f64) -> Self {
        assert!(
            p > 0.0 && p <= 1.0,
            "dropout keep probability must be in (0, 1], got {}",
            p
        );
        Self { p }
    }
}

/// Cache for the dropout backward pass.
pub struct DropoutCache {
    /// Kept/dropped flag per element; `None` when the layer ran as the
    /// identity (test mode)
    pub mask: Option<Vec<bool>>,
    /// Scaling factor applied to kept values (1/p)
    pub scale: f64,
}

/// Forward pass for inverted dropout
///
/// In training mode, each element is independently kept with probability
/// `p` and scaled by `1/p`; the mask is stored in the cache so the paired
/// backward call applies the identical pattern. In test mode the input
/// passes through unchanged and no mask is stored.
///
/// # Arguments
///
/// * `x` - Input tensor of any shape
/// * `mode` - `Mode::Train` applies the mask, `Mode::Test` is the identity
/// * `config` - Keep probability
/// * `rng` - Caller-owned random source for the mask draw
pub fn dropout_forward(
    x: &Tensor,
    mode: Mode,
    config: &DropoutConfig,
    rng: &mut impl Rng,
) -> (Tensor, DropoutCache) {
    if mode == Mode::Test {
        let cache = DropoutCache {
            mask: None,
            scale: 1.0,
        };
        return (x.clone(), cache);
    }

    let scale = 1.0 / config.p;
    let mut mask = Vec::with_capacity(x.data.len());
    let mut output = Tensor::zeros(x.shape.clone());

    for i in 0..x.data.len() {
        let keep = rng.random::<f64>() < config.p;
        mask.push(keep);
        if keep {
            output.data[i] = x.data[i] * scale;
        }
    }

    let cache = DropoutCache {
        mask: Some(mask),
        scale,
    };
    (output, cache)
}

/// Backward pass for inverted dropout
///
/// Reapplies the stored mask and scale to the upstream gradient; without
/// a mask (test mode) the gradient passes through unchanged.
pub fn dropout_backward(dout: &Tensor, cache: &DropoutCache) -> Tensor {
    if let Some(mask) = &cache.mask {
        let mut grad_input = Tensor::zeros(dout.shape.clone());
        for (i, &keep) in mask.iter().enumerate() {
            if keep {
                grad_input.data[i] = dout.data[i] * cache.scale;
            }
            // else: gradient is zero (value was dropped)
        }
        grad_input
    } else {
        dout.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_keep_everything_is_identity() {
        let x = Tensor::new(vec![1.0, -2.0, 3.0], vec![3]);
        let mut rng = StdRng::seed_from_u64(0);
        let (out, cache) = dropout_forward(&x, Mode::Train, &DropoutConfig::new(1.0), &mut rng);
        assert_eq!(out.data, x.data);
        assert_eq!(cache.scale, 1.0);
    }

    #[test]
    fn test_test_mode_passes_through() {
        let x = Tensor::new(vec![1.0, -2.0, 3.0], vec![3]);
        let mut rng = StdRng::seed_from_u64(0);
        let (out, cache) = dropout_forward(&x, Mode::Test, &DropoutConfig::new(0.5), &mut rng);
        assert_eq!(out.data, x.data);
        assert!(cache.mask.is_none());
    }

    #[test]
    fn test_same_seed_same_mask() {
        let x = Tensor::new((0..64).map(|i| i as f64).collect(), vec![8, 8]);
        let config = DropoutConfig::new(0.6);

        let mut rng1 = StdRng::seed_from_u64(42);
        let (out1, cache1) = dropout_forward(&x, Mode::Train, &config, &mut rng1);
        let mut rng2 = StdRng::seed_from_u64(42);
        let (out2, cache2) = dropout_forward(&x, Mode::Train, &config, &mut rng2);

        assert_eq!(out1.data, out2.data);
        assert_eq!(cache1.mask, cache2.mask);
    }

    #[test]
    fn test_backward_reuses_mask() {
        let x = Tensor::new(vec![1.0; 100], vec![100]);
        let mut rng = StdRng::seed_from_u64(7);
        let (_, cache) = dropout_forward(&x, Mode::Train, &DropoutConfig::new(0.5), &mut rng);

        let dout = Tensor::new(vec![1.0; 100], vec![100]);
        let dx = dropout_backward(&dout, &cache);
        let mask = cache.mask.unwrap();
        for (i, &keep) in mask.iter().enumerate() {
            if keep {
                assert_eq!(dx.data[i], 2.0);
            } else {
                assert_eq!(dx.data[i], 0.0);
            }
        }
    }

    #[test]
    #[should_panic(expected = "keep probability")]
    fn test_zero_keep_probability_rejected() {
        DropoutConfig::new(0.0);
    }
}
