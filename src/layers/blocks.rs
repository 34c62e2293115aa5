//! Composite Layer Chains
//!
//! Named forward/backward pairs for the sandwiches the classifiers use:
//! affine followed by ReLU, optionally with a normalization layer in
//! between. Each forward chains the primitive layers and stashes their
//! caches in one struct; each backward unwinds the chain in reverse.
//!
//! The normalization variant is selected by which forward you call; the
//! shared cache carries a [`NormCache`] tag so a single backward can
//! dispatch to the matching primitive.
//!
//! These chains are training-time constructs: the batch-norm variant
//! always runs in training mode and always produces a cache. Inference
//! paths call the primitive layers directly and discard caches.

use crate::layers::affine::{affine_backward, affine_forward, AffineCache, AffineGradients};
use crate::layers::activation::{relu_backward, relu_forward, ReluCache};
use crate::layers::batch_norm::{
    batchnorm_backward, batchnorm_train_forward, BatchNormCache, BatchNormConfig, BatchNormState,
};
use crate::layers::layer_norm::{
    layernorm_backward, layernorm_forward, LayerNormCache, LayerNormConfig,
};
use crate::tensor::Tensor;

/// Cache for the affine -> ReLU chain.
pub struct AffineReluCache {
    pub fc: AffineCache,
    pub relu: ReluCache,
}

/// Which normalization ran inside an affine -> norm -> ReLU chain.
pub enum NormCache {
    Batch(BatchNormCache),
    Layer(LayerNormCache),
}

/// Cache for the affine -> norm -> ReLU chain.
pub struct AffineNormReluCache {
    pub fc: AffineCache,
    pub norm: NormCache,
    pub relu: ReluCache,
}

/// Gradients for the affine -> norm -> ReLU chain.
pub struct AffineNormReluGradients {
    pub x: Tensor,
    pub weight: Tensor,
    pub bias: Tensor,
    pub gamma: Tensor,
    pub beta: Tensor,
}

/// Affine transform followed by ReLU.
pub fn affine_relu_forward(x: &Tensor, w: &Tensor, b: &Tensor) -> (Tensor, AffineReluCache) {
    let (a, fc_cache) = affine_forward(x, w, b);
    let (out, relu_cache) = relu_forward(&a);
    (
        out,
        AffineReluCache {
            fc: fc_cache,
            relu: relu_cache,
        },
    )
}

/// Backward pass for the affine -> ReLU chain.
pub fn affine_relu_backward(dout: &Tensor, cache: &AffineReluCache) -> AffineGradients {
    let da = relu_backward(dout, &cache.relu);
    affine_backward(&da, &cache.fc)
}

/// Affine transform, batch normalization (training mode), then ReLU.
///
/// Updates `state`'s running statistics exactly as a direct
/// [`crate::layers::batchnorm_forward`] call would.
pub fn affine_batchnorm_relu_forward(
    x: &Tensor,
    w: &Tensor,
    b: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    config: &BatchNormConfig,
    state: &mut BatchNormState,
) -> (Tensor, AffineNormReluCache) {
    let (a, fc_cache) = affine_forward(x, w, b);
    let (normed, bn_cache) = batchnorm_train_forward(&a, gamma, beta, config, state);
    let (out, relu_cache) = relu_forward(&normed);
    (
        out,
        AffineNormReluCache {
            fc: fc_cache,
            norm: NormCache::Batch(bn_cache),
            relu: relu_cache,
        },
    )
}

/// Affine transform, layer normalization, then ReLU.
pub fn affine_layernorm_relu_forward(
    x: &Tensor,
    w: &Tensor,
    b: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    config: &LayerNormConfig,
) -> (Tensor, AffineNormReluCache) {
    let (a, fc_cache) = affine_forward(x, w, b);
    let (normed, ln_cache) = layernorm_forward(&a, gamma, beta, config);
    let (out, relu_cache) = relu_forward(&normed);
    (
        out,
        AffineNormReluCache {
            fc: fc_cache,
            norm: NormCache::Layer(ln_cache),
            relu: relu_cache,
        },
    )
}

/// Backward pass for either affine -> norm -> ReLU chain.
///
/// Dispatches on the cache's [`NormCache`] tag, so the caller does not
/// repeat the normalization choice at backward time.
pub fn affine_norm_relu_backward(
    dout: &Tensor,
    cache: &AffineNormReluCache,
) -> AffineNormReluGradients {
    let da = relu_backward(dout, &cache.relu);
    let (dnorm, grad_gamma, grad_beta) = match &cache.norm {
        NormCache::Batch(bn_cache) => {
            let g = batchnorm_backward(&da, bn_cache);
            (g.x, g.gamma, g.beta)
        }
        NormCache::Layer(ln_cache) => {
            let g = layernorm_backward(&da, ln_cache);
            (g.x, g.gamma, g.beta)
        }
    };
    let fc_grads = affine_backward(&dnorm, &cache.fc);

    AffineNormReluGradients {
        x: fc_grads.x,
        weight: fc_grads.weight,
        bias: fc_grads.bias,
        gamma: grad_gamma,
        beta: grad_beta,
    }
}
