//! Layer forward/backward primitives
//!
//! Every layer in this module follows the same contract: the forward
//! function computes the layer output plus a cache of intermediates, and
//! the paired backward function consumes the upstream gradient together
//! with that cache to recover exact gradients for every input.
//!
//! ```text
//! let (out, cache) = some_forward(&x, ...);
//! // ... downstream layers, loss ...
//! let grads = some_backward(&dout, &cache);
//! ```
//!
//! A cache belongs to exactly one backward call: the one paired with the
//! forward call that produced it. Caches are never reused or shared.

pub mod activation;
pub mod affine;
pub mod batch_norm;
pub mod blocks;
pub mod conv;
pub mod dropout;
pub mod layer_norm;
pub mod pool;
pub mod spatial_norm;

pub use activation::{relu_backward, relu_forward, ReluCache};
pub use affine::{affine_backward, affine_forward, AffineCache, AffineGradients};
pub use batch_norm::{
    batchnorm_backward, batchnorm_backward_alt, batchnorm_forward, BatchNormCache,
    BatchNormConfig, BatchNormGradients, BatchNormState,
};
pub use blocks::{
    affine_batchnorm_relu_forward, affine_layernorm_relu_forward, affine_norm_relu_backward,
    affine_relu_backward, affine_relu_forward, AffineNormReluCache, AffineNormReluGradients,
    AffineReluCache, NormCache,
};
pub use conv::{conv_backward_naive, conv_forward_naive, ConvCache, ConvConfig, ConvGradients};
pub use dropout::{dropout_backward, dropout_forward, DropoutCache, DropoutConfig};
pub use layer_norm::{
    layernorm_backward, layernorm_forward, LayerNormCache, LayerNormConfig, LayerNormGradients,
};
pub use pool::{max_pool_backward, max_pool_forward, MaxPoolCache, PoolConfig};
pub use spatial_norm::{
    spatial_batchnorm_backward, spatial_batchnorm_forward, spatial_groupnorm_backward,
    spatial_groupnorm_forward, GroupNormCache, GroupNormConfig, GroupNormGradients,
};

/// Train/test switch threaded into normalization and dropout calls.
///
/// In `Train` mode batch normalization uses batch statistics (and updates
/// its running averages) and dropout draws a fresh mask. In `Test` mode
/// batch normalization reads the stored running statistics and dropout is
/// the identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Train,
    Test,
}
