//! Composite Classifiers
//!
//! Trainable models assembled from the layer primitives. Both follow the
//! same external contract: construction from a config struct, `predict`
//! for a test-mode forward pass returning raw class scores, and `loss`
//! for a training-mode forward plus backward pass returning the total
//! loss (data loss plus the L2 penalty `0.5 * reg * ||W||^2` per weight
//! matrix) and a gradient record per parameter.
//!
//! Parameters also have a name-keyed view (`param_map` / `set_param_map`,
//! keys `W1`, `b1`, `gamma1`, ...) used by the persistence collaborator
//! and by any external training driver.

pub mod fully_connected;
pub mod two_layer;

pub use fully_connected::{
    FullyConnectedConfig, FullyConnectedGradients, FullyConnectedNet, LayerGradients,
    LayerParams, Normalization, ParseNormalizationError,
};
pub use two_layer::{TwoLayerConfig, TwoLayerGradients, TwoLayerNet};

use std::collections::BTreeMap;
use std::io;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::tensor::Tensor;

/// RNG for initialization and dropout masks: deterministic when a seed is
/// configured, OS-seeded otherwise.
pub(crate) fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_os_rng(),
    }
}

/// Weight tensor drawn from N(0, scale^2).
pub(crate) fn gaussian_init(rng: &mut StdRng, scale: f64, shape: Vec<usize>) -> Tensor {
    let normal = Normal::new(0.0, scale).unwrap();
    let size: usize = shape.iter().product();
    let data: Vec<f64> = (0..size).map(|_| normal.sample(rng)).collect();
    Tensor::new(data, shape)
}

/// Add the L2 penalty gradient `reg * w` onto a data gradient.
pub(crate) fn apply_weight_decay(mut grad: Tensor, w: &Tensor, reg: f64) -> Tensor {
    for (g, wv) in grad.data.iter_mut().zip(&w.data) {
        *g += reg * wv;
    }
    grad
}

/// Pull one named parameter out of a checkpoint map, checking its shape.
pub(crate) fn take_param(
    map: &BTreeMap<String, Tensor>,
    key: &str,
    expected_shape: &[usize],
) -> io::Result<Tensor> {
    let tensor = map.get(key).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("checkpoint is missing parameter {key}"),
        )
    })?;
    if tensor.shape != expected_shape {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "checkpoint parameter {key} has shape {:?}, expected {:?}",
                tensor.shape, expected_shape
            ),
        ));
    }
    Ok(tensor.clone())
}
