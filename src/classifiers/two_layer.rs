//! Two-Layer Network
//!
//! A fully-connected network with one hidden layer and a ReLU
//! nonlinearity, trained with the softmax loss:
//!
//! ```text
//! x -> affine -> ReLU -> affine -> softmax
//! ```
//!
//! The model holds its parameters and hyperparameters but runs no
//! optimization itself; an external training driver calls [`TwoLayerNet::loss`]
//! and applies the returned gradients however it likes.

use std::collections::BTreeMap;
use std::io;

use crate::checkpoint;
use crate::classifiers::{apply_weight_decay, gaussian_init, seeded_rng, take_param};
use crate::layers::{
    affine_backward, affine_forward, affine_relu_backward, affine_relu_forward,
};
use crate::loss::softmax_loss;
use crate::tensor::Tensor;

/// Construction options for [`TwoLayerNet`].
#[derive(Clone, Debug)]
pub struct TwoLayerConfig {
    pub input_dim: usize,
    pub hidden_dim: usize,
    pub num_classes: usize,
    /// Standard deviation of the Gaussian weight initialization
    pub weight_scale: f64,
    /// L2 regularization strength
    pub reg: f64,
    /// Seed for deterministic initialization
    pub seed: Option<u64>,
}

impl Default for TwoLayerConfig {
    fn default() -> Self {
        Self {
            input_dim: 3 * 32 * 32,
            hidden_dim: 100,
            num_classes: 10,
            weight_scale: 1e-3,
            reg: 0.0,
            seed: None,
        }
    }
}

/// Gradients for every parameter of the two-layer net.
pub struct TwoLayerGradients {
    pub w1: Tensor,
    pub b1: Tensor,
    pub w2: Tensor,
    pub b2: Tensor,
}

/// Two-layer fully-connected classifier.
///
/// Weights are initialized from N(0, weight_scale^2) and biases to zero.
pub struct TwoLayerNet {
    w1: Tensor,
    b1: Tensor,
    w2: Tensor,
    b2: Tensor,
    reg: f64,
}

impl TwoLayerNet {
    pub fn new(config: &TwoLayerConfig) -> Self {
        let mut rng = seeded_rng(config.seed);
        Self {
            w1: gaussian_init(
                &mut rng,
                config.weight_scale,
                vec![config.input_dim, config.hidden_dim],
            ),
            b1: Tensor::zeros(vec![config.hidden_dim]),
            w2: gaussian_init(
                &mut rng,
                config.weight_scale,
                vec![config.hidden_dim, config.num_classes],
            ),
            b2: Tensor::zeros(vec![config.num_classes]),
            reg: config.reg,
        }
    }

    /// Test-mode forward pass: raw class scores of shape `[N, C]`.
    pub fn predict(&self, x: &Tensor) -> Tensor {
        let (hidden, _) = affine_relu_forward(x, &self.w1, &self.b1);
        let (scores, _) = affine_forward(&hidden, &self.w2, &self.b2);
        scores
    }

    /// Training-mode forward and backward pass.
    ///
    /// Returns the total loss (softmax data loss plus
    /// `0.5 * reg * (||W1||^2 + ||W2||^2)`) and the gradient of that loss
    /// with respect to every parameter. The regularization gradient
    /// `reg * W` lands on the weights only, never on the biases.
    pub fn loss(&self, x: &Tensor, y: &[usize]) -> (f64, TwoLayerGradients) {
        let (hidden, hidden_cache) = affine_relu_forward(x, &self.w1, &self.b1);
        let (scores, score_cache) = affine_forward(&hidden, &self.w2, &self.b2);

        let (data_loss, dscores) = softmax_loss(&scores, y);
        let total_loss =
            data_loss + 0.5 * self.reg * (self.w1.sum_squares() + self.w2.sum_squares());

        let g2 = affine_backward(&dscores, &score_cache);
        let g1 = affine_relu_backward(&g2.x, &hidden_cache);

        let grads = TwoLayerGradients {
            w1: apply_weight_decay(g1.weight, &self.w1, self.reg),
            b1: g1.bias,
            w2: apply_weight_decay(g2.weight, &self.w2, self.reg),
            b2: g2.bias,
        };
        (total_loss, grads)
    }

    /// Name-keyed view of the parameters, for persistence and external
    /// training drivers.
    pub fn param_map(&self) -> BTreeMap<String, Tensor> {
        let mut map = BTreeMap::new();
        map.insert("W1".to_string(), self.w1.clone());
        map.insert("b1".to_string(), self.b1.clone());
        map.insert("W2".to_string(), self.w2.clone());
        map.insert("b2".to_string(), self.b2.clone());
        map
    }

    /// Replace the parameters from a name-keyed map, validating that
    /// every expected key is present with the right shape.
    pub fn set_param_map(&mut self, map: &BTreeMap<String, Tensor>) -> io::Result<()> {
        let w1 = take_param(map, "W1", &self.w1.shape)?;
        let b1 = take_param(map, "b1", &self.b1.shape)?;
        let w2 = take_param(map, "W2", &self.w2.shape)?;
        let b2 = take_param(map, "b2", &self.b2.shape)?;
        self.w1 = w1;
        self.b1 = b1;
        self.w2 = w2;
        self.b2 = b2;
        Ok(())
    }

    /// Save the parameters under the `saved/` directory.
    pub fn save(&self, name: &str) -> io::Result<()> {
        checkpoint::save_params(&self.param_map(), name)?;
        Ok(())
    }

    /// Load parameters saved with [`TwoLayerNet::save`].
    ///
    /// Returns `Ok(false)` when no such file exists.
    pub fn load(&mut self, name: &str) -> io::Result<bool> {
        match checkpoint::load_params(name)? {
            Some(map) => {
                self.set_param_map(&map)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
