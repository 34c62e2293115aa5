//! Fully-Connected Network of Arbitrary Depth
//!
//! A classifier with any number of hidden layers:
//!
//! ```text
//! {affine -> [norm] -> ReLU -> [dropout]} x (L - 1) -> affine -> softmax
//! ```
//!
//! Normalization (batch or layer) and dropout are optional and fixed at
//! construction. The final affine layer never has normalization or an
//! activation.
//!
//! Parameters live in an indexed record per layer ([`LayerParams`]); the
//! string-keyed view (`W1`, `b1`, `gamma1`, ...) exists only as an
//! adapter for persistence and external training drivers. Batch
//! normalization's running statistics are owned here too, one
//! [`BatchNormState`] per hidden layer.
//!
//! With one hidden layer, no normalization, and dropout disabled, this
//! model computes exactly what [`crate::classifiers::TwoLayerNet`] does.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::str::FromStr;

use crate::checkpoint;
use crate::classifiers::{apply_weight_decay, gaussian_init, seeded_rng, take_param};
use crate::layers::batch_norm::batchnorm_test_forward;
use crate::layers::{
    affine_backward, affine_batchnorm_relu_forward, affine_forward, affine_layernorm_relu_forward,
    affine_norm_relu_backward, affine_relu_backward, affine_relu_forward, dropout_backward,
    dropout_forward, layernorm_forward, relu_forward, AffineNormReluCache, AffineReluCache,
    BatchNormConfig, BatchNormState, DropoutCache, DropoutConfig, LayerNormConfig, Mode,
};
use crate::loss::softmax_loss;
use crate::tensor::Tensor;

/// Which normalization scheme the hidden layers use. Fixed per network
/// instance at construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Normalization {
    #[default]
    None,
    Batch,
    Layer,
}

/// Error for an unrecognized normalization name.
#[derive(Clone, Debug)]
pub struct ParseNormalizationError {
    name: String,
}

impl fmt::Display for ParseNormalizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unrecognized normalization \"{}\" (expected \"none\", \"batchnorm\", or \"layernorm\")",
            self.name
        )
    }
}

impl std::error::Error for ParseNormalizationError {}

impl FromStr for Normalization {
    type Err = ParseNormalizationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Normalization::None),
            "batchnorm" => Ok(Normalization::Batch),
            "layernorm" => Ok(Normalization::Layer),
            other => Err(ParseNormalizationError {
                name: other.to_string(),
            }),
        }
    }
}

/// Construction options for [`FullyConnectedNet`].
#[derive(Clone, Debug)]
pub struct FullyConnectedConfig {
    /// Width of each hidden layer, in order
    pub hidden_dims: Vec<usize>,
    pub input_dim: usize,
    pub num_classes: usize,
    /// Probability of keeping an activation; 1 disables dropout entirely
    pub dropout_keep_ratio: f64,
    pub normalization: Normalization,
    /// L2 regularization strength
    pub reg: f64,
    /// Standard deviation of the Gaussian weight initialization
    pub weight_scale: f64,
    /// Seed for deterministic initialization and dropout masks. With a
    /// seed set, every `loss` call draws the same masks, which is what a
    /// gradient check needs.
    pub seed: Option<u64>,
}

impl Default for FullyConnectedConfig {
    fn default() -> Self {
        Self {
            hidden_dims: vec![100],
            input_dim: 3 * 32 * 32,
            num_classes: 10,
            dropout_keep_ratio: 1.0,
            normalization: Normalization::None,
            reg: 0.0,
            weight_scale: 1e-2,
            seed: None,
        }
    }
}

/// Parameters of one layer: the affine weight and bias, plus the
/// normalization scale and shift on hidden layers of normalized networks.
#[derive(Clone, Debug)]
pub struct LayerParams {
    pub weight: Tensor,
    pub bias: Tensor,
    pub gamma: Option<Tensor>,
    pub beta: Option<Tensor>,
}

/// Gradients for one layer, mirroring [`LayerParams`].
pub struct LayerGradients {
    pub weight: Tensor,
    pub bias: Tensor,
    pub gamma: Option<Tensor>,
    pub beta: Option<Tensor>,
}

/// Gradients for the whole network, indexed like the parameter records.
pub struct FullyConnectedGradients {
    pub layers: Vec<LayerGradients>,
}

impl FullyConnectedGradients {
    /// Name-keyed view with the same keys as
    /// [`FullyConnectedNet::param_map`].
    pub fn to_map(&self) -> BTreeMap<String, Tensor> {
        let mut map = BTreeMap::new();
        for (i, g) in self.layers.iter().enumerate() {
            map.insert(format!("W{}", i + 1), g.weight.clone());
            map.insert(format!("b{}", i + 1), g.bias.clone());
            if let Some(gamma) = &g.gamma {
                map.insert(format!("gamma{}", i + 1), gamma.clone());
            }
            if let Some(beta) = &g.beta {
                map.insert(format!("beta{}", i + 1), beta.clone());
            }
        }
        map
    }
}

/// Cache for one hidden position of the forward chain.
enum HiddenCache {
    Plain(AffineReluCache),
    Norm(AffineNormReluCache),
}

/// Fully-connected classifier of arbitrary depth.
pub struct FullyConnectedNet {
    layers: Vec<LayerParams>,
    norm_states: Vec<BatchNormState>,
    normalization: Normalization,
    dropout: Option<DropoutConfig>,
    bn_config: BatchNormConfig,
    ln_config: LayerNormConfig,
    reg: f64,
    seed: Option<u64>,
}

impl FullyConnectedNet {
    /// Build a network from its configuration.
    ///
    /// Weights are drawn from N(0, weight_scale^2), biases start at zero,
    /// and on normalized networks every hidden layer gets gamma = 1 and
    /// beta = 0. Batch normalization's running statistics start at zero.
    pub fn new(config: &FullyConnectedConfig) -> Self {
        let mut rng = seeded_rng(config.seed);
        let mut dims = Vec::with_capacity(config.hidden_dims.len() + 2);
        dims.push(config.input_dim);
        dims.extend_from_slice(&config.hidden_dims);
        dims.push(config.num_classes);
        let num_layers = dims.len() - 1;

        let mut layers = Vec::with_capacity(num_layers);
        for i in 0..num_layers {
            let is_hidden = i + 1 < num_layers;
            let normalized = is_hidden && config.normalization != Normalization::None;
            layers.push(LayerParams {
                weight: gaussian_init(&mut rng, config.weight_scale, vec![dims[i], dims[i + 1]]),
                bias: Tensor::zeros(vec![dims[i + 1]]),
                gamma: normalized.then(|| Tensor::ones(vec![dims[i + 1]])),
                beta: normalized.then(|| Tensor::zeros(vec![dims[i + 1]])),
            });
        }

        let norm_states = if config.normalization == Normalization::Batch {
            (0..num_layers - 1)
                .map(|i| BatchNormState::new(dims[i + 1]))
                .collect()
        } else {
            Vec::new()
        };

        let dropout = if config.dropout_keep_ratio != 1.0 {
            Some(DropoutConfig::new(config.dropout_keep_ratio))
        } else {
            None
        };

        Self {
            layers,
            norm_states,
            normalization: config.normalization,
            dropout,
            bn_config: BatchNormConfig::default(),
            ln_config: LayerNormConfig::default(),
            reg: config.reg,
            seed: config.seed,
        }
    }

    /// Number of affine layers (hidden layers plus the output layer).
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Running statistics of the batch normalization layers, in layer
    /// order. Empty unless the network was built with
    /// [`Normalization::Batch`].
    pub fn norm_states(&self) -> &[BatchNormState] {
        &self.norm_states
    }

    fn mask_rng(&self) -> rand::rngs::StdRng {
        seeded_rng(self.seed)
    }

    /// Test-mode forward pass: raw class scores of shape `[N, C]`.
    ///
    /// Batch normalization reads its running statistics without touching
    /// them and dropout is the identity, so this takes `&self`.
    pub fn predict(&self, x: &Tensor) -> Tensor {
        let num_layers = self.layers.len();
        let mut hidden = x.clone();

        for i in 0..num_layers - 1 {
            let p = &self.layers[i];
            let (a, _) = affine_forward(&hidden, &p.weight, &p.bias);
            let normed = match self.normalization {
                Normalization::None => a,
                Normalization::Batch => batchnorm_test_forward(
                    &a,
                    self.gamma(i),
                    self.beta(i),
                    &self.bn_config,
                    &self.norm_states[i],
                ),
                Normalization::Layer => {
                    layernorm_forward(&a, self.gamma(i), self.beta(i), &self.ln_config).0
                }
            };
            let (activated, _) = relu_forward(&normed);
            // Dropout is the identity at test time
            hidden = activated;
        }

        let last = &self.layers[num_layers - 1];
        affine_forward(&hidden, &last.weight, &last.bias).0
    }

    /// Training-mode forward and backward pass.
    ///
    /// Runs the full chain in training mode (batch statistics, running
    /// average updates, fresh dropout masks), feeds the scores to the
    /// softmax loss, then walks the chain in reverse consuming each
    /// position's cache. Returns the total loss (data loss plus
    /// `0.5 * reg * ||W||^2` per weight matrix) and gradients mirroring
    /// the parameter records. The `reg * W` term lands on weight
    /// gradients only; biases, gamma and beta are never regularized.
    pub fn loss(&mut self, x: &Tensor, y: &[usize]) -> (f64, FullyConnectedGradients) {
        let num_layers = self.layers.len();
        let mut rng = self.mask_rng();

        // Forward chain through the hidden layers
        let mut caches: Vec<(HiddenCache, Option<DropoutCache>)> =
            Vec::with_capacity(num_layers - 1);
        let mut hidden = x.clone();
        for i in 0..num_layers - 1 {
            let (out, hidden_cache) = match self.normalization {
                Normalization::None => {
                    let p = &self.layers[i];
                    let (o, c) = affine_relu_forward(&hidden, &p.weight, &p.bias);
                    (o, HiddenCache::Plain(c))
                }
                Normalization::Batch => {
                    let p = &self.layers[i];
                    let gamma = p.gamma.as_ref().expect("normalized hidden layer has gamma");
                    let beta = p.beta.as_ref().expect("normalized hidden layer has beta");
                    let (o, c) = affine_batchnorm_relu_forward(
                        &hidden,
                        &p.weight,
                        &p.bias,
                        gamma,
                        beta,
                        &self.bn_config,
                        &mut self.norm_states[i],
                    );
                    (o, HiddenCache::Norm(c))
                }
                Normalization::Layer => {
                    let p = &self.layers[i];
                    let gamma = p.gamma.as_ref().expect("normalized hidden layer has gamma");
                    let beta = p.beta.as_ref().expect("normalized hidden layer has beta");
                    let (o, c) = affine_layernorm_relu_forward(
                        &hidden,
                        &p.weight,
                        &p.bias,
                        gamma,
                        beta,
                        &self.ln_config,
                    );
                    (o, HiddenCache::Norm(c))
                }
            };

            if let Some(cfg) = &self.dropout {
                let (dropped, drop_cache) = dropout_forward(&out, Mode::Train, cfg, &mut rng);
                hidden = dropped;
                caches.push((hidden_cache, Some(drop_cache)));
            } else {
                hidden = out;
                caches.push((hidden_cache, None));
            }
        }

        // Output layer and loss
        let last = &self.layers[num_layers - 1];
        let (scores, score_cache) = affine_forward(&hidden, &last.weight, &last.bias);
        let (data_loss, dscores) = softmax_loss(&scores, y);

        let mut total_loss = data_loss;
        for p in &self.layers {
            total_loss += 0.5 * self.reg * p.weight.sum_squares();
        }

        // Reverse chain, collecting gradients back-to-front
        let mut reversed: Vec<LayerGradients> = Vec::with_capacity(num_layers);
        let final_grads = affine_backward(&dscores, &score_cache);
        let mut dhidden = final_grads.x;
        reversed.push(LayerGradients {
            weight: apply_weight_decay(
                final_grads.weight,
                &self.layers[num_layers - 1].weight,
                self.reg,
            ),
            bias: final_grads.bias,
            gamma: None,
            beta: None,
        });

        for i in (0..num_layers - 1).rev() {
            let (hidden_cache, drop_cache) = &caches[i];
            if let Some(dc) = drop_cache {
                dhidden = dropout_backward(&dhidden, dc);
            }
            let grads = match hidden_cache {
                HiddenCache::Plain(c) => {
                    let g = affine_relu_backward(&dhidden, c);
                    dhidden = g.x;
                    LayerGradients {
                        weight: apply_weight_decay(g.weight, &self.layers[i].weight, self.reg),
                        bias: g.bias,
                        gamma: None,
                        beta: None,
                    }
                }
                HiddenCache::Norm(c) => {
                    let g = affine_norm_relu_backward(&dhidden, c);
                    dhidden = g.x;
                    LayerGradients {
                        weight: apply_weight_decay(g.weight, &self.layers[i].weight, self.reg),
                        bias: g.bias,
                        gamma: Some(g.gamma),
                        beta: Some(g.beta),
                    }
                }
            };
            reversed.push(grads);
        }

        reversed.reverse();
        (total_loss, FullyConnectedGradients { layers: reversed })
    }

    fn gamma(&self, i: usize) -> &Tensor {
        self.layers[i]
            .gamma
            .as_ref()
            .expect("normalized hidden layer has gamma")
    }

    fn beta(&self, i: usize) -> &Tensor {
        self.layers[i]
            .beta
            .as_ref()
            .expect("normalized hidden layer has beta")
    }

    /// Name-keyed view of the parameters (`W1`, `b1`, and on normalized
    /// networks `gamma1`, `beta1`, per hidden layer).
    pub fn param_map(&self) -> BTreeMap<String, Tensor> {
        let mut map = BTreeMap::new();
        for (i, p) in self.layers.iter().enumerate() {
            map.insert(format!("W{}", i + 1), p.weight.clone());
            map.insert(format!("b{}", i + 1), p.bias.clone());
            if let Some(gamma) = &p.gamma {
                map.insert(format!("gamma{}", i + 1), gamma.clone());
            }
            if let Some(beta) = &p.beta {
                map.insert(format!("beta{}", i + 1), beta.clone());
            }
        }
        map
    }

    /// Replace the parameters from a name-keyed map, validating that
    /// every expected key is present with the right shape.
    pub fn set_param_map(&mut self, map: &BTreeMap<String, Tensor>) -> io::Result<()> {
        let mut replacement = Vec::with_capacity(self.layers.len());
        for (i, p) in self.layers.iter().enumerate() {
            let weight = take_param(map, &format!("W{}", i + 1), &p.weight.shape)?;
            let bias = take_param(map, &format!("b{}", i + 1), &p.bias.shape)?;
            let gamma = match &p.gamma {
                Some(g) => Some(take_param(map, &format!("gamma{}", i + 1), &g.shape)?),
                None => None,
            };
            let beta = match &p.beta {
                Some(b) => Some(take_param(map, &format!("beta{}", i + 1), &b.shape)?),
                None => None,
            };
            replacement.push(LayerParams {
                weight,
                bias,
                gamma,
                beta,
            });
        }
        self.layers = replacement;
        Ok(())
    }

    /// Save the parameters under the `saved/` directory.
    pub fn save(&self, name: &str) -> io::Result<()> {
        checkpoint::save_params(&self.param_map(), name)?;
        Ok(())
    }

    /// Load parameters saved with [`FullyConnectedNet::save`].
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

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> FullyConnectedConfig {
        FullyConnectedConfig {
            hidden_dims: vec![5, 4],
            input_dim: 6,
            num_classes: 3,
            weight_scale: 0.1,
            seed: Some(1),
            ..Default::default()
        }
    }

    #[test]
    fn test_parameter_layout_without_normalization() {
        let net = FullyConnectedNet::new(&tiny_config());
        assert_eq!(net.num_layers(), 3);
        let map = net.param_map();
        assert!(map.contains_key("W3"));
        assert!(!map.contains_key("gamma1"));
    }

    #[test]
    fn test_parameter_layout_with_batchnorm() {
        let config = FullyConnectedConfig {
            normalization: Normalization::Batch,
            ..tiny_config()
        };
        let net = FullyConnectedNet::new(&config);
        let map = net.param_map();
        assert!(map.contains_key("gamma1"));
        assert!(map.contains_key("gamma2"));
        // The output layer is never normalized
        assert!(!map.contains_key("gamma3"));
        assert_eq!(net.norm_states().len(), 2);
    }

    #[test]
    fn test_gradient_keys_match_param_keys() {
        let config = FullyConnectedConfig {
            normalization: Normalization::Layer,
            ..tiny_config()
        };
        let mut net = FullyConnectedNet::new(&config);
        let x = Tensor::new((0..12).map(|i| i as f64 * 0.1).collect(), vec![2, 6]);
        let (_, grads) = net.loss(&x, &[0, 2]);

        let param_keys: Vec<_> = net.param_map().into_keys().collect();
        let grad_keys: Vec<_> = grads.to_map().into_keys().collect();
        assert_eq!(param_keys, grad_keys);
    }

    #[test]
    fn test_normalization_parsing() {
        assert_eq!("batchnorm".parse::<Normalization>().unwrap(), Normalization::Batch);
        assert_eq!("layernorm".parse::<Normalization>().unwrap(), Normalization::Layer);
        assert_eq!("none".parse::<Normalization>().unwrap(), Normalization::None);
        let err = "batch-norm".parse::<Normalization>().unwrap_err();
        assert!(err.to_string().contains("batch-norm"));
    }

    #[test]
    fn test_seeded_losses_repeat_with_dropout() {
        let config = FullyConnectedConfig {
            dropout_keep_ratio: 0.7,
            seed: Some(11),
            ..tiny_config()
        };
        let mut net = FullyConnectedNet::new(&config);
        let x = Tensor::new((0..12).map(|i| (i as f64).sin()).collect(), vec![2, 6]);

        let (loss_a, _) = net.loss(&x, &[1, 2]);
        let (loss_b, _) = net.loss(&x, &[1, 2]);
        assert_eq!(loss_a, loss_b);
    }
}
