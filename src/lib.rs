//! Slate: Educational Neural Network Primitives
//!
//! Feed-forward neural network layers implemented from scratch, with
//! every forward and backward pass written out by hand. The point is to
//! see how backpropagation actually works: each layer computes its
//! output plus a cache of intermediates, and a paired backward function
//! turns an upstream gradient and that cache into exact gradients for
//! every input. Named after the writing slates students once worked
//! arithmetic on.
//!
//! # Modules
//!
//! - [`tensor`] - Row-major `f64` tensor with the operations the layers need
//! - [`layers`] - Affine, ReLU, batch/layer/group normalization, dropout,
//!   convolution, max pooling, and composite chains
//! - [`loss`] - Softmax cross-entropy and multiclass hinge losses
//! - [`classifiers`] - Two-layer and arbitrary-depth fully-connected nets
//! - [`gradcheck`] - Finite-difference gradient checking utilities
//! - [`checkpoint`] - Name-keyed parameter persistence
//!
//! # Example
//!
//! ```rust
//! use slate::classifiers::{TwoLayerConfig, TwoLayerNet};
//! use slate::Tensor;
//!
//! let net = TwoLayerNet::new(&TwoLayerConfig {
//!     input_dim: 4,
//!     hidden_dim: 8,
//!     num_classes: 3,
//!     seed: Some(0),
//!     ..Default::default()
//! });
//!
//! let x = Tensor::new(vec![0.5, -0.2, 0.1, 0.9, 0.3, 0.8, -0.4, 0.2], vec![2, 4]);
//! let scores = net.predict(&x);
//! assert_eq!(scores.shape, vec![2, 3]);
//!
//! let (loss, grads) = net.loss(&x, &[0, 2]);
//! assert!(loss > 0.0);
//! assert_eq!(grads.w1.shape, vec![4, 8]);
//! ```

pub mod checkpoint;
pub mod classifiers;
pub mod gradcheck;
pub mod layers;
pub mod loss;
pub mod tensor;

// Re-export the types nearly every caller touches
pub use classifiers::{FullyConnectedConfig, FullyConnectedNet, TwoLayerConfig, TwoLayerNet};
pub use layers::Mode;
pub use tensor::Tensor;
