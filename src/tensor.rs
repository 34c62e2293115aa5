//! Tensor Operations for Neural Networks
//!
//! This module provides the minimal tensor type the layer functions are
//! built on. Tensors store multi-dimensional arrays with shape and stride
//! information for efficient indexing and memory layout.
//!
//! ## Core Concepts
//!
//! - **Data**: Flat `Vec<f64>` storing all elements in row-major order
//! - **Shape**: Dimensions of the tensor (e.g., `[batch, features]`)
//! - **Strides**: Step sizes for each dimension to compute flat indices
//!
//! ## Example
//!
//! ```rust
//! use slate::Tensor;
//!
//! // Create a 2x3 matrix
//! let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
//! let tensor = Tensor::new(data, vec![2, 3]);
//!
//! // Matrix multiplication
//! let other = Tensor::new(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], vec![3, 2]);
//! let result = tensor.matmul(&other);
//! assert_eq!(result.shape, vec![2, 2]);
//! ```
//!
//! ## Performance
//!
//! Matrix multiplication switches to a parallel cache-blocked algorithm
//! (via Rayon) above a work threshold, and elementwise operations iterate
//! in parallel. Every parallel path produces each output element from a
//! single task with a fixed sequential inner summation order, so results
//! are identical to the sequential reference.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// A multi-dimensional array of `f64` values.
///
/// Tensors store data in a contiguous `Vec<f64>` with shape and stride
/// information for multi-dimensional indexing. All operations use
/// row-major (C-style) memory layout.
///
/// # Fields
///
/// - `data`: Flat array of values
/// - `shape`: Dimensions (e.g., `[2, 3]` for a 2x3 matrix)
/// - `strides`: Step sizes for each dimension (computed from shape)
///
/// # Memory Layout
///
/// For shape `[2, 3]`, data is stored as:
/// `[row0_col0, row0_col1, row0_col2, row1_col0, row1_col1, row1_col2]`
/// with strides `[3, 1]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    /// Flat storage of all tensor elements
    pub data: Vec<f64>,
    /// Shape of the tensor (dimensions)
    pub shape: Vec<usize>,
    /// Strides for each dimension (computed from shape)
    pub strides: Vec<usize>,
}

impl Tensor {
    /// Create a new tensor with given data and shape
    ///
    /// # Panics
    ///
    /// Panics if the product of shape dimensions doesn't equal data length
    ///
    /// # Example
    ///
    /// ```rust
    /// # use slate::Tensor;
    /// let tensor = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    /// assert_eq!(tensor.shape, vec![2, 2]);
    /// ```
    pub fn new(data: Vec<f64>, shape: Vec<usize>) -> Self {
        let expected_size: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_size,
            "Data length ({}) doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_size
        );

        let strides = Self::compute_strides(&shape);
        Self {
            data,
            shape,
            strides,
        }
    }

    /// Create a tensor filled with zeros
    ///
    /// # Example
    ///
    /// ```rust
    /// # use slate::Tensor;
    /// let tensor = Tensor::zeros(vec![3, 4]);
    /// assert_eq!(tensor.data.len(), 12);
    /// assert!(tensor.data.iter().all(|&x| x == 0.0));
    /// ```
    pub fn zeros(shape: Vec<usize>) -> Self {
        let size: usize = shape.iter().product();
        Self::new(vec![0.0; size], shape)
    }

    /// Create a tensor filled with ones (the usual gamma initialization)
    pub fn ones(shape: Vec<usize>) -> Self {
        let size: usize = shape.iter().product();
        Self::new(vec![1.0; size], shape)
    }

    /// Total number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the tensor holds no elements
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Compute strides from shape (row-major layout)
    ///
    /// For shape `[d0, d1, d2]`, strides are `[d1*d2, d2, 1]`.
    fn compute_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    /// SIMD-friendly inner loop for matrix multiplication.
    /// Computes: result[j] += a_val * b[j] for all j. The simple loop
    /// shape lets LLVM auto-vectorize it.
    #[inline(always)]
    fn matmul_inner(a_val: f64, b: &[f64], result: &mut [f64]) {
        for (r, &b_val) in result.iter_mut().zip(b.iter()) {
            *r += a_val * b_val;
        }
    }

    /// 2D matrix multiplication
    ///
    /// For `A @ B` where `A` is `[m, k]` and `B` is `[k, n]`:
    /// - Result shape: `[m, n]`
    /// - Each element `C[i,j] = sum(A[i,l] * B[l,j])` for all l
    ///
    /// # Performance
    ///
    /// - **Small matrices** (< 1K ops): sequential computation
    /// - **Large matrices** (>= 1K ops): parallel cache-blocked algorithm
    ///
    /// # Panics
    ///
    /// Panics if either operand is not 2D or the inner dimensions differ
    ///
    /// # Example
    ///
    /// ```rust
    /// # use slate::Tensor;
    /// let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    /// let b = Tensor::new(vec![1.0, 0.0, 0.0, 1.0], vec![2, 2]);
    /// let c = a.matmul(&b);
    /// assert_eq!(c.shape, vec![2, 2]);
    /// ```
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert!(
            self.shape.len() == 2 && other.shape.len() == 2,
            "matmul expects 2D operands, got {:?} @ {:?}",
            self.shape,
            other.shape
        );
        assert_eq!(
            self.shape[1], other.shape[0],
            "Matrix dimensions incompatible: [{}, {}] @ [{}, {}]",
            self.shape[0], self.shape[1], other.shape[0], other.shape[1]
        );

        let m = self.shape[0];
        let n = other.shape[1];
        let k = self.shape[1];

        // Work threshold balancing parallel overhead against gains
        if m * n * k >= 1_000 {
            return self.matmul_parallel_blocked(other, m, n, k);
        }

        let mut result = vec![0.0; m * n];
        for i in 0..m {
            for l in 0..k {
                let a_val = self.data[i * k + l];
                Self::matmul_inner(
                    a_val,
                    &other.data[l * n..(l + 1) * n],
                    &mut result[i * n..(i + 1) * n],
                );
            }
        }

        Tensor::new(result, vec![m, n])
    }

    /// Parallel cache-blocked matrix multiplication
    ///
    /// Processes the output in 8x8 blocks that fit in L1 cache and
    /// distributes row blocks across CPU cores via Rayon. Each output
    /// element is still accumulated by exactly one task in a fixed inner
    /// order, so the result matches the sequential version bit for bit.
    fn matmul_parallel_blocked(&self, other: &Tensor, m: usize, n: usize, k: usize) -> Tensor {
        const BLOCK_SIZE: usize = 8;

        let mut result = vec![0.0; m * n];

        result
            .par_chunks_mut(BLOCK_SIZE * n)
            .enumerate()
            .for_each(|(block_i, result_block)| {
                let i_start = block_i * BLOCK_SIZE;
                let i_end = (i_start + BLOCK_SIZE).min(m);

                for j_start in (0..n).step_by(BLOCK_SIZE) {
                    let j_end = (j_start + BLOCK_SIZE).min(n);

                    for k_start in (0..k).step_by(BLOCK_SIZE) {
                        let k_end = (k_start + BLOCK_SIZE).min(k);

                        for i in i_start..i_end {
                            let row_offset = (i - i_start) * n;
                            for k_idx in k_start..k_end {
                                let a_val = self.data[i * k + k_idx];
                                Self::matmul_inner(
                                    a_val,
                                    &other.data[k_idx * n + j_start..k_idx * n + j_end],
                                    &mut result_block[row_offset + j_start..row_offset + j_end],
                                );
                            }
                        }
                    }
                }
            });

        Tensor::new(result, vec![m, n])
    }

    /// Transpose a 2D tensor
    ///
    /// # Panics
    ///
    /// Panics if the tensor is not 2D
    pub fn transpose(&self) -> Tensor {
        assert_eq!(
            self.shape.len(),
            2,
            "transpose expects a 2D tensor, got {:?}",
            self.shape
        );
        let rows = self.shape[0];
        let cols = self.shape[1];
        let mut result = vec![0.0; rows * cols];
        for i in 0..rows {
            for j in 0..cols {
                result[j * rows + i] = self.data[i * cols + j];
            }
        }
        Tensor::new(result, vec![cols, rows])
    }

    /// Reshape to a new shape with the same number of elements
    ///
    /// # Panics
    ///
    /// Panics if the element counts differ
    pub fn reshape(&self, new_shape: &[usize]) -> Tensor {
        let new_size: usize = new_shape.iter().product();
        assert_eq!(
            self.data.len(),
            new_size,
            "Cannot reshape {:?} ({} elements) to {:?} ({} elements)",
            self.shape,
            self.data.len(),
            new_shape,
            new_size
        );
        Tensor::new(self.data.clone(), new_shape.to_vec())
    }

    /// Element-wise addition with broadcasting support
    ///
    /// Supports two patterns:
    ///
    /// 1. **Exact match**: same shape
    /// 2. **Broadcast last dim**: `[*, n] + [n]` (e.g., adding a bias row)
    ///
    /// # Panics
    ///
    /// Panics on any other shape combination
    pub fn add(&self, other: &Tensor) -> Tensor {
        if self.shape == other.shape {
            let result = self
                .data
                .par_iter()
                .zip(&other.data)
                .map(|(a, b)| a + b)
                .collect();
            return Tensor::new(result, self.shape.clone());
        }

        // Broadcast last dimension: [*, n] + [n]
        if self.shape.len() > other.shape.len() {
            let last_dim = *self.shape.last().unwrap();
            if other.data.len() == last_dim {
                let result: Vec<f64> = self
                    .data
                    .par_iter()
                    .enumerate()
                    .map(|(i, &v)| v + other.data[i % last_dim])
                    .collect();
                return Tensor::new(result, self.shape.clone());
            }
        }

        panic!(
            "Unsupported broadcast for add: {:?} + {:?}",
            self.shape, other.shape
        );
    }

    /// Element-wise subtraction (same shape only)
    pub fn sub(&self, other: &Tensor) -> Tensor {
        assert_eq!(
            self.shape, other.shape,
            "sub expects matching shapes: {:?} - {:?}",
            self.shape, other.shape
        );
        let result = self
            .data
            .par_iter()
            .zip(&other.data)
            .map(|(a, b)| a - b)
            .collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Element-wise multiplication (same shape only)
    pub fn mul(&self, other: &Tensor) -> Tensor {
        assert_eq!(
            self.shape, other.shape,
            "mul expects matching shapes: {:?} * {:?}",
            self.shape, other.shape
        );
        let result = self
            .data
            .par_iter()
            .zip(&other.data)
            .map(|(a, b)| a * b)
            .collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Add a scalar to every element
    pub fn add_scalar(&self, scalar: f64) -> Tensor {
        let result = self.data.iter().map(|&v| v + scalar).collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Multiply every element by a scalar
    pub fn mul_scalar(&self, scalar: f64) -> Tensor {
        let result = self.data.iter().map(|&v| v * scalar).collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Sum of all elements
    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Sum of squared elements (the building block of the L2 penalty)
    pub fn sum_squares(&self) -> f64 {
        self.data.iter().map(|&v| v * v).sum()
    }
}
