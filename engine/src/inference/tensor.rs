//! Engine tensor representation
//!
//! Every worker unit exchanges [`Tensor`] values: a flat row-major `f32`
//! buffer plus a shape. Callers outside the engine speak `ndarray`; the two
//! conversions here are the only coercions the engine performs.

use crate::errors::{EngineError, Result};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

/// Dense row-major tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    /// Flattened tensor data
    pub data: Vec<f32>,
    /// Shape of the tensor (e.g., [1, 3] for a token batch, [1, 3, 64] for hidden states)
    pub shape: Vec<usize>,
}

impl Tensor {
    /// Create a new tensor, checking that data length matches the shape
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Result<Self> {
        let expected_len: usize = shape.iter().product();
        if data.len() != expected_len {
            return Err(EngineError::InferenceStep(format!(
                "Data length {} doesn't match shape {:?} ({} elements)",
                data.len(),
                shape,
                expected_len
            )));
        }
        Ok(Self { data, shape })
    }

    /// Create a tensor filled with zeros
    pub fn zeros(shape: Vec<usize>) -> Self {
        let len: usize = shape.iter().product();
        Self {
            data: vec![0.0; len],
            shape,
        }
    }

    /// Build a `[1, n]` tensor from token ids
    pub fn from_token_ids(ids: &[u32]) -> Self {
        Self {
            data: ids.iter().map(|&id| id as f32).collect(),
            shape: vec![1, ids.len()],
        }
    }

    /// Single-element tensor
    pub fn scalar(value: f32) -> Self {
        Self {
            data: vec![value],
            shape: vec![1],
        }
    }

    /// Get the total number of elements in the tensor
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the tensor is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of dimensions
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// The only value of a single-element tensor
    pub fn item(&self) -> Option<f32> {
        match self.data.as_slice() {
            [value] => Some(*value),
            _ => None,
        }
    }

    /// Mean of all elements (0.0 for an empty tensor)
    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }

    /// Convert into the external array representation
    pub fn into_array(self) -> Result<ArrayD<f32>> {
        ArrayD::from_shape_vec(IxDyn(&self.shape), self.data)
            .map_err(|e| EngineError::InferenceStep(format!("Output shape error: {}", e)))
    }
}

impl From<&ArrayD<f32>> for Tensor {
    fn from(array: &ArrayD<f32>) -> Self {
        // iter() walks in logical (row-major) order whatever the memory layout
        Self {
            data: array.iter().copied().collect(),
            shape: array.shape().to_vec(),
        }
    }
}

impl From<ArrayD<f32>> for Tensor {
    fn from(array: ArrayD<f32>) -> Self {
        Tensor::from(&array)
    }
}

/// Whether an output tensor signals the end of generation
///
/// True iff the tensor holds exactly one element and it equals `eos_token_id`.
pub fn is_end_of_sequence(output: &Tensor, eos_token_id: u32) -> bool {
    output.item() == Some(eos_token_id as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn test_new_checks_shape() {
        assert!(Tensor::new(vec![1.0, 2.0, 3.0], vec![1, 3]).is_ok());
        assert!(Tensor::new(vec![1.0, 2.0], vec![1, 3]).is_err());
    }

    #[test]
    fn test_from_token_ids() {
        let t = Tensor::from_token_ids(&[1, 2, 3]);
        assert_eq!(t.shape, vec![1, 3]);
        assert_eq!(t.data, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_array_conversion_preserves_logical_order() {
        // Transposed view has non-standard memory layout
        let a: Array2<f32> = array![[1.0, 2.0], [3.0, 4.0]];
        let transposed = a.t().to_owned().into_dyn();
        let t = Tensor::from(&transposed);
        assert_eq!(t.shape, vec![2, 2]);
        assert_eq!(t.data, vec![1.0, 3.0, 2.0, 4.0]);

        let back = t.clone().into_array().unwrap();
        assert_eq!(back, transposed);
    }

    #[test]
    fn test_end_of_sequence_detection() {
        assert!(is_end_of_sequence(&Tensor::scalar(2.0), 2));
        assert!(!is_end_of_sequence(&Tensor::scalar(7.0), 2));

        // Single element but 2D is still a single scalar value
        let single = Tensor::new(vec![2.0], vec![1, 1]).unwrap();
        assert!(is_end_of_sequence(&single, 2));

        // More than one element never signals EOS, even if it contains the id
        let many = Tensor::new(vec![2.0, 2.0], vec![2]).unwrap();
        assert!(!is_end_of_sequence(&many, 2));

        assert!(!is_end_of_sequence(&Tensor::zeros(vec![0]), 0));
    }

    #[test]
    fn test_mean() {
        let t = Tensor::new(vec![0.0, 0.5, 1.0], vec![3]).unwrap();
        assert!((t.mean() - 0.5).abs() < 1e-6);
        assert_eq!(Tensor::zeros(vec![0]).mean(), 0.0);
    }
}
