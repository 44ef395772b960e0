use burn::tensor::{backend::Backend, Data, Int, Shape, Tensor};

use crate::error::{Result, SophieError};

/// Mean binary cross entropy, log terms clamped at -100 so saturated
/// probabilities stay finite.
pub fn binary_cross_entropy<B: Backend>(probs: Tensor<B, 1>, targets: Tensor<B, 1>) -> Tensor<B, 1> {
    let log_p = probs.clone().log().clamp_min(-100.0);
    let log_not_p = (probs.neg() + 1.0).log().clamp_min(-100.0);

    let likelihood = targets.clone() * log_p + (targets.neg() + 1.0) * log_not_p;

    likelihood.neg().mean()
}

/// Squared error summed over steps and channels of each trajectory, averaged over the batch.
pub fn reconstruction_loss<B: Backend>(
    predicted: Tensor<B, 3>, // [B, T, O]
    target: Tensor<B, 3>,    // [B, T, O]
) -> Tensor<B, 1> {
    let residual = predicted - target;
    (residual.clone() * residual).sum_dim(2).sum_dim(1).mean()
}

/// Indices ordering `lengths` from longest to shortest, ties kept in input order.
pub fn descending_order(lengths: &[usize]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..lengths.len()).collect();
    order.sort_by(|&a, &b| lengths[b].cmp(&lengths[a]));
    order
}

pub fn invert_permutation(permutation: &[usize]) -> Vec<usize> {
    let mut inverse = vec![0; permutation.len()];
    for (position, &index) in permutation.iter().enumerate() {
        inverse[index] = position;
    }
    inverse
}

pub fn index_tensor<B: Backend>(indices: &[usize]) -> Tensor<B, 1, Int> {
    let data = Data::new(
        indices.iter().map(|&i| i as i64).collect::<Vec<i64>>(),
        Shape::new([indices.len()]),
    );
    Tensor::from_data(data.convert::<B::IntElem>())
}

pub fn float_tensor<B: Backend, const D: usize>(values: Vec<f32>, dims: [usize; D]) -> Tensor<B, D> {
    let data = Data::new(values, Shape::new(dims));
    Tensor::from_data(data.convert::<B::FloatElem>())
}

/// Copies a tensor back to the host as a flat row-major buffer.
pub fn host_values<B: Backend, const D: usize>(x: Tensor<B, D>) -> Vec<f32> {
    x.into_data().convert::<f32>().value
}

pub fn ensure_finite<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    quantity: &'static str,
) -> Result<()> {
    if host_values(x).iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(SophieError::NumericInstability { quantity })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn bce_is_small_for_confident_correct_predictions() {
        let probs = float_tensor::<TestBackend, 1>(vec![0.999, 0.001], [2]);
        let targets = float_tensor::<TestBackend, 1>(vec![1.0, 0.0], [2]);

        let loss = host_values(binary_cross_entropy(probs, targets))[0];
        assert!(loss < 0.01, "loss {loss}");
    }

    #[test]
    fn bce_stays_finite_for_saturated_wrong_predictions() {
        let probs = float_tensor::<TestBackend, 1>(vec![0.0, 1.0], [2]);
        let targets = float_tensor::<TestBackend, 1>(vec![1.0, 0.0], [2]);

        let loss = host_values(binary_cross_entropy(probs, targets))[0];
        assert!((loss - 100.0).abs() < 1e-3, "loss {loss}");
    }

    #[test]
    fn reconstruction_sums_per_trajectory_and_averages_batch() {
        let predicted = float_tensor::<TestBackend, 3>(vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0], [2, 2, 2]);
        let target = float_tensor::<TestBackend, 3>(vec![0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 0.0], [2, 2, 2]);

        // first trajectory: 1 + 4, second: 0
        let loss = host_values(reconstruction_loss(predicted, target))[0];
        assert!((loss - 2.5).abs() < 1e-6);
    }

    #[test]
    fn reconstruction_is_zero_for_exact_predictions() {
        let values = vec![0.5, -1.5, 2.0, 3.0, 1.0, 1.0];
        let predicted = float_tensor::<TestBackend, 3>(values.clone(), [1, 3, 2]);
        let target = float_tensor::<TestBackend, 3>(values, [1, 3, 2]);

        assert_eq!(host_values(reconstruction_loss(predicted, target))[0], 0.0);
    }

    #[test]
    fn descending_order_is_stable() {
        assert_eq!(descending_order(&[2, 5, 2, 7, 1]), vec![3, 1, 0, 2, 4]);
    }

    #[test]
    fn inverse_permutation_restores_order() {
        let order = descending_order(&[2, 5, 2, 7, 1]);
        let inverse = invert_permutation(&order);
        let restored: Vec<usize> = inverse.iter().map(|&i| order[i]).collect();
        assert_eq!(restored, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn non_finite_values_are_reported() {
        let x = float_tensor::<TestBackend, 1>(vec![1.0, f32::NAN], [2]);
        assert_eq!(
            ensure_finite(x, "loss"),
            Err(SophieError::NumericInstability { quantity: "loss" })
        );
    }
}
