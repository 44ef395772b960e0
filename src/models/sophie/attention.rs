use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::activation;
use burn::tensor::{backend::Backend, Tensor};

use crate::modules::mlp::{Mlp, MlpConfig};

/// Social attention over a fixed number of neighbor slots.
///
/// The weights produced from the query are used as-is: they are not
/// normalized, so a masked slot contributes exactly nothing and a present
/// slot contributes with its raw magnitude.
#[derive(Module, Debug)]
pub struct SocialAttention<B: Backend> {
    nb_weights: usize,
    features_embedding: Linear<B>,
    core: Mlp<B>,
}

impl<B: Backend> SocialAttention<B> {
    /// `query` is `[B, 1, Hdec]`, `features` `[B, nb_weights, d_input]` and
    /// `mask` `[B, 1, nb_weights]`. Returns the context `[B, 1, d_output]`.
    pub fn forward(
        &self,
        query: Tensor<B, 3>,
        features: Tensor<B, 3>,
        mask: Option<Tensor<B, 3>>,
    ) -> Tensor<B, 3> {
        let features = activation::relu(self.features_embedding.forward(features));
        let weights = self.weights(query, mask);

        weights.matmul(features)
    }

    /// Raw per-slot weights `[B, 1, nb_weights]`, zeroed where `mask` is 0.
    pub fn weights(&self, query: Tensor<B, 3>, mask: Option<Tensor<B, 3>>) -> Tensor<B, 3> {
        let weights = self.core.forward(query);

        match mask {
            Some(mask) => weights * mask,
            None => weights,
        }
    }

    pub fn nb_weights(&self) -> usize {
        self.nb_weights
    }
}

#[derive(Config, Debug)]
pub struct SocialAttentionConfig {
    /// Size of each neighbor feature vector.
    d_input: usize,
    /// Size of the aggregated context.
    d_output: usize,
    /// Size of the query.
    d_query: usize,
    nb_weights: usize,

    #[config(default = "vec![64, 128, 64]")]
    layers: Vec<usize>,
}

impl SocialAttentionConfig {
    pub fn init<B: Backend>(&self) -> SocialAttention<B> {
        SocialAttention {
            nb_weights: self.nb_weights,
            features_embedding: LinearConfig::new(self.d_input, self.d_output).init(),
            core: MlpConfig::new(self.d_query, self.nb_weights)
                .with_d_hidden(self.layers.clone())
                .init(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{float_tensor, host_values};
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn attention() -> SocialAttention<TestBackend> {
        SocialAttentionConfig::new(6, 4, 5, 3)
            .with_layers(vec![8, 8])
            .init()
    }

    #[test]
    fn context_has_one_vector_per_sample() {
        let attention = attention();
        let query = Tensor::<TestBackend, 3>::ones([2, 1, 5]);
        let features = Tensor::<TestBackend, 3>::ones([2, 3, 6]);

        let context = attention.forward(query, features, None);
        assert_eq!(context.dims(), [2, 1, 4]);
    }

    #[test]
    fn masked_slots_have_exactly_zero_weight() {
        let attention = attention();
        let query = float_tensor::<TestBackend, 3>(vec![10.0, -3.0, 7.5, 2.0, -8.0], [1, 1, 5]);
        let mask = float_tensor::<TestBackend, 3>(vec![1.0, 0.0, 0.0], [1, 1, 3]);

        let raw = host_values(attention.weights(query.clone(), None));
        let masked = host_values(attention.weights(query, Some(mask)));

        assert_eq!(masked[0], raw[0]);
        assert_eq!(masked[1], 0.0);
        assert_eq!(masked[2], 0.0);
    }

    #[test]
    fn fully_masked_sample_has_zero_context() {
        let attention = attention();
        let query = Tensor::<TestBackend, 3>::ones([1, 1, 5]);
        let features = float_tensor::<TestBackend, 3>((0..18).map(|v| v as f32 * 3.0).collect(), [1, 3, 6]);
        let mask = Tensor::<TestBackend, 3>::zeros([1, 1, 3]);

        let context = attention.forward(query, features, Some(mask));
        assert!(host_values(context).iter().all(|&v| v == 0.0));
    }
}
