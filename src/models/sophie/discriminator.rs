use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig, Lstm, LstmConfig};
use burn::tensor::activation;
use burn::tensor::{backend::Backend, Tensor};

use crate::error::SophieError;

/// Classifies full trajectories as real (1) or generated (0).
#[derive(Module, Debug)]
pub struct TrajectoryDiscriminator<B: Backend> {
    seq_len: usize,
    d_input: usize,
    embedding: Linear<B>,
    lstm: Lstm<B>,
    out: Linear<B>,
}

impl<B: Backend> TrajectoryDiscriminator<B> {
    /// `trajectories` is `[B', obs + pred, I]`; returns probabilities `[B']`.
    pub fn forward(&self, trajectories: Tensor<B, 3>) -> crate::error::Result<Tensor<B, 1>> {
        let [batch_size, seq_len, d_input] = trajectories.dims();
        if seq_len != self.seq_len || d_input != self.d_input {
            return Err(SophieError::dims(
                "discriminator input",
                format!("[B, {}, {}]", self.seq_len, self.d_input),
                &trajectories.dims(),
            ));
        }

        let x = self.embedding.forward(trajectories);
        let (_, hidden) = self.lstm.forward(x, None);

        let [_, _, d_hidden] = hidden.dims();
        let last: Tensor<B, 2> = hidden
            .slice([0..batch_size, seq_len - 1..seq_len, 0..d_hidden])
            .squeeze(1);

        let logits = self.out.forward(last);

        Ok(activation::sigmoid(logits).reshape([batch_size]))
    }
}

#[derive(Config, Debug)]
pub struct TrajectoryDiscriminatorConfig {
    /// Full trajectory length, observed plus predicted steps.
    seq_len: usize,

    #[config(default = 2)]
    d_input: usize,

    #[config(default = 16)]
    d_embedding: usize,

    #[config(default = 64)]
    d_hidden: usize,
}

impl TrajectoryDiscriminatorConfig {
    pub fn init<B: Backend>(&self) -> TrajectoryDiscriminator<B> {
        TrajectoryDiscriminator {
            seq_len: self.seq_len,
            d_input: self.d_input,
            embedding: LinearConfig::new(self.d_input, self.d_embedding).init(),
            lstm: LstmConfig::new(self.d_embedding, self.d_hidden, true).init(),
            out: LinearConfig::new(self.d_hidden, 1).init(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{float_tensor, host_values};
    use burn::backend::NdArray;
    use proptest::prelude::*;

    type TestBackend = NdArray<f32>;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn outputs_probabilities_for_arbitrary_inputs(
            values in (1usize..5).prop_flat_map(|batch_size| {
                prop::collection::vec(-1e4f32..1e4, batch_size * 5 * 2)
            })
        ) {
            let discriminator: TrajectoryDiscriminator<TestBackend> =
                TrajectoryDiscriminatorConfig::new(5).with_d_hidden(8).init();
            let batch_size = values.len() / 10;

            let probs = host_values(
                discriminator
                    .forward(float_tensor(values, [batch_size, 5, 2]))
                    .unwrap(),
            );

            prop_assert_eq!(probs.len(), batch_size);
            prop_assert!(probs.iter().all(|&p| (0.0..=1.0).contains(&p)));
        }
    }

    #[test]
    fn rejects_trajectories_of_wrong_length() {
        let discriminator: TrajectoryDiscriminator<TestBackend> =
            TrajectoryDiscriminatorConfig::new(5).init();

        assert!(matches!(
            discriminator.forward(Tensor::zeros([2, 4, 2])),
            Err(SophieError::DimensionMismatch { tensor: "discriminator input", .. })
        ));
    }
}
