use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig, Lstm, LstmConfig};
use burn::tensor::{backend::Backend, Tensor};
use rand::Rng;
use rand_distr::StandardNormal;
use tracing::trace;

use super::attention::SocialAttention;
use crate::error::SophieError;
use crate::utils::float_tensor;

/// Recurrent state of the decoder, threaded explicitly through every step.
#[derive(Clone, Debug)]
pub struct DecoderState<B: Backend> {
    pub cell: Tensor<B, 2>,   // [B, Hdec]
    pub hidden: Tensor<B, 2>, // [B, Hdec]
}

impl<B: Backend> DecoderState<B> {
    /// Hidden state shaped as an attention query, `[B, 1, Hdec]`.
    pub fn query(&self) -> Tensor<B, 3> {
        self.hidden.clone().unsqueeze_dim(1)
    }
}

#[derive(Clone, Debug)]
pub struct GeneratorOutput<B: Backend> {
    /// Predicted positions, `[B, pred_length, d_output]`.
    pub positions: Tensor<B, 3>,
    /// The single noise draw fed to every step, `[B, 1, d_noise]`.
    pub noise: Tensor<B, 3>,
    /// Social context fed to each step, `[B, 1, d_context]` each.
    pub contexts: Vec<Tensor<B, 3>>,
}

/// Autoregressive decoder conditioned on social context and noise.
#[derive(Module, Debug)]
pub struct TrajectoryGenerator<B: Backend> {
    pred_length: usize,
    d_noise: usize,
    d_hidden: usize,
    lstm: Lstm<B>,
    out: Linear<B>,
}

impl<B: Backend> TrajectoryGenerator<B> {
    /// One multivariate standard normal draw per sample, `[B, 1, d_noise]`.
    pub fn sample_noise<R: Rng>(&self, batch_size: usize, rng: &mut R) -> Tensor<B, 3> {
        let values = (0..batch_size * self.d_noise)
            .map(|_| rng.sample::<f32, _>(StandardNormal))
            .collect();
        float_tensor(values, [batch_size, 1, self.d_noise])
    }

    /// Fresh decoder state drawn uniformly from `[0, 1)`.
    pub fn init_state<R: Rng>(&self, batch_size: usize, rng: &mut R) -> DecoderState<B> {
        let mut uniform = || {
            let values = (0..batch_size * self.d_hidden).map(|_| rng.gen::<f32>()).collect();
            float_tensor(values, [batch_size, self.d_hidden])
        };

        DecoderState {
            cell: uniform(),
            hidden: uniform(),
        }
    }

    /// Advances the decoder by one step, returning the predicted position
    /// `[B, 1, d_output]` and the new state.
    pub fn step(
        &self,
        context: Tensor<B, 3>,
        noise: Tensor<B, 3>,
        state: DecoderState<B>,
    ) -> (Tensor<B, 3>, DecoderState<B>) {
        let input = Tensor::cat(vec![context, noise], 2);
        let (cell, hidden) = self.lstm.forward(input, Some((state.cell, state.hidden)));
        let output = self.out.forward(hidden.clone());

        let state = DecoderState {
            cell: cell.squeeze(1),
            hidden: hidden.squeeze(1),
        };

        (output, state)
    }

    /// Generates `pred_length` positions. The social context is recomputed
    /// after every step with the new hidden state as query, against the same
    /// `features` and `mask`.
    pub fn forward(
        &self,
        attention: &SocialAttention<B>,
        features: Tensor<B, 3>,
        mask: Option<Tensor<B, 3>>,
        noise: Tensor<B, 3>,
        state: DecoderState<B>,
    ) -> crate::error::Result<GeneratorOutput<B>> {
        let [batch_size, d_hidden] = state.hidden.dims();
        if d_hidden != self.d_hidden || state.cell.dims() != [batch_size, self.d_hidden] {
            return Err(SophieError::dims(
                "decoder state",
                format!("[{batch_size}, {}]", self.d_hidden),
                &state.cell.dims(),
            ));
        }
        if noise.dims() != [batch_size, 1, self.d_noise] {
            return Err(SophieError::dims(
                "noise",
                format!("[{batch_size}, 1, {}]", self.d_noise),
                &noise.dims(),
            ));
        }
        let [feat_batch, nb_slots, _] = features.dims();
        if feat_batch != batch_size || nb_slots != attention.nb_weights() {
            return Err(SophieError::dims(
                "social features",
                format!("[{batch_size}, {}, H]", attention.nb_weights()),
                &features.dims(),
            ));
        }

        let mut state = state;
        let mut context = attention.forward(state.query(), features.clone(), mask.clone());
        let mut positions = Vec::with_capacity(self.pred_length);
        let mut contexts = Vec::with_capacity(self.pred_length);

        for step in 0..self.pred_length {
            let (output, next) = self.step(context.clone(), noise.clone(), state);
            contexts.push(context);
            positions.push(output);
            state = next;

            trace!(step, "decoder step");

            context = attention.forward(state.query(), features.clone(), mask.clone());
        }

        Ok(GeneratorOutput {
            positions: Tensor::cat(positions, 1),
            noise,
            contexts,
        })
    }

    pub fn pred_length(&self) -> usize {
        self.pred_length
    }
}

#[derive(Config, Debug)]
pub struct TrajectoryGeneratorConfig {
    /// Size of the social context fed to each step.
    d_context: usize,

    #[config(default = 8)]
    d_noise: usize,

    #[config(default = 32)]
    d_hidden: usize,

    #[config(default = 2)]
    d_output: usize,

    #[config(default = 12)]
    pred_length: usize,
}

impl TrajectoryGeneratorConfig {
    pub fn init<B: Backend>(&self) -> TrajectoryGenerator<B> {
        TrajectoryGenerator {
            pred_length: self.pred_length,
            d_noise: self.d_noise,
            d_hidden: self.d_hidden,
            lstm: LstmConfig::new(self.d_context + self.d_noise, self.d_hidden, true).init(),
            out: LinearConfig::new(self.d_hidden, self.d_output).init(),
        }
    }
}
