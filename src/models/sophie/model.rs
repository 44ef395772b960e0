use burn::config::Config;
use burn::module::Module;
use burn::tensor::{backend::Backend, Tensor};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use super::attention::{SocialAttention, SocialAttentionConfig};
use super::discriminator::{TrajectoryDiscriminator, TrajectoryDiscriminatorConfig};
use super::encoder::{SequenceEncoder, SequenceEncoderConfig};
use super::generator::{TrajectoryGenerator, TrajectoryGeneratorConfig};
use super::social::SceneLayout;
use crate::error::SophieError;
use crate::utils::{binary_cross_entropy, ensure_finite, index_tensor, reconstruction_loss};

#[derive(Clone, Debug)]
pub struct SophieOutput<B: Backend> {
    pub adversarial_loss: Tensor<B, 1>,    // [1]
    pub reconstruction_loss: Tensor<B, 1>, // [1]
    pub predictions: Tensor<B, 3>,         // [B, pred_length, output_size]
    pub probabilities: Tensor<B, 1>,       // [2B], discriminator output
    pub labels: Tensor<B, 1>,              // [2B], shuffled along with the trajectories
}

#[derive(Module, Debug)]
pub struct SophieModel<B: Backend> {
    obs_length: usize,
    pred_length: usize,
    d_coords: usize,
    enc_hidden_size: usize,
    nb_neighbors_max: usize,
    encoder: SequenceEncoder<B>,
    social_attention: SocialAttention<B>,
    generator: TrajectoryGenerator<B>,
    discriminator: TrajectoryDiscriminator<B>,
}

impl<B: Backend> SophieModel<B> {
    fn check_scene(&self, x: &Tensor<B, 4>) -> crate::error::Result<()> {
        let [_, nb_agents, seq_len, d_coords] = x.dims();
        if nb_agents == 0
            || nb_agents - 1 > self.nb_neighbors_max
            || seq_len < self.obs_length
            || d_coords != self.d_coords
        {
            return Err(SophieError::dims(
                "scene",
                format!(
                    "[B, 1..={}, >={}, {}]",
                    self.nb_neighbors_max + 1,
                    self.obs_length,
                    self.d_coords
                ),
                &x.dims(),
            ));
        }
        Ok(())
    }

    /// Encodes every agent and builds the distance-sorted social features
    /// `[B, nb_neighbors_max, H]` together with their mask `[B, 1, nb_neighbors_max]`.
    pub fn social_context(
        &self,
        x: &Tensor<B, 4>,
    ) -> crate::error::Result<(SceneLayout, Tensor<B, 3>, Tensor<B, 3>)> {
        self.check_scene(x)?;
        ensure_finite(x.clone(), "scene")?;
        let [batch_size, nb_agents, seq_len, d_coords] = x.dims();

        let layout = SceneLayout::from_tensor(x);

        let hidden = self
            .encoder
            .forward(x.clone().reshape([batch_size * nb_agents, seq_len, d_coords]), &layout.lengths)?
            .reshape([batch_size, nb_agents, self.enc_hidden_size]);

        let features = layout.social_features(hidden, self.nb_neighbors_max);
        let mask = layout.mask_tensor(self.nb_neighbors_max);

        Ok((layout, features, mask))
    }

    /// Samples a forecast for the primary agent of every scene,
    /// `[B, pred_length, output_size]`.
    pub fn predict<R: Rng>(&self, x: Tensor<B, 4>, rng: &mut R) -> crate::error::Result<Tensor<B, 3>> {
        let batch_size = x.dims()[0];
        let (_, features, mask) = self.social_context(&x)?;

        let noise = self.generator.sample_noise(batch_size, rng);
        let state = self.generator.init_state(batch_size, rng);
        let generated =
            self.generator
                .forward(&self.social_attention, features, Some(mask), noise, state)?;

        ensure_finite(generated.positions.clone(), "predictions")?;

        Ok(generated.positions)
    }

    /// Full adversarial pass. `x` is the scene `[B, N, S, I]`, `y` the future
    /// of every agent `[B, N', pred_length, I]` of which slot 0 is used.
    pub fn forward<R: Rng>(
        &self,
        x: Tensor<B, 4>,
        y: Tensor<B, 4>,
        rng: &mut R,
    ) -> crate::error::Result<SophieOutput<B>> {
        let [batch_size, _, _, d_coords] = x.dims();
        let [y_batch, y_agents, y_len, y_coords] = y.dims();
        if y_batch != batch_size || y_agents == 0 || y_len != self.pred_length || y_coords != self.d_coords {
            return Err(SophieError::dims(
                "ground truth",
                format!("[{batch_size}, N, {}, {}]", self.pred_length, self.d_coords),
                &y.dims(),
            ));
        }

        let predictions = self.predict(x.clone(), rng)?;

        let observations: Tensor<B, 3> = x
            .slice([0..batch_size, 0..1, 0..self.obs_length, 0..d_coords])
            .reshape([batch_size, self.obs_length, d_coords]);
        let ground_truth: Tensor<B, 3> = y
            .slice([0..batch_size, 0..1, 0..self.pred_length, 0..d_coords])
            .reshape([batch_size, self.pred_length, d_coords]);

        let (trajectories, labels) = adversarial_batch(
            observations,
            predictions.clone(),
            ground_truth.clone(),
            rng,
        );

        let probabilities = self.discriminator.forward(trajectories)?;
        let adversarial_loss = binary_cross_entropy(probabilities.clone(), labels.clone());
        let reconstruction_loss = reconstruction_loss(predictions.clone(), ground_truth);

        ensure_finite(adversarial_loss.clone(), "adversarial loss")?;
        ensure_finite(reconstruction_loss.clone(), "reconstruction loss")?;

        debug!(batch_size, "sophie forward pass complete");

        Ok(SophieOutput {
            adversarial_loss,
            reconstruction_loss,
            predictions,
            probabilities,
            labels,
        })
    }
}

/// Stacks generated (label 0) and real (label 1) trajectories, both prefixed
/// with the observations, and shuffles them jointly.
/// Returns `[2B, obs + pred, I]` trajectories and `[2B]` labels.
pub fn adversarial_batch<B: Backend, R: Rng>(
    observations: Tensor<B, 3>,
    predicted: Tensor<B, 3>,
    ground_truth: Tensor<B, 3>,
    rng: &mut R,
) -> (Tensor<B, 3>, Tensor<B, 1>) {
    let [batch_size, _, _] = observations.dims();

    let fake = Tensor::cat(vec![observations.clone(), predicted], 1);
    let real = Tensor::cat(vec![observations, ground_truth], 1);

    let trajectories = Tensor::cat(vec![fake, real], 0);
    let labels = Tensor::cat(vec![Tensor::zeros([batch_size]), Tensor::ones([batch_size])], 0);

    let mut permutation: Vec<usize> = (0..2 * batch_size).collect();
    permutation.shuffle(rng);
    let permutation = index_tensor(&permutation);

    (
        trajectories.select(0, permutation.clone()),
        labels.select(0, permutation),
    )
}

#[derive(Config, Debug)]
pub struct SophieModelConfig {
    #[config(default = 2)]
    enc_input_size: usize,

    #[config(default = 32)]
    enc_hidden_size: usize,

    #[config(default = 1)]
    enc_num_layers: usize,

    #[config(default = 16)]
    embedding_size: usize,

    #[config(default = 32)]
    dec_hidden_size: usize,

    #[config(default = 51)]
    nb_neighbors_max: usize,

    #[config(default = 16)]
    social_features_embedding_size: usize,

    #[config(default = 8)]
    gaussian_dim: usize,

    #[config(default = 2)]
    output_size: usize,

    #[config(default = 12)]
    pred_length: usize,

    #[config(default = 8)]
    obs_length: usize,

    #[config(default = 64)]
    disc_hidden_size: usize,

    #[config(default = "vec![64, 128, 64]")]
    attention_layers: Vec<usize>,
}

impl SophieModelConfig {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.output_size != self.enc_input_size {
            return Err(SophieError::InvalidConfig(format!(
                "output_size ({}) must match enc_input_size ({}) to extend observed trajectories",
                self.output_size, self.enc_input_size
            )));
        }

        let sizes = [
            ("enc_input_size", self.enc_input_size),
            ("enc_hidden_size", self.enc_hidden_size),
            ("enc_num_layers", self.enc_num_layers),
            ("embedding_size", self.embedding_size),
            ("dec_hidden_size", self.dec_hidden_size),
            ("nb_neighbors_max", self.nb_neighbors_max),
            ("social_features_embedding_size", self.social_features_embedding_size),
            ("gaussian_dim", self.gaussian_dim),
            ("pred_length", self.pred_length),
            ("obs_length", self.obs_length),
            ("disc_hidden_size", self.disc_hidden_size),
        ];
        match sizes.iter().find(|(_, size)| *size == 0) {
            Some((name, _)) => Err(SophieError::InvalidConfig(format!("{name} must be positive"))),
            None => Ok(()),
        }
    }

    pub fn init<B: Backend>(&self) -> crate::error::Result<SophieModel<B>> {
        self.validate()?;

        let encoder = SequenceEncoderConfig::new()
            .with_d_input(self.enc_input_size)
            .with_d_embedding(self.embedding_size)
            .with_d_hidden(self.enc_hidden_size)
            .with_num_layers(self.enc_num_layers)
            .init()?;

        let social_attention = SocialAttentionConfig::new(
            self.enc_hidden_size,
            self.social_features_embedding_size,
            self.dec_hidden_size,
            self.nb_neighbors_max,
        )
        .with_layers(self.attention_layers.clone())
        .init();

        let generator = TrajectoryGeneratorConfig::new(self.social_features_embedding_size)
            .with_d_noise(self.gaussian_dim)
            .with_d_hidden(self.dec_hidden_size)
            .with_d_output(self.output_size)
            .with_pred_length(self.pred_length)
            .init();

        let discriminator = TrajectoryDiscriminatorConfig::new(self.obs_length + self.pred_length)
            .with_d_input(self.enc_input_size)
            .with_d_embedding(self.embedding_size)
            .with_d_hidden(self.disc_hidden_size)
            .init();

        Ok(SophieModel {
            obs_length: self.obs_length,
            pred_length: self.pred_length,
            d_coords: self.enc_input_size,
            enc_hidden_size: self.enc_hidden_size,
            nb_neighbors_max: self.nb_neighbors_max,
            encoder,
            social_attention,
            generator,
            discriminator,
        })
    }
}
