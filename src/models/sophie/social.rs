use burn::tensor::{backend::Backend, Tensor};
use tracing::{debug, warn};

use crate::utils::{descending_order, float_tensor, host_values, index_tensor};

/// Coordinate value marking an absent agent or an unused timestep.
pub const PADDING: f32 = -1.0;

/// Host-side bookkeeping for one scene batch `[B, N, S, I]`.
///
/// Sequences are addressed by their flat row `b * N + n`, slot 0 of every
/// sample being the primary agent.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneLayout {
    batch_size: usize,
    nb_agents: usize,
    /// Present agents per sample, primary included.
    pub agent_counts: Vec<usize>,
    /// Unpadded length of every sequence, floored at one step.
    pub lengths: Vec<usize>,
    /// Per sample, the neighbor slots (never slot 0) ordered by distance to
    /// the primary agent; absent neighbors come last.
    pub neighbor_order: Vec<Vec<usize>>,
    /// Distance of each ordered neighbor, `f32::INFINITY` when absent.
    pub neighbor_distances: Vec<Vec<f32>>,
    present: Vec<bool>,
}

impl SceneLayout {
    pub fn from_tensor<B: Backend>(x: &Tensor<B, 4>) -> Self {
        Self::from_values(&host_values(x.clone()), x.dims())
    }

    pub fn from_values(values: &[f32], dims: [usize; 4]) -> Self {
        let [batch_size, nb_agents, seq_len, n_coords] = dims;
        if nb_agents == 0 {
            warn!(batch_size, "scene batch has no agent slots");
            return SceneLayout {
                batch_size,
                nb_agents,
                agent_counts: vec![0; batch_size],
                lengths: Vec::new(),
                neighbor_order: vec![Vec::new(); batch_size],
                neighbor_distances: vec![Vec::new(); batch_size],
                present: Vec::new(),
            };
        }

        let point = move |row: usize, step: usize| {
            let start = (row * seq_len + step) * n_coords;
            &values[start..start + n_coords]
        };

        let present: Vec<bool> = (0..batch_size * nb_agents)
            .map(|row| point(row, 0)[0] != PADDING)
            .collect();

        let lengths: Vec<usize> = (0..batch_size * nb_agents)
            .map(|row| {
                let unpadded = (0..seq_len)
                    .filter(|&step| point(row, step)[0] != PADDING)
                    .count();
                unpadded.max(1)
            })
            .collect();

        let agent_counts: Vec<usize> = present
            .chunks(nb_agents)
            .map(|sample| sample.iter().filter(|&&p| p).count())
            .collect();

        let mut neighbor_order = Vec::with_capacity(batch_size);
        let mut neighbor_distances = Vec::with_capacity(batch_size);

        for sample in 0..batch_size {
            let row = |slot: usize| sample * nb_agents + slot;
            let primary_row = row(0);
            if !present[primary_row] {
                warn!(sample, "scene sample has no primary agent");
            }

            let reference = point(primary_row, lengths[primary_row] - 1);
            let mut ranked: Vec<(usize, f32)> = (1..nb_agents)
                .map(|slot| {
                    let r = row(slot);
                    if !present[r] {
                        return (slot, f32::INFINITY);
                    }
                    let last = point(r, lengths[r] - 1);
                    let squared: f32 = last
                        .iter()
                        .zip(reference)
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum();
                    (slot, squared.sqrt())
                })
                .collect();
            ranked.sort_by(|a, b| a.1.total_cmp(&b.1));

            neighbor_order.push(ranked.iter().map(|(slot, _)| *slot).collect());
            neighbor_distances.push(ranked.into_iter().map(|(_, d)| d).collect());
        }

        debug!(?agent_counts, ?lengths, "scene layout");

        SceneLayout {
            batch_size,
            nb_agents,
            agent_counts,
            lengths,
            neighbor_order,
            neighbor_distances,
            present,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn nb_agents(&self) -> usize {
        self.nb_agents
    }

    /// Sequence rows ordered by descending length, as consumed by the encoder.
    pub fn sorted_order(&self) -> Vec<usize> {
        descending_order(&self.lengths)
    }

    /// Present neighbors of a sample. Equals `agent_counts[sample] - 1`
    /// whenever the primary agent is present.
    pub fn present_neighbors(&self, sample: usize) -> usize {
        if self.nb_agents == 0 {
            return 0;
        }
        let row = sample * self.nb_agents;
        self.present[row + 1..row + self.nb_agents]
            .iter()
            .filter(|&&p| p)
            .count()
    }

    /// Flat `[B * nb_weights]` 0/1 mask, leading ones for present neighbors.
    pub fn validity_mask(&self, nb_weights: usize) -> Vec<f32> {
        (0..self.batch_size)
            .flat_map(|sample| {
                let ones = self.present_neighbors(sample).min(nb_weights);
                (0..nb_weights).map(move |slot| if slot < ones { 1.0 } else { 0.0 })
            })
            .collect()
    }

    /// Mask shaped `[B, 1, nb_weights]` to multiply attention weights with.
    pub fn mask_tensor<B: Backend>(&self, nb_weights: usize) -> Tensor<B, 3> {
        float_tensor(
            self.validity_mask(nb_weights),
            [self.batch_size, 1, nb_weights],
        )
    }

    /// Neighbor hidden states relative to the primary agent's, in neighbor
    /// order and zero-padded to `nb_slots` rows: `[B, N, H]` -> `[B, nb_slots, H]`.
    pub fn social_features<B: Backend>(&self, hidden: Tensor<B, 3>, nb_slots: usize) -> Tensor<B, 3> {
        let [batch_size, nb_agents, d_hidden] = hidden.dims();
        let nb_neighbors = nb_agents.saturating_sub(1);

        if nb_neighbors == 0 {
            return Tensor::zeros([batch_size, nb_slots, d_hidden]);
        }

        let neighbor_rows: Vec<usize> = self
            .neighbor_order
            .iter()
            .enumerate()
            .flat_map(|(sample, slots)| slots.iter().map(move |slot| sample * nb_agents + slot))
            .collect();
        let primary_rows: Vec<usize> = (0..batch_size)
            .flat_map(|sample| std::iter::repeat(sample * nb_agents).take(nb_neighbors))
            .collect();

        let flat = hidden.reshape([batch_size * nb_agents, d_hidden]);
        let neighbors = flat.clone().select(0, index_tensor(&neighbor_rows));
        let primary = flat.select(0, index_tensor(&primary_rows));
        let features = (neighbors - primary).reshape([batch_size, nb_neighbors, d_hidden]);

        if nb_neighbors < nb_slots {
            let padding = Tensor::zeros([batch_size, nb_slots - nb_neighbors, d_hidden]);
            Tensor::cat(vec![features, padding], 1)
        } else {
            features
        }
    }
}
