use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::InMemDataset;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::data::batchitem::SceneBatch;
use crate::models::sophie::social::PADDING;
use crate::utils::float_tensor;

/// One scene as produced by the extraction pipeline. Agent 0 is the
/// primary agent; each track holds only the points where the agent exists.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SceneItem {
    pub scene_id: String,
    pub observed: Vec<Vec<[f32; 2]>>,
    pub future: Vec<Vec<[f32; 2]>>,
}

pub struct SceneBatcher<B: Backend> {
    device: B::Device,
    nb_agents: usize,
    obs_length: usize,
    pred_length: usize,
}

impl<B: Backend> SceneBatcher<B> {
    pub fn new(device: B::Device, nb_agents: usize, obs_length: usize, pred_length: usize) -> Self {
        Self {
            device,
            nb_agents,
            obs_length,
            pred_length,
        }
    }

    /// Writes tracks into a `[nb_agents, steps, 2]` block, leaving padding
    /// wherever an agent or step is missing.
    fn fill(&self, block: &mut [f32], tracks: &[Vec<[f32; 2]>], steps: usize) {
        for (slot, track) in tracks.iter().take(self.nb_agents).enumerate() {
            for (step, point) in track.iter().take(steps).enumerate() {
                let start = (slot * steps + step) * 2;
                block[start..start + 2].copy_from_slice(point);
            }
        }
    }
}

pub fn load_from_file(filename: &str) -> Result<InMemDataset<SceneItem>, std::io::Error> {
    InMemDataset::from_json_rows(filename)
}

impl<B: Backend> Batcher<SceneItem, SceneBatch<B>> for SceneBatcher<B> {
    fn batch(&self, items: Vec<SceneItem>) -> SceneBatch<B> {
        let batch_size = items.len();
        let obs_block = self.nb_agents * self.obs_length * 2;
        let pred_block = self.nb_agents * self.pred_length * 2;

        let mut observed = vec![PADDING; batch_size * obs_block];
        let mut future = vec![PADDING; batch_size * pred_block];

        for (i, item) in items.iter().enumerate() {
            if item.observed.len() > self.nb_agents {
                warn!(
                    scene = item.scene_id.as_str(),
                    agents = item.observed.len(),
                    slots = self.nb_agents,
                    "dropping agents beyond the configured slots"
                );
            }
            if item.observed.first().map_or(true, |track| track.is_empty()) {
                warn!(scene = item.scene_id.as_str(), "scene has no primary agent");
            }

            self.fill(
                &mut observed[i * obs_block..(i + 1) * obs_block],
                &item.observed,
                self.obs_length,
            );
            self.fill(
                &mut future[i * pred_block..(i + 1) * pred_block],
                &item.future,
                self.pred_length,
            );
        }

        SceneBatch {
            observed: float_tensor::<B, 4>(
                observed,
                [batch_size, self.nb_agents, self.obs_length, 2],
            )
            .to_device(&self.device),
            future: float_tensor::<B, 4>(future, [batch_size, self.nb_agents, self.pred_length, 2])
                .to_device(&self.device),
        }
    }
}
