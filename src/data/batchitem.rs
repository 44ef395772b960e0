use burn::tensor::{backend::Backend, Tensor};

#[derive(Clone, Debug)]
pub struct SceneBatch<B: Backend> {
    pub observed: Tensor<B, 4>, // [B, N, obs_length, 2], -1 padded
    pub future: Tensor<B, 4>,   // [B, N, pred_length, 2], -1 padded
}
