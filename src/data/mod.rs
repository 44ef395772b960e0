pub mod batchitem;
pub mod sceneitem;
