pub mod attention;
pub mod discriminator;
pub mod encoder;
pub mod generator;
pub mod model;
pub mod social;

pub use model::{SophieModel, SophieModelConfig, SophieOutput};
