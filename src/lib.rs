pub mod data;
pub mod error;
pub mod models;
pub mod modules;
pub mod utils;

pub use error::{Result, SophieError};
