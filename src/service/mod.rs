//! Service layer module

pub mod pipeline;
pub mod types;
pub mod worker;

pub use pipeline::PredictionPipeline;
pub use types::*;
pub use worker::PredictionWorker;
