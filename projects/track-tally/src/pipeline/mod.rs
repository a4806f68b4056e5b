// Frame sampling, detection/tracking and aggregation

pub mod annotate;
pub mod detection;
pub mod ledger;
pub mod orchestrator;
pub mod preprocess;
pub mod progress;
pub mod sampler;
pub mod tracker;
pub mod types;
