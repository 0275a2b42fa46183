// Click / No Click 画像分類と特徴量の可視化
pub mod config;
pub mod data;
pub mod embedding;
pub mod ml;
pub mod pipeline;
pub mod plot;

pub use config::{DeviceType, PipelineConfig};
pub use pipeline::{run, PipelineReport};
