pub mod architecture;
pub mod feature_extractor;
pub mod inference;
pub mod ml_model;
pub mod training;

pub use architecture::{ActivationFunction, Architecture, LayerShape, LayerSpec, CLASS_NAMES, NUM_CLASSES};
pub use feature_extractor::TruncatedModel;
pub use inference::{InferenceEngine, Prediction};
pub use ml_model::ClickNet;
pub use training::{
    evaluate, fit, train_grid, ClickBatch, ClickBatcher, EpochMetrics, Evaluation,
    HyperparameterPoint, ModelSelector, TrainedModel,
};
