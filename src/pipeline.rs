//! 学習から可視化までの一連の処理

use burn::tensor::backend::AutodiffBackend;
use tracing::info;

use crate::config::PipelineConfig;
use crate::data::{assemble_all, ClickDataset};
use crate::embedding::{self, Embedding};
use crate::ml::{
    train_grid, ClickNet, Evaluation, HyperparameterPoint, InferenceEngine, Prediction,
    TruncatedModel,
};
use crate::plot;

/// パイプラインの実行結果
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub point: HyperparameterPoint,
    pub evaluation: Evaluation,
    pub embedding: Embedding,
    pub testing_predictions: Vec<Prediction>,
    pub false_positive_predictions: Vec<Prediction>,
}

/// データセットの一部を分類して予測一覧を保存
fn preview_predictions<B: burn::tensor::backend::Backend>(
    model: &ClickNet<B>,
    dataset: &ClickDataset,
    config: &PipelineConfig,
    output_path: &std::path::Path,
    device: &B::Device,
) -> anyhow::Result<Vec<Prediction>> {
    let output = &config.output;
    let preview = dataset.slice(output.preview_start..output.preview_end);
    let predictions = InferenceEngine::new(model, device).classify_dataset(&preview);

    for prediction in &predictions {
        info!(
            "[Plot] {}: {} (Click: {:.3}, No Click: {:.3})",
            prediction.file_name,
            prediction.class_name(),
            prediction.probabilities[0],
            prediction.probabilities[1]
        );
    }

    plot::plot_prediction_grid(
        &preview,
        &predictions,
        output.grid_rows,
        output.grid_cols,
        output_path,
    )?;
    Ok(predictions)
}

/// パイプライン全体を実行
pub fn run<B: AutodiffBackend>(
    config: &PipelineConfig,
    device: &B::Device,
) -> anyhow::Result<PipelineReport> {
    config.validate()?;

    let datasets = assemble_all(&config.data)?;

    let trained = train_grid::<B>(&datasets.training, &config.training, device)?;
    plot::plot_training_curves(&trained.history, &config.output.training_curve_path)?;
    plot::plot_architecture(trained.architecture(), &config.output.architecture_path)?;

    let inference = trained.inference_model();
    let truncated = TruncatedModel::from_trained(&inference, device)?;
    let features = truncated.extract_features(&datasets.training, device)?;

    let embedding = embedding::reduce(features, &config.embedding)?;
    plot::plot_embedding(
        &embedding.reduced,
        &datasets.training.class_indices(),
        &config.output.scatter_path,
    )?;

    let testing_predictions = preview_predictions(
        &inference,
        &datasets.testing,
        config,
        &config.output.testing_grid_path,
        device,
    )?;
    let false_positive_predictions = preview_predictions(
        &inference,
        &datasets.false_positive,
        config,
        &config.output.false_positive_grid_path,
        device,
    )?;

    info!("[Pipeline] 全ての処理が完了しました");
    Ok(PipelineReport {
        point: trained.point,
        evaluation: trained.evaluation,
        embedding,
        testing_predictions,
        false_positive_predictions,
    })
}
