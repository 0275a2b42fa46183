//! モデル学習とハイパーパラメータ探索

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::{AutodiffModule, Module},
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use serde::Serialize;
use tracing::info;

use crate::config::{SelectionRule, TrainingSettings};
use crate::data::{ClickDataset, ClickItem};
use crate::ml::architecture::{ActivationFunction, Architecture};
use crate::ml::ClickNet;

/// ハイパーパラメータの組み合わせ1点
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HyperparameterPoint {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub filter_size: usize,
    pub activation: ActivationFunction,
}

impl std::fmt::Display for HyperparameterPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Learning Rate: {}, Batch Size: {}, Filter Size: {}, Activation Function: {}",
            self.learning_rate, self.batch_size, self.filter_size, self.activation
        )
    }
}

/// 1エポック分の学習指標
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
}

/// 評価結果
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
}

/// 学習済みモデルと学習記録
#[derive(Debug, Clone)]
pub struct TrainedModel<B: AutodiffBackend> {
    pub point: HyperparameterPoint,
    pub model: ClickNet<B>,
    pub history: Vec<EpochMetrics>,
    pub evaluation: Evaluation,
}

impl<B: AutodiffBackend> TrainedModel<B> {
    /// モデルの構成
    pub fn architecture(&self) -> &Architecture {
        self.model.architecture()
    }

    /// 推論用モデル（ドロップアウト無効）
    pub fn inference_model(&self) -> ClickNet<B::InnerBackend> {
        self.model.valid()
    }
}

/// バッチャー
#[derive(Clone, Debug)]
pub struct ClickBatcher {
    image_size: usize,
}

impl ClickBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct ClickBatch<B: Backend> {
    /// [batch_size, 1, size, size]
    pub images: Tensor<B, 4>,
    /// [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, ClickItem, ClickBatch<B>> for ClickBatcher {
    fn batch(&self, items: Vec<ClickItem>, device: &B::Device) -> ClickBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;
        let mut all_pixels = Vec::with_capacity(batch_size * size * size);
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in items {
            all_pixels.extend_from_slice(&item.pixels);
            targets_vec.push(item.label as i64);
        }

        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), device)
            .reshape([batch_size, 1, size, size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), device);

        ClickBatch { images, targets }
    }
}

/// データセットを順番どおりにバッチへ分割
fn batches<'a, B: Backend>(
    dataset: &'a ClickDataset,
    batch_size: usize,
    device: &B::Device,
) -> impl Iterator<Item = (ClickBatch<B>, Vec<i64>)> + 'a {
    let batcher = ClickBatcher::new(dataset.image_size());
    let device = device.clone();
    let len = Dataset::len(dataset);

    (0..len).step_by(batch_size.max(1)).map(move |start| {
        let end = (start + batch_size).min(len);
        let items: Vec<ClickItem> = (start..end).filter_map(|i| dataset.get(i)).collect();
        let labels = items.iter().map(|item| item.label as i64).collect();
        (batcher.batch(items, &device), labels)
    })
}

fn count_correct<B: Backend>(output: Tensor<B, 2>, labels: &[i64]) -> usize {
    output
        .argmax(1)
        .into_data()
        .iter::<i64>()
        .zip(labels)
        .filter(|(predicted, label)| predicted == *label)
        .count()
}

/// データセット全体で損失と精度を評価
pub fn evaluate<B: Backend>(
    model: &ClickNet<B>,
    dataset: &ClickDataset,
    batch_size: usize,
    device: &B::Device,
) -> Evaluation {
    let mut total_loss = 0.0;
    let mut correct = 0;
    let mut seen = 0;

    for (batch, labels) in batches::<B>(dataset, batch_size, device) {
        let output = model.forward_classification(batch.images, batch.targets);
        total_loss += output.loss.into_scalar().elem::<f64>() * labels.len() as f64;
        correct += count_correct(output.output, &labels);
        seen += labels.len();
    }

    let seen = seen.max(1) as f64;
    Evaluation {
        loss: total_loss / seen,
        accuracy: correct as f64 / seen,
    }
}

/// 1つのハイパーパラメータでモデルを学習
///
/// エポックごとのシャッフルは行わず、データセットの順序のまま学習します。
/// 評価は学習データそのものに対して行います。
pub fn fit<B: AutodiffBackend>(
    dataset: &ClickDataset,
    point: HyperparameterPoint,
    num_epochs: usize,
    seed: u64,
    device: &B::Device,
) -> anyhow::Result<TrainedModel<B>> {
    if dataset.is_empty() {
        anyhow::bail!("学習データが空です");
    }

    B::seed(device, seed);

    let architecture =
        Architecture::click_detector(dataset.image_size(), point.filter_size, point.activation)?;
    let mut model = ClickNet::<B>::new(&architecture, device);
    let mut optimizer = AdamConfig::new().init();

    info!("[Train] 学習を開始します: {}", point);
    info!(
        "[Train] エポック数: {}, 学習データ: {} 枚",
        num_epochs,
        dataset.len()
    );

    let mut history = Vec::with_capacity(num_epochs);
    for epoch in 1..=num_epochs {
        let mut total_loss = 0.0;
        let mut correct = 0;
        let mut seen = 0;

        for (batch, labels) in batches::<B>(dataset, point.batch_size, device) {
            let output = model.forward_classification(batch.images, batch.targets);
            total_loss += output.loss.clone().into_scalar().elem::<f64>() * labels.len() as f64;
            correct += count_correct(output.output, &labels);
            seen += labels.len();

            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(point.learning_rate, model, grads);
        }

        let metrics = EpochMetrics {
            epoch,
            loss: total_loss / seen as f64,
            accuracy: correct as f64 / seen as f64,
        };
        info!(
            "[Train] エポック {}/{} - loss: {:.4} - accuracy: {:.4}",
            epoch, num_epochs, metrics.loss, metrics.accuracy
        );
        history.push(metrics);
    }

    log_layer_summary(&model);

    let evaluation = evaluate(&model.valid(), dataset, point.batch_size, device);
    info!(
        "[Train] 学習データでの評価 - loss: {:.4} - accuracy: {:.4}",
        evaluation.loss, evaluation.accuracy
    );

    Ok(TrainedModel {
        point,
        model,
        history,
        evaluation,
    })
}

/// 層ごとの出力形状とパラメータ数をログ出力
pub fn log_layer_summary<B: Backend>(model: &ClickNet<B>) {
    let architecture = model.architecture();
    info!("[Model] {:<18} {:<16} {:>10}", "Layer", "Output Shape", "Param #");
    for ((layer, shape), params) in architecture
        .layers()
        .iter()
        .zip(architecture.output_shapes())
        .zip(architecture.parameter_counts())
    {
        info!(
            "[Model] {:<18} {:<16} {:>10}",
            layer.kind(),
            shape.to_string(),
            params
        );
    }
    info!("[Model] Total params: {}", model.num_params());
}

/// グリッド探索中の採用モデルを管理
pub struct ModelSelector<B: AutodiffBackend> {
    rule: SelectionRule,
    previous_accuracy: Option<f64>,
    retained: Option<TrainedModel<B>>,
}

impl<B: AutodiffBackend> ModelSelector<B> {
    pub fn new(rule: SelectionRule) -> Self {
        Self {
            rule,
            previous_accuracy: None,
            retained: None,
        }
    }

    /// 候補を評価し、採用した場合は `true` を返す
    ///
    /// `PreviousTrial` では直前の試行の精度と比較します（採用中のモデルではありません）。
    pub fn offer(&mut self, candidate: TrainedModel<B>) -> bool {
        let accuracy = candidate.evaluation.accuracy;
        let baseline = match self.rule {
            SelectionRule::PreviousTrial => self.previous_accuracy,
            SelectionRule::RunningMax => self
                .retained
                .as_ref()
                .map(|retained| retained.evaluation.accuracy),
        };
        self.previous_accuracy = Some(accuracy);

        let accept = match (baseline, &self.retained) {
            (_, None) => true,
            (Some(baseline), Some(_)) => accuracy > baseline,
            (None, Some(_)) => false,
        };
        if accept {
            self.retained = Some(candidate);
        }
        accept
    }

    pub fn retained(&self) -> Option<&TrainedModel<B>> {
        self.retained.as_ref()
    }

    pub fn into_retained(self) -> Option<TrainedModel<B>> {
        self.retained
    }
}

/// ハイパーパラメータのグリッド全体を学習し、採用モデルを返す
pub fn train_grid<B: AutodiffBackend>(
    dataset: &ClickDataset,
    settings: &TrainingSettings,
    device: &B::Device,
) -> anyhow::Result<TrainedModel<B>> {
    let grid = settings.grid();
    info!("[Train] ハイパーパラメータの組み合わせ: {} 通り", grid.len());

    let mut selector = ModelSelector::new(settings.selection);
    for (trial, point) in grid.into_iter().enumerate() {
        info!("[Train] 試行 {}: {}", trial + 1, point);
        let trained = fit::<B>(dataset, point, settings.num_epochs, settings.seed, device)?;
        if selector.offer(trained) {
            info!("[Train] 試行 {} を採用しました", trial + 1);
        }
    }

    let retained = selector
        .into_retained()
        .ok_or_else(|| anyhow::anyhow!("ハイパーパラメータのグリッドが空です"))?;

    info!("[Train] Accuracy: {}", retained.evaluation.accuracy);
    info!("[Train] 採用したハイパーパラメータ: {}", retained.point);
    Ok(retained)
}
