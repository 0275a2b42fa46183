//! パイプライン設定管理モジュール
//!
//! データディレクトリ、ハイパーパラメータのグリッド、次元削減、出力先の設定を
//! JSON形式で保存・読み込みします。

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::ml::{ActivationFunction, HyperparameterPoint};

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// グリッド探索で採用するモデルの選び方
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionRule {
    /// 直前の試行より精度が高い場合のみ更新する
    #[default]
    PreviousTrial,
    /// それまでの最高精度を上回った場合に更新する
    RunningMax,
}

/// t-SNEの初期配置
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TsneInit {
    /// PCAの第1・第2主成分から開始
    #[default]
    Pca,
    /// シード付き正規乱数から開始
    Random,
}

/// データセット設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    /// 学習データのディレクトリ
    pub training_dir: PathBuf,
    /// テストデータのディレクトリ
    pub testing_dir: PathBuf,
    /// 誤検出データのディレクトリ
    pub false_positive_dir: PathBuf,
    /// 入力画像サイズ（正方形）
    pub image_size: usize,
    /// 学習データのシャッフル用シード
    pub shuffle_seed: u64,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            training_dir: PathBuf::from("Training Folder"),
            testing_dir: PathBuf::from("Testing Folder"),
            false_positive_dir: PathBuf::from("False Positive Folder"),
            image_size: 64,
            shuffle_seed: 1,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// 学習率の候補
    pub learning_rates: Vec<f64>,
    /// バッチサイズの候補
    pub batch_sizes: Vec<usize>,
    /// 畳み込みカーネルサイズの候補（奇数のみ）
    pub filter_sizes: Vec<usize>,
    /// 活性化関数の候補
    pub activations: Vec<ActivationFunction>,
    /// エポック数
    pub num_epochs: usize,
    /// 重み初期化・ドロップアウト用シード
    pub seed: u64,
    /// モデル選択ルール
    pub selection: SelectionRule,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            learning_rates: vec![1e-3],
            batch_sizes: vec![64],
            filter_sizes: vec![5],
            activations: vec![ActivationFunction::Sigmoid],
            num_epochs: 50,
            seed: 1,
            selection: SelectionRule::PreviousTrial,
        }
    }
}

impl TrainingSettings {
    /// ハイパーパラメータの全組み合わせ
    ///
    /// 活性化関数 → バッチサイズ → 学習率 → フィルタサイズ の順にネストします。
    pub fn grid(&self) -> Vec<HyperparameterPoint> {
        let mut points = Vec::with_capacity(
            self.activations.len()
                * self.batch_sizes.len()
                * self.learning_rates.len()
                * self.filter_sizes.len(),
        );
        for &activation in &self.activations {
            for &batch_size in &self.batch_sizes {
                for &learning_rate in &self.learning_rates {
                    for &filter_size in &self.filter_sizes {
                        points.push(HyperparameterPoint {
                            learning_rate,
                            batch_size,
                            filter_size,
                            activation,
                        });
                    }
                }
            }
        }
        points
    }
}

/// 次元削減設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// 寄与率を確認するPCA次元の一覧
    pub pca_sweep: Vec<usize>,
    /// t-SNEに渡すPCA次元
    pub pca_components: usize,
    /// t-SNEの出力次元
    pub tsne_components: usize,
    /// t-SNEのパープレキシティ
    pub perplexity: f64,
    /// t-SNEの反復回数
    pub tsne_iterations: usize,
    /// t-SNEの初期配置
    pub tsne_init: TsneInit,
    /// t-SNEの乱数シード
    pub seed: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            pca_sweep: vec![1, 2, 3, 4, 5, 10, 20, 50],
            pca_components: 20,
            tsne_components: 2,
            perplexity: 30.0,
            tsne_iterations: 1000,
            tsne_init: TsneInit::Pca,
            seed: 1,
        }
    }
}

/// 出力設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// 学習曲線の保存先
    pub training_curve_path: PathBuf,
    /// ネットワーク構成図の保存先（既存の場合は上書きしない）
    pub architecture_path: PathBuf,
    /// t-SNE散布図の保存先
    pub scatter_path: PathBuf,
    /// テストデータの予測一覧の保存先
    pub testing_grid_path: PathBuf,
    /// 誤検出データの予測一覧の保存先
    pub false_positive_grid_path: PathBuf,
    /// 予測一覧に表示する範囲の開始位置
    pub preview_start: usize,
    /// 予測一覧に表示する範囲の終了位置（この位置は含まない）
    pub preview_end: usize,
    /// 予測一覧の行数
    pub grid_rows: usize,
    /// 予測一覧の列数
    pub grid_cols: usize,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            training_curve_path: PathBuf::from("ModelTraining.png"),
            architecture_path: PathBuf::from("model.png"),
            scatter_path: PathBuf::from("tSNE.png"),
            testing_grid_path: PathBuf::from("TestingPredictions.png"),
            false_positive_grid_path: PathBuf::from("FalsePositivePredictions.png"),
            preview_start: 10,
            preview_end: 40,
            grid_rows: 6,
            grid_cols: 5,
        }
    }
}

/// パイプライン全体の設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// データセット設定
    pub data: DataSettings,
    /// トレーニング設定
    pub training: TrainingSettings,
    /// 次元削減設定
    pub embedding: EmbeddingSettings,
    /// 出力設定
    pub output: OutputSettings,
}

impl PipelineConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("設定ファイルを開けません: {}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&content)
            .with_context(|| format!("設定ファイルの形式が不正です: {}", path.display()))?;
        Ok(config)
    }

    /// デフォルトパスから設定を読み込む、存在しない場合はデフォルト設定を返す
    pub fn load_or_default() -> Self {
        Self::load_or_default_from(Self::default_path())
    }

    /// 指定パスから設定を読み込む、存在しない・読めない場合はデフォルト設定を返す
    pub fn load_or_default_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("設定ファイルが存在しません。デフォルト設定を使用します");
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => {
                info!("設定ファイルを読み込みました: {}", path.display());
                config
            }
            Err(e) => {
                warn!("設定ファイルの読み込みに失敗しました ({}): {:#}", path.display(), e);
                warn!("デフォルト設定を使用します");
                Self::default()
            }
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 学習開始前に設定の整合性を検証
    pub fn validate(&self) -> anyhow::Result<()> {
        let training = &self.training;
        if self.data.image_size == 0 {
            bail!("画像サイズは1以上である必要があります");
        }
        if training.learning_rates.is_empty()
            || training.batch_sizes.is_empty()
            || training.filter_sizes.is_empty()
            || training.activations.is_empty()
        {
            bail!("ハイパーパラメータのグリッドが空です");
        }
        if let Some(lr) = training.learning_rates.iter().find(|lr| !(**lr > 0.0)) {
            bail!("学習率は正の値である必要があります: {}", lr);
        }
        if training.batch_sizes.contains(&0) {
            bail!("バッチサイズは1以上である必要があります");
        }
        if let Some(size) = training.filter_sizes.iter().find(|s| **s == 0 || **s % 2 == 0) {
            bail!(
                "フィルタサイズは正の奇数である必要があります: {} (sameパディングは対称のみ対応)",
                size
            );
        }
        if training.num_epochs == 0 {
            bail!("エポック数は1以上である必要があります");
        }
        let embedding = &self.embedding;
        if embedding.pca_components == 0 || embedding.pca_sweep.contains(&0) {
            bail!("PCAの次元数は1以上である必要があります");
        }
        if embedding.tsne_components == 0 {
            bail!("t-SNEの出力次元は1以上である必要があります");
        }
        if !(embedding.perplexity > 0.0) {
            bail!("パープレキシティは正の値である必要があります: {}", embedding.perplexity);
        }
        let output = &self.output;
        if output.preview_start > output.preview_end {
            bail!(
                "予測一覧の範囲が不正です: {}..{}",
                output.preview_start,
                output.preview_end
            );
        }
        if output.grid_rows == 0 || output.grid_cols == 0 {
            bail!("予測一覧の行数・列数は1以上である必要があります");
        }
        Ok(())
    }

    /// 設定情報を表示
    pub fn display(&self) {
        info!("=== パイプライン設定 ===");
        info!("計算デバイス: {}", self.device_type);
        info!("学習データ: {}", self.data.training_dir.display());
        info!("テストデータ: {}", self.data.testing_dir.display());
        info!("誤検出データ: {}", self.data.false_positive_dir.display());
        info!("画像サイズ: {}x{}", self.data.image_size, self.data.image_size);
        info!("--- トレーニング設定 ---");
        info!("学習率: {:?}", self.training.learning_rates);
        info!("バッチサイズ: {:?}", self.training.batch_sizes);
        info!("フィルタサイズ: {:?}", self.training.filter_sizes);
        info!("活性化関数: {:?}", self.training.activations);
        info!("エポック数: {}", self.training.num_epochs);
        info!("シード: {}", self.training.seed);
        info!("--- 次元削減設定 ---");
        info!("PCA次元（確認用）: {:?}", self.embedding.pca_sweep);
        info!("PCA次元: {}", self.embedding.pca_components);
        info!("t-SNE出力次元: {}", self.embedding.tsne_components);
        info!("========================");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.device_type, DeviceType::Cpu);
        assert_eq!(config.data.image_size, 64);
        assert_eq!(config.training.num_epochs, 50);
        assert_eq!(config.training.learning_rates, vec![1e-3]);
        assert_eq!(config.training.batch_sizes, vec![64]);
        assert_eq!(config.training.filter_sizes, vec![5]);
        assert_eq!(config.training.activations, vec![ActivationFunction::Sigmoid]);
        assert_eq!(config.embedding.pca_sweep, vec![1, 2, 3, 4, 5, 10, 20, 50]);
        assert_eq!(config.embedding.pca_components, 20);
        assert_eq!(config.embedding.tsne_components, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = PipelineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: PipelineConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.device_type, deserialized.device_type);
        assert_eq!(config.training.activations, deserialized.training.activations);
        assert_eq!(config.output.preview_end, deserialized.output.preview_end);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "device_type": "wgpu", "training": { "num_epochs": 3, "activations": ["relu"] } }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.device_type, DeviceType::Wgpu);
        assert_eq!(config.training.num_epochs, 3);
        assert_eq!(config.training.activations, vec![ActivationFunction::Relu]);
        assert_eq!(config.training.batch_sizes, vec![64]);
        assert_eq!(config.data.training_dir, PathBuf::from("Training Folder"));
    }

    #[test]
    fn test_grid_order_matches_nested_loops() {
        let settings = TrainingSettings {
            learning_rates: vec![1e-4, 1e-3],
            batch_sizes: vec![64, 128],
            filter_sizes: vec![3, 5],
            activations: vec![ActivationFunction::Relu, ActivationFunction::Sigmoid],
            ..TrainingSettings::default()
        };
        let grid = settings.grid();

        assert_eq!(grid.len(), 16);
        assert_eq!(grid[0].activation, ActivationFunction::Relu);
        assert_eq!(grid[0].filter_size, 3);
        assert_eq!(grid[1].filter_size, 5);
        assert_eq!(grid[2].learning_rate, 1e-3);
        assert_eq!(grid[4].batch_size, 128);
        assert_eq!(grid[8].activation, ActivationFunction::Sigmoid);
    }

    #[test]
    fn test_even_filter_size_is_rejected() {
        let mut config = PipelineConfig::default();
        config.training.filter_sizes = vec![4];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("奇数"));
    }

    #[test]
    fn test_empty_grid_is_rejected() {
        let mut config = PipelineConfig::default();
        config.training.learning_rates.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_broken_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let config = PipelineConfig::load_or_default_from(&path);
        assert_eq!(config.training.num_epochs, 50);
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }
}
