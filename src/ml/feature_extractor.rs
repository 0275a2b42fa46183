//! 学習済みモデルの切り詰めによる特徴抽出
//!
//! Flattenまでの同じ構成で新しいモデルを作り、学習済みモデルから
//! 層インデックス順に重みを一度だけコピーします。

use burn::tensor::{backend::Backend, Tensor};
use nalgebra::DMatrix;
use tracing::{debug, info};

use crate::data::ClickDataset;
use crate::ml::architecture::Architecture;
use crate::ml::ClickNet;

/// 推論時のバッチサイズ
const EXTRACTION_BATCH_SIZE: usize = 64;

/// Flattenまでの切り詰めモデル
#[derive(Debug, Clone)]
pub struct TruncatedModel<B: Backend> {
    model: ClickNet<B>,
}

impl<B: Backend> TruncatedModel<B> {
    /// 学習済みモデルから切り詰めモデルを作成
    pub fn from_trained(trained: &ClickNet<B>, device: &B::Device) -> anyhow::Result<Self> {
        Self::with_architecture(&trained.architecture().feature_prefix(), trained, device)
    }

    /// 指定した構成で切り詰めモデルを作成
    ///
    /// 構成が学習済みモデルの先頭部分と一致しない場合は重みをコピーせずにエラーを返します。
    pub fn with_architecture(
        architecture: &Architecture,
        trained: &ClickNet<B>,
        device: &B::Device,
    ) -> anyhow::Result<Self> {
        let model = ClickNet::new(architecture, device).load_prefix_from(trained)?;
        info!(
            "[Model] 切り詰めモデルを作成しました: {} 層, 特徴次元 {}",
            architecture.layers().len(),
            architecture.feature_width()
        );
        Ok(Self { model })
    }

    pub fn architecture(&self) -> &Architecture {
        self.model.architecture()
    }

    /// 特徴次元 F
    pub fn feature_width(&self) -> usize {
        self.architecture().feature_width()
    }

    /// バッチの特徴量 [batch_size, F]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.model.forward(images)
    }

    /// データセット全体の特徴行列 (N, F) を抽出
    pub fn extract_features(
        &self,
        dataset: &ClickDataset,
        device: &B::Device,
    ) -> anyhow::Result<DMatrix<f64>> {
        let size = dataset.image_size();
        if size != self.architecture().image_size() {
            anyhow::bail!(
                "画像サイズ {} がモデルの入力サイズ {} と一致しません",
                size,
                self.architecture().image_size()
            );
        }

        let width = self.feature_width();
        let mut values: Vec<f64> = Vec::with_capacity(dataset.len() * width);

        for chunk in dataset.images().chunks(EXTRACTION_BATCH_SIZE) {
            let pixels: Vec<f32> = chunk
                .iter()
                .flat_map(|image| image.pixels.iter().copied())
                .collect();
            let images = Tensor::<B, 1>::from_floats(pixels.as_slice(), device)
                .reshape([chunk.len(), 1, size, size]);

            let features = self.forward(images);
            values.extend(features.into_data().iter::<f64>());
        }

        let matrix = DMatrix::from_row_slice(dataset.len(), width, &values);
        info!(
            "[Model] 特徴量を抽出しました: ({}, {})",
            matrix.nrows(),
            matrix.ncols()
        );
        debug!("[Model] 特徴量: {}", matrix);
        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DatasetRole, LabeledImage};
    use crate::ml::architecture::{ActivationFunction, LayerSpec};
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn dataset(size: usize, count: usize) -> ClickDataset {
        let images = (0..count)
            .map(|i| LabeledImage {
                pixels: (0..size * size)
                    .map(|p| ((p + i * 7) % 13) as f32 / 13.0)
                    .collect(),
                label: if i % 2 == 0 { [1.0, 0.0] } else { [0.0, 1.0] },
            })
            .collect();
        let names = (0..count).map(|i| format!("Click{}.png", i)).collect();
        ClickDataset::from_images(DatasetRole::Training, size, images, names).unwrap()
    }

    #[test]
    fn test_extract_features_shape() {
        let device = Default::default();
        let arch = Architecture::click_detector(64, 5, ActivationFunction::Sigmoid).unwrap();
        let trained = ClickNet::<TestBackend>::new(&arch, &device);
        let truncated = TruncatedModel::from_trained(&trained, &device).unwrap();

        let features = truncated.extract_features(&dataset(64, 70), &device).unwrap();
        assert_eq!(features.shape(), (70, 80));
    }

    #[test]
    fn test_extract_features_is_deterministic() {
        let device = Default::default();
        let arch = Architecture::click_detector(32, 3, ActivationFunction::Relu).unwrap();
        let trained = ClickNet::<TestBackend>::new(&arch, &device);
        let data = dataset(32, 5);

        let a = TruncatedModel::from_trained(&trained, &device)
            .unwrap()
            .extract_features(&data, &device)
            .unwrap();
        let b = TruncatedModel::from_trained(&trained, &device)
            .unwrap()
            .extract_features(&data, &device)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_layer_mismatch_is_error() {
        let device = Default::default();
        let arch = Architecture::click_detector(32, 3, ActivationFunction::Relu).unwrap();
        let trained = ClickNet::<TestBackend>::new(&arch, &device);
        let wrong = Architecture::new(
            32,
            3,
            ActivationFunction::Relu,
            vec![
                LayerSpec::Conv { filters: 16 },
                LayerSpec::MaxPool { window: 5 },
                LayerSpec::Flatten,
            ],
        )
        .unwrap();

        let err = TruncatedModel::with_architecture(&wrong, &trained, &device).unwrap_err();
        assert!(err.to_string().contains("層の不一致"));
    }
}
