//! モデル推論機能

use burn::tensor::{backend::Backend, Tensor};

use crate::data::ClickDataset;
use crate::ml::{ClickNet, CLASS_NAMES};

/// 1枚分の予測結果
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub file_name: String,
    pub class_index: usize,
    pub probabilities: [f32; 2],
}

impl Prediction {
    /// クラス名（0 = "Click", 1 = "No Click"）
    pub fn class_name(&self) -> &'static str {
        CLASS_NAMES[self.class_index.min(CLASS_NAMES.len() - 1)]
    }
}

/// 推論エンジン
pub struct InferenceEngine<'a, B: Backend> {
    model: &'a ClickNet<B>,
    device: B::Device,
}

impl<'a, B: Backend> InferenceEngine<'a, B> {
    pub fn new(model: &'a ClickNet<B>, device: &B::Device) -> Self {
        Self {
            model,
            device: device.clone(),
        }
    }

    /// 1枚の画像を分類
    pub fn classify_pixels(&self, pixels: &[f32], image_size: usize) -> Prediction {
        let images = Tensor::<B, 1>::from_floats(pixels, &self.device)
            .reshape([1, 1, image_size, image_size]);
        let probabilities: Vec<f32> = self
            .model
            .predict_proba(images)
            .into_data()
            .iter::<f32>()
            .collect();

        let probabilities = [
            probabilities.first().copied().unwrap_or(0.0),
            probabilities.get(1).copied().unwrap_or(0.0),
        ];
        Prediction {
            file_name: String::new(),
            class_index: argmax(&probabilities),
            probabilities,
        }
    }

    /// データセットの全画像を分類
    pub fn classify_dataset(&self, dataset: &ClickDataset) -> Vec<Prediction> {
        dataset
            .images()
            .iter()
            .zip(dataset.file_names())
            .map(|(image, file_name)| Prediction {
                file_name: file_name.clone(),
                ..self.classify_pixels(&image.pixels, dataset.image_size())
            })
            .collect()
    }
}

fn argmax(probabilities: &[f32; 2]) -> usize {
    // 同値の場合は先頭を優先
    if probabilities[1] > probabilities[0] {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DatasetRole, LabeledImage};
    use crate::ml::architecture::{ActivationFunction, Architecture};
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_class_name() {
        let prediction = Prediction {
            file_name: "Click1.png".to_string(),
            class_index: 0,
            probabilities: [0.8, 0.2],
        };
        assert_eq!(prediction.class_name(), "Click");
        assert_eq!(
            Prediction {
                class_index: 1,
                ..prediction
            }
            .class_name(),
            "No Click"
        );
    }

    #[test]
    fn test_classify_dataset_keeps_order() {
        let device = Default::default();
        let arch = Architecture::click_detector(16, 3, ActivationFunction::Relu).unwrap();
        let model = ClickNet::<TestBackend>::new(&arch, &device);
        let images = vec![
            LabeledImage {
                pixels: vec![0.0; 256],
                label: [1.0, 0.0],
            },
            LabeledImage {
                pixels: vec![1.0; 256],
                label: [0.0, 1.0],
            },
        ];
        let dataset = ClickDataset::from_images(
            DatasetRole::Testing,
            16,
            images,
            vec!["a.png".to_string(), "b.png".to_string()],
        )
        .unwrap();

        let predictions = InferenceEngine::new(&model, &device).classify_dataset(&dataset);

        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].file_name, "a.png");
        assert_eq!(predictions[1].file_name, "b.png");
        for prediction in &predictions {
            let sum: f32 = prediction.probabilities.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
            assert_eq!(prediction.class_index, argmax(&prediction.probabilities));
        }
    }
}
