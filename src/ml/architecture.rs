//! ネットワーク構成の記述
//!
//! 学習用のフルモデルと特徴抽出用の切り詰めモデルは、
//! どちらもこの層リストから組み立てられます。

use anyhow::bail;
use burn::nn::activation::ActivationConfig;
use serde::{Deserialize, Serialize};

/// クラス数
pub const NUM_CLASSES: usize = 2;

/// クラス名の定義（インデックス0が "Click"）
pub const CLASS_NAMES: [&str; NUM_CLASSES] = ["Click", "No Click"];

/// 畳み込み層・隠れ全結合層で使う活性化関数
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ActivationFunction {
    Relu,
    Sigmoid,
    Tanh,
}

impl ActivationFunction {
    /// burnの活性化関数設定に変換
    pub fn to_config(self) -> ActivationConfig {
        match self {
            ActivationFunction::Relu => ActivationConfig::Relu,
            ActivationFunction::Sigmoid => ActivationConfig::Sigmoid,
            ActivationFunction::Tanh => ActivationConfig::Tanh,
        }
    }
}

impl std::fmt::Display for ActivationFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivationFunction::Relu => write!(f, "relu"),
            ActivationFunction::Sigmoid => write!(f, "sigmoid"),
            ActivationFunction::Tanh => write!(f, "tanh"),
        }
    }
}

/// 1層分の記述
#[derive(Debug, Clone, PartialEq)]
pub enum LayerSpec {
    /// 畳み込み（stride 1, sameパディング, 活性化あり）
    Conv { filters: usize },
    /// 最大プーリング（stride = window, sameパディング）
    MaxPool { window: usize },
    Dropout { rate: f64 },
    Flatten,
    /// 全結合（活性化あり）
    Dense { units: usize },
    /// 出力層（softmaxは損失計算・推論側で適用）
    Output { units: usize },
}

impl LayerSpec {
    /// 層の種類名
    pub fn kind(&self) -> &'static str {
        match self {
            LayerSpec::Conv { .. } => "Conv2D",
            LayerSpec::MaxPool { .. } => "MaxPool2D",
            LayerSpec::Dropout { .. } => "Dropout",
            LayerSpec::Flatten => "Flatten",
            LayerSpec::Dense { .. } => "Dense",
            LayerSpec::Output { .. } => "Dense (softmax)",
        }
    }
}

/// 各層の出力形状（バッチ次元を除く）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerShape {
    Spatial {
        channels: usize,
        height: usize,
        width: usize,
    },
    Flat {
        features: usize,
    },
}

impl LayerShape {
    /// 要素数
    pub fn numel(&self) -> usize {
        match *self {
            LayerShape::Spatial {
                channels,
                height,
                width,
            } => channels * height * width,
            LayerShape::Flat { features } => features,
        }
    }
}

impl std::fmt::Display for LayerShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayerShape::Spatial {
                channels,
                height,
                width,
            } => write!(f, "({}, {}, {})", height, width, channels),
            LayerShape::Flat { features } => write!(f, "({})", features),
        }
    }
}

/// sameパディング（stride付き）の前後のパディング量
///
/// 必要な総パディング量の `floor(needed / 2)` を前に、残りを後ろに置きます。
/// 出力サイズは `ceil(n / stride)` になります。
pub fn same_pool_padding(size: usize, window: usize, stride: usize) -> (usize, usize) {
    let out = size.div_ceil(stride);
    let needed = ((out.saturating_sub(1)) * stride + window).saturating_sub(size);
    (needed / 2, needed - needed / 2)
}

/// sameプーリング後のサイズ
pub fn pooled_size(size: usize, stride: usize) -> usize {
    size.div_ceil(stride)
}

/// ネットワーク全体の記述
#[derive(Debug, Clone, PartialEq)]
pub struct Architecture {
    image_size: usize,
    kernel_size: usize,
    activation: ActivationFunction,
    layers: Vec<LayerSpec>,
}

impl Architecture {
    /// Click検出器の標準構成
    ///
    /// Conv(32) → Pool(5) → Conv(50) → Pool(5) → Conv(80) → Pool(5) →
    /// Dropout(0.25) → Flatten → Dense(512) → Dropout(0.5) → Dense(2)
    pub fn click_detector(
        image_size: usize,
        kernel_size: usize,
        activation: ActivationFunction,
    ) -> anyhow::Result<Self> {
        Self::new(
            image_size,
            kernel_size,
            activation,
            vec![
                LayerSpec::Conv { filters: 32 },
                LayerSpec::MaxPool { window: 5 },
                LayerSpec::Conv { filters: 50 },
                LayerSpec::MaxPool { window: 5 },
                LayerSpec::Conv { filters: 80 },
                LayerSpec::MaxPool { window: 5 },
                LayerSpec::Dropout { rate: 0.25 },
                LayerSpec::Flatten,
                LayerSpec::Dense { units: 512 },
                LayerSpec::Dropout { rate: 0.5 },
                LayerSpec::Output { units: NUM_CLASSES },
            ],
        )
    }

    /// 任意の層リストから構成を作成
    ///
    /// 空間系の層（Conv / MaxPool）はFlattenより前、全結合系の層はFlattenより後ろにのみ置けます。
    pub fn new(
        image_size: usize,
        kernel_size: usize,
        activation: ActivationFunction,
        layers: Vec<LayerSpec>,
    ) -> anyhow::Result<Self> {
        if image_size == 0 {
            bail!("入力サイズが0です");
        }
        if kernel_size == 0 || kernel_size % 2 == 0 {
            bail!(
                "カーネルサイズは正の奇数である必要があります: {}",
                kernel_size
            );
        }

        let mut flattened = false;
        for (index, layer) in layers.iter().enumerate() {
            match layer {
                LayerSpec::Conv { filters } if *filters == 0 => {
                    bail!("層{}: フィルタ数が0です", index)
                }
                LayerSpec::MaxPool { window } if *window == 0 => {
                    bail!("層{}: プーリング窓が0です", index)
                }
                LayerSpec::Dropout { rate } if !(0.0..1.0).contains(rate) => {
                    bail!("層{}: ドロップアウト率が範囲外です: {}", index, rate)
                }
                LayerSpec::Dense { units } | LayerSpec::Output { units } if *units == 0 => {
                    bail!("層{}: ユニット数が0です", index)
                }
                LayerSpec::Conv { .. } | LayerSpec::MaxPool { .. } if flattened => {
                    bail!("層{}: Flatten以降に{}は置けません", index, layer.kind())
                }
                LayerSpec::Dense { .. } | LayerSpec::Output { .. } if !flattened => {
                    bail!("層{}: Flattenより前に{}は置けません", index, layer.kind())
                }
                LayerSpec::Flatten if flattened => {
                    bail!("層{}: Flattenが重複しています", index)
                }
                LayerSpec::Flatten => flattened = true,
                _ => {}
            }
        }

        Ok(Self {
            image_size,
            kernel_size,
            activation,
            layers,
        })
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    pub fn activation(&self) -> ActivationFunction {
        self.activation
    }

    pub fn layers(&self) -> &[LayerSpec] {
        &self.layers
    }

    /// Flattenまで（Flatten自身を含む）の切り詰め構成
    ///
    /// Flattenを含まない構成ではそのままのコピーを返します。
    pub fn feature_prefix(&self) -> Architecture {
        let end = self
            .layers
            .iter()
            .position(|layer| *layer == LayerSpec::Flatten)
            .map(|index| index + 1)
            .unwrap_or(self.layers.len());

        Architecture {
            image_size: self.image_size,
            kernel_size: self.kernel_size,
            activation: self.activation,
            layers: self.layers[..end].to_vec(),
        }
    }

    /// `self` が `trained` の先頭部分と層単位で一致しているか検証
    ///
    /// 重みを層インデックスでコピーする前に呼び出します。
    pub fn check_prefix_of(&self, trained: &Architecture) -> anyhow::Result<()> {
        if self.layers.len() > trained.layers.len() {
            bail!(
                "層の不一致: 切り詰めモデルの層数 {} が学習済みモデルの層数 {} を超えています",
                self.layers.len(),
                trained.layers.len()
            );
        }
        if let Some(index) = self
            .layers
            .iter()
            .zip(&trained.layers)
            .position(|(ours, theirs)| ours != theirs)
        {
            bail!(
                "層の不一致: 層{} が {:?} ですが学習済みモデルは {:?} です",
                index,
                self.layers[index],
                trained.layers[index]
            );
        }
        if self.image_size != trained.image_size
            || self.kernel_size != trained.kernel_size
            || self.activation != trained.activation
        {
            bail!(
                "層の不一致: 入力サイズ・カーネルサイズ・活性化関数が異なります ({}/{}/{} と {}/{}/{})",
                self.image_size,
                self.kernel_size,
                self.activation,
                trained.image_size,
                trained.kernel_size,
                trained.activation
            );
        }
        Ok(())
    }

    /// 各層の出力形状
    pub fn output_shapes(&self) -> Vec<LayerShape> {
        let mut shape = LayerShape::Spatial {
            channels: 1,
            height: self.image_size,
            width: self.image_size,
        };
        let mut shapes = Vec::with_capacity(self.layers.len());

        for layer in &self.layers {
            shape = match (layer, shape) {
                (LayerSpec::Conv { filters }, LayerShape::Spatial { height, width, .. }) => {
                    LayerShape::Spatial {
                        channels: *filters,
                        height,
                        width,
                    }
                }
                (
                    LayerSpec::MaxPool { window },
                    LayerShape::Spatial {
                        channels,
                        height,
                        width,
                    },
                ) => LayerShape::Spatial {
                    channels,
                    height: pooled_size(height, *window),
                    width: pooled_size(width, *window),
                },
                (LayerSpec::Flatten, shape) => LayerShape::Flat {
                    features: shape.numel(),
                },
                (LayerSpec::Dense { units }, _) | (LayerSpec::Output { units }, _) => {
                    LayerShape::Flat { features: *units }
                }
                (_, shape) => shape,
            };
            shapes.push(shape);
        }

        shapes
    }

    /// 各層の入力チャネル数（全結合層は入力特徴数）
    pub fn input_widths(&self) -> Vec<usize> {
        let mut widths = Vec::with_capacity(self.layers.len());
        let mut previous = LayerShape::Spatial {
            channels: 1,
            height: self.image_size,
            width: self.image_size,
        };
        for shape in self.output_shapes() {
            widths.push(match previous {
                LayerShape::Spatial { channels, .. } => channels,
                LayerShape::Flat { features } => features,
            });
            previous = shape;
        }
        widths
    }

    /// Flatten直後の特徴次元
    pub fn feature_width(&self) -> usize {
        self.feature_prefix()
            .output_shapes()
            .last()
            .map(LayerShape::numel)
            .unwrap_or(self.image_size * self.image_size)
    }

    /// 各層のパラメータ数
    pub fn parameter_counts(&self) -> Vec<usize> {
        let kernel_area = self.kernel_size * self.kernel_size;
        self.layers
            .iter()
            .zip(self.input_widths())
            .map(|(layer, input)| match layer {
                LayerSpec::Conv { filters } => input * filters * kernel_area + filters,
                LayerSpec::Dense { units } | LayerSpec::Output { units } => input * units + units,
                _ => 0,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_padding_keeps_ceil_size() {
        for size in [1usize, 3, 5, 13, 16, 20, 24, 28, 32, 48, 64, 100] {
            let (before, after) = same_pool_padding(size, 5, 5);
            assert!(before <= after && after - before <= 1, "size {}", size);
            assert!(after < 5, "size {}", size);
            let out = (size + before + after - 5) / 5 + 1;
            assert_eq!(out, pooled_size(size, 5), "size {}", size);
        }
    }

    #[test]
    fn test_pool_padding_puts_extra_after() {
        // 64: 必要量1 → 前0・後1
        assert_eq!(same_pool_padding(64, 5, 5), (0, 1));
        // 13: 必要量2 → 前1・後1
        assert_eq!(same_pool_padding(13, 5, 5), (1, 1));
        // 3: 必要量2 → 前1・後1
        assert_eq!(same_pool_padding(3, 5, 5), (1, 1));
        // 16: 必要量4 → 前2・後2
        assert_eq!(same_pool_padding(16, 5, 5), (2, 2));
        // 1: 必要量4 → 前2・後2
        assert_eq!(same_pool_padding(1, 5, 5), (2, 2));
        assert_eq!(same_pool_padding(62, 5, 5), (1, 2));
    }

    #[test]
    fn test_click_detector_shapes() {
        let arch = Architecture::click_detector(64, 5, ActivationFunction::Relu).unwrap();
        let shapes = arch.output_shapes();

        assert_eq!(
            shapes[1],
            LayerShape::Spatial {
                channels: 32,
                height: 13,
                width: 13
            }
        );
        assert_eq!(
            shapes[3],
            LayerShape::Spatial {
                channels: 50,
                height: 3,
                width: 3
            }
        );
        assert_eq!(shapes[7], LayerShape::Flat { features: 80 });
        assert_eq!(shapes[10], LayerShape::Flat { features: 2 });
        assert_eq!(arch.feature_width(), 80);
    }

    #[test]
    fn test_feature_prefix_ends_at_flatten() {
        let arch = Architecture::click_detector(64, 3, ActivationFunction::Tanh).unwrap();
        let prefix = arch.feature_prefix();

        assert_eq!(prefix.layers().len(), 8);
        assert_eq!(prefix.layers().last(), Some(&LayerSpec::Flatten));
        assert_eq!(prefix.layers(), &arch.layers()[..8]);
        assert_eq!(prefix.kernel_size(), 3);
    }

    #[test]
    fn test_parameter_counts() {
        let arch = Architecture::click_detector(64, 5, ActivationFunction::Relu).unwrap();
        let counts = arch.parameter_counts();

        assert_eq!(counts[0], 32 * 25 + 32);
        assert_eq!(counts[2], 32 * 50 * 25 + 50);
        assert_eq!(counts[8], 80 * 512 + 512);
        assert_eq!(counts[10], 512 * 2 + 2);
        assert_eq!(counts[1], 0);
    }

    #[test]
    fn test_prefix_alignment() {
        let arch = Architecture::click_detector(64, 5, ActivationFunction::Relu).unwrap();
        assert!(arch.feature_prefix().check_prefix_of(&arch).is_ok());

        let shuffled = Architecture::new(
            64,
            5,
            ActivationFunction::Relu,
            vec![
                LayerSpec::Conv { filters: 32 },
                LayerSpec::Conv { filters: 50 },
                LayerSpec::Flatten,
            ],
        )
        .unwrap();
        let err = shuffled.check_prefix_of(&arch).unwrap_err();
        assert!(err.to_string().contains("層の不一致"));

        let other_kernel = Architecture::click_detector(64, 3, ActivationFunction::Relu).unwrap();
        assert!(other_kernel.feature_prefix().check_prefix_of(&arch).is_err());
    }

    #[test]
    fn test_longer_prefix_is_rejected() {
        let arch = Architecture::click_detector(64, 5, ActivationFunction::Relu).unwrap();
        let prefix = arch.feature_prefix();
        assert!(arch.check_prefix_of(&prefix).is_err());
    }

    #[test]
    fn test_even_kernel_is_rejected() {
        assert!(Architecture::click_detector(64, 4, ActivationFunction::Relu).is_err());
    }

    #[test]
    fn test_dense_before_flatten_is_rejected() {
        let result = Architecture::new(
            8,
            3,
            ActivationFunction::Relu,
            vec![LayerSpec::Dense { units: 4 }, LayerSpec::Flatten],
        );
        assert!(result.is_err());
    }
}
