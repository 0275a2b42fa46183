//! Click検出用CNNモデル
//!
//! [`Architecture`] の層リストから組み立てる汎用的な逐次モデルです。
//! 学習用のフルモデルと特徴抽出用の切り詰めモデルで同じ型を使います。

use burn::{
    module::{Ignored, Module},
    nn::{
        activation::Activation,
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    tensor::{activation::softmax, backend::Backend, ops::PadMode, Int, Tensor},
    train::ClassificationOutput,
};

use crate::ml::architecture::{same_pool_padding, Architecture, LayerShape, LayerSpec};

/// 空間次元を1次元に平坦化する層
#[derive(Module, Clone, Debug, Default)]
pub struct Flatten;

impl Flatten {
    pub fn forward<B: Backend>(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, channels, height, width] = input.dims();
        input.reshape([batch_size, channels * height * width])
    }
}

/// sameパディング付き最大値プーリング
///
/// 必要なパディングの半分（切り捨て）を上・左に、残りを下・右に置きます。
/// パディング部分は `f32::MIN` で埋めるため最大値には影響しません。
#[derive(Module, Clone, Debug)]
pub struct SamePool {
    pool: MaxPool2d,
    /// [上, 左]
    pad_before: [usize; 2],
    /// [下, 右]
    pad_after: [usize; 2],
}

impl SamePool {
    /// `height × width` の入力に対するプーリング層
    pub fn new(window: usize, height: usize, width: usize) -> Self {
        let (top, bottom) = same_pool_padding(height, window, window);
        let (left, right) = same_pool_padding(width, window, window);
        Self {
            pool: MaxPool2dConfig::new([window, window])
                .with_strides([window, window])
                .with_padding(PaddingConfig2d::Valid)
                .init(),
            pad_before: [top, left],
            pad_after: [bottom, right],
        }
    }

    pub fn forward<B: Backend>(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let [top, left] = self.pad_before;
        let [bottom, right] = self.pad_after;
        let padded = if top + left + bottom + right == 0 {
            input
        } else {
            input.pad((left, right, top, bottom), PadMode::Constant(f32::MIN))
        };
        self.pool.forward(padded)
    }
}

/// 1層分のモジュール
#[derive(Module, Debug)]
pub enum Layer<B: Backend> {
    Conv(Conv2d<B>),
    Pool(SamePool),
    Dropout(Dropout),
    Flatten(Flatten),
    Dense(Linear<B>),
}

/// 層の間を流れるテンソル
enum Signal<B: Backend> {
    Spatial(Tensor<B, 4>),
    Flat(Tensor<B, 2>),
}

impl<B: Backend> Signal<B> {
    fn into_spatial(self) -> Tensor<B, 4> {
        match self {
            Signal::Spatial(x) => x,
            Signal::Flat(x) => {
                let [batch_size, features] = x.dims();
                x.reshape([batch_size, features, 1, 1])
            }
        }
    }

    fn into_flat(self) -> Tensor<B, 2> {
        match self {
            Signal::Spatial(x) => Flatten.forward(x),
            Signal::Flat(x) => x,
        }
    }
}

/// Click / No Click 分類用CNNモデル
///
/// # 入出力
/// - 入力: グレースケール画像 [batch_size, 1, size, size]
/// - 出力: 最後の層の出力。フルモデルではクラスごとのロジット [batch_size, 2]、
///   切り詰めモデルではFlatten後の特徴 [batch_size, F]
#[derive(Module, Debug)]
pub struct ClickNet<B: Backend> {
    layers: Vec<Layer<B>>,
    activation: Activation<B>,
    architecture: Ignored<Architecture>,
}

impl<B: Backend> ClickNet<B> {
    /// 構成に従ってモデルを初期化
    pub fn new(architecture: &Architecture, device: &B::Device) -> Self {
        let kernel = architecture.kernel_size();
        let widths = architecture.input_widths();
        let mut input_shape = LayerShape::Spatial {
            channels: 1,
            height: architecture.image_size(),
            width: architecture.image_size(),
        };

        let mut layers = Vec::with_capacity(architecture.layers().len());
        for ((spec, input), output_shape) in architecture
            .layers()
            .iter()
            .zip(widths)
            .zip(architecture.output_shapes())
        {
            let layer = match spec {
                LayerSpec::Conv { filters } => Layer::Conv(
                    Conv2dConfig::new([input, *filters], [kernel, kernel])
                        .with_stride([1, 1])
                        .with_padding(PaddingConfig2d::Same)
                        .init(device),
                ),
                LayerSpec::MaxPool { window } => {
                    let (height, width) = match input_shape {
                        LayerShape::Spatial { height, width, .. } => (height, width),
                        LayerShape::Flat { .. } => (1, 1),
                    };
                    Layer::Pool(SamePool::new(*window, height, width))
                }
                LayerSpec::Dropout { rate } => Layer::Dropout(DropoutConfig::new(*rate).init()),
                LayerSpec::Flatten => Layer::Flatten(Flatten),
                LayerSpec::Dense { units } | LayerSpec::Output { units } => {
                    Layer::Dense(LinearConfig::new(input, *units).init(device))
                }
            };
            layers.push(layer);
            input_shape = output_shape;
        }

        Self {
            layers,
            activation: architecture.activation().to_config().init(device),
            architecture: Ignored(architecture.clone()),
        }
    }

    /// モデルの構成
    pub fn architecture(&self) -> &Architecture {
        &self.architecture
    }

    /// 順伝播
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = Signal::Spatial(images);

        for (layer, spec) in self.layers.iter().zip(self.architecture.layers()) {
            x = match (layer, spec) {
                (Layer::Conv(conv), _) => {
                    let y = conv.forward(x.into_spatial());
                    Signal::Spatial(self.activation.forward(y))
                }
                (Layer::Pool(pool), _) => Signal::Spatial(pool.forward(x.into_spatial())),
                (Layer::Dropout(dropout), _) => match x {
                    Signal::Spatial(y) => Signal::Spatial(dropout.forward(y)),
                    Signal::Flat(y) => Signal::Flat(dropout.forward(y)),
                },
                (Layer::Flatten(_), _) => Signal::Flat(x.into_flat()),
                (Layer::Dense(linear), LayerSpec::Output { .. }) => {
                    Signal::Flat(linear.forward(x.into_flat()))
                }
                (Layer::Dense(linear), _) => {
                    let y = linear.forward(x.into_flat());
                    Signal::Flat(self.activation.forward(y))
                }
            };
        }

        x.into_flat()
    }

    /// クラスごとの確率（softmax）
    pub fn predict_proba(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 予測を実行
    ///
    /// # 戻り値
    /// - (予測クラスID [batch_size, 1], 確率 [batch_size, 2])
    pub fn predict(&self, images: Tensor<B, 4>) -> (Tensor<B, 2, Int>, Tensor<B, 2>) {
        let probabilities = self.predict_proba(images);
        let predictions = probabilities.clone().argmax(1);
        (predictions, probabilities)
    }

    /// 順伝播と損失計算（学習用）
    ///
    /// 損失はソフトマックス交差エントロピー（カテゴリカル交差エントロピー）です。
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }

    /// `source` の先頭の層から重みを層インデックス順にコピー
    ///
    /// 構成の一致を確認してからコピーするため、不一致の場合は何も変更せずエラーを返します。
    pub fn load_prefix_from(self, source: &ClickNet<B>) -> anyhow::Result<Self> {
        self.architecture.check_prefix_of(&source.architecture)?;

        let Self {
            layers,
            activation,
            architecture,
        } = self;

        let layers = layers
            .into_iter()
            .zip(source.layers.iter())
            .map(|(target, trained)| target.load_record(trained.clone().into_record()))
            .collect();

        Ok(Self {
            layers,
            activation,
            architecture,
        })
    }
}
