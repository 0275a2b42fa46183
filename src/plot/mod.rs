//! PNG画像への描画（学習曲線・構成図・t-SNE散布図・予測一覧）

pub mod architecture_diagram;
pub mod curves;
pub mod scatter;
pub mod thumbnails;

use std::ops::Range;

pub use architecture_diagram::plot_architecture;
pub use curves::plot_training_curves;
pub use scatter::{plot_embedding, rainbow_color};
pub use thumbnails::plot_prediction_grid;

/// 描画に使うフォント
pub(crate) const FONT: &str = "sans-serif";

/// 値の範囲に10%の余白を加えた軸範囲
///
/// 全て同じ値の場合は ±1 の範囲を返します。
pub(crate) fn padded_range(values: impl Iterator<Item = f64>) -> Range<f64> {
    let (min, max) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if !min.is_finite() || !max.is_finite() {
        return 0.0..1.0;
    }
    let span = max - min;
    if span <= f64::EPSILON {
        return (min - 1.0)..(max + 1.0);
    }
    let margin = span * 0.1;
    (min - margin)..(max + margin)
}
