//! t-SNE散布図

use nalgebra::DMatrix;
use plotters::prelude::*;
use std::path::Path;
use tracing::info;

use crate::ml::CLASS_NAMES;
use crate::plot::{padded_range, FONT};

/// rainbowカラーマップ（t ∈ [0, 1]、紫 → 赤）
pub fn rainbow_color(t: f64) -> RGBColor {
    let t = t.clamp(0.0, 1.0);
    let r = (2.0 * t - 0.5).abs();
    let g = (std::f64::consts::PI * t).sin();
    let b = (std::f64::consts::PI * t / 2.0).cos();
    let to_u8 = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    RGBColor(to_u8(r), to_u8(g), to_u8(b))
}

/// クラスIDに対応する色（クラスを [0, 1] に等間隔で割り当て）
fn class_color(class_index: usize) -> RGBColor {
    let steps = (CLASS_NAMES.len() - 1).max(1) as f64;
    rainbow_color(class_index as f64 / steps)
}

/// 2次元埋め込みをクラスごとに色分けして保存
pub fn plot_embedding(
    reduced: &DMatrix<f64>,
    class_indices: &[usize],
    output_path: &Path,
) -> anyhow::Result<()> {
    if reduced.ncols() < 2 {
        anyhow::bail!("散布図には2次元以上の埋め込みが必要です: {}", reduced.ncols());
    }
    if reduced.nrows() != class_indices.len() {
        anyhow::bail!(
            "埋め込みの行数 {} とラベル数 {} が一致しません",
            reduced.nrows(),
            class_indices.len()
        );
    }

    let root = BitMapBackend::new(output_path, (1000, 1000)).into_drawing_area();
    root.fill(&WHITE)?;

    let x_range = padded_range(reduced.column(0).iter().copied());
    let y_range = padded_range(reduced.column(1).iter().copied());

    let mut chart = ChartBuilder::on(&root)
        .caption("t-SNE Visualization", (FONT, 36).into_font())
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, y_range)?;

    chart
        .configure_mesh()
        .x_desc("Axis 1")
        .y_desc("Axis 2")
        .draw()?;

    for (class_index, name) in CLASS_NAMES.iter().enumerate() {
        let color = class_color(class_index);
        let points: Vec<(f64, f64)> = class_indices
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == class_index)
            .map(|(row, _)| (reduced[(row, 0)], reduced[(row, 1)]))
            .collect();

        chart
            .draw_series(
                points
                    .into_iter()
                    .map(|point| Circle::new(point, 4, color.filled())),
            )?
            .label(*name)
            .legend(move |(x, y)| Circle::new((x + 10, y), 4, color.filled()));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    info!("[Plot] t-SNE散布図を保存しました: {}", output_path.display());
    Ok(())
}
