//! ネットワーク構成図
//!
//! 入力層から出力層まで1層ずつ箱を縦に並べ、各層の出力形状を併記します。

use plotters::prelude::*;
use std::path::Path;
use tracing::info;

use crate::ml::{Architecture, LayerSpec};
use crate::plot::FONT;

const BOX_WIDTH: i32 = 460;
const BOX_HEIGHT: i32 = 44;
const BOX_GAP: i32 = 26;
const MARGIN: i32 = 30;

/// 各箱に表示する文字列（入力層を含む）
pub fn layer_labels(architecture: &Architecture) -> Vec<String> {
    let size = architecture.image_size();
    let kernel = architecture.kernel_size();
    let activation = architecture.activation();

    let mut labels = vec![format!("InputLayer | ({}, {}, 1)", size, size)];
    for (layer, shape) in architecture
        .layers()
        .iter()
        .zip(architecture.output_shapes())
    {
        let detail = match layer {
            LayerSpec::Conv { filters } => {
                format!("{} {}x{}, {}", filters, kernel, kernel, activation)
            }
            LayerSpec::MaxPool { window } => format!("{}x{}", window, window),
            LayerSpec::Dropout { rate } => format!("rate {}", rate),
            LayerSpec::Flatten => String::new(),
            LayerSpec::Dense { units } => format!("{}, {}", units, activation),
            LayerSpec::Output { units } => format!("{}", units),
        };
        let name = if detail.is_empty() {
            layer.kind().to_string()
        } else {
            format!("{} ({})", layer.kind(), detail)
        };
        labels.push(format!("{} | {}", name, shape));
    }
    labels
}

/// 構成図を保存する
///
/// 出力先が既に存在する場合は上書きせず `Ok(false)` を返します。
pub fn plot_architecture(architecture: &Architecture, output_path: &Path) -> anyhow::Result<bool> {
    if output_path.exists() {
        info!("[Plot] File already exists: {}", output_path.display());
        return Ok(false);
    }

    let labels = layer_labels(architecture);
    let count = labels.len() as i32;
    let width = (BOX_WIDTH + MARGIN * 2) as u32;
    let height = (MARGIN * 2 + count * BOX_HEIGHT + (count - 1).max(0) * BOX_GAP) as u32;

    let root = BitMapBackend::new(output_path, (width, height)).into_drawing_area();
    root.fill(&WHITE)?;

    let font = (FONT, 18).into_font();
    for (index, label) in labels.iter().enumerate() {
        let top = MARGIN + index as i32 * (BOX_HEIGHT + BOX_GAP);
        let left = MARGIN;

        root.draw(&Rectangle::new(
            [(left, top), (left + BOX_WIDTH, top + BOX_HEIGHT)],
            RGBColor(235, 240, 250).filled(),
        ))?;
        root.draw(&Rectangle::new(
            [(left, top), (left + BOX_WIDTH, top + BOX_HEIGHT)],
            BLACK.stroke_width(1),
        ))?;
        root.draw(&Text::new(
            label.clone(),
            (left + 12, top + BOX_HEIGHT / 2 - 9),
            font.clone(),
        ))?;

        if index + 1 < labels.len() {
            let x = left + BOX_WIDTH / 2;
            let start = top + BOX_HEIGHT;
            let end = start + BOX_GAP;
            root.draw(&PathElement::new(vec![(x, start), (x, end)], &BLACK))?;
            root.draw(&PathElement::new(
                vec![(x - 5, end - 7), (x, end), (x + 5, end - 7)],
                &BLACK,
            ))?;
        }
    }

    root.present()?;
    info!("[Plot] ネットワーク構成図を保存しました: {}", output_path.display());
    Ok(true)
}
