//! 予測結果付きサムネイル一覧

use plotters::prelude::*;
use std::path::Path;
use tracing::{info, warn};

use crate::data::ClickDataset;
use crate::ml::Prediction;
use crate::plot::FONT;

/// 1枚あたりの描画サイズ（ピクセル）
const CELL_SIZE: u32 = 160;

fn gray_level(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// 画像をグリッド状に並べ、各画像の上に予測クラス名を表示して保存
///
/// 画像が1枚もない場合は警告を出して何もせず `Ok(false)` を返します。
/// グリッドに収まらない分は描画しません。
pub fn plot_prediction_grid(
    dataset: &ClickDataset,
    predictions: &[Prediction],
    rows: usize,
    cols: usize,
    output_path: &Path,
) -> anyhow::Result<bool> {
    if dataset.len() != predictions.len() {
        anyhow::bail!(
            "画像数 {} と予測数 {} が一致しません",
            dataset.len(),
            predictions.len()
        );
    }
    if dataset.is_empty() {
        warn!(
            "[Plot] 表示する画像がないため予測一覧をスキップします: {}",
            output_path.display()
        );
        return Ok(false);
    }

    let capacity = rows * cols;
    if dataset.len() > capacity {
        warn!(
            "[Plot] 画像 {} 枚のうち先頭 {} 枚のみ表示します",
            dataset.len(),
            capacity
        );
    }

    let root = BitMapBackend::new(
        output_path,
        (CELL_SIZE * cols as u32, CELL_SIZE * rows as u32),
    )
    .into_drawing_area();
    root.fill(&WHITE)?;

    let size = dataset.image_size();
    let cells = root.split_evenly((rows, cols));
    for ((cell, image), prediction) in cells
        .iter()
        .zip(dataset.images())
        .zip(predictions)
    {
        let canvas = cell.margin(4, 4, 4, 4).titled(prediction.class_name(), (FONT, 16))?;
        let (width, height) = canvas.dim_in_pixel();
        let scale = (width.min(height) as f64 / size as f64).max(f64::MIN_POSITIVE);

        for (index, value) in image.pixels.iter().enumerate() {
            let x = (index % size) as f64;
            let y = (index / size) as f64;
            let level = gray_level(*value);
            canvas.draw(&Rectangle::new(
                [
                    ((x * scale) as i32, (y * scale) as i32),
                    (((x + 1.0) * scale).ceil() as i32, ((y + 1.0) * scale).ceil() as i32),
                ],
                RGBColor(level, level, level).filled(),
            ))?;
        }
    }

    root.present()?;
    info!("[Plot] 予測一覧を保存しました: {}", output_path.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DatasetRole;

    #[test]
    fn test_gray_level() {
        assert_eq!(gray_level(0.0), 0);
        assert_eq!(gray_level(1.0), 255);
        assert_eq!(gray_level(1.5), 255);
        assert_eq!(gray_level(-0.2), 0);
    }

    #[test]
    fn test_empty_slice_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TestingPredictions.png");
        let dataset =
            ClickDataset::from_images(DatasetRole::Testing, 4, Vec::new(), Vec::new()).unwrap();

        let written = plot_prediction_grid(&dataset, &[], 6, 5, &path).unwrap();
        assert!(!written);
        assert!(!path.exists());
    }
}
