//! 学習曲線（精度・損失）

use plotters::prelude::*;
use std::path::Path;
use tracing::info;

use crate::ml::EpochMetrics;
use crate::plot::{padded_range, FONT};

/// エポックごとの精度と損失を左右に並べて保存
pub fn plot_training_curves(history: &[EpochMetrics], output_path: &Path) -> anyhow::Result<()> {
    if history.is_empty() {
        anyhow::bail!("学習履歴が空です");
    }

    let root = BitMapBackend::new(output_path, (1200, 500)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((1, 2));

    let last_epoch = history.iter().map(|m| m.epoch).max().unwrap_or(1).max(2);
    let series: [(&str, &str, Vec<(usize, f64)>); 2] = [
        (
            "Model accuracy",
            "Accuracy",
            history.iter().map(|m| (m.epoch, m.accuracy)).collect(),
        ),
        (
            "Model loss",
            "Loss",
            history.iter().map(|m| (m.epoch, m.loss)).collect(),
        ),
    ];

    for (panel, (title, y_desc, points)) in panels.iter().zip(series) {
        let y_range = padded_range(points.iter().map(|(_, v)| *v));

        let mut chart = ChartBuilder::on(panel)
            .caption(title, (FONT, 28).into_font())
            .margin(15)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(1usize..last_epoch, y_range)?;

        chart
            .configure_mesh()
            .x_desc("Epoch")
            .y_desc(y_desc)
            .draw()?;

        chart
            .draw_series(LineSeries::new(points, &BLUE))?
            .label("Training")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperLeft)
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;
    }

    root.present()?;
    info!("[Plot] 学習曲線を保存しました: {}", output_path.display());
    Ok(())
}
