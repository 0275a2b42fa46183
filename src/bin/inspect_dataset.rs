//! データセットのラベル付けを確認するためのバイナリ
//!
//! 学習は行わず、設定された各ディレクトリのファイル名とラベルを一覧表示します。

use click_detector_lib::data::{ClickDataset, DatasetRole};
use click_detector_lib::PipelineConfig;
use std::path::Path;

fn main() {
    println!("=== Click Detector Dataset Inspection ===\n");

    let config = PipelineConfig::load_or_default();
    let data = &config.data;

    let targets = [
        (DatasetRole::Training, &data.training_dir),
        (DatasetRole::Testing, &data.testing_dir),
        (DatasetRole::FalsePositive, &data.false_positive_dir),
    ];

    for (role, dir) in targets {
        println!("{}: {}", role, dir.display());
        inspect(dir, role, data.image_size, data.shuffle_seed);
        println!("\n{}\n", "=".repeat(50));
    }
}

fn inspect(dir: &Path, role: DatasetRole, image_size: usize, shuffle_seed: u64) {
    match ClickDataset::from_directory(dir, role, image_size, shuffle_seed) {
        Ok(dataset) => {
            let clicks = dataset.class_indices().iter().filter(|c| **c == 0).count();
            println!("✓ 読み込み成功:");
            println!("  画像配列: {:?}", dataset.images_shape());
            println!("  Click: {} 枚", clicks);
            println!("  No Click: {} 枚", dataset.len() - clicks);
            for (name, label) in dataset.file_names().iter().zip(dataset.labels()) {
                println!("  {} -> {:?}", name, label);
            }
        }
        Err(e) => {
            eprintln!("✗ エラー: {:#}", e);
        }
    }
}
