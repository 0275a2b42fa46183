//! 画像の読み込みとファイル名からのラベル付け

use anyhow::Context;
use image::imageops::{self, FilterType};
use image::ImageReader;
use std::path::Path;

/// "Click" ラベルのファイル名接頭辞
pub const CLICK_KEY: &str = "Click";

/// ラベル付き画像
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledImage {
    /// 行優先のグレースケール画素値 [0, 1]（size × size）
    pub pixels: Vec<f32>,
    /// one-hotラベル（[1, 0] = Click, [0, 1] = No Click）
    pub label: [f32; 2],
}

impl LabeledImage {
    /// ラベルのクラスID（0 = Click, 1 = No Click）
    pub fn class_index(&self) -> usize {
        if self.label[0] >= self.label[1] {
            0
        } else {
            1
        }
    }
}

/// ファイル名の先頭から最初の数字の直前までを取り出す
///
/// 区切りになるのはASCII数字（0-9）のみです。全角数字などは接頭辞の一部として扱います。
/// 数字を含まない場合はファイル名全体を返します。
pub fn label_key(file_name: &str) -> &str {
    let end = file_name
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(file_name.len());
    &file_name[..end]
}

/// ファイル名からone-hotラベルを決定
pub fn one_hot_label(file_name: &str) -> [f32; 2] {
    if label_key(file_name) == CLICK_KEY {
        [1.0, 0.0]
    } else {
        [0.0, 1.0]
    }
}

/// 画像をグレースケールで読み込み、size × size に縮小して [0, 1] に正規化
///
/// 形式は拡張子ではなくファイルの内容から判定します。
pub fn load_grayscale(path: &Path, size: usize) -> anyhow::Result<Vec<f32>> {
    let img = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .with_context(|| format!("画像を開けません: {}", path.display()))?
        .decode()
        .with_context(|| format!("画像を読み込めません: {}", path.display()))?
        .to_luma8();

    let side = size as u32;
    let resized = if img.dimensions() == (side, side) {
        img
    } else {
        imageops::resize(&img, side, side, FilterType::Triangle)
    };

    Ok(resized.pixels().map(|p| p[0] as f32 / 255.0).collect())
}

/// 画像を読み込んでラベルを付与
pub fn label_image(path: &Path, size: usize) -> anyhow::Result<LabeledImage> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(LabeledImage {
        pixels: load_grayscale(path, size)?,
        label: one_hot_label(&file_name),
    })
}
