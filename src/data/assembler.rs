//! データセットの組み立て
//!
//! 学習・テスト・誤検出の3つのディレクトリから画像を読み込みます。
//! シャッフルは学習データのみ、固定シードで一度だけ行います。

use anyhow::{bail, Context};
use burn_dataset::Dataset;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::DataSettings;
use crate::data::labeler::{label_image, LabeledImage};

/// データセットの用途
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetRole {
    Training,
    Testing,
    FalsePositive,
}

impl std::fmt::Display for DatasetRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetRole::Training => write!(f, "学習データ"),
            DatasetRole::Testing => write!(f, "テストデータ"),
            DatasetRole::FalsePositive => write!(f, "誤検出データ"),
        }
    }
}

/// データセットアイテム（1枚分の画素とクラスID）
#[derive(Clone, Debug)]
pub struct ClickItem {
    pub pixels: Vec<f32>,
    pub label: usize,
}

/// 画像・ラベル・ファイル名を同じ順序で保持するデータセット
#[derive(Debug, Clone)]
pub struct ClickDataset {
    role: DatasetRole,
    image_size: usize,
    images: Vec<LabeledImage>,
    file_names: Vec<String>,
}

impl ClickDataset {
    /// ディレクトリから読み込む
    ///
    /// 通常ファイルのみを対象にし、ファイル名順に並べます。
    /// 学習データのみ `shuffle_seed` でシャッフルします。
    pub fn from_directory(
        dir: &Path,
        role: DatasetRole,
        image_size: usize,
        shuffle_seed: u64,
    ) -> anyhow::Result<Self> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("{}のディレクトリを開けません: {}", role, dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() {
                paths.push(path);
            } else {
                debug!("[Data] ファイル以外をスキップ: {}", path.display());
            }
        }
        paths.sort();

        if paths.is_empty() {
            bail!("{}が空です: {} に画像がありません", role, dir.display());
        }

        let mut samples = Vec::with_capacity(paths.len());
        for path in &paths {
            let image = label_image(path, image_size)?;
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            samples.push((image, file_name));
        }

        if role == DatasetRole::Training {
            let mut rng = StdRng::seed_from_u64(shuffle_seed);
            samples.shuffle(&mut rng);
        }

        let (images, file_names): (Vec<_>, Vec<_>) = samples.into_iter().unzip();
        let dataset = Self {
            role,
            image_size,
            images,
            file_names,
        };

        let clicks = dataset.class_indices().iter().filter(|c| **c == 0).count();
        info!(
            "[Data] {}: {} 枚読み込みました (Click: {}, No Click: {}) - {}",
            role,
            dataset.len(),
            clicks,
            dataset.len() - clicks,
            dir.display()
        );

        Ok(dataset)
    }

    /// 読み込み済みの画像から作成
    pub fn from_images(
        role: DatasetRole,
        image_size: usize,
        images: Vec<LabeledImage>,
        file_names: Vec<String>,
    ) -> anyhow::Result<Self> {
        if images.len() != file_names.len() {
            bail!(
                "画像数 {} とファイル名数 {} が一致しません",
                images.len(),
                file_names.len()
            );
        }
        if let Some(index) = images
            .iter()
            .position(|image| image.pixels.len() != image_size * image_size)
        {
            bail!("画像{}の画素数が {}x{} と一致しません", index, image_size, image_size);
        }
        Ok(Self {
            role,
            image_size,
            images,
            file_names,
        })
    }

    pub fn role(&self) -> DatasetRole {
        self.role
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// 画像配列の形状 [N, H, W, 1]
    pub fn images_shape(&self) -> [usize; 4] {
        [self.images.len(), self.image_size, self.image_size, 1]
    }

    pub fn images(&self) -> &[LabeledImage] {
        &self.images
    }

    /// one-hotラベル (N × 2)
    pub fn labels(&self) -> Vec<[f32; 2]> {
        self.images.iter().map(|image| image.label).collect()
    }

    /// クラスID（0 = Click, 1 = No Click）
    pub fn class_indices(&self) -> Vec<usize> {
        self.images.iter().map(LabeledImage::class_index).collect()
    }

    pub fn file_names(&self) -> &[String] {
        &self.file_names
    }

    /// 範囲を切り出す（範囲が長さを超える場合は切り詰め）
    pub fn slice(&self, range: Range<usize>) -> ClickDataset {
        let end = range.end.min(self.images.len());
        let start = range.start.min(end);
        ClickDataset {
            role: self.role,
            image_size: self.image_size,
            images: self.images[start..end].to_vec(),
            file_names: self.file_names[start..end].to_vec(),
        }
    }
}

impl Dataset<ClickItem> for ClickDataset {
    fn get(&self, index: usize) -> Option<ClickItem> {
        let image = self.images.get(index)?;
        Some(ClickItem {
            pixels: image.pixels.clone(),
            label: image.class_index(),
        })
    }

    fn len(&self) -> usize {
        self.images.len()
    }
}

/// 3つのデータセット
#[derive(Debug, Clone)]
pub struct DatasetBundle {
    pub training: ClickDataset,
    pub testing: ClickDataset,
    pub false_positive: ClickDataset,
}

/// 設定に従って3つのデータセットを組み立てる
pub fn assemble_all(settings: &DataSettings) -> anyhow::Result<DatasetBundle> {
    info!("[Data] データセットの読み込みを開始します");

    let training = ClickDataset::from_directory(
        &settings.training_dir,
        DatasetRole::Training,
        settings.image_size,
        settings.shuffle_seed,
    )?;
    let testing = ClickDataset::from_directory(
        &settings.testing_dir,
        DatasetRole::Testing,
        settings.image_size,
        settings.shuffle_seed,
    )?;
    let false_positive = ClickDataset::from_directory(
        &settings.false_positive_dir,
        DatasetRole::FalsePositive,
        settings.image_size,
        settings.shuffle_seed,
    )?;

    Ok(DatasetBundle {
        training,
        testing,
        false_positive,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn write_images(dir: &Path, names: &[&str]) {
        for (i, name) in names.iter().enumerate() {
            let value = (i * 30 % 256) as u8;
            GrayImage::from_pixel(10, 10, Luma([value]))
                .save(dir.join(name))
                .unwrap();
        }
    }

    #[test]
    fn test_testing_set_keeps_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_images(dir.path(), &["NoClick2.png", "Click1.png", "Click2.png"]);
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let dataset = ClickDataset::from_directory(dir.path(), DatasetRole::Testing, 8, 1).unwrap();

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.images_shape(), [3, 8, 8, 1]);
        assert_eq!(dataset.file_names(), &["Click1.png", "Click2.png", "NoClick2.png"]);
        assert_eq!(dataset.class_indices(), vec![0, 0, 1]);
    }

    #[test]
    fn test_training_shuffle_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let names: Vec<String> = (0..12)
            .map(|i| {
                if i % 3 == 0 {
                    format!("Click{}.png", i)
                } else {
                    format!("NoClick{}.png", i)
                }
            })
            .collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        write_images(dir.path(), &refs);

        let a = ClickDataset::from_directory(dir.path(), DatasetRole::Training, 8, 1).unwrap();
        let b = ClickDataset::from_directory(dir.path(), DatasetRole::Training, 8, 1).unwrap();
        assert_eq!(a.file_names(), b.file_names());
        assert_eq!(a.labels(), b.labels());

        // ラベルの多重集合は保存される
        let clicks = a.class_indices().iter().filter(|c| **c == 0).count();
        assert_eq!(clicks, 4);
        assert_eq!(a.len(), 12);

        // 画像とラベルの対応が崩れていない
        for (image, name) in a.images().iter().zip(a.file_names()) {
            assert_eq!(image.label, crate::data::labeler::one_hot_label(name));
        }
    }

    #[test]
    fn test_empty_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClickDataset::from_directory(dir.path(), DatasetRole::FalsePositive, 8, 1)
            .unwrap_err();
        assert!(err.to_string().contains("誤検出データが空です"));
    }

    #[test]
    fn test_missing_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(ClickDataset::from_directory(&missing, DatasetRole::Testing, 8, 1).is_err());
    }

    #[test]
    fn test_slice_truncates() {
        let dir = tempfile::tempdir().unwrap();
        write_images(dir.path(), &["Click1.png", "Click2.png", "NoClick1.png"]);
        let dataset = ClickDataset::from_directory(dir.path(), DatasetRole::Testing, 4, 1).unwrap();

        assert_eq!(dataset.slice(1..40).len(), 2);
        assert!(dataset.slice(10..40).is_empty());
        assert_eq!(dataset.slice(0..1).file_names(), &["Click1.png"]);
    }

    #[test]
    fn test_dataset_items() {
        let dir = tempfile::tempdir().unwrap();
        write_images(dir.path(), &["Click1.png", "NoClick1.png"]);
        let dataset = ClickDataset::from_directory(dir.path(), DatasetRole::Testing, 4, 1).unwrap();

        let item = dataset.get(1).unwrap();
        assert_eq!(item.label, 1);
        assert_eq!(item.pixels.len(), 16);
        assert!(dataset.get(2).is_none());
    }
}
