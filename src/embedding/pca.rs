//! 主成分分析（PCA）
//!
//! 列ごとに中心化した共分散行列を対称固有値分解し、固有値の大きい順に主成分を並べます。

use anyhow::bail;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use std::cmp::Ordering;
use tracing::{info, warn};

/// 学習済みPCA
#[derive(Debug, Clone)]
pub struct Pca {
    mean: DVector<f64>,
    /// 主成分（k × F、行ごとに1成分）
    components: DMatrix<f64>,
    explained_variance: Vec<f64>,
    total_variance: f64,
}

/// 主成分数を `min(N, F)` に収める
pub fn clamp_components(requested: usize, n_samples: usize, n_features: usize) -> usize {
    let limit = n_samples.min(n_features);
    if requested > limit {
        warn!(
            "[PCA] 主成分数 {} はデータの上限 min({}, {}) = {} を超えるため切り詰めます",
            requested, n_samples, n_features, limit
        );
        limit
    } else {
        requested
    }
}

impl Pca {
    /// `n_components` 個の主成分で学習
    ///
    /// `n_components` は `min(N, F)` に切り詰められます。
    pub fn fit(data: &DMatrix<f64>, n_components: usize) -> anyhow::Result<Self> {
        let (rows, cols) = data.shape();
        if rows == 0 || cols == 0 {
            bail!("PCAの入力が空です: ({}, {})", rows, cols);
        }
        let k = clamp_components(n_components, rows, cols);
        if k == 0 {
            bail!("主成分数が0です");
        }

        let mean = data.row_mean().transpose();
        let mut centered = data.clone();
        for mut row in centered.row_iter_mut() {
            row -= mean.transpose();
        }

        let denom = rows.saturating_sub(1).max(1) as f64;
        let covariance = (centered.transpose() * &centered) / denom;
        let eigen = SymmetricEigen::new(covariance);

        let mut order: Vec<usize> = (0..cols).collect();
        order.sort_by(|&a, &b| {
            eigen.eigenvalues[b]
                .partial_cmp(&eigen.eigenvalues[a])
                .unwrap_or(Ordering::Equal)
        });

        let total_variance: f64 = eigen.eigenvalues.iter().map(|v| v.max(0.0)).sum();
        let mut components = DMatrix::zeros(k, cols);
        let mut explained_variance = Vec::with_capacity(k);

        for (row, &index) in order.iter().take(k).enumerate() {
            let mut vector = eigen.eigenvectors.column(index).into_owned();

            // 絶対値最大の係数が正になるよう符号を揃える
            let pivot = vector
                .iter()
                .copied()
                .max_by(|a, b| a.abs().partial_cmp(&b.abs()).unwrap_or(Ordering::Equal))
                .unwrap_or(0.0);
            if pivot < 0.0 {
                vector.neg_mut();
            }

            components.set_row(row, &vector.transpose());
            explained_variance.push(eigen.eigenvalues[index].max(0.0));
        }

        Ok(Self {
            mean,
            components,
            explained_variance,
            total_variance,
        })
    }

    pub fn n_components(&self) -> usize {
        self.components.nrows()
    }

    /// 各主成分の分散
    pub fn explained_variance(&self) -> &[f64] {
        &self.explained_variance
    }

    /// 各主成分の寄与率
    pub fn explained_variance_ratio(&self) -> Vec<f64> {
        if self.total_variance <= 0.0 {
            return vec![0.0; self.explained_variance.len()];
        }
        self.explained_variance
            .iter()
            .map(|v| v / self.total_variance)
            .collect()
    }

    /// 累積寄与率
    pub fn cumulative_variance_ratio(&self) -> f64 {
        self.explained_variance_ratio().iter().sum()
    }

    /// 射影 (N, F) → (N, k)
    pub fn transform(&self, data: &DMatrix<f64>) -> DMatrix<f64> {
        let mut centered = data.clone();
        for mut row in centered.row_iter_mut() {
            row -= self.mean.transpose();
        }
        centered * self.components.transpose()
    }

    pub fn fit_transform(data: &DMatrix<f64>, n_components: usize) -> anyhow::Result<(Self, DMatrix<f64>)> {
        let pca = Self::fit(data, n_components)?;
        let projected = pca.transform(data);
        Ok((pca, projected))
    }
}

/// 主成分数ごとの累積寄与率を確認する（診断用）
pub fn variance_sweep(data: &DMatrix<f64>, widths: &[usize]) -> anyhow::Result<Vec<(usize, f64)>> {
    let mut results = Vec::with_capacity(widths.len());
    for &width in widths {
        let pca = Pca::fit(data, width)?;
        let variance = pca.cumulative_variance_ratio();
        info!("[PCA] Dimension: {}", width);
        info!("[PCA] Variance PCA: {}", variance);
        results.push((width, variance));
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data() -> DMatrix<f64> {
        DMatrix::from_fn(30, 6, |r, c| {
            let t = r as f64;
            match c {
                0 => t,
                1 => 2.0 * t + (r % 3) as f64,
                2 => (t * 0.7).sin(),
                3 => (r % 5) as f64,
                4 => -t + (r % 2) as f64 * 0.5,
                _ => (t * 1.3).cos() * 0.1,
            }
        })
    }

    #[test]
    fn test_variance_is_monotonic() {
        let data = sample_data();
        let sweep = variance_sweep(&data, &[1, 2, 3, 4, 5, 6]).unwrap();

        for pair in sweep.windows(2) {
            assert!(pair[1].1 + 1e-12 >= pair[0].1);
        }
        assert!((sweep.last().unwrap().1 - 1.0).abs() < 1e-9);
        assert!(sweep.iter().all(|(_, v)| *v >= 0.0 && *v <= 1.0 + 1e-9));
    }

    #[test]
    fn test_components_are_ordered() {
        let pca = Pca::fit(&sample_data(), 4).unwrap();
        let variance = pca.explained_variance();
        for pair in variance.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
    }

    #[test]
    fn test_transform_shape_and_centering() {
        let data = sample_data();
        let (pca, projected) = Pca::fit_transform(&data, 3).unwrap();
        assert_eq!(projected.shape(), (30, 3));
        assert_eq!(pca.n_components(), 3);

        let means = projected.row_mean();
        assert!(means.iter().all(|m| m.abs() < 1e-9));
    }

    #[test]
    fn test_sign_convention() {
        let pca = Pca::fit(&sample_data(), 2).unwrap();
        for row in pca.components.row_iter() {
            let pivot = row
                .iter()
                .copied()
                .max_by(|a, b| a.abs().partial_cmp(&b.abs()).unwrap())
                .unwrap();
            assert!(pivot > 0.0);
        }
    }

    #[test]
    fn test_clamps_to_sample_count() {
        let data = DMatrix::from_fn(4, 10, |r, c| (r * c) as f64);
        let pca = Pca::fit(&data, 50).unwrap();
        assert_eq!(pca.n_components(), 4);
    }

    #[test]
    fn test_empty_input_is_error() {
        let data = DMatrix::<f64>::zeros(0, 5);
        assert!(Pca::fit(&data, 2).is_err());
    }
}
