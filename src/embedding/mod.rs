//! 特徴量の次元削減（PCA → t-SNE）

pub mod pca;
pub mod tsne;

use nalgebra::DMatrix;
use tracing::info;

use crate::config::EmbeddingSettings;

pub use pca::{clamp_components, variance_sweep, Pca};
pub use tsne::TsneConfig;

/// 抽出した特徴量と2次元埋め込み
#[derive(Debug, Clone)]
pub struct Embedding {
    /// (N, F)
    pub raw: DMatrix<f64>,
    /// (N, tsne_components)
    pub reduced: DMatrix<f64>,
}

/// 寄与率の確認、PCAによる圧縮、t-SNEによる埋め込みを順に行う
pub fn reduce(raw: DMatrix<f64>, settings: &EmbeddingSettings) -> anyhow::Result<Embedding> {
    variance_sweep(&raw, &settings.pca_sweep)?;

    let (pca, compressed) = Pca::fit_transform(&raw, settings.pca_components)?;
    info!(
        "[PCA] {} 成分に圧縮しました - Variance PCA: {}",
        pca.n_components(),
        pca.cumulative_variance_ratio()
    );

    let config = TsneConfig {
        n_components: settings.tsne_components,
        perplexity: settings.perplexity,
        n_iter: settings.tsne_iterations,
        init: settings.tsne_init,
        seed: settings.seed,
    };
    let reduced = tsne::fit_transform(&compressed, &config)?;

    Ok(Embedding { raw, reduced })
}
