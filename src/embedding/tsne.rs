//! t-SNE（厳密計算版, O(N²)）

use anyhow::bail;
use nalgebra::DMatrix;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tracing::{debug, info, warn};

use crate::config::TsneInit;
use crate::embedding::pca::Pca;

const EARLY_EXAGGERATION: f64 = 12.0;
const EXAGGERATION_ITERATIONS: usize = 250;
const INITIAL_MOMENTUM: f64 = 0.5;
const FINAL_MOMENTUM: f64 = 0.8;
const MIN_GAIN: f64 = 0.01;
const INIT_SCALE: f64 = 1e-4;
const BINARY_SEARCH_STEPS: usize = 100;
const PERPLEXITY_TOLERANCE: f64 = 1e-5;
const LOG_INTERVAL: usize = 50;

/// t-SNEの設定
#[derive(Debug, Clone)]
pub struct TsneConfig {
    pub n_components: usize,
    pub perplexity: f64,
    pub n_iter: usize,
    pub init: TsneInit,
    pub seed: u64,
}

impl Default for TsneConfig {
    fn default() -> Self {
        Self {
            n_components: 2,
            perplexity: 30.0,
            n_iter: 1000,
            init: TsneInit::Pca,
            seed: 1,
        }
    }
}

/// 行間の二乗ユークリッド距離（N × N, 行優先）
fn squared_distances(data: &DMatrix<f64>) -> Vec<f64> {
    let n = data.nrows();
    let mut distances = vec![0.0; n * n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = (data.row(i) - data.row(j)).norm_squared();
            distances[i * n + j] = d;
            distances[j * n + i] = d;
        }
    }
    distances
}

/// 各点の条件付き確率 p(j|i) を二分探索で求める
fn conditional_probabilities(distances: &[f64], n: usize, perplexity: f64) -> Vec<f64> {
    let target_entropy = perplexity.ln();
    let mut probabilities = vec![0.0; n * n];

    for i in 0..n {
        let row = &distances[i * n..(i + 1) * n];
        let offset = row
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, d)| *d)
            .fold(f64::INFINITY, f64::min);

        let mut beta = 1.0;
        let mut beta_min = f64::NEG_INFINITY;
        let mut beta_max = f64::INFINITY;
        let mut p = vec![0.0; n];

        for _ in 0..BINARY_SEARCH_STEPS {
            let mut sum = 0.0;
            let mut weighted = 0.0;
            for j in 0..n {
                if j == i {
                    p[j] = 0.0;
                    continue;
                }
                let shifted = row[j] - offset;
                p[j] = (-shifted * beta).exp();
                sum += p[j];
                weighted += shifted * p[j];
            }
            let sum = sum.max(f64::MIN_POSITIVE);
            let entropy = sum.ln() + beta * weighted / sum;
            for value in p.iter_mut() {
                *value /= sum;
            }

            let diff = entropy - target_entropy;
            if diff.abs() < PERPLEXITY_TOLERANCE {
                break;
            }
            if diff > 0.0 {
                beta_min = beta;
                beta = if beta_max.is_finite() {
                    (beta + beta_max) / 2.0
                } else {
                    beta * 2.0
                };
            } else {
                beta_max = beta;
                beta = if beta_min.is_finite() {
                    (beta + beta_min) / 2.0
                } else {
                    beta / 2.0
                };
            }
        }

        probabilities[i * n..(i + 1) * n].copy_from_slice(&p);
    }

    probabilities
}

/// 対称化した同時確率 P = (P + Pᵀ) / 2N
fn joint_probabilities(conditional: &[f64], n: usize) -> Vec<f64> {
    let mut joint = vec![0.0; n * n];
    let denom = 2.0 * n as f64;
    for i in 0..n {
        for j in 0..n {
            if i != j {
                joint[i * n + j] =
                    ((conditional[i * n + j] + conditional[j * n + i]) / denom).max(1e-12);
            }
        }
    }
    joint
}

fn initial_embedding(
    data: &DMatrix<f64>,
    config: &TsneConfig,
) -> anyhow::Result<DMatrix<f64>> {
    let n = data.nrows();
    let dims = config.n_components;

    match config.init {
        TsneInit::Pca => {
            let (_, projected) = Pca::fit_transform(data, dims)?;
            let mut embedding = DMatrix::zeros(n, dims);
            let available = projected.ncols().min(dims);
            embedding
                .columns_mut(0, available)
                .copy_from(&projected.columns(0, available));

            let first = embedding.column(0);
            let mean = first.mean();
            let std = (first.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64).sqrt();
            if std > 0.0 {
                embedding *= INIT_SCALE / std;
                Ok(embedding)
            } else {
                warn!("[t-SNE] PCA初期化の分散が0のため乱数初期化に切り替えます");
                random_embedding(n, dims, config.seed)
            }
        }
        TsneInit::Random => random_embedding(n, dims, config.seed),
    }
}

fn random_embedding(n: usize, dims: usize, seed: u64) -> anyhow::Result<DMatrix<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, INIT_SCALE)?;
    Ok(DMatrix::from_fn(n, dims, |_, _| normal.sample(&mut rng)))
}

/// 低次元側の類似度の分子 1 / (1 + |yi - yj|²)
fn student_t_kernel(embedding: &DMatrix<f64>) -> Vec<f64> {
    let n = embedding.nrows();
    let mut kernel = vec![0.0; n * n];
    for i in 0..n {
        for j in (i + 1)..n {
            let value = 1.0 / (1.0 + (embedding.row(i) - embedding.row(j)).norm_squared());
            kernel[i * n + j] = value;
            kernel[j * n + i] = value;
        }
    }
    kernel
}

fn kl_divergence(joint: &[f64], kernel: &[f64]) -> f64 {
    let sum: f64 = kernel.iter().sum::<f64>().max(f64::MIN_POSITIVE);
    joint
        .iter()
        .zip(kernel)
        .filter(|(p, _)| **p > 0.0)
        .map(|(p, k)| p * (p / (k / sum).max(1e-12)).ln())
        .sum()
}

/// t-SNEで (N, D) を (N, n_components) に埋め込む
pub fn fit_transform(data: &DMatrix<f64>, config: &TsneConfig) -> anyhow::Result<DMatrix<f64>> {
    let n = data.nrows();
    let dims = config.n_components;
    if n == 0 {
        bail!("t-SNEの入力が空です");
    }
    if dims == 0 {
        bail!("t-SNEの出力次元が0です");
    }
    if n == 1 {
        return Ok(DMatrix::zeros(1, dims));
    }

    let max_perplexity = ((n - 1) as f64 / 3.0).max(1.0);
    let perplexity = if config.perplexity > max_perplexity {
        warn!(
            "[t-SNE] パープレキシティ {} はサンプル数 {} に対して大きすぎるため {} に切り詰めます",
            config.perplexity, n, max_perplexity
        );
        max_perplexity
    } else {
        config.perplexity
    };

    info!(
        "[t-SNE] 開始: サンプル数 {}, 入力次元 {}, パープレキシティ {}",
        n,
        data.ncols(),
        perplexity
    );

    let distances = squared_distances(data);
    let conditional = conditional_probabilities(&distances, n, perplexity);
    let joint = joint_probabilities(&conditional, n);

    let mut embedding = initial_embedding(data, config)?;
    let mut update = DMatrix::<f64>::zeros(n, dims);
    let mut gains = DMatrix::<f64>::from_element(n, dims, 1.0);
    let learning_rate = (n as f64 / EARLY_EXAGGERATION / 4.0).max(50.0);

    for iteration in 0..config.n_iter {
        let exaggerating = iteration < EXAGGERATION_ITERATIONS;
        let exaggeration = if exaggerating { EARLY_EXAGGERATION } else { 1.0 };
        let momentum = if exaggerating {
            INITIAL_MOMENTUM
        } else {
            FINAL_MOMENTUM
        };

        let kernel = student_t_kernel(&embedding);
        let kernel_sum: f64 = kernel.iter().sum::<f64>().max(f64::MIN_POSITIVE);

        let mut gradient = DMatrix::<f64>::zeros(n, dims);
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let k = kernel[i * n + j];
                let coefficient = 4.0 * (exaggeration * joint[i * n + j] - k / kernel_sum) * k;
                for d in 0..dims {
                    gradient[(i, d)] += coefficient * (embedding[(i, d)] - embedding[(j, d)]);
                }
            }
        }

        for index in 0..n * dims {
            let g = gradient[index];
            let gain = if g * update[index] < 0.0 {
                gains[index] + 0.2
            } else {
                gains[index] * 0.8
            };
            gains[index] = gain.max(MIN_GAIN);
            update[index] = momentum * update[index] - learning_rate * gains[index] * g;
            embedding[index] += update[index];
        }

        if (iteration + 1) % LOG_INTERVAL == 0 {
            let error = kl_divergence(&joint, &student_t_kernel(&embedding));
            if exaggerating {
                debug!(
                    "[t-SNE] Iteration {}: KL divergence (exaggerated) = {:.6}",
                    iteration + 1,
                    error
                );
            } else {
                debug!("[t-SNE] Iteration {}: KL divergence = {:.6}", iteration + 1, error);
            }
        }
    }

    let error = kl_divergence(&joint, &student_t_kernel(&embedding));
    info!(
        "[t-SNE] KL divergence after {} iterations: {:.6}",
        config.n_iter, error
    );

    Ok(embedding)
}
