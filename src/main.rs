//! Click検出器の学習と特徴量の可視化

use burn::backend::{NdArray, Wgpu};
use burn_autodiff::Autodiff;
use burn_ndarray::NdArrayDevice;
use burn_wgpu::WgpuDevice;
use click_detector_lib::{run, DeviceType, PipelineConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = PipelineConfig::load_or_default();
    config.display();

    let result = match config.device_type {
        DeviceType::Cpu => {
            info!("CPU (NdArray) モードで学習を開始します");
            run::<Autodiff<NdArray>>(&config, &NdArrayDevice::Cpu)
        }
        DeviceType::Wgpu => {
            info!("GPU (WGPU) モードで学習を開始します");
            run::<Autodiff<Wgpu>>(&config, &WgpuDevice::default())
        }
    };

    if let Err(e) = result {
        error!("エラー: {:#}", e);
        std::process::exit(1);
    }
}
