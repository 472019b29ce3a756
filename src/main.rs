//! Deepfake Detection Server
//!
//! Loads an EfficientNet-B0 checkpoint once at startup and serves real/fake
//! predictions over HTTP. The same pipeline is available offline through the
//! `predict` subcommand.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use burn::tensor::backend::Backend;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info};

use deepfake_detect::backend::{default_device, select_device, ComputeDevice, CpuBackend};
#[cfg(feature = "cuda")]
use deepfake_detect::backend::CudaBackend;
use deepfake_detect::checkpoint::{load_classifier, save_classifier};
use deepfake_detect::inference::{BurnClassifier, Predictor};
use deepfake_detect::server::{self, AppState};
use deepfake_detect::utils::logging::{init_logging, LogConfig};
use deepfake_detect::{ServerConfig, VERSION};

/// Deepfake Detection Server
///
/// Classifies uploaded images as real or fake with an EfficientNet-B0.
#[derive(Parser, Debug)]
#[command(name = "deepfake-server")]
#[command(author = "Warre Snaet")]
#[command(version)]
#[command(about = "Real/fake image classification API built on Burn and axum", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ServerConfig,

    /// Serve HTTP when omitted
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify image files and print one JSON line per image
    Predict {
        /// Images to classify
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },

    /// Convert any supported checkpoint into a Burn record for faster startup
    Convert {
        /// Output file (written with the .mpk extension)
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&LogConfig::with_level(cli.config.log_level())).map_err(anyhow::Error::msg)?;

    info!("Deepfake Detection Server v{}", VERSION);

    let compute = select_device(cli.config.force_cpu);
    match compute {
        #[cfg(feature = "cuda")]
        ComputeDevice::Cuda => run::<CudaBackend>(cli, compute).await,
        _ => run::<CpuBackend>(cli, ComputeDevice::Cpu).await,
    }
}

async fn run<B: Backend>(cli: Cli, compute: ComputeDevice) -> Result<()> {
    info!("Using backend: {}", compute.backend_name());
    let device = default_device::<B>();

    let model = load_classifier::<B>(&cli.config.model_path, &device)
        .with_context(|| format!("Failed to load model from {}", cli.config.model_path.display()))?;
    info!("Model loaded on device: {}", compute);

    match cli.command {
        None => {
            let predictor = Predictor::new(Arc::new(BurnClassifier::new(model, device)));
            let state = Arc::new(AppState::new(predictor, compute));
            server::serve(state, &cli.config).await?;
        }

        Some(Commands::Predict { images }) => {
            let predictor = Predictor::new(Arc::new(BurnClassifier::new(model, device)));
            let mut failures = 0;

            for path in &images {
                match predictor.predict_file(path) {
                    Ok(prediction) => {
                        let prediction = prediction.rounded();
                        println!(
                            "{}",
                            json!({
                                "file": path.display().to_string(),
                                "label": prediction.label,
                                "score": prediction.score,
                            })
                        );
                    }
                    Err(e) => {
                        error!("{}: {}", path.display(), e);
                        failures += 1;
                    }
                }
            }

            if failures > 0 {
                anyhow::bail!("{} of {} images could not be classified", failures, images.len());
            }
        }

        Some(Commands::Convert { output }) => {
            let written = save_classifier(model, &output)?;
            info!("Model saved to {}", written.display());
        }
    }

    Ok(())
}
