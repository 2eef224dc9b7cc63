use mimalloc::MiMalloc;

use anyhow::{Context, Result};
use cae::checkpoint::{CheckpointKey, CheckpointStore};
use cae::dataset::{load_mnist, DatasetProvider, Split};
use cae::{ConvAutoencoder, LossLog, RunConfig, Trainer, Visualizer};
use std::path::PathBuf;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// JSON file overriding the built-in run parameters.
const CONFIG_ENV: &str = "CAE_RUN_CONFIG";

fn run_config() -> Result<RunConfig> {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => {
            let path = PathBuf::from(path);
            tracing::info!(path = %path.display(), "reading run config");
            RunConfig::from_json_file(&path)
                .with_context(|| format!("invalid run config '{}'", path.display()))
        }
        None => {
            let cfg = RunConfig::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cae=info")),
        )
        .init();

    let cfg = run_config()?;

    // Configuration and geometry errors surface before the dataset is read.
    let model = ConvAutoencoder::new(cfg.autoencoder.clone(), cfg.input)
        .context("cannot build autoencoder")?;
    let trainer = Trainer::new(cfg.training.clone())?;
    let key = CheckpointKey::new(&cfg.autoencoder, &cfg.training)?;
    tracing::info!(key = %key, folder = %cfg.folder_name, run = %cfg.run_name, "run configured");

    let mut dataset = load_mnist(&cfg.dataset_dir, None)
        .with_context(|| format!("cannot load MNIST from '{}'", cfg.dataset_dir.display()))?;

    let store = CheckpointStore::new(&cfg.weights_dir);
    if cfg.restore_if_exists && store.exists(&key) {
        tracing::info!("checkpoint for this configuration found, loading weights");
        store.load(&model, &key).context("cannot restore checkpoint")?;
    } else {
        let mut log = LossLog::for_run(&cfg.log_dir, &cfg.folder_name, &cfg.run_name)?;
        let report = trainer
            .train(&model, &mut dataset, &mut log, Some(&store))
            .context("training failed")?;
        tracing::info!(
            iterations = report.state.iteration,
            final_loss = report.state.last_loss,
            log = %log.csv_path().display(),
            "training complete"
        );
    }

    let split = if cfg.use_training_set { Split::Train } else { Split::Test };
    let images = dataset.images(split);
    let visualizer = Visualizer::new(&cfg.output_dir, &cfg.folder_name, &cfg.run_name);
    visualizer.render_filters(&model)?;
    visualizer.render_feature_maps(&model, images, cfg.visualize_images)?;
    if cfg.filter_panel {
        visualizer.render_filter_panel(&model, images, cfg.visualize_images, cfg.common_scaling)?;
    }

    Ok(())
}
