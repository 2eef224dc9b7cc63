// src/train.rs
use crate::checkpoint::{CheckpointKey, CheckpointMetadata, CheckpointStore};
use crate::config::TrainingConfig;
use crate::dataset::DatasetProvider;
use crate::error::{CaeError, Result};
use crate::models::ConvAutoencoder;
use crate::module::Module;
use crate::optim::{Optimizer, SGD};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Receives the loss at every reporting step.
pub trait LossSink {
    fn record(&mut self, iteration: usize, loss: f32) -> Result<()>;
}

impl LossSink for Vec<(usize, f32)> {
    fn record(&mut self, iteration: usize, loss: f32) -> Result<()> {
        self.push((iteration, loss));
        Ok(())
    }
}

/// `iteration,loss` rows in a CSV file, truncated when a run starts.
pub struct LossLog {
    csv_path: PathBuf,
}

impl LossLog {
    pub fn create(csv_path: impl Into<PathBuf>) -> Result<Self> {
        let csv_path = csv_path.into();
        if let Some(dir) = csv_path.parent() {
            fs::create_dir_all(dir).map_err(|e| CaeError::io(dir, e))?;
        }
        let mut f = File::create(&csv_path).map_err(|e| CaeError::io(&csv_path, e))?;
        writeln!(f, "iteration,loss").map_err(|e| CaeError::io(&csv_path, e))?;
        tracing::debug!(path = %csv_path.display(), "loss log created");
        Ok(LossLog { csv_path })
    }

    /// `<log_dir>/<folder>/<run>/loss.csv`
    pub fn for_run(log_dir: &Path, folder_name: &str, run_name: &str) -> Result<Self> {
        Self::create(log_dir.join(folder_name).join(run_name).join("loss.csv"))
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

impl LossSink for LossLog {
    fn record(&mut self, iteration: usize, loss: f32) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .map_err(|e| CaeError::io(&self.csv_path, e))?;
        writeln!(f, "{},{:.6}", iteration, loss).map_err(|e| CaeError::io(&self.csv_path, e))?;
        Ok(())
    }
}

/// Progress of one run. Starts from zero every run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingState {
    pub iteration: usize,
    pub last_loss: f32,
    /// Mean of every loss seen so far in this run.
    pub mean_loss: f32,
}

impl TrainingState {
    fn update(&mut self, loss: f32) {
        self.iteration += 1;
        self.last_loss = loss;
        self.mean_loss += (loss - self.mean_loss) / self.iteration as f32;
    }
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub key: CheckpointKey,
    pub state: TrainingState,
    /// Checkpoints written, zero without a store.
    pub checkpoints: usize,
}

pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Trainer { config })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Runs `max_iterations` SGD steps. Every `chk_iterations` steps and
    /// after the last one the loss goes to `sink` and, given a store, the
    /// parameters are checkpointed with their post-update error on the
    /// same batch. The first error aborts the run.
    pub fn train<D: DatasetProvider + ?Sized>(
        &self,
        model: &ConvAutoencoder,
        dataset: &mut D,
        sink: &mut dyn LossSink,
        store: Option<&CheckpointStore>,
    ) -> Result<TrainingReport> {
        let key = CheckpointKey::new(model.config(), &self.config)?;
        if dataset.input_shape() != model.input_shape() {
            return Err(CaeError::shape(format!(
                "dataset serves {:?} images, model expects {:?}",
                dataset.input_shape(),
                model.input_shape()
            )));
        }

        let mut optimizer = SGD::new(model.parameters(), self.config.step_size as f32);
        let mut state = TrainingState::default();
        let mut checkpoints = 0;
        let max = self.config.max_iterations;

        tracing::info!(
            key = %key,
            batch_size = self.config.batch_size,
            iterations = max,
            step_size = self.config.step_size,
            "training started"
        );

        for it in 1..=max {
            let batch = dataset.next_batch(self.config.batch_size)?.images.into_dyn();

            optimizer.zero_grad();
            let loss = {
                let pass = model.forward(&batch)?;
                pass.error.backward();
                pass.error.item()
            };
            optimizer.step();
            state.update(loss);

            if !loss.is_finite() {
                tracing::warn!(iteration = it, loss, "loss is not finite");
            }

            if it % self.config.chk_iterations == 0 || it == max {
                tracing::info!(iteration = it, loss, mean_loss = state.mean_loss, "step");
                sink.record(it, loss)?;

                if let Some(store) = store {
                    let metadata = CheckpointMetadata {
                        descriptor: key.descriptor().to_string(),
                        autoencoder: model.config().clone(),
                        training: self.config.clone(),
                        iteration: it,
                        error: model.error(&batch)?,
                    };
                    store.save(model, &key, &metadata)?;
                    checkpoints += 1;
                }
            }
        }
        optimizer.zero_grad();

        tracing::info!(
            key = %key,
            iterations = state.iteration,
            final_loss = state.last_loss,
            checkpoints,
            "training finished"
        );
        Ok(TrainingReport {
            key,
            state,
            checkpoints,
        })
    }
}
