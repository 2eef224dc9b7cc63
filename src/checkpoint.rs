// src/checkpoint.rs
//
// Checkpoints are keyed by the run configuration. The key keeps the
// human-readable descriptor format of earlier runs, e.g.
//
//   (1,1-1none-sigmoid_TW)-(100,5, 0.0001,1.0, 0.0, 0.0)
//
// but files are named after a sanitized, bounded stem that also carries a
// SHA-256 digest of the full configuration, since the descriptor leaves out
// some settings (leak, error function, pooling stride).
use crate::config::{AutoencoderConfig, TrainingConfig};
use crate::error::{CaeError, Result};
use crate::models::ConvAutoencoder;
use crate::module::Module;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const MAX_STEM_DESCRIPTOR: usize = 96;
/// Digest bytes kept in the file stem (16 hex characters).
const FINGERPRINT_BYTES: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointKey {
    descriptor: String,
    fingerprint: String,
}

impl CheckpointKey {
    /// Settings the network never reads (leak without `leaky_relu`, stride
    /// without pooling) do not change the key.
    pub fn new(autoencoder: &AutoencoderConfig, training: &TrainingConfig) -> Result<Self> {
        let canonical = serde_json::to_vec(&(autoencoder.canonical(), training))?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        let digest = hasher.finalize();
        Ok(CheckpointKey {
            descriptor: descriptor(autoencoder, training),
            fingerprint: hex::encode(&digest[..FINGERPRINT_BYTES]),
        })
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// File-system safe name: descriptor with separators rewritten and
    /// everything else outside `[A-Za-z0-9._-]` replaced, cut to a fixed
    /// length, then `-<fingerprint>`.
    pub fn file_stem(&self) -> String {
        let mut stem: String = self
            .descriptor
            .chars()
            .filter_map(|c| match c {
                '(' | ')' | ' ' => None,
                '|' => Some('+'),
                ',' => Some('_'),
                c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') => Some(c),
                _ => Some('_'),
            })
            .take(MAX_STEM_DESCRIPTOR)
            .collect();
        stem.push('-');
        stem.push_str(&self.fingerprint);
        stem
    }
}

impl fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor)
    }
}

/// `(<filters>-<channels><pooling>-<activation>[_TW])-(<batch>,<iters>, <step>,<mean>, <stddev>, <bias>)`
fn descriptor(ae: &AutoencoderConfig, training: &TrainingConfig) -> String {
    let filters = ae
        .layers
        .iter()
        .map(|l| format!("{},{}", l.filter_height, l.filter_width))
        .collect::<Vec<_>>()
        .join("|");
    let channels = ae
        .layers
        .iter()
        .map(|l| l.channels.to_string())
        .collect::<Vec<_>>()
        .join("|");
    let tying = if ae.tie_weights { "_TW" } else { "" };

    format!(
        "({}-{}{}-{}{})-({},{}, {},{}, {}, {})",
        filters,
        channels,
        ae.pooling,
        ae.activation,
        tying,
        training.batch_size,
        training.max_iterations,
        py_float(training.step_size),
        py_float(ae.weight_init_mean),
        py_float(ae.weight_init_stddev),
        py_float(ae.initial_bias),
    )
}

/// Shortest round-trip float text with a two-digit signed exponent in
/// scientific form: `1.0`, `0.0001`, `1e-05`, `1e+16`.
fn py_float(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    // `{:?}` switches to scientific at the same magnitudes, only the
    // exponent is spelled differently.
    let s = format!("{:?}", v);
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => s,
    }
}

/// What was true when a checkpoint was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub descriptor: String,
    pub autoencoder: AutoencoderConfig,
    pub training: TrainingConfig,
    pub iteration: usize,
    /// Error on the checkpoint batch, evaluated after the update.
    pub error: f32,
}

/// Directory of `<stem>.bin` parameter dumps with `<stem>.json` metadata.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CheckpointStore { dir: dir.into() }
    }

    pub fn weights_path(&self, key: &CheckpointKey) -> PathBuf {
        self.dir.join(format!("{}.bin", key.file_stem()))
    }

    pub fn metadata_path(&self, key: &CheckpointKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.file_stem()))
    }

    pub fn exists(&self, key: &CheckpointKey) -> bool {
        self.weights_path(key).is_file() && self.metadata_path(key).is_file()
    }

    /// Overwrites any earlier checkpoint under the same key. Both files are
    /// staged under temporary names first; the old metadata is removed
    /// before the new weights move in, so an interrupted save never leaves
    /// new weights next to old metadata.
    pub fn save(
        &self,
        model: &ConvAutoencoder,
        key: &CheckpointKey,
        metadata: &CheckpointMetadata,
    ) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| CaeError::io(&self.dir, e))?;

        let weights = self.weights_path(key);
        let meta_path = self.metadata_path(key);
        let weights_tmp = weights.with_extension("bin.tmp");
        let meta_tmp = meta_path.with_extension("json.tmp");

        let result = stage(model, metadata, &weights_tmp, &meta_tmp)
            .and_then(|()| commit(&weights_tmp, &weights, &meta_tmp, &meta_path));
        if result.is_err() {
            for tmp in [&weights_tmp, &meta_tmp] {
                if let Err(e) = fs::remove_file(tmp) {
                    if e.kind() != io::ErrorKind::NotFound {
                        tracing::warn!(path = %tmp.display(), error = %e, "cannot remove staged checkpoint file");
                    }
                }
            }
        }
        result?;

        tracing::debug!(
            key = %key,
            iteration = metadata.iteration,
            error = metadata.error,
            path = %weights.display(),
            "checkpoint saved"
        );
        Ok(())
    }

    pub fn read_metadata(&self, key: &CheckpointKey) -> Result<CheckpointMetadata> {
        let path = self.metadata_path(key);
        let json = fs::read_to_string(&path).map_err(|e| CaeError::io(&path, e))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Loads the parameters stored under `key` into `model` and returns the
    /// metadata recorded with them.
    pub fn load(&self, model: &ConvAutoencoder, key: &CheckpointKey) -> Result<CheckpointMetadata> {
        let metadata = self.read_metadata(key)?;
        if metadata.autoencoder.canonical() != model.config().canonical() {
            return Err(CaeError::config(format!(
                "checkpoint '{}' was written for a different architecture",
                metadata.descriptor
            )));
        }
        model.load(&self.weights_path(key))?;

        tracing::info!(
            key = %key,
            iteration = metadata.iteration,
            error = metadata.error,
            "checkpoint restored"
        );
        Ok(metadata)
    }
}

fn stage(
    model: &ConvAutoencoder,
    metadata: &CheckpointMetadata,
    weights_tmp: &Path,
    meta_tmp: &Path,
) -> Result<()> {
    model.save(weights_tmp)?;
    let json = serde_json::to_string_pretty(metadata)?;
    fs::write(meta_tmp, json).map_err(|e| CaeError::io(meta_tmp, e))
}

fn commit(weights_tmp: &Path, weights: &Path, meta_tmp: &Path, meta_path: &Path) -> Result<()> {
    match fs::remove_file(meta_path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(CaeError::io(meta_path, e)),
    }
    fs::rename(weights_tmp, weights).map_err(|e| CaeError::io(weights, e))?;
    fs::rename(meta_tmp, meta_path).map_err(|e| CaeError::io(meta_path, e))
}
