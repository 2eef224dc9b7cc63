// src/dataset.rs
use crate::config::InputShape;
use crate::error::{CaeError, Result};
use mnist::{Mnist, MnistBuilder};
use ndarray::prelude::*;
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::seq::SliceRandom;
use ndarray_rand::rand::SeedableRng;
use std::path::Path;

pub const MNIST_CLASSES: usize = 10;
pub const MNIST_TRAIN: usize = 55_000;
pub const MNIST_VALIDATION: usize = 5_000;
pub const MNIST_TEST: usize = 10_000;

const MNIST_FILES: [&str; 4] = [
    "train-images-idx3-ubyte",
    "train-labels-idx1-ubyte",
    "t10k-images-idx3-ubyte",
    "t10k-labels-idx1-ubyte",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Validation,
    Test,
}

/// Flattened images `[B, H*W*C]` in `[0, 1]` and one-hot labels `[B, classes]`.
#[derive(Debug, Clone)]
pub struct Batch {
    pub images: Array2<f32>,
    pub labels: Array2<f32>,
}

pub trait DatasetProvider {
    /// Next `size` training examples. Wraps into a reshuffled epoch when the
    /// current one runs out.
    fn next_batch(&mut self, size: usize) -> Result<Batch>;

    /// All images of a split, one row per image.
    fn images(&self, split: Split) -> ArrayView2<'_, f32>;

    fn labels(&self, split: Split) -> ArrayView2<'_, f32>;

    fn input_shape(&self) -> InputShape;
}

/// Images and labels of one split.
#[derive(Debug, Clone)]
pub struct SplitData {
    images: Array2<f32>,
    labels: Array2<f32>,
}

impl SplitData {
    pub fn new(images: Array2<f32>, labels: Array2<f32>) -> Result<Self> {
        if images.nrows() != labels.nrows() {
            return Err(CaeError::Dataset(format!(
                "{} images but {} labels",
                images.nrows(),
                labels.nrows()
            )));
        }
        Ok(SplitData { images, labels })
    }

    /// Digit labels are one-hot encoded over `classes`.
    pub fn from_digits(images: Array2<f32>, digits: &[u8], classes: usize) -> Result<Self> {
        let mut one_hot = Array2::<f32>::zeros((digits.len(), classes));
        for (i, &d) in digits.iter().enumerate() {
            let d = d as usize;
            if d >= classes {
                return Err(CaeError::Dataset(format!(
                    "label {} at row {} outside {} classes",
                    d, i, classes
                )));
            }
            one_hot[[i, d]] = 1.0;
        }
        Self::new(images, one_hot)
    }

    pub fn empty(pixels: usize, classes: usize) -> Self {
        SplitData {
            images: Array2::zeros((0, pixels)),
            labels: Array2::zeros((0, classes)),
        }
    }

    pub fn len(&self) -> usize {
        self.images.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Train/validation/test splits held in memory, served in shuffled epochs.
pub struct InMemoryDataset {
    input: InputShape,
    train: SplitData,
    validation: SplitData,
    test: SplitData,
    order: Vec<usize>,
    index_in_epoch: usize,
    epochs_completed: usize,
    rng: StdRng,
}

impl InMemoryDataset {
    /// `seed` makes the batch order reproducible; `None` seeds from entropy.
    pub fn new(
        input: InputShape,
        train: SplitData,
        validation: SplitData,
        test: SplitData,
        seed: Option<u64>,
    ) -> Result<Self> {
        for (name, split) in [("train", &train), ("validation", &validation), ("test", &test)] {
            if split.images.ncols() != input.pixels() {
                return Err(CaeError::Dataset(format!(
                    "{} images have {} pixels, input geometry needs {}",
                    name,
                    split.images.ncols(),
                    input.pixels()
                )));
            }
        }
        if train.is_empty() {
            return Err(CaeError::Dataset("training split is empty".to_string()));
        }

        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let mut order: Vec<usize> = (0..train.len()).collect();
        order.shuffle(&mut rng);

        Ok(InMemoryDataset {
            input,
            train,
            validation,
            test,
            order,
            index_in_epoch: 0,
            epochs_completed: 0,
            rng,
        })
    }

    pub fn epochs_completed(&self) -> usize {
        self.epochs_completed
    }

    fn split(&self, split: Split) -> &SplitData {
        match split {
            Split::Train => &self.train,
            Split::Validation => &self.validation,
            Split::Test => &self.test,
        }
    }
}

impl DatasetProvider for InMemoryDataset {
    fn next_batch(&mut self, size: usize) -> Result<Batch> {
        let n = self.train.len();
        if size == 0 || size > n {
            return Err(CaeError::Dataset(format!(
                "batch of {} requested from {} training examples",
                size, n
            )));
        }

        let mut rows = Vec::with_capacity(size);
        let start = self.index_in_epoch;
        if start + size > n {
            // Rest of this epoch, then the head of a freshly shuffled one.
            rows.extend_from_slice(&self.order[start..]);
            self.epochs_completed += 1;
            self.order.shuffle(&mut self.rng);
            let rest = size - (n - start);
            rows.extend_from_slice(&self.order[..rest]);
            self.index_in_epoch = rest;
            tracing::debug!(epoch = self.epochs_completed, "training set reshuffled");
        } else {
            rows.extend_from_slice(&self.order[start..start + size]);
            self.index_in_epoch += size;
        }

        Ok(Batch {
            images: self.train.images.select(Axis(0), &rows),
            labels: self.train.labels.select(Axis(0), &rows),
        })
    }

    fn images(&self, split: Split) -> ArrayView2<'_, f32> {
        self.split(split).images.view()
    }

    fn labels(&self, split: Split) -> ArrayView2<'_, f32> {
        self.split(split).labels.view()
    }

    fn input_shape(&self) -> InputShape {
        self.input
    }
}

/// Reads the four uncompressed IDX files from `dir`: the first 55 000
/// training images train, the last 5 000 validate.
pub fn load_mnist(dir: &Path, seed: Option<u64>) -> Result<InMemoryDataset> {
    let missing: Vec<&str> = MNIST_FILES
        .iter()
        .copied()
        .filter(|f| !dir.join(f).is_file())
        .collect();
    if !missing.is_empty() {
        return Err(CaeError::Dataset(format!(
            "MNIST files missing from '{}': {}",
            dir.display(),
            missing.join(", ")
        )));
    }
    let base = dir
        .to_str()
        .ok_or_else(|| CaeError::Dataset(format!("non UTF-8 dataset path '{}'", dir.display())))?;

    tracing::info!(dir = %dir.display(), "loading MNIST");
    let Mnist {
        trn_img,
        trn_lbl,
        val_img,
        val_lbl,
        tst_img,
        tst_lbl,
        ..
    } = MnistBuilder::new()
        .label_format_digit()
        .training_set_length(MNIST_TRAIN as u32)
        .validation_set_length(MNIST_VALIDATION as u32)
        .test_set_length(MNIST_TEST as u32)
        .base_path(base)
        .finalize();

    let input = InputShape::grayscale(28, 28);
    let train = SplitData::from_digits(process_images(trn_img, input)?, &trn_lbl, MNIST_CLASSES)?;
    let validation = SplitData::from_digits(process_images(val_img, input)?, &val_lbl, MNIST_CLASSES)?;
    let test = SplitData::from_digits(process_images(tst_img, input)?, &tst_lbl, MNIST_CLASSES)?;
    tracing::info!(
        train = train.len(),
        validation = validation.len(),
        test = test.len(),
        "MNIST loaded"
    );

    InMemoryDataset::new(input, train, validation, test, seed)
}

fn process_images(data: Vec<u8>, input: InputShape) -> Result<Array2<f32>> {
    let pixels = input.pixels();
    let rows = data.len() / pixels;
    let data_f32: Vec<f32> = data.into_iter().map(|x| x as f32 / 255.0).collect();
    Array2::from_shape_vec((rows, pixels), data_f32)
        .map_err(|e| CaeError::Dataset(format!("image buffer does not split into {}-pixel rows: {}", pixels, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `n` 2x2 images whose pixels all equal `row / n`.
    fn dataset(n: usize) -> InMemoryDataset {
        let input = InputShape::grayscale(2, 2);
        let images = Array2::from_shape_fn((n, 4), |(r, _)| r as f32 / n as f32);
        let digits: Vec<u8> = (0..n).map(|r| (r % 10) as u8).collect();
        let train = SplitData::from_digits(images, &digits, 10).unwrap();
        InMemoryDataset::new(input, train, SplitData::empty(4, 10), SplitData::empty(4, 10), Some(7)).unwrap()
    }

    fn row_ids(batch: &Batch, n: usize) -> Vec<usize> {
        batch.images.column(0).iter().map(|&v| (v * n as f32).round() as usize).collect()
    }

    #[test]
    fn one_epoch_visits_every_example_once() {
        let mut d = dataset(10);
        let mut seen: Vec<usize> = Vec::new();
        for _ in 0..5 {
            seen.extend(row_ids(&d.next_batch(2).unwrap(), 10));
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert_eq!(d.epochs_completed(), 0);
    }

    #[test]
    fn batch_spanning_epochs_wraps() {
        let mut d = dataset(10);
        d.next_batch(7).unwrap();
        let b = d.next_batch(7).unwrap();
        assert_eq!(b.images.nrows(), 7);
        assert_eq!(d.epochs_completed(), 1);
        assert_eq!(d.index_in_epoch, 4);
    }

    #[test]
    fn labels_are_one_hot_and_follow_images() {
        let mut d = dataset(10);
        let b = d.next_batch(10).unwrap();
        for (row, label) in row_ids(&b, 10).iter().zip(b.labels.outer_iter()) {
            assert_eq!(label.sum(), 1.0);
            assert_eq!(label[row % 10], 1.0);
        }
    }

    #[test]
    fn seeded_order_is_reproducible() {
        let a = row_ids(&dataset(10).next_batch(5).unwrap(), 10);
        let b = row_ids(&dataset(10).next_batch(5).unwrap(), 10);
        assert_eq!(a, b);
    }

    #[test]
    fn oversized_batch_is_rejected() {
        assert!(matches!(dataset(4).next_batch(5), Err(CaeError::Dataset(_))));
        assert!(matches!(dataset(4).next_batch(0), Err(CaeError::Dataset(_))));
    }

    #[test]
    fn geometry_mismatch_is_rejected() {
        let train = SplitData::from_digits(Array2::zeros((3, 5)), &[0, 1, 2], 10).unwrap();
        let err = InMemoryDataset::new(
            InputShape::grayscale(2, 2),
            train,
            SplitData::empty(4, 10),
            SplitData::empty(4, 10),
            None,
        );
        assert!(matches!(err, Err(CaeError::Dataset(_))));
        assert!(SplitData::from_digits(Array2::zeros((1, 4)), &[10], 10).is_err());
    }

    #[test]
    fn missing_mnist_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        match load_mnist(dir.path(), None) {
            Err(CaeError::Dataset(msg)) => assert!(msg.contains("train-images-idx3-ubyte")),
            other => panic!("expected dataset error, got {:?}", other.map(|_| ())),
        }
    }
}
