// src/visualize.rs
//
// Grayscale PNG grids of what the autoencoder sees: first-layer filters,
// and for single images the input, every hidden activation and the
// reconstruction.
use crate::autograd::no_grad;
use crate::config::InputShape;
use crate::error::{CaeError, Result};
use crate::models::ConvAutoencoder;
use image::{GrayImage, Luma};
use ndarray::{Array2, ArrayView2, ArrayViewD, Axis, Ix2};
use std::fs;
use std::path::{Path, PathBuf};

const GAP: u32 = 2;
const BACKGROUND: u8 = 255;
/// Upscaling factor applied to a whole grid.
const SCALE: u32 = 4;
/// Side of one filter tile before `SCALE`.
const FILTER_CELL: usize = 16;

pub struct Visualizer {
    output_dir: PathBuf,
    folder_name: String,
    run_name: String,
}

impl Visualizer {
    pub fn new(output_dir: impl Into<PathBuf>, folder_name: &str, run_name: &str) -> Self {
        Visualizer {
            output_dir: output_dir.into(),
            folder_name: folder_name.to_string(),
            run_name: run_name.to_string(),
        }
    }

    /// `digit_reconstructions/<folder>/<run>/<run>_<i>_feature_maps.png`
    pub fn feature_maps_path(&self, index: usize) -> PathBuf {
        self.output_dir
            .join("digit_reconstructions")
            .join(&self.folder_name)
            .join(&self.run_name)
            .join(format!("{}_{}_feature_maps.png", self.run_name, index))
    }

    /// `digit_reconstructions/cae_example<i>.png`
    pub fn filter_panel_path(&self, index: usize) -> PathBuf {
        self.output_dir
            .join("digit_reconstructions")
            .join(format!("cae_example{}.png", index))
    }

    pub fn filters_path(&self) -> PathBuf {
        self.output_dir.join("filters").join("filter_example.png")
    }

    /// One grid per image for the first `count` rows of `images`: the
    /// input, one row per hidden activation with a tile per channel, then
    /// the reconstruction.
    pub fn render_feature_maps(
        &self,
        model: &ConvAutoencoder,
        images: ArrayView2<'_, f32>,
        count: usize,
    ) -> Result<Vec<PathBuf>> {
        let input = model.input_shape();
        let cell = (input.height, input.width);
        let mut written = Vec::new();

        for (i, row) in images.outer_iter().take(count).enumerate() {
            tracing::debug!(image = i, "rendering feature maps");
            let batch = row.to_owned().insert_axis(Axis(0)).into_dyn();
            let pass = no_grad(|| model.forward(&batch))?;

            let mut rows = Vec::with_capacity(pass.walkthrough.len() + 2);
            rows.push(per_tile(&channel_maps(batch.view(), input)?));
            for activation in pass.walkthrough.iter() {
                rows.push(per_tile(&channel_maps(activation.data_ref().view(), input)?));
            }
            rows.push(per_tile(&channel_maps(pass.reconstruction.data_ref().view(), input)?));

            let grid = render_grid(&rows, cell);
            let path = self.feature_maps_path(i);
            save(&grid, &path)?;
            written.push(path);
        }

        tracing::info!(
            images = written.len(),
            folder = %self.folder_name,
            run = %self.run_name,
            "feature maps written"
        );
        Ok(written)
    }

    /// One panel per image for the first `count` rows of `images`: the
    /// input, the first-layer filters on its first channel, the first hidden
    /// layer's map for each filter, and the reconstruction. With
    /// `common_scaling` the filter row and the map row each share one scale
    /// symmetric around zero instead of stretching every tile on its own.
    pub fn render_filter_panel(
        &self,
        model: &ConvAutoencoder,
        images: ArrayView2<'_, f32>,
        count: usize,
        common_scaling: bool,
    ) -> Result<Vec<PathBuf>> {
        let input = model.input_shape();
        let filters = first_layer_filters(model)?;
        let first_channel: Vec<Array2<f32>> = filters.iter().filter_map(|row| row.first().cloned()).collect();
        let mut written = Vec::new();

        for (i, row) in images.outer_iter().take(count).enumerate() {
            tracing::debug!(image = i, common_scaling, "rendering filter panel");
            let batch = row.to_owned().insert_axis(Axis(0)).into_dyn();
            let pass = no_grad(|| model.forward(&batch))?;
            let first_hidden = pass
                .walkthrough
                .get(0)
                .ok_or_else(|| CaeError::shape("forward pass produced no hidden activation"))?;

            let rows = vec![
                per_tile(&channel_maps(batch.view(), input)?),
                scaled(&first_channel, common_scaling),
                scaled(&channel_maps(first_hidden.data_ref().view(), input)?, common_scaling),
                per_tile(&channel_maps(pass.reconstruction.data_ref().view(), input)?),
            ];

            let grid = render_grid(&rows, (input.height, input.width));
            let path = self.filter_panel_path(i);
            save(&grid, &path)?;
            written.push(path);
        }

        tracing::info!(images = written.len(), common_scaling, "filter panels written");
        Ok(written)
    }

    /// First-layer kernels: one row per input channel, one tile per filter.
    pub fn render_filters(&self, model: &ConvAutoencoder) -> Result<PathBuf> {
        let filters = first_layer_filters(model)?;
        let in_c = filters.first().map_or(0, Vec::len);
        let rows: Vec<Vec<Array2<u8>>> = (0..in_c)
            .map(|c| filters.iter().map(|f| normalize(f[c].view())).collect())
            .collect();

        let grid = render_grid(&rows, (FILTER_CELL, FILTER_CELL));
        let path = self.filters_path();
        save(&grid, &path)?;
        tracing::info!(path = %path.display(), "filters written");
        Ok(path)
    }
}

/// First encoder kernel as `[filter][input channel]` maps.
fn first_layer_filters(model: &ConvAutoencoder) -> Result<Vec<Vec<Array2<f32>>>> {
    let filters = model
        .filters()
        .into_iter()
        .next()
        .ok_or_else(|| CaeError::config("model has no encoder layer"))?;
    tracing::debug!(shape = ?filters.shape(), "reading first-layer filters");

    let maps = filters
        .outer_iter()
        .map(|filter| {
            filter
                .outer_iter()
                .map(|k| {
                    k.into_dimensionality::<Ix2>()
                        .map(|k| k.to_owned())
                        .map_err(|e| CaeError::shape(e.to_string()))
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(maps)
}

/// Splits a single-sample `[1, C, H, W]` activation, or a flattened
/// `[1, H*W*C]` input row, into its channel maps. Rows use the same
/// row-major `[C, H, W]` layout the model reads them with.
fn channel_maps(a: ArrayViewD<'_, f32>, input: InputShape) -> Result<Vec<Array2<f32>>> {
    let sample = match a.ndim() {
        4 => a.index_axis_move(Axis(0), 0).to_owned(),
        2 if a.len() == input.pixels() => {
            let flat: Vec<f32> = a.iter().copied().collect();
            ndarray::ArrayD::from_shape_vec(ndarray::IxDyn(&[input.channels, input.height, input.width]), flat)
                .map_err(|e| CaeError::shape(e.to_string()))?
        }
        2 => {
            return Err(CaeError::shape(format!(
                "row of {} values does not hold a {:?} image",
                a.len(),
                input
            )))
        }
        n => return Err(CaeError::shape(format!("cannot draw a rank {} activation", n))),
    };
    let maps = sample
        .outer_iter()
        .map(|m| m.into_dimensionality::<Ix2>().map(|m| m.to_owned()))
        .collect::<std::result::Result<Vec<_>, ndarray::ShapeError>>()
        .map_err(|e| CaeError::shape(e.to_string()))?;
    Ok(maps)
}

fn scaled(maps: &[Array2<f32>], common_scaling: bool) -> Vec<Array2<u8>> {
    if common_scaling {
        shared_symmetric(maps)
    } else {
        per_tile(maps)
    }
}

fn per_tile(maps: &[Array2<f32>]) -> Vec<Array2<u8>> {
    maps.iter().map(|m| normalize(m.view())).collect()
}

/// One scale for all `maps`, `[-max|v|, max|v|]`, so zero is mid grey.
fn shared_symmetric(maps: &[Array2<f32>]) -> Vec<Array2<u8>> {
    let max_abs = maps
        .iter()
        .flat_map(|m| m.iter())
        .fold(0.0f32, |acc, &v| acc.max(v.abs()));
    maps.iter()
        .map(|m| normalize_between(m.view(), -max_abs, max_abs))
        .collect()
}

/// Min-max scales to `0..=255`. A constant map is drawn black.
pub fn normalize(map: ArrayView2<'_, f32>) -> Array2<u8> {
    let (lo, hi) = map
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    normalize_between(map, lo, hi)
}

/// Maps `lo..=hi` onto `0..=255`, clipping outside values.
fn normalize_between(map: ArrayView2<'_, f32>, lo: f32, hi: f32) -> Array2<u8> {
    let range = hi - lo;
    if !range.is_finite() || range <= f32::EPSILON {
        return Array2::zeros(map.raw_dim());
    }
    map.mapv(|v| (((v - lo) / range).clamp(0.0, 1.0) * 255.0).round() as u8)
}

/// Lays out rows of tiles; every tile is resampled (nearest neighbour)
/// into a `cell` sized slot, then the grid is upscaled by `SCALE`.
fn render_grid(rows: &[Vec<Array2<u8>>], cell: (usize, usize)) -> GrayImage {
    let (ch, cw) = (cell.0 as u32, cell.1 as u32);
    let cols = rows.iter().map(Vec::len).max().unwrap_or(0) as u32;
    let width = (cols * (cw + GAP) + GAP).max(1);
    let height = (rows.len() as u32 * (ch + GAP) + GAP).max(1);
    let mut canvas = GrayImage::from_pixel(width, height, Luma([BACKGROUND]));

    for (r, tiles) in rows.iter().enumerate() {
        let y0 = GAP + r as u32 * (ch + GAP);
        for (c, tile) in tiles.iter().enumerate() {
            let x0 = GAP + c as u32 * (cw + GAP);
            let (th, tw) = tile.dim();
            for y in 0..ch {
                for x in 0..cw {
                    let sy = y as usize * th / cell.0;
                    let sx = x as usize * tw / cell.1;
                    canvas.put_pixel(x0 + x, y0 + y, Luma([tile[[sy, sx]]]));
                }
            }
        }
    }

    image::imageops::resize(
        &canvas,
        width * SCALE,
        height * SCALE,
        image::imageops::FilterType::Nearest,
    )
}

fn save(img: &GrayImage, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| CaeError::io(dir, e))?;
    }
    img.save(path)?;
    Ok(())
}
