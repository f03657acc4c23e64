//! Assembles per-tile results into the full-resolution output.

use crate::error::{StereoError, StereoResult};
use crate::tile::{Region, TileDescriptor};
use ndarray::{s, Array2, Array3, ArrayView3, Zip};
use serde::{Deserialize, Serialize};

const WEIGHT_FLOOR: f32 = 1e-3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum BlendMode {
	/// Tiles own disjoint destination cells; the padding margin supplies the context.
	#[default]
	Disjoint,
	/// Tile outputs overlap by `overlap` pixels and are averaged with center-weighted feathering.
	Feathered { overlap: usize },
}

impl BlendMode {
	pub fn overlap(&self) -> usize {
		match self {
			BlendMode::Disjoint => 0,
			BlendMode::Feathered { overlap } => *overlap,
		}
	}
}

pub struct Compositor {
	mode: BlendMode,
	output: Array3<f32>,
	weights: Array2<f32>,
}

impl Compositor {
	pub fn new(channels: usize, height: usize, width: usize, mode: BlendMode) -> Self {
		Self {
			mode,
			output: Array3::zeros((channels, height, width)),
			weights: Array2::zeros((height, width)),
		}
	}

	/// Writes one tile result.
	///
	/// `result` must span `tile.output`: the de-padded interior cropped to the image.
	pub fn write(&mut self, tile: &TileDescriptor, result: ArrayView3<f32>) -> StereoResult<()> {
		let (channels, height, width) = self.output.dim();
		let out = tile.output;
		if result.dim() != (channels, out.height, out.width) {
			return Err(StereoError::TensorError(format!(
				"tile {} result has shape {:?}, expected {:?}",
				tile.index,
				result.dim(),
				(channels, out.height, out.width)
			)));
		}
		if out.bottom() > height || out.right() > width {
			return Err(StereoError::TensorError(format!(
				"tile {} region {:?} exceeds output {}x{}",
				tile.index, out, width, height
			)));
		}

		match self.mode {
			BlendMode::Disjoint => self.write_disjoint(tile, result),
			BlendMode::Feathered { .. } => {
				self.accumulate(tile, result);
				Ok(())
			}
		}
	}

	fn write_disjoint(&mut self, tile: &TileDescriptor, result: ArrayView3<f32>) -> StereoResult<()> {
		let dst = tile.destination;
		let mut weights = self
			.weights
			.slice_mut(s![dst.row..dst.bottom(), dst.col..dst.right()]);
		if weights.iter().any(|&w| w != 0.0) {
			return Err(StereoError::TensorError(format!(
				"tile {} destination {:?} overlaps an already written tile",
				tile.index, dst
			)));
		}
		weights.fill(1.0);

		let rel = dst.relative_to(&tile.output);
		self.output
			.slice_mut(s![.., dst.row..dst.bottom(), dst.col..dst.right()])
			.assign(&result.slice(s![.., rel.row..rel.bottom(), rel.col..rel.right()]));
		Ok(())
	}

	fn accumulate(&mut self, tile: &TileDescriptor, result: ArrayView3<f32>) {
		let out = tile.output;
		let weight = feather_weights(tile);

		let mut acc = self
			.output
			.slice_mut(s![.., out.row..out.bottom(), out.col..out.right()]);
		for (mut acc_plane, res_plane) in acc.outer_iter_mut().zip(result.outer_iter()) {
			Zip::from(&mut acc_plane)
				.and(&res_plane)
				.and(&weight)
				.for_each(|a, &r, &w| *a += r * w);
		}
		self.weights
			.slice_mut(s![out.row..out.bottom(), out.col..out.right()])
			.zip_mut_with(&weight, |total, &w| *total += w);
	}

	/// Normalizes accumulated values and hands over the output buffer.
	pub fn finish(self) -> StereoResult<Array3<f32>> {
		let Compositor {
			mode,
			mut output,
			weights,
		} = self;

		if let Some(((row, col), _)) = weights.indexed_iter().find(|&(_, &w)| w <= 0.0) {
			return Err(StereoError::TensorError(format!(
				"output pixel ({}, {}) was not covered by any tile",
				row, col
			)));
		}

		if let BlendMode::Feathered { .. } = mode {
			for mut plane in output.outer_iter_mut() {
				plane.zip_mut_with(&weights, |v, &w| *v /= w);
			}
		}
		Ok(output)
	}
}

/// Raw (unnormalized) weight map over `tile.output`.
///
/// Separable tent peaking at the tile center and staying strictly positive at the edges, so every
/// covered pixel has a usable total weight.
pub fn feather_weights(tile: &TileDescriptor) -> Array2<f32> {
	let out = tile.output;
	let wy = tent(out.height);
	let wx = tent(out.width);
	Array2::from_shape_fn((out.height, out.width), |(y, x)| wy[y] * wx[x])
}

fn tent(len: usize) -> Vec<f32> {
	let half = len as f32 / 2.0;
	(0..len)
		.map(|i| {
			let d = ((i as f32 + 0.5) - half).abs() / (half + 1.0);
			(1.0 - d).max(0.0) + WEIGHT_FLOOR
		})
		.collect()
}

/// Normalized weight of every tile over the full image, as `(tile region, weights)`.
///
/// At each pixel the weights of all tiles covering it sum to one.
pub fn blend_weights(
	tiles: &[TileDescriptor],
	height: usize,
	width: usize,
	mode: BlendMode,
) -> Vec<(Region, Array2<f32>)> {
	let raw: Vec<(Region, Array2<f32>)> = tiles
		.iter()
		.map(|t| match mode {
			BlendMode::Disjoint => {
				let mut w = Array2::zeros((t.output.height, t.output.width));
				let rel = t.destination.relative_to(&t.output);
				w.slice_mut(s![rel.row..rel.bottom(), rel.col..rel.right()])
					.fill(1.0);
				(t.output, w)
			}
			BlendMode::Feathered { .. } => (t.output, feather_weights(t)),
		})
		.collect();

	let mut total = Array2::<f32>::zeros((height, width));
	for (region, w) in &raw {
		total
			.slice_mut(s![region.row..region.bottom(), region.col..region.right()])
			.zip_mut_with(w, |t, &v| *t += v);
	}

	raw.into_iter()
		.map(|(region, mut w)| {
			let t = total.slice(s![region.row..region.bottom(), region.col..region.right()]);
			w.zip_mut_with(&t, |v, &sum| {
				if sum > 0.0 {
					*v /= sum;
				}
			});
			(region, w)
		})
		.collect()
}
