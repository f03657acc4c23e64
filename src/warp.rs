//! Depth-guided horizontal warping of one eye view.
//!
//! Two strategies share the [`Warp`] interface: a closed-form bicubic resampling warp and the
//! learned row-flow warp in [`crate::row_flow`]. [`WarpEngine`] selects between them from
//! configuration.

use crate::depth::normalize_depth;
use crate::error::{StereoError, StereoResult};
use crate::model::WarpModel;
use crate::row_flow::NeuralWarp;
use crate::tiled::RenderOptions;
use ndarray::{Array3, ArrayView2, ArrayView3, Zip};
use serde::{Deserialize, Serialize};

/// Converts divergence (percent of half the image width) to normalized grid units.
const DIVERGENCE_SCALE: f32 = 0.01;

/// Cubic convolution coefficient, matching the usual bicubic grid sampler.
const CUBIC_A: f32 = -0.75;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Eye {
	Left,
	Right,
}

impl Eye {
	pub fn shift(self) -> f32 {
		match self {
			Eye::Left => -1.0,
			Eye::Right => 1.0,
		}
	}

	pub fn name(self) -> &'static str {
		match self {
			Eye::Left => "left",
			Eye::Right => "right",
		}
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarpMethod {
	GridSample,
	#[default]
	RowFlow,
}

impl WarpMethod {
	pub fn name(&self) -> &'static str {
		match self {
			WarpMethod::GridSample => "grid_sample",
			WarpMethod::RowFlow => "row_flow",
		}
	}
}

pub trait Warp {
	/// Produces the view for `eye` from a channel-first image and its depth map.
	fn warp(
		&mut self,
		image: ArrayView3<f32>,
		depth: ArrayView2<f32>,
		divergence: f32,
		eye: Eye,
	) -> StereoResult<Array3<f32>>;
}

/// Closed-form warp: bicubic resampling along rows, displacement `(1 - d²)`-weighted.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResampleWarp;

impl Warp for ResampleWarp {
	fn warp(
		&mut self,
		image: ArrayView3<f32>,
		depth: ArrayView2<f32>,
		divergence: f32,
		eye: Eye,
	) -> StereoResult<Array3<f32>> {
		let (channels, height, width) = image.dim();
		if depth.dim() != (height, width) {
			return Err(StereoError::TensorError(format!(
				"depth extent {:?} does not match image extent {:?}",
				depth.dim(),
				(height, width)
			)));
		}

		let depth = normalize_depth(depth.to_owned());
		let strength = eye.shift() * divergence * DIVERGENCE_SCALE;
		// align-corners unnormalization: one grid unit spans (width - 1) / 2 pixels
		let half_span = (width.saturating_sub(1)) as f32 / 2.0;

		let mut output = Array3::<f32>::zeros((channels, height, width));
		Zip::indexed(&mut output).par_for_each(|(c, y, x), out| {
			let d = depth[[y, x]];
			let index_shift = (1.0 - d * d) * strength;
			let src_x = x as f32 - index_shift * half_span;
			let v = sample_bicubic(image.index_axis(ndarray::Axis(0), c), y as f32, src_x);
			*out = v.clamp(0.0, 1.0);
		});

		Ok(output)
	}
}

/// Bicubic sample of `plane` at pixel coordinates `(y, x)`; taps outside the plane are
/// clamped to the nearest edge pixel.
pub fn sample_bicubic(plane: ArrayView2<f32>, y: f32, x: f32) -> f32 {
	let (height, width) = plane.dim();
	let y0 = y.floor();
	let x0 = x.floor();
	let wy = cubic_weights(y - y0);
	let wx = cubic_weights(x - x0);
	let (y0, x0) = (y0 as i64, x0 as i64);

	let mut sum = 0.0f32;
	for (i, wyi) in wy.iter().enumerate() {
		let yi = clamp_tap(y0 - 1 + i as i64, height);
		let mut row = 0.0f32;
		for (j, wxj) in wx.iter().enumerate() {
			let xj = clamp_tap(x0 - 1 + j as i64, width);
			row += plane[[yi, xj]] * wxj;
		}
		sum += row * wyi;
	}
	sum
}

fn clamp_tap(index: i64, extent: usize) -> usize {
	index.clamp(0, extent as i64 - 1) as usize
}

fn cubic_weights(t: f32) -> [f32; 4] {
	[
		cubic_far(t + 1.0),
		cubic_near(t),
		cubic_near(1.0 - t),
		cubic_far(2.0 - t),
	]
}

fn cubic_near(x: f32) -> f32 {
	((CUBIC_A + 2.0) * x - (CUBIC_A + 3.0)) * x * x + 1.0
}

fn cubic_far(x: f32) -> f32 {
	((CUBIC_A * x - 5.0 * CUBIC_A) * x + 8.0 * CUBIC_A) * x - 4.0 * CUBIC_A
}

/// Warp strategy chosen by configuration.
pub enum WarpEngine {
	Resample(ResampleWarp),
	Neural(NeuralWarp),
}

impl WarpEngine {
	pub fn resample() -> Self {
		WarpEngine::Resample(ResampleWarp)
	}

	pub fn neural(model: Box<dyn WarpModel>, options: RenderOptions) -> StereoResult<Self> {
		Ok(WarpEngine::Neural(NeuralWarp::new(model, options)?))
	}

	pub fn method(&self) -> WarpMethod {
		match self {
			WarpEngine::Resample(_) => WarpMethod::GridSample,
			WarpEngine::Neural(_) => WarpMethod::RowFlow,
		}
	}
}

impl Warp for WarpEngine {
	fn warp(
		&mut self,
		image: ArrayView3<f32>,
		depth: ArrayView2<f32>,
		divergence: f32,
		eye: Eye,
	) -> StereoResult<Array3<f32>> {
		match self {
			WarpEngine::Resample(w) => w.warp(image, depth, divergence, eye),
			WarpEngine::Neural(w) => w.warp(image, depth, divergence, eye),
		}
	}
}
