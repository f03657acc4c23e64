//! Learned row-flow warp driven through the tiled renderer.
//!
//! The model is trained for one shift direction and one divergence. The opposite eye is produced
//! by mirroring the inputs and the result; other divergences are approximated by pretending the
//! image has a different width.

use crate::depth::{depth_range, normalize_depth_with};
use crate::error::{StereoError, StereoResult};
use crate::model::{is_supported_divergence, WarpModel, SUPPORTED_DIVERGENCES};
use crate::tile::{Padding, Region, TileScheduler};
use crate::tiled::{render, PaddedPlanes, RenderOptions, TileConfig, TileTransform};
use crate::warp::{Eye, Warp};
use ndarray::{s, Array3, Array4, ArrayView2, ArrayView3};
use tracing::debug;

pub const ROW_FLOW_PADDING: usize = 7;
pub const ROW_FLOW_TILE_SIZE: usize = 256;
pub const ROW_FLOW_INPUT_CHANNELS: usize = 7;
const ROW_FLOW_OUTPUT_CHANNELS: usize = 3;

/// Reference shift (in pixels) the divergence feature is expressed against.
const DIVERGENCE_FEATURE_SCALE: f32 = 32.0;

pub struct NeuralWarp {
	model: Box<dyn WarpModel>,
	options: RenderOptions,
}

impl NeuralWarp {
	pub fn new(model: Box<dyn WarpModel>, options: RenderOptions) -> StereoResult<Self> {
		let fixed = model.fixed_divergence();
		if !is_supported_divergence(fixed) {
			return Err(StereoError::ConfigError(format!(
				"row_flow model trained at divergence {} is not one of {:?}",
				fixed, SUPPORTED_DIVERGENCES
			)));
		}
		TileScheduler::new(options.tile_size, ROW_FLOW_PADDING)
			.with_overlap(options.blend.overlap())
			.validate()?;
		if options.batch_size == 0 {
			return Err(StereoError::ConfigError(
				"batch size must be at least 1".to_string(),
			));
		}
		Ok(Self { model, options })
	}

	pub fn fixed_divergence(&self) -> f32 {
		self.model.fixed_divergence()
	}

	pub fn options(&self) -> &RenderOptions {
		&self.options
	}
}

impl Warp for NeuralWarp {
	fn warp(
		&mut self,
		image: ArrayView3<f32>,
		depth: ArrayView2<f32>,
		divergence: f32,
		eye: Eye,
	) -> StereoResult<Array3<f32>> {
		if !is_supported_divergence(divergence) {
			return Err(StereoError::ConfigError(format!(
				"row_flow only supports divergence 2.0 or 2.5 (got {})",
				divergence
			)));
		}

		let (_, height, width) = image.dim();
		if depth.dim() != (height, width) {
			return Err(StereoError::TensorError(format!(
				"depth extent {:?} does not match image extent {:?}",
				depth.dim(),
				(height, width)
			)));
		}

		let fixed_divergence = self.model.fixed_divergence();
		let (depth_min, depth_max) = depth_range(depth);
		let mut transform = RowFlowTransform {
			model: self.model.as_mut(),
			fixed_divergence,
			image_width: effective_image_width(width, divergence, fixed_divergence),
			depth_min,
			depth_max,
		};

		debug!(
			eye = eye.name(),
			divergence,
			fixed_divergence,
			effective_width = transform.image_width,
			"Row-flow warp"
		);

		match eye {
			Eye::Left => render(image, Some(depth), &mut transform, &self.options),
			Eye::Right => {
				let image = image.slice(s![.., .., ..;-1]);
				let depth = depth.slice(s![.., ..;-1]);
				let out = render(image, Some(depth), &mut transform, &self.options)?;
				Ok(out.slice(s![.., .., ..;-1]).to_owned())
			}
		}
	}
}

/// Width the model is told the image has.
///
/// Scaling the width instead of the divergence lets a model trained at one divergence
/// approximate another: the model's shift is proportional to width.
pub fn effective_image_width(width: usize, divergence: f32, fixed_divergence: f32) -> f32 {
	width as f32 * (divergence / fixed_divergence)
}

/// Constant value of the divergence input plane.
pub fn divergence_feature(divergence: f32, image_width: f32) -> f32 {
	let shift_px = divergence * 0.5 * 0.01 * image_width;
	shift_px / DIVERGENCE_FEATURE_SCALE
}

/// Per-render tile strategy wrapping the model.
struct RowFlowTransform<'a> {
	model: &'a mut dyn WarpModel,
	fixed_divergence: f32,
	image_width: f32,
	depth_min: f32,
	depth_max: f32,
}

impl TileTransform for RowFlowTransform<'_> {
	type Prepared = PaddedPlanes;

	fn config(&self) -> TileConfig {
		TileConfig {
			padding: ROW_FLOW_PADDING,
			channels: ROW_FLOW_OUTPUT_CHANNELS,
		}
	}

	fn preprocess(
		&self,
		image: ArrayView3<f32>,
		depth: Option<ArrayView2<f32>>,
		padding: Padding,
	) -> StereoResult<PaddedPlanes> {
		Ok(PaddedPlanes::new(image, depth, padding))
	}

	fn tile_input(&self, prepared: &PaddedPlanes, source: Region) -> StereoResult<Array3<f32>> {
		let depth = prepared.depth_window(source).ok_or_else(|| {
			StereoError::TensorError("row_flow requires a depth map".to_string())
		})?;
		Ok(make_input_tensor(
			prepared.image_window(source),
			depth,
			self.fixed_divergence,
			self.image_width,
			self.depth_min,
			self.depth_max,
		))
	}

	fn forward(&mut self, batch: Array4<f32>) -> StereoResult<Array4<f32>> {
		self.model.forward(batch)
	}
}

/// Builds the 7-channel model input for one tile window.
///
/// Channels: RGB, depth normalized with the whole-image range, divergence feature, x and y
/// coordinates in `[-1, 1]` across the window.
pub fn make_input_tensor(
	rgb: ArrayView3<f32>,
	depth: ArrayView2<f32>,
	divergence: f32,
	image_width: f32,
	depth_min: f32,
	depth_max: f32,
) -> Array3<f32> {
	let (_, h, w) = rgb.dim();
	let feature = divergence_feature(divergence, image_width);
	let mut input = Array3::<f32>::zeros((ROW_FLOW_INPUT_CHANNELS, h, w));

	input.slice_mut(s![0..3, .., ..]).assign(&rgb.slice(s![0..3, .., ..]));
	input
		.slice_mut(s![3, .., ..])
		.assign(&depth.mapv(|d| normalize_depth_with(d, depth_min, depth_max)));
	input.slice_mut(s![4, .., ..]).fill(feature);
	for y in 0..h {
		let gy = linspace_at(y, h);
		for x in 0..w {
			input[[5, y, x]] = linspace_at(x, w);
			input[[6, y, x]] = gy;
		}
	}
	input
}

fn linspace_at(i: usize, n: usize) -> f32 {
	if n <= 1 {
		-1.0
	} else {
		-1.0 + 2.0 * i as f32 / (n - 1) as f32
	}
}
