//! Tiled, batched application of an image-to-image transform.
//!
//! The transform is an explicit strategy object: it declares its padding and output channels,
//! pads the full image once, builds a model input for each tile window and runs one forward pass
//! per batch. The driver owns scheduling, batching, cropping and compositing.

use crate::compositor::{BlendMode, Compositor};
use crate::error::{StereoError, StereoResult};
use crate::tile::{Padding, Region, TileScheduler};
use ndarray::{s, Array2, Array3, Array4, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileConfig {
	/// Context margin the transform needs on every side of a tile.
	pub padding: usize,
	/// Channel count of the transform's output.
	pub channels: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
	pub tile_size: usize,
	pub batch_size: usize,
	#[serde(default)]
	pub blend: BlendMode,
}

impl Default for RenderOptions {
	fn default() -> Self {
		Self {
			tile_size: 256,
			batch_size: 64,
			blend: BlendMode::Disjoint,
		}
	}
}

pub trait TileTransform {
	/// Full-image state produced once per render, typically the padded inputs.
	type Prepared;

	fn config(&self) -> TileConfig;

	fn preprocess(
		&self,
		image: ArrayView3<f32>,
		depth: Option<ArrayView2<f32>>,
		padding: Padding,
	) -> StereoResult<Self::Prepared>;

	/// Model input for the window `source` (padded-image coordinates) as `(channels, h, w)`.
	fn tile_input(&self, prepared: &Self::Prepared, source: Region) -> StereoResult<Array3<f32>>;

	/// Runs one batch `(n, channels, h, w)`.
	///
	/// Results may keep the padded window extent, in which case the driver crops the margin, or
	/// already be reduced to the tile interior.
	fn forward(&mut self, batch: Array4<f32>) -> StereoResult<Array4<f32>>;
}

/// Image and optional depth, border-replicated once for a whole render.
#[derive(Clone, Debug)]
pub struct PaddedPlanes {
	pub image: Array3<f32>,
	pub depth: Option<Array2<f32>>,
}

impl PaddedPlanes {
	pub fn new(
		image: ArrayView3<f32>,
		depth: Option<ArrayView2<f32>>,
		padding: Padding,
	) -> Self {
		Self {
			image: pad_replicate(image, padding),
			depth: depth.map(|d| pad_replicate_2d(d, padding)),
		}
	}

	pub fn image_window(&self, source: Region) -> ArrayView3<'_, f32> {
		self.image.slice(s![
			..,
			source.row..source.bottom(),
			source.col..source.right()
		])
	}

	pub fn depth_window(&self, source: Region) -> Option<ArrayView2<'_, f32>> {
		self.depth.as_ref().map(|d| {
			d.slice(s![source.row..source.bottom(), source.col..source.right()])
		})
	}
}

/// Clamp-to-edge padding of a `(channels, height, width)` buffer.
pub fn pad_replicate(image: ArrayView3<f32>, padding: Padding) -> Array3<f32> {
	let (channels, height, width) = image.dim();
	let out_h = height + padding.top + padding.bottom;
	let out_w = width + padding.left + padding.right;
	Array3::from_shape_fn((channels, out_h, out_w), |(c, y, x)| {
		let sy = clamp_index(y, padding.top, height);
		let sx = clamp_index(x, padding.left, width);
		image[[c, sy, sx]]
	})
}

pub fn pad_replicate_2d(plane: ArrayView2<f32>, padding: Padding) -> Array2<f32> {
	let (height, width) = plane.dim();
	let out_h = height + padding.top + padding.bottom;
	let out_w = width + padding.left + padding.right;
	Array2::from_shape_fn((out_h, out_w), |(y, x)| {
		plane[[
			clamp_index(y, padding.top, height),
			clamp_index(x, padding.left, width),
		]]
	})
}

fn clamp_index(padded: usize, offset: usize, extent: usize) -> usize {
	padded.saturating_sub(offset).min(extent - 1)
}

/// Renders `image` through `transform` tile by tile.
///
/// Any failing batch fails the whole render; callers wanting a retry should lower
/// `batch_size` or `tile_size` themselves.
pub fn render<T>(
	image: ArrayView3<f32>,
	depth: Option<ArrayView2<f32>>,
	transform: &mut T,
	options: &RenderOptions,
) -> StereoResult<Array3<f32>>
where
	T: TileTransform + ?Sized,
{
	let (_, height, width) = image.dim();
	if let Some(d) = depth {
		if d.dim() != (height, width) {
			return Err(StereoError::TensorError(format!(
				"depth extent {:?} does not match image extent {:?}",
				d.dim(),
				(height, width)
			)));
		}
	}
	if options.batch_size == 0 {
		return Err(StereoError::ConfigError(
			"batch size must be at least 1".to_string(),
		));
	}

	let config = transform.config();
	let grid = TileScheduler::new(options.tile_size, config.padding)
		.with_overlap(options.blend.overlap())
		.schedule(height, width)?;
	let interior = options.tile_size - 2 * config.padding;

	debug!(
		width,
		height,
		tile_size = options.tile_size,
		padding = config.padding,
		batch_size = options.batch_size,
		tiles = grid.tiles.len(),
		"Starting tiled render"
	);

	let prepared = transform.preprocess(image, depth, grid.padding)?;
	let mut compositor = Compositor::new(config.channels, height, width, options.blend);

	for (batch_index, chunk) in grid.tiles.chunks(options.batch_size).enumerate() {
		let inputs = chunk
			.iter()
			.map(|tile| transform.tile_input(&prepared, tile.source))
			.collect::<StereoResult<Vec<_>>>()?;
		let views: Vec<_> = inputs.iter().map(|a| a.view()).collect();
		let batch = ndarray::stack(Axis(0), &views)?;

		trace!(batch_index, tiles = chunk.len(), "Running batch");
		let results = transform.forward(batch)?;

		let (n, channels, out_h, out_w) = results.dim();
		if n != chunk.len() || channels != config.channels {
			return Err(StereoError::TensorError(format!(
				"transform returned {:?} for a batch of {} tiles with {} channels",
				results.dim(),
				chunk.len(),
				config.channels
			)));
		}
		let margin = if (out_h, out_w) == (options.tile_size, options.tile_size) {
			config.padding
		} else if (out_h, out_w) == (interior, interior) {
			0
		} else {
			return Err(StereoError::TensorError(format!(
				"transform returned tiles of {}x{}, expected {}x{} or {}x{}",
				out_w, out_h, options.tile_size, options.tile_size, interior, interior
			)));
		};

		for (i, tile) in chunk.iter().enumerate() {
			let out = tile.output;
			let result = results.slice(s![
				i,
				..,
				margin..margin + out.height,
				margin..margin + out.width
			]);
			compositor.write(tile, result)?;
		}
	}

	compositor.finish()
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Identity {
		padding: usize,
		crop: bool,
		calls: usize,
	}

	impl Identity {
		fn new(padding: usize) -> Self {
			Self {
				padding,
				crop: false,
				calls: 0,
			}
		}
	}

	impl TileTransform for Identity {
		type Prepared = PaddedPlanes;

		fn config(&self) -> TileConfig {
			TileConfig {
				padding: self.padding,
				channels: 3,
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
			Ok(prepared.image_window(source).to_owned())
		}

		fn forward(&mut self, batch: Array4<f32>) -> StereoResult<Array4<f32>> {
			self.calls += 1;
			if self.crop {
				let p = self.padding;
				let (_, _, h, w) = batch.dim();
				Ok(batch.slice(s![.., .., p..h - p, p..w - p]).to_owned())
			} else {
				Ok(batch)
			}
		}
	}

	/// Emits the padded depth plane as a single channel.
	struct DepthEcho;

	impl TileTransform for DepthEcho {
		type Prepared = PaddedPlanes;

		fn config(&self) -> TileConfig {
			TileConfig {
				padding: 3,
				channels: 1,
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
			let depth = prepared
				.depth_window(source)
				.ok_or_else(|| StereoError::Other("no depth".to_string()))?;
			Ok(depth.to_owned().insert_axis(Axis(0)))
		}

		fn forward(&mut self, batch: Array4<f32>) -> StereoResult<Array4<f32>> {
			Ok(batch)
		}
	}

	struct FailOnSecondBatch {
		inner: Identity,
	}

	impl TileTransform for FailOnSecondBatch {
		type Prepared = PaddedPlanes;

		fn config(&self) -> TileConfig {
			self.inner.config()
		}

		fn preprocess(
			&self,
			image: ArrayView3<f32>,
			depth: Option<ArrayView2<f32>>,
			padding: Padding,
		) -> StereoResult<PaddedPlanes> {
			self.inner.preprocess(image, depth, padding)
		}

		fn tile_input(&self, prepared: &PaddedPlanes, source: Region) -> StereoResult<Array3<f32>> {
			self.inner.tile_input(prepared, source)
		}

		fn forward(&mut self, batch: Array4<f32>) -> StereoResult<Array4<f32>> {
			if self.inner.calls == 1 {
				return Err(StereoError::ModelError("out of memory".to_string()));
			}
			self.inner.forward(batch)
		}
	}

	fn test_image(height: usize, width: usize) -> Array3<f32> {
		Array3::from_shape_fn((3, height, width), |(c, y, x)| {
			((c * 31 + y * 7 + x * 13) % 97) as f32 / 96.0
		})
	}

	fn options(tile_size: usize, batch_size: usize, blend: BlendMode) -> RenderOptions {
		RenderOptions {
			tile_size,
			batch_size,
			blend,
		}
	}

	#[test]
	fn identity_render_reproduces_input() {
		let image = test_image(53, 81);
		for batch_size in [1, 2, 5, 64] {
			let mut t = Identity::new(7);
			let out = render(
				image.view(),
				None,
				&mut t,
				&options(32, batch_size, BlendMode::Disjoint),
			)
			.unwrap();
			assert_eq!(out, image);
		}
	}

	#[test]
	fn identity_render_with_cropping_transform() {
		let image = test_image(40, 40);
		let mut t = Identity::new(4);
		t.crop = true;
		let out = render(
			image.view(),
			None,
			&mut t,
			&options(20, 3, BlendMode::Disjoint),
		)
		.unwrap();
		assert_eq!(out, image);
	}

	#[test]
	fn feathered_identity_render_reproduces_input() {
		let image = test_image(70, 45);
		let mut t = Identity::new(5);
		let out = render(
			image.view(),
			None,
			&mut t,
			&options(30, 4, BlendMode::Feathered { overlap: 6 }),
		)
		.unwrap();
		for (a, b) in out.iter().zip(image.iter()) {
			assert!((a - b).abs() < 1e-5);
		}
	}

	#[test]
	fn batches_amortize_forward_calls() {
		let image = test_image(100, 100);
		// interior 18 -> 6x6 tiles
		let mut t = Identity::new(7);
		render(
			image.view(),
			None,
			&mut t,
			&options(32, 10, BlendMode::Disjoint),
		)
		.unwrap();
		assert_eq!(t.calls, 4);
	}

	#[test]
	fn depth_is_padded_alongside_image() {
		let image = test_image(25, 37);
		let depth = Array2::from_shape_fn((25, 37), |(y, x)| (y * 37 + x) as f32);
		let out = render(
			image.view(),
			Some(depth.view()),
			&mut DepthEcho,
			&options(16, 8, BlendMode::Disjoint),
		)
		.unwrap();
		assert_eq!(out.index_axis(Axis(0), 0), depth);
	}

	#[test]
	fn failing_batch_fails_whole_render() {
		let image = test_image(64, 64);
		let mut t = FailOnSecondBatch {
			inner: Identity::new(2),
		};
		let err = render(
			image.view(),
			None,
			&mut t,
			&options(16, 2, BlendMode::Disjoint),
		)
		.unwrap_err();
		assert!(matches!(err, StereoError::ModelError(_)));
	}

	#[test]
	fn rejects_zero_batch_and_small_tiles() {
		let image = test_image(10, 10);
		let err = render(
			image.view(),
			None,
			&mut Identity::new(7),
			&options(14, 4, BlendMode::Disjoint),
		)
		.unwrap_err();
		assert!(err.is_config());

		let err = render(
			image.view(),
			None,
			&mut Identity::new(1),
			&options(8, 0, BlendMode::Disjoint),
		)
		.unwrap_err();
		assert!(err.is_config());
	}

	#[test]
	fn mismatched_depth_is_rejected() {
		let image = test_image(10, 10);
		let depth = Array2::<f32>::zeros((9, 10));
		assert!(render(
			image.view(),
			Some(depth.view()),
			&mut Identity::new(1),
			&options(8, 4, BlendMode::Disjoint),
		)
		.is_err());
	}

	#[test]
	fn replicate_padding_clamps_to_edges() {
		let plane = Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
		let padded = pad_replicate_2d(
			plane.view(),
			Padding {
				top: 1,
				bottom: 0,
				left: 2,
				right: 1,
			},
		);
		assert_eq!(padded.dim(), (3, 5));
		assert_eq!(padded.row(0).to_vec(), vec![1.0, 1.0, 1.0, 2.0, 2.0]);
		assert_eq!(padded.row(2).to_vec(), vec![3.0, 3.0, 3.0, 4.0, 4.0]);
	}
}
