use crate::error::StereoResult;
use image::DynamicImage;
use ndarray::{Array2, ArrayView2};

/// Source of per-pixel depth for an image.
///
/// The returned map has the image's extent and a non-negative range where smaller values are
/// nearer to the camera. It does not need to be normalized.
pub trait DepthOracle: Send {
	fn infer(&mut self, image: &DynamicImage) -> StereoResult<Array2<f32>>;
}

/// `(min, max)` of a depth map. Empty maps yield `(0.0, 0.0)`.
pub fn depth_range(depth: ArrayView2<f32>) -> (f32, f32) {
	if depth.is_empty() {
		return (0.0, 0.0);
	}
	let min = depth.iter().copied().fold(f32::INFINITY, f32::min);
	let max = depth.iter().copied().fold(f32::NEG_INFINITY, f32::max);
	(min, max)
}

/// Min-max normalizes to `[0, 1]`. Flat maps are left untouched.
pub fn normalize_depth(mut depth: Array2<f32>) -> Array2<f32> {
	let (min, max) = depth_range(depth.view());
	let range = max - min;
	if range > 1e-6 {
		depth.mapv_inplace(|v| (v - min) / range);
	}
	depth
}

/// Normalizes with an externally supplied range, clamping to `[0, 1]`.
pub fn normalize_depth_with(value: f32, min: f32, max: f32) -> f32 {
	let range = max - min;
	if range > 1e-6 {
		((value - min) / range).clamp(0.0, 1.0)
	} else {
		0.0
	}
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxDepthEstimator;

#[cfg(feature = "onnx")]
mod onnx {
	use super::DepthOracle;
	use crate::error::{StereoError, StereoResult};
	use image::DynamicImage;
	use ndarray::Array2;
	use ort::session::{builder::GraphOptimizationLevel, Session};

	const INPUT_SIZE: u32 = 518;
	const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
	const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

	/// Depth Anything style estimator. The model predicts relative inverse depth (near is
	/// large), which is flipped so that near is small.
	pub struct OnnxDepthEstimator {
		session: Session,
	}

	impl OnnxDepthEstimator {
		pub fn new(model_path: &str) -> StereoResult<Self> {
			let session = Session::builder()
				.map_err(|e| StereoError::ModelError(format!("Failed to create session: {}", e)))?
				.with_optimization_level(GraphOptimizationLevel::Level3)
				.map_err(|e| StereoError::ModelError(format!("Failed to set opt level: {}", e)))?
				.with_intra_threads(4)
				.map_err(|e| StereoError::ModelError(format!("Failed to set threads: {}", e)))?
				.commit_from_file(model_path)
				.map_err(|e| StereoError::ModelError(format!("Failed to load ONNX model: {}", e)))?;

			Ok(Self { session })
		}
	}

	impl DepthOracle for OnnxDepthEstimator {
		fn infer(&mut self, image: &DynamicImage) -> StereoResult<Array2<f32>> {
			let (orig_width, orig_height) = (image.width(), image.height());
			let size = INPUT_SIZE as usize;

			let resized = image.resize_exact(
				INPUT_SIZE,
				INPUT_SIZE,
				image::imageops::FilterType::Lanczos3,
			);

			let rgb = resized.to_rgb8();
			let mut input_data = vec![0.0f32; 3 * size * size];

			for (i, pixel) in rgb.pixels().enumerate() {
				for c in 0..3 {
					let normalized = (pixel[c] as f32 / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
					input_data[c * size * size + i] = normalized;
				}
			}

			let input_value = ort::value::Value::from_array(([1usize, 3, size, size], input_data))
				.map_err(|e| StereoError::TensorError(format!("Failed to create input: {}", e)))?;

			let outputs = self
				.session
				.run(ort::inputs![input_value])
				.map_err(|e| StereoError::ModelError(format!("Inference failed: {}", e)))?;

			let (shape, data) = outputs[0]
				.try_extract_tensor::<f32>()
				.map_err(|e| StereoError::TensorError(format!("Failed to extract output: {}", e)))?;

			let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
			if dims.len() < 2 {
				return Err(StereoError::TensorError(format!(
					"unexpected depth output shape {:?}",
					dims
				)));
			}
			let h = dims[dims.len() - 2];
			let w = dims[dims.len() - 1];

			let max_val = data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
			let depth_image = image::ImageBuffer::from_fn(w as u32, h as u32, |x, y| {
				image::Luma([max_val - data[y as usize * w + x as usize]])
			});

			let resized_depth = image::imageops::resize(
				&depth_image,
				orig_width,
				orig_height,
				image::imageops::FilterType::Lanczos3,
			);

			let data: Vec<f32> = resized_depth.pixels().map(|p| p[0].max(0.0)).collect();
			Array2::from_shape_vec((orig_height as usize, orig_width as usize), data)
				.map_err(|e| StereoError::TensorError(format!("Failed to reshape depth: {}", e)))
		}
	}
}
