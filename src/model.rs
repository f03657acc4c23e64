use crate::error::{StereoError, StereoResult};
use ndarray::Array4;
use std::path::PathBuf;

/// Divergences the row-flow models were trained for.
pub const SUPPORTED_DIVERGENCES: [f32; 2] = [2.0, 2.5];

pub const ROW_FLOW_D20_CHECKPOINT: &str = "row_flow_d20.onnx";
pub const ROW_FLOW_D25_CHECKPOINT: &str = "row_flow_d25.onnx";

/// Learned warp model as seen by the renderer.
///
/// `forward` maps a batch of 7-channel tiles `(n, 7, h, w)` to RGB tiles `(n, 3, h, w)` (or the
/// interior without the padding margin). The model shifts toward a single direction only.
pub trait WarpModel: Send {
	/// Divergence the model was trained at.
	fn fixed_divergence(&self) -> f32;

	fn forward(&mut self, batch: Array4<f32>) -> StereoResult<Array4<f32>>;
}

pub fn is_supported_divergence(divergence: f32) -> bool {
	SUPPORTED_DIVERGENCES.contains(&divergence)
}

pub fn row_flow_checkpoint(divergence: f32) -> StereoResult<&'static str> {
	if divergence == 2.0 {
		Ok(ROW_FLOW_D20_CHECKPOINT)
	} else if divergence == 2.5 {
		Ok(ROW_FLOW_D25_CHECKPOINT)
	} else {
		Err(StereoError::ConfigError(format!(
			"row_flow only supports divergence 2.0 or 2.5 (got {})",
			divergence
		)))
	}
}

/// Find the checkpoint file for a given model name
///
/// Searches in order:
/// 1. STEREO_MAKER_CHECKPOINTS env var
/// 2. Relative to source directory (for development)
/// 3. User's home directory ~/.stereo-maker/checkpoints/
/// 4. XDG data directory
/// 5. Current working directory ./checkpoints/
pub fn find_checkpoint(checkpoint_name: &str) -> StereoResult<PathBuf> {
	let search_paths = vec![
		PathBuf::from(env!("CARGO_MANIFEST_DIR"))
			.join("checkpoints")
			.join(checkpoint_name),
		dirs::home_dir()
			.unwrap_or_default()
			.join(".stereo-maker")
			.join("checkpoints")
			.join(checkpoint_name),
		dirs::data_dir()
			.unwrap_or_default()
			.join("stereo-maker")
			.join("checkpoints")
			.join(checkpoint_name),
		PathBuf::from("checkpoints").join(checkpoint_name),
	];

	if let Ok(env_dir) = std::env::var("STEREO_MAKER_CHECKPOINTS") {
		let env_path = PathBuf::from(env_dir).join(checkpoint_name);
		if env_path.exists() {
			return Ok(env_path);
		}
	}

	for path in &search_paths {
		if path.exists() {
			return Ok(path.clone());
		}
	}

	Err(StereoError::ModelError(format!(
		"Checkpoint '{}' not found.\nSearched locations:\n{}",
		checkpoint_name,
		search_paths
			.iter()
			.map(|p| format!("  - {}", p.display()))
			.collect::<Vec<_>>()
			.join("\n")
	)))
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxRowFlowModel;

#[cfg(feature = "onnx")]
mod onnx {
	use super::{find_checkpoint, row_flow_checkpoint, WarpModel};
	use crate::error::{StereoError, StereoResult};
	use ndarray::Array4;
	use ort::session::{builder::GraphOptimizationLevel, Session};

	pub struct OnnxRowFlowModel {
		session: Session,
		fixed_divergence: f32,
	}

	impl OnnxRowFlowModel {
		pub fn new(model_path: &str, fixed_divergence: f32) -> StereoResult<Self> {
			let session = Session::builder()
				.map_err(|e| StereoError::ModelError(format!("Failed to create session: {}", e)))?
				.with_optimization_level(GraphOptimizationLevel::Level3)
				.map_err(|e| StereoError::ModelError(format!("Failed to set opt level: {}", e)))?
				.with_intra_threads(4)
				.map_err(|e| StereoError::ModelError(format!("Failed to set threads: {}", e)))?
				.commit_from_file(model_path)
				.map_err(|e| StereoError::ModelError(format!("Failed to load ONNX model: {}", e)))?;

			tracing::info!(model_path, fixed_divergence, "Row-flow model loaded");
			Ok(Self {
				session,
				fixed_divergence,
			})
		}

		/// Loads the checkpoint trained for `divergence` from the standard search locations.
		pub fn for_divergence(divergence: f32) -> StereoResult<Self> {
			let path = find_checkpoint(row_flow_checkpoint(divergence)?)?;
			let path_str = path.to_str().ok_or_else(|| {
				StereoError::ModelError("Invalid model path encoding".to_string())
			})?;
			Self::new(path_str, divergence)
		}
	}

	impl WarpModel for OnnxRowFlowModel {
		fn fixed_divergence(&self) -> f32 {
			self.fixed_divergence
		}

		fn forward(&mut self, batch: Array4<f32>) -> StereoResult<Array4<f32>> {
			let (n, c, h, w) = batch.dim();
			let data = batch.as_standard_layout().into_owned().into_raw_vec_and_offset().0;
			let input_value = ort::value::Value::from_array(([n, c, h, w], data))
				.map_err(|e| StereoError::TensorError(format!("Failed to create input: {}", e)))?;

			let outputs = self
				.session
				.run(ort::inputs![input_value])
				.map_err(|e| StereoError::ModelError(format!("Inference failed: {}", e)))?;

			let (shape, data) = outputs[0]
				.try_extract_tensor::<f32>()
				.map_err(|e| StereoError::TensorError(format!("Failed to extract output: {}", e)))?;

			let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
			if dims.len() != 4 {
				return Err(StereoError::TensorError(format!(
					"row-flow output must be 4-dimensional, got {:?}",
					dims
				)));
			}
			Array4::from_shape_vec((dims[0], dims[1], dims[2], dims[3]), data.to_vec())
				.map_err(|e| StereoError::TensorError(format!("Failed to reshape output: {}", e)))
		}
	}
}
