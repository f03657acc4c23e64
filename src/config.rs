use crate::compositor::BlendMode;
use crate::error::{StereoError, StereoResult};
use crate::model::{is_supported_divergence, SUPPORTED_DIVERGENCES};
use crate::row_flow::{ROW_FLOW_PADDING, ROW_FLOW_TILE_SIZE};
use crate::tile::TileScheduler;
use crate::tiled::RenderOptions;
use crate::warp::WarpMethod;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const PRESETS: [&str; 10] = [
	"ultrafast",
	"superfast",
	"veryfast",
	"faster",
	"fast",
	"medium",
	"slow",
	"slower",
	"veryslow",
	"placebo",
];

pub const TUNES: [&str; 6] = [
	"film",
	"animation",
	"grain",
	"stillimage",
	"fastdecode",
	"zerolatency",
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
	#[default]
	None,
	/// 90° counter-clockwise.
	Left,
	/// 90° clockwise.
	Right,
}

/// Process-wide settings, read-only for the duration of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StereoConfig {
	pub method: WarpMethod,
	pub divergence: f32,
	pub batch_size: usize,
	pub tile_size: usize,
	pub blend: BlendMode,
	/// `pad_size = size * pad`; no padding when unset.
	pub pad: Option<f64>,
	pub rotation: Rotation,
	/// Render threads; the rayon default when unset.
	pub threads: Option<usize>,
	/// Skip inputs whose output already exists.
	pub resume: bool,
	pub video: VideoConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
	/// Output fps is `min(fps, max_fps)`.
	pub max_fps: f64,
	pub crf: u8,
	pub preset: String,
	pub tune: Vec<String>,
	/// Only render sparsely sampled frames as images.
	pub keyframe: bool,
	/// Minimum seconds between sampled keyframes.
	pub keyframe_interval: f64,
}

impl Default for StereoConfig {
	fn default() -> Self {
		Self {
			method: WarpMethod::RowFlow,
			divergence: 2.0,
			batch_size: 64,
			tile_size: ROW_FLOW_TILE_SIZE,
			blend: BlendMode::Disjoint,
			pad: None,
			rotation: Rotation::None,
			threads: None,
			resume: false,
			video: VideoConfig::default(),
		}
	}
}

impl Default for VideoConfig {
	fn default() -> Self {
		Self {
			max_fps: 30.0,
			crf: 20,
			preset: "ultrafast".to_string(),
			tune: vec!["zerolatency".to_string()],
			keyframe: false,
			keyframe_interval: 4.0,
		}
	}
}

impl StereoConfig {
	pub fn from_json_str(json: &str) -> StereoResult<Self> {
		let config: StereoConfig = serde_json::from_str(json)?;
		config.validate()?;
		Ok(config)
	}

	pub fn from_json_file(path: impl AsRef<Path>) -> StereoResult<Self> {
		let path = path.as_ref();
		let text = std::fs::read_to_string(path).map_err(|e| {
			StereoError::ConfigError(format!("Failed to read config {:?}: {}", path, e))
		})?;
		Self::from_json_str(&text)
	}

	pub fn render_options(&self) -> RenderOptions {
		RenderOptions {
			tile_size: self.tile_size,
			batch_size: self.batch_size,
			blend: self.blend,
		}
	}

	/// Rejects settings that can never render, before any work starts.
	pub fn validate(&self) -> StereoResult<()> {
		if !self.divergence.is_finite() || self.divergence < 0.0 {
			return Err(StereoError::ConfigError(format!(
				"divergence must be a non-negative number (got {})",
				self.divergence
			)));
		}
		if self.method == WarpMethod::RowFlow && !is_supported_divergence(self.divergence) {
			return Err(StereoError::ConfigError(format!(
				"row_flow only supports divergence {:?} (got {})",
				SUPPORTED_DIVERGENCES, self.divergence
			)));
		}
		if self.batch_size == 0 {
			return Err(StereoError::ConfigError(
				"batch size must be at least 1".to_string(),
			));
		}
		if self.tile_size == 0 {
			return Err(StereoError::ConfigError(
				"tile size must be at least 1".to_string(),
			));
		}
		if self.method == WarpMethod::RowFlow {
			TileScheduler::new(self.tile_size, ROW_FLOW_PADDING)
				.with_overlap(self.blend.overlap())
				.validate()?;
		}
		if self.threads == Some(0) {
			return Err(StereoError::ConfigError(
				"thread count must be at least 1".to_string(),
			));
		}
		if let Some(pad) = self.pad {
			if !(0.0..1.0).contains(&pad) {
				return Err(StereoError::ConfigError(format!(
					"pad must be in [0, 1) (got {})",
					pad
				)));
			}
		}
		self.video.validate()
	}
}

impl VideoConfig {
	pub fn validate(&self) -> StereoResult<()> {
		if !(self.max_fps > 0.0) {
			return Err(StereoError::ConfigError(format!(
				"max fps must be positive (got {})",
				self.max_fps
			)));
		}
		if !PRESETS.contains(&self.preset.as_str()) {
			return Err(StereoError::ConfigError(format!(
				"unknown encoder preset '{}'",
				self.preset
			)));
		}
		if let Some(tune) = self.tune.iter().find(|t| !TUNES.contains(&t.as_str())) {
			return Err(StereoError::ConfigError(format!(
				"unknown encoder tune '{}'",
				tune
			)));
		}
		if !(self.keyframe_interval >= 0.0) {
			return Err(StereoError::ConfigError(format!(
				"keyframe interval must be non-negative (got {})",
				self.keyframe_interval
			)));
		}
		Ok(())
	}
}
