use crate::config::StereoConfig;
use crate::depth::DepthOracle;
use crate::error::{StereoError, StereoResult};
use crate::image_loader::{is_image_path, load_image, rotate, to_image, to_tensor};
use crate::output::{keyframe_filename, make_output_filename, save_image};
use crate::stereo::assemble;
use crate::video::{
	output_config, FrameRateLimiter, FrameSink, FrameSource, KeyframeSampler, ProgressCallback,
	VideoProgress,
};
use crate::warp::{WarpEngine, WarpMethod};
use crate::writer::FrameWriter;
use image::DynamicImage;
use ndarray::Array3;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Per-run counts for batch processing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
	pub processed: usize,
	/// Outputs that already existed with `resume` set.
	pub resumed: usize,
	/// Inputs that could not be decoded.
	pub skipped: usize,
	/// Inputs that decoded but failed to render.
	pub failed: usize,
}

/// Depth oracle, warp engine and settings bound together for a run.
pub struct StereoPipeline {
	config: StereoConfig,
	depth: Box<dyn DepthOracle>,
	warp: WarpEngine,
	pool: rayon::ThreadPool,
}

fn build_thread_pool(threads: Option<usize>) -> StereoResult<rayon::ThreadPool> {
	let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("stereo-render-{i}"));
	if let Some(n) = threads {
		builder = builder.num_threads(n);
	}
	builder
		.build()
		.map_err(|e| StereoError::ConfigError(format!("failed to build render thread pool: {}", e)))
}

impl StereoPipeline {
	pub fn new(
		config: StereoConfig,
		depth: Box<dyn DepthOracle>,
		warp: WarpEngine,
	) -> StereoResult<Self> {
		config.validate()?;
		if warp.method() != config.method {
			return Err(StereoError::ConfigError(format!(
				"configured method {} does not match the warp engine ({})",
				config.method.name(),
				warp.method().name()
			)));
		}
		let pool = build_thread_pool(config.threads)?;
		Ok(Self {
			config,
			depth,
			warp,
			pool,
		})
	}

	/// Pipeline for the closed-form warp, which needs no checkpoint.
	pub fn with_resample(
		mut config: StereoConfig,
		depth: Box<dyn DepthOracle>,
	) -> StereoResult<Self> {
		config.method = WarpMethod::GridSample;
		Self::new(config, depth, WarpEngine::resample())
	}

	/// Loads the engine the configuration asks for, using the row-flow checkpoint matching the
	/// configured divergence.
	#[cfg(feature = "onnx")]
	pub fn from_config(config: StereoConfig, depth: Box<dyn DepthOracle>) -> StereoResult<Self> {
		config.validate()?;
		let warp = match config.method {
			WarpMethod::GridSample => WarpEngine::resample(),
			WarpMethod::RowFlow => {
				let model = crate::model::OnnxRowFlowModel::for_divergence(config.divergence)?;
				WarpEngine::neural(Box::new(model), config.render_options())?
			}
		};
		Self::new(config, depth, warp)
	}

	pub fn config(&self) -> &StereoConfig {
		&self.config
	}

	/// Side-by-side buffer `(3, H', 2·W')` for one picture. Runs on the pipeline's render pool.
	pub fn render_sbs(&mut self, image: &DynamicImage) -> StereoResult<Array3<f32>> {
		let image = rotate(image.clone(), self.config.rotation);
		let config = &self.config;
		let depth_oracle = &mut self.depth;
		let warp = &mut self.warp;

		self.pool.install(|| -> StereoResult<Array3<f32>> {
			let tensor = to_tensor(&image);
			let depth = depth_oracle.infer(&image)?;

			let (_, height, width) = tensor.dim();
			if depth.dim() != (height, width) {
				return Err(StereoError::TensorError(format!(
					"depth map {:?} does not match image {}x{}",
					depth.dim(),
					width,
					height
				)));
			}

			assemble(
				warp,
				tensor.view(),
				depth.view(),
				config.divergence,
				config.pad,
			)
		})
	}

	pub fn process_image(&mut self, image: &DynamicImage) -> StereoResult<DynamicImage> {
		let sbs = self.render_sbs(image)?;
		to_image(sbs.view())
	}

	pub fn process_file(&mut self, input: &Path, output: &Path) -> StereoResult<()> {
		let image = load_image(input)?;
		let sbs = self.process_image(&image)?;
		save_image(&sbs, output)
	}

	/// Converts every image directly inside `input_dir` into `output_dir`.
	pub async fn process_images(
		&mut self,
		input_dir: &Path,
		output_dir: &Path,
	) -> StereoResult<BatchSummary> {
		let inputs = list_images(input_dir)?;
		info!(count = inputs.len(), dir = %input_dir.display(), "processing images");
		self.process_inputs(&inputs, output_dir).await
	}

	/// Converts each listed image. Undecodable inputs are skipped, render failures are counted,
	/// configuration errors abort the run.
	pub async fn process_inputs(
		&mut self,
		inputs: &[PathBuf],
		output_dir: &Path,
	) -> StereoResult<BatchSummary> {
		std::fs::create_dir_all(output_dir).map_err(|e| {
			StereoError::IoError(format!(
				"Failed to create output directory {:?}: {}",
				output_dir, e
			))
		})?;

		let mut summary = BatchSummary::default();
		let mut writer = FrameWriter::default();

		for input in inputs {
			let output = output_dir.join(make_output_filename(input, false));
			if self.config.resume && output.exists() {
				debug!(path = %output.display(), "output exists, skipping");
				summary.resumed += 1;
				continue;
			}

			let image = match load_image(input) {
				Ok(image) => image,
				Err(e) => {
					warn!("skipping {}: {}", input.display(), e);
					summary.skipped += 1;
					continue;
				}
			};

			match self.process_image(&image) {
				Ok(sbs) => writer.submit(sbs, output).await?,
				Err(e) if e.is_config() => {
					if let Err(write_err) = writer.join().await {
						warn!("pending writes failed while aborting: {}", write_err);
					}
					return Err(e);
				}
				Err(e) => {
					warn!("failed to convert {}: {}", input.display(), e);
					summary.failed += 1;
				}
			}
		}

		summary.processed = writer.join().await?;
		info!(
			processed = summary.processed,
			resumed = summary.resumed,
			skipped = summary.skipped,
			failed = summary.failed,
			"batch complete"
		);
		Ok(summary)
	}

	/// Renders every frame (after frame-rate capping) into `sink`. Frames that fail to decode or
	/// render are skipped; configuration and sink errors abort.
	pub fn process_video<S, K>(
		&mut self,
		source: S,
		sink: &mut K,
		progress_cb: Option<&ProgressCallback>,
	) -> StereoResult<BatchSummary>
	where
		S: FrameSource,
		K: FrameSink + ?Sized,
	{
		let info = source.stream_info();
		let out = output_config(&info, &self.config);
		info!(
			width = out.width,
			height = out.height,
			fps = out.fps,
			"encoding stereo video"
		);
		sink.begin(&out)?;

		let mut limiter = FrameRateLimiter::new(out.fps);
		let mut summary = BatchSummary::default();
		for frame in source {
			let frame = match frame {
				Ok(frame) => frame,
				Err(e) => {
					warn!("skipping frame: {}", e);
					summary.skipped += 1;
					continue;
				}
			};
			if !limiter.accept(frame.timestamp) {
				continue;
			}
			let sbs = match self.process_image(&frame.image) {
				Ok(sbs) => sbs,
				Err(e) if e.is_config() => return Err(e),
				Err(e) => {
					warn!(frame = frame.index, "failed to convert frame: {}", e);
					summary.failed += 1;
					continue;
				}
			};
			sink.write_frame(frame.with_image(sbs))?;
			summary.processed += 1;

			if let Some(cb) = progress_cb {
				if summary.processed % 10 == 0 {
					cb(VideoProgress::new(frame.index + 1, info.total_frames, "processing"));
				}
			}
		}

		sink.finish()?;
		if let Some(cb) = progress_cb {
			cb(VideoProgress::new(
				info.total_frames.unwrap_or(summary.processed as u64),
				info.total_frames,
				"complete",
			));
		}
		info!(
			frames = summary.processed,
			skipped = summary.skipped,
			failed = summary.failed,
			"video complete"
		);
		Ok(summary)
	}

	/// Writes sampled keyframes as individual images into `output_dir` (see
	/// [`crate::output::keyframe_output_dir`]). Frames that fail to decode or render are skipped.
	pub async fn process_video_keyframes<S: FrameSource>(
		&mut self,
		source: S,
		output_dir: &Path,
	) -> StereoResult<BatchSummary> {
		std::fs::create_dir_all(output_dir).map_err(|e| {
			StereoError::IoError(format!(
				"Failed to create output directory {:?}: {}",
				output_dir, e
			))
		})?;

		let mut summary = BatchSummary::default();
		let mut writer = FrameWriter::default();

		for frame in KeyframeSampler::new(source, self.config.video.keyframe_interval) {
			let frame = match frame {
				Ok(frame) => frame,
				Err(e) => {
					warn!("skipping frame: {}", e);
					summary.skipped += 1;
					continue;
				}
			};
			match self.process_image(&frame.image) {
				Ok(sbs) => {
					writer
						.submit(sbs, keyframe_filename(output_dir, frame.index))
						.await?
				}
				Err(e) if e.is_config() => {
					if let Err(write_err) = writer.join().await {
						warn!("pending writes failed while aborting: {}", write_err);
					}
					return Err(e);
				}
				Err(e) => {
					warn!(frame = frame.index, "failed to convert keyframe: {}", e);
					summary.failed += 1;
				}
			}
		}

		summary.processed = writer.join().await?;
		info!(
			keyframes = summary.processed,
			dir = %output_dir.display(),
			"keyframes written"
		);
		Ok(summary)
	}
}

/// Image files directly inside `dir`, sorted by path.
pub fn list_images(dir: &Path) -> StereoResult<Vec<PathBuf>> {
	let entries = std::fs::read_dir(dir).map_err(|e| {
		StereoError::IoError(format!("Failed to read input directory {:?}: {}", dir, e))
	})?;

	let mut files = Vec::new();
	for entry in entries {
		let path = entry?.path();
		if path.is_file() && is_image_path(&path) {
			files.push(path);
		}
	}
	files.sort();
	Ok(files)
}

/// One input path per line. Blank lines and `#` comments are ignored; relative paths resolve
/// against the list's directory.
pub fn read_input_list(path: &Path) -> StereoResult<Vec<PathBuf>> {
	let text = std::fs::read_to_string(path).map_err(|e| {
		StereoError::IoError(format!("Failed to read input list {:?}: {}", path, e))
	})?;
	let base = path.parent().unwrap_or_else(|| Path::new(""));

	Ok(text
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty() && !line.starts_with('#'))
		.map(|line| {
			let p = PathBuf::from(line);
			if p.is_absolute() {
				p
			} else {
				base.join(p)
			}
		})
		.collect())
}
