use image::{DynamicImage, Rgb, RgbImage};
use ndarray::{s, Array2, Array4};
use std::path::Path;
use stereo_maker::output::{keyframe_filename, keyframe_output_dir};
use stereo_maker::pipeline::read_input_list;
use stereo_maker::{
	DepthOracle, Frame, FrameSource, StereoConfig, StereoError, StereoPipeline, StereoResult,
	StreamInfo, WarpEngine, WarpModel,
};

struct HorizontalDepth;

impl DepthOracle for HorizontalDepth {
	fn infer(&mut self, image: &DynamicImage) -> StereoResult<Array2<f32>> {
		let (w, h) = (image.width() as usize, image.height() as usize);
		Ok(Array2::from_shape_fn((h, w), |(_, x)| x as f32 / w as f32))
	}
}

/// Row-flow stand-in that returns the RGB planes of its input unchanged.
struct CopyRgb;

impl WarpModel for CopyRgb {
	fn fixed_divergence(&self) -> f32 {
		2.0
	}

	fn forward(&mut self, batch: Array4<f32>) -> StereoResult<Array4<f32>> {
		Ok(batch.slice(s![.., 0..3, .., ..]).to_owned())
	}
}

struct KeyframeStream {
	next: u64,
	frames: u64,
}

impl Iterator for KeyframeStream {
	type Item = StereoResult<Frame>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.next >= self.frames {
			return None;
		}
		let index = self.next;
		self.next += 1;
		Some(Ok(Frame {
			index,
			timestamp: index as f64,
			keyframe: true,
			image: pattern(12, 8),
		}))
	}
}

impl FrameSource for KeyframeStream {
	fn stream_info(&self) -> StreamInfo {
		StreamInfo {
			width: 12,
			height: 8,
			fps: 1.0,
			total_frames: Some(self.frames),
		}
	}
}

fn pattern(width: u32, height: u32) -> DynamicImage {
	DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
		Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) * 3 % 256) as u8])
	}))
}

fn write_inputs(dir: &Path) {
	pattern(40, 30).save(dir.join("b.png")).unwrap();
	pattern(24, 16).save(dir.join("a:1.png")).unwrap();
	std::fs::write(dir.join("broken.jpg"), b"definitely not a jpeg").unwrap();
	std::fs::write(dir.join("notes.txt"), b"ignored").unwrap();
}

#[tokio::test]
async fn directory_batch_with_resume() {
	let input = tempfile::tempdir().unwrap();
	let output = tempfile::tempdir().unwrap();
	write_inputs(input.path());

	let config = StereoConfig {
		pad: Some(0.1),
		..StereoConfig::default()
	};
	let mut pipeline =
		StereoPipeline::with_resample(config.clone(), Box::new(HorizontalDepth)).unwrap();
	let summary = pipeline
		.process_images(input.path(), output.path())
		.await
		.unwrap();
	assert_eq!(summary.processed, 2);
	assert_eq!(summary.skipped, 1);
	assert_eq!(summary.resumed, 0);

	// 40x30, pad 0.1: pad_h = 2, pad_w = 2
	let b = image::open(output.path().join("b_LRF.png")).unwrap();
	assert_eq!((b.width(), b.height()), (2 * (40 + 4), 32));
	let a = image::open(output.path().join("a_1_LRF.png")).unwrap();
	assert_eq!((a.width(), a.height()), (2 * (24 + 2), 16));

	let mut pipeline = StereoPipeline::with_resample(
		StereoConfig {
			resume: true,
			..config
		},
		Box::new(HorizontalDepth),
	)
	.unwrap();
	let summary = pipeline
		.process_images(input.path(), output.path())
		.await
		.unwrap();
	assert_eq!(summary.processed, 0);
	assert_eq!(summary.resumed, 2);
	assert_eq!(summary.skipped, 1);
}

#[tokio::test]
async fn input_list_batch() {
	let input = tempfile::tempdir().unwrap();
	let output = tempfile::tempdir().unwrap();
	write_inputs(input.path());
	let list = input.path().join("list.txt");
	std::fs::write(&list, "b.png\nmissing.png\n").unwrap();

	let inputs = read_input_list(&list).unwrap();
	let mut pipeline =
		StereoPipeline::with_resample(StereoConfig::default(), Box::new(HorizontalDepth)).unwrap();
	let summary = pipeline.process_inputs(&inputs, output.path()).await.unwrap();
	assert_eq!(summary.processed, 1);
	assert_eq!(summary.skipped, 1);
	assert!(output.path().join("b_LRF.png").exists());
}

#[tokio::test]
async fn keyframes_are_written_as_images() {
	let output = tempfile::tempdir().unwrap();
	let dir = keyframe_output_dir(output.path(), "holiday.mkv");
	let mut config = StereoConfig::default();
	config.video.keyframe_interval = 2.5;

	let mut pipeline = StereoPipeline::with_resample(config, Box::new(HorizontalDepth)).unwrap();
	let summary = pipeline
		.process_video_keyframes(KeyframeStream { next: 0, frames: 8 }, &dir)
		.await
		.unwrap();

	// frames one second apart, 2.5 s minimum interval
	assert_eq!(summary.processed, 3);
	for index in [0, 3, 6] {
		let path = keyframe_filename(&dir, index);
		assert!(path.exists(), "{}", path.display());
		let img = image::open(&path).unwrap();
		assert_eq!((img.width(), img.height()), (24, 8));
	}
	assert!(dir.ends_with("holiday"));
	assert!(!keyframe_filename(&dir, 1).exists());
}

#[test]
fn neural_pipeline_tiles_large_images() {
	let engine = WarpEngine::neural(Box::new(CopyRgb), StereoConfig::default().render_options())
		.unwrap();
	let mut pipeline =
		StereoPipeline::new(StereoConfig::default(), Box::new(HorizontalDepth), engine).unwrap();

	let source = pattern(600, 400);
	let sbs = pipeline.process_image(&source).unwrap().to_rgb8();
	assert_eq!(sbs.dimensions(), (1200, 400));

	let rgb = source.to_rgb8();
	for (x, y) in [(0, 0), (250, 130), (599, 399), (300, 241)] {
		assert_eq!(sbs.get_pixel(x, y), rgb.get_pixel(x, y));
		assert_eq!(sbs.get_pixel(600 + x, y), rgb.get_pixel(x, y));
	}
}

#[test]
fn neural_pipeline_rejects_untrained_divergence() {
	let engine = WarpEngine::neural(Box::new(CopyRgb), StereoConfig::default().render_options())
		.unwrap();
	let config = StereoConfig {
		divergence: 3.0,
		..StereoConfig::default()
	};
	let err = StereoPipeline::new(config, Box::new(HorizontalDepth), engine)
		.err()
		.unwrap();
	assert!(matches!(err, StereoError::ConfigError(_)));
}
