use crate::config::{Rotation, StereoConfig};
use crate::error::StereoResult;
use crate::stereo::output_size;
use image::DynamicImage;
use std::collections::{BTreeMap, BTreeSet};

/// Below this rate the encoder is tuned for still images.
pub const STILL_IMAGE_FPS: f64 = 2.0;

#[derive(Clone, Debug, PartialEq)]
pub struct StreamInfo {
	pub width: u32,
	pub height: u32,
	pub fps: f64,
	pub total_frames: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct Frame {
	pub index: u64,
	/// Presentation time in seconds.
	pub timestamp: f64,
	pub keyframe: bool,
	pub image: DynamicImage,
}

impl Frame {
	/// Replaces the picture, keeping the frame's position in the stream.
	pub fn with_image(&self, image: DynamicImage) -> Frame {
		Frame {
			index: self.index,
			timestamp: self.timestamp,
			keyframe: self.keyframe,
			image,
		}
	}
}

/// Decoded frames of a single video stream, in presentation order.
pub trait FrameSource: Iterator<Item = StereoResult<Frame>> {
	fn stream_info(&self) -> StreamInfo;
}

/// Encoder for the stereo output stream.
pub trait FrameSink {
	fn begin(&mut self, config: &VideoOutputConfig) -> StereoResult<()>;
	fn write_frame(&mut self, frame: Frame) -> StereoResult<()>;
	fn finish(&mut self) -> StereoResult<()>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct VideoOutputConfig {
	pub width: u32,
	pub height: u32,
	pub fps: f64,
	/// Encoder options: `preset`, `crf` and an optional comma separated `tune`.
	pub options: BTreeMap<String, String>,
}

/// Output stream settings for a source: side-by-side width, capped frame rate, encoder options.
pub fn output_config(info: &StreamInfo, config: &StereoConfig) -> VideoOutputConfig {
	let fps = if info.fps > config.video.max_fps {
		config.video.max_fps
	} else {
		info.fps
	};
	let (width, height) = output_size(
		info.width as usize,
		info.height as usize,
		config.pad,
		config.rotation != Rotation::None,
	);

	let mut options = BTreeMap::new();
	options.insert("preset".to_string(), config.video.preset.clone());
	options.insert("crf".to_string(), config.video.crf.to_string());

	let mut tune = BTreeSet::new();
	if fps < STILL_IMAGE_FPS {
		tune.insert("stillimage".to_string());
	}
	tune.extend(config.video.tune.iter().cloned());
	if !tune.is_empty() {
		options.insert(
			"tune".to_string(),
			tune.into_iter().collect::<Vec<_>>().join(","),
		);
	}

	VideoOutputConfig {
		width: (width * 2) as u32,
		height: height as u32,
		fps,
		options,
	}
}

/// Passes through keyframes spaced at least `min_interval` seconds apart.
pub struct KeyframeSampler<S> {
	source: S,
	min_interval: f64,
	last: Option<f64>,
}

impl<S: FrameSource> KeyframeSampler<S> {
	pub fn new(source: S, min_interval: f64) -> Self {
		Self {
			source,
			min_interval,
			last: None,
		}
	}
}

impl<S: FrameSource> Iterator for KeyframeSampler<S> {
	type Item = StereoResult<Frame>;

	fn next(&mut self) -> Option<Self::Item> {
		loop {
			let frame = match self.source.next()? {
				Ok(frame) => frame,
				Err(e) => return Some(Err(e)),
			};
			if !frame.keyframe {
				continue;
			}
			if let Some(last) = self.last {
				if frame.timestamp - last < self.min_interval {
					continue;
				}
			}
			self.last = Some(frame.timestamp);
			return Some(Ok(frame));
		}
	}
}

impl<S: FrameSource> FrameSource for KeyframeSampler<S> {
	fn stream_info(&self) -> StreamInfo {
		self.source.stream_info()
	}
}

/// Drops frames so a stream decoded at a higher rate is emitted at `fps`.
pub struct FrameRateLimiter {
	interval: f64,
	next: Option<f64>,
}

impl FrameRateLimiter {
	pub fn new(fps: f64) -> Self {
		Self {
			interval: if fps > 0.0 { 1.0 / fps } else { 0.0 },
			next: None,
		}
	}

	pub fn accept(&mut self, timestamp: f64) -> bool {
		match self.next {
			Some(next) if timestamp + 1e-6 < next => false,
			Some(next) => {
				// resync after a gap instead of bursting to catch up
				let mut next = next + self.interval;
				if next <= timestamp {
					next = timestamp + self.interval;
				}
				self.next = Some(next);
				true
			}
			None => {
				self.next = Some(timestamp + self.interval);
				true
			}
		}
	}
}

#[derive(Clone, Debug)]
pub struct VideoProgress {
	pub current_frame: u64,
	pub total_frames: Option<u64>,
	pub stage: String,
	pub percent: f64,
}

impl VideoProgress {
	pub fn new(current_frame: u64, total_frames: Option<u64>, stage: &str) -> Self {
		let percent = match total_frames {
			Some(total) if total > 0 => (current_frame as f64 / total as f64 * 100.0).min(100.0),
			_ => 0.0,
		};
		Self {
			current_frame,
			total_frames,
			stage: stage.to_string(),
			percent,
		}
	}
}

pub type ProgressCallback = Box<dyn Fn(VideoProgress) + Send + Sync>;


#[cfg(test)]
mod tests {
	use super::testing::SyntheticSource;
	use super::*;

	fn info(fps: f64) -> StreamInfo {
		StreamInfo {
			width: 1920,
			height: 1080,
			fps,
			total_frames: None,
		}
	}

	#[test]
	fn caps_fps_and_doubles_width() {
		let out = output_config(&info(59.94), &StereoConfig::default());
		assert_eq!((out.width, out.height), (3840, 1080));
		assert_eq!(out.fps, 30.0);
		assert_eq!(out.options["preset"], "ultrafast");
		assert_eq!(out.options["crf"], "20");
		assert_eq!(out.options["tune"], "zerolatency");
	}

	#[test]
	fn padded_and_rotated_extent() {
		let config = StereoConfig {
			pad: Some(0.1),
			rotation: Rotation::Left,
			..StereoConfig::default()
		};
		let out = output_config(&info(24.0), &config);
		// rotated to 1080x1920, pad_w = 54, pad_h = 192
		assert_eq!((out.width, out.height), (2 * (1080 + 108), 1920 + 192));
		assert_eq!(out.fps, 24.0);
	}

	#[test]
	fn slow_streams_add_stillimage_tune_once() {
		let mut config = StereoConfig::default();
		config.video.tune = vec!["stillimage".to_string(), "film".to_string()];
		let out = output_config(&info(1.0), &config);
		assert_eq!(out.options["tune"], "film,stillimage");

		config.video.tune.clear();
		let out = output_config(&info(25.0), &config);
		assert!(!out.options.contains_key("tune"));
	}

	#[test]
	fn sampler_respects_min_interval() {
		// 10 fps, 50 frames, keyframe every 5th frame => keyframes every 0.5 s
		let mut source = SyntheticSource::new(4, 4, 10.0, 50);
		source.key_every = 5;
		let sampled: Vec<u64> = KeyframeSampler::new(source, 1.2)
			.map(|f| f.unwrap().index)
			.collect();
		assert_eq!(sampled, vec![0, 15, 30, 45]);
	}

	#[test]
	fn sampler_forwards_errors() {
		let mut source = SyntheticSource::new(4, 4, 10.0, 5);
		source.fail_at = Some(2);
		let results: Vec<_> = KeyframeSampler::new(source, 0.0).collect();
		assert_eq!(results.len(), 5);
		assert!(results[2].is_err());
	}

	#[test]
	fn limiter_halves_a_60fps_stream() {
		let mut limiter = FrameRateLimiter::new(30.0);
		let kept: Vec<u64> = (0..12u64)
			.filter(|&i| limiter.accept(i as f64 / 60.0))
			.collect();
		assert_eq!(kept, vec![0, 2, 4, 6, 8, 10]);

		let mut passthrough = FrameRateLimiter::new(30.0);
		assert!((0..10u64).all(|i| passthrough.accept(i as f64 / 24.0)));
	}

	#[test]
	fn progress_percent() {
		assert_eq!(VideoProgress::new(5, Some(10), "processing").percent, 50.0);
		assert_eq!(VideoProgress::new(5, None, "processing").percent, 0.0);
	}
}
