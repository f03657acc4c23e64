use crate::error::{StereoError, StereoResult};
use image::DynamicImage;
use std::path::{Path, PathBuf};

/// Marks full left-right stereo output so VR players detect the layout.
pub const SBS_SUFFIX: &str = "_LRF";

/// Characters that SMB shares mangle in file names.
pub const SMB_INVALID_CHARS: &str = "\\/:*?\"<>|";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageEncoding {
	Jpeg { quality: u8 },
	Png,
}

impl ImageEncoding {
	pub fn extension(&self) -> &'static str {
		match self {
			ImageEncoding::Jpeg { .. } => "jpg",
			ImageEncoding::Png => "png",
		}
	}

	pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
		let ext = path
			.as_ref()
			.extension()
			.and_then(|e| e.to_str())
			.unwrap_or("")
			.to_lowercase();

		match ext.as_str() {
			"jpg" | "jpeg" => ImageEncoding::Jpeg { quality: 95 },
			_ => ImageEncoding::Png,
		}
	}
}

fn sanitize(name: &str) -> String {
	name.chars()
		.map(|c| if SMB_INVALID_CHARS.contains(c) { '_' } else { c })
		.collect()
}

/// `photo.jpg` becomes `photo_LRF.png`, `clip.mkv` becomes `clip_LRF.mp4`.
pub fn make_output_filename(input: impl AsRef<Path>, video: bool) -> String {
	let stem = input
		.as_ref()
		.file_stem()
		.map(|s| s.to_string_lossy().into_owned())
		.unwrap_or_default();
	let ext = if video { "mp4" } else { "png" };
	format!("{}{}.{}", sanitize(&stem), SBS_SUFFIX, ext)
}

/// Directory that receives a video's keyframes: the video output name without extension or
/// stereo suffix.
pub fn keyframe_output_dir(output_root: impl AsRef<Path>, input: impl AsRef<Path>) -> PathBuf {
	let name = make_output_filename(input, true);
	let stem = name.trim_end_matches(".mp4");
	let stem = stem.strip_suffix(SBS_SUFFIX).unwrap_or(stem);
	output_root.as_ref().join(stem)
}

/// `<dir>/<dir>_<index:08>_LRF.png`
pub fn keyframe_filename(dir: impl AsRef<Path>, index: u64) -> PathBuf {
	let dir = dir.as_ref();
	let base = dir
		.file_name()
		.map(|s| s.to_string_lossy().into_owned())
		.unwrap_or_default();
	dir.join(format!("{}_{:08}{}.png", base, index, SBS_SUFFIX))
}

pub fn save_image(image: &DynamicImage, path: &Path) -> StereoResult<()> {
	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() {
			std::fs::create_dir_all(parent).map_err(|e| {
				StereoError::IoError(format!("Failed to create output directory: {}", e))
			})?;
		}
	}

	match ImageEncoding::from_path(path) {
		ImageEncoding::Jpeg { quality } => {
			let rgb_image = image.to_rgb8();
			let file = std::fs::File::create(path).map_err(|e| {
				StereoError::IoError(format!("Failed to create output file: {}", e))
			})?;

			let mut jpeg_encoder =
				image::codecs::jpeg::JpegEncoder::new_with_quality(file, quality);
			jpeg_encoder
				.encode(
					rgb_image.as_ref(),
					rgb_image.width(),
					rgb_image.height(),
					image::ExtendedColorType::Rgb8,
				)
				.map_err(|e| StereoError::ImageError(format!("Failed to encode JPEG: {}", e)))?;
		}
		ImageEncoding::Png => {
			image
				.save_with_format(path, image::ImageFormat::Png)
				.map_err(|e| StereoError::ImageError(format!("Failed to save PNG: {}", e)))?;
		}
	}

	Ok(())
}
