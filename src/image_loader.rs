use crate::config::Rotation;
use crate::error::{StereoError, StereoResult};
use image::{DynamicImage, RgbImage};
use ndarray::{Array3, ArrayView3};
use std::path::Path;

pub const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp"];

pub fn is_image_path(path: &Path) -> bool {
	path.extension()
		.and_then(|ext| ext.to_str())
		.map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
		.unwrap_or(false)
}

pub fn load_image(path: impl AsRef<Path>) -> StereoResult<DynamicImage> {
	let path = path.as_ref();

	if !path.exists() {
		return Err(StereoError::ImageError(format!(
			"Image file not found: {:?}",
			path
		)));
	}

	let extension = path
		.extension()
		.and_then(|ext| ext.to_str())
		.map(|s| s.to_lowercase())
		.ok_or_else(|| StereoError::ImageError(format!("File has no extension: {:?}", path)))?;

	if !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
		return Err(StereoError::ImageError(format!(
			"Unsupported image format: .{}",
			extension
		)));
	}

	image::open(path)
		.map_err(|e| StereoError::ImageError(format!("Failed to load image {:?}: {}", path, e)))
}

pub fn rotate(image: DynamicImage, rotation: Rotation) -> DynamicImage {
	match rotation {
		Rotation::None => image,
		Rotation::Left => image.rotate270(),
		Rotation::Right => image.rotate90(),
	}
}

/// RGB image as a `(3, height, width)` buffer with values in `[0, 1]`.
pub fn to_tensor(image: &DynamicImage) -> Array3<f32> {
	let rgb = image.to_rgb8();
	let (width, height) = rgb.dimensions();
	Array3::from_shape_fn((3, height as usize, width as usize), |(c, y, x)| {
		rgb.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
	})
}

/// Quantizes a `(3, height, width)` buffer back to an 8-bit RGB image.
pub fn to_image(tensor: ArrayView3<f32>) -> StereoResult<DynamicImage> {
	let (channels, height, width) = tensor.dim();
	if channels != 3 {
		return Err(StereoError::TensorError(format!(
			"expected 3 channels for an RGB image, got {}",
			channels
		)));
	}

	let mut data = Vec::with_capacity(height * width * 3);
	for y in 0..height {
		for x in 0..width {
			for c in 0..3 {
				data.push((tensor[[c, y, x]].clamp(0.0, 1.0) * 255.0).round() as u8);
			}
		}
	}

	let rgb = RgbImage::from_raw(width as u32, height as u32, data).ok_or_else(|| {
		StereoError::ImageError(format!(
			"Failed to create image from tensor ({}x{})",
			width, height
		))
	})?;
	Ok(DynamicImage::ImageRgb8(rgb))
}

#[cfg(test)]
mod tests {
	use super::*;
	use image::Rgb;

	fn sample_image() -> DynamicImage {
		let img = RgbImage::from_fn(4, 3, |x, y| Rgb([(x * 60) as u8, (y * 100) as u8, 255]));
		DynamicImage::ImageRgb8(img)
	}

	#[test]
	fn tensor_round_trip_is_lossless_for_8bit() {
		let image = sample_image();
		let tensor = to_tensor(&image);
		assert_eq!(tensor.dim(), (3, 3, 4));
		assert_eq!(tensor[[2, 0, 0]], 1.0);
		let back = to_image(tensor.view()).unwrap();
		assert_eq!(back.to_rgb8(), image.to_rgb8());
	}

	#[test]
	fn to_image_clamps_out_of_range_values() {
		let tensor = Array3::from_shape_vec((3, 1, 1), vec![-0.5, 0.5, 1.5]).unwrap();
		let img = to_image(tensor.view()).unwrap().to_rgb8();
		assert_eq!(img.get_pixel(0, 0), &Rgb([0, 128, 255]));
	}

	#[test]
	fn rotation_direction() {
		let image = sample_image();
		let left = rotate(image.clone(), Rotation::Left);
		let right = rotate(image.clone(), Rotation::Right);
		assert_eq!((left.width(), left.height()), (3, 4));
		// top-right corner moves to the top-left when turning counter-clockwise
		assert_eq!(
			left.to_rgb8().get_pixel(0, 0),
			image.to_rgb8().get_pixel(3, 0)
		);
		// bottom-left corner moves to the top-left when turning clockwise
		assert_eq!(
			right.to_rgb8().get_pixel(0, 0),
			image.to_rgb8().get_pixel(0, 2)
		);
	}

	#[test]
	fn load_rejects_missing_and_unknown_files() {
		let dir = tempfile::tempdir().unwrap();
		assert!(load_image(dir.path().join("nope.png")).is_err());
		let txt = dir.path().join("notes.txt");
		std::fs::write(&txt, "hello").unwrap();
		assert!(load_image(&txt).is_err());
		let corrupt = dir.path().join("broken.png");
		std::fs::write(&corrupt, b"not a png").unwrap();
		assert!(matches!(load_image(&corrupt), Err(StereoError::ImageError(_))));
	}

	#[test]
	fn recognizes_image_extensions() {
		assert!(is_image_path(Path::new("a/b/photo.JPG")));
		assert!(!is_image_path(Path::new("clip.mp4")));
		assert!(!is_image_path(Path::new("README")));
	}
}
