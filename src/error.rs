use thiserror::Error;

pub type StereoResult<T> = Result<T, StereoError>;

#[derive(Debug, Error)]
pub enum StereoError {
	#[error("Model error: {0}")]
	ModelError(String),
	#[error("Image error: {0}")]
	ImageError(String),
	#[error("Tensor error: {0}")]
	TensorError(String),
	#[error("I/O error: {0}")]
	IoError(String),
	#[error("Configuration error: {0}")]
	ConfigError(String),
	#[error("Error: {0}")]
	Other(String),
}

impl StereoError {
	/// Configuration errors abort a whole run; everything else only fails the current item.
	pub fn is_config(&self) -> bool {
		matches!(self, StereoError::ConfigError(_))
	}
}

impl From<std::io::Error> for StereoError {
	fn from(e: std::io::Error) -> Self {
		StereoError::IoError(e.to_string())
	}
}

impl From<image::ImageError> for StereoError {
	fn from(e: image::ImageError) -> Self {
		StereoError::ImageError(e.to_string())
	}
}

impl From<ndarray::ShapeError> for StereoError {
	fn from(e: ndarray::ShapeError) -> Self {
		StereoError::TensorError(e.to_string())
	}
}

impl From<serde_json::Error> for StereoError {
	fn from(e: serde_json::Error) -> Self {
		StereoError::ConfigError(e.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_carries_category_prefix() {
		let err = StereoError::ConfigError("tile size 14 leaves no interior".to_string());
		assert_eq!(
			err.to_string(),
			"Configuration error: tile size 14 leaves no interior"
		);
		assert!(err.is_config());
		assert!(!StereoError::ModelError("oom".to_string()).is_config());
	}

	#[test]
	fn io_errors_convert() {
		let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
		let err: StereoError = io.into();
		assert!(matches!(err, StereoError::IoError(ref m) if m.contains("missing")));
	}
}
