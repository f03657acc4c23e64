use crate::error::{StereoError, StereoResult};
use crate::output::save_image;
use image::DynamicImage;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub const DEFAULT_WRITERS: usize = 4;

/// Bounded pool that encodes and saves finished frames off the render thread.
///
/// `submit` waits for a free writer slot, so at most `max_writers` frames are held in memory
/// by the pool at any time. Files complete in no particular order.
pub struct FrameWriter {
	permits: Arc<Semaphore>,
	pending: JoinSet<StereoResult<PathBuf>>,
}

impl Default for FrameWriter {
	fn default() -> Self {
		Self::new(DEFAULT_WRITERS)
	}
}

impl FrameWriter {
	pub fn new(max_writers: usize) -> Self {
		Self {
			permits: Arc::new(Semaphore::new(max_writers.max(1))),
			pending: JoinSet::new(),
		}
	}

	pub fn in_flight(&self) -> usize {
		self.pending.len()
	}

	pub async fn submit(&mut self, image: DynamicImage, path: PathBuf) -> StereoResult<()> {
		let permit = self
			.permits
			.clone()
			.acquire_owned()
			.await
			.map_err(|e| StereoError::Other(format!("Writer pool closed: {}", e)))?;

		// blocking tasks start on the blocking pool at once, even while the caller keeps
		// its runtime thread busy rendering
		self.pending.spawn_blocking(move || -> StereoResult<PathBuf> {
			let _permit = permit;
			save_image(&image, &path)?;
			Ok(path)
		});
		Ok(())
	}

	/// Waits for every submitted write. Returns the number written, or the first failure once
	/// all writes have settled.
	pub async fn join(mut self) -> StereoResult<usize> {
		let mut written = 0;
		let mut first_error = None;

		while let Some(joined) = self.pending.join_next().await {
			let result = joined
				.map_err(|e| StereoError::Other(format!("Writer task failed: {}", e)))
				.and_then(|r| r);
			match result {
				Ok(path) => {
					debug!(path = %path.display(), "frame written");
					written += 1;
				}
				Err(e) => {
					warn!("write failed: {}", e);
					first_error.get_or_insert(e);
				}
			}
		}

		match first_error {
			Some(e) => Err(e),
			None => Ok(written),
		}
	}
}
