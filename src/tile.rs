//! Partitioning of an image into overlapping inference tiles.
//!
//! Every tile reads a `tile_size × tile_size` window from the padded image. The inner
//! `tile_size - 2 * padding` pixels of that window are the tile's interior; the margin only gives
//! the model context. Interiors step across the image row-major, and the destination cells of all
//! tiles partition the output exactly once.

use crate::error::{StereoError, StereoResult};

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Region {
	pub row: usize,
	pub col: usize,
	pub height: usize,
	pub width: usize,
}

impl Region {
	pub fn new(row: usize, col: usize, height: usize, width: usize) -> Self {
		Self {
			row,
			col,
			height,
			width,
		}
	}

	pub fn bottom(&self) -> usize {
		self.row + self.height
	}

	pub fn right(&self) -> usize {
		self.col + self.width
	}

	pub fn area(&self) -> usize {
		self.height * self.width
	}

	pub fn contains(&self, row: usize, col: usize) -> bool {
		row >= self.row && row < self.bottom() && col >= self.col && col < self.right()
	}

	/// Expresses `self` relative to the top-left corner of `outer`.
	pub fn relative_to(&self, outer: &Region) -> Region {
		Region::new(
			self.row - outer.row,
			self.col - outer.col,
			self.height,
			self.width,
		)
	}
}

/// Border widths applied once to the full image before tiles are cut.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Padding {
	pub top: usize,
	pub bottom: usize,
	pub left: usize,
	pub right: usize,
}

impl Padding {
	pub fn uniform(amount: usize) -> Self {
		Self {
			top: amount,
			bottom: amount,
			left: amount,
			right: amount,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileDescriptor {
	pub index: usize,
	/// Window read from the padded image, in padded-image coordinates.
	pub source: Region,
	/// Part of the output image covered by this tile's result.
	pub output: Region,
	/// Cell of the output partition owned by this tile. Always inside `output`.
	pub destination: Region,
}

impl TileDescriptor {
	/// Interior origin of the tile in image coordinates.
	///
	/// The padded image is shifted by `padding.top`/`padding.left`, which equals the tile margin,
	/// so the source window's corner lands exactly on the interior's corner.
	pub fn origin(&self) -> (usize, usize) {
		(self.source.row, self.source.col)
	}
}

#[derive(Clone, Debug)]
pub struct TileGrid {
	pub height: usize,
	pub width: usize,
	pub tile_size: usize,
	pub padding: Padding,
	pub rows: usize,
	pub cols: usize,
	pub tiles: Vec<TileDescriptor>,
}

impl TileGrid {
	pub fn padded_extent(&self) -> (usize, usize) {
		(
			self.height + self.padding.top + self.padding.bottom,
			self.width + self.padding.left + self.padding.right,
		)
	}
}

#[derive(Clone, Copy, Debug)]
pub struct TileScheduler {
	tile_size: usize,
	padding: usize,
	overlap: usize,
}

impl TileScheduler {
	pub fn new(tile_size: usize, padding: usize) -> Self {
		Self {
			tile_size,
			padding,
			overlap: 0,
		}
	}

	/// Let neighbouring tile outputs overlap by `overlap` pixels for feathered blending.
	pub fn with_overlap(mut self, overlap: usize) -> Self {
		self.overlap = overlap;
		self
	}

	pub fn interior(&self) -> usize {
		self.tile_size.saturating_sub(2 * self.padding)
	}

	pub fn validate(&self) -> StereoResult<()> {
		if self.tile_size <= 2 * self.padding {
			return Err(StereoError::ConfigError(format!(
				"tile size {} is too small for padding {} (needs > {})",
				self.tile_size,
				self.padding,
				2 * self.padding
			)));
		}
		if self.overlap >= self.interior() {
			return Err(StereoError::ConfigError(format!(
				"tile overlap {} must be smaller than the tile interior {}",
				self.overlap,
				self.interior()
			)));
		}
		Ok(())
	}

	pub fn schedule(&self, height: usize, width: usize) -> StereoResult<TileGrid> {
		self.validate()?;
		if height == 0 || width == 0 {
			return Err(StereoError::ConfigError(format!(
				"cannot tile an empty image ({}x{})",
				width, height
			)));
		}

		let row_spans = self.spans(height);
		let col_spans = self.spans(width);
		let interior = self.interior();

		let last_row = row_spans.last().map(|s| s.origin).unwrap_or(0);
		let last_col = col_spans.last().map(|s| s.origin).unwrap_or(0);
		let padding = Padding {
			top: self.padding,
			left: self.padding,
			bottom: self.padding + (last_row + interior - height),
			right: self.padding + (last_col + interior - width),
		};

		let mut tiles = Vec::with_capacity(row_spans.len() * col_spans.len());
		for r in &row_spans {
			for c in &col_spans {
				tiles.push(TileDescriptor {
					index: tiles.len(),
					source: Region::new(r.origin, c.origin, self.tile_size, self.tile_size),
					output: Region::new(r.origin, c.origin, r.output_len, c.output_len),
					destination: Region::new(r.dest_start, c.dest_start, r.dest_len, c.dest_len),
				});
			}
		}

		Ok(TileGrid {
			height,
			width,
			tile_size: self.tile_size,
			padding,
			rows: row_spans.len(),
			cols: col_spans.len(),
			tiles,
		})
	}

	fn spans(&self, extent: usize) -> Vec<Span> {
		let interior = self.interior();
		let step = interior - self.overlap;
		let count = if extent <= interior {
			1
		} else {
			1 + (extent - interior).div_ceil(step)
		};

		let origins: Vec<usize> = (0..count).map(|i| i * step).collect();
		let dest_starts: Vec<usize> = origins
			.iter()
			.enumerate()
			.map(|(i, &o)| if i == 0 { 0 } else { o + self.overlap / 2 })
			.collect();

		origins
			.iter()
			.enumerate()
			.map(|(i, &origin)| {
				let dest_end = dest_starts.get(i + 1).copied().unwrap_or(extent);
				Span {
					origin,
					output_len: (origin + interior).min(extent) - origin,
					dest_start: dest_starts[i],
					dest_len: dest_end - dest_starts[i],
				}
			})
			.collect()
	}
}

#[derive(Clone, Copy, Debug)]
struct Span {
	origin: usize,
	output_len: usize,
	dest_start: usize,
	dest_len: usize,
}
