use crate::error::{StereoError, StereoResult};
use crate::warp::{Eye, Warp};
use ndarray::{concatenate, s, Array3, ArrayView2, ArrayView3, Axis};

/// Extra pixels added around each eye view for a padding fraction.
///
/// Vertical padding is rounded down to an even count and only applied at the top; horizontal
/// padding is split evenly between left and right.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EyePadding {
	pub top: usize,
	pub side: usize,
}

impl EyePadding {
	pub fn from_fraction(width: usize, height: usize, pad_fraction: f64) -> Self {
		let mut top = (height as f64 * pad_fraction) as usize;
		top -= top % 2;
		let side = (width as f64 * pad_fraction) as usize / 2;
		Self { top, side }
	}
}

/// Per-eye output extent `(width, height)` after optional rotation and padding.
pub fn output_size(
	width: usize,
	height: usize,
	pad_fraction: Option<f64>,
	rotate: bool,
) -> (usize, usize) {
	let (width, height) = if rotate { (height, width) } else { (width, height) };
	match pad_fraction {
		Some(p) => {
			let pad = EyePadding::from_fraction(width, height, p);
			(width + pad.side * 2, height + pad.top)
		}
		None => (width, height),
	}
}

/// Renders both eyes with the same depth and divergence and joins them side by side.
pub fn assemble<W>(
	warp: &mut W,
	image: ArrayView3<f32>,
	depth: ArrayView2<f32>,
	divergence: f32,
	pad_fraction: Option<f64>,
) -> StereoResult<Array3<f32>>
where
	W: Warp + ?Sized,
{
	let left = warp.warp(image, depth, divergence, Eye::Left)?;
	let right = warp.warp(image, depth, divergence, Eye::Right)?;

	let (left, right) = match pad_fraction {
		Some(p) => {
			let (_, height, width) = left.dim();
			let pad = EyePadding::from_fraction(width, height, p);
			(pad_eye(&left, pad), pad_eye(&right, pad))
		}
		None => (left, right),
	};

	create_sbs(left.view(), right.view())
}

/// Concatenates two eye views along the width axis.
pub fn create_sbs<'a>(
	left: ArrayView3<'a, f32>,
	right: ArrayView3<'a, f32>,
) -> StereoResult<Array3<f32>> {
	let (lc, lh, _) = left.dim();
	let (rc, rh, _) = right.dim();
	if lc != rc || lh != rh {
		return Err(StereoError::TensorError(format!(
			"Left and right views must share channels and height: {:?} != {:?}",
			left.dim(),
			right.dim()
		)));
	}
	Ok(concatenate(Axis(2), &[left, right])?)
}

/// Zero-pads an eye view: `side` columns left and right, `top` rows above, nothing below.
pub fn pad_eye(view: &Array3<f32>, pad: EyePadding) -> Array3<f32> {
	let (channels, height, width) = view.dim();
	let mut out = Array3::zeros((channels, height + pad.top, width + 2 * pad.side));
	out.slice_mut(s![.., pad.top.., pad.side..pad.side + width])
		.assign(view);
	out
}
