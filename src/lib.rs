pub mod compositor;
pub mod config;
pub mod depth;
pub mod error;
pub mod image_loader;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod row_flow;
pub mod stereo;
pub mod tile;
pub mod tiled;
pub mod video;
pub mod warp;
pub mod writer;

pub use compositor::{BlendMode, Compositor};
pub use config::{Rotation, StereoConfig, VideoConfig};
pub use depth::DepthOracle;
pub use error::{StereoError, StereoResult};
pub use model::WarpModel;
pub use pipeline::{BatchSummary, StereoPipeline};
pub use row_flow::NeuralWarp;
pub use stereo::{assemble, output_size};
pub use tile::{TileDescriptor, TileGrid, TileScheduler};
pub use tiled::{render, RenderOptions, TileTransform};
pub use video::{Frame, FrameSink, FrameSource, StreamInfo, VideoOutputConfig};
pub use warp::{Eye, ResampleWarp, Warp, WarpEngine, WarpMethod};

#[cfg(feature = "onnx")]
pub use depth::OnnxDepthEstimator;
#[cfg(feature = "onnx")]
pub use model::OnnxRowFlowModel;

use image::DynamicImage;

/// Converts a photo to side-by-side stereo with the closed-form warp.
pub fn process_photo(
	input_image: &DynamicImage,
	depth: &mut dyn DepthOracle,
	divergence: f32,
) -> StereoResult<DynamicImage> {
	let tensor = image_loader::to_tensor(input_image);
	let depth_map = depth.infer(input_image)?;
	let sbs = assemble(
		&mut ResampleWarp,
		tensor.view(),
		depth_map.view(),
		divergence,
		None,
	)?;
	image_loader::to_image(sbs.view())
}
