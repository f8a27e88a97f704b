//! Image processing — decode, resize, encode.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image::load_from_memory_with_format` (JPEG, PNG) |
//! | **Resize** | `DynamicImage::resize_exact` with Catmull-Rom |
//! | **Encode → WebP** | `webp` (libwebp), lossy color + lossless alpha |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Encoding quality
//! - **Raster**: The normalized in-memory pixel buffer
//! - **Codec**: [`Codec`] trait + [`WebpCodec`]
//! - **Resample**: The fixed-filter proportional resize

mod calculations;
pub mod codec;
mod params;
pub mod raster;
pub mod resample;

pub use calculations::{derivative_dimensions, proportional_height};
pub use codec::{Codec, CodecError, WebpCodec};
pub use params::Quality;
pub use raster::RasterImage;
pub use resample::{RESAMPLE_FILTER, resize};
