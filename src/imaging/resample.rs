//! Proportional resize.
//!
//! The filter is fixed to Catmull-Rom (bicubic). The `image` crate's
//! separable resampler is single-threaded and has no data-dependent
//! branching, so the same raster at the same width always produces the same
//! bytes.

use super::calculations::proportional_height;
use super::raster::RasterImage;
use image::imageops::FilterType;

/// Interpolation used for every sized derivative.
pub const RESAMPLE_FILTER: FilterType = FilterType::CatmullRom;

/// Resize `raster` to `target_width`, height by [`proportional_height`].
///
/// When the computed dimensions equal the source, the raster is returned
/// as a copy without resampling. The caller still encodes it.
pub fn resize(raster: &RasterImage, target_width: u32) -> RasterImage {
    let target_width = target_width.max(1);
    let target_height = proportional_height(raster.dimensions(), target_width);
    if (target_width, target_height) == raster.dimensions() {
        return raster.clone();
    }
    let resized = raster
        .as_dynamic()
        .resize_exact(target_width, target_height, RESAMPLE_FILTER);
    RasterImage::from_dynamic(resized)
}
