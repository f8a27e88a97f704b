//! Pure calculation functions for derivative dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Height that keeps the source aspect ratio at `target_width`.
///
/// `round(height * target_width / width)` with halves rounded up, computed
/// in integer arithmetic so the result never depends on float rounding.
/// Never less than 1px. Widths larger than the source upscale.
///
/// # Examples
/// ```
/// # use webpify::imaging::proportional_height;
/// assert_eq!(proportional_height((1000, 800), 150), 120);
/// assert_eq!(proportional_height((1000, 800), 1200), 960);
/// ```
pub fn proportional_height(source: (u32, u32), target_width: u32) -> u32 {
    let (src_w, src_h) = source;
    if src_w == 0 {
        return 1;
    }
    let numerator = u64::from(src_h) * u64::from(target_width);
    let w = u64::from(src_w);
    let rounded = (2 * numerator + w) / (2 * w);
    rounded.clamp(1, u64::from(u32::MAX)) as u32
}

/// Full output dimensions for a derivative: unscaled when `target_width` is `None`.
pub fn derivative_dimensions(source: (u32, u32), target_width: Option<u32>) -> (u32, u32) {
    match target_width {
        Some(w) => (w, proportional_height(source, w)),
        None => source,
    }
}
