//! Encoding parameters.
//!
//! [`Quality`] is the only knob the codec takes. Policy validation rejects
//! out-of-range values from config files; programmatic construction clamps.

/// Lossy WebP encoding quality (0-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(u8);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.min(100) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Quality factor as libwebp expects it.
    pub fn as_factor(self) -> f32 {
        f32::from(self.0)
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(80)
    }
}
