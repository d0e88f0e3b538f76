//! Configurable limits for WebP decoding.
//!
//! These limits protect against malicious or malformed inputs that could
//! cause excessive memory usage or processing time. Every check runs before
//! the allocation it guards.

use alloc::format;

use super::api::DecodeError;

/// Configuration for decode limits.
///
/// All limits are optional; `None` means unlimited.
///
/// # Example
///
/// ```rust
/// use webpcore::Limits;
///
/// // Start with defaults and customize
/// let limits = Limits::default()
///     .max_dimensions(4096, 4096)
///     .max_memory(256 * 1024 * 1024);  // 256 MB
///
/// // Or start with no limits for trusted inputs
/// let unlimited = Limits::none();
/// # assert_ne!(limits, unlimited);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Limits {
    /// Maximum image width in pixels.
    pub max_width: Option<u32>,

    /// Maximum image height in pixels.
    pub max_height: Option<u32>,

    /// Maximum total pixels (width * height).
    /// Useful for limiting memory even with odd aspect ratios.
    pub max_total_pixels: Option<u64>,

    /// Maximum memory in bytes: the output buffer plus decoder scratch planes.
    pub max_memory: Option<u64>,

    /// Maximum length of the encoded source in bytes.
    pub max_input_size: Option<u64>,
}

impl Default for Limits {
    /// Default limits suitable for server-side use.
    ///
    /// - Max dimensions: 16384 x 16384 (WebP format max)
    /// - Max total pixels: 100 megapixels
    /// - Max memory: 1 GB
    /// - Max input size: 100 MB
    fn default() -> Self {
        Self {
            max_width: Some(16384),
            max_height: Some(16384),
            max_total_pixels: Some(100_000_000),
            max_memory: Some(1024 * 1024 * 1024),
            max_input_size: Some(100 * 1024 * 1024),
        }
    }
}

impl Limits {
    /// Create limits with no restrictions.
    ///
    /// **Warning**: Only use this for trusted inputs!
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_width: None,
            max_height: None,
            max_total_pixels: None,
            max_memory: None,
            max_input_size: None,
        }
    }

    /// Set maximum dimensions.
    #[must_use]
    pub fn max_dimensions(mut self, width: u32, height: u32) -> Self {
        self.max_width = Some(width);
        self.max_height = Some(height);
        self
    }

    /// Set maximum total pixels.
    #[must_use]
    pub fn max_total_pixels(mut self, pixels: u64) -> Self {
        self.max_total_pixels = Some(pixels);
        self
    }

    /// Set maximum memory usage in bytes.
    #[must_use]
    pub fn max_memory(mut self, bytes: u64) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    /// Set maximum input size in bytes.
    #[must_use]
    pub fn max_input_size(mut self, bytes: u64) -> Self {
        self.max_input_size = Some(bytes);
        self
    }

    /// Check if dimensions are within limits.
    pub fn check_dimensions(&self, width: u32, height: u32) -> Result<(), DecodeError> {
        if let Some(max_w) = self.max_width {
            if width > max_w {
                return Err(DecodeError::LimitExceeded(format!(
                    "width {width} exceeds limit {max_w}"
                )));
            }
        }

        if let Some(max_h) = self.max_height {
            if height > max_h {
                return Err(DecodeError::LimitExceeded(format!(
                    "height {height} exceeds limit {max_h}"
                )));
            }
        }

        let total_pixels = u64::from(width) * u64::from(height);
        if let Some(max_pixels) = self.max_total_pixels {
            if total_pixels > max_pixels {
                return Err(DecodeError::LimitExceeded(format!(
                    "total pixels {total_pixels} exceeds limit {max_pixels}"
                )));
            }
        }

        Ok(())
    }

    /// Check if the encoded source length is within limits.
    pub fn check_input_size(&self, size: u64) -> Result<(), DecodeError> {
        if let Some(max) = self.max_input_size {
            if size > max {
                return Err(DecodeError::LimitExceeded(format!(
                    "input size {size} bytes exceeds limit {max} bytes"
                )));
            }
        }
        Ok(())
    }

    /// Check if memory usage is within limits.
    pub fn check_memory(&self, bytes: usize) -> Result<(), DecodeError> {
        if let Some(max) = self.max_memory {
            if bytes as u64 > max {
                return Err(DecodeError::MemoryLimitExceeded);
            }
        }
        Ok(())
    }
}
