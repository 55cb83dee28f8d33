//! Encoder configuration.

use std::fmt;
use std::sync::Arc;

use crate::encoder::api::EncodeError;
use crate::encoder::kernel::{ScalarKernel, TransformKernel};

/// Most worker threads the pipeline will spawn.
pub const MAX_THREADS: usize = 8;

/// Configuration for [`crate::Encoder`], built with `with_*` chaining.
///
/// ```
/// use zenh264::EncoderConfig;
/// let config = EncoderConfig::new(320, 240)
///     .with_threads(4)
///     .with_residual_elimination(false);
/// ```
#[derive(Clone)]
#[non_exhaustive]
pub struct EncoderConfig {
    /// Frame width in luma samples, a multiple of 16.
    pub width: usize,
    /// Frame height in luma samples, a multiple of 16.
    pub height: usize,
    /// Worker thread count, 1..=[`MAX_THREADS`].
    pub threads: usize,
    /// Apply coefficient-cost elimination to inter luma and chroma.
    pub eliminate_residuals: bool,
    /// Reference frames kept for inter prediction.
    pub max_refs: usize,
    /// Transform kernel implementation.
    pub kernel: Arc<dyn TransformKernel>,
}

impl EncoderConfig {
    /// Defaults: one worker, elimination on, one reference, scalar
    /// kernels.
    pub fn new(width: usize, height: usize) -> Self {
        EncoderConfig {
            width,
            height,
            threads: 1,
            eliminate_residuals: true,
            max_refs: 1,
            kernel: Arc::new(ScalarKernel),
        }
    }

    /// Set the worker thread count, clamped to 1..=[`MAX_THREADS`].
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.clamp(1, MAX_THREADS);
        self
    }

    /// Enable or disable coefficient-cost elimination.
    #[must_use]
    pub fn with_residual_elimination(mut self, eliminate: bool) -> Self {
        self.eliminate_residuals = eliminate;
        self
    }

    /// Set the number of reference frames retained.
    #[must_use]
    pub fn with_max_refs(mut self, max_refs: usize) -> Self {
        self.max_refs = max_refs.max(1);
        self
    }

    /// Swap in a different transform kernel implementation.
    #[must_use]
    pub fn with_kernel(mut self, kernel: Arc<dyn TransformKernel>) -> Self {
        self.kernel = kernel;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), EncodeError> {
        if self.width == 0 || self.height == 0 || self.width % 16 != 0 || self.height % 16 != 0 {
            return Err(EncodeError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }

    pub(crate) fn mb_width(&self) -> usize {
        self.width / 16
    }

    pub(crate) fn mb_height(&self) -> usize {
        self.height / 16
    }

    pub(crate) fn mb_count(&self) -> usize {
        self.mb_width() * self.mb_height()
    }
}

impl fmt::Debug for EncoderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderConfig")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("threads", &self.threads)
            .field("eliminate_residuals", &self.eliminate_residuals)
            .field("max_refs", &self.max_refs)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_count_is_clamped() {
        assert_eq!(EncoderConfig::new(16, 16).with_threads(0).threads, 1);
        assert_eq!(EncoderConfig::new(16, 16).with_threads(99).threads, MAX_THREADS);
    }

    #[test]
    fn odd_dimensions_are_rejected() {
        assert!(EncoderConfig::new(17, 16).validate().is_err());
        assert!(EncoderConfig::new(16, 0).validate().is_err());
        assert!(EncoderConfig::new(64, 48).validate().is_ok());
    }
}
