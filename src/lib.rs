//! Macroblock-level core of an H.264/AVC video encoder.
//!
//! This crate implements the inner coding loop that sits between mode
//! decision and entropy coding: forward transform and quantization of
//! prediction residuals, packing of quantized coefficients into a compact
//! stream for the entropy stage, the matching inverse path that rebuilds
//! the reconstructed picture, and a row-parallel scheduler that drives
//! both stages across worker threads.
//!
//! What this crate is *not*: it performs no rate control, no motion
//! search, and no bitstream syntax. Mode decisions and motion vectors are
//! inputs; the packed coefficient stream and reconstructed frame are
//! outputs.
//!
//! # Quick start
//!
//! ```no_run
//! use zenh264::{Encoder, EncoderConfig, FrameInput, FrameType, MbDecision, Intra16Mode, IntraChromaMode};
//!
//! let config = EncoderConfig::new(64, 64).with_threads(2);
//! let mut encoder = Encoder::new(config)?;
//!
//! let mb_count = (64 / 16) * (64 / 16);
//! let frame = FrameInput {
//!     y: vec![128; 64 * 64],
//!     u: vec![128; 32 * 32],
//!     v: vec![128; 32 * 32],
//!     frame_type: FrameType::Intra,
//!     qp: 28,
//!     is_reference: true,
//!     decisions: vec![
//!         MbDecision::Intra16 {
//!             mode: Intra16Mode::Dc,
//!             chroma_mode: IntraChromaMode::Dc,
//!         };
//!         mb_count
//!     ],
//! };
//! let encoded = encoder.encode(frame)?;
//! println!("coefficient bytes: {}", encoded.coeff_data.len());
//! # Ok::<(), zenh264::EncodeError>(())
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![allow(clippy::needless_range_loop)]

pub mod common;
pub mod encoder;

pub use encoder::api::{EncodedFrame, Encoder, MbSummary, PendingFrame, RowTrace};
pub use encoder::buffers::{BufferPool, Picture, SharedLease, WriteLease};
pub use encoder::config::EncoderConfig;
pub use encoder::deblk::DeblockInfo;
pub use encoder::kernel::{ScalarKernel, TransformKernel};
pub use encoder::EncodeError;
pub use encoder::{
    FrameInput, FrameType, Intra16Mode, Intra4Mode, IntraChromaMode, MbDecision, MbType, Mv,
};
