//! The encoder core: forward/inverse coding, coefficient packing,
//! buffer lifecycle, and the row-parallel pipeline.

pub mod api;
pub mod buffers;
pub mod config;
pub(crate) mod core;
pub mod deblk;
pub mod kernel;
pub(crate) mod mc;
pub(crate) mod pack;
pub mod quantize;
pub(crate) mod recon;
pub(crate) mod sched;

pub use api::EncodeError;
pub use crate::common::prediction::{Intra16Mode, Intra4Mode, IntraChromaMode};

/// A motion vector in half-pel luma units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mv {
    /// Horizontal component, positive right.
    pub x: i16,
    /// Vertical component, positive down.
    pub y: i16,
}

/// Coding type of a submitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// All macroblocks are intra coded; the reference list is cleared.
    Intra,
    /// Macroblocks may predict from the most recent reference frame.
    Inter,
}

/// The mode decision for one macroblock, produced upstream (mode
/// decision and motion search are out of scope here) and consumed by
/// the coding loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbDecision {
    /// 16x16 intra prediction with a single luma mode.
    Intra16 {
        /// Luma prediction mode.
        mode: Intra16Mode,
        /// Chroma prediction mode shared by both planes.
        chroma_mode: IntraChromaMode,
    },
    /// 4x4 intra prediction with one mode per sub-block.
    Intra4 {
        /// Per-sub-block luma modes in raster order.
        modes: [Intra4Mode; 16],
        /// Chroma prediction mode shared by both planes.
        chroma_mode: IntraChromaMode,
    },
    /// Whole-macroblock inter prediction from the most recent reference.
    Inter {
        /// Motion vector in half-pel units, applied to the whole block.
        mv: Mv,
        /// When set, the residual is not coded at all and the motion
        /// compensated prediction becomes the reconstruction.
        skip: bool,
    },
}

/// Final macroblock classification as seen by the entropy stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbType {
    /// Intra 16x16 with DC Hadamard pass.
    I16x16,
    /// Intra 4x4.
    I4x4,
    /// Inter 16x16 with coded residual (possibly empty after
    /// elimination).
    P16x16,
    /// Skipped inter macroblock with no coded data.
    PSkip,
}

/// One input frame: planar 4:2:0 samples plus per-macroblock decisions.
///
/// Plane lengths and the decision count must match the configured
/// dimensions; `Encoder::submit` validates them.
#[derive(Debug, Clone)]
pub struct FrameInput {
    /// Luma plane, `width * height` samples, row major.
    pub y: Vec<u8>,
    /// Cb plane, `(width / 2) * (height / 2)` samples.
    pub u: Vec<u8>,
    /// Cr plane, `(width / 2) * (height / 2)` samples.
    pub v: Vec<u8>,
    /// Frame coding type.
    pub frame_type: FrameType,
    /// Quantization parameter for every macroblock, 0..=51.
    pub qp: u8,
    /// Whether the reconstructed frame enters the reference list.
    pub is_reference: bool,
    /// One decision per macroblock in raster order.
    pub decisions: Vec<MbDecision>,
}
