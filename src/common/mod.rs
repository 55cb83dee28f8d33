//! Shared primitives: transform kernels, spatial prediction, scan orders.

pub mod prediction;
pub mod transform;

/// Width and height of a macroblock in luma samples.
pub const MB_SIZE: usize = 16;
/// Width and height of a macroblock in chroma samples (4:2:0).
pub const MB_CHROMA_SIZE: usize = 8;
/// Number of 4x4 luma sub-blocks per macroblock.
pub const LUMA_BLOCKS: usize = 16;
/// Number of 4x4 chroma sub-blocks per macroblock (both planes).
pub const CHROMA_BLOCKS: usize = 8;

/// Zigzag scan order for a 4x4 block, mapping scan position to raster index.
pub const ZIGZAG_4X4: [usize; 16] = [0, 1, 4, 8, 5, 2, 3, 6, 9, 12, 13, 10, 7, 11, 14, 15];

/// Transmission order of the sixteen 4x4 luma blocks within a macroblock,
/// mapping transmit position to raster block index. Blocks are sent 8x8
/// quadrant by quadrant so that coefficient-cost accounting and CBP bits
/// line up with their quadrant.
pub const LUMA_BLOCK_ORDER: [usize; 16] = [0, 1, 4, 5, 2, 3, 6, 7, 8, 9, 12, 13, 10, 11, 14, 15];

/// Clamp a reconstructed sample to the 8-bit range.
#[inline]
pub fn clip_pixel(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}
