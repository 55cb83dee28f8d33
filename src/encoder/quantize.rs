//! Quantization parameters derived from QP.
//!
//! H.264 folds the transform normalization into the quantizer: each of
//! the six QP remainder classes has a forward scale and an inverse scale
//! per coefficient position, and each QP sextet doubles the step size
//! through the shift `qbits = 15 + qp / 6`. The dead zone is narrower
//! for inter blocks than for intra blocks.

/// Forward scale per remainder class. Columns are the three position
/// classes: even-even, mixed, odd-odd.
const QUANT_SCALE: [[u16; 3]; 6] = [
    [13107, 8066, 5243],
    [11916, 7490, 4660],
    [10082, 6554, 4194],
    [9362, 5825, 3647],
    [8192, 5243, 3355],
    [7282, 4559, 2893],
];

/// Inverse scale per remainder class, same column layout.
const DEQUANT_SCALE: [[u16; 3]; 6] = [
    [10, 13, 16],
    [11, 14, 18],
    [13, 16, 20],
    [14, 18, 23],
    [16, 20, 25],
    [18, 23, 29],
];

/// Position class for each raster index of a 4x4 block.
const POS_CLASS: [usize; 16] = [0, 1, 0, 1, 1, 2, 1, 2, 0, 1, 0, 1, 1, 2, 1, 2];

/// Chroma QP for luma QP 30..=51; below 30 they are equal.
const CHROMA_QP_TAIL: [u8; 22] = [
    29, 30, 31, 32, 32, 33, 34, 34, 35, 35, 36, 36, 37, 37, 37, 38, 38, 38, 39, 39, 39, 39,
];

/// Highest supported quantization parameter.
pub const MAX_QP: u8 = 51;

/// Map a luma QP to the chroma QP used for both chroma planes.
pub fn chroma_qp(luma_qp: u8) -> u8 {
    if luma_qp < 30 {
        luma_qp
    } else {
        CHROMA_QP_TAIL[usize::from(luma_qp.min(MAX_QP)) - 30]
    }
}

/// Expanded quantization tables for one QP and one prediction class.
#[derive(Debug, Clone)]
pub struct QuantParams {
    /// Forward scale per coefficient position.
    pub scale: [u16; 16],
    /// Largest absolute transform value that still quantizes to zero.
    pub thresh: [u16; 16],
    /// Inverse scale per coefficient position.
    pub iscale: [u16; 16],
    /// Scaling-list weight per position (flat 16 here).
    pub weight: [u16; 16],
    /// Dead-zone rounding offset added before the `qbits` shift.
    pub round: u32,
    /// Forward shift, `15 + qp / 6`.
    pub qbits: u32,
    /// `qp / 6`, the inverse shift exponent.
    pub qp_div: u32,
    /// The QP these tables were built for.
    pub qp: u8,
}

impl QuantParams {
    /// Build tables for `qp`. Intra blocks use a dead zone of a third
    /// of the step, inter blocks a sixth.
    pub fn new(qp: u8, intra: bool) -> Self {
        let qp = qp.min(MAX_QP);
        let qp_rem = usize::from(qp % 6);
        let qp_div = u32::from(qp / 6);
        let qbits = 15 + qp_div;
        let round = if intra {
            (1u32 << qbits) / 3
        } else {
            (1u32 << qbits) / 6
        };

        let mut scale = [0u16; 16];
        let mut thresh = [0u16; 16];
        let mut iscale = [0u16; 16];
        for pos in 0..16 {
            let class = POS_CLASS[pos];
            scale[pos] = QUANT_SCALE[qp_rem][class];
            iscale[pos] = DEQUANT_SCALE[qp_rem][class];
            let zero_ceiling = (1u32 << qbits) - 1 - round;
            thresh[pos] = (zero_ceiling / u32::from(scale[pos])) as u16;
        }

        QuantParams {
            scale,
            thresh,
            iscale,
            weight: [16; 16],
            round,
            qbits,
            qp_div,
            qp,
        }
    }
}

/// Quantize one transform value at `pos`, returning the signed level.
#[inline]
pub fn quantize_level(value: i32, params: &QuantParams, pos: usize) -> i32 {
    let sign = value < 0;
    let abs = value.unsigned_abs();
    if abs <= u32::from(params.thresh[pos]) {
        return 0;
    }
    let level = ((abs * u32::from(params.scale[pos]) + params.round) >> params.qbits) as i32;
    if sign {
        -level
    } else {
        level
    }
}

/// Dequantize one AC level at `pos`. The rounding in the down-shift
/// branch matches the reference inverse scaling for QP below 24.
#[inline]
pub fn dequant_level(level: i32, params: &QuantParams, pos: usize) -> i32 {
    let q = level * i32::from(params.iscale[pos]) * i32::from(params.weight[pos]);
    if params.qp_div >= 4 {
        q << (params.qp_div - 4)
    } else {
        (q + (1 << (3 - params.qp_div))) >> (4 - params.qp_div)
    }
}

/// Luma and chroma tables for one macroblock prediction class.
#[derive(Debug, Clone)]
pub struct MbQuant {
    /// Tables for the luma plane.
    pub luma: QuantParams,
    /// Tables for both chroma planes (chroma QP mapping applied).
    pub chroma: QuantParams,
}

/// All tables needed for one frame at a fixed QP: one set for intra
/// macroblocks, one for inter.
#[derive(Debug, Clone)]
pub struct FrameQuant {
    /// Tables used by intra macroblocks.
    pub intra: MbQuant,
    /// Tables used by inter macroblocks.
    pub inter: MbQuant,
}

impl FrameQuant {
    /// Expand all four table sets for `qp`.
    pub fn new(qp: u8) -> Self {
        let cqp = chroma_qp(qp);
        FrameQuant {
            intra: MbQuant {
                luma: QuantParams::new(qp, true),
                chroma: QuantParams::new(cqp, true),
            },
            inter: MbQuant {
                luma: QuantParams::new(qp, false),
                chroma: QuantParams::new(cqp, false),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chroma_qp_tracks_luma_below_30() {
        for qp in 0..30 {
            assert_eq!(chroma_qp(qp), qp);
        }
        assert_eq!(chroma_qp(30), 29);
        assert_eq!(chroma_qp(51), 39);
    }

    #[test]
    fn threshold_marks_the_zero_boundary() {
        for &(qp, intra) in &[(0u8, true), (10, false), (28, true), (51, false)] {
            let p = QuantParams::new(qp, intra);
            for pos in 0..16 {
                let t = i32::from(p.thresh[pos]);
                assert_eq!(quantize_level(t, &p, pos), 0);
                assert_ne!(quantize_level(t + 1, &p, pos), 0);
            }
        }
    }

    #[test]
    fn quantize_is_odd_in_sign() {
        let p = QuantParams::new(26, false);
        for v in [-4000, -100, -31, 31, 100, 4000] {
            assert_eq!(quantize_level(-v, &p, 3), -quantize_level(v, &p, 3));
        }
    }

    #[test]
    fn dequant_shift_branches_agree_at_qp_24() {
        // qp_div == 4 is the first pure left-shift (by zero) QP sextet.
        let p = QuantParams::new(24, false);
        assert_eq!(dequant_level(5, &p, 0), 5 * 10 * 16);
    }
}
