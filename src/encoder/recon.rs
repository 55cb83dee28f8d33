//! Inverse path: dequantize, inverse transform, and add the prediction
//! to rebuild the picture the decoder will see.
//!
//! Every 4x4 unit takes exactly one of three paths, chosen from the
//! control flags the packer produced: full inverse transform, the
//! DC-only shortcut, or a plain prediction copy. For intra 16x16 the
//! inverse Hadamard runs first and any block whose dequantized DC comes
//! back nonzero is promoted from the copy path to the DC-only path, so
//! DC energy survives even when all its AC levels were eliminated.
//!
//! When a frame's reconstruction is only needed to feed intra
//! prediction of later macroblocks, callers mask the AC flags down to
//! the border blocks first; only the right column and bottom row are
//! ever read by a neighbor.

use crate::encoder::kernel::TransformKernel;
use crate::encoder::pack::{ChromaResidual, LumaResidual, MbCtrl};
use crate::encoder::quantize::{dequant_level, QuantParams};

/// Whether a luma 4x4 block (raster index) touches the macroblock's
/// right or bottom edge.
pub(crate) fn is_luma_border_block(idx: usize) -> bool {
    idx % 4 == 3 || idx >= 12
}

/// Restrict luma reconstruction to the border blocks. AC flags of
/// interior blocks are dropped; inter DC-only flags are dropped
/// entirely, while the intra 16x16 DC promotion stays unrestricted.
pub(crate) fn mask_luma_to_border(ctrl: &mut MbCtrl) {
    for idx in 0..16 {
        if !is_luma_border_block(idx) {
            ctrl.luma_ac[idx] = false;
        }
        ctrl.luma_dc[idx] = false;
    }
}

/// Restrict chroma reconstruction to the border blocks. In the 2x2
/// block grid of each plane only block 0 is interior.
pub(crate) fn mask_chroma_to_border(ctrl: &mut MbCtrl) {
    ctrl.chroma_ac[0] = false;
    ctrl.chroma_ac[4] = false;
}

fn copy_block(pred: &[u8], pred_stride: usize, out: &mut [u8], out_stride: usize) {
    for y in 0..4 {
        out[y * out_stride..y * out_stride + 4]
            .copy_from_slice(&pred[y * pred_stride..y * pred_stride + 4]);
    }
}

/// Reconstruct an intra 16x16 luma macroblock. `pred` is a dense 16x16
/// block; `out` starts at the macroblock origin in the picture plane.
pub(crate) fn recon_luma_i16(
    kernel: &dyn TransformKernel,
    params: &QuantParams,
    res: &LumaResidual,
    ctrl: &MbCtrl,
    pred: &[u8],
    out: &mut [u8],
    out_stride: usize,
) {
    let mut dc = [0i32; 16];
    if ctrl.luma_dc_block {
        kernel.inv_hadamard_luma_dc(&res.dc, params, &mut dc);
    }

    for blk in 0..16 {
        let off_pred = (blk / 4) * 4 * 16 + (blk % 4) * 4;
        let off_out = (blk / 4) * 4 * out_stride + (blk % 4) * 4;
        let p = &pred[off_pred..];
        let o = &mut out[off_out..];
        if ctrl.luma_ac[blk] {
            kernel.inv_quant_recon_4x4(&res.ac[blk], Some(dc[blk]), params, p, 16, o, out_stride);
        } else if dc[blk] != 0 {
            kernel.recon_dc_only_4x4(dc[blk], p, 16, o, out_stride);
        } else {
            copy_block(p, 16, o, out_stride);
        }
    }
}

/// Reconstruct an inter (or intra 4x4 style) luma macroblock without
/// the DC transform. Position 0 of each block is its own DC level.
pub(crate) fn recon_luma_4x4(
    kernel: &dyn TransformKernel,
    params: &QuantParams,
    res: &LumaResidual,
    ctrl: &MbCtrl,
    pred: &[u8],
    out: &mut [u8],
    out_stride: usize,
) {
    for blk in 0..16 {
        let off_pred = (blk / 4) * 4 * 16 + (blk % 4) * 4;
        let off_out = (blk / 4) * 4 * out_stride + (blk % 4) * 4;
        let p = &pred[off_pred..];
        let o = &mut out[off_out..];
        if ctrl.luma_ac[blk] {
            kernel.inv_quant_recon_4x4(&res.ac[blk], None, params, p, 16, o, out_stride);
        } else if ctrl.luma_dc[blk] {
            let dc = dequant_level(i32::from(res.ac[blk][0]), params, 0);
            kernel.recon_dc_only_4x4(dc, p, 16, o, out_stride);
        } else {
            copy_block(p, 16, o, out_stride);
        }
    }
}

/// Reconstruct both chroma planes of one macroblock. Predictions are
/// dense 8x8 blocks; outputs start at the macroblock origin of each
/// plane.
#[allow(clippy::too_many_arguments)]
pub(crate) fn recon_chroma(
    kernel: &dyn TransformKernel,
    params: &QuantParams,
    res: &ChromaResidual,
    ctrl: &MbCtrl,
    pred_u: &[u8],
    pred_v: &[u8],
    out_u: &mut [u8],
    out_v: &mut [u8],
    out_stride: usize,
) {
    let mut dc = [0i32; 8];
    if ctrl.chroma_dc[0] || ctrl.chroma_dc[1] {
        kernel.inv_hadamard_chroma_dc(&res.dc, params, &mut dc);
    }

    for plane in 0..2 {
        let pred = if plane == 0 { pred_u } else { pred_v };
        let out: &mut [u8] = if plane == 0 {
            &mut *out_u
        } else {
            &mut *out_v
        };
        for b4 in 0..4 {
            let idx = plane * 4 + b4;
            let off_pred = (b4 / 2) * 4 * 8 + (b4 % 2) * 4;
            let off_out = (b4 / 2) * 4 * out_stride + (b4 % 2) * 4;
            let p = &pred[off_pred..];
            let o = &mut out[off_out..];
            if ctrl.chroma_ac[idx] {
                kernel.inv_quant_recon_4x4(&res.ac[idx], Some(dc[idx]), params, p, 8, o, out_stride);
            } else if dc[idx] != 0 {
                kernel.recon_dc_only_4x4(dc[idx], p, 8, o, out_stride);
            } else {
                copy_block(p, 8, o, out_stride);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::kernel::ScalarKernel;
    use crate::encoder::quantize::QuantParams;

    #[test]
    fn all_skip_copies_the_prediction() {
        let kernel = ScalarKernel;
        let params = QuantParams::new(28, false);
        let res = LumaResidual::default();
        let ctrl = MbCtrl::default();
        let pred: [u8; 256] = core::array::from_fn(|i| (i % 251) as u8);
        let mut out = [0u8; 256];
        recon_luma_4x4(&kernel, &params, &res, &ctrl, &pred, &mut out, 16);
        assert_eq!(out, pred);
    }

    #[test]
    fn dc_promotion_reaches_interior_blocks() {
        // Nonzero Hadamard levels with no AC flags must still shift
        // every block by its dequantized DC.
        let kernel = ScalarKernel;
        let params = QuantParams::new(0, true);
        let mut res = LumaResidual::default();
        res.dc[0] = 128; // flat DC plane, as the forward side produces
        let mut ctrl = MbCtrl::default();
        ctrl.luma_dc_block = true;

        let pred = [100u8; 256];
        let mut out = [0u8; 256];
        recon_luma_i16(&kernel, &params, &res, &ctrl, &pred, &mut out, 16);
        assert!(out.iter().all(|&p| p == 105), "expected flat +5 shift");
    }

    #[test]
    fn border_mask_spares_promotion_but_not_inter_dc() {
        let mut ctrl = MbCtrl {
            luma_ac: [true; 16],
            luma_dc: [true; 16],
            luma_dc_block: true,
            ..MbCtrl::default()
        };
        mask_luma_to_border(&mut ctrl);
        assert!(ctrl.luma_dc_block);
        assert!(ctrl.luma_dc.iter().all(|&d| !d));
        for idx in 0..16 {
            assert_eq!(ctrl.luma_ac[idx], is_luma_border_block(idx));
        }
        // Border blocks: right column and bottom row, seven in all.
        assert_eq!(ctrl.luma_ac.iter().filter(|&&b| b).count(), 7);
    }

    #[test]
    fn chroma_border_mask_drops_only_block_zero() {
        let mut ctrl = MbCtrl {
            chroma_ac: [true; 8],
            ..MbCtrl::default()
        };
        mask_chroma_to_border(&mut ctrl);
        assert_eq!(
            ctrl.chroma_ac,
            [false, true, true, true, false, true, true, true]
        );
    }

    #[test]
    fn chroma_dc_only_shifts_all_blocks_of_that_plane() {
        let kernel = ScalarKernel;
        let params = QuantParams::new(0, true);
        let mut res = ChromaResidual::default();
        res.dc[0] = 64; // flat U DC plane at QP 0
        let mut ctrl = MbCtrl::default();
        ctrl.chroma_dc[0] = true;

        let pred = [90u8; 64];
        let mut out_u = [0u8; 64];
        let mut out_v = [0u8; 64];
        recon_chroma(
            &kernel, &params, &res, &ctrl, &pred, &pred, &mut out_u, &mut out_v, 8,
        );
        assert!(out_u.iter().all(|&p| p == 95));
        assert!(out_v.iter().all(|&p| p == 90), "V untouched");
    }
}
