//! Per-macroblock core coding: prediction, forward transform and
//! quantization, coefficient packing, and reconstruction, dispatched on
//! the upstream mode decision.
//!
//! Sub-block traversal inside a macroblock follows the 8x8-quadrant
//! transmission order everywhere the stream or intra prediction cares;
//! residual storage stays in raster order.

use crate::common::prediction::{
    pred_chroma_8x8, pred_luma_16x16, pred_luma_4x4, Neighbors4x4,
};
use crate::common::LUMA_BLOCK_ORDER;
use crate::encoder::buffers::Picture;
use crate::encoder::kernel::TransformKernel;
use crate::encoder::pack::{
    pack_chroma, pack_luma_4x4, pack_luma_i16, ChromaResidual, CoeffBuffer, LumaResidual, MbCtrl,
};
use crate::encoder::quantize::{FrameQuant, MbQuant};
use crate::encoder::recon;
use crate::encoder::{mc, FrameInput, MbDecision, MbType, Mv};

/// Everything the per-macroblock coding needs for one row's worth of
/// work. `recon` is the frame's reconstruction picture; rows above and
/// macroblocks to the left are complete when a macroblock is coded.
pub(crate) struct MbContext<'a> {
    pub kernel: &'a dyn TransformKernel,
    pub quant: &'a FrameQuant,
    pub input: &'a FrameInput,
    pub width: usize,
    pub height: usize,
    pub recon: &'a mut Picture,
    pub reference: Option<&'a Picture>,
    pub eliminate: bool,
    /// When clear, luma and inter chroma reconstruction is masked down
    /// to the border blocks future intra prediction reads.
    pub full_recon: bool,
}

/// Outcome of coding one macroblock, as the entropy stage sees it.
#[derive(Debug, Clone)]
pub(crate) struct MbResult {
    pub mb_type: MbType,
    pub cbp_luma: u8,
    pub cbp_chroma: u8,
    pub mv: Mv,
    pub nnz_luma: [u8; 17],
    pub nnz_chroma: [u8; 10],
}

impl MbResult {
    fn empty(mb_type: MbType, mv: Mv) -> Self {
        MbResult {
            mb_type,
            cbp_luma: 0,
            cbp_chroma: 0,
            mv,
            nnz_luma: [0; 17],
            nnz_chroma: [0; 10],
        }
    }
}

impl MbContext<'_> {
    /// Code one macroblock into `buf`, reconstructing into the frame
    /// picture as a side effect.
    pub fn code_mb(
        &mut self,
        mb_x: usize,
        mb_y: usize,
        decision: MbDecision,
        buf: &mut CoeffBuffer,
    ) -> MbResult {
        match decision {
            MbDecision::Intra16 { mode, chroma_mode } => {
                let (cbp_luma, nnz_luma) = self.code_luma_i16(mb_x, mb_y, mode, buf);
                let (cbp_chroma, nnz_chroma) =
                    self.code_chroma_intra(mb_x, mb_y, chroma_mode, buf);
                MbResult {
                    mb_type: MbType::I16x16,
                    cbp_luma,
                    cbp_chroma,
                    mv: Mv::default(),
                    nnz_luma,
                    nnz_chroma,
                }
            }
            MbDecision::Intra4 { modes, chroma_mode } => {
                let (cbp_luma, nnz_luma) = self.code_luma_i4(mb_x, mb_y, &modes, buf);
                let (cbp_chroma, nnz_chroma) =
                    self.code_chroma_intra(mb_x, mb_y, chroma_mode, buf);
                MbResult {
                    mb_type: MbType::I4x4,
                    cbp_luma,
                    cbp_chroma,
                    mv: Mv::default(),
                    nnz_luma,
                    nnz_chroma,
                }
            }
            MbDecision::Inter { mv, skip } => self.code_inter(mb_x, mb_y, mv, skip, buf),
        }
    }

    // ---- intra 16x16 ----

    fn code_luma_i16(
        &mut self,
        mb_x: usize,
        mb_y: usize,
        mode: crate::encoder::Intra16Mode,
        buf: &mut CoeffBuffer,
    ) -> (u8, [u8; 17]) {
        let params = &self.quant.intra.luma;
        let mut pred = [0u8; 256];
        let (left, top, top_left) = self.luma_mb_neighbors(mb_x, mb_y);
        pred_luma_16x16(
            mode,
            left.as_ref(),
            top.as_ref(),
            top_left,
            &mut pred,
            16,
        );

        let mut res = LumaResidual::default();
        let mut raw_dc = [0i16; 16];
        let src_off = mb_y * 16 * self.width + mb_x * 16;
        for blk in 0..16 {
            let s = src_off + (blk / 4) * 4 * self.width + (blk % 4) * 4;
            let p = (blk / 4) * 4 * 16 + (blk % 4) * 4;
            let (_, dc) = self.kernel.forward_quant_4x4(
                &self.input.y[s..],
                self.width,
                &pred[p..],
                16,
                params,
                &mut res.ac[blk],
            );
            raw_dc[blk] = dc;
        }
        self.kernel
            .hadamard_quant_luma_dc(&raw_dc, params, &mut res.dc);

        let mut nnz = [0u8; 17];
        let mut ctrl = MbCtrl::default();
        let cbp_luma = pack_luma_i16(buf, &res, &mut nnz, &mut ctrl);

        if !self.full_recon {
            recon::mask_luma_to_border(&mut ctrl);
        }
        let off = self.recon.mb_luma_offset(mb_x, mb_y);
        let stride = self.recon.width;
        recon::recon_luma_i16(
            self.kernel,
            params,
            &res,
            &ctrl,
            &pred,
            &mut self.recon.y[off..],
            stride,
        );
        (cbp_luma, nnz)
    }

    // ---- intra 4x4 ----

    fn code_luma_i4(
        &mut self,
        mb_x: usize,
        mb_y: usize,
        modes: &[crate::encoder::Intra4Mode; 16],
        buf: &mut CoeffBuffer,
    ) -> (u8, [u8; 17]) {
        let params = &self.quant.intra.luma;
        let mut res = LumaResidual::default();
        let stride = self.recon.width;
        let mb_off = self.recon.mb_luma_offset(mb_x, mb_y);

        // Blocks are coded in transmission order so that each block's
        // causal neighbors are already reconstructed.
        for &blk in LUMA_BLOCK_ORDER.iter() {
            let bx = blk % 4;
            let by = blk / 4;
            let gx = mb_x * 16 + bx * 4;
            let gy = mb_y * 16 + by * 4;
            let n = self.gather_4x4_neighbors(blk, gx, gy);

            let mut pred = [0u8; 16];
            pred_luma_4x4(modes[blk], &n, &mut pred, 4);

            let src = gy * self.width + gx;
            let (nnz, _) = self.kernel.forward_quant_4x4(
                &self.input.y[src..],
                self.width,
                &pred,
                4,
                params,
                &mut res.ac[blk],
            );

            let out = mb_off + by * 4 * stride + bx * 4;
            if nnz > 0 {
                self.kernel.inv_quant_recon_4x4(
                    &res.ac[blk],
                    None,
                    params,
                    &pred,
                    4,
                    &mut self.recon.y[out..],
                    stride,
                );
            } else {
                for y in 0..4 {
                    self.recon.y[out + y * stride..out + y * stride + 4]
                        .copy_from_slice(&pred[y * 4..y * 4 + 4]);
                }
            }
        }

        let mut nnz = [0u8; 17];
        let mut ctrl = MbCtrl::default();
        let cbp_luma = pack_luma_4x4(buf, &res, &mut nnz, &mut ctrl, false);
        (cbp_luma, nnz)
    }

    /// Neighbor gathering for one 4x4 intra block at picture position
    /// (`gx`, `gy`). The row above the macroblock is always complete,
    /// so top-right availability within it only depends on the picture
    /// edge; inside the macroblock it depends on transmission order.
    fn gather_4x4_neighbors(&self, blk: usize, gx: usize, gy: usize) -> Neighbors4x4 {
        let stride = self.recon.width;
        let y_plane = &self.recon.y;
        let has_left = gx > 0;
        let has_top = gy > 0;

        let mut n = Neighbors4x4 {
            left: [0; 4],
            top_left: 0,
            top: [0; 4],
            top_right: [0; 4],
            has_left,
            has_top,
        };
        if has_left {
            for i in 0..4 {
                n.left[i] = y_plane[(gy + i) * stride + gx - 1];
            }
        }
        if has_top {
            let row = (gy - 1) * stride;
            n.top.copy_from_slice(&y_plane[row + gx..row + gx + 4]);
            if has_left {
                n.top_left = y_plane[row + gx - 1];
            }

            let bx = blk % 4;
            let by = blk / 4;
            // LUMA_BLOCK_ORDER is its own inverse, so it doubles as the
            // raster-to-transmission position map.
            let tr_avail = if by == 0 {
                gx + 4 < self.width
            } else if bx == 3 {
                false
            } else {
                LUMA_BLOCK_ORDER[(by - 1) * 4 + bx + 1] < LUMA_BLOCK_ORDER[blk]
            };
            if tr_avail {
                n.top_right
                    .copy_from_slice(&y_plane[row + gx + 4..row + gx + 8]);
            } else {
                n.top_right = [n.top[3]; 4];
            }
        }
        n
    }

    // ---- inter ----

    fn code_inter(
        &mut self,
        mb_x: usize,
        mb_y: usize,
        mv: Mv,
        skip: bool,
        buf: &mut CoeffBuffer,
    ) -> MbResult {
        let Some(refp) = self.reference else {
            // submit() rejects inter decisions without a reference;
            // falling back to a flat skip keeps this path total.
            self.write_flat_mb(mb_x, mb_y);
            return MbResult::empty(MbType::PSkip, Mv::default());
        };

        let mut pred_y = [0u8; 256];
        let mut pred_u = [0u8; 64];
        let mut pred_v = [0u8; 64];
        mc::luma_mc_16x16(refp, mb_x, mb_y, mv, &mut pred_y);
        mc::chroma_mc_8x8(refp, mb_x, mb_y, mv, &mut pred_u, &mut pred_v);

        if skip {
            self.copy_pred_to_recon(mb_x, mb_y, &pred_y, &pred_u, &pred_v);
            return MbResult::empty(MbType::PSkip, mv);
        }

        let params = &self.quant.inter.luma;
        let mut res = LumaResidual::default();
        let src_off = mb_y * 16 * self.width + mb_x * 16;
        for blk in 0..16 {
            let s = src_off + (blk / 4) * 4 * self.width + (blk % 4) * 4;
            let p = (blk / 4) * 4 * 16 + (blk % 4) * 4;
            let (_, _) = self.kernel.forward_quant_4x4(
                &self.input.y[s..],
                self.width,
                &pred_y[p..],
                16,
                params,
                &mut res.ac[blk],
            );
        }

        let mut nnz_luma = [0u8; 17];
        let mut ctrl = MbCtrl::default();
        let cbp_luma = pack_luma_4x4(buf, &res, &mut nnz_luma, &mut ctrl, self.eliminate);

        if !self.full_recon {
            recon::mask_luma_to_border(&mut ctrl);
        }
        let off = self.recon.mb_luma_offset(mb_x, mb_y);
        let stride = self.recon.width;
        recon::recon_luma_4x4(
            self.kernel,
            params,
            &res,
            &ctrl,
            &pred_y,
            &mut self.recon.y[off..],
            stride,
        );

        let quant = self.quant.inter.clone();
        let (cbp_chroma, nnz_chroma) =
            self.code_chroma(mb_x, mb_y, &pred_u, &pred_v, &quant, false, buf);

        MbResult {
            mb_type: MbType::P16x16,
            cbp_luma,
            cbp_chroma,
            mv,
            nnz_luma,
            nnz_chroma,
        }
    }

    // ---- chroma ----

    fn code_chroma_intra(
        &mut self,
        mb_x: usize,
        mb_y: usize,
        mode: crate::encoder::IntraChromaMode,
        buf: &mut CoeffBuffer,
    ) -> (u8, [u8; 10]) {
        let mut pred_u = [0u8; 64];
        let mut pred_v = [0u8; 64];
        self.predict_chroma(mb_x, mb_y, mode, &mut pred_u, &mut pred_v);
        let quant = self.quant.intra.clone();
        self.code_chroma(mb_x, mb_y, &pred_u, &pred_v, &quant, true, buf)
    }

    fn predict_chroma(
        &self,
        mb_x: usize,
        mb_y: usize,
        mode: crate::encoder::IntraChromaMode,
        pred_u: &mut [u8; 64],
        pred_v: &mut [u8; 64],
    ) {
        let cw = self.recon.width / 2;
        let off = self.recon.mb_chroma_offset(mb_x, mb_y);
        for (plane, pred) in [(&self.recon.u, pred_u), (&self.recon.v, pred_v)] {
            let mut left = None;
            let mut top = None;
            let mut top_left = None;
            if mb_x > 0 {
                let mut l = [0u8; 8];
                for i in 0..8 {
                    l[i] = plane[off + i * cw - 1];
                }
                left = Some(l);
            }
            if mb_y > 0 {
                let mut t = [0u8; 8];
                t.copy_from_slice(&plane[off - cw..off - cw + 8]);
                top = Some(t);
                if mb_x > 0 {
                    top_left = Some(plane[off - cw - 1]);
                }
            }
            pred_chroma_8x8(mode, left.as_ref(), top.as_ref(), top_left, pred, 8);
        }
    }

    fn code_chroma(
        &mut self,
        mb_x: usize,
        mb_y: usize,
        pred_u: &[u8; 64],
        pred_v: &[u8; 64],
        quant: &MbQuant,
        intra: bool,
        buf: &mut CoeffBuffer,
    ) -> (u8, [u8; 10]) {
        let params = &quant.chroma;
        let cw = self.width / 2;
        let src_off = mb_y * 8 * cw + mb_x * 8;

        let mut res = ChromaResidual::default();
        let mut raw_dc = [0i16; 8];
        for plane in 0..2 {
            let src = if plane == 0 {
                &self.input.u
            } else {
                &self.input.v
            };
            let pred = if plane == 0 { pred_u } else { pred_v };
            for b4 in 0..4 {
                let idx = plane * 4 + b4;
                let s = src_off + (b4 / 2) * 4 * cw + (b4 % 2) * 4;
                let p = (b4 / 2) * 4 * 8 + (b4 % 2) * 4;
                let (_, dc) = self.kernel.forward_quant_4x4(
                    &src[s..],
                    cw,
                    &pred[p..],
                    8,
                    params,
                    &mut res.ac[idx],
                );
                raw_dc[idx] = dc;
            }
        }
        self.kernel
            .hadamard_quant_chroma_dc(&raw_dc, params, &mut res.dc);

        let mut nnz = [0u8; 10];
        let mut ctrl = MbCtrl::default();
        let cbp_chroma = pack_chroma(buf, &res, &mut nnz, &mut ctrl, self.eliminate);

        if !intra && !self.full_recon {
            recon::mask_chroma_to_border(&mut ctrl);
        }
        let off = self.recon.mb_chroma_offset(mb_x, mb_y);
        let stride = self.recon.width / 2;
        let (u_plane, v_plane) = (&mut self.recon.u[off..], &mut self.recon.v[off..]);
        recon::recon_chroma(
            self.kernel,
            params,
            &res,
            &ctrl,
            pred_u,
            pred_v,
            u_plane,
            v_plane,
            stride,
        );
        (cbp_chroma, nnz)
    }

    // ---- helpers ----

    fn luma_mb_neighbors(
        &self,
        mb_x: usize,
        mb_y: usize,
    ) -> (Option<[u8; 16]>, Option<[u8; 16]>, Option<u8>) {
        let stride = self.recon.width;
        let off = self.recon.mb_luma_offset(mb_x, mb_y);
        let mut left = None;
        let mut top = None;
        let mut top_left = None;
        if mb_x > 0 {
            let mut l = [0u8; 16];
            for i in 0..16 {
                l[i] = self.recon.y[off + i * stride - 1];
            }
            left = Some(l);
        }
        if mb_y > 0 {
            let mut t = [0u8; 16];
            t.copy_from_slice(&self.recon.y[off - stride..off - stride + 16]);
            top = Some(t);
            if mb_x > 0 {
                top_left = Some(self.recon.y[off - stride - 1]);
            }
        }
        (left, top, top_left)
    }

    fn copy_pred_to_recon(
        &mut self,
        mb_x: usize,
        mb_y: usize,
        pred_y: &[u8; 256],
        pred_u: &[u8; 64],
        pred_v: &[u8; 64],
    ) {
        let stride = self.recon.width;
        let off = self.recon.mb_luma_offset(mb_x, mb_y);
        for y in 0..16 {
            self.recon.y[off + y * stride..off + y * stride + 16]
                .copy_from_slice(&pred_y[y * 16..y * 16 + 16]);
        }
        let cw = stride / 2;
        let coff = self.recon.mb_chroma_offset(mb_x, mb_y);
        for y in 0..8 {
            self.recon.u[coff + y * cw..coff + y * cw + 8]
                .copy_from_slice(&pred_u[y * 8..y * 8 + 8]);
            self.recon.v[coff + y * cw..coff + y * cw + 8]
                .copy_from_slice(&pred_v[y * 8..y * 8 + 8]);
        }
    }

    fn write_flat_mb(&mut self, mb_x: usize, mb_y: usize) {
        self.copy_pred_to_recon(mb_x, mb_y, &[128; 256], &[128; 64], &[128; 64]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::kernel::ScalarKernel;
    use crate::encoder::{FrameType, Intra16Mode, IntraChromaMode};

    fn frame_input(y: u8, u: u8, v: u8, frame_type: FrameType, qp: u8) -> FrameInput {
        FrameInput {
            y: vec![y; 256],
            u: vec![u; 64],
            v: vec![v; 64],
            frame_type,
            qp,
            is_reference: true,
            decisions: Vec::new(),
        }
    }

    fn run_single_mb(
        input: &FrameInput,
        reference: Option<&Picture>,
        decision: MbDecision,
    ) -> (MbResult, Picture, CoeffBuffer) {
        let kernel = ScalarKernel;
        let quant = FrameQuant::new(input.qp);
        let mut recon = Picture::new(16, 16);
        let mut buf = CoeffBuffer::with_capacity(512);
        let result = {
            let mut ctx = MbContext {
                kernel: &kernel,
                quant: &quant,
                input,
                width: 16,
                height: 16,
                recon: &mut recon,
                reference,
                eliminate: true,
                full_recon: true,
            };
            ctx.code_mb(0, 0, decision, &mut buf)
        };
        (result, recon, buf)
    }

    #[test]
    fn flat_intra16_frame_start_codes_nothing() {
        // Prediction without neighbors falls back to DC 128, which
        // matches the source exactly.
        let input = frame_input(128, 128, 128, FrameType::Intra, 28);
        let decision = MbDecision::Intra16 {
            mode: Intra16Mode::Dc,
            chroma_mode: IntraChromaMode::Dc,
        };
        let (result, recon, _) = run_single_mb(&input, None, decision);
        assert_eq!(result.mb_type, MbType::I16x16);
        assert_eq!(result.cbp_luma, 0);
        assert_eq!(result.cbp_chroma, 0);
        assert_eq!(result.nnz_luma, [0; 17]);
        assert!(recon.y.iter().all(|&p| p == 128));
        assert!(recon.u.iter().all(|&p| p == 128));
    }

    #[test]
    fn flat_offset_intra16_survives_dc_path_exactly() {
        // A uniform +5 residual lands entirely in the DC transforms and
        // comes back exact at QP 0.
        let input = frame_input(133, 133, 133, FrameType::Intra, 0);
        let decision = MbDecision::Intra16 {
            mode: Intra16Mode::Dc,
            chroma_mode: IntraChromaMode::Dc,
        };
        let (result, recon, _) = run_single_mb(&input, None, decision);
        assert_eq!(result.cbp_luma, 0);
        assert!(result.nnz_luma[0] > 0, "luma DC block should carry levels");
        assert!(
            result.nnz_luma[1..].iter().all(|&n| n == 0),
            "flat residual leaves no AC levels"
        );
        assert!(recon.y.iter().all(|&p| p == 133));
        assert!(recon.u.iter().all(|&p| p == 133));
        assert!(recon.v.iter().all(|&p| p == 133));
    }

    #[test]
    fn zero_residual_inter_mb_codes_nothing() {
        let mut refp = Picture::new(16, 16);
        refp.y.fill(100);
        refp.u.fill(100);
        refp.v.fill(100);
        let input = frame_input(100, 100, 100, FrameType::Inter, 28);
        let decision = MbDecision::Inter {
            mv: Mv { x: 0, y: 0 },
            skip: false,
        };
        let (result, recon, _) = run_single_mb(&input, Some(&refp), decision);
        assert_eq!(result.mb_type, MbType::P16x16);
        assert_eq!(result.cbp_luma, 0);
        assert_eq!(result.cbp_chroma, 0);
        assert!(recon.y.iter().all(|&p| p == 100));
    }

    #[test]
    fn skip_mb_copies_prediction_and_emits_no_records() {
        let mut refp = Picture::new(16, 16);
        refp.y.fill(73);
        refp.u.fill(60);
        refp.v.fill(200);
        let input = frame_input(0, 0, 0, FrameType::Inter, 28);
        let decision = MbDecision::Inter {
            mv: Mv { x: 0, y: 0 },
            skip: true,
        };
        let (result, recon, buf) = run_single_mb(&input, Some(&refp), decision);
        assert_eq!(result.mb_type, MbType::PSkip);
        assert_eq!(buf.len(), 0);
        assert!(recon.y.iter().all(|&p| p == 73));
        assert!(recon.u.iter().all(|&p| p == 60));
        assert!(recon.v.iter().all(|&p| p == 200));
    }

    #[test]
    fn intra4_flat_offset_reconstructs_exactly() {
        let input = frame_input(133, 128, 128, FrameType::Intra, 0);
        let decision = MbDecision::Intra4 {
            modes: [crate::encoder::Intra4Mode::Dc; 16],
            chroma_mode: IntraChromaMode::Dc,
        };
        let (result, recon, _) = run_single_mb(&input, None, decision);
        assert_eq!(result.mb_type, MbType::I4x4);
        assert!(recon.y.iter().all(|&p| p == 133));
        assert_eq!(result.cbp_chroma, 0);
    }
}
