//! Transform/quantization kernel dispatch.
//!
//! Every fused kernel the coding loop needs is behind [`TransformKernel`]
//! so a SIMD implementation can be swapped in per platform without the
//! callers changing. [`ScalarKernel`] is the portable implementation and
//! the reference for any other.

use crate::common::transform::{forward_dct4x4, hadamard2x2, hadamard4x4, inverse_dct4x4};
use crate::common::clip_pixel;
use crate::encoder::quantize::{dequant_level, quantize_level, QuantParams};

/// Fused forward and inverse transform kernels over 4x4 blocks.
///
/// Implementations must be bit-exact with [`ScalarKernel`]; the coding
/// loop assumes any two kernels reconstruct identical pictures.
pub trait TransformKernel: Send + Sync {
    /// Transform and quantize one 4x4 residual given source and
    /// prediction blocks. Returns the number of nonzero levels in `out`
    /// and the *unquantized* DC term, which the caller feeds to the
    /// Hadamard pass when the macroblock codes its DCs separately.
    fn forward_quant_4x4(
        &self,
        src: &[u8],
        src_stride: usize,
        pred: &[u8],
        pred_stride: usize,
        params: &QuantParams,
        out: &mut [i16; 16],
    ) -> (u8, i16);

    /// 4x4 Hadamard over the sixteen raw luma DC terms, then quantize.
    /// Returns the nonzero count.
    fn hadamard_quant_luma_dc(
        &self,
        dc: &[i16; 16],
        params: &QuantParams,
        out: &mut [i16; 16],
    ) -> u8;

    /// 2x2 Hadamard per chroma plane over `[u0..u3, v0..v3]` raw DC
    /// terms, then quantize. Returns `(nnz_u, nnz_v)`.
    fn hadamard_quant_chroma_dc(
        &self,
        dc: &[i16; 8],
        params: &QuantParams,
        out: &mut [i16; 8],
    ) -> (u8, u8);

    /// Inverse Hadamard plus DC dequantization for luma. `out` receives
    /// fully dequantized DC values ready for injection into the 4x4
    /// inverse transform.
    fn inv_hadamard_luma_dc(&self, levels: &[i16; 16], params: &QuantParams, out: &mut [i32; 16]);

    /// Inverse 2x2 Hadamard plus dequantization for both chroma planes.
    fn inv_hadamard_chroma_dc(&self, levels: &[i16; 8], params: &QuantParams, out: &mut [i32; 8]);

    /// Dequantize, inverse transform, and add to the prediction. When
    /// `dc_override` is set, position 0 of `levels` is ignored and the
    /// already dequantized value is injected instead.
    #[allow(clippy::too_many_arguments)]
    fn inv_quant_recon_4x4(
        &self,
        levels: &[i16; 16],
        dc_override: Option<i32>,
        params: &QuantParams,
        pred: &[u8],
        pred_stride: usize,
        out: &mut [u8],
        out_stride: usize,
    );

    /// Reconstruct a 4x4 block whose only coefficient is one already
    /// dequantized DC value.
    fn recon_dc_only_4x4(
        &self,
        dc: i32,
        pred: &[u8],
        pred_stride: usize,
        out: &mut [u8],
        out_stride: usize,
    );
}

/// Portable scalar kernels.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarKernel;

impl TransformKernel for ScalarKernel {
    fn forward_quant_4x4(
        &self,
        src: &[u8],
        src_stride: usize,
        pred: &[u8],
        pred_stride: usize,
        params: &QuantParams,
        out: &mut [i16; 16],
    ) -> (u8, i16) {
        let mut residual = [0i32; 16];
        for y in 0..4 {
            for x in 0..4 {
                residual[y * 4 + x] =
                    i32::from(src[y * src_stride + x]) - i32::from(pred[y * pred_stride + x]);
            }
        }
        let mut coeffs = [0i32; 16];
        forward_dct4x4(&residual, &mut coeffs);
        let raw_dc = coeffs[0] as i16;

        let mut nnz = 0u8;
        for pos in 0..16 {
            let level = quantize_level(coeffs[pos], params, pos);
            out[pos] = level as i16;
            nnz += u8::from(level != 0);
        }
        (nnz, raw_dc)
    }

    fn hadamard_quant_luma_dc(
        &self,
        dc: &[i16; 16],
        params: &QuantParams,
        out: &mut [i16; 16],
    ) -> u8 {
        let mut input = [0i32; 16];
        for (dst, &src) in input.iter_mut().zip(dc.iter()) {
            *dst = i32::from(src);
        }
        let mut transformed = [0i32; 16];
        hadamard4x4(&input, &mut transformed);

        let mut nnz = 0u8;
        for pos in 0..16 {
            // The luma DC transform carries a rounded halving on the
            // forward side only; the inverse makes it up in scaling.
            let level = quantize_dc((transformed[pos] + 1) >> 1, params);
            out[pos] = level as i16;
            nnz += u8::from(level != 0);
        }
        nnz
    }

    fn hadamard_quant_chroma_dc(
        &self,
        dc: &[i16; 8],
        params: &QuantParams,
        out: &mut [i16; 8],
    ) -> (u8, u8) {
        let mut nnz = [0u8; 2];
        for plane in 0..2 {
            let base = plane * 4;
            let input = [
                i32::from(dc[base]),
                i32::from(dc[base + 1]),
                i32::from(dc[base + 2]),
                i32::from(dc[base + 3]),
            ];
            let mut transformed = [0i32; 4];
            hadamard2x2(&input, &mut transformed);
            for i in 0..4 {
                let level = quantize_dc(transformed[i], params);
                out[base + i] = level as i16;
                nnz[plane] += u8::from(level != 0);
            }
        }
        (nnz[0], nnz[1])
    }

    fn inv_hadamard_luma_dc(&self, levels: &[i16; 16], params: &QuantParams, out: &mut [i32; 16]) {
        let mut input = [0i32; 16];
        for (dst, &src) in input.iter_mut().zip(levels.iter()) {
            *dst = i32::from(src);
        }
        let mut transformed = [0i32; 16];
        hadamard4x4(&input, &mut transformed);
        for pos in 0..16 {
            let q = i64::from(transformed[pos])
                * i64::from(params.iscale[0])
                * i64::from(params.weight[0]);
            out[pos] = ((q << params.qp_div) >> 6) as i32;
        }
    }

    fn inv_hadamard_chroma_dc(&self, levels: &[i16; 8], params: &QuantParams, out: &mut [i32; 8]) {
        for plane in 0..2 {
            let base = plane * 4;
            let input = [
                i32::from(levels[base]),
                i32::from(levels[base + 1]),
                i32::from(levels[base + 2]),
                i32::from(levels[base + 3]),
            ];
            let mut transformed = [0i32; 4];
            hadamard2x2(&input, &mut transformed);
            for i in 0..4 {
                let q = i64::from(transformed[i])
                    * i64::from(params.iscale[0])
                    * i64::from(params.weight[0]);
                out[base + i] = ((q << params.qp_div) >> 5) as i32;
            }
        }
    }

    fn inv_quant_recon_4x4(
        &self,
        levels: &[i16; 16],
        dc_override: Option<i32>,
        params: &QuantParams,
        pred: &[u8],
        pred_stride: usize,
        out: &mut [u8],
        out_stride: usize,
    ) {
        let mut coeffs = [0i32; 16];
        let start = usize::from(dc_override.is_some());
        if let Some(dc) = dc_override {
            coeffs[0] = dc;
        }
        for pos in start..16 {
            coeffs[pos] = dequant_level(i32::from(levels[pos]), params, pos);
        }
        let mut spatial = [0i32; 16];
        inverse_dct4x4(&coeffs, &mut spatial);
        for y in 0..4 {
            for x in 0..4 {
                let r = (spatial[y * 4 + x] + 32) >> 6;
                out[y * out_stride + x] = clip_pixel(i32::from(pred[y * pred_stride + x]) + r);
            }
        }
    }

    fn recon_dc_only_4x4(
        &self,
        dc: i32,
        pred: &[u8],
        pred_stride: usize,
        out: &mut [u8],
        out_stride: usize,
    ) {
        let r = (dc + 32) >> 6;
        for y in 0..4 {
            for x in 0..4 {
                out[y * out_stride + x] = clip_pixel(i32::from(pred[y * pred_stride + x]) + r);
            }
        }
    }
}

/// Quantize one Hadamard-domain DC value. The extra shift and doubled
/// rounding fold in the transform's factor of two.
#[inline]
fn quantize_dc(value: i32, params: &QuantParams) -> i32 {
    let sign = value < 0;
    let abs = value.unsigned_abs();
    let level = ((abs * u32::from(params.scale[0]) + (params.round << 1)) >> (params.qbits + 1)) as i32;
    if sign {
        -level
    } else {
        level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::quantize::QuantParams;

    #[test]
    fn flat_residual_survives_qp0_round_trip() {
        let params = QuantParams::new(0, true);
        let kernel = ScalarKernel;
        let pred = [100u8; 16];
        let src = [105u8; 16];

        let mut levels = [0i16; 16];
        let (nnz, raw_dc) = kernel.forward_quant_4x4(&src, 4, &pred, 4, &params, &mut levels);
        assert_eq!(raw_dc, 5 * 16);
        assert_eq!(nnz, 1);
        assert_ne!(levels[0], 0);

        let mut recon = [0u8; 16];
        kernel.inv_quant_recon_4x4(&levels, None, &params, &pred, 4, &mut recon, 4);
        assert_eq!(recon, src);
    }

    #[test]
    fn textured_residual_round_trips_at_qp0() {
        let params = QuantParams::new(0, true);
        let kernel = ScalarKernel;
        let pred = [128u8; 16];
        let src: [u8; 16] = core::array::from_fn(|i| 120 + (i as u8 % 4) * 8);

        let mut levels = [0i16; 16];
        kernel.forward_quant_4x4(&src, 4, &pred, 4, &params, &mut levels);
        let mut recon = [0u8; 16];
        kernel.inv_quant_recon_4x4(&levels, None, &params, &pred, 4, &mut recon, 4);
        for i in 0..16 {
            assert!(
                (i32::from(recon[i]) - i32::from(src[i])).abs() <= 1,
                "sample {i}: {} vs {}",
                recon[i],
                src[i]
            );
        }
    }

    #[test]
    fn zero_residual_quantizes_to_nothing() {
        let params = QuantParams::new(30, false);
        let kernel = ScalarKernel;
        let block = [77u8; 16];
        let mut levels = [0i16; 16];
        let (nnz, raw_dc) = kernel.forward_quant_4x4(&block, 4, &block, 4, &params, &mut levels);
        assert_eq!(nnz, 0);
        assert_eq!(raw_dc, 0);
        assert!(levels.iter().all(|&l| l == 0));
    }

    #[test]
    fn dc_only_recon_matches_full_inverse() {
        let params = QuantParams::new(20, false);
        let kernel = ScalarKernel;
        let pred = [60u8; 16];

        // A single dequantized DC must reconstruct identically through
        // the shortcut and the full inverse transform.
        let dc = 512;
        let levels = [0i16; 16];
        let mut full = [0u8; 16];
        let mut shortcut = [0u8; 16];
        kernel.inv_quant_recon_4x4(&levels, Some(dc), &params, &pred, 4, &mut full, 4);
        kernel.recon_dc_only_4x4(dc, &pred, 4, &mut shortcut, 4);
        assert_eq!(full, shortcut);
    }

    #[test]
    fn luma_dc_hadamard_round_trip_recovers_flat_dcs() {
        let params = QuantParams::new(0, true);
        let kernel = ScalarKernel;
        // Sixteen 4x4 blocks each with raw DC 80 (flat +5 residual).
        let raw = [80i16; 16];
        let mut levels = [0i16; 16];
        let nnz = kernel.hadamard_quant_luma_dc(&raw, &params, &mut levels);
        assert_eq!(nnz, 1);

        let mut dequant = [0i32; 16];
        kernel.inv_hadamard_luma_dc(&levels, &params, &mut dequant);
        // Each dequantized DC reconstructs 80 / 16 = 5 per sample after
        // the (dc + 32) >> 6 rounding in the spatial pass.
        for &d in &dequant {
            assert_eq!((d + 32) >> 6, 5);
        }
    }
}
