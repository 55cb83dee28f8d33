//! Inter prediction: whole-macroblock motion compensation against a
//! reference picture.
//!
//! Luma uses the three precomputed half-pel planes a reference picture
//! carries (horizontal, vertical, diagonal), selected by the fractional
//! bits of the motion vector; chroma is bilinear at eighth-pel
//! precision. All sampling clamps to the plane edges, so motion vectors
//! pointing outside the picture read replicated border samples.

use crate::common::clip_pixel;
use crate::encoder::buffers::Picture;
use crate::encoder::Mv;

/// 6-tap half-pel filter weights.
const TAPS: [i32; 6] = [1, -5, 20, 20, -5, 1];

#[inline]
fn sample(plane: &[u8], width: usize, height: usize, x: isize, y: isize) -> i32 {
    let cx = x.clamp(0, width as isize - 1) as usize;
    let cy = y.clamp(0, height as isize - 1) as usize;
    i32::from(plane[cy * width + cx])
}

/// Fill the three half-pel interpolation planes from the full-pel luma
/// plane. Done once, when a reconstructed picture becomes a reference.
pub(crate) fn compute_halfpel_planes(pic: &mut Picture) {
    let w = pic.width;
    let h = pic.height;

    // Horizontal: 6-tap across x, centered between x and x + 1.
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0i32;
            for (k, &t) in TAPS.iter().enumerate() {
                acc += t * sample(&pic.y, w, h, x as isize + k as isize - 2, y as isize);
            }
            pic.hpel_h[y * w + x] = clip_pixel((acc + 16) >> 5);
        }
    }

    // Vertical: 6-tap across y.
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0i32;
            for (k, &t) in TAPS.iter().enumerate() {
                acc += t * sample(&pic.y, w, h, x as isize, y as isize + k as isize - 2);
            }
            pic.hpel_v[y * w + x] = clip_pixel((acc + 16) >> 5);
        }
    }

    // Diagonal: vertical 6-tap over the unclipped horizontal
    // intermediate, then a single 10-bit normalization.
    let mut mid = vec![0i32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0i32;
            for (k, &t) in TAPS.iter().enumerate() {
                acc += t * sample(&pic.y, w, h, x as isize + k as isize - 2, y as isize);
            }
            mid[y * w + x] = acc;
        }
    }
    let mid_at = |x: isize, y: isize| {
        let cx = x.clamp(0, w as isize - 1) as usize;
        let cy = y.clamp(0, h as isize - 1) as usize;
        mid[cy * w + cx]
    };
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0i32;
            for (k, &t) in TAPS.iter().enumerate() {
                acc += t * mid_at(x as isize, y as isize + k as isize - 2);
            }
            pic.hpel_hv[y * w + x] = clip_pixel((acc + 512) >> 10);
        }
    }
}

/// Motion compensate one 16x16 luma block into `out` (dense, stride 16).
/// `mv` is in half-pel units.
pub(crate) fn luma_mc_16x16(refp: &Picture, mb_x: usize, mb_y: usize, mv: Mv, out: &mut [u8; 256]) {
    let plane = match (mv.x & 1, mv.y & 1) {
        (0, 0) => &refp.y,
        (1, 0) => &refp.hpel_h,
        (0, 1) => &refp.hpel_v,
        _ => &refp.hpel_hv,
    };
    let ox = mb_x as isize * 16 + isize::from(mv.x >> 1);
    let oy = mb_y as isize * 16 + isize::from(mv.y >> 1);
    for y in 0..16 {
        for x in 0..16 {
            out[y * 16 + x] =
                sample(plane, refp.width, refp.height, ox + x as isize, oy + y as isize) as u8;
        }
    }
}

/// Motion compensate both 8x8 chroma blocks. The luma half-pel vector
/// becomes an eighth-pel chroma vector; interpolation is bilinear.
pub(crate) fn chroma_mc_8x8(
    refp: &Picture,
    mb_x: usize,
    mb_y: usize,
    mv: Mv,
    out_u: &mut [u8; 64],
    out_v: &mut [u8; 64],
) {
    let cw = refp.width / 2;
    let ch = refp.height / 2;
    // Half-pel luma is quarter-pel chroma; scale to eighth-pel units.
    let ex = i32::from(mv.x) * 2;
    let ey = i32::from(mv.y) * 2;
    let dx = (ex & 7) as i32;
    let dy = (ey & 7) as i32;
    let ox = mb_x as isize * 8 + (ex >> 3) as isize;
    let oy = mb_y as isize * 8 + (ey >> 3) as isize;

    let w00 = (8 - dx) * (8 - dy);
    let w01 = dx * (8 - dy);
    let w10 = (8 - dx) * dy;
    let w11 = dx * dy;

    for (plane, out) in [(&refp.u, out_u), (&refp.v, out_v)] {
        for y in 0..8 {
            for x in 0..8 {
                let px = ox + x as isize;
                let py = oy + y as isize;
                let a = sample(plane, cw, ch, px, py);
                let b = sample(plane, cw, ch, px + 1, py);
                let c = sample(plane, cw, ch, px, py + 1);
                let d = sample(plane, cw, ch, px + 1, py + 1);
                out[y * 8 + x] = ((w00 * a + w01 * b + w10 * c + w11 * d + 32) >> 6) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_picture(value: u8) -> Picture {
        let mut pic = Picture::new(32, 32);
        pic.y.fill(value);
        pic.u.fill(value);
        pic.v.fill(value);
        compute_halfpel_planes(&mut pic);
        pic
    }

    #[test]
    fn halfpel_planes_of_flat_picture_are_flat() {
        let pic = flat_picture(83);
        assert!(pic.hpel_h.iter().all(|&p| p == 83));
        assert!(pic.hpel_v.iter().all(|&p| p == 83));
        assert!(pic.hpel_hv.iter().all(|&p| p == 83));
    }

    #[test]
    fn zero_mv_copies_the_reference_block() {
        let mut pic = Picture::new(32, 32);
        for (i, p) in pic.y.iter_mut().enumerate() {
            *p = (i % 255) as u8;
        }
        compute_halfpel_planes(&mut pic);
        let mut out = [0u8; 256];
        luma_mc_16x16(&pic, 1, 0, Mv::default(), &mut out);
        for y in 0..16 {
            for x in 0..16 {
                assert_eq!(out[y * 16 + x], pic.y[y * 32 + 16 + x]);
            }
        }
    }

    #[test]
    fn fractional_mv_selects_interpolated_planes() {
        let pic = flat_picture(120);
        let mut out = [0u8; 256];
        for mv in [
            Mv { x: 1, y: 0 },
            Mv { x: 0, y: 1 },
            Mv { x: 1, y: 1 },
            Mv { x: -3, y: 5 },
        ] {
            luma_mc_16x16(&pic, 0, 0, mv, &mut out);
            assert!(out.iter().all(|&p| p == 120), "mv {mv:?}");
        }
    }

    #[test]
    fn chroma_bilinear_interpolates_between_samples() {
        let mut pic = Picture::new(32, 32);
        // U plane: columns alternate 0 and 8 so a half-sample offset
        // lands exactly between them.
        let cw = 16;
        for y in 0..16 {
            for x in 0..16 {
                pic.u[y * cw + x] = if x % 2 == 0 { 0 } else { 8 };
            }
        }
        let mut out_u = [0u8; 64];
        let mut out_v = [0u8; 64];
        // mv.x = 2 half-pel luma = 4/8 chroma sample.
        chroma_mc_8x8(&pic, 0, 0, Mv { x: 2, y: 0 }, &mut out_u, &mut out_v);
        assert!(out_u.iter().all(|&p| p == 4), "{out_u:?}");
    }
}
