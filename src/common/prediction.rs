//! Spatial (intra) prediction for 16x16 luma, 8x8 chroma, and 4x4 luma
//! blocks.
//!
//! Callers gather neighbor samples from the reconstructed picture and
//! pass them in; a `None` neighbor means the corresponding edge is
//! outside the picture or not yet coded. Modes that depend on a missing
//! edge fall back to DC prediction, which is always defined.

use crate::common::clip_pixel;

/// Prediction mode for a 16x16 intra luma macroblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intra16Mode {
    /// Replicate the row above.
    Vertical,
    /// Replicate the column to the left.
    Horizontal,
    /// Average of the available edges.
    Dc,
    /// First-order plane fit through both edges.
    Plane,
}

/// Prediction mode for the two 8x8 intra chroma blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntraChromaMode {
    /// Average of the available edges.
    Dc,
    /// Replicate the column to the left.
    Horizontal,
    /// Replicate the row above.
    Vertical,
    /// First-order plane fit through both edges.
    Plane,
}

/// Prediction mode for a 4x4 intra luma block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intra4Mode {
    /// Replicate the row above.
    Vertical,
    /// Replicate the column to the left.
    Horizontal,
    /// Average of the available edges.
    Dc,
    /// 45-degree down-left diagonal.
    DiagonalDownLeft,
    /// 45-degree down-right diagonal.
    DiagonalDownRight,
    /// 26.6-degree vertical-right diagonal.
    VerticalRight,
    /// 26.6-degree horizontal-down diagonal.
    HorizontalDown,
    /// 26.6-degree vertical-left diagonal.
    VerticalLeft,
    /// 26.6-degree horizontal-up diagonal.
    HorizontalUp,
}

/// Neighbor samples for one 4x4 block. `left` runs top to bottom,
/// `top` and `top_right` left to right. When the block sits on the
/// right edge of what has been reconstructed, callers replicate the
/// last top sample into `top_right`.
#[derive(Debug, Clone, Copy)]
pub struct Neighbors4x4 {
    /// Column to the left of the block.
    pub left: [u8; 4],
    /// Corner sample above-left.
    pub top_left: u8,
    /// Row above the block.
    pub top: [u8; 4],
    /// Row above and to the right.
    pub top_right: [u8; 4],
    /// Whether `left` holds coded samples.
    pub has_left: bool,
    /// Whether `top`, `top_left`, and `top_right` hold coded samples.
    pub has_top: bool,
}

fn fill(out: &mut [u8], stride: usize, size: usize, value: u8) {
    for row in out.chunks_mut(stride).take(size) {
        row[..size].fill(value);
    }
}

fn dc_value(left: Option<&[u8]>, top: Option<&[u8]>, size: usize) -> u8 {
    match (left, top) {
        (Some(l), Some(t)) => {
            let sum: u32 = l.iter().chain(t.iter()).map(|&p| u32::from(p)).sum();
            ((sum + size as u32) / (2 * size as u32)) as u8
        }
        (Some(e), None) | (None, Some(e)) => {
            let sum: u32 = e.iter().map(|&p| u32::from(p)).sum();
            ((sum + size as u32 / 2) / size as u32) as u8
        }
        (None, None) => 128,
    }
}

fn pred_square(
    mode_v: bool,
    mode_h: bool,
    left: Option<&[u8]>,
    top: Option<&[u8]>,
    out: &mut [u8],
    stride: usize,
    size: usize,
) {
    if mode_v {
        if let Some(t) = top {
            for row in out.chunks_mut(stride).take(size) {
                row[..size].copy_from_slice(&t[..size]);
            }
            return;
        }
    } else if mode_h {
        if let Some(l) = left {
            for (y, row) in out.chunks_mut(stride).take(size).enumerate() {
                row[..size].fill(l[y]);
            }
            return;
        }
    }
    fill(out, stride, size, dc_value(left, top, size));
}

fn pred_plane(
    left: &[u8],
    top: &[u8],
    top_left: u8,
    out: &mut [u8],
    stride: usize,
    size: usize,
) {
    let half = size as i32 / 2;
    let mut h = 0i32;
    let mut v = 0i32;
    for x in 1..=half {
        let far = i32::from(top[(half - 1 + x) as usize]);
        let near = if x == half {
            i32::from(top_left)
        } else {
            i32::from(top[(half - 1 - x) as usize])
        };
        h += x * (far - near);
        let far = i32::from(left[(half - 1 + x) as usize]);
        let near = if x == half {
            i32::from(top_left)
        } else {
            i32::from(left[(half - 1 - x) as usize])
        };
        v += x * (far - near);
    }
    let (b, c) = if size == 16 {
        ((5 * h + 32) >> 6, (5 * v + 32) >> 6)
    } else {
        ((17 * h + 16) >> 5, (17 * v + 16) >> 5)
    };
    let a = 16 * (i32::from(left[size - 1]) + i32::from(top[size - 1]));
    for (y, row) in out.chunks_mut(stride).take(size).enumerate() {
        for x in 0..size {
            let p = (a + b * (x as i32 - half + 1) + c * (y as i32 - half + 1) + 16) >> 5;
            row[x] = clip_pixel(p);
        }
    }
}

/// Predict a 16x16 luma macroblock into `out` (top-left of the target
/// region, `stride` samples per row).
pub fn pred_luma_16x16(
    mode: Intra16Mode,
    left: Option<&[u8; 16]>,
    top: Option<&[u8; 16]>,
    top_left: Option<u8>,
    out: &mut [u8],
    stride: usize,
) {
    let l = left.map(|a| &a[..]);
    let t = top.map(|a| &a[..]);
    match mode {
        Intra16Mode::Vertical => pred_square(true, false, l, t, out, stride, 16),
        Intra16Mode::Horizontal => pred_square(false, true, l, t, out, stride, 16),
        Intra16Mode::Dc => pred_square(false, false, l, t, out, stride, 16),
        Intra16Mode::Plane => match (left, top, top_left) {
            (Some(l), Some(t), Some(tl)) => pred_plane(l, t, tl, out, stride, 16),
            _ => fill(out, stride, 16, dc_value(l, t, 16)),
        },
    }
}

/// Predict one 8x8 chroma block into `out`. Called once per plane.
pub fn pred_chroma_8x8(
    mode: IntraChromaMode,
    left: Option<&[u8; 8]>,
    top: Option<&[u8; 8]>,
    top_left: Option<u8>,
    out: &mut [u8],
    stride: usize,
) {
    let l = left.map(|a| &a[..]);
    let t = top.map(|a| &a[..]);
    match mode {
        IntraChromaMode::Vertical => pred_square(true, false, l, t, out, stride, 8),
        IntraChromaMode::Horizontal => pred_square(false, true, l, t, out, stride, 8),
        IntraChromaMode::Dc => pred_square(false, false, l, t, out, stride, 8),
        IntraChromaMode::Plane => match (left, top, top_left) {
            (Some(l), Some(t), Some(tl)) => pred_plane(l, t, tl, out, stride, 8),
            _ => fill(out, stride, 8, dc_value(l, t, 8)),
        },
    }
}

/// Predict a 4x4 luma block into `out`.
pub fn pred_luma_4x4(mode: Intra4Mode, n: &Neighbors4x4, out: &mut [u8], stride: usize) {
    let left = n.has_left.then_some(&n.left[..]);
    let top = n.has_top.then_some(&n.top[..]);

    // Directional modes degrade to DC when their edge is missing.
    let mode = match mode {
        Intra4Mode::Vertical
        | Intra4Mode::DiagonalDownLeft
        | Intra4Mode::VerticalLeft
            if !n.has_top =>
        {
            Intra4Mode::Dc
        }
        Intra4Mode::Horizontal | Intra4Mode::HorizontalUp if !n.has_left => Intra4Mode::Dc,
        Intra4Mode::DiagonalDownRight
        | Intra4Mode::VerticalRight
        | Intra4Mode::HorizontalDown
            if !(n.has_left && n.has_top) =>
        {
            Intra4Mode::Dc
        }
        m => m,
    };

    // Thirteen-sample working row: left (bottom to top), corner, top,
    // top-right, matching the usual l..tr numbering in the formulas.
    let l = |i: usize| i32::from(n.left[i]);
    let t = |i: usize| {
        if i < 4 {
            i32::from(n.top[i])
        } else {
            i32::from(n.top_right[i - 4])
        }
    };
    let tl = i32::from(n.top_left);
    let avg2 = |a: i32, b: i32| ((a + b + 1) >> 1) as u8;
    let avg3 = |a: i32, b: i32, c: i32| ((a + 2 * b + c + 2) >> 2) as u8;

    match mode {
        Intra4Mode::Vertical => pred_square(true, false, left, top, out, stride, 4),
        Intra4Mode::Horizontal => pred_square(false, true, left, top, out, stride, 4),
        Intra4Mode::Dc => pred_square(false, false, left, top, out, stride, 4),
        Intra4Mode::DiagonalDownLeft => {
            for y in 0..4 {
                for x in 0..4 {
                    let i = x + y;
                    out[y * stride + x] = if i == 6 {
                        avg3(t(6), t(7), t(7))
                    } else {
                        avg3(t(i), t(i + 1), t(i + 2))
                    };
                }
            }
        }
        Intra4Mode::DiagonalDownRight => {
            for y in 0..4i32 {
                for x in 0..4i32 {
                    let d = x - y;
                    let p = match d {
                        2.. => avg3(t((d - 2) as usize), t((d - 1) as usize), t(d as usize)),
                        1 => avg3(tl, t(0), t(1)),
                        0 => avg3(t(0), tl, l(0)),
                        -1 => avg3(tl, l(0), l(1)),
                        _ => avg3(l((-d - 2) as usize), l((-d - 1) as usize), l((-d) as usize)),
                    };
                    out[(y as usize) * stride + x as usize] = p;
                }
            }
        }
        Intra4Mode::VerticalRight => {
            // pl(j) = sample at (-1, j), pt(i) = sample at (i, -1);
            // index -1 is the corner in both.
            let pl = |j: i32| if j < 0 { tl } else { l(j as usize) };
            let pt = |i: i32| if i < 0 { tl } else { t(i as usize) };
            for y in 0..4i32 {
                for x in 0..4i32 {
                    let z = 2 * x - y;
                    let i = x - (y >> 1);
                    let p = if z >= 0 && z % 2 == 0 {
                        avg2(pt(i - 1), pt(i))
                    } else if z >= 0 {
                        avg3(pt(i - 2), pt(i - 1), pt(i))
                    } else if z == -1 {
                        avg3(pl(0), tl, pt(0))
                    } else {
                        avg3(pl(y - 2 * x - 1), pl(y - 2 * x - 2), pl(y - 2 * x - 3))
                    };
                    out[(y as usize) * stride + x as usize] = p;
                }
            }
        }
        Intra4Mode::HorizontalDown => {
            let pl = |j: i32| if j < 0 { tl } else { l(j as usize) };
            let pt = |i: i32| if i < 0 { tl } else { t(i as usize) };
            for y in 0..4i32 {
                for x in 0..4i32 {
                    let z = 2 * y - x;
                    let j = y - (x >> 1);
                    let p = if z >= 0 && z % 2 == 0 {
                        avg2(pl(j - 1), pl(j))
                    } else if z >= 0 {
                        avg3(pl(j - 2), pl(j - 1), pl(j))
                    } else if z == -1 {
                        avg3(pl(0), tl, pt(0))
                    } else {
                        avg3(pt(x - 2 * y - 1), pt(x - 2 * y - 2), pt(x - 2 * y - 3))
                    };
                    out[(y as usize) * stride + x as usize] = p;
                }
            }
        }
        Intra4Mode::VerticalLeft => {
            for y in 0..4usize {
                for x in 0..4usize {
                    let i = x + (y >> 1);
                    out[y * stride + x] = if y % 2 == 0 {
                        avg2(t(i), t(i + 1))
                    } else {
                        avg3(t(i), t(i + 1), t(i + 2))
                    };
                }
            }
        }
        Intra4Mode::HorizontalUp => {
            for y in 0..4usize {
                for x in 0..4usize {
                    let z = x + 2 * y;
                    out[y * stride + x] = match z {
                        0 | 2 | 4 => avg2(l(y + (x >> 1)), l(y + (x >> 1) + 1)),
                        1 | 3 => avg3(l(y + (x >> 1)), l(y + (x >> 1) + 1), l(y + (x >> 1) + 2)),
                        5 => avg3(l(2), l(3), l(3)),
                        _ => n.left[3],
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dc_16x16_with_no_neighbors_is_128() {
        let mut out = [0u8; 16 * 16];
        pred_luma_16x16(Intra16Mode::Dc, None, None, None, &mut out, 16);
        assert!(out.iter().all(|&p| p == 128));
    }

    #[test]
    fn dc_16x16_averages_both_edges() {
        let left = [100u8; 16];
        let top = [60u8; 16];
        let mut out = [0u8; 16 * 16];
        pred_luma_16x16(Intra16Mode::Dc, Some(&left), Some(&top), Some(90), &mut out, 16);
        assert!(out.iter().all(|&p| p == 80));
    }

    #[test]
    fn vertical_16x16_copies_top_row() {
        let top: [u8; 16] = core::array::from_fn(|i| (i * 3) as u8);
        let mut out = [0u8; 16 * 16];
        pred_luma_16x16(Intra16Mode::Vertical, None, Some(&top), None, &mut out, 16);
        for row in out.chunks(16) {
            assert_eq!(row, &top);
        }
    }

    #[test]
    fn plane_8x8_of_flat_edges_is_flat() {
        let left = [77u8; 8];
        let top = [77u8; 8];
        let mut out = [0u8; 8 * 8];
        pred_chroma_8x8(
            IntraChromaMode::Plane,
            Some(&left),
            Some(&top),
            Some(77),
            &mut out,
            8,
        );
        assert!(out.iter().all(|&p| p == 77));
    }

    #[test]
    fn horizontal_4x4_replicates_left_column() {
        let n = Neighbors4x4 {
            left: [10, 20, 30, 40],
            top_left: 0,
            top: [0; 4],
            top_right: [0; 4],
            has_left: true,
            has_top: false,
        };
        let mut out = [0u8; 16];
        pred_luma_4x4(Intra4Mode::Horizontal, &n, &mut out, 4);
        for y in 0..4 {
            assert!(out[y * 4..y * 4 + 4].iter().all(|&p| p == n.left[y]));
        }
    }

    #[test]
    fn directional_4x4_without_top_falls_back_to_dc() {
        let n = Neighbors4x4 {
            left: [50; 4],
            top_left: 0,
            top: [0; 4],
            top_right: [0; 4],
            has_left: true,
            has_top: false,
        };
        let mut out = [0u8; 16];
        pred_luma_4x4(Intra4Mode::DiagonalDownLeft, &n, &mut out, 4);
        assert!(out.iter().all(|&p| p == 50));
    }
}
