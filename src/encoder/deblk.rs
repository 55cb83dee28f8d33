//! Deblock-filter side data.
//!
//! The loop filter itself runs outside the core, but boundary strengths
//! depend on coding decisions (intra, coded residuals, motion), so they
//! are computed while the row is processed and handed to the consumer
//! alongside each macroblock. Each edge packs one strength byte per
//! 4-sample segment, topmost or leftmost segment in the high byte.

use crate::encoder::Mv;

/// Strength of a macroblock-boundary edge when either side is intra.
const BS_INTRA_MB_EDGE: u32 = 0x0404_0404;
/// Strength of the internal edges of an intra macroblock.
const BS_INTRA_INNER: u32 = 0x0303_0303;

/// The per-macroblock facts boundary strengths are derived from,
/// retained so the neighbors below and to the right can see them.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MbDeblk {
    pub intra: bool,
    /// Coded 4x4 luma sub-block pattern, one bit per raster index.
    pub csbp: u16,
    pub mv: Mv,
}

/// Deblock side data for one macroblock.
#[derive(Debug, Clone, Copy)]
pub struct DeblockInfo {
    /// Quantization parameter the macroblock was coded with.
    pub qp: u8,
    /// Strengths of the four vertical edges, the macroblock's left
    /// boundary first. One byte per 4-row segment, top segment in the
    /// high byte. Zero on the picture boundary.
    pub bs_vert: [u32; 4],
    /// Strengths of the four horizontal edges, the macroblock's top
    /// boundary first. One byte per 4-column segment, left segment in
    /// the high byte. Zero on the picture boundary.
    pub bs_horz: [u32; 4],
}

// Half-pel units; a full luma sample apart or more.
fn mv_far(a: Mv, b: Mv) -> bool {
    (i32::from(a.x) - i32::from(b.x)).abs() >= 2
        || (i32::from(a.y) - i32::from(b.y)).abs() >= 2
}

fn coded(csbp: u16, blk: usize) -> bool {
    csbp >> blk & 1 != 0
}

/// Strength of a macroblock-boundary edge. `cur_blocks` and `nb_blocks`
/// name the 4x4 blocks facing each other across the edge, segment by
/// segment.
fn boundary_bs(cur: &MbDeblk, nb: &MbDeblk, cur_blocks: [usize; 4], nb_blocks: [usize; 4]) -> u32 {
    if cur.intra || nb.intra {
        return BS_INTRA_MB_EDGE;
    }
    let far = mv_far(cur.mv, nb.mv);
    let mut bs = 0u32;
    for s in 0..4 {
        let v = if coded(cur.csbp, cur_blocks[s]) || coded(nb.csbp, nb_blocks[s]) {
            2
        } else if far {
            1
        } else {
            0
        };
        bs = bs << 8 | v;
    }
    bs
}

/// Strength of an edge internal to one macroblock. Both sides share the
/// macroblock's motion, so only coded residuals raise the strength.
fn inner_bs(cur: &MbDeblk, a_blocks: [usize; 4], b_blocks: [usize; 4]) -> u32 {
    if cur.intra {
        return BS_INTRA_INNER;
    }
    let mut bs = 0u32;
    for s in 0..4 {
        let v = if coded(cur.csbp, a_blocks[s]) || coded(cur.csbp, b_blocks[s]) {
            2
        } else {
            0
        };
        bs = bs << 8 | v;
    }
    bs
}

/// Compute the eight edge strengths of one macroblock. `left` and `top`
/// are `None` on the picture boundary, which leaves that boundary edge
/// at strength zero.
pub(crate) fn compute_mb_bs(
    cur: &MbDeblk,
    left: Option<&MbDeblk>,
    top: Option<&MbDeblk>,
) -> ([u32; 4], [u32; 4]) {
    let mut bs_vert = [0u32; 4];
    let mut bs_horz = [0u32; 4];

    if let Some(l) = left {
        bs_vert[0] = boundary_bs(cur, l, [0, 4, 8, 12], [3, 7, 11, 15]);
    }
    for e in 1..4 {
        bs_vert[e] = inner_bs(
            cur,
            [e, 4 + e, 8 + e, 12 + e],
            [e - 1, 3 + e, 7 + e, 11 + e],
        );
    }

    if let Some(t) = top {
        bs_horz[0] = boundary_bs(cur, t, [0, 1, 2, 3], [12, 13, 14, 15]);
    }
    for e in 1..4 {
        let base = 4 * e;
        bs_horz[e] = inner_bs(
            cur,
            [base, base + 1, base + 2, base + 3],
            [base - 4, base - 3, base - 2, base - 1],
        );
    }

    (bs_vert, bs_horz)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intra_mb_gets_strength_four_on_boundaries_three_inside() {
        let cur = MbDeblk {
            intra: true,
            ..MbDeblk::default()
        };
        let nb = MbDeblk::default();
        let (v, h) = compute_mb_bs(&cur, Some(&nb), Some(&nb));
        assert_eq!(v, [0x0404_0404, 0x0303_0303, 0x0303_0303, 0x0303_0303]);
        assert_eq!(h, [0x0404_0404, 0x0303_0303, 0x0303_0303, 0x0303_0303]);
    }

    #[test]
    fn picture_corner_leaves_boundary_edges_at_zero() {
        let cur = MbDeblk {
            intra: true,
            ..MbDeblk::default()
        };
        let (v, h) = compute_mb_bs(&cur, None, None);
        assert_eq!(v[0], 0);
        assert_eq!(h[0], 0);
        assert_eq!(v[1], 0x0303_0303);
        assert_eq!(h[1], 0x0303_0303);
    }

    #[test]
    fn coded_sub_block_raises_both_of_its_inner_edges() {
        // Raster block 5 faces vertical edge 1 and horizontal edge 1,
        // second segment of each.
        let cur = MbDeblk {
            intra: false,
            csbp: 1 << 5,
            mv: Mv::default(),
        };
        let quiet = MbDeblk::default();
        let (v, h) = compute_mb_bs(&cur, Some(&quiet), Some(&quiet));
        assert_eq!(v[1], 0x0002_0000);
        assert_eq!(v[2], 0x0002_0000);
        assert_eq!(h[1], 0x0002_0000);
        assert_eq!(h[2], 0x0002_0000);
        assert_eq!(v[0], 0);
        assert_eq!(h[0], 0);
    }

    #[test]
    fn motion_gap_alone_gives_strength_one_on_the_shared_edge() {
        let cur = MbDeblk {
            intra: false,
            csbp: 0,
            mv: Mv { x: 4, y: 0 },
        };
        let still = MbDeblk::default();
        let (v, h) = compute_mb_bs(&cur, Some(&still), Some(&still));
        assert_eq!(v[0], 0x0101_0101);
        assert_eq!(h[0], 0x0101_0101);
        assert_eq!(v[1], 0);

        // Sub-sample motion differences stay below the threshold.
        let close = MbDeblk {
            mv: Mv { x: 1, y: -1 },
            ..cur
        };
        let (v, _) = compute_mb_bs(&close, Some(&still), None);
        assert_eq!(v[0], 0);
    }
}
