//! Coefficient packing: serializes quantized residual blocks into the
//! compact per-row stream consumed by the entropy stage, eliminating
//! sub-blocks whose coefficients are too cheap to be worth coding.
//!
//! Every 4x4 unit becomes one record: a nonzero count byte, then (when
//! the count is nonzero) a 16-bit significance map over the scanned
//! positions followed by the nonzero values in scan order, two bytes
//! each, little endian. An empty record is the single zero byte.
//!
//! Elimination works by rewinding: the packer remembers the write
//! position at each decision boundary (8x8 quadrant, whole macroblock,
//! chroma plane) and truncates back when the accumulated coefficient
//! cost falls under the threshold, also clearing the matching nonzero
//! counts and reconstruction flags so the inverse path agrees with what
//! the stream says.

use crate::common::{LUMA_BLOCK_ORDER, ZIGZAG_4X4};

/// Cost of an isolated +-1 level by preceding zero-run length; longer
/// runs and larger levels cost 9.
const COEFF_COST: [u32; 6] = [3, 2, 2, 1, 1, 1];

/// An 8x8 luma quadrant is dropped when its cost is at or under this.
const LUMA_QUAD_SKIP_THRESHOLD: u32 = 4;
/// A whole luma macroblock is dropped at or under this.
const LUMA_MB_SKIP_THRESHOLD: u32 = 5;
/// A chroma plane's AC blocks are dropped strictly under this.
const CHROMA_PLANE_SKIP_THRESHOLD: u32 = 4;

/// Scan order over the four chroma DC terms of one plane.
const CHROMA_DC_SCAN: [usize; 4] = [0, 1, 2, 3];

/// Quantized residual of one luma macroblock: the Hadamard DC block
/// plus sixteen AC blocks indexed in raster order. For macroblocks
/// without the DC transform the `dc` array is unused and position 0 of
/// each AC block holds the block's own DC level.
#[derive(Clone)]
pub(crate) struct LumaResidual {
    /// Quantized Hadamard block, raster order.
    pub dc: [i16; 16],
    /// Quantized 4x4 blocks, raster order within the macroblock.
    pub ac: [[i16; 16]; 16],
}

impl Default for LumaResidual {
    fn default() -> Self {
        LumaResidual {
            dc: [0; 16],
            ac: [[0; 16]; 16],
        }
    }
}

/// Quantized residual of both chroma planes: eight DC terms (U then V)
/// and eight AC blocks (U blocks 0..4 raster, then V).
#[derive(Clone)]
pub(crate) struct ChromaResidual {
    /// Quantized 2x2 Hadamard output per plane.
    pub dc: [i16; 8],
    /// Quantized 4x4 blocks, U plane then V plane.
    pub ac: [[i16; 16]; 8],
}

impl Default for ChromaResidual {
    fn default() -> Self {
        ChromaResidual {
            dc: [0; 8],
            ac: [[0; 16]; 8],
        }
    }
}

/// Per-block reconstruction control for one macroblock, produced by the
/// packer as it discovers which blocks still carry coefficients. Each
/// 4x4 unit takes exactly one inverse path: full inverse transform when
/// its AC flag is set, the DC-only shortcut when only the DC flag is
/// set, and a plain prediction copy when neither is.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MbCtrl {
    /// Luma blocks needing the full inverse transform, raster order.
    pub luma_ac: [bool; 16],
    /// Luma blocks whose only level is their own DC term (inter only;
    /// for intra 16x16 the promotion pass fills these from the inverse
    /// Hadamard output).
    pub luma_dc: [bool; 16],
    /// The intra 16x16 Hadamard block has nonzero levels.
    pub luma_dc_block: bool,
    /// Chroma blocks needing the full inverse transform, U then V.
    pub chroma_ac: [bool; 8],
    /// Per-plane chroma DC presence, U then V.
    pub chroma_dc: [bool; 2],
}

/// Append-only coefficient stream with rewind support.
#[derive(Debug, Default)]
pub(crate) struct CoeffBuffer {
    bytes: Vec<u8>,
}

impl CoeffBuffer {
    pub fn with_capacity(cap: usize) -> Self {
        CoeffBuffer {
            bytes: Vec::with_capacity(cap),
        }
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn mark(&self) -> usize {
        self.bytes.len()
    }

    fn rewind(&mut self, mark: usize) {
        self.bytes.truncate(mark);
    }

    fn put_empty(&mut self) {
        self.bytes.push(0);
    }

    fn put_record(&mut self, nnz: u8, sig_map: u16, values: &[i16]) {
        self.bytes.push(nnz);
        if nnz > 0 {
            self.bytes.extend_from_slice(&sig_map.to_le_bytes());
            for &v in values {
                self.bytes.extend_from_slice(&v.to_le_bytes());
            }
        }
    }

    /// Scan `levels` through `scan[skip..]` and emit one record.
    /// Returns the nonzero count.
    fn put_block(&mut self, levels: &[i16; 16], scan: &[usize], skip: usize) -> u8 {
        let mut values = [0i16; 16];
        let mut sig_map = 0u16;
        let mut count = 0usize;
        for (bit, &pos) in scan[skip..].iter().enumerate() {
            let v = levels[pos];
            if v != 0 {
                sig_map |= 1 << bit;
                values[count] = v;
                count += 1;
            }
        }
        self.put_record(count as u8, sig_map, &values[..count]);
        count as u8
    }
}

/// Zero-run cost accumulator shared by the luma and chroma packers.
struct CostTracker {
    run: i32,
    cost: u32,
}

impl CostTracker {
    fn new() -> Self {
        CostTracker { run: -1, cost: 0 }
    }

    fn reset_run(&mut self) {
        self.run = -1;
    }

    fn step(&mut self, level: i16) {
        self.run += 1;
        if level == 0 {
            return;
        }
        if level == 1 || level == -1 {
            if self.run < 6 {
                self.cost += COEFF_COST[self.run as usize];
            }
        } else {
            self.cost += 9;
        }
        self.run = -1;
    }
}

/// Pack an intra 16x16 luma macroblock: the DC record always goes
/// first, then sixteen AC records in transmission order scanned from
/// position 1. All AC records are rewound when none carries levels.
/// Returns the luma CBP (0 or 15). No cost elimination here; the DC
/// split already strips most of the cheap energy.
pub(crate) fn pack_luma_i16(
    buf: &mut CoeffBuffer,
    res: &LumaResidual,
    nnz: &mut [u8; 17],
    ctrl: &mut MbCtrl,
) -> u8 {
    let n = buf.put_block(&res.dc, &ZIGZAG_4X4, 0);
    nnz[0] = n;
    ctrl.luma_dc_block = n > 0;

    let ac_mark = buf.mark();
    let mut cbp = 0u8;
    for &blk in LUMA_BLOCK_ORDER.iter() {
        let n = buf.put_block(&res.ac[blk], &ZIGZAG_4X4, 1);
        nnz[1 + blk] = n;
        if n > 0 {
            cbp = 15;
            ctrl.luma_ac[blk] = true;
        }
    }
    if cbp == 0 {
        buf.rewind(ac_mark);
    }
    cbp
}

/// Pack sixteen standalone luma AC blocks (inter 16x16 and intra 4x4),
/// with optional coefficient-cost elimination at the 8x8 quadrant and
/// macroblock levels. Returns the luma CBP with one bit per quadrant.
pub(crate) fn pack_luma_4x4(
    buf: &mut CoeffBuffer,
    res: &LumaResidual,
    nnz: &mut [u8; 17],
    ctrl: &mut MbCtrl,
    eliminate: bool,
) -> u8 {
    nnz[0] = 0;
    let mb_mark = buf.mark();
    let mut quad_mark = buf.mark();
    let mut cbp = 0u8;
    let mut mb_cost = 0u32;
    let mut tracker = CostTracker::new();

    for (ti, &blk) in LUMA_BLOCK_ORDER.iter().enumerate() {
        let quad = ti / 4;
        let levels = &res.ac[blk];

        // Scan up to the last nonzero, tracking zero runs across block
        // boundaries within the quadrant.
        let mut values = [0i16; 16];
        let mut sig_map = 0u16;
        let mut count = 0usize;
        let total = levels.iter().filter(|&&v| v != 0).count();
        let mut dc_only = false;
        for (bit, &pos) in ZIGZAG_4X4.iter().enumerate() {
            if count == total {
                break;
            }
            let v = levels[pos];
            if eliminate {
                tracker.step(v);
            }
            if v != 0 {
                sig_map |= 1 << bit;
                values[count] = v;
                count += 1;
                if count == total {
                    dc_only = bit == 0;
                }
            }
        }
        buf.put_record(count as u8, sig_map, &values[..count]);
        nnz[1 + blk] = count as u8;

        if count > 0 {
            cbp |= 1 << quad;
            if dc_only {
                ctrl.luma_dc[blk] = true;
            } else {
                ctrl.luma_ac[blk] = true;
            }
        }

        if ti % 4 == 3 {
            if eliminate && tracker.cost <= LUMA_QUAD_SKIP_THRESHOLD && cbp & (1 << quad) != 0 {
                cbp &= !(1 << quad);
                for &b in &LUMA_BLOCK_ORDER[quad * 4..quad * 4 + 4] {
                    ctrl.luma_ac[b] = false;
                    ctrl.luma_dc[b] = false;
                    nnz[1 + b] = 0;
                }
                tracker.cost = 0;
            }
            if cbp & (1 << quad) == 0 {
                buf.rewind(quad_mark);
            }
            mb_cost += tracker.cost;
            tracker.cost = 0;
            tracker.reset_run();
            quad_mark = buf.mark();
        }
    }

    if eliminate && mb_cost <= LUMA_MB_SKIP_THRESHOLD && cbp != 0 {
        buf.rewind(mb_mark);
        cbp = 0;
        ctrl.luma_ac = [false; 16];
        ctrl.luma_dc = [false; 16];
        for n in nnz[1..].iter_mut() {
            *n = 0;
        }
    }
    cbp
}

/// Pack both chroma planes: two DC records (U then V) followed by eight
/// AC records scanned from position 1. A plane whose AC cost stays
/// under the threshold is replaced by four empty records; its DC block
/// is kept. Returns the chroma CBP: 0 none, 1 DC only, 2 DC and AC.
pub(crate) fn pack_chroma(
    buf: &mut CoeffBuffer,
    res: &ChromaResidual,
    nnz: &mut [u8; 10],
    ctrl: &mut MbCtrl,
    eliminate: bool,
) -> u8 {
    let dc_mark = buf.mark();
    let mut cbp = 0u8;

    for plane in 0..2 {
        let mut dc_block = [0i16; 16];
        dc_block[..4].copy_from_slice(&res.dc[plane * 4..plane * 4 + 4]);
        let n = buf.put_block(&dc_block, &CHROMA_DC_SCAN, 0);
        nnz[plane * 5] = n;
        if n > 0 {
            cbp = 1;
            ctrl.chroma_dc[plane] = true;
        }
    }

    let ac_mark = buf.mark();
    for plane in 0..2 {
        let plane_mark = buf.mark();
        let mut tracker = CostTracker::new();
        let mut cbp_ac = cbp;

        for b4 in 0..4 {
            let levels = &res.ac[plane * 4 + b4];
            let mut values = [0i16; 16];
            let mut sig_map = 0u16;
            let mut count = 0usize;
            let total = ZIGZAG_4X4[1..]
                .iter()
                .filter(|&&pos| levels[pos] != 0)
                .count();
            for (bit, &pos) in ZIGZAG_4X4[1..].iter().enumerate() {
                if count == total {
                    break;
                }
                let v = levels[pos];
                if eliminate && tracker.cost < CHROMA_PLANE_SKIP_THRESHOLD {
                    tracker.step(v);
                }
                if v != 0 {
                    sig_map |= 1 << bit;
                    values[count] = v;
                    count += 1;
                }
            }
            buf.put_record(count as u8, sig_map, &values[..count]);
            nnz[plane * 5 + 1 + b4] = count as u8;
            if count > 0 {
                cbp_ac = 2;
                ctrl.chroma_ac[plane * 4 + b4] = true;
            }
        }

        if eliminate && tracker.cost < CHROMA_PLANE_SKIP_THRESHOLD {
            buf.rewind(plane_mark);
            for _ in 0..4 {
                buf.put_empty();
            }
            for b4 in 0..4 {
                ctrl.chroma_ac[plane * 4 + b4] = false;
                nnz[plane * 5 + 1 + b4] = 0;
            }
        } else {
            cbp = cbp_ac;
        }
    }

    if cbp == 0 {
        buf.rewind(dc_mark);
    } else if cbp == 1 {
        buf.rewind(ac_mark);
    }
    cbp
}
