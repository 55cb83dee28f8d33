//! Row-parallel frame pipeline.
//!
//! Each frame's macroblock rows move through two stages. The process
//! stage (prediction, transform, packing, reconstruction) runs on the
//! worker pool; within a frame it is serialized by the intra and
//! deblock dependencies on the row above, so cross-frame overlap comes
//! from double buffering: while one frame slot drains through the
//! entropy stage, the next frame already processes in the other slot.
//! The entropy stage is a single thread that consumes rows in strictly
//! increasing order, frame by frame.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{debug, trace, warn};

use crate::encoder::api::{EncodedFrame, MbSummary, RowTrace};
use crate::encoder::buffers::{DpbManager, Picture, RefFrame, SharedLease, WriteLease};
use crate::encoder::buffers::MvBank;
use crate::encoder::core::MbContext;
use crate::encoder::deblk::{self, DeblockInfo, MbDeblk};
use crate::encoder::kernel::TransformKernel;
use crate::encoder::mc;
use crate::encoder::pack::CoeffBuffer;
use crate::encoder::quantize::FrameQuant;
use crate::encoder::{FrameInput, MbType};

/// Number of frame slots. One drains through entropy while the other
/// processes.
pub(crate) const FRAME_SLOTS: usize = 2;

/// Row has not been handed to the worker pool yet.
pub(crate) const ROW_UNSCHEDULED: u8 = 0;
/// Row is in the process queue, waiting for a worker.
pub(crate) const ROW_QUEUED: u8 = 1;
/// A worker has claimed the row.
pub(crate) const ROW_PROCESSING: u8 = 2;
/// Row processing complete; the row below may start.
pub(crate) const ROW_DONE: u8 = 3;

/// Per-frame work state while the frame is in flight. Lives inside a
/// slot; taken out whole when the last row finalizes.
pub(crate) struct FrameState {
    pub input: FrameInput,
    pub quant: FrameQuant,
    pub recon: WriteLease<Picture>,
    pub mvs: WriteLease<MvBank>,
    pub reference: Option<RefFrame>,
    pub seq: u64,
    pub full_recon: bool,
    /// Deblock facts of the most recently processed row, read back as
    /// the top neighbors while the next row is coded.
    pub deblk_row: Vec<MbDeblk>,
}

/// One of the two frame slots.
pub(crate) struct FrameSlot {
    pub state: Mutex<Option<FrameState>>,
    pub row_status: Vec<AtomicU8>,
}

impl FrameSlot {
    fn new(rows: usize) -> Self {
        FrameSlot {
            state: Mutex::new(None),
            row_status: (0..rows).map(|_| AtomicU8::new(ROW_UNSCHEDULED)).collect(),
        }
    }

    /// Reset all row states before a new frame occupies the slot.
    pub fn reset_rows(&self) {
        for s in &self.row_status {
            s.store(ROW_UNSCHEDULED, Ordering::Release);
        }
    }
}

/// State shared between the submitting thread, workers, and the
/// entropy thread.
pub(crate) struct Shared {
    pub slots: Vec<FrameSlot>,
    pub dpb: Mutex<DpbManager>,
    pub kernel: Arc<dyn TransformKernel>,
    pub width: usize,
    pub height: usize,
    pub mb_width: usize,
    pub mb_height: usize,
    pub eliminate: bool,
}

impl Shared {
    pub fn new(
        width: usize,
        height: usize,
        kernel: Arc<dyn TransformKernel>,
        eliminate: bool,
        max_refs: usize,
    ) -> Self {
        let mb_height = height / 16;
        Shared {
            slots: (0..FRAME_SLOTS).map(|_| FrameSlot::new(mb_height)).collect(),
            dpb: Mutex::new(DpbManager::new(max_refs)),
            kernel,
            width,
            height,
            mb_width: width / 16,
            mb_height,
            eliminate,
        }
    }
}

/// A unit of work for the process pool.
pub(crate) enum Job {
    /// Process one macroblock row of the frame in `set`.
    Row { set: usize, row: usize },
    /// Exit the worker loop.
    Shutdown,
}

/// Messages for the entropy thread.
pub(crate) enum EntropyMsg {
    Start(FrameStart),
    Row(RowPayload),
}

/// Announces a submitted frame to the entropy thread before any of its
/// rows can arrive.
pub(crate) struct FrameStart {
    pub seq: u64,
    pub set: usize,
    pub rows: usize,
    pub qp: u8,
    pub frame_type: crate::encoder::FrameType,
    pub result_tx: SyncSender<EncodedFrame>,
}

/// One processed macroblock row on its way to the entropy stage.
pub(crate) struct RowPayload {
    pub seq: u64,
    pub row: usize,
    pub coeffs: CoeffBuffer,
    pub mbs: Vec<MbSummary>,
    /// Set on the frame's last row once the picture is frozen.
    pub recon: Option<SharedLease<Picture>>,
    pub process_start: Instant,
    pub process_end: Instant,
}

/// Worker pool loop. Claims queued rows with an atomic test-and-set,
/// processes them, and chains the next row of the same frame.
pub(crate) fn worker_loop(
    shared: Arc<Shared>,
    jobs: Arc<Mutex<Receiver<Job>>>,
    process_tx: SyncSender<Job>,
    entropy_tx: SyncSender<EntropyMsg>,
    process_done_tx: Sender<()>,
) {
    loop {
        let job = {
            let rx = match jobs.lock() {
                Ok(rx) => rx,
                Err(_) => return,
            };
            rx.recv()
        };
        let (set, row) = match job {
            Ok(Job::Row { set, row }) => (set, row),
            Ok(Job::Shutdown) | Err(_) => return,
        };

        let slot = &shared.slots[set];
        if slot.row_status[row]
            .compare_exchange(ROW_QUEUED, ROW_PROCESSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            continue;
        }
        let started = Instant::now();

        let mut payload = {
            let mut guard = match slot.state.lock() {
                Ok(g) => g,
                Err(_) => return,
            };
            let Some(state) = guard.as_mut() else {
                continue;
            };
            let mut payload = process_row(&shared, state, row, started);
            if row + 1 == shared.mb_height {
                if let Some(state) = guard.take() {
                    payload.recon = Some(finalize_frame(&shared, state));
                }
            }
            payload
        };
        payload.process_end = Instant::now();
        trace!(
            "row {row} of slot {set} processed in {:?}",
            payload.process_end - payload.process_start
        );

        slot.row_status[row].store(ROW_DONE, Ordering::Release);
        if row + 1 < shared.mb_height {
            slot.row_status[row + 1].store(ROW_QUEUED, Ordering::Release);
            let _ = process_tx.send(Job::Row { set, row: row + 1 });
        } else {
            let _ = process_done_tx.send(());
        }
        let _ = entropy_tx.send(EntropyMsg::Row(payload));
    }
}

/// Code every macroblock of one row.
fn process_row(
    shared: &Shared,
    state: &mut FrameState,
    row: usize,
    started: Instant,
) -> RowPayload {
    let mut coeffs = CoeffBuffer::with_capacity(shared.mb_width * 96);
    let mut mbs = Vec::with_capacity(shared.mb_width);
    let seq = state.seq;

    let FrameState {
        input,
        quant,
        recon,
        mvs,
        reference,
        full_recon,
        deblk_row,
        ..
    } = state;
    let qp = input.qp;
    let mut ctx = MbContext {
        kernel: shared.kernel.as_ref(),
        quant,
        input,
        width: shared.width,
        height: shared.height,
        recon,
        reference: reference.as_ref().map(|r| &*r.picture),
        eliminate: shared.eliminate,
        full_recon: *full_recon,
    };
    let mut left: Option<MbDeblk> = None;
    for mb_x in 0..shared.mb_width {
        let idx = row * shared.mb_width + mb_x;
        let decision = ctx.input.decisions[idx];
        let result = ctx.code_mb(mb_x, row, decision, &mut coeffs);
        mvs.mvs[idx] = result.mv;

        let mut csbp = 0u16;
        for (b, &n) in result.nnz_luma[1..].iter().enumerate() {
            if n > 0 {
                csbp |= 1 << b;
            }
        }
        let cur = MbDeblk {
            intra: matches!(result.mb_type, MbType::I16x16 | MbType::I4x4),
            csbp,
            mv: result.mv,
        };
        let top = (row > 0).then(|| deblk_row[mb_x]);
        let (bs_vert, bs_horz) = deblk::compute_mb_bs(&cur, left.as_ref(), top.as_ref());
        deblk_row[mb_x] = cur;
        left = Some(cur);

        mbs.push(MbSummary {
            mb_type: result.mb_type,
            cbp_luma: result.cbp_luma,
            cbp_chroma: result.cbp_chroma,
            mv: result.mv,
            nnz_luma: result.nnz_luma,
            nnz_chroma: result.nnz_chroma,
            deblk: DeblockInfo { qp, bs_vert, bs_horz },
        });
    }

    RowPayload {
        seq,
        row,
        coeffs,
        mbs,
        recon: None,
        process_start: started,
        process_end: started,
    }
}

/// Freeze the frame's picture and motion vectors and, for reference
/// frames, interpolate the half-pel planes and publish to the DPB.
fn finalize_frame(shared: &Shared, state: FrameState) -> SharedLease<Picture> {
    let mut recon = state.recon;
    let is_reference = state.input.is_reference;
    if is_reference {
        mc::compute_halfpel_planes(&mut recon);
    }
    let picture = recon.freeze();
    let mvs = state.mvs.freeze();
    if is_reference {
        match shared.dpb.lock() {
            Ok(mut dpb) => dpb.push(RefFrame {
                picture: picture.clone(),
                mvs,
            }),
            Err(_) => warn!("reference list lock poisoned; frame {} not retained", state.seq),
        }
    }
    debug!("frame {} processing complete", state.seq);
    picture
}

struct FrameAccum {
    set: usize,
    rows: usize,
    qp: u8,
    frame_type: crate::encoder::FrameType,
    result_tx: SyncSender<EncodedFrame>,
    coeff_data: Vec<u8>,
    mbs: Vec<MbSummary>,
    trace: Vec<RowTrace>,
    recon: Option<SharedLease<Picture>>,
}

/// Entropy stage loop. Rows arrive in arbitrary interleaving from the
/// worker pool and are held back until they can be consumed in frame
/// order, each frame's rows strictly top to bottom.
pub(crate) fn entropy_loop(rx: Receiver<EntropyMsg>, free_slots_tx: Sender<usize>) {
    let mut frames: BTreeMap<u64, FrameAccum> = BTreeMap::new();
    let mut pending: BTreeMap<(u64, usize), RowPayload> = BTreeMap::new();
    let mut next_seq = 0u64;
    let mut next_row = 0usize;

    while let Ok(msg) = rx.recv() {
        match msg {
            EntropyMsg::Start(start) => {
                frames.insert(
                    start.seq,
                    FrameAccum {
                        set: start.set,
                        rows: start.rows,
                        qp: start.qp,
                        frame_type: start.frame_type,
                        result_tx: start.result_tx,
                        coeff_data: Vec::new(),
                        mbs: Vec::new(),
                        trace: Vec::new(),
                        recon: None,
                    },
                );
            }
            EntropyMsg::Row(payload) => {
                pending.insert((payload.seq, payload.row), payload);
            }
        }

        loop {
            let Some(accum) = frames.get_mut(&next_seq) else {
                break;
            };
            let Some(mut payload) = pending.remove(&(next_seq, next_row)) else {
                break;
            };
            let entropy_start = Instant::now();
            accum.coeff_data.extend_from_slice(payload.coeffs.bytes());
            accum.mbs.append(&mut payload.mbs);
            if let Some(recon) = payload.recon.take() {
                accum.recon = Some(recon);
            }
            accum.trace.push(RowTrace {
                row: next_row,
                process_start: payload.process_start,
                process_end: payload.process_end,
                entropy_start,
                entropy_end: Instant::now(),
            });

            let frame_done = next_row + 1 == accum.rows;
            next_row += 1;
            if frame_done {
                if let Some(done) = frames.remove(&next_seq) {
                    let set = done.set;
                    deliver_frame(next_seq, done);
                    let _ = free_slots_tx.send(set);
                }
                next_seq += 1;
                next_row = 0;
            }
        }
    }
}

fn deliver_frame(seq: u64, accum: FrameAccum) {
    let Some(recon) = accum.recon else {
        // The frame's last row never finalized; dropping result_tx
        // surfaces the failure to the waiter.
        warn!("frame {seq} finished without a frozen picture");
        return;
    };
    debug!(
        "frame {seq} entropy complete, {} coefficient bytes",
        accum.coeff_data.len()
    );
    let _ = accum.result_tx.send(EncodedFrame {
        coeff_data: accum.coeff_data,
        mbs: accum.mbs,
        recon,
        qp: accum.qp,
        frame_type: accum.frame_type,
        row_trace: accum.trace,
    });
}
