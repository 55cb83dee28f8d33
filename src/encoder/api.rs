//! Public encoder surface: frame submission, pipeline ownership, and
//! the encoded-frame handoff to the entropy coder.

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::debug;
use thiserror::Error;

use crate::encoder::buffers::{BufferPool, MvBank, Picture, SharedLease};
use crate::encoder::config::EncoderConfig;
use crate::encoder::deblk::{DeblockInfo, MbDeblk};
use crate::encoder::quantize::FrameQuant;
use crate::encoder::sched::{
    self, EntropyMsg, FrameStart, FrameState, Job, Shared, FRAME_SLOTS, ROW_QUEUED,
};
use crate::encoder::{FrameInput, FrameType, MbDecision, MbType, Mv};

/// Errors surfaced by encoder setup and frame submission.
///
/// Coding itself is total: once a frame passes submission validation
/// no per-macroblock error can occur.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EncodeError {
    /// Frame dimensions are not nonzero multiples of 16.
    #[error("dimensions {width}x{height} must be nonzero multiples of 16")]
    InvalidDimensions {
        /// Offending width.
        width: usize,
        /// Offending height.
        height: usize,
    },
    /// Quantization parameter outside 0..=51.
    #[error("qp {0} out of range 0..=51")]
    InvalidQp(u8),
    /// An input plane does not match the configured dimensions.
    #[error("plane holds {got} samples, expected {expected}")]
    BadPlaneSize {
        /// Required sample count.
        expected: usize,
        /// Sample count actually supplied.
        got: usize,
    },
    /// The decision list does not cover every macroblock exactly once.
    #[error("got {got} macroblock decisions, expected {expected}")]
    BadDecisionCount {
        /// Required decision count.
        expected: usize,
        /// Decision count actually supplied.
        got: usize,
    },
    /// An inter decision appeared in an intra frame.
    #[error("macroblock {mb} uses inter prediction in an intra frame")]
    StrayInterDecision {
        /// Raster index of the offending macroblock.
        mb: usize,
    },
    /// An inter frame was submitted before any reference frame exists.
    #[error("inter decision without a reference frame")]
    MissingReference,
    /// All pooled buffers are leased out; the caller holds too many
    /// encoded frames alive.
    #[error("buffer pool exhausted")]
    PoolExhausted,
    /// A pipeline thread panicked or the pipeline already shut down.
    #[error("encoder pipeline thread failed")]
    WorkerPanicked,
    /// The operating system refused to spawn a pipeline thread.
    #[error("could not spawn pipeline thread")]
    ThreadSpawn(#[source] std::io::Error),
}

/// Per-macroblock side data for the entropy coder, in raster order.
#[derive(Debug, Clone)]
pub struct MbSummary {
    /// Final macroblock classification.
    pub mb_type: MbType,
    /// Luma coded-block pattern, one bit per 8x8 quadrant.
    pub cbp_luma: u8,
    /// Chroma coded-block pattern: 0 none, 1 DC only, 2 DC and AC.
    pub cbp_chroma: u8,
    /// Motion vector actually coded (zero for intra and for skips
    /// without motion).
    pub mv: Mv,
    /// Luma nonzero counts: the DC block in slot 0 (zero outside
    /// intra 16x16), then the sixteen 4x4 blocks in slots 1..=16.
    pub nnz_luma: [u8; 17],
    /// Chroma nonzero counts, five per plane: the plane's DC block
    /// first, then its four 4x4 blocks.
    pub nnz_chroma: [u8; 10],
    /// Edge strengths and QP for the loop filter.
    pub deblk: DeblockInfo,
}

/// Stage timestamps for one macroblock row, mostly useful for
/// inspecting pipeline behavior.
#[derive(Debug, Clone, Copy)]
pub struct RowTrace {
    /// Macroblock row index.
    pub row: usize,
    /// When a worker claimed the row.
    pub process_start: Instant,
    /// When row processing finished.
    pub process_end: Instant,
    /// When the entropy stage picked the row up.
    pub entropy_start: Instant,
    /// When the entropy stage finished the row.
    pub entropy_end: Instant,
}

/// One fully coded frame, ready for the entropy coder.
pub struct EncodedFrame {
    /// Packed coefficient records for every macroblock in raster
    /// order: luma records, then chroma DC, then chroma AC.
    pub coeff_data: Vec<u8>,
    /// Per-macroblock side data in raster order.
    pub mbs: Vec<MbSummary>,
    /// The reconstructed picture. Holding it keeps the underlying
    /// buffer out of the pool.
    pub recon: SharedLease<Picture>,
    /// Quantization parameter the frame was coded with.
    pub qp: u8,
    /// Coding type of the frame.
    pub frame_type: FrameType,
    /// Per-row stage timestamps.
    pub row_trace: Vec<RowTrace>,
}

impl fmt::Debug for EncodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedFrame")
            .field("coeff_bytes", &self.coeff_data.len())
            .field("mbs", &self.mbs.len())
            .field("qp", &self.qp)
            .field("frame_type", &self.frame_type)
            .finish_non_exhaustive()
    }
}

/// A submitted frame still moving through the pipeline.
pub struct PendingFrame {
    rx: Receiver<EncodedFrame>,
}

impl PendingFrame {
    /// Block until the frame has fully drained through both stages.
    pub fn wait(self) -> Result<EncodedFrame, EncodeError> {
        self.rx.recv().map_err(|_| EncodeError::WorkerPanicked)
    }
}

/// The encoder pipeline: a worker pool for row processing and one
/// entropy-order thread, wired through bounded queues.
///
/// Frames overlap pairwise: while frame N drains through the entropy
/// stage, frame N + 1 already processes. Dropping the encoder shuts
/// the pipeline down; frames still in flight are abandoned and their
/// [`PendingFrame::wait`] calls return an error.
pub struct Encoder {
    config: EncoderConfig,
    shared: Arc<Shared>,
    pic_pool: BufferPool<Picture>,
    mv_pool: BufferPool<MvBank>,
    process_tx: SyncSender<Job>,
    entropy_tx: Option<SyncSender<EntropyMsg>>,
    free_slots_tx: Sender<usize>,
    free_slots_rx: Receiver<usize>,
    process_done_rx: Receiver<()>,
    workers: Vec<JoinHandle<()>>,
    entropy: Option<JoinHandle<()>>,
    seq: u64,
    process_in_flight: bool,
}

impl Encoder {
    /// Validate the configuration, pre-allocate the buffer pools, and
    /// spawn the pipeline threads.
    pub fn new(config: EncoderConfig) -> Result<Self, EncodeError> {
        config.validate()?;
        let shared = Arc::new(Shared::new(
            config.width,
            config.height,
            Arc::clone(&config.kernel),
            config.eliminate_residuals,
            config.max_refs,
        ));

        // Enough pictures for the references, both in-flight frames,
        // and one frame held by the caller.
        let buffers = config.max_refs + FRAME_SLOTS + 1;
        let pic_pool =
            BufferPool::new((0..buffers).map(|_| Picture::new(config.width, config.height)));
        let mv_pool = BufferPool::new((0..buffers).map(|_| MvBank::new(config.mb_count())));

        let queue_cap = (config.mb_height() * FRAME_SLOTS).next_power_of_two();
        let (process_tx, process_rx) = mpsc::sync_channel::<Job>(queue_cap);
        let (entropy_tx, entropy_rx) = mpsc::sync_channel::<EntropyMsg>(queue_cap);
        let (free_slots_tx, free_slots_rx) = mpsc::channel::<usize>();
        let (process_done_tx, process_done_rx) = mpsc::channel::<()>();
        for set in 0..FRAME_SLOTS {
            let _ = free_slots_tx.send(set);
        }

        let jobs = Arc::new(Mutex::new(process_rx));
        let mut workers = Vec::with_capacity(config.threads);
        for i in 0..config.threads {
            let shared = Arc::clone(&shared);
            let jobs = Arc::clone(&jobs);
            let process_tx = process_tx.clone();
            let entropy_tx = entropy_tx.clone();
            let process_done_tx = process_done_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("zenh264-worker-{i}"))
                .spawn(move || {
                    sched::worker_loop(shared, jobs, process_tx, entropy_tx, process_done_tx)
                })
                .map_err(EncodeError::ThreadSpawn)?;
            workers.push(handle);
        }
        let entropy_free_tx = free_slots_tx.clone();
        let entropy = thread::Builder::new()
            .name("zenh264-entropy".into())
            .spawn(move || sched::entropy_loop(entropy_rx, entropy_free_tx))
            .map_err(EncodeError::ThreadSpawn)?;

        debug!(
            "pipeline up: {}x{}, {} workers, {} pooled pictures",
            config.width, config.height, config.threads, buffers
        );
        Ok(Encoder {
            config,
            shared,
            pic_pool,
            mv_pool,
            process_tx,
            entropy_tx: Some(entropy_tx),
            free_slots_tx,
            free_slots_rx,
            process_done_rx,
            workers,
            entropy: Some(entropy),
            seq: 0,
            process_in_flight: false,
        })
    }

    /// Submit a frame and return a handle to wait on. Blocks until a
    /// frame slot is free, which bounds the pipeline to two frames in
    /// flight.
    pub fn submit(&mut self, input: FrameInput) -> Result<PendingFrame, EncodeError> {
        self.validate_input(&input)?;

        // The previous frame's process stage must finish before this
        // frame can predict from its reconstruction.
        if self.process_in_flight {
            self.process_done_rx
                .recv()
                .map_err(|_| EncodeError::WorkerPanicked)?;
            self.process_in_flight = false;
        }

        let reference = {
            let dpb = self.shared.dpb.lock().map_err(|_| EncodeError::WorkerPanicked)?;
            match input.frame_type {
                FrameType::Intra => None,
                FrameType::Inter => dpb.latest().cloned(),
            }
        };
        let wants_reference = input
            .decisions
            .iter()
            .any(|d| matches!(d, MbDecision::Inter { .. }));
        if wants_reference && reference.is_none() {
            return Err(EncodeError::MissingReference);
        }

        let set = self
            .free_slots_rx
            .recv()
            .map_err(|_| EncodeError::WorkerPanicked)?;
        let state = match self.build_state(input, reference) {
            Ok(state) => state,
            Err(e) => {
                let _ = self.free_slots_tx.send(set);
                return Err(e);
            }
        };

        if state.input.frame_type == FrameType::Intra {
            if let Ok(mut dpb) = self.shared.dpb.lock() {
                dpb.clear();
            }
        }

        let (result_tx, result_rx) = mpsc::sync_channel::<EncodedFrame>(1);
        let start = FrameStart {
            seq: state.seq,
            set,
            rows: self.config.mb_height(),
            qp: state.input.qp,
            frame_type: state.input.frame_type,
            result_tx,
        };

        let slot = &self.shared.slots[set];
        slot.reset_rows();
        {
            let mut guard = slot
                .state
                .lock()
                .map_err(|_| EncodeError::WorkerPanicked)?;
            *guard = Some(state);
        }
        let entropy_tx = self
            .entropy_tx
            .as_ref()
            .ok_or(EncodeError::WorkerPanicked)?;
        entropy_tx
            .send(EntropyMsg::Start(start))
            .map_err(|_| EncodeError::WorkerPanicked)?;
        slot.row_status[0].store(ROW_QUEUED, std::sync::atomic::Ordering::Release);
        self.process_tx
            .send(Job::Row { set, row: 0 })
            .map_err(|_| EncodeError::WorkerPanicked)?;

        debug!("frame {} submitted to slot {set}", self.seq);
        self.seq += 1;
        self.process_in_flight = true;
        Ok(PendingFrame { rx: result_rx })
    }

    /// Submit a frame and wait for it: the synchronous path.
    pub fn encode(&mut self, input: FrameInput) -> Result<EncodedFrame, EncodeError> {
        self.submit(input)?.wait()
    }

    /// Buffers currently available in the picture pool.
    pub fn pictures_available(&self) -> usize {
        self.pic_pool.available()
    }

    fn build_state(
        &mut self,
        input: FrameInput,
        reference: Option<crate::encoder::buffers::RefFrame>,
    ) -> Result<FrameState, EncodeError> {
        let recon = self.pic_pool.acquire()?;
        let mut mvs = self.mv_pool.acquire()?;
        mvs.reset();
        let full_recon = input.is_reference;
        Ok(FrameState {
            quant: FrameQuant::new(input.qp),
            input,
            recon,
            mvs,
            reference,
            seq: self.seq,
            full_recon,
            deblk_row: vec![MbDeblk::default(); self.config.width / 16],
        })
    }

    fn validate_input(&self, input: &FrameInput) -> Result<(), EncodeError> {
        if input.qp > 51 {
            return Err(EncodeError::InvalidQp(input.qp));
        }
        let luma = self.config.width * self.config.height;
        if input.y.len() != luma {
            return Err(EncodeError::BadPlaneSize {
                expected: luma,
                got: input.y.len(),
            });
        }
        for plane in [&input.u, &input.v] {
            if plane.len() != luma / 4 {
                return Err(EncodeError::BadPlaneSize {
                    expected: luma / 4,
                    got: plane.len(),
                });
            }
        }
        let mbs = self.config.mb_count();
        if input.decisions.len() != mbs {
            return Err(EncodeError::BadDecisionCount {
                expected: mbs,
                got: input.decisions.len(),
            });
        }
        if input.frame_type == FrameType::Intra {
            for (mb, d) in input.decisions.iter().enumerate() {
                if matches!(d, MbDecision::Inter { .. }) {
                    return Err(EncodeError::StrayInterDecision { mb });
                }
            }
        }
        Ok(())
    }
}

impl Drop for Encoder {
    fn drop(&mut self) {
        for _ in 0..self.workers.len() {
            let _ = self.process_tx.send(Job::Shutdown);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        // Workers held the remaining entropy senders; dropping ours
        // disconnects the entropy thread.
        self.entropy_tx = None;
        if let Some(entropy) = self.entropy.take() {
            let _ = entropy.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{Intra16Mode, IntraChromaMode};

    fn intra_decisions(count: usize) -> Vec<MbDecision> {
        vec![
            MbDecision::Intra16 {
                mode: Intra16Mode::Dc,
                chroma_mode: IntraChromaMode::Dc,
            };
            count
        ]
    }

    fn flat_frame(config: &EncoderConfig, value: u8, qp: u8) -> FrameInput {
        FrameInput {
            y: vec![value; config.width * config.height],
            u: vec![value; config.width * config.height / 4],
            v: vec![value; config.width * config.height / 4],
            frame_type: FrameType::Intra,
            qp,
            is_reference: true,
            decisions: intra_decisions(config.mb_count()),
        }
    }

    #[test]
    fn rejects_bad_dimensions() {
        assert!(matches!(
            Encoder::new(EncoderConfig::new(100, 64)),
            Err(EncodeError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn rejects_malformed_input() {
        let config = EncoderConfig::new(64, 48);
        let mut enc = Encoder::new(config.clone()).unwrap();

        let mut frame = flat_frame(&config, 128, 28);
        frame.qp = 52;
        assert!(matches!(enc.encode(frame), Err(EncodeError::InvalidQp(52))));

        let mut frame = flat_frame(&config, 128, 28);
        frame.y.pop();
        assert!(matches!(
            enc.encode(frame),
            Err(EncodeError::BadPlaneSize { .. })
        ));

        let mut frame = flat_frame(&config, 128, 28);
        frame.decisions.pop();
        assert!(matches!(
            enc.encode(frame),
            Err(EncodeError::BadDecisionCount { .. })
        ));

        let mut frame = flat_frame(&config, 128, 28);
        frame.decisions[3] = MbDecision::Inter {
            mv: Mv::default(),
            skip: true,
        };
        assert!(matches!(
            enc.encode(frame),
            Err(EncodeError::StrayInterDecision { mb: 3 })
        ));
    }

    #[test]
    fn inter_frame_needs_a_reference() {
        let config = EncoderConfig::new(32, 32);
        let mut enc = Encoder::new(config.clone()).unwrap();
        let mut frame = flat_frame(&config, 128, 28);
        frame.frame_type = FrameType::Inter;
        frame.decisions = vec![
            MbDecision::Inter {
                mv: Mv::default(),
                skip: true,
            };
            config.mb_count()
        ];
        assert!(matches!(
            enc.encode(frame),
            Err(EncodeError::MissingReference)
        ));
    }

    #[test]
    fn deblock_side_data_covers_every_macroblock() {
        let config = EncoderConfig::new(64, 48);
        let mut enc = Encoder::new(config.clone()).unwrap();
        let encoded = enc.encode(flat_frame(&config, 128, 26)).unwrap();

        assert!(encoded.mbs.iter().all(|m| m.deblk.qp == 26));
        // Top-left corner: picture boundaries are not filtered.
        let corner = &encoded.mbs[0].deblk;
        assert_eq!(corner.bs_vert[0], 0);
        assert_eq!(corner.bs_horz[0], 0);
        assert_eq!(corner.bs_vert[1], 0x0303_0303);
        // An interior intra macroblock filters its boundaries at full
        // strength and its internal edges one step below.
        let inner = &encoded.mbs[config.mb_width() + 1].deblk;
        assert_eq!(inner.bs_vert[0], 0x0404_0404);
        assert_eq!(inner.bs_horz[0], 0x0404_0404);
        assert_eq!(inner.bs_vert[3], 0x0303_0303);
        assert_eq!(inner.bs_horz[3], 0x0303_0303);
    }

    #[test]
    fn flat_intra_frame_round_trips() {
        let config = EncoderConfig::new(64, 48);
        let mut enc = Encoder::new(config.clone()).unwrap();
        let encoded = enc.encode(flat_frame(&config, 128, 28)).unwrap();
        assert_eq!(encoded.mbs.len(), config.mb_count());
        assert!(encoded.mbs.iter().all(|m| m.cbp_luma == 0));
        assert!(encoded.recon.y.iter().all(|&p| p == 128));
        assert_eq!(encoded.row_trace.len(), config.mb_height());
    }
}
