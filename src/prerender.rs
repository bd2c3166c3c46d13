//! Background pre-computation of transition buffers.
//!
//! One worker thread keeps four fade ramps hot so the controller can play a
//! transition back frame-by-frame with zero per-frame computation: to a new
//! random pick, to the recorded next entry, to the previous entry, and a
//! wake ramp from black. Buffers cross back to the controller by ownership
//! transfer over a channel; a buffer the controller can see is complete by
//! construction. Cancellation is cooperative and checked between every
//! blended frame and at each phase boundary, so an interrupted run publishes
//! nothing further.
//!
//! At most one worker runs at a time: starting a new run cancels and joins
//! any previous worker before the replacement is spawned.

use std::path::PathBuf;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::frame::{DisplayFrame, blend, resize_to};
use crate::history::HistorySnapshot;
use crate::library::Library;
use crate::loader::ImageLoader;

/// Retry budget for loading a fresh pick before the cycle is reported failed.
const NEW_LOAD_RETRIES: u32 = 8;

/// The wake ramp steps 1.5x faster than a photo transition, so the screen
/// comes out of black quickly after power-on.
const WAKE_STEP_FACTOR: f32 = 1.5;

/// An ordered, finite sequence of pre-blended frames: a monotonic alpha ramp
/// from a source frame to a destination frame. The first and last frames are
/// the full-resolution endpoints; the ramp in between runs on the small
/// copies.
#[derive(Debug, Clone)]
pub struct TransitionBuffer {
    frames: Vec<image::RgbaImage>,
}

impl TransitionBuffer {
    pub fn frames(&self) -> &[image::RgbaImage] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// How history moves when a transition's destination becomes current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStep {
    /// Append the destination as a fresh pick (truncating any forward branch).
    AppendNew,
    /// Advance onto the recorded forward entry.
    Forward,
    /// Retreat onto the previous entry.
    Backward,
}

/// A completed transition: the ramp, the destination frame pair that becomes
/// current after playback, and the history movement to apply.
#[derive(Debug, Clone)]
pub struct ReadyTransition {
    pub buffer: TransitionBuffer,
    pub frame: DisplayFrame,
    pub path: PathBuf,
    pub step: HistoryStep,
}

/// Worker-to-controller messages. Each buffer arrives complete or not at all.
#[derive(Debug)]
pub enum PrerenderMsg {
    ToNew(ReadyTransition),
    ToNext(ReadyTransition),
    ToPrevious(ReadyTransition),
    Wake(TransitionBuffer),
    /// The run could not produce a new pick (e.g. empty library).
    Failed(Error),
    /// All phases finished.
    Done,
}

/// Everything a run needs, snapshotted at start time. The worker owns this
/// exclusively; the live history and current frame stay with the controller.
#[derive(Clone)]
pub struct PrerenderJob {
    pub loader: ImageLoader,
    pub library: Library,
    pub history: HistorySnapshot,
    pub current: Option<DisplayFrame>,
    pub transition_frames: usize,
    pub edit_mode: bool,
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
    rx: Receiver<PrerenderMsg>,
}

/// Handle owning the single worker slot.
#[derive(Default)]
pub struct PreRenderer {
    worker: Option<Worker>,
}

impl PreRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel and join any running worker, then spawn a fresh run. The join
    /// happens before the spawn, so two workers never overlap.
    pub fn start(&mut self, job: PrerenderJob) {
        self.halt_and_join();
        let cancel = CancellationToken::new();
        let (tx, rx) = unbounded();
        let worker_cancel = cancel.clone();
        match std::thread::Builder::new()
            .name("prerender".into())
            .spawn(move || run_worker(job, &worker_cancel, &tx))
        {
            Ok(handle) => {
                debug!("pre-render worker started");
                self.worker = Some(Worker { handle, cancel, rx });
            }
            Err(err) => warn!(%err, "unable to spawn pre-render worker"),
        }
    }

    /// Raise the stop signal without waiting.
    pub fn halt(&mut self) {
        if let Some(worker) = &self.worker {
            worker.cancel.cancel();
        }
    }

    /// Raise the stop signal and wait for the worker to fully exit. Shared
    /// loader state must not be repurposed before this returns.
    pub fn halt_and_join(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.cancel();
            if !worker.handle.is_finished() {
                debug!("waiting for pre-render worker to end");
            }
            if worker.handle.join().is_err() {
                warn!("pre-render worker panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Drain any buffers the worker has published since the last poll.
    pub fn poll(&mut self) -> Vec<PrerenderMsg> {
        let mut out = Vec::new();
        if let Some(worker) = &self.worker {
            while let Ok(msg) = worker.rx.try_recv() {
                out.push(msg);
            }
        }
        out
    }
}

impl Drop for PreRenderer {
    fn drop(&mut self) {
        self.halt_and_join();
    }
}

/// Controller-side store for the four buffers. Readiness is the slot being
/// occupied; there is no flag to race against.
#[derive(Default)]
pub struct TransitionSet {
    pub to_new: Option<ReadyTransition>,
    pub to_next: Option<ReadyTransition>,
    pub to_previous: Option<ReadyTransition>,
    pub wake: Option<TransitionBuffer>,
    complete: bool,
    failed: Option<Error>,
}

impl TransitionSet {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn absorb(&mut self, msg: PrerenderMsg) {
        match msg {
            PrerenderMsg::ToNew(t) => self.to_new = Some(t),
            PrerenderMsg::ToNext(t) => self.to_next = Some(t),
            PrerenderMsg::ToPrevious(t) => self.to_previous = Some(t),
            PrerenderMsg::Wake(b) => self.wake = Some(b),
            PrerenderMsg::Failed(err) => self.failed = Some(err),
            PrerenderMsg::Done => self.complete = true,
        }
    }

    /// Whether the run finished all phases.
    pub fn all_ready(&self) -> bool {
        self.complete
    }

    pub fn take_failure(&mut self) -> Option<Error> {
        self.failed.take()
    }
}

/// Build the alpha ramp between two frame pairs. Returns `None` when the
/// stop signal fires mid-build; partial ramps never escape.
pub fn blend_ramp(
    from: &DisplayFrame,
    to: &DisplayFrame,
    steps: usize,
    cancel: &CancellationToken,
) -> Option<TransitionBuffer> {
    let steps = steps.max(2);
    // Placeholder frames can be tiny; blend at whichever small size carries
    // more detail.
    let (bw, bh) = if pixel_count(&from.small) >= pixel_count(&to.small) {
        from.small.dimensions()
    } else {
        to.small.dimensions()
    };
    let from_small = resize_to(&from.small, bw, bh).ok()?;
    let to_small = resize_to(&to.small, bw, bh).ok()?;

    let mut frames = Vec::with_capacity(steps);
    frames.push(from.full.clone());
    for i in 1..steps - 1 {
        if cancel.is_cancelled() {
            return None;
        }
        let alpha = i as f32 / (steps - 1) as f32;
        frames.push(blend(&from_small, &to_small, alpha));
    }
    if cancel.is_cancelled() {
        return None;
    }
    frames.push(to.full.clone());
    Some(TransitionBuffer { frames })
}

fn pixel_count(img: &image::RgbaImage) -> u64 {
    img.width() as u64 * img.height() as u64
}

macro_rules! bail_if_cancelled {
    ($cancel:expr) => {
        if $cancel.is_cancelled() {
            info!("pre-render worker got halt signal");
            return;
        }
    };
}

fn run_worker(job: PrerenderJob, cancel: &CancellationToken, tx: &Sender<PrerenderMsg>) {
    eprintln!("DBG worker: enter");
    let steps = job.transition_frames.max(2);
    let wake_steps = ((steps as f32 / WAKE_STEP_FACTOR).round() as usize).max(2);

    let current = match job.current.clone() {
        Some(frame) => frame,
        None => job
            .loader
            .blank()
            .unwrap_or_else(|_| DisplayFrame::placeholder()),
    };

    // Phase 1: resolve and load a fresh pick; unreadable candidates burn a
    // retry, an empty library fails the cycle.
    let mut rng = rand::rng();
    let mut picked: Option<(PathBuf, DisplayFrame)> = None;
    for _ in 0..NEW_LOAD_RETRIES {
        bail_if_cancelled!(cancel);
        let path = match job
            .library
            .pick_new(&job.history.entries, job.edit_mode, &mut rng)
        {
            Ok(path) => path,
            Err(err) => {
                let _ = tx.send(PrerenderMsg::Failed(err));
                return;
            }
        };
        debug!(path = %path.display(), "pre-render loading new file");
        match job.loader.load_degraded(&path) {
            Ok(frame) => {
                picked = Some((path, frame));
                break;
            }
            Err(err) => warn!(path = %path.display(), %err, "pre-render failed loading new file"),
        }
    }
    let Some((new_path, new_frame)) = picked else {
        let _ = tx.send(PrerenderMsg::Failed(Error::NoImagesFound));
        return;
    };

    eprintln!("DBG worker: phase1 done (picked new)");
    // Phase 2: ramp current -> new.
    bail_if_cancelled!(cancel);
    let Some(to_new) = blend_ramp(&current, &new_frame, steps, cancel) else {
        return;
    };
    let _ = tx.send(PrerenderMsg::ToNew(ReadyTransition {
        buffer: to_new.clone(),
        frame: new_frame.clone(),
        path: new_path.clone(),
        step: HistoryStep::AppendNew,
    }));

    eprintln!("DBG worker: phase2 done (to_new sent)");
    // Phase 3: wake ramp, black -> current.
    bail_if_cancelled!(cancel);
    let black = job
        .loader
        .blank()
        .unwrap_or_else(|_| DisplayFrame::placeholder());
    let Some(wake) = blend_ramp(&black, &current, wake_steps, cancel) else {
        return;
    };
    let _ = tx.send(PrerenderMsg::Wake(wake));

    // Phases 4/5: forward ramp. At the tail, forward IS the new pick, so the
    // ramp is shared rather than recomputed.
    bail_if_cancelled!(cancel);
    if job.history.at_tail() {
        debug!("re-using new-pick ramp for the forward ramp");
        let _ = tx.send(PrerenderMsg::ToNext(ReadyTransition {
            buffer: to_new,
            frame: new_frame,
            path: new_path,
            step: HistoryStep::AppendNew,
        }));
    } else if let Some(next_path) = job.history.peek_next().map(PathBuf::from) {
        debug!(path = %next_path.display(), "pre-render loading next file");
        match job.loader.load_degraded(&next_path) {
            Ok(next_frame) => {
                let Some(buffer) = blend_ramp(&current, &next_frame, steps, cancel) else {
                    return;
                };
                let _ = tx.send(PrerenderMsg::ToNext(ReadyTransition {
                    buffer,
                    frame: next_frame,
                    path: next_path,
                    step: HistoryStep::Forward,
                }));
            }
            Err(err) => warn!(path = %next_path.display(), %err, "pre-render failed loading next file"),
        }
    }

    // Phase 6: backward ramp, when a previous entry exists.
    bail_if_cancelled!(cancel);
    if let Some(prev_path) = job.history.peek_previous().map(PathBuf::from) {
        debug!(path = %prev_path.display(), "pre-render loading prev file");
        match job.loader.load_degraded(&prev_path) {
            Ok(prev_frame) => {
                let Some(buffer) = blend_ramp(&current, &prev_frame, steps, cancel) else {
                    return;
                };
                let _ = tx.send(PrerenderMsg::ToPrevious(ReadyTransition {
                    buffer,
                    frame: prev_frame,
                    path: prev_path,
                    step: HistoryStep::Backward,
                }));
            }
            Err(err) => warn!(path = %prev_path.display(), %err, "pre-render failed loading prev file"),
        }
    }

    eprintln!("DBG worker: phases done, sending Done");
    bail_if_cancelled!(cancel);
    debug!("pre-render all done");
    let _ = tx.send(PrerenderMsg::Done);
    eprintln!("DBG worker: exit");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ScreenGeometry;

    fn frame(color: u8, geom: &ScreenGeometry) -> DisplayFrame {
        let full = image::RgbaImage::from_pixel(
            geom.width,
            geom.height,
            image::Rgba([color, color, color, 255]),
        );
        DisplayFrame::from_full(full, geom).unwrap()
    }

    #[test]
    fn ramp_has_exact_frame_count_and_endpoints() {
        let geom = ScreenGeometry::new(64, 36, 4);
        let a = frame(0, &geom);
        let b = frame(200, &geom);
        let cancel = CancellationToken::new();
        let ramp = blend_ramp(&a, &b, 15, &cancel).unwrap();
        assert_eq!(ramp.len(), 15);
        // Endpoints are the full-resolution frames.
        assert_eq!(ramp.frames()[0].dimensions(), (64, 36));
        assert_eq!(ramp.frames()[14].dimensions(), (64, 36));
        assert_eq!(ramp.frames()[14].get_pixel(0, 0)[0], 200);
        // Middle frames run on the small copies and ramp monotonically.
        assert_eq!(ramp.frames()[7].dimensions(), (16, 9));
        let mut last = 0;
        for f in &ramp.frames()[1..14] {
            let v = f.get_pixel(0, 0)[0];
            assert!(v >= last);
            last = v;
        }
    }

    #[test]
    fn cancelled_ramp_publishes_nothing() {
        let geom = ScreenGeometry::new(64, 36, 4);
        let a = frame(0, &geom);
        let b = frame(200, &geom);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(blend_ramp(&a, &b, 15, &cancel).is_none());
    }

    #[test]
    fn mismatched_small_sizes_are_normalized() {
        let geom = ScreenGeometry::new(64, 36, 4);
        let a = DisplayFrame::placeholder();
        let b = frame(100, &geom);
        let cancel = CancellationToken::new();
        let ramp = blend_ramp(&a, &b, 5, &cancel).unwrap();
        assert_eq!(ramp.len(), 5);
        assert_eq!(ramp.frames()[2].dimensions(), (16, 9));
    }

    #[test]
    fn transition_set_absorbs_and_clears() {
        let mut set = TransitionSet::default();
        assert!(!set.all_ready());
        set.absorb(PrerenderMsg::Done);
        assert!(set.all_ready());
        set.absorb(PrerenderMsg::Failed(Error::NoImagesFound));
        assert!(set.take_failure().is_some());
        assert!(set.take_failure().is_none());
        set.clear();
        assert!(!set.all_ready());
    }
}
