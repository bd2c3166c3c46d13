//! The slideshow controller: fade/navigation state machine, render loop,
//! input dispatch, and pre-renderer orchestration.
//!
//! The controller runs as a single cooperative tick loop. Whenever a
//! precomputed transition buffer is available it is played back
//! frame-by-frame at constant cost; the manual per-tick alpha blend only
//! covers the window where a buffer is not ready yet.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::corrections::ColorCorrect;
use crate::error::Error;
use crate::events::InputEvent;
use crate::frame::{DisplayFrame, ScreenGeometry, blank_tiny, fade_scale};
use crate::history::History;
use crate::library::{Library, PickPolicy};
use crate::loader::ImageLoader;
use crate::overlay::ClockOverlay;
use crate::power::DisplayPower;
use crate::prerender::{
    HistoryStep, PreRenderer, PrerenderJob, ReadyTransition, TransitionBuffer, TransitionSet,
};
use crate::surface::DisplaySurface;

/// Per-frame delay during transition playback.
const PLAYBACK_DELAY: Duration = Duration::from_millis(1);
/// Per-tick delay during manual fades.
const FADE_TICK_DELAY: Duration = Duration::from_millis(1);
/// Blank-frame wait used while confirming and holding monitor-off.
const MONITOR_OFF_DELAY: Duration = Duration::from_millis(100);
/// Idle wait while edit mode needs a fast clock redraw.
const EDIT_IDLE_DELAY: Duration = Duration::from_millis(10);
/// Input poll slice while waiting for the first transition at startup.
const STARTUP_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeState {
    Idle,
    FadeIn,
    FadeOutToNext,
    FadeOutToNew,
    FadeOutToPrevious,
    MonitorOff,
}

pub struct SlideshowController {
    cfg: Configuration,
    surface: Box<dyn DisplaySurface>,
    power: Box<dyn DisplayPower>,
    overlay: Box<dyn ClockOverlay>,
    loader: ImageLoader,
    library: Library,
    history: History,
    prerender: PreRenderer,
    transitions: TransitionSet,

    fade_state: FadeState,
    fade_alpha: u8,
    current: Option<DisplayFrame>,
    is_blank: bool,
    edit_mode: bool,
    running: bool,
    last_event: Option<InputEvent>,
    prev_frame_time: Instant,
    rng: StdRng,
}

impl SlideshowController {
    pub fn new(
        cfg: Configuration,
        surface: Box<dyn DisplaySurface>,
        power: Box<dyn DisplayPower>,
        overlay: Box<dyn ClockOverlay>,
        corrector: Arc<dyn ColorCorrect>,
    ) -> Self {
        let (width, height) = surface.size();
        let geom = ScreenGeometry::new(width, height, cfg.small_div);
        let loader = ImageLoader::new(geom, cfg.blur_border, corrector);
        let library = Library::new(
            &cfg.library_path,
            PickPolicy {
                retries: cfg.new_pick_retries,
                window_divisor: cfg.repeat_window_divisor,
            },
        );
        let history = History::new(cfg.history_limit);
        Self {
            surface,
            power,
            overlay,
            loader,
            library,
            history,
            prerender: PreRenderer::new(),
            transitions: TransitionSet::default(),
            fade_state: FadeState::Idle,
            fade_alpha: 0,
            current: None,
            is_blank: true,
            edit_mode: false,
            running: true,
            last_event: None,
            prev_frame_time: Instant::now(),
            rng: StdRng::from_os_rng(),
            cfg,
        }
    }

    pub fn fade_state(&self) -> FadeState {
        self.fade_state
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn current_path(&self) -> Option<PathBuf> {
        self.history.current().map(PathBuf::from)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Run until quit. The library must hold at least one image at startup;
    /// a library emptied later only blanks the screen until files return.
    pub fn run(&mut self) -> Result<(), Error> {
        if self.library.enumerate()?.is_empty() {
            return Err(Error::NoImagesFound);
        }
        self.power.force_on();
        let timer = if self.cfg.stay_on {
            Duration::ZERO
        } else {
            self.cfg.time_to_sleep
        };
        self.power.set_auto_off_timer(timer);

        info!("waiting for pre-renderer to generate first fade");
        self.restart_prerender();
        self.wait_for_first_transition()?;
        info!("init complete; main loop running");

        while self.running {
            self.tick()?;
        }
        self.prerender.halt_and_join();
        Ok(())
    }

    /// Pump input on a blank screen until the first `toNew` ramp lands, then
    /// play it. Pre-render failures back off and retry instead of exiting:
    /// the kiosk must outlive a temporarily empty library.
    fn wait_for_first_transition(&mut self) -> Result<(), Error> {
        let blank = blank_tiny();
        loop {
            if !self.running {
                return Ok(());
            }
            self.absorb_prerender();
            if let Some(err) = self.transitions.take_failure() {
                warn!(%err, "pre-render cycle failed at startup; backing off");
                let events = self.surface.present(&blank, self.cfg.idle_pause)?;
                self.dispatch_all(events)?;
                self.restart_prerender();
                continue;
            }
            if let Some(t) = self.transitions.to_new.take() {
                self.play_transition(t)?;
                return Ok(());
            }
            let events = self.surface.present(&blank, STARTUP_POLL)?;
            self.dispatch_all(events)?;
        }
    }

    /// One pass of the state machine.
    pub fn tick(&mut self) -> Result<(), Error> {
        self.absorb_prerender();
        match self.fade_state {
            FadeState::FadeIn => self.tick_fade_in(),
            FadeState::FadeOutToNext | FadeState::FadeOutToNew | FadeState::FadeOutToPrevious => {
                self.tick_fade_out()
            }
            FadeState::Idle => self.tick_idle(),
            FadeState::MonitorOff => self.tick_monitor_off(),
        }
    }

    fn absorb_prerender(&mut self) {
        for msg in self.prerender.poll() {
            self.transitions.absorb(msg);
        }
    }

    fn tick_fade_in(&mut self) -> Result<(), Error> {
        if self.current.is_none() || self.is_blank {
            debug!("getting next file for fade in");
            self.load_next(true);
        }
        let Some(current) = self.current.clone() else {
            let events = self.surface.present(&blank_tiny(), FADE_TICK_DELAY)?;
            return self.dispatch_all(events);
        };
        if self.is_blank {
            let events = self.surface.present(&blank_tiny(), self.cfg.idle_pause)?;
            return self.dispatch_all(events);
        }

        self.fade_alpha = self.fade_alpha.saturating_add(1);
        let faded = fade_scale(&current.small, self.fade_alpha, self.cfg.fade_limit);
        let events = self.surface.present(&faded, FADE_TICK_DELAY)?;
        self.dispatch_all(events)?;
        if self.fade_state == FadeState::FadeIn && self.fade_alpha >= self.cfg.fade_limit {
            debug!("finished fade in");
            self.finish_fade_in();
        }
        Ok(())
    }

    fn finish_fade_in(&mut self) {
        self.fade_state = FadeState::Idle;
        self.fade_alpha = self.cfg.fade_limit;
        self.prev_frame_time = Instant::now();
        self.restart_prerender();
    }

    fn tick_fade_out(&mut self) -> Result<(), Error> {
        if self.current.is_some() && !self.is_blank {
            self.fade_alpha = self.fade_alpha.saturating_sub(1);
            let current = self.current.clone();
            if let Some(current) = current {
                let faded = fade_scale(&current.small, self.fade_alpha, self.cfg.fade_limit);
                let events = self.surface.present(&faded, FADE_TICK_DELAY)?;
                self.dispatch_all(events)?;
            }
        } else {
            debug!("fading out without an image");
            self.fade_alpha = 0;
        }

        if matches!(
            self.fade_state,
            FadeState::FadeOutToNext | FadeState::FadeOutToNew | FadeState::FadeOutToPrevious
        ) && self.fade_alpha == 0
        {
            debug!("finished fade out");
            match self.fade_state {
                FadeState::FadeOutToPrevious => self.load_previous(),
                state => self.load_next(state == FadeState::FadeOutToNew),
            }
            self.fade_state = FadeState::FadeIn;
            self.overlay.prepare(self.history.current());
        }
        Ok(())
    }

    fn tick_idle(&mut self) -> Result<(), Error> {
        let due = self.prev_frame_time.elapsed() >= self.cfg.frame_interval;
        if due && self.transitions.all_ready() {
            if self.cfg.stay_on && !self.edit_mode {
                self.power.poke(false);
            }
            debug!("time for new photo");
            self.advance_new()?;
        } else if self.current.is_none() || self.is_blank {
            debug!("idle with no photo");
            if let Some(err) = self.transitions.take_failure() {
                warn!(%err, "pre-render cycle failed; retrying");
                self.restart_prerender();
            }
            self.advance_new()?;
            if self.is_blank {
                // Nothing loadable right now; hold a blank frame as backoff.
                let events = self.surface.present(&blank_tiny(), self.cfg.idle_pause)?;
                self.dispatch_all(events)?;
            }
        } else if let Some(current) = self.current.clone() {
            let mut framed = current.full.clone();
            self.overlay.draw(&mut framed);
            let wait = if self.edit_mode {
                EDIT_IDLE_DELAY
            } else {
                self.cfg.idle_pause
            };
            let events = self.surface.present(&framed, wait)?;
            self.dispatch_all(events)?;
        }

        // Off-state entry requires the probe to agree twice in a row.
        if self.fade_state == FadeState::Idle && !self.power.is_monitor_on() {
            info!("monitor reported off");
            let events = self.surface.present(&blank_tiny(), MONITOR_OFF_DELAY)?;
            self.dispatch_all(events)?;
            if !self.power.is_monitor_on() {
                info!("monitor off confirmed");
                self.fade_alpha = 0;
                self.fade_state = FadeState::MonitorOff;
            }
        }
        Ok(())
    }

    fn tick_monitor_off(&mut self) -> Result<(), Error> {
        let events = self.surface.present(&blank_tiny(), self.cfg.idle_pause)?;
        self.dispatch_all(events)?;
        if self.fade_state == FadeState::MonitorOff && self.power.is_monitor_on() {
            info!("monitor turned on");
            self.wake_up()?;
        }
        Ok(())
    }

    fn wake_up(&mut self) -> Result<(), Error> {
        self.power.poke(true);
        if self.fade_state != FadeState::MonitorOff {
            return Ok(());
        }
        if let Some(wake) = self.transitions.wake.take() {
            debug!("pre-rendered wake");
            self.play_wake(wake)
        } else {
            self.fade_alpha = 0;
            self.fade_state = FadeState::FadeIn;
            Ok(())
        }
    }

    /// Timer-driven or forced advance to a fresh pick.
    fn advance_new(&mut self) -> Result<(), Error> {
        if let Some(t) = self.transitions.to_new.take() {
            debug!("pre-rendered new photo fade");
            return self.play_transition(t);
        }
        self.prerender.halt();
        self.begin_manual_fade_out(FadeState::FadeOutToNew);
        Ok(())
    }

    /// `Right`: forward through history, or a new pick at the tail.
    pub fn next_photo(&mut self) -> Result<(), Error> {
        if let Some(t) = self.transitions.to_next.take() {
            debug!("pre-rendered next photo fade");
            return self.play_transition(t);
        }
        self.prerender.halt();
        self.begin_manual_fade_out(FadeState::FadeOutToNext);
        Ok(())
    }

    /// `Left`: back through history.
    pub fn prev_photo(&mut self) -> Result<(), Error> {
        if let Some(t) = self.transitions.to_previous.take() {
            debug!("pre-rendered prev photo fade");
            return self.play_transition(t);
        }
        self.prerender.halt();
        self.begin_manual_fade_out(FadeState::FadeOutToPrevious);
        Ok(())
    }

    /// Manual fallback when no buffer is ready. A fade-in in progress simply
    /// completes; re-pressing during the same fade-out skips to the end.
    fn begin_manual_fade_out(&mut self, target: FadeState) {
        if self.fade_state == FadeState::FadeIn {
            self.fade_alpha = self.cfg.fade_limit;
            return;
        }
        self.fade_alpha = if self.fade_state == target {
            0
        } else {
            self.cfg.fade_limit
        };
        self.fade_state = target;
    }

    /// Play a complete precomputed ramp, then commit its destination as the
    /// current image. Input other than `Up` cuts playback to the last frame.
    fn play_transition(&mut self, t: ReadyTransition) -> Result<(), Error> {
        self.transitions.clear();
        self.play_frames(t.buffer.frames())?;
        if !self.running {
            return Ok(());
        }

        match t.step {
            HistoryStep::AppendNew => {
                self.history.truncate_forward();
                self.history.push_new(t.path.clone());
            }
            HistoryStep::Forward => {
                if !self.history.roll_next() {
                    self.history.push_new(t.path.clone());
                }
            }
            HistoryStep::Backward => {
                self.history.roll_previous();
            }
        }
        self.current = Some(t.frame);
        self.is_blank = false;
        self.finish_transition();
        Ok(())
    }

    fn play_wake(&mut self, wake: TransitionBuffer) -> Result<(), Error> {
        self.transitions.clear();
        self.play_frames(wake.frames())?;
        if !self.running {
            return Ok(());
        }
        self.finish_transition();
        Ok(())
    }

    fn play_frames(&mut self, frames: &[image::RgbaImage]) -> Result<(), Error> {
        let mut interrupted = false;
        for frame in frames {
            if interrupted {
                break;
            }
            let events = self.surface.present(frame, PLAYBACK_DELAY)?;
            for ev in events {
                if ev == InputEvent::Quit {
                    self.quit();
                    return Ok(());
                }
                self.mark_activity(ev);
                if ev.interrupts_playback() {
                    debug!("animation interrupted");
                    interrupted = true;
                }
            }
        }
        if interrupted {
            if let Some(last) = frames.last() {
                let events = self.surface.present(last, PLAYBACK_DELAY)?;
                self.dispatch_all(events)?;
            }
        }
        Ok(())
    }

    fn finish_transition(&mut self) {
        self.fade_alpha = self.cfg.fade_limit;
        self.fade_state = FadeState::Idle;
        self.prev_frame_time = Instant::now();
        self.overlay.prepare(self.history.current());
        self.restart_prerender();
    }

    /// Manual forward step: retrace the recorded branch, or truncate it and
    /// take a fresh pick when forcing. Load failures purge the entry and the
    /// show continues; the worst case is a blank frame, never a crash.
    fn load_next(&mut self, force_new: bool) {
        if force_new {
            self.history.truncate_forward();
        } else {
            while !self.history.at_tail() {
                if !self.history.roll_next() {
                    break;
                }
                let Some(path) = self.history.current().map(PathBuf::from) else {
                    break;
                };
                debug!(path = %path.display(), "fwd file");
                match self.loader.load_degraded(&path) {
                    Ok(frame) => {
                        self.current = Some(frame);
                        self.is_blank = false;
                        return;
                    }
                    Err(err) => {
                        warn!(path = %path.display(), %err, "forward entry failed to load; purging");
                        self.history.remove_path(&path);
                    }
                }
            }
        }

        let shown = self.history.snapshot().entries;
        match self.library.pick_new(&shown, self.edit_mode, &mut self.rng) {
            Ok(path) => {
                debug!(path = %path.display(), "new file");
                match self.loader.load_degraded(&path) {
                    Ok(frame) => {
                        self.history.push_new(path);
                        self.current = Some(frame);
                        self.is_blank = false;
                    }
                    Err(err) => {
                        warn!(path = %path.display(), %err, "new pick failed to load");
                        self.blank_out();
                    }
                }
            }
            Err(err) => {
                warn!(%err, "no image available");
                self.blank_out();
            }
        }
    }

    /// Manual backward step. At the head the current image is simply kept.
    fn load_previous(&mut self) {
        loop {
            if !self.history.roll_previous() {
                break;
            }
            let Some(path) = self.history.current().map(PathBuf::from) else {
                break;
            };
            debug!(path = %path.display(), "rev file");
            match self.loader.load_degraded(&path) {
                Ok(frame) => {
                    self.current = Some(frame);
                    self.is_blank = false;
                    return;
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "previous entry failed to load; purging");
                    self.history.remove_path(&path);
                }
            }
        }
        if self.current.is_none() {
            self.load_next(false);
        }
    }

    fn blank_out(&mut self) {
        self.current = self.loader.blank().ok().or(self.current.take());
        self.is_blank = true;
    }

    fn quit(&mut self) {
        info!("quit requested");
        self.prerender.halt();
        self.running = false;
    }

    fn mark_activity(&mut self, ev: InputEvent) {
        if !self.cfg.stay_on && ev != InputEvent::ForceOff {
            self.power.poke(true);
        }
    }

    fn dispatch_all(&mut self, events: Vec<InputEvent>) -> Result<(), Error> {
        for ev in events {
            self.handle_event(ev)?;
            if !self.running {
                break;
            }
        }
        Ok(())
    }

    /// Full input dispatch, used outside transition playback.
    pub fn handle_event(&mut self, ev: InputEvent) -> Result<(), Error> {
        let last = self.last_event.replace(ev);
        if ev == InputEvent::Quit {
            self.quit();
            return Ok(());
        }
        self.mark_activity(ev);

        match ev {
            InputEvent::Left => {
                debug!("key-press left");
                if self.fade_state != FadeState::MonitorOff {
                    self.prev_photo()?;
                }
            }
            InputEvent::Right => {
                debug!("key-press right");
                if self.fade_state != FadeState::MonitorOff {
                    self.next_photo()?;
                }
            }
            InputEvent::Up => {
                // Reserved for motion wake while powered on.
            }
            InputEvent::Down => {
                debug!("key-press down");
                if last == Some(InputEvent::Down) {
                    info!("toggle IP overlay");
                    self.overlay.show_ip();
                }
            }
            InputEvent::ForceOff => {
                info!("forcing monitor off");
                self.power.force_off();
            }
            InputEvent::ToggleEditMode => {
                self.edit_mode = !self.edit_mode;
                info!(enabled = self.edit_mode, "edit mode");
            }
            InputEvent::CycleCorner if self.edit_mode => {
                self.prev_frame_time = Instant::now();
                self.overlay.cycle_corner();
            }
            InputEvent::CycleSize if self.edit_mode => {
                self.prev_frame_time = Instant::now();
                self.overlay.cycle_size();
            }
            InputEvent::CycleFont if self.edit_mode => {
                self.prev_frame_time = Instant::now();
                self.overlay.cycle_font();
            }
            InputEvent::CycleShadow if self.edit_mode => {
                self.prev_frame_time = Instant::now();
                self.overlay.cycle_shadow();
            }
            InputEvent::DoubleClick { x, y } if self.edit_mode => {
                debug!(x, y, "double-click reposition");
                self.overlay.reposition(x, y);
            }
            InputEvent::Quit => unreachable!("handled above"),
            _ => debug!(?ev, "ignored input"),
        }
        Ok(())
    }

    fn restart_prerender(&mut self) {
        self.transitions.clear();
        self.prerender.start(PrerenderJob {
            loader: self.loader.clone(),
            library: self.library.clone(),
            history: self.history.snapshot(),
            current: self.current.clone(),
            transition_frames: self.cfg.transition_frames,
            edit_mode: self.edit_mode,
        });
    }
}

impl Drop for SlideshowController {
    fn drop(&mut self) {
        self.prerender.halt_and_join();
    }
}
