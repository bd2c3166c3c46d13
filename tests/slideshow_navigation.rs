use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{Rgba, RgbaImage};
use photo_kiosk::config::Configuration;
use photo_kiosk::controller::{FadeState, SlideshowController};
use photo_kiosk::corrections::IdentityCorrections;
use photo_kiosk::error::Error;
use photo_kiosk::events::InputEvent;
use photo_kiosk::overlay::NoopOverlay;
use photo_kiosk::power::DisplayPower;
use photo_kiosk::surface::DisplaySurface;

/// Surface that records presented frame sizes and never blocks.
struct FakeSurface {
    size: (u32, u32),
    presented: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl DisplaySurface for FakeSurface {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn present(&mut self, frame: &RgbaImage, _wait: Duration) -> Result<Vec<InputEvent>, Error> {
        self.presented.lock().unwrap().push(frame.dimensions());
        Ok(Vec::new())
    }
}

/// Power driver with a scriptable probe.
struct ScriptedPower {
    on: Arc<AtomicBool>,
}

impl DisplayPower for ScriptedPower {
    fn force_on(&mut self) {
        self.on.store(true, Ordering::SeqCst);
    }
    fn force_off(&mut self) {
        self.on.store(false, Ordering::SeqCst);
    }
    fn set_auto_off_timer(&mut self, _timeout: Duration) {}
    fn is_monitor_on(&mut self) -> bool {
        self.on.load(Ordering::SeqCst)
    }
    fn poke(&mut self, force: bool) {
        if force {
            self.on.store(true, Ordering::SeqCst);
        }
    }
}

fn write_png(dir: &Path, name: &str, color: [u8; 4]) -> PathBuf {
    let path = dir.join(name);
    RgbaImage::from_pixel(24, 16, Rgba(color)).save(&path).unwrap();
    path
}

fn test_config(library: &Path) -> Configuration {
    let mut cfg = Configuration::with_library(library.to_path_buf());
    // Keep the timer out of the way and the ticks fast.
    cfg.frame_interval = Duration::from_secs(3600);
    cfg.idle_pause = Duration::from_millis(1);
    cfg.transition_frames = 5;
    cfg.fade_limit = 3;
    cfg.blur_border = 0.0;
    cfg
}

fn controller(
    library: &Path,
    power_on: Arc<AtomicBool>,
) -> (SlideshowController, Arc<Mutex<Vec<(u32, u32)>>>) {
    let presented = Arc::new(Mutex::new(Vec::new()));
    let surface = FakeSurface {
        size: (64, 36),
        presented: presented.clone(),
    };
    let ctl = SlideshowController::new(
        test_config(library),
        Box::new(surface),
        Box::new(ScriptedPower { on: power_on }),
        Box::new(NoopOverlay),
        Arc::new(IdentityCorrections),
    );
    (ctl, presented)
}

/// Tick until the controller settles in `Idle` with an image on screen.
fn settle(ctl: &mut SlideshowController) {
    for _ in 0..500 {
        ctl.tick().unwrap();
        if ctl.fade_state() == FadeState::Idle && ctl.current_path().is_some() {
            return;
        }
    }
    panic!("controller did not settle; state {:?}", ctl.fade_state());
}

#[test]
fn next_and_previous_follow_browser_history_semantics() {
    let tmp = tempfile::tempdir().unwrap();
    let all = [
        write_png(tmp.path(), "a.png", [200, 0, 0, 255]),
        write_png(tmp.path(), "b.png", [0, 200, 0, 255]),
        write_png(tmp.path(), "c.png", [0, 0, 200, 255]),
    ];

    let (mut ctl, _presented) = controller(tmp.path(), Arc::new(AtomicBool::new(true)));
    settle(&mut ctl);

    let first = ctl.current_path().expect("an image is current");
    assert!(all.contains(&first));
    assert_eq!(ctl.history().len(), 1);

    // Three forward steps; each lands on an image distinct from the one it
    // left (window >= 1 with a 3-image library).
    let mut shown = vec![first];
    for _ in 0..3 {
        let before = ctl.current_path().unwrap();
        ctl.next_photo().unwrap();
        settle(&mut ctl);
        let now = ctl.current_path().unwrap();
        assert_ne!(now, before, "next must not repeat the current image");
        shown.push(now);
    }

    // Walking back retraces the recorded entries in exact reverse order.
    let snap = ctl.history().snapshot();
    let cursor = snap.cursor.unwrap();
    assert_eq!(snap.entries[cursor], ctl.current_path().unwrap());
    for expect in snap.entries[..cursor].iter().rev() {
        ctl.prev_photo().unwrap();
        settle(&mut ctl);
        assert_eq!(ctl.current_path().unwrap(), *expect);
    }
}

#[test]
fn forward_after_retreat_retraces_recorded_branch() {
    let tmp = tempfile::tempdir().unwrap();
    write_png(tmp.path(), "a.png", [200, 0, 0, 255]);
    write_png(tmp.path(), "b.png", [0, 200, 0, 255]);
    write_png(tmp.path(), "c.png", [0, 0, 200, 255]);
    write_png(tmp.path(), "d.png", [200, 200, 0, 255]);

    let (mut ctl, _presented) = controller(tmp.path(), Arc::new(AtomicBool::new(true)));
    settle(&mut ctl);
    for _ in 0..2 {
        ctl.next_photo().unwrap();
        settle(&mut ctl);
    }
    let forward = ctl.current_path().unwrap();

    ctl.prev_photo().unwrap();
    settle(&mut ctl);
    assert_ne!(ctl.current_path().unwrap(), forward);

    // Forward again retraces the same recorded entry, not a fresh pick.
    ctl.next_photo().unwrap();
    settle(&mut ctl);
    assert_eq!(ctl.current_path().unwrap(), forward);
}

#[test]
fn monitor_off_blanks_then_wake_resumes() {
    let tmp = tempfile::tempdir().unwrap();
    write_png(tmp.path(), "a.png", [200, 0, 0, 255]);
    write_png(tmp.path(), "b.png", [0, 200, 0, 255]);

    let on = Arc::new(AtomicBool::new(true));
    let (mut ctl, presented) = controller(tmp.path(), on.clone());
    settle(&mut ctl);

    // Probe must report off twice in a row before the state flips.
    on.store(false, Ordering::SeqCst);
    for _ in 0..10 {
        ctl.tick().unwrap();
        if ctl.fade_state() == FadeState::MonitorOff {
            break;
        }
    }
    assert_eq!(ctl.fade_state(), FadeState::MonitorOff);

    // While off, only blank frames go out.
    presented.lock().unwrap().clear();
    ctl.tick().unwrap();
    assert!(
        presented.lock().unwrap().iter().all(|d| *d == (16, 9)),
        "monitor-off must present the tiny blank frame"
    );

    // Power returns: the controller fades back in and reaches idle with the
    // same image still current.
    let before = ctl.current_path().unwrap();
    on.store(true, Ordering::SeqCst);
    for _ in 0..500 {
        ctl.tick().unwrap();
        if ctl.fade_state() == FadeState::Idle {
            break;
        }
    }
    assert_eq!(ctl.fade_state(), FadeState::Idle);
    assert_eq!(ctl.current_path().unwrap(), before);
}

#[test]
fn quit_event_stops_the_loop() {
    let tmp = tempfile::tempdir().unwrap();
    write_png(tmp.path(), "a.png", [200, 0, 0, 255]);

    let (mut ctl, _presented) = controller(tmp.path(), Arc::new(AtomicBool::new(true)));
    settle(&mut ctl);
    assert!(ctl.is_running());
    ctl.handle_event(InputEvent::Quit).unwrap();
    assert!(!ctl.is_running());
}
