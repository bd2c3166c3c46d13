use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{Rgba, RgbaImage};
use photo_kiosk::config::Configuration;
use photo_kiosk::controller::{FadeState, SlideshowController};
use photo_kiosk::corrections::IdentityCorrections;
use photo_kiosk::error::Error;
use photo_kiosk::events::InputEvent;
use photo_kiosk::overlay::NoopOverlay;
use photo_kiosk::power::NoopPower;
use photo_kiosk::surface::DisplaySurface;

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

/// A screen so large no frame buffer can be allocated for it. Every load
/// must degrade to the placeholder frame and the loop must keep ticking.
#[test]
fn allocation_failure_degrades_to_placeholder_and_keeps_ticking() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("a.png");
    RgbaImage::from_pixel(24, 16, Rgba([200, 0, 0, 255]))
        .save(&path)
        .unwrap();

    let mut cfg = Configuration::with_library(tmp.path().to_path_buf());
    cfg.frame_interval = Duration::from_secs(3600);
    cfg.idle_pause = Duration::from_millis(1);
    cfg.transition_frames = 5;
    cfg.fade_limit = 3;
    cfg.blur_border = 0.0;

    let presented = Arc::new(Mutex::new(Vec::new()));
    let surface = FakeSurface {
        size: (u32::MAX, u32::MAX),
        presented: presented.clone(),
    };
    let mut ctl = SlideshowController::new(
        cfg,
        Box::new(surface),
        Box::new(NoopPower),
        Box::new(NoopOverlay),
        Arc::new(IdentityCorrections),
    );

    let mut reached_idle = false;
    for _ in 0..500 {
        ctl.tick().expect("tick must never fail on allocation pressure");
        if ctl.fade_state() == FadeState::Idle && ctl.current_path().is_some() {
            reached_idle = true;
            break;
        }
    }
    assert!(reached_idle, "controller stalled under allocation failure");
    assert_eq!(ctl.history().len(), 1);

    // Everything shown was the 16x9 placeholder/blank raster.
    let dims = presented.lock().unwrap();
    assert!(!dims.is_empty());
    assert!(dims.iter().all(|d| *d == (16, 9)), "expected placeholder frames, got {dims:?}");

    // The loop keeps running afterwards.
    for _ in 0..20 {
        ctl.tick().unwrap();
    }
    assert!(ctl.is_running());
}
