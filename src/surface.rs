//! Display surface contract.
//!
//! The kiosk owns exactly one fullscreen surface. Frames of any resolution
//! are accepted; the implementation stretches them over the whole screen, so
//! the small blending copies and the tiny blank frame display the same way
//! the full-resolution frames do.

use std::time::Duration;

use image::RgbaImage;

use crate::error::Error;
use crate::events::InputEvent;

pub trait DisplaySurface {
    /// Native screen resolution in pixels.
    fn size(&self) -> (u32, u32);

    /// Show `frame` fullscreen, then poll input for up to `wait`. Returns
    /// early once input arrives so navigation stays responsive even during
    /// long idle waits.
    ///
    /// # Errors
    /// A surface failure is unrecoverable for the kiosk.
    fn present(&mut self, frame: &RgbaImage, wait: Duration) -> Result<Vec<InputEvent>, Error>;
}
