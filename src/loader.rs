//! Decodes an image file into a screen-sized [`DisplayFrame`] pair.
//!
//! Aspect-fit letterboxing with an optional blurred-border fill: when the
//! letterbox bars would be narrow relative to the picture, the bars are
//! filled with a blurred, darkened copy of the picture edges instead of
//! plain black.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use image::RgbaImage;
use image::imageops;
use tracing::{debug, warn};

use crate::corrections::ColorCorrect;
use crate::error::Error;
use crate::frame::{DisplayFrame, ScreenGeometry, resize_to, try_rgba};

const BORDER_BLUR_SIGMA: f32 = 20.0;

#[derive(Clone)]
pub struct ImageLoader {
    geom: ScreenGeometry,
    /// Brightness factor for the blurred fill; `0` disables it.
    blur_border: f32,
    corrector: Arc<dyn ColorCorrect>,
}

impl ImageLoader {
    pub fn new(geom: ScreenGeometry, blur_border: f32, corrector: Arc<dyn ColorCorrect>) -> Self {
        Self {
            geom,
            blur_border: blur_border.clamp(0.0, 1.0),
            corrector,
        }
    }

    pub fn geometry(&self) -> ScreenGeometry {
        self.geom
    }

    pub fn blank(&self) -> Result<DisplayFrame, Error> {
        DisplayFrame::blank(&self.geom)
    }

    /// Load, orient, correct, and letterbox a file onto a screen-sized
    /// canvas.
    ///
    /// # Errors
    /// [`Error::LoadFailure`] for unreadable or undecodable files,
    /// [`Error::AllocationFailure`] when the canvas cannot be allocated.
    pub fn load(&self, path: &Path) -> Result<DisplayFrame, Error> {
        let img = decode_rgba8_apply_exif(path).map_err(|err| Error::load(path, err))?;
        let (w, h) = img.dimensions();
        if w == 0 || h == 0 {
            return Err(Error::load(path, anyhow::anyhow!("zero-sized image")));
        }
        let img_aspect = w as f32 / h as f32;
        debug!(path = %path.display(), width = w, height = h, aspect = img_aspect, "image open");

        let img = self.corrector.correct(img, path);

        // Aspect-fit to the screen.
        let (dst_w, dst_h, pos, bar) = if img_aspect >= self.geom.aspect() {
            let dst_h = (self.geom.width as f32 / img_aspect).round().max(1.0) as u32;
            let top = (self.geom.height.saturating_sub(dst_h)) / 2;
            (self.geom.width, dst_h, (0i64, top as i64), Letterbox::TopBottom(top))
        } else {
            let dst_w = (self.geom.height as f32 * img_aspect).round().max(1.0) as u32;
            let left = (self.geom.width.saturating_sub(dst_w)) / 2;
            (dst_w, self.geom.height, (left as i64, 0i64), Letterbox::LeftRight(left))
        };
        // Canvas allocation runs first so memory exhaustion surfaces as a
        // recoverable failure before any scaling work.
        let mut canvas = try_rgba(self.geom.width, self.geom.height)?;
        let scaled = resize_to(&img, dst_w, dst_h)?;
        if self.wants_blur_fill(&bar, dst_w, dst_h) {
            canvas = self.blurred_fill(&scaled)?;
        }
        imageops::overlay(&mut canvas, &scaled, pos.0, pos.1);
        DisplayFrame::from_full(canvas, &self.geom)
    }

    /// [`Self::load`] with the mandatory degradation path applied: an
    /// allocation failure yields a placeholder frame instead of an error so
    /// the show keeps running under memory pressure.
    pub fn load_degraded(&self, path: &Path) -> Result<DisplayFrame, Error> {
        match self.load(path) {
            Ok(frame) => Ok(frame),
            Err(Error::AllocationFailure { width, height }) => {
                warn!(width, height, path = %path.display(), "frame allocation failed; using placeholder");
                Ok(DisplayFrame::placeholder())
            }
            Err(other) => Err(other),
        }
    }

    /// Narrow bars get the blurred fill; wide bars stay black. The cutoff is
    /// a third of the picture's fitted extent.
    fn wants_blur_fill(&self, bar: &Letterbox, dst_w: u32, dst_h: u32) -> bool {
        if self.blur_border <= 0.0 {
            return false;
        }
        match *bar {
            Letterbox::TopBottom(offset) => offset > 0 && offset < dst_h / 3,
            Letterbox::LeftRight(offset) => offset > 0 && offset < dst_w / 3,
        }
    }

    /// Build the background: the picture stamped at both letterbox edges,
    /// blurred and darkened. Blurring happens at the small-copy scale and is
    /// upsampled afterwards to keep the cost flat.
    fn blurred_fill(&self, scaled: &RgbaImage) -> Result<RgbaImage, Error> {
        let (sw, sh) = self.geom.small_size();
        let div = self.geom.small_div.max(1);
        let edge_w = (scaled.width() / div).max(1);
        let edge_h = (scaled.height() / div).max(1);
        let edge = resize_to(scaled, edge_w, edge_h)?;

        let mut small = try_rgba(sw, sh)?;
        imageops::overlay(&mut small, &edge, 0, 0);
        imageops::overlay(
            &mut small,
            &edge,
            (sw.saturating_sub(edge_w)) as i64,
            (sh.saturating_sub(edge_h)) as i64,
        );
        let mut blurred = imageops::blur(&small, BORDER_BLUR_SIGMA / div as f32);
        for px in blurred.pixels_mut() {
            px[0] = (px[0] as f32 * self.blur_border) as u8;
            px[1] = (px[1] as f32 * self.blur_border) as u8;
            px[2] = (px[2] as f32 * self.blur_border) as u8;
            px[3] = 255;
        }
        resize_to(&blurred, self.geom.width, self.geom.height)
    }
}

#[derive(Debug)]
enum Letterbox {
    TopBottom(u32),
    LeftRight(u32),
}

// Decodes an image to RGBA8 and applies EXIF orientation if available.
// Orientation handling is best-effort; missing metadata keeps the decoded
// orientation.
fn decode_rgba8_apply_exif(path: &Path) -> anyhow::Result<RgbaImage> {
    let img = image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?;
    let mut img = img.to_rgba8();

    let orientation: u16 = read_orientation(path).unwrap_or(1);
    match orientation {
        1 => {}
        2 => img = imageops::flip_horizontal(&img),
        3 => img = imageops::rotate180(&img),
        4 => img = imageops::flip_vertical(&img),
        5 => {
            img = imageops::rotate90(&img);
            img = imageops::flip_horizontal(&img);
        }
        6 => img = imageops::rotate90(&img),
        7 => {
            img = imageops::rotate270(&img);
            img = imageops::flip_horizontal(&img);
        }
        8 => img = imageops::rotate270(&img),
        _ => {}
    }
    Ok(img)
}

fn read_orientation(path: &Path) -> Option<u16> {
    let file = File::open(path).ok()?;
    let mut buf = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut buf).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let value = field.value.get_uint(0)?;
    debug!(orientation = value, path = %path.display(), "exif orientation");
    Some(value as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corrections::IdentityCorrections;
    use image::Rgba;

    fn loader(blur: f32) -> ImageLoader {
        ImageLoader::new(
            ScreenGeometry::new(64, 36, 4),
            blur,
            Arc::new(IdentityCorrections),
        )
    }

    fn write_png(dir: &tempfile::TempDir, name: &str, w: u32, h: u32, color: [u8; 4]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        RgbaImage::from_pixel(w, h, Rgba(color)).save(&path).unwrap();
        path
    }

    #[test]
    fn load_letterboxes_narrow_image() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_png(&tmp, "sq.png", 10, 10, [200, 10, 10, 255]);
        let frame = loader(0.0).load(&path).unwrap();
        assert_eq!(frame.full.dimensions(), (64, 36));
        assert_eq!(frame.small.dimensions(), (16, 9));
        // Side bars are black, the center carries the picture.
        assert_eq!(frame.full.get_pixel(0, 18), &Rgba([0, 0, 0, 255]));
        assert_eq!(frame.full.get_pixel(32, 18)[0], 200);
    }

    #[test]
    fn wide_image_fits_width() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_png(&tmp, "wide.png", 100, 20, [10, 200, 10, 255]);
        let frame = loader(0.0).load(&path).unwrap();
        // 64x36 screen, 5:1 image -> bars above and below.
        assert_eq!(frame.full.get_pixel(32, 0), &Rgba([0, 0, 0, 255]));
        assert_eq!(frame.full.get_pixel(32, 18)[1], 200);
    }

    #[test]
    fn unreadable_file_is_load_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.jpg");
        std::fs::write(&path, b"this is not a jpeg").unwrap();
        let err = loader(0.0).load(&path).unwrap_err();
        assert!(matches!(err, Error::LoadFailure { .. }));
    }

    #[test]
    fn blur_fill_lights_up_narrow_bars() {
        let tmp = tempfile::tempdir().unwrap();
        // 16:10 on a 16:9 screen -> thin side bars, blur kicks in.
        let path = write_png(&tmp, "near.png", 160, 100, [240, 240, 240, 255]);
        let frame = loader(0.6).load(&path).unwrap();
        let corner = frame.full.get_pixel(1, 0);
        assert!(corner[0] > 0, "bar should carry blurred content, got {corner:?}");
    }
}
