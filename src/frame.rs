//! Frame buffers and the pixel math behind fades.

use fast_image_resize as fir;
use image::RgbaImage;

use crate::error::Error;

/// Display geometry shared by the loader and the pre-renderer.
#[derive(Debug, Clone, Copy)]
pub struct ScreenGeometry {
    pub width: u32,
    pub height: u32,
    /// Downscale divisor for the small blending copy.
    pub small_div: u32,
}

impl ScreenGeometry {
    pub fn new(width: u32, height: u32, small_div: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            small_div: small_div.max(1),
        }
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    pub fn small_size(&self) -> (u32, u32) {
        (
            (self.width as f32 / self.small_div as f32).round().max(1.0) as u32,
            (self.height as f32 / self.small_div as f32).round().max(1.0) as u32,
        )
    }
}

/// A full-resolution raster plus its downscaled blending copy. The two are
/// produced together and always travel as a pair.
#[derive(Debug, Clone)]
pub struct DisplayFrame {
    pub full: RgbaImage,
    pub small: RgbaImage,
}

impl DisplayFrame {
    /// Build the pair from a finished full-resolution canvas.
    pub fn from_full(full: RgbaImage, geom: &ScreenGeometry) -> Result<Self, Error> {
        let (sw, sh) = geom.small_size();
        let small = resize_to(&full, sw, sh)?;
        Ok(Self { full, small })
    }

    /// All-black frame pair at screen resolution.
    pub fn blank(geom: &ScreenGeometry) -> Result<Self, Error> {
        let full = try_rgba(geom.width, geom.height)?;
        let (sw, sh) = geom.small_size();
        let small = try_rgba(sw, sh)?;
        Ok(Self { full, small })
    }

    /// Minimal black frame used when real allocation fails. Small enough that
    /// it cannot itself fail, and the GPU blit stretches it to fullscreen.
    pub fn placeholder() -> Self {
        Self {
            full: blank_tiny(),
            small: blank_tiny(),
        }
    }
}

/// A 16x9 black raster; presenting it blanks the screen at negligible cost.
pub fn blank_tiny() -> RgbaImage {
    RgbaImage::from_pixel(16, 9, image::Rgba([0, 0, 0, 255]))
}

/// Allocate an opaque black RGBA buffer without aborting on exhaustion.
///
/// # Errors
/// Returns [`Error::AllocationFailure`] when the reservation fails or the
/// pixel count overflows.
pub fn try_rgba(width: u32, height: u32) -> Result<RgbaImage, Error> {
    let fail = || Error::AllocationFailure { width, height };
    let len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(fail)?;
    let mut pixels: Vec<u8> = Vec::new();
    pixels.try_reserve_exact(len).map_err(|_| fail())?;
    pixels.resize(len, 0);
    // Opaque alpha
    for px in pixels.chunks_exact_mut(4) {
        px[3] = 255;
    }
    RgbaImage::from_raw(width, height, pixels).ok_or_else(fail)
}

/// Resize with a convolution filter; falls through to a clone when the size
/// already matches.
pub fn resize_to(source: &RgbaImage, target_w: u32, target_h: u32) -> Result<RgbaImage, Error> {
    let fail = || Error::AllocationFailure {
        width: target_w,
        height: target_h,
    };
    if target_w == 0 || target_h == 0 {
        return Err(fail());
    }
    if source.width() == target_w && source.height() == target_h {
        return Ok(source.clone());
    }
    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        source.as_raw(),
        fir::PixelType::U8x4,
    )
    .map_err(|_| fail())?;
    let mut dst = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
    let options =
        fir::ResizeOptions::new().resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom));
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst, Some(&options))
        .map_err(|_| fail())?;
    RgbaImage::from_raw(target_w, target_h, dst.into_vec()).ok_or_else(fail)
}

/// Linear per-pixel blend of two equally-sized rasters; `alpha` in `[0, 1]`
/// weights `b`.
pub fn blend(a: &RgbaImage, b: &RgbaImage, alpha: f32) -> RgbaImage {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    let alpha = alpha.clamp(0.0, 1.0);
    let inv = 1.0 - alpha;
    let mut out = a.clone();
    for (dst, src) in out.pixels_mut().zip(b.pixels()) {
        for c in 0..4 {
            dst[c] = (dst[c] as f32 * inv + src[c] as f32 * alpha)
                .round()
                .clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Darken a raster for the manual fade ramp. `alpha` counts up from 0 (dark)
/// to `limit` (full brightness); each channel is divided by the remaining
/// step count.
pub fn fade_scale(img: &RgbaImage, alpha: u8, limit: u8) -> RgbaImage {
    let divisor = if alpha >= limit {
        1
    } else {
        (limit - alpha).max(1)
    };
    if divisor <= 1 {
        return img.clone();
    }
    let mut out = img.clone();
    for px in out.pixels_mut() {
        px[0] /= divisor;
        px[1] /= divisor;
        px[2] /= divisor;
    }
    out
}
