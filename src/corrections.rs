//! Per-image color correction driven by an optional sidecar file.
//!
//! `<image>.corrections.txt` holds one `op value [value2]` per line. Unknown
//! ops are ignored and a missing sidecar means identity, so a stray file can
//! never take an image out of rotation.

use std::path::Path;

use image::RgbaImage;
use palette::{FromColor, Hsv, Srgb};
use tracing::warn;

pub const CORRECTIONS_SUFFIX: &str = ".corrections.txt";

/// Per-image color transform collaborator.
pub trait ColorCorrect: Send + Sync {
    fn correct(&self, img: RgbaImage, source: &Path) -> RgbaImage;
}

/// No-op corrector.
#[derive(Debug, Default)]
pub struct IdentityCorrections;

impl ColorCorrect for IdentityCorrections {
    fn correct(&self, img: RgbaImage, _source: &Path) -> RgbaImage {
        img
    }
}

/// Reads `<path>.corrections.txt` next to each image.
#[derive(Debug, Default)]
pub struct SidecarCorrections;

impl ColorCorrect for SidecarCorrections {
    fn correct(&self, img: RgbaImage, source: &Path) -> RgbaImage {
        let mut sidecar = source.as_os_str().to_owned();
        sidecar.push(CORRECTIONS_SUFFIX);
        let sidecar = Path::new(&sidecar);
        if !sidecar.exists() {
            return img;
        }
        let text = match std::fs::read_to_string(sidecar) {
            Ok(text) => text,
            Err(err) => {
                warn!(path = %sidecar.display(), %err, "unable to read corrections sidecar");
                return img;
            }
        };
        apply_ops(img, &parse_ops(&text))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CorrectionOp {
    Gamma(f32),
    Vibrance(f32),
    BlackWhitePoint { black: f32, white: f32 },
    BrightnessContrast { brightness: f32, contrast: f32 },
}

/// Parse sidecar text. Malformed lines and unknown ops are skipped with a
/// warning rather than failing the image.
pub fn parse_ops(text: &str) -> Vec<CorrectionOp> {
    let mut ops = Vec::new();
    for line in text.lines() {
        let mut parts = line.split_whitespace();
        let Some(op) = parts.next() else { continue };
        let a = parts.next().and_then(|v| v.parse::<f32>().ok());
        let b = parts.next().and_then(|v| v.parse::<f32>().ok());
        let parsed = match (op, a, b) {
            ("gamma", Some(v), _) => Some(CorrectionOp::Gamma(v)),
            ("vibrance", Some(v), _) => Some(CorrectionOp::Vibrance(v)),
            ("blackpoint", Some(v), _) => Some(CorrectionOp::BlackWhitePoint {
                black: v,
                white: 255.0,
            }),
            ("whitepoint", Some(v), _) => Some(CorrectionOp::BlackWhitePoint {
                black: 0.0,
                white: v,
            }),
            ("brightness", Some(v), _) => Some(CorrectionOp::BrightnessContrast {
                brightness: v,
                contrast: 0.0,
            }),
            ("contrast", Some(v), _) => Some(CorrectionOp::BrightnessContrast {
                brightness: 0.0,
                contrast: v,
            }),
            ("blackpoint_whitepoint", Some(black), Some(white)) => {
                Some(CorrectionOp::BlackWhitePoint { black, white })
            }
            ("brightness_contrast", Some(brightness), Some(contrast)) => {
                Some(CorrectionOp::BrightnessContrast {
                    brightness,
                    contrast,
                })
            }
            _ => None,
        };
        match parsed {
            Some(op) => ops.push(op),
            None => warn!(line, "ignoring unrecognized correction line"),
        }
    }
    ops
}

pub fn apply_ops(mut img: RgbaImage, ops: &[CorrectionOp]) -> RgbaImage {
    for op in ops {
        match *op {
            CorrectionOp::Gamma(g) => apply_gamma(&mut img, g),
            CorrectionOp::Vibrance(x) => apply_vibrance(&mut img, x),
            CorrectionOp::BlackWhitePoint { black, white } => {
                apply_black_white_point(&mut img, black, white);
            }
            CorrectionOp::BrightnessContrast {
                brightness,
                contrast,
            } => apply_brightness_contrast(&mut img, brightness, contrast),
        }
    }
    img
}

fn gamma_lut(gamma: f32) -> [u8; 256] {
    let inv = 1.0 / gamma.max(0.01);
    let mut table = [0u8; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = ((i as f32 / 255.0).powf(inv) * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    table
}

fn apply_gamma(img: &mut RgbaImage, gamma: f32) {
    let lut = gamma_lut(gamma);
    for px in img.pixels_mut() {
        px[0] = lut[px[0] as usize];
        px[1] = lut[px[1] as usize];
        px[2] = lut[px[2] as usize];
    }
}

/// Gamma curve on the saturation channel.
fn apply_vibrance(img: &mut RgbaImage, x: f32) {
    let inv = 1.0 / x.max(0.01);
    for px in img.pixels_mut() {
        let rgb = Srgb::new(
            px[0] as f32 / 255.0,
            px[1] as f32 / 255.0,
            px[2] as f32 / 255.0,
        );
        let mut hsv = Hsv::from_color(rgb);
        hsv.saturation = hsv.saturation.clamp(0.0, 1.0).powf(inv);
        write_rgb(px, Srgb::from_color(hsv));
    }
}

/// Remap the value channel so `black` maps toward 0 and `white` toward 255.
fn apply_black_white_point(img: &mut RgbaImage, black: f32, white: f32) {
    let span = (white - black).max(1.0);
    let m = 255.0 / span;
    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        let v = (i as f32 - black) + i as f32 * m;
        *slot = v.round().clamp(0.0, 255.0) as u8;
    }
    for px in img.pixels_mut() {
        let rgb = Srgb::new(
            px[0] as f32 / 255.0,
            px[1] as f32 / 255.0,
            px[2] as f32 / 255.0,
        );
        let mut hsv = Hsv::from_color(rgb);
        let v = (hsv.value.clamp(0.0, 1.0) * 255.0).round() as usize;
        hsv.value = lut[v.min(255)] as f32 / 255.0;
        write_rgb(px, Srgb::from_color(hsv));
    }
}

fn apply_brightness_contrast(img: &mut RgbaImage, brightness: f32, contrast: f32) {
    let (alpha_b, gamma_b) = if brightness != 0.0 {
        let (shadow, highlight) = if brightness > 0.0 {
            (brightness, 255.0)
        } else {
            (0.0, 255.0 + brightness)
        };
        ((highlight - shadow) / 255.0, shadow)
    } else {
        (1.0, 0.0)
    };
    let (alpha_c, gamma_c) = if contrast != 0.0 {
        let f = 131.0 * (contrast + 127.0) / (127.0 * (131.0 - contrast));
        (f, 127.0 * (1.0 - f))
    } else {
        (1.0, 0.0)
    };
    for px in img.pixels_mut() {
        for c in 0..3 {
            let v = px[c] as f32 * alpha_b + gamma_b;
            let v = v * alpha_c + gamma_c;
            px[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
}

fn write_rgb(px: &mut image::Rgba<u8>, rgb: Srgb) {
    px[0] = (rgb.red * 255.0).round().clamp(0.0, 255.0) as u8;
    px[1] = (rgb.green * 255.0).round().clamp(0.0, 255.0) as u8;
    px[2] = (rgb.blue * 255.0).round().clamp(0.0, 255.0) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn parse_accepts_known_ops_and_skips_junk() {
        let ops = parse_ops(
            "gamma 1.2\nvibrance 1.1\nsharpen 3\nbrightness_contrast 10 5\n\nnonsense\ngamma\n",
        );
        assert_eq!(
            ops,
            vec![
                CorrectionOp::Gamma(1.2),
                CorrectionOp::Vibrance(1.1),
                CorrectionOp::BrightnessContrast {
                    brightness: 10.0,
                    contrast: 5.0
                },
            ]
        );
    }

    #[test]
    fn gamma_one_is_identity() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([13, 120, 240, 255]));
        let out = apply_ops(img.clone(), &[CorrectionOp::Gamma(1.0)]);
        assert_eq!(out, img);
    }

    #[test]
    fn gamma_above_one_brightens_midtones() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([64, 64, 64, 255]));
        let out = apply_ops(img, &[CorrectionOp::Gamma(2.0)]);
        assert!(out.get_pixel(0, 0)[0] > 64);
    }

    #[test]
    fn positive_brightness_lifts_shadows() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([0, 10, 20, 255]));
        let out = apply_ops(
            img,
            &[CorrectionOp::BrightnessContrast {
                brightness: 40.0,
                contrast: 0.0,
            }],
        );
        assert!(out.get_pixel(0, 0)[0] >= 40);
    }

    #[test]
    fn missing_sidecar_is_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let img_path = tmp.path().join("photo.jpg");
        std::fs::write(&img_path, b"not really an image").unwrap();
        let img = RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255]));
        let out = SidecarCorrections.correct(img.clone(), &img_path);
        assert_eq!(out, img);
    }

    #[test]
    fn sidecar_is_applied_when_present() {
        let tmp = tempfile::tempdir().unwrap();
        let img_path = tmp.path().join("photo.jpg");
        std::fs::write(&img_path, b"x").unwrap();
        std::fs::write(
            tmp.path().join("photo.jpg.corrections.txt"),
            "brightness 50\n",
        )
        .unwrap();
        let img = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]));
        let out = SidecarCorrections.correct(img, &img_path);
        assert!(out.get_pixel(0, 0)[0] >= 50);
    }
}
