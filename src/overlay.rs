//! Clock/date overlay drawn onto idle frames, with per-image placement.
//!
//! Placement lives in a sidecar `<image>.clockpos.txt` holding five
//! whitespace-separated integers: `x y placement fontIndex shadowOffset`.
//! The placement code uses numpad-style anchors (7/8/9 top, 4/5/6 middle,
//! 1/2/3 bottom; 19/16/13 right-align the whole block) with bit 0x80
//! selecting the compact date format. A missing or corrupt sidecar falls
//! back to all zeroes with a logged warning.

use std::net::UdpSocket;
use std::path::{Path, PathBuf};
use std::time::Instant;

use ab_glyph::{Font, FontVec, Glyph, PxScale, ScaleFont, point};
use chrono::Local;
use image::RgbaImage;
use tracing::{info, warn};

pub const CLOCKPOS_SUFFIX: &str = ".clockpos.txt";

const IP_DISPLAY_SECS: u64 = 5;
const BORDER_PX: i32 = 2;

/// Overlay collaborator interface; the controller never sees fonts or
/// sidecar files directly.
pub trait ClockOverlay {
    /// Called when a new image becomes current.
    fn prepare(&mut self, image: Option<&Path>);
    fn draw(&mut self, img: &mut RgbaImage);
    fn reposition(&mut self, x: u32, y: u32);
    fn cycle_corner(&mut self);
    fn cycle_size(&mut self);
    fn cycle_font(&mut self);
    fn cycle_shadow(&mut self);
    /// Show the host IP instead of the clock for a few seconds.
    fn show_ip(&mut self);
}

/// Overlay that draws nothing; used on setups without fonts and in tests.
#[derive(Debug, Default)]
pub struct NoopOverlay;

impl ClockOverlay for NoopOverlay {
    fn prepare(&mut self, _image: Option<&Path>) {}
    fn draw(&mut self, _img: &mut RgbaImage) {}
    fn reposition(&mut self, _x: u32, _y: u32) {}
    fn cycle_corner(&mut self) {}
    fn cycle_size(&mut self) {}
    fn cycle_font(&mut self) {}
    fn cycle_shadow(&mut self) {}
    fn show_ip(&mut self) {}
}

/// Per-image overlay placement, mirrored to the sidecar file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockPos {
    pub x: i32,
    pub y: i32,
    pub placement: u32,
    pub font_index: u32,
    pub shadow_offset: u32,
}

impl ClockPos {
    pub fn corner(&self) -> u32 {
        self.placement & 0x7F
    }

    pub fn compact_date(&self) -> bool {
        self.placement & 0x80 != 0
    }
}

/// Parse sidecar text; `None` when even `x y` cannot be read.
pub fn parse_clockpos(text: &str) -> Option<ClockPos> {
    let mut nums = text.split_whitespace();
    let x = nums.next()?.parse().ok()?;
    let y = nums.next()?.parse().ok()?;
    let mut opt = |d| nums.next().and_then(|v| v.parse().ok()).unwrap_or(d);
    Some(ClockPos {
        x,
        y,
        placement: opt(0),
        font_index: opt(0),
        shadow_offset: opt(0),
    })
}

pub fn load_clockpos(image: &Path) -> ClockPos {
    let sidecar = sidecar_path(image);
    match std::fs::read_to_string(&sidecar) {
        Ok(text) => parse_clockpos(&text).unwrap_or_else(|| {
            warn!(path = %sidecar.display(), "unable to parse clock position; using defaults");
            ClockPos::default()
        }),
        Err(_) => ClockPos::default(),
    }
}

fn sidecar_path(image: &Path) -> PathBuf {
    let mut s = image.as_os_str().to_owned();
    s.push(CLOCKPOS_SUFFIX);
    PathBuf::from(s)
}

/// Step the anchor through the numpad ring: 1..9 ascending, then the
/// block-right anchors 19/16/13.
pub fn next_corner(corner: u32) -> u32 {
    match corner {
        1..=8 => corner + 1,
        9 => 19,
        19 => 16,
        16 => 13,
        13 => 1,
        0 => 8,
        _ => 7,
    }
}

/// Step the shadow offset through 4/8/12/0.
pub fn next_shadow(shadow: u32) -> u32 {
    ((shadow - shadow % 4) + 4) % 16
}

/// Text sizes for one overlay style; `date_px` of `None` drops the date line.
#[derive(Debug, Clone, Copy)]
struct FontLayout {
    time_px: f32,
    date_px: Option<f32>,
    line_space: f32,
}

const LAYOUTS: [FontLayout; 4] = [
    FontLayout {
        time_px: 280.0,
        date_px: Some(84.0),
        line_space: 0.1,
    },
    FontLayout {
        time_px: 160.0,
        date_px: Some(64.0),
        line_space: 0.15,
    },
    FontLayout {
        time_px: 280.0,
        date_px: None,
        line_space: 0.0,
    },
    FontLayout {
        time_px: 160.0,
        date_px: None,
        line_space: 0.0,
    },
];

pub struct ClockDraw {
    font: Option<FontVec>,
    pos: ClockPos,
    current_image: Option<PathBuf>,
    ip_shown_at: Option<Instant>,
}

impl ClockDraw {
    /// Load a system font through fontdb. A machine with no usable font gets
    /// a clock-less kiosk, never a startup failure.
    pub fn new() -> Self {
        let font = load_system_font();
        if font.is_none() {
            warn!("no usable system font found; clock overlay disabled");
        }
        Self {
            font,
            pos: ClockPos::default(),
            current_image: None,
            ip_shown_at: None,
        }
    }

    fn save_spec(&self) {
        let Some(image) = &self.current_image else {
            return;
        };
        let sidecar = sidecar_path(image);
        let line = format!(
            "{} {} {} {} {}\n",
            self.pos.x, self.pos.y, self.pos.placement, self.pos.font_index, self.pos.shadow_offset
        );
        match std::fs::write(&sidecar, &line) {
            Ok(()) => info!(path = %sidecar.display(), spec = line.trim(), "clock position saved"),
            Err(err) => warn!(path = %sidecar.display(), %err, "unable to save clock position"),
        }
    }

    fn ip_active(&self) -> bool {
        self.ip_shown_at
            .is_some_and(|t| t.elapsed().as_secs() < IP_DISPLAY_SECS)
    }
}

impl Default for ClockDraw {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockOverlay for ClockDraw {
    fn prepare(&mut self, image: Option<&Path>) {
        self.current_image = image.map(Path::to_path_buf);
        self.pos = image.map(load_clockpos).unwrap_or_default();
        self.ip_shown_at = None;
    }

    fn draw(&mut self, img: &mut RgbaImage) {
        let Some(font) = &self.font else { return };
        let layout = LAYOUTS[self.pos.font_index as usize % LAYOUTS.len()];
        if self.ip_active() {
            let ip = host_ip().unwrap_or_else(|| "no address".to_string());
            let style = TextStyle {
                shadow_offset: self.pos.shadow_offset as i32,
                ..TextStyle::default()
            };
            draw_text(img, font, 64.0, &ip, self.pos.x, self.pos.y, &style);
            return;
        }

        let now = Local::now();
        let time_str = now.format("%-I:%M").to_string();
        let date_str = layout.date_px.map(|_| {
            if self.pos.compact_date() {
                now.format("%a, %b %-d").to_string()
            } else {
                now.format("%A, %B %-d").to_string()
            }
        });

        let (tw, th) = measure(font, layout.time_px, &time_str);
        let (dw, dh) = date_str
            .as_deref()
            .map(|d| measure(font, layout.date_px.unwrap_or(0.0), d))
            .unwrap_or((0.0, 0.0));
        let spacing = th * layout.line_space;
        let total_w = tw.max(dw);
        let total_h = th + if date_str.is_some() { dh + spacing } else { 0.0 };

        let (x, y) = (self.pos.x as f32, self.pos.y as f32);
        let anchor = anchor_offsets(self.pos.corner(), x, y, tw, dw, total_w, total_h);
        let style = TextStyle {
            shadow_offset: self.pos.shadow_offset as i32,
            ..TextStyle::default()
        };
        draw_text(
            img,
            font,
            layout.time_px,
            &time_str,
            anchor.time_x as i32,
            anchor.top_y as i32,
            &style,
        );
        if let (Some(date), Some(date_px)) = (date_str.as_deref(), layout.date_px) {
            let date_y = anchor.top_y + spacing + th;
            draw_text(
                img,
                font,
                date_px,
                date,
                anchor.date_x as i32,
                date_y as i32,
                &style,
            );
        }
    }

    fn reposition(&mut self, x: u32, y: u32) {
        self.pos.x = x as i32;
        self.pos.y = y as i32;
        self.save_spec();
    }

    fn cycle_corner(&mut self) {
        let size_bit = self.pos.placement & 0x80;
        self.pos.placement = size_bit | next_corner(self.pos.corner());
        self.save_spec();
    }

    fn cycle_size(&mut self) {
        self.pos.placement ^= 0x80;
        self.save_spec();
    }

    fn cycle_font(&mut self) {
        self.pos.font_index = (self.pos.font_index + 1) % LAYOUTS.len() as u32;
        self.save_spec();
    }

    fn cycle_shadow(&mut self) {
        self.pos.shadow_offset = next_shadow(self.pos.shadow_offset);
        self.save_spec();
    }

    fn show_ip(&mut self) {
        self.ip_shown_at = Some(Instant::now());
    }
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    time_x: f32,
    date_x: f32,
    top_y: f32,
}

/// Resolve the numpad anchor into top-left draw positions for each line.
fn anchor_offsets(
    corner: u32,
    x: f32,
    y: f32,
    time_w: f32,
    date_w: f32,
    total_w: f32,
    total_h: f32,
) -> Anchor {
    let (time_x, date_x) = match corner {
        8 | 5 | 2 => (x - time_w / 2.0, x - date_w / 2.0),
        9 | 6 | 3 => (x - time_w, x - date_w),
        19 | 16 | 13 => (x - total_w, x - total_w),
        _ => (x, x),
    };
    let top_y = match corner {
        4 | 5 | 6 | 16 => y - total_h / 2.0,
        1 | 2 | 3 | 13 => y - total_h,
        _ => y,
    };
    Anchor {
        time_x,
        date_x,
        top_y,
    }
}

struct TextStyle {
    fill: [u8; 3],
    border: [u8; 3],
    shadow: [u8; 3],
    shadow_offset: i32,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            fill: [255, 255, 255],
            border: [0, 0, 0],
            shadow: [0, 0, 0],
            shadow_offset: 0,
        }
    }
}

fn measure(font: &FontVec, px: f32, text: &str) -> (f32, f32) {
    let scaled = font.as_scaled(PxScale::from(px));
    let mut width = 0.0;
    let mut prev = None;
    for ch in text.chars() {
        let id = scaled.glyph_id(ch);
        if let Some(p) = prev {
            width += scaled.kern(p, id);
        }
        width += scaled.h_advance(id);
        prev = Some(id);
    }
    (width, scaled.ascent() - scaled.descent())
}

fn draw_text(img: &mut RgbaImage, font: &FontVec, px: f32, text: &str, x: i32, y: i32, style: &TextStyle) {
    if style.shadow_offset > 0 {
        let so = style.shadow_offset;
        rasterize(img, font, px, text, x + so, y + so, style.shadow);
    }
    // CPU approximation of a stroked outline: the border color stamped at
    // eight offsets under the fill.
    for (dx, dy) in [
        (-BORDER_PX, 0),
        (BORDER_PX, 0),
        (0, -BORDER_PX),
        (0, BORDER_PX),
        (-BORDER_PX, -BORDER_PX),
        (BORDER_PX, -BORDER_PX),
        (-BORDER_PX, BORDER_PX),
        (BORDER_PX, BORDER_PX),
    ] {
        rasterize(img, font, px, text, x + dx, y + dy, style.border);
    }
    rasterize(img, font, px, text, x, y, style.fill);
}

fn rasterize(img: &mut RgbaImage, font: &FontVec, px: f32, text: &str, x: i32, y: i32, color: [u8; 3]) {
    let scale = PxScale::from(px);
    let scaled = font.as_scaled(scale);
    let baseline = y as f32 + scaled.ascent();
    let mut pen_x = x as f32;
    let mut prev = None;
    for ch in text.chars() {
        let id = scaled.glyph_id(ch);
        if let Some(p) = prev {
            pen_x += scaled.kern(p, id);
        }
        let glyph: Glyph = id.with_scale_and_position(scale, point(pen_x, baseline));
        if let Some(outline) = font.outline_glyph(glyph) {
            let bounds = outline.px_bounds();
            outline.draw(|gx, gy, coverage| {
                let ix = bounds.min.x as i32 + gx as i32;
                let iy = bounds.min.y as i32 + gy as i32;
                if ix < 0 || iy < 0 || ix >= img.width() as i32 || iy >= img.height() as i32 {
                    return;
                }
                let pixel = img.get_pixel_mut(ix as u32, iy as u32);
                let a = coverage.clamp(0.0, 1.0);
                for c in 0..3 {
                    pixel[c] =
                        (pixel[c] as f32 * (1.0 - a) + color[c] as f32 * a).round() as u8;
                }
            });
        }
        pen_x += scaled.h_advance(id);
        prev = Some(id);
    }
}

fn load_system_font() -> Option<FontVec> {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    let query = fontdb::Query {
        families: &[fontdb::Family::Serif, fontdb::Family::SansSerif],
        ..Default::default()
    };
    let id = db.query(&query)?;
    let (source, index) = db.face_source(id)?;
    let data: Vec<u8> = match source {
        fontdb::Source::File(path) => std::fs::read(path).ok()?,
        fontdb::Source::Binary(data) | fontdb::Source::SharedFile(_, data) => {
            data.as_ref().as_ref().to_vec()
        }
    };
    FontVec::try_from_vec_and_index(data, index).ok()
}

/// Local address as seen on the default route. No packet is sent; connecting
/// a UDP socket just resolves the route.
fn host_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}
