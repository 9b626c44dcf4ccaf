use eframe::egui::Color32;
use palette::{Hsl, IntoColor, Srgb};

use ctplot::layer::LAYER_COUNT;

// ---------------------------------------------------------------------------
// Layer palette
// ---------------------------------------------------------------------------

/// `n` visually distinct colours with evenly spaced hues.
pub fn generate_palette(n: usize) -> Vec<Color32> {
    (0..n)
        .map(|i| hsl((i as f32 / n as f32) * 360.0, 0.75, 0.5))
        .collect()
}

/// Default colour of a layer, stable across redraws.
pub fn layer_color(index: usize) -> Color32 {
    let palette = generate_palette(LAYER_COUNT);
    palette[index % LAYER_COUNT]
}

fn hsl(hue: f32, saturation: f32, lightness: f32) -> Color32 {
    let rgb: Srgb = Hsl::new(hue, saturation, lightness).into_color();
    Color32::from_rgb(
        (rgb.red.clamp(0.0, 1.0) * 255.0) as u8,
        (rgb.green.clamp(0.0, 1.0) * 255.0) as u8,
        (rgb.blue.clamp(0.0, 1.0) * 255.0) as u8,
    )
}

// ---------------------------------------------------------------------------
// Colour map for z values and 2D bin contents
// ---------------------------------------------------------------------------

/// Blue → cyan → green → yellow → red over `[lo, hi]`.
#[derive(Debug, Clone, Copy)]
pub struct ColorMap {
    lo: f64,
    hi: f64,
}

impl ColorMap {
    pub fn new(range: Option<(f64, f64)>) -> Self {
        let (lo, hi) = range.unwrap_or((0.0, 1.0));
        Self { lo, hi }
    }

    /// Position of `v` in the range, clamped to `[0, 1]`.
    pub fn fraction(&self, v: f64) -> f32 {
        if self.hi > self.lo {
            ((v - self.lo) / (self.hi - self.lo)).clamp(0.0, 1.0) as f32
        } else {
            0.5
        }
    }

    pub fn color_for(&self, v: f64) -> Color32 {
        if !v.is_finite() {
            return Color32::TRANSPARENT;
        }
        hsl(240.0 * (1.0 - self.fraction(v)), 0.9, 0.5)
    }
}

// ---------------------------------------------------------------------------
// Style colours
// ---------------------------------------------------------------------------

/// Single-letter colour names and `#rrggbb`.
pub fn parse_color(text: &str) -> Option<Color32> {
    let text = text.trim();
    let named = match text {
        "b" | "blue" => Some(Color32::from_rgb(31, 119, 180)),
        "g" | "green" => Some(Color32::from_rgb(44, 160, 44)),
        "r" | "red" => Some(Color32::from_rgb(214, 39, 40)),
        "c" | "cyan" => Some(Color32::from_rgb(23, 190, 207)),
        "m" | "magenta" => Some(Color32::from_rgb(188, 50, 188)),
        "y" | "yellow" => Some(Color32::from_rgb(219, 200, 34)),
        "k" | "black" => Some(Color32::BLACK),
        "w" | "white" => Some(Color32::WHITE),
        _ => None,
    };
    if named.is_some() {
        return named;
    }
    let hex = text.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some(Color32::from_rgb(channel(0)?, channel(2)?, channel(4)?))
}
