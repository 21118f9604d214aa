//! Coordinate mapping between the device's native resolution and the
//! bounded resolution the decision service sees.
//!
//! Screens outside the supported window are rescaled before being shown
//! to the model, and every coordinate the model emits is mapped back to
//! native pixels before dispatch. One symmetric scale factor covers both
//! axes so the mapping stays invertible up to rounding.

use std::io::Cursor;

use image::ImageFormat;
use image::imageops::FilterType;

pub const MAX_WIDTH: u32 = 1366;
pub const MAX_HEIGHT: u32 = 1024;
pub const MIN_WIDTH: u32 = 640;
pub const MIN_HEIGHT: u32 = 480;

/// Mapper for one fixed native resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionMapper {
    original: (u32, u32),
    scaled: (u32, u32),
    scale: f64,
}

fn pick_scale_factor(width: u32, height: u32) -> f64 {
    let in_window = width <= MAX_WIDTH
        && width >= MIN_WIDTH
        && height <= MAX_HEIGHT
        && height >= MIN_HEIGHT;
    if in_window {
        return 1.0;
    }

    let width = f64::from(width);
    let height = f64::from(height);
    let width_down = f64::from(MAX_WIDTH) / width;
    let width_up = f64::from(MIN_WIDTH) / width;
    let height_down = f64::from(MAX_HEIGHT) / height;
    let height_up = f64::from(MIN_HEIGHT) / height;

    if width > f64::from(MAX_WIDTH) || height > f64::from(MAX_HEIGHT) {
        width_down.min(height_down)
    } else {
        width_up.max(height_up)
    }
}

impl ResolutionMapper {
    pub fn new(width: u32, height: u32) -> Self {
        let raw_scale = pick_scale_factor(width, height);
        let scaled_width = (f64::from(width) * raw_scale).round() as u32;
        let scaled_height = (f64::from(height) * raw_scale).round() as u32;

        // Rounding each axis independently skews the factor slightly; use
        // the geometric mean of the effective per-axis scales.
        let effective_x = f64::from(scaled_width) / f64::from(width);
        let effective_y = f64::from(scaled_height) / f64::from(height);
        let scale = (effective_x * effective_y).sqrt();

        Self {
            original: (width, height),
            scaled: (scaled_width, scaled_height),
            scale,
        }
    }

    pub fn original_resolution(&self) -> (u32, u32) {
        self.original
    }

    /// The resolution the decision service observes and targets.
    pub fn scaled_resolution(&self) -> (u32, u32) {
        self.scaled
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Maps a model-space coordinate back to native device pixels.
    pub fn to_original(&self, point: (i64, i64)) -> (i64, i64) {
        let x = (point.0 as f64 / self.scale).round() as i64;
        let y = (point.1 as f64 / self.scale).round() as i64;
        (x, y)
    }

    /// Maps a native device coordinate into model space.
    pub fn to_scaled(&self, point: (i64, i64)) -> (i64, i64) {
        let x = (point.0 as f64 * self.scale).round() as i64;
        let y = (point.1 as f64 * self.scale).round() as i64;
        (x, y)
    }

    /// Resizes a PNG screenshot to the scaled resolution.
    ///
    /// Identity scale skips the decode, and an unreadable image falls back
    /// to the untouched bytes rather than failing the iteration.
    pub fn scale_screenshot(&self, png: &[u8]) -> Vec<u8> {
        if (self.scale - 1.0).abs() < f64::EPSILON {
            return png.to_vec();
        }
        match image::load_from_memory(png) {
            Ok(decoded) => {
                let resized =
                    decoded.resize_exact(self.scaled.0, self.scaled.1, FilterType::Lanczos3);
                let mut out = Cursor::new(Vec::new());
                match resized.write_to(&mut out, ImageFormat::Png) {
                    Ok(()) => out.into_inner(),
                    Err(_) => png.to_vec(),
                }
            }
            Err(_) => png.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_inside_the_window_is_untouched() {
        let mapper = ResolutionMapper::new(1280, 800);
        assert_eq!(mapper.scaled_resolution(), (1280, 800));
        assert!((mapper.scale() - 1.0).abs() < f64::EPSILON);
        assert_eq!(mapper.to_original((321, 654)), (321, 654));
    }

    #[test]
    fn oversized_resolution_scales_down_within_bounds() {
        let mapper = ResolutionMapper::new(2560, 1440);
        let (w, h) = mapper.scaled_resolution();
        assert!(w <= MAX_WIDTH && h <= MAX_HEIGHT);
        assert!(mapper.scale() < 1.0);
    }

    #[test]
    fn undersized_resolution_scales_up_within_bounds() {
        let mapper = ResolutionMapper::new(480, 320);
        let (w, h) = mapper.scaled_resolution();
        assert!(w >= MIN_WIDTH && h >= MIN_HEIGHT);
        assert!(mapper.scale() > 1.0);
    }

    #[test]
    fn phone_portrait_resolution_scales_down() {
        // Typical emulator screen.
        let mapper = ResolutionMapper::new(1080, 2400);
        let (w, h) = mapper.scaled_resolution();
        assert!(h <= MAX_HEIGHT);
        assert!(w >= 1);

        // Round-tripping a coordinate lands within rounding error.
        let (x, y) = mapper.to_original(mapper.to_scaled((540, 1200)));
        assert!((x - 540).abs() <= 2);
        assert!((y - 1200).abs() <= 2);
    }

    #[test]
    fn identity_scale_returns_screenshot_unchanged() {
        let mapper = ResolutionMapper::new(1280, 800);
        let bytes = vec![1, 2, 3, 4];
        assert_eq!(mapper.scale_screenshot(&bytes), bytes);
    }

    #[test]
    fn unreadable_screenshot_falls_back_to_raw_bytes() {
        let mapper = ResolutionMapper::new(2560, 1440);
        let garbage = vec![0xde, 0xad, 0xbe, 0xef];
        assert_eq!(mapper.scale_screenshot(&garbage), garbage);
    }
}
