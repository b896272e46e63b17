use image::{Rgb, RgbImage};

pub const MIN_BRIGHTNESS: i32 = 50;
pub const MAX_BRIGHTNESS: i32 = 150;
pub const DEFAULT_BRIGHTNESS: i32 = 100;

/// Display-only adjustments to the video preview. Detection always sees the
/// raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    brightness_percent: i32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        CaptureSettings {
            brightness_percent: DEFAULT_BRIGHTNESS,
        }
    }
}

impl CaptureSettings {
    pub fn with_brightness(percent: i32) -> CaptureSettings {
        let mut settings = CaptureSettings::default();
        settings.set_brightness(percent);
        settings
    }

    pub fn brightness(&self) -> i32 {
        self.brightness_percent
    }

    /// Returns the stored (clamped) value.
    pub fn set_brightness(&mut self, percent: i32) -> i32 {
        self.brightness_percent = percent.clamp(MIN_BRIGHTNESS, MAX_BRIGHTNESS);
        self.brightness_percent
    }

    pub fn adjust_brightness(&mut self, delta: i32) -> i32 {
        self.set_brightness(self.brightness_percent.saturating_add(delta))
    }

    /// CSS-style description of the filter, e.g. `brightness(120%)`.
    pub fn filter(&self) -> String {
        format!("brightness({}%)", self.brightness_percent)
    }

    /// Linear brightness filter: every channel is multiplied by
    /// `brightness / 100`.
    pub fn apply(&self, frame: &RgbImage) -> RgbImage {
        if self.brightness_percent == DEFAULT_BRIGHTNESS {
            return frame.clone();
        }

        let factor = self.brightness_percent as f32 / 100.;
        let mut out = frame.clone();
        for Rgb(px) in out.pixels_mut() {
            for c in px.iter_mut() {
                *c = (*c as f32 * factor).round().min(255.) as u8;
            }
        }
        out
    }
}
