//! Transform parameter types.
//!
//! These arrive from the client as raw numbers; the planner in the
//! engine crate re-validates everything against the probed source
//! before any pipeline work starts.

use serde::{Deserialize, Serialize};

/// Crop rectangle in native source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// Whether the rectangle lies fully inside a `width`x`height` frame.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x.checked_add(self.width).is_some_and(|r| r <= width)
            && self.y.checked_add(self.height).is_some_and(|b| b <= height)
    }

    /// Width-to-height aspect ratio.
    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

/// Trim window in seconds, relative to the acquired source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrimWindow {
    pub start: f64,
    pub end: f64,
}

impl TrimWindow {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Supported output resolution presets.
///
/// The preset is the output width for wide/square crops and the output
/// height for tall crops; the other dimension follows the crop aspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "u32", into = "u32")]
pub enum ResolutionPreset {
    P480,
    #[default]
    P720,
    P1080,
}

impl ResolutionPreset {
    pub fn pixels(&self) -> u32 {
        match self {
            ResolutionPreset::P480 => 480,
            ResolutionPreset::P720 => 720,
            ResolutionPreset::P1080 => 1080,
        }
    }
}

impl TryFrom<u32> for ResolutionPreset {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            480 => Ok(ResolutionPreset::P480),
            720 => Ok(ResolutionPreset::P720),
            1080 => Ok(ResolutionPreset::P1080),
            other => Err(format!("unsupported resolution preset: {}", other)),
        }
    }
}

impl From<ResolutionPreset> for u32 {
    fn from(preset: ResolutionPreset) -> u32 {
        preset.pixels()
    }
}

/// Concrete output dimensions derived from a crop aspect and preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSize {
    pub width: u32,
    pub height: u32,
}

impl OutputSize {
    /// Derive output dimensions: wide or square crops take the preset
    /// as width, tall crops take it as height. Both dimensions are
    /// rounded down to even for the x264 encoder.
    pub fn from_aspect(aspect: f64, preset: ResolutionPreset) -> Self {
        let base = preset.pixels();
        let (width, height) = if aspect >= 1.0 {
            (base, (base as f64 / aspect) as u32)
        } else {
            ((base as f64 * aspect) as u32, base)
        };
        Self {
            width: (width & !1).max(2),
            height: (height & !1).max(2),
        }
    }
}

/// What to put on the audio track under the end-buffer frame hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BufferAudioPolicy {
    /// Silence under the held frame (avoids artifacts at the freeze point)
    #[default]
    Silence,
    /// Pad by holding the trailing audio
    HoldTail,
}

/// Client-supplied transform parameters for one processing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessParams {
    pub crop: CropRect,
    pub trim: TrimWindow,
    /// Trim window for the separate audio source, when one was acquired
    #[serde(default)]
    pub audio_trim: Option<TrimWindow>,
    #[serde(default)]
    pub resolution: ResolutionPreset,
    #[serde(default = "default_true")]
    pub normalize_audio: bool,
    /// End-buffer duration in seconds, clamped to [0, 5] by the planner
    #[serde(default = "default_buffer_secs")]
    pub buffer_secs: f64,
    #[serde(default)]
    pub use_static_image: bool,
}

fn default_true() -> bool {
    true
}

fn default_buffer_secs() -> f64 {
    2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_bounds() {
        let crop = CropRect { x: 100, y: 50, width: 400, height: 400 };
        assert!(crop.fits_within(1920, 1080));
        assert!(!crop.fits_within(400, 400));

        let edge = CropRect { x: 1520, y: 680, width: 400, height: 400 };
        assert!(edge.fits_within(1920, 1080));

        let over = CropRect { x: 1521, y: 0, width: 400, height: 400 };
        assert!(!over.fits_within(1920, 1080));

        let empty = CropRect { x: 0, y: 0, width: 0, height: 100 };
        assert!(!empty.fits_within(1920, 1080));
    }

    #[test]
    fn test_crop_overflow_is_rejected() {
        let crop = CropRect { x: u32::MAX, y: 0, width: 2, height: 2 };
        assert!(!crop.fits_within(1920, 1080));
    }

    #[test]
    fn test_output_size_square() {
        let size = OutputSize::from_aspect(1.0, ResolutionPreset::P720);
        assert_eq!(size, OutputSize { width: 720, height: 720 });
    }

    #[test]
    fn test_output_size_wide() {
        let size = OutputSize::from_aspect(16.0 / 9.0, ResolutionPreset::P720);
        assert_eq!(size.width, 720);
        // 720 / (16/9) = 405 -> 404 after even rounding
        assert_eq!(size.height, 404);
    }

    #[test]
    fn test_output_size_tall() {
        let size = OutputSize::from_aspect(9.0 / 16.0, ResolutionPreset::P1080);
        assert_eq!(size.height, 1080);
        assert_eq!(size.width, 606);
    }

    #[test]
    fn test_resolution_preset_serde() {
        let p: ResolutionPreset = serde_json::from_str("1080").unwrap();
        assert_eq!(p, ResolutionPreset::P1080);
        assert!(serde_json::from_str::<ResolutionPreset>("540").is_err());
        assert_eq!(serde_json::to_string(&ResolutionPreset::P480).unwrap(), "480");
    }

    #[test]
    fn test_process_params_defaults() {
        let json = r#"{
            "crop": {"x": 0, "y": 0, "width": 100, "height": 100},
            "trim": {"start": 1.0, "end": 5.0}
        }"#;
        let params: ProcessParams = serde_json::from_str(json).unwrap();
        assert!(params.normalize_audio);
        assert_eq!(params.resolution, ResolutionPreset::P720);
        assert!((params.buffer_secs - 2.0).abs() < f64::EPSILON);
        assert!(!params.use_static_image);
        assert!(params.audio_trim.is_none());
    }
}
