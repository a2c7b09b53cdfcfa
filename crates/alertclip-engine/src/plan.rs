//! Transform planning.
//!
//! Validates client parameters against the probed sources and resolves
//! them into a fully concrete `TransformPlan`. Planning never touches
//! the media files; every invalid parameter is rejected here so the
//! pipeline only ever runs plans it can execute.

use std::path::PathBuf;

use serde::Serialize;

use alertclip_models::{
    BufferAudioPolicy, CropRect, OutputSize, ProcessParams, TrimWindow,
};

use crate::acquire::MediaHandle;
use crate::error::{EngineError, EngineResult};

/// Shortest clip the pipeline will produce, in seconds.
pub const MIN_CLIP_SECS: f64 = 0.5;

/// Longest end-buffer, in seconds.
pub const MAX_BUFFER_SECS: f64 = 5.0;

/// Tolerance for trim ends that land fractionally past the probed
/// duration, which container metadata rounding produces routinely.
const DURATION_SLACK: f64 = 0.1;

const FALLBACK_FPS: f64 = 30.0;
const FALLBACK_SAMPLE_RATE: u32 = 44_100;

/// A validated, fully resolved description of one processing run.
#[derive(Debug, Clone, Serialize)]
pub struct TransformPlan {
    pub video: MediaHandle,
    /// Separate audio source; `None` means audio comes from the video
    pub audio: Option<MediaHandle>,
    pub trim: TrimWindow,
    pub audio_trim: Option<TrimWindow>,
    pub crop: CropRect,
    pub output_size: OutputSize,
    pub fps: f64,
    pub sample_rate: u32,
    pub normalize: bool,
    pub buffer_secs: f64,
    pub buffer_audio: BufferAudioPolicy,
    /// Frame the visual track is built from instead of the video
    pub static_image: Option<PathBuf>,
    /// Duration of the trimmed clip, before the end-buffer
    pub clip_duration: f64,
}

impl TransformPlan {
    /// Duration of the finished output, buffer included.
    pub fn output_duration(&self) -> f64 {
        self.clip_duration + self.buffer_secs
    }
}

/// Validate `params` against the acquired sources and produce a plan.
pub fn plan_transform(
    video: &MediaHandle,
    audio: Option<&MediaHandle>,
    params: &ProcessParams,
    buffer_audio: BufferAudioPolicy,
    static_image: Option<PathBuf>,
) -> EngineResult<TransformPlan> {
    let trim = validate_window("trim", &params.trim, video.duration)?;
    if trim.duration() < MIN_CLIP_SECS {
        return Err(EngineError::validation(
            "trim",
            format!("clip must be at least {}s long", MIN_CLIP_SECS),
        ));
    }

    if !params.crop.fits_within(video.width, video.height) {
        return Err(EngineError::validation(
            "crop",
            format!(
                "crop {}x{}+{}+{} does not fit inside the {}x{} source",
                params.crop.width,
                params.crop.height,
                params.crop.x,
                params.crop.y,
                video.width,
                video.height
            ),
        ));
    }

    let audio_trim = match (audio, params.audio_trim) {
        (Some(a), Some(w)) => Some(validate_window("audio_trim", &w, a.duration)?),
        (Some(a), None) => Some(TrimWindow {
            start: 0.0,
            end: a.duration,
        }),
        (None, Some(_)) => {
            return Err(EngineError::validation(
                "audio_trim",
                "no separate audio source was acquired for this job",
            ))
        }
        (None, None) => None,
    };

    if !params.buffer_secs.is_finite() {
        return Err(EngineError::validation(
            "buffer_secs",
            "buffer duration must be a finite number",
        ));
    }
    let buffer_secs = params.buffer_secs.clamp(0.0, MAX_BUFFER_SECS);

    let static_image = if params.use_static_image {
        match static_image {
            Some(path) => Some(path),
            None => {
                return Err(EngineError::validation(
                    "use_static_image",
                    "static-image mode requires an uploaded image",
                ))
            }
        }
    } else {
        None
    };

    let fps = if video.fps.is_finite() && video.fps > 0.0 {
        video.fps
    } else {
        FALLBACK_FPS
    };
    let sample_rate = audio
        .and_then(|a| a.sample_rate)
        .or(video.sample_rate)
        .unwrap_or(FALLBACK_SAMPLE_RATE);

    Ok(TransformPlan {
        video: video.clone(),
        audio: audio.cloned(),
        trim,
        audio_trim,
        crop: params.crop,
        output_size: OutputSize::from_aspect(params.crop.aspect(), params.resolution),
        fps,
        sample_rate,
        normalize: params.normalize_audio,
        buffer_secs,
        buffer_audio,
        static_image,
        clip_duration: trim.duration(),
    })
}

fn validate_window(
    field: &'static str,
    window: &TrimWindow,
    duration: f64,
) -> EngineResult<TrimWindow> {
    if !window.start.is_finite() || !window.end.is_finite() {
        return Err(EngineError::validation(field, "times must be finite numbers"));
    }
    if window.start < 0.0 {
        return Err(EngineError::validation(field, "start must not be negative"));
    }
    if window.end <= window.start {
        return Err(EngineError::validation(field, "end must come after start"));
    }
    if window.end > duration + DURATION_SLACK {
        return Err(EngineError::validation(
            field,
            format!(
                "end {:.3}s is past the source duration {:.3}s",
                window.end, duration
            ),
        ));
    }
    Ok(TrimWindow {
        start: window.start,
        end: window.end.min(duration),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alertclip_models::ResolutionPreset;
    use std::path::PathBuf;

    fn handle(duration: f64, width: u32, height: u32) -> MediaHandle {
        MediaHandle {
            path: PathBuf::from("/tmp/clip.mp4"),
            duration,
            width,
            height,
            fps: 60.0,
            has_audio: true,
            sample_rate: Some(48_000),
        }
    }

    fn params() -> ProcessParams {
        ProcessParams {
            crop: CropRect {
                x: 100,
                y: 50,
                width: 1280,
                height: 720,
            },
            trim: TrimWindow {
                start: 1.0,
                end: 9.0,
            },
            audio_trim: None,
            resolution: ResolutionPreset::P720,
            normalize_audio: true,
            buffer_secs: 2.0,
            use_static_image: false,
        }
    }

    #[test]
    fn test_plan_happy_path() {
        let video = handle(30.0, 1920, 1080);
        let plan = plan_transform(&video, None, &params(), BufferAudioPolicy::Silence, None).unwrap();
        assert_eq!(plan.clip_duration, 8.0);
        assert_eq!(plan.output_duration(), 10.0);
        assert_eq!(plan.output_size.width, 720);
        assert_eq!(plan.output_size.height, 404);
        assert_eq!(plan.fps, 60.0);
        assert_eq!(plan.sample_rate, 48_000);
        assert!(plan.audio.is_none());
        assert!(plan.static_image.is_none());
    }

    #[test]
    fn test_plan_rejects_out_of_bounds_crop() {
        let video = handle(30.0, 1280, 720);
        let err = plan_transform(&video, None, &params(), BufferAudioPolicy::Silence, None).unwrap_err();
        assert!(matches!(err, EngineError::Validation { field: "crop", .. }));
    }

    #[test]
    fn test_plan_rejects_inverted_trim() {
        let video = handle(30.0, 1920, 1080);
        let mut p = params();
        p.trim = TrimWindow {
            start: 5.0,
            end: 5.0,
        };
        let err = plan_transform(&video, None, &p, BufferAudioPolicy::Silence, None).unwrap_err();
        assert!(matches!(err, EngineError::Validation { field: "trim", .. }));
    }

    #[test]
    fn test_plan_rejects_too_short_clip() {
        let video = handle(30.0, 1920, 1080);
        let mut p = params();
        p.trim = TrimWindow {
            start: 5.0,
            end: 5.2,
        };
        let err = plan_transform(&video, None, &p, BufferAudioPolicy::Silence, None).unwrap_err();
        assert!(matches!(err, EngineError::Validation { field: "trim", .. }));
    }

    #[test]
    fn test_plan_tolerates_metadata_rounding_at_the_end() {
        let video = handle(10.0, 1920, 1080);
        let mut p = params();
        p.trim = TrimWindow {
            start: 0.0,
            end: 10.05,
        };
        let plan = plan_transform(&video, None, &p, BufferAudioPolicy::Silence, None).unwrap();
        assert_eq!(plan.trim.end, 10.0);
    }

    #[test]
    fn test_plan_clamps_buffer() {
        let video = handle(30.0, 1920, 1080);
        let mut p = params();
        p.buffer_secs = 12.0;
        let plan = plan_transform(&video, None, &p, BufferAudioPolicy::Silence, None).unwrap();
        assert_eq!(plan.buffer_secs, MAX_BUFFER_SECS);
    }

    #[test]
    fn test_plan_defaults_audio_trim_to_full_source() {
        let video = handle(30.0, 1920, 1080);
        let audio = handle(12.0, 0, 0);
        let plan =
            plan_transform(&video, Some(&audio), &params(), BufferAudioPolicy::Silence, None).unwrap();
        let w = plan.audio_trim.unwrap();
        assert_eq!(w.start, 0.0);
        assert_eq!(w.end, 12.0);
    }

    #[test]
    fn test_plan_requires_image_for_static_mode() {
        let video = handle(30.0, 1920, 1080);
        let mut p = params();
        p.use_static_image = true;
        let err = plan_transform(&video, None, &p, BufferAudioPolicy::Silence, None).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation {
                field: "use_static_image",
                ..
            }
        ));
        let plan = plan_transform(
            &video,
            None,
            &p,
            BufferAudioPolicy::Silence,
            Some(PathBuf::from("/tmp/alert.png")),
        )
        .unwrap();
        assert!(plan.static_image.is_some());
    }

    #[test]
    fn test_plan_rejects_audio_trim_without_audio_source() {
        let video = handle(30.0, 1920, 1080);
        let mut p = params();
        p.audio_trim = Some(TrimWindow {
            start: 0.0,
            end: 4.0,
        });
        let err = plan_transform(&video, None, &p, BufferAudioPolicy::Silence, None).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation {
                field: "audio_trim",
                ..
            }
        ));
    }
}
