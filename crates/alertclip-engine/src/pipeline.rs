//! Pipeline execution.
//!
//! Runs a validated `TransformPlan` as a fixed sequence of external
//! tool invocations, each consuming the previous stage's output file.
//! Every intermediate lands in the job's processing directory;
//! only the final mux writes under the output root. Progress is the
//! weighted sum of per-stage progress, so it rises monotonically even
//! when a stage is skipped.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, info};

use alertclip_media::{
    build_loudnorm_filter, fsops, measurement_filter, parse_loudnorm_measurement,
    FfmpegProgressParser, NullProgressParser, ToolCommand, ToolRunner, Toolchain,
};
use alertclip_models::BufferAudioPolicy;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::plan::TransformPlan;

/// Stage labels and their share of overall progress.
const STAGE_WEIGHTS: &[(&str, u8)] = &[
    ("trim", 10),
    ("visual", 25),
    ("audio_extract", 10),
    ("normalize", 15),
    ("buffer", 10),
    ("encode", 30),
];

/// Intermediate encodes stay near-lossless; only the final mux
/// compresses for delivery.
const INTERMEDIATE_CRF: &str = "18";
const FINAL_CRF: &str = "23";
const FINAL_PRESET: &str = "medium";
const FINAL_AUDIO_BITRATE: &str = "192k";

/// Executes transform plans. Stateless; one instance serves all jobs.
#[derive(Clone)]
pub struct PipelineExecutor {
    tools: Toolchain,
    config: EngineConfig,
}

struct StageReporter<F> {
    on_progress: F,
    /// Percent accumulated by completed stages
    base: u8,
}

impl<F: Fn(&'static str, u8) + Send + Sync + Clone + 'static> StageReporter<F> {
    fn stage_start(&self, stage: &'static str) {
        (self.on_progress)(stage, self.base);
    }

    /// Per-invocation callback scaling tool percent into the stage's
    /// weight band.
    fn tool_callback(&self, stage: &'static str, weight: u8) -> impl FnMut(f64) + Send + 'static {
        let on_progress = self.on_progress.clone();
        let base = self.base;
        move |pct: f64| {
            let scaled = base as f64 + weight as f64 * pct.clamp(0.0, 100.0) / 100.0;
            on_progress(stage, scaled as u8);
        }
    }

    fn stage_done(&mut self, stage: &'static str, weight: u8) {
        self.base = (self.base + weight).min(100);
        (self.on_progress)(stage, self.base);
    }
}

fn weight_of(stage: &str) -> u8 {
    STAGE_WEIGHTS
        .iter()
        .find(|(name, _)| *name == stage)
        .map(|(_, w)| *w)
        .unwrap_or(0)
}

impl PipelineExecutor {
    pub fn new(tools: Toolchain, config: EngineConfig) -> Self {
        Self { tools, config }
    }

    /// Run the full pipeline for `job_id`, returning the output path.
    ///
    /// `on_progress` receives `(stage_label, overall_percent)` after
    /// every meaningful change. Cancellation via `cancel_rx` kills the
    /// in-flight tool and surfaces as `EngineError::Cancelled`.
    pub async fn execute<F>(
        &self,
        job_id: &str,
        plan: &TransformPlan,
        cancel_rx: watch::Receiver<bool>,
        on_progress: F,
    ) -> EngineResult<PathBuf>
    where
        F: Fn(&'static str, u8) + Send + Sync + Clone + 'static,
    {
        let started = Instant::now();
        let work_dir = self.config.processing_root.join(job_id);
        fsops::ensure_dir(&work_dir)
            .await
            .map_err(|e| EngineError::from_stage("prepare", e))?;
        fsops::ensure_dir(&self.config.output_root)
            .await
            .map_err(|e| EngineError::from_stage("prepare", e))?;

        let mut reporter = StageReporter {
            on_progress,
            base: 0,
        };

        let result = self
            .run_stages(job_id, plan, &work_dir, &cancel_rx, &mut reporter)
            .await;

        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(output) => {
                metrics::counter!("pipeline_runs_total", "outcome" => "complete").increment(1);
                metrics::histogram!("pipeline_duration_seconds").record(elapsed);
                info!(
                    job_id,
                    output = %output.display(),
                    elapsed_secs = format!("{:.1}", elapsed),
                    "Pipeline complete"
                );
            }
            Err(EngineError::Cancelled) => {
                metrics::counter!("pipeline_runs_total", "outcome" => "cancelled").increment(1);
            }
            Err(e) => {
                metrics::counter!("pipeline_runs_total", "outcome" => "error").increment(1);
                info!(job_id, error = %e, "Pipeline failed");
            }
        }
        result
    }

    async fn run_stages<F>(
        &self,
        job_id: &str,
        plan: &TransformPlan,
        work_dir: &Path,
        cancel_rx: &watch::Receiver<bool>,
        reporter: &mut StageReporter<F>,
    ) -> EngineResult<PathBuf>
    where
        F: Fn(&'static str, u8) + Send + Sync + Clone + 'static,
    {
        // Stage 1: trim. Stream copy, so no quality loss. A static
        // image visual never needs the trimmed video and the stage is
        // skipped; the progress band still advances.
        let trimmed = work_dir.join("trimmed.mp4");
        if plan.static_image.is_none() {
            reporter.stage_start("trim");
            let cmd = ToolCommand::ffmpeg(&self.tools.ffmpeg)
                .seek_input(plan.trim.start, &plan.video.path)
                .limit_duration(plan.clip_duration)
                .args(["-c", "copy"])
                .output(&trimmed);
            self.run_ffmpeg("trim", &cmd, plan.clip_duration, cancel_rx, reporter)
                .await?;
        }
        reporter.stage_done("trim", weight_of("trim"));

        // Stage 2: visual transform. Crop and scale the trimmed video,
        // or hold the still image for the clip duration.
        reporter.stage_start("visual");
        let visual = work_dir.join("visual.mp4");
        let cmd = match &plan.static_image {
            Some(image) => ToolCommand::ffmpeg(&self.tools.ffmpeg)
                .args(["-loop", "1"])
                .args(["-framerate", &format!("{:.3}", plan.fps)])
                .input(image)
                .limit_duration(plan.clip_duration)
                .args([
                    "-vf",
                    &format!(
                        "scale={w}:{h}:force_original_aspect_ratio=decrease,\
                         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1",
                        w = plan.output_size.width,
                        h = plan.output_size.height
                    ),
                ])
                .args(["-an", "-c:v", "libx264", "-crf", INTERMEDIATE_CRF])
                .args(["-pix_fmt", "yuv420p"])
                .output(&visual),
            None => ToolCommand::ffmpeg(&self.tools.ffmpeg)
                .input(&trimmed)
                .args([
                    "-vf",
                    &format!(
                        "crop={}:{}:{}:{},scale={}:{},setsar=1",
                        plan.crop.width,
                        plan.crop.height,
                        plan.crop.x,
                        plan.crop.y,
                        plan.output_size.width,
                        plan.output_size.height
                    ),
                ])
                .args(["-an", "-c:v", "libx264", "-crf", INTERMEDIATE_CRF])
                .output(&visual),
        };
        self.run_ffmpeg("visual", &cmd, plan.clip_duration, cancel_rx, reporter)
            .await?;
        reporter.stage_done("visual", weight_of("visual"));

        // Stage 3: audio extraction to PCM, straight from the source
        // so a tail-hold buffer can reach past the trim end.
        reporter.stage_start("audio_extract");
        let audio_wav = work_dir.join("audio.wav");
        let audio_duration = self.extract_audio(plan, &audio_wav, cancel_rx, reporter).await?;
        reporter.stage_done("audio_extract", weight_of("audio_extract"));

        // Stage 4: two-pass loudness normalization on the PCM track.
        let normalized = if plan.normalize {
            reporter.stage_start("normalize");
            let out = work_dir.join("normalized.wav");
            self.normalize_audio(&audio_wav, &out, audio_duration, plan.sample_rate, cancel_rx, reporter)
                .await?;
            out
        } else {
            debug!(job_id, "Normalization disabled, PCM passes through");
            audio_wav.clone()
        };
        reporter.stage_done("normalize", weight_of("normalize"));

        // Stage 5: end-buffer. Hold the final frame and pad the audio.
        let (final_video, final_audio) = if plan.buffer_secs > 0.0 {
            reporter.stage_start("buffer");
            let pair = self
                .apply_end_buffer(plan, work_dir, &visual, &normalized, cancel_rx, reporter)
                .await?;
            pair
        } else {
            (visual.clone(), normalized.clone())
        };
        reporter.stage_done("buffer", weight_of("buffer"));

        // Stage 6: final mux and delivery encode.
        reporter.stage_start("encode");
        let output = self.config.output_root.join(format!("alert_{job_id}.mp4"));
        let cmd = ToolCommand::ffmpeg(&self.tools.ffmpeg)
            .input(&final_video)
            .input(&final_audio)
            .args(["-map", "0:v:0", "-map", "1:a:0"])
            .args(["-c:v", "libx264", "-crf", FINAL_CRF, "-preset", FINAL_PRESET])
            .args(["-pix_fmt", "yuv420p"])
            .args(["-c:a", "aac", "-b:a", FINAL_AUDIO_BITRATE])
            .args(["-ar", &plan.sample_rate.to_string()])
            .args(["-movflags", "+faststart"])
            .limit_duration(plan.output_duration())
            .output(&output);
        self.run_ffmpeg("encode", &cmd, plan.output_duration(), cancel_rx, reporter)
            .await?;
        reporter.stage_done("encode", weight_of("encode"));

        Ok(output)
    }

    /// Decode the relevant audio stream to stereo PCM. Returns the
    /// duration written, which the normalize pass uses for progress.
    async fn extract_audio<F>(
        &self,
        plan: &TransformPlan,
        out: &Path,
        cancel_rx: &watch::Receiver<bool>,
        reporter: &StageReporter<F>,
    ) -> EngineResult<f64>
    where
        F: Fn(&'static str, u8) + Send + Sync + Clone + 'static,
    {
        // A tail-hold buffer keeps real source audio under the frozen
        // frame, so the extraction window extends past the trim end
        // as far as the source allows.
        let tail = match plan.buffer_audio {
            BufferAudioPolicy::HoldTail => plan.buffer_secs,
            BufferAudioPolicy::Silence => 0.0,
        };

        let (source, window) = match (&plan.audio, plan.audio_trim) {
            (Some(audio), Some(w)) => (Some((audio, w.start, audio.duration)), w.duration()),
            _ if plan.video.has_audio => (
                Some((&plan.video, plan.trim.start, plan.video.duration)),
                plan.clip_duration,
            ),
            _ => (None, plan.clip_duration),
        };

        let cmd = match source {
            Some((handle, start, source_duration)) => {
                let wanted = window.min(plan.clip_duration) + tail;
                let duration = wanted.min((source_duration - start).max(0.0));
                ToolCommand::ffmpeg(&self.tools.ffmpeg)
                    .seek_input(start, &handle.path)
                    .limit_duration(duration)
                    .args(["-vn", "-acodec", "pcm_s16le"])
                    .args(["-ar", &plan.sample_rate.to_string(), "-ac", "2"])
                    .output(out)
            }
            // No audio anywhere: synthesize silence for the clip.
            None => ToolCommand::ffmpeg(&self.tools.ffmpeg)
                .args(["-f", "lavfi"])
                .input(format!(
                    "anullsrc=r={}:cl=stereo",
                    plan.sample_rate
                ))
                .limit_duration(plan.clip_duration)
                .args(["-acodec", "pcm_s16le"])
                .output(out),
        };

        let duration = plan.clip_duration + tail;
        self.run_ffmpeg("audio_extract", &cmd, duration, cancel_rx, reporter)
            .await?;
        Ok(duration)
    }

    /// Two-pass EBU R128 loudnorm. The analysis pass prints its JSON
    /// block at info verbosity, so it cannot use the quiet ffmpeg
    /// prefix the other stages share.
    async fn normalize_audio<F>(
        &self,
        input: &Path,
        out: &Path,
        duration: f64,
        sample_rate: u32,
        cancel_rx: &watch::Receiver<bool>,
        reporter: &StageReporter<F>,
    ) -> EngineResult<()>
    where
        F: Fn(&'static str, u8) + Send + Sync + Clone + 'static,
    {
        let measure = ToolCommand::new(&self.tools.ffmpeg)
            .args(["-y", "-v", "info", "-nostats"])
            .input(input)
            .args(["-af", &measurement_filter()])
            .args(["-f", "null", "-"]);
        let output = ToolRunner::new()
            .with_timeout(self.config.stage_timeout)
            .with_cancel(cancel_rx.clone())
            .run(&measure, NullProgressParser, |_| {})
            .await
            .map_err(|e| EngineError::from_stage("normalize", e))?;

        let measured = parse_loudnorm_measurement(&output.tail)
            .map_err(|e| EngineError::from_stage("normalize", e))?;
        debug!(
            input_i = %measured.input_i,
            input_tp = %measured.input_tp,
            "Loudness measured"
        );

        let apply = ToolCommand::ffmpeg(&self.tools.ffmpeg)
            .input(input)
            .args(["-af", &build_loudnorm_filter(&measured)])
            .args(["-ar", &sample_rate.to_string()])
            .output(out);
        self.run_ffmpeg("normalize", &apply, duration, cancel_rx, reporter)
            .await
    }

    /// Extend the visual track by holding its last frame, and pad the
    /// audio track to match.
    async fn apply_end_buffer<F>(
        &self,
        plan: &TransformPlan,
        work_dir: &Path,
        visual: &Path,
        audio: &Path,
        cancel_rx: &watch::Receiver<bool>,
        reporter: &StageReporter<F>,
    ) -> EngineResult<(PathBuf, PathBuf)>
    where
        F: Fn(&'static str, u8) + Send + Sync + Clone + 'static,
    {
        // Grab the last decodable frame. Seeking from the end lands
        // just before EOF regardless of clip length.
        let last_frame = work_dir.join("last_frame.jpg");
        let cmd = ToolCommand::ffmpeg(&self.tools.ffmpeg)
            .args(["-sseof", "-0.1"])
            .input(visual)
            .args(["-frames:v", "1", "-q:v", "1", "-update", "1"])
            .output(&last_frame);
        self.run_quiet("buffer", &cmd, cancel_rx).await?;

        // Encode the frame hold with the same geometry as the clip so
        // the concat is seamless.
        let hold = work_dir.join("buffer.mp4");
        let cmd = ToolCommand::ffmpeg(&self.tools.ffmpeg)
            .args(["-loop", "1"])
            .args(["-framerate", &format!("{:.3}", plan.fps)])
            .input(&last_frame)
            .limit_duration(plan.buffer_secs)
            .args([
                "-vf",
                &format!(
                    "scale={}:{},setsar=1",
                    plan.output_size.width, plan.output_size.height
                ),
            ])
            .args(["-c:v", "libx264", "-crf", INTERMEDIATE_CRF])
            .args(["-pix_fmt", "yuv420p"])
            .output(&hold);
        self.run_quiet("buffer", &cmd, cancel_rx).await?;

        let buffered = work_dir.join("buffered.mp4");
        let cmd = ToolCommand::ffmpeg(&self.tools.ffmpeg)
            .input(visual)
            .input(&hold)
            .args([
                "-filter_complex",
                "[0:v][1:v]concat=n=2:v=1:a=0[v]",
                "-map",
                "[v]",
            ])
            .args(["-c:v", "libx264", "-crf", INTERMEDIATE_CRF])
            .output(&buffered);
        self.run_ffmpeg("buffer", &cmd, plan.output_duration(), cancel_rx, reporter)
            .await?;

        let padded = work_dir.join("padded.wav");
        let cmd = match plan.buffer_audio {
            // Splice digital silence after the clip audio.
            BufferAudioPolicy::Silence => ToolCommand::ffmpeg(&self.tools.ffmpeg)
                .input(audio)
                .args(["-f", "lavfi"])
                .args(["-t", &format!("{:.3}", plan.buffer_secs)])
                .input(format!("anullsrc=r={}:cl=stereo", plan.sample_rate))
                .args([
                    "-filter_complex",
                    "[0:a][1:a]concat=n=2:v=0:a=1[a]",
                    "-map",
                    "[a]",
                ])
                .output(&padded),
            // The extraction stage already pulled the source tail;
            // apad guarantees full length when the source ran out.
            BufferAudioPolicy::HoldTail => ToolCommand::ffmpeg(&self.tools.ffmpeg)
                .input(audio)
                .args([
                    "-af",
                    &format!("apad=whole_dur={:.3}", plan.output_duration()),
                ])
                .output(&padded),
        };
        self.run_quiet("buffer", &cmd, cancel_rx).await?;

        Ok((buffered, padded))
    }

    /// Run one ffmpeg invocation with live stage progress.
    async fn run_ffmpeg<F>(
        &self,
        stage: &'static str,
        cmd: &ToolCommand,
        expected_duration: f64,
        cancel_rx: &watch::Receiver<bool>,
        reporter: &StageReporter<F>,
    ) -> EngineResult<()>
    where
        F: Fn(&'static str, u8) + Send + Sync + Clone + 'static,
    {
        let started = Instant::now();
        let mut callback = reporter.tool_callback(stage, weight_of(stage));
        ToolRunner::new()
            .with_timeout(self.config.stage_timeout)
            .with_cancel(cancel_rx.clone())
            .run(cmd, FfmpegProgressParser::new(expected_duration), move |u| {
                callback(u.percent)
            })
            .await
            .map_err(|e| EngineError::from_stage(stage, e))?;
        metrics::histogram!("pipeline_stage_seconds", "stage" => stage)
            .record(started.elapsed().as_secs_f64());
        Ok(())
    }

    /// Run a short invocation whose progress is not worth reporting.
    async fn run_quiet(
        &self,
        stage: &'static str,
        cmd: &ToolCommand,
        cancel_rx: &watch::Receiver<bool>,
    ) -> EngineResult<()> {
        ToolRunner::new()
            .with_timeout(self.config.stage_timeout)
            .with_cancel(cancel_rx.clone())
            .run(cmd, NullProgressParser, |_| {})
            .await
            .map_err(|e| EngineError::from_stage(stage, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_stage_weights_sum_to_hundred() {
        let total: u32 = STAGE_WEIGHTS.iter().map(|(_, w)| *w as u32).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_reporter_is_monotone_across_stages() {
        let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |_stage: &'static str, pct: u8| {
                seen.lock().unwrap().push(pct);
            }
        };
        let mut reporter = StageReporter {
            on_progress: sink,
            base: 0,
        };

        for &(stage, weight) in STAGE_WEIGHTS {
            reporter.stage_start(stage);
            let mut cb = reporter.tool_callback(stage, weight);
            cb(30.0);
            cb(75.0);
            reporter.stage_done(stage, weight);
        }

        let seen = seen.lock().unwrap();
        assert_eq!(*seen.last().unwrap(), 100);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {seen:?}");
    }

    #[test]
    fn test_skipped_stage_still_advances_base() {
        let mut reporter = StageReporter {
            on_progress: |_: &'static str, _: u8| {},
            base: 0,
        };
        // Skip trim entirely, as the static-image path does.
        reporter.stage_done("trim", weight_of("trim"));
        assert_eq!(reporter.base, 10);
    }

    #[test]
    fn test_tool_callback_clamps_overshoot() {
        let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |_: &'static str, pct: u8| seen.lock().unwrap().push(pct)
        };
        let reporter = StageReporter {
            on_progress: sink,
            base: 90,
        };
        let mut cb = reporter.tool_callback("encode", 10);
        cb(250.0);
        assert_eq!(*seen.lock().unwrap().last().unwrap(), 100);
    }
}
