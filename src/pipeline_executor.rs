//! Pipeline executor for vspipe | ffmpeg.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use crate::dependency_locator::DependencyLocator;
use crate::models::{LogLevel, ProgressInfo, Rational, VideoJob};
use crate::progress_reporter::ProgressReporter;

/// How long a child gets to exit after SIGTERM before it is killed.
#[cfg(unix)]
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Executes the vspipe | ffmpeg pipeline.
pub struct PipelineExecutor {
    reporter: ProgressReporter,
    deps: DependencyLocator,
    vspipe_process: Option<Child>,
    ffmpeg_process: Option<Child>,
}

impl PipelineExecutor {
    pub fn new(reporter: ProgressReporter, deps: DependencyLocator) -> Self {
        Self {
            reporter,
            deps,
            vspipe_process: None,
            ffmpeg_process: None,
        }
    }

    /// Encode the rendered script into the job's output file.
    ///
    /// `frame_multiplier` is the output/input frame ratio (interpolation), used to turn the
    /// source frame count into the expected output frame count.
    pub fn execute<F>(
        &mut self,
        script_path: &Path,
        job: &VideoJob,
        frame_multiplier: Rational,
        on_cancel: F,
    ) -> Result<()>
    where
        F: Fn() -> bool,
    {
        let vspipe_path = self.deps.vspipe_path()?;
        let ffmpeg_path = self.deps.ffmpeg_path()?;
        let env = self.deps.build_environment();

        self.reporter.send_log(
            LogLevel::Debug,
            &format!("vspipe: {:?}, ffmpeg: {:?}", vspipe_path, ffmpeg_path),
        );
        self.reporter.send_log(
            LogLevel::Debug,
            &format!("PYTHONPATH: {:?}", env.get("PYTHONPATH")),
        );

        let mut vspipe = Command::new(&vspipe_path)
            .args(["-c", "y4m", script_path.to_string_lossy().as_ref(), "-"])
            .envs(&env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start vspipe: {:?}", vspipe_path))?;

        let vspipe_stdout = vspipe.stdout.take().context("Failed to get vspipe stdout")?;
        let vspipe_stderr = vspipe.stderr.take().context("Failed to get vspipe stderr")?;

        let ffmpeg_args = build_ffmpeg_args(job);
        self.reporter.send_log(
            LogLevel::Debug,
            &format!("ffmpeg {}", ffmpeg_args.join(" ")),
        );

        let mut ffmpeg = Command::new(&ffmpeg_path)
            .args(&ffmpeg_args)
            .envs(&env)
            .stdin(vspipe_stdout)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start ffmpeg: {:?}", ffmpeg_path))?;

        let ffmpeg_stderr = ffmpeg.stderr.take().context("Failed to get ffmpeg stderr")?;

        self.vspipe_process = Some(vspipe);
        self.ffmpeg_process = Some(ffmpeg);

        // Source frame count reported by the script on stderr
        let total_frames = Arc::new(AtomicI32::new(0));
        let total_frames_clone = total_frames.clone();
        let reporter_clone = self.reporter.clone();

        let vspipe_thread = thread::spawn(move || {
            let reader = BufReader::new(vspipe_stderr);
            for line in reader.lines().map_while(Result::ok) {
                reporter_clone.send_log(LogLevel::Debug, &format!("vspipe stderr: {}", line));
                if let Some(frames) = parse_input_frames(&line) {
                    total_frames_clone.store(frames, Ordering::SeqCst);
                }
            }
        });

        let reporter = self.reporter.clone();
        let progress_interval = Duration::from_millis(500);
        let mut last_progress_time = Instant::now();
        let mut current_frame = 0i32;
        let mut current_fps = 0.0f64;

        let ffmpeg_reader = BufReader::new(ffmpeg_stderr);
        for line in ffmpeg_reader.lines().map_while(Result::ok) {
            if on_cancel() {
                self.terminate();
                remove_partial_output(&job.output_path);
                bail!("Job cancelled");
            }

            if let Some(frame) = parse_frame(&line) {
                current_frame = frame;
            }
            if let Some(fps) = parse_fps(&line) {
                current_fps = fps;
            }

            // Throttled
            if last_progress_time.elapsed() >= progress_interval {
                let source_total = match total_frames.load(Ordering::SeqCst) {
                    0 => job.video.total_frames.unwrap_or(0),
                    n => n,
                };
                let effective_total = expected_output_frames(source_total, frame_multiplier);
                reporter.send_progress(&ProgressInfo::estimate(
                    current_frame,
                    effective_total,
                    current_fps,
                ));
                last_progress_time = Instant::now();
            }
        }

        let _ = vspipe_thread.join();

        let vspipe_status = self
            .vspipe_process
            .as_mut()
            .map(|p| p.wait())
            .transpose()
            .context("Failed to wait for vspipe")?;

        let ffmpeg_status = self
            .ffmpeg_process
            .as_mut()
            .map(|p| p.wait())
            .transpose()
            .context("Failed to wait for ffmpeg")?;

        // Allow SIGTERM (130), SIGPIPE (141)
        if let Some(status) = vspipe_status {
            let code = status.code().unwrap_or(-1);
            if code != 0 && code != 130 && code != 141 {
                bail!("vspipe exited with code {}", code);
            }
        }

        if let Some(status) = ffmpeg_status {
            let code = status.code().unwrap_or(-1);
            if code != 0 && code != 130 && code != 141 {
                bail!("ffmpeg exited with code {}", code);
            }
        }

        Ok(())
    }

    /// Terminate both processes.
    fn terminate(&mut self) {
        for child in [self.vspipe_process.as_mut(), self.ffmpeg_process.as_mut()]
            .into_iter()
            .flatten()
        {
            terminate_child(child);
        }
    }
}

impl Drop for PipelineExecutor {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// SIGTERM first on Unix so ffmpeg can finalize, then kill.
fn terminate_child(child: &mut Child) {
    if matches!(child.try_wait(), Ok(Some(_))) {
        return;
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).is_ok() {
            let deadline = Instant::now() + TERMINATE_GRACE;
            while Instant::now() < deadline {
                if matches!(child.try_wait(), Ok(Some(_))) {
                    return;
                }
                thread::sleep(Duration::from_millis(50));
            }
        }
    }

    let _ = child.kill();
    let _ = child.wait();
}

fn remove_partial_output(output_path: &str) {
    let path = Path::new(output_path);
    if path.exists() {
        let _ = fs::remove_file(path);
    }
}

/// Build FFmpeg command-line arguments.
///
/// Video comes from the pipe; attachments, audio and subtitles are copied from the source.
pub fn build_ffmpeg_args(job: &VideoJob) -> Vec<String> {
    let settings = &job.encoding_settings;
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-f".into(),
        "yuv4mpegpipe".into(),
        "-i".into(),
        "-".into(),
        "-i".into(),
        job.input_path.clone(),
        "-progress".into(),
        "pipe:2".into(),
        "-map".into(),
        "0:v".into(),
        "-c:v".into(),
        settings.codec.ffmpeg_codec().into(),
    ];
    args.extend(settings.codec.quality_args(settings));
    args.extend(
        [
            "-max_interleave_delta", "0",
            "-map", "1:t?", "-map", "1:a?", "-map", "1:s?",
            "-c:t", "copy", "-c:a", "copy", "-c:s", "copy",
        ]
        .map(String::from),
    );

    if !settings.custom_ffmpeg_args.is_empty() {
        args.extend(settings.custom_ffmpeg_args.split_whitespace().map(String::from));
    }

    args.push(job.output_path.clone());
    args
}

/// Frame count from `INPUT_INFO:frames=1234,fps_num=25,fps_den=1`.
fn parse_input_frames(line: &str) -> Option<i32> {
    line.strip_prefix("INPUT_INFO:")?
        .split(',')
        .find_map(|part| part.strip_prefix("frames="))
        .and_then(|n| n.trim().parse().ok())
}

/// `frame=  123 fps= 45.0 ...` or the `-progress` form `frame=123`.
fn parse_frame(line: &str) -> Option<i32> {
    let rest = line.strip_prefix("frame=")?;
    rest.split_whitespace().next()?.parse().ok()
}

fn parse_fps(line: &str) -> Option<f64> {
    let start = line.find("fps=")? + "fps=".len();
    line[start..].split_whitespace().next()?.parse().ok()
}

fn expected_output_frames(source_frames: i32, multiplier: Rational) -> i32 {
    if source_frames <= 0 {
        return 0;
    }
    let frames = source_frames as u128 * multiplier.numerator() as u128
        / multiplier.denominator().max(1) as u128;
    frames.min(i32::MAX as u128) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EncodingSettings, VideoCodec, VideoInfo};
    use uuid::Uuid;

    fn job() -> VideoJob {
        VideoJob {
            id: Uuid::new_v4(),
            input_path: "input.mkv".to_string(),
            output_path: "output.mkv".to_string(),
            slot: 1,
            config_path: "worker.conf".to_string(),
            video: VideoInfo {
                width: 1280,
                height: 720,
                fps_num: 24,
                fps_den: 1,
                format: Default::default(),
                color_range: None,
                matrix: None,
                total_frames: Some(100),
            },
            encoding_settings: EncodingSettings::default(),
        }
    }

    #[test]
    fn test_build_ffmpeg_args() {
        let mut job = job();
        job.encoding_settings.codec = VideoCodec::H264;
        job.encoding_settings.custom_ffmpeg_args = "-pix_fmt yuv420p10le".to_string();
        let args = build_ffmpeg_args(&job);
        let joined = args.join(" ");

        assert!(joined.starts_with("-y -f yuv4mpegpipe -i - -i input.mkv"));
        assert!(joined.contains("-map 0:v -c:v libx264 -crf 18 -preset medium"));
        assert!(joined.contains("-map 1:t? -map 1:a? -map 1:s? -c:t copy -c:a copy -c:s copy"));
        assert!(joined.ends_with("-pix_fmt yuv420p10le output.mkv"));
    }

    #[test]
    fn test_progress_parsing() {
        assert_eq!(parse_frame("frame=  123 fps= 45.0 q=28.0"), Some(123));
        assert_eq!(parse_frame("frame=77"), Some(77));
        assert_eq!(parse_frame("fps=45.0"), None);
        assert_eq!(parse_fps("fps=45.50"), Some(45.5));
        assert_eq!(parse_fps("frame=1 fps=12.0 q=1"), Some(12.0));
        assert_eq!(
            parse_input_frames("INPUT_INFO:frames=1234,fps_num=25,fps_den=1"),
            Some(1234)
        );
        assert_eq!(parse_input_frames("Script evaluation failed"), None);
    }

    #[test]
    fn test_expected_output_frames() {
        assert_eq!(expected_output_frames(100, Rational::integer(1)), 100);
        assert_eq!(expected_output_frames(100, Rational::integer(2)), 200);
        assert_eq!(expected_output_frames(100, Rational::new(5, 2).unwrap()), 250);
        assert_eq!(expected_output_frames(0, Rational::integer(2)), 0);
    }
}
