use crate::loudness::LoudnessProfile;
use std::ffi::{OsStr, OsString};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use strum_macros::Display;

/// Inputs shorter than this many seconds are padded before measurement
pub const MIN_DURATION_SECS: f64 = 3.0;
/// Sample rate of every corrected output
pub const OUTPUT_SAMPLE_RATE: u32 = 48_000;

/// Locations of the ffmpeg and ffprobe executables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl ToolPaths {
    /// Defaults, overridden by `FFMPEG_PATH` and `FFPROBE_PATH` when set
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            ffmpeg: std::env::var_os("FFMPEG_PATH").map_or(default.ffmpeg, PathBuf::from),
            ffprobe: std::env::var_os("FFPROBE_PATH").map_or(default.ffprobe, PathBuf::from),
        }
    }
}

/// Pipeline step an invocation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Step {
    AudioProbe,
    DurationProbe,
    Pad,
    Measure,
    Change,
    Unpad,
}

/// How the captured output of an invocation is interpreted
#[derive(Debug, Clone, PartialEq)]
pub enum PostProcess {
    Nothing,
    Measurements,
    Duration,
    AudioStreams,
    /// Deletes the given file once the tool succeeded
    RemoveFile(PathBuf),
}

/// One external tool call, not executed until handed to a runner
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    step: Step,
    program: PathBuf,
    args: Vec<OsString>,
    post_process: PostProcess,
}

impl Invocation {
    #[inline]
    pub fn step(&self) -> Step {
        self.step
    }

    #[inline]
    pub fn program(&self) -> &Path {
        &self.program
    }

    #[inline]
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    #[inline]
    pub fn post_process(&self) -> &PostProcess {
        &self.post_process
    }

    /// Shell-like rendering, paths quoted, for logs
    pub fn command_line(&self) -> String {
        let mut line = self.program.to_string_lossy().into_owned();
        let mut quote_next = false;
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if quote_next {
                let _ = write!(line, " \"{}\"", arg);
            } else {
                let _ = write!(line, " {}", arg);
            }
            quote_next = arg == "-i" || arg == "-y";
        }
        line
    }
}

struct Builder {
    step: Step,
    program: PathBuf,
    args: Vec<OsString>,
}

impl Builder {
    fn new(step: Step, program: &Path) -> Self {
        Self {
            step,
            program: program.to_path_buf(),
            args: Vec::new(),
        }
    }

    fn ffmpeg(step: Step, tools: &ToolPaths, input: &Path) -> Self {
        Self::new(step, &tools.ffmpeg)
            .arg("-hide_banner")
            .arg("-i")
            .arg(input)
    }

    fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    fn overwrite(self, output: &Path) -> Self {
        self.arg("-y").arg(output)
    }

    fn null_output(self) -> Self {
        self.arg("-f").arg("null").arg("-")
    }

    fn finish(self, post_process: PostProcess) -> Invocation {
        Invocation {
            step: self.step,
            program: self.program,
            args: self.args,
            post_process,
        }
    }
}

/// Appends `key=value` for present values only
fn push_option(filter: &mut String, key: &str, value: Option<f64>) {
    if let Some(value) = value {
        if !filter.ends_with('=') {
            filter.push(':');
        }
        let _ = write!(filter, "{}={}", key, value);
    }
}

fn loudnorm_filter(target: &LoudnessProfile, measured: Option<&LoudnessProfile>) -> String {
    let mut filter = String::from("loudnorm=");
    push_option(&mut filter, "I", target.input_i);
    push_option(&mut filter, "LRA", target.input_lra);
    push_option(&mut filter, "tp", target.input_tp);
    if let Some(measured) = measured {
        push_option(&mut filter, "measured_I", measured.input_i);
        push_option(&mut filter, "measured_LRA", measured.input_lra);
        push_option(&mut filter, "measured_tp", measured.input_tp);
        push_option(&mut filter, "measured_thresh", measured.input_thresh);
        push_option(&mut filter, "offset", measured.target_offset);
    }
    filter
}

/// First loudnorm pass: prints a JSON report, discards the audio
pub fn measure_command(tools: &ToolPaths, input: &Path, target: &LoudnessProfile) -> Invocation {
    let mut filter = loudnorm_filter(target, None);
    if !filter.ends_with('=') {
        filter.push(':');
    }
    filter.push_str("print_format=json");
    Builder::ffmpeg(Step::Measure, tools, input)
        .arg("-af")
        .arg(filter)
        .null_output()
        .finish(PostProcess::Measurements)
}

/// Correction pass, two-pass when `measured` is given
pub fn change_command(
    tools: &ToolPaths,
    input: &Path,
    output: &Path,
    target: &LoudnessProfile,
    measured: Option<&LoudnessProfile>,
) -> Invocation {
    Builder::ffmpeg(Step::Change, tools, input)
        .arg("-af")
        .arg(loudnorm_filter(target, measured))
        .arg("-ar")
        .arg(OUTPUT_SAMPLE_RATE.to_string())
        .overwrite(output)
        .finish(PostProcess::Nothing)
}

pub fn duration_probe_command(tools: &ToolPaths, input: &Path) -> Invocation {
    Builder::ffmpeg(Step::DurationProbe, tools, input)
        .null_output()
        .finish(PostProcess::Duration)
}

/// Extends `input` with silence to exactly [`MIN_DURATION_SECS`]
pub fn pad_command(tools: &ToolPaths, input: &Path, temporary: &Path) -> Invocation {
    Builder::ffmpeg(Step::Pad, tools, input)
        .arg("-af")
        .arg(format!("apad,atrim=0:{}", MIN_DURATION_SECS))
        .overwrite(temporary)
        .finish(PostProcess::Nothing)
}

/// Trims `padded` back to `original_duration`, then deletes `remove`
pub fn unpad_command(
    tools: &ToolPaths,
    padded: &Path,
    output: &Path,
    original_duration: f64,
    remove: &Path,
) -> Invocation {
    Builder::ffmpeg(Step::Unpad, tools, padded)
        .arg("-af")
        .arg(format!("apad,atrim=0:{}", original_duration))
        .overwrite(output)
        .finish(PostProcess::RemoveFile(remove.to_path_buf()))
}

pub fn audio_stream_probe_command(tools: &ToolPaths, input: &Path) -> Invocation {
    Builder::new(Step::AudioProbe, &tools.ffprobe)
        .arg("-i")
        .arg(input)
        .arg("-show_streams")
        .arg("-select_streams")
        .arg("a")
        .arg("-loglevel")
        .arg("error")
        .finish(PostProcess::AudioStreams)
}

/// `dirname(output)/__temporary.<basename(output)>`
pub fn temporary_path(output: &Path) -> PathBuf {
    let mut name = OsString::from("__temporary.");
    name.push(output.file_name().unwrap_or_default());
    output.with_file_name(name)
}
