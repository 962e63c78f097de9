//! Pipeline tests against a scripted stand-in for ffmpeg/ffprobe

use ffmpeg_loudnorm::runner::ProcessOutput;
use ffmpeg_loudnorm::{
    Error, Executor, FailureKind, FolderOptions, LoudnessRequest, LoudnessTarget,
    NormalizeRequest, Normalizer, ToolPaths, normalize_folder,
};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const MEASURE_REPORT: &str = "\
[Parsed_loudnorm_0 @ 0x55d0c8d2a8c0]
{
\t\"input_i\" : \"-25.05\",
\t\"input_tp\" : \"-4.90\",
\t\"input_lra\" : \"1.80\",
\t\"input_thresh\" : \"-35.24\",
\t\"output_i\" : \"-25.02\",
\t\"output_tp\" : \"-5.12\",
\t\"output_lra\" : \"1.50\",
\t\"output_thresh\" : \"-35.13\",
\t\"normalization_type\" : \"dynamic\",
\t\"target_offset\" : \"0.02\"
}
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    AudioProbe,
    DurationProbe,
    Pad,
    Measure,
    Change,
    Unpad,
}

#[derive(Debug, Clone)]
struct Script {
    audio_streams: usize,
    duration: &'static str,
    fail: Option<Call>,
    /// Restricts `fail` to calls with an argument containing this text
    fail_for: Option<&'static str>,
    /// Unpad deletes its own input, as if something raced the cleanup
    unpad_removes_input: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            audio_streams: 1,
            duration: "00:00:10.00",
            fail: None,
            fail_for: None,
            unpad_removes_input: false,
        }
    }
}

/// Fakes ffmpeg/ffprobe: records each call and creates every `-y` output
struct FakeTools {
    script: Script,
    calls: Mutex<Vec<(Call, Vec<String>)>>,
}

impl FakeTools {
    fn new(script: Script) -> Self {
        Self {
            script,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().iter().map(|(c, _)| *c).collect()
    }

    fn args_of(&self, call: Call) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(c, _)| *c == call)
            .map(|(_, args)| args.clone())
            .unwrap_or_default()
    }

    fn classify(program: &Path, args: &[String]) -> Call {
        if program.ends_with("ffprobe") {
            return Call::AudioProbe;
        }
        match args.iter().find(|a| a.starts_with("loudnorm=") || a.starts_with("apad")) {
            Some(filter) if filter.contains("print_format=json") => Call::Measure,
            Some(filter) if filter.starts_with("loudnorm=") => Call::Change,
            Some(filter) if filter == "apad,atrim=0:3" => Call::Pad,
            Some(_) => Call::Unpad,
            None => Call::DurationProbe,
        }
    }
}

impl Executor for FakeTools {
    async fn execute(&self, program: &Path, args: &[OsString]) -> io::Result<ProcessOutput> {
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        let call = Self::classify(program, &args);
        self.calls.lock().unwrap().push((call, args.clone()));

        let targeted = self
            .script
            .fail_for
            .is_none_or(|name| args.iter().any(|a| a.contains(name)));
        if self.script.fail == Some(call) && targeted {
            return Ok(ProcessOutput {
                success: false,
                code: Some(1),
                stdout: String::new(),
                stderr: format!("{:?} went wrong\n", call),
            });
        }

        if let Some(pos) = args.iter().position(|a| a == "-y") {
            std::fs::write(&args[pos + 1], b"media")?;
        }
        if call == Call::Unpad && self.script.unpad_removes_input {
            std::fs::remove_file(&args[2])?;
        }

        let (stdout, stderr) = match call {
            Call::AudioProbe => ("[STREAM]\ncodec_type=audio\n[/STREAM]\n".repeat(self.script.audio_streams), String::new()),
            Call::DurationProbe => (
                String::new(),
                format!("  Duration: {}, start: 0.000000, bitrate: 128 kb/s\n", self.script.duration),
            ),
            Call::Measure => (String::new(), MEASURE_REPORT.to_string()),
            _ => (String::new(), String::new()),
        };
        Ok(ProcessOutput {
            success: true,
            code: Some(0),
            stdout,
            stderr,
        })
    }
}

struct Fixture {
    dir: TempDir,
    normalizer: Normalizer<FakeTools>,
}

impl Fixture {
    fn new(script: Script) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("in.mp4"), b"media").unwrap();
        Self {
            dir,
            normalizer: Normalizer::with_executor(FakeTools::new(script), ToolPaths::default()),
        }
    }

    fn input(&self) -> PathBuf {
        self.dir.path().join("in.mp4")
    }

    fn output(&self) -> PathBuf {
        self.dir.path().join("out.mp4")
    }

    fn temporary(&self) -> PathBuf {
        self.dir.path().join("__temporary.out.mp4")
    }

    fn request(&self, method: &str, target: LoudnessTarget) -> NormalizeRequest {
        NormalizeRequest {
            input: self.input(),
            output: self.output(),
            loudness: LoudnessRequest {
                normalization: method.to_string(),
                target,
            },
            verbose: false,
        }
    }

    fn tools(&self) -> &FakeTools {
        self.normalizer.executor()
    }
}

fn ebu_target() -> LoudnessTarget {
    LoudnessTarget {
        input_i: Some((-23.0).into()),
        input_lra: Some(7.0.into()),
        input_tp: Some((-2.0).into()),
        ..Default::default()
    }
}

fn filter(args: &[String]) -> String {
    let pos = args.iter().position(|a| a == "-af").expect("has a filter");
    args[pos + 1].clone()
}

#[tokio::test]
async fn ebu_measures_then_corrects_two_pass() {
    let fx = Fixture::new(Script::default());
    let done = fx.normalizer.normalize(fx.request("ebuR128", ebu_target())).await.unwrap();

    assert!(done.normalized);
    assert_eq!(
        fx.tools().calls(),
        vec![Call::AudioProbe, Call::DurationProbe, Call::Measure, Call::Change]
    );
    assert_eq!(
        filter(&fx.tools().args_of(Call::Change)),
        "loudnorm=I=-23:LRA=7:tp=-2:measured_I=-25.05:measured_LRA=1.8:measured_tp=-4.9:measured_thresh=-35.24:offset=0.02"
    );
    let measured = done.info.measured.unwrap();
    assert_eq!(measured.input_i, Some(-25.05));
    assert!(!done.info.padded);
    assert!(fx.output().exists());
}

#[tokio::test]
async fn no_audio_stream_stops_before_any_work() {
    let fx = Fixture::new(Script {
        audio_streams: 0,
        ..Default::default()
    });
    let failure = fx.normalizer.normalize(fx.request("ebuR128", ebu_target())).await.unwrap_err();

    assert!(!failure.normalized);
    assert_eq!(failure.kind, FailureKind::NoAudioStream);
    assert_eq!(fx.tools().calls(), vec![Call::AudioProbe]);
}

#[tokio::test]
async fn failed_audio_probe_counts_as_no_audio() {
    let fx = Fixture::new(Script {
        fail: Some(Call::AudioProbe),
        ..Default::default()
    });
    let failure = fx.normalizer.normalize(fx.request("peak", ebu_target())).await.unwrap_err();

    assert_eq!(failure.kind, FailureKind::NoAudioStream);
    assert_eq!(fx.tools().calls(), vec![Call::AudioProbe]);
}

#[tokio::test]
async fn unknown_method_invokes_nothing() {
    let fx = Fixture::new(Script::default());
    let failure = fx.normalizer.normalize(fx.request("lufs", ebu_target())).await.unwrap_err();

    assert_eq!(failure.kind, FailureKind::UnsupportedMethod);
    assert!(failure.error.contains("lufs"));
    assert!(failure.info.is_none());
    assert!(fx.tools().calls().is_empty());
}

#[tokio::test]
async fn short_input_is_padded_and_trimmed_back() {
    let fx = Fixture::new(Script {
        duration: "00:00:01.50",
        ..Default::default()
    });
    let done = fx.normalizer.normalize(fx.request("ebuR128", ebu_target())).await.unwrap();

    assert_eq!(
        fx.tools().calls(),
        vec![
            Call::AudioProbe,
            Call::DurationProbe,
            Call::Pad,
            Call::Measure,
            Call::Change,
            Call::Unpad
        ]
    );
    let temporary = fx.temporary().to_string_lossy().into_owned();
    let pad = fx.tools().args_of(Call::Pad);
    assert_eq!(pad.last(), Some(&temporary));
    let change = fx.tools().args_of(Call::Change);
    assert_eq!(change[2], temporary);
    let unpad = fx.tools().args_of(Call::Unpad);
    assert_eq!(filter(&unpad), "apad,atrim=0:1.5");
    assert_eq!(unpad[2], temporary);
    assert_eq!(unpad.last(), Some(&fx.output().to_string_lossy().into_owned()));

    assert_eq!(done.info.input, fx.input());
    assert_eq!(done.info.output, fx.output());
    assert!(done.info.padded);
    assert_eq!(done.info.original_duration, Some(1.5));
    assert!(!fx.temporary().exists());
    assert!(fx.output().exists());
}

#[tokio::test]
async fn failed_measurement_falls_back_to_single_pass() {
    let fx = Fixture::new(Script {
        fail: Some(Call::Measure),
        ..Default::default()
    });
    let done = fx.normalizer.normalize(fx.request("ebuR128", ebu_target())).await.unwrap();

    assert!(done.normalized);
    assert_eq!(done.info.measured, None);
    assert_eq!(
        filter(&fx.tools().args_of(Call::Change)),
        "loudnorm=I=-23:LRA=7:tp=-2"
    );
}

#[tokio::test]
async fn peak_skips_measurement() {
    let fx = Fixture::new(Script::default());
    let target = LoudnessTarget {
        input_i: Some((-10.0).into()),
        input_lra: Some(7.0.into()),
        ..Default::default()
    };
    let done = fx.normalizer.normalize(fx.request("peak", target)).await.unwrap();

    assert_eq!(
        fx.tools().calls(),
        vec![Call::AudioProbe, Call::DurationProbe, Call::Change]
    );
    assert_eq!(filter(&fx.tools().args_of(Call::Change)), "loudnorm=I=-10");
    assert_eq!(done.info.loudness.input_lra, None);
}

#[tokio::test]
async fn out_of_range_target_uses_base_value() {
    let fx = Fixture::new(Script::default());
    let target = LoudnessTarget {
        input_i: Some((-200.0).into()),
        ..Default::default()
    };
    let done = fx.normalizer.normalize(fx.request("ebuR128", target)).await.unwrap();

    assert_eq!(done.info.loudness.input_i, Some(-23.0));
    assert_eq!(done.info.loudness.input_lra, Some(7.0));
    assert_eq!(done.info.loudness.input_tp, Some(-2.0));
}

#[tokio::test]
async fn failed_change_rejects_and_removes_temporary() {
    let fx = Fixture::new(Script {
        duration: "00:00:00.80",
        fail: Some(Call::Change),
        ..Default::default()
    });
    let failure = fx.normalizer.normalize(fx.request("rms", ebu_target())).await.unwrap_err();

    assert_eq!(failure.kind, FailureKind::ToolInvocation);
    assert!(failure.error.contains("Change went wrong"));
    let info = failure.info.unwrap();
    assert!(info.padded);
    assert_eq!(info.input, fx.input());
    assert!(!fx.temporary().exists());
    assert_eq!(
        fx.tools().calls(),
        vec![Call::AudioProbe, Call::DurationProbe, Call::Pad, Call::Change]
    );
}

#[tokio::test]
async fn failed_unpad_rejects_and_removes_temporary() {
    let fx = Fixture::new(Script {
        duration: "00:00:02.00",
        fail: Some(Call::Unpad),
        ..Default::default()
    });
    let failure = fx.normalizer.normalize(fx.request("peak", ebu_target())).await.unwrap_err();

    assert_eq!(failure.kind, FailureKind::ToolInvocation);
    assert!(!fx.temporary().exists());
}

#[tokio::test]
async fn temporary_removed_early_rejects_with_cleanup() {
    let fx = Fixture::new(Script {
        duration: "00:00:01.00",
        unpad_removes_input: true,
        ..Default::default()
    });
    let failure = fx.normalizer.normalize(fx.request("ebuR128", ebu_target())).await.unwrap_err();

    assert_eq!(failure.kind, FailureKind::Cleanup);
    assert!(failure.error.contains("__temporary.out.mp4"));
    let info = failure.info.unwrap();
    assert!(info.padded);
    assert_eq!(info.original_duration, Some(1.0));
    assert!(fx.output().exists());
    assert!(!fx.temporary().exists());
}

#[tokio::test]
async fn failed_duration_probe_rejects() {
    let fx = Fixture::new(Script {
        fail: Some(Call::DurationProbe),
        ..Default::default()
    });
    let failure = fx.normalizer.normalize(fx.request("ebuR128", ebu_target())).await.unwrap_err();

    assert_eq!(failure.kind, FailureKind::ToolInvocation);
    assert_eq!(fx.tools().calls(), vec![Call::AudioProbe, Call::DurationProbe]);
}

#[tokio::test]
async fn unknown_duration_skips_padding() {
    let fx = Fixture::new(Script {
        duration: "N/A",
        ..Default::default()
    });
    let done = fx.normalizer.normalize(fx.request("peak", ebu_target())).await.unwrap();

    assert!(!done.info.padded);
    assert_eq!(
        fx.tools().calls(),
        vec![Call::AudioProbe, Call::DurationProbe, Call::Change]
    );
}

#[test]
fn request_defaults_to_ebu_r128() {
    let request: NormalizeRequest = serde_json::from_str(
        r#"{"input":"a.mp4","output":"b.mp4","loudness":{"target":{"input_i":"-16"}}}"#,
    )
    .unwrap();
    assert_eq!(request.loudness.normalization, "ebuR128");
    assert!(!request.verbose);
}

#[test]
fn failure_serializes_with_message_string() {
    let failure = ffmpeg_loudnorm::NormalizeFailure {
        normalized: false,
        error: "Unsupported normalization type: lufs".to_string(),
        kind: FailureKind::UnsupportedMethod,
        info: None,
    };
    let json = serde_json::to_value(&failure).unwrap();
    assert_eq!(json["normalized"], false);
    assert_eq!(json["error"], "Unsupported normalization type: lufs");
    assert_eq!(json["kind"], "unsupportedMethod");
    assert!(json.get("info").is_none());
}

#[tokio::test]
async fn folder_run_counts_failed_files() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("music");
    let output_dir = dir.path().join("normalized");
    std::fs::create_dir_all(input_dir.join("sub")).unwrap();
    std::fs::write(input_dir.join("a.mp3"), b"media").unwrap();
    std::fs::write(input_dir.join("sub/b.mp3"), b"media").unwrap();
    std::fs::write(input_dir.join("cover.jpg"), b"image").unwrap();

    let tools = FakeTools::new(Script {
        fail: Some(Call::Change),
        fail_for: Some("b.mp3"),
        ..Default::default()
    });
    let normalizer = Arc::new(Normalizer::with_executor(tools, ToolPaths::default()));
    let options = FolderOptions {
        input_dir,
        output_dir: output_dir.clone(),
        loudness: LoudnessRequest::default(),
        jobs: Some(2),
        verbose: false,
    };
    let result = normalize_folder(normalizer.clone(), &options).await;

    assert!(matches!(result, Err(Error::FilesFailed(1))));
    assert!(output_dir.join("a.mp3").exists());
    assert!(output_dir.join("sub").is_dir());
    assert!(!output_dir.join("sub/b.mp3").exists());
    assert!(!output_dir.join("cover.jpg").exists());
    let calls = normalizer.executor().calls();
    assert_eq!(calls.iter().filter(|c| **c == Call::AudioProbe).count(), 2);
    assert_eq!(calls.iter().filter(|c| **c == Call::Change).count(), 2);
}

#[tokio::test]
async fn folder_run_succeeds_when_every_file_does() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("music");
    let output_dir = dir.path().join("normalized");
    std::fs::create_dir_all(&input_dir).unwrap();
    std::fs::write(input_dir.join("a.flac"), b"media").unwrap();

    let normalizer = Arc::new(Normalizer::with_executor(
        FakeTools::new(Script::default()),
        ToolPaths::default(),
    ));
    let options = FolderOptions {
        input_dir,
        output_dir: output_dir.clone(),
        jobs: Some(1),
        ..Default::default()
    };

    normalize_folder(normalizer, &options).await.unwrap();
    assert!(output_dir.join("a.flac").exists());
}
