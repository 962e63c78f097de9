use crate::command::{
    MIN_DURATION_SECS, Step, ToolPaths, audio_stream_probe_command, change_command,
    duration_probe_command, measure_command, pad_command, temporary_path, unpad_command,
};
use crate::error::{FailureKind, NormalizeError};
use crate::loudness::{LoudnessProfile, LoudnessTarget, build_target};
use crate::runner::{Executor, Processed, RunResult, Runner, SystemExecutor};
use crate::validator::NormalizationMethod;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

fn default_method() -> String {
    NormalizationMethod::EbuR128.to_string()
}

/// Requested method and target values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoudnessRequest {
    /// `ebuR128`, `peak` or `rms`
    #[serde(default = "default_method")]
    pub normalization: String,
    #[serde(default)]
    pub target: LoudnessTarget,
}

impl Default for LoudnessRequest {
    fn default() -> Self {
        Self {
            normalization: default_method(),
            target: LoudnessTarget::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    #[serde(default)]
    pub loudness: LoudnessRequest,
    #[serde(default)]
    pub verbose: bool,
}

/// Final known state of a job, reported with both outcomes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub input: PathBuf,
    pub output: PathBuf,
    pub normalization: NormalizationMethod,
    pub loudness: LoudnessProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measured: Option<LoudnessProfile>,
    pub padded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_duration: Option<f64>,
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalized {
    pub normalized: bool,
    pub info: JobInfo,
}

/// Rejection of a job, with the error rendered as text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeFailure {
    pub normalized: bool,
    pub error: String,
    pub kind: FailureKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<JobInfo>,
}

impl NormalizeFailure {
    fn new(error: NormalizeError, info: Option<JobInfo>) -> Self {
        Self {
            normalized: false,
            error: error.to_string(),
            kind: error.kind(),
            info,
        }
    }
}

impl fmt::Display for NormalizeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.error)
    }
}

impl std::error::Error for NormalizeFailure {}

/// Removes its file on drop unless disarmed
#[derive(Debug)]
pub struct TemporaryFile {
    path: PathBuf,
    armed: bool,
}

impl TemporaryFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Call once the file has been deleted through other means
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TemporaryFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed leftover temporary file {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove temporary file {:?}: {}", self.path, e),
        }
    }
}

#[derive(Debug)]
struct Padding {
    original_duration: f64,
    file: TemporaryFile,
}

/// State threaded through the pipeline stages
#[derive(Debug)]
struct NormalizationJob {
    input: PathBuf,
    output: PathBuf,
    /// File the next ffmpeg step reads from
    source: PathBuf,
    method: NormalizationMethod,
    target: LoudnessProfile,
    measured: Option<LoudnessProfile>,
    padding: Option<Padding>,
    verbose: bool,
}

impl NormalizationJob {
    fn info(&self) -> JobInfo {
        JobInfo {
            input: self.input.clone(),
            output: self.output.clone(),
            normalization: self.method,
            loudness: self.target,
            measured: self.measured,
            padded: self.padding.is_some(),
            original_duration: self.padding.as_ref().map(|p| p.original_duration),
            verbose: self.verbose,
        }
    }

    fn disarm_padding(&mut self) {
        if let Some(padding) = self.padding.as_mut() {
            padding.file.disarm();
        }
    }

    /// Consumes the job; a held temporary file is removed on the way out
    fn reject(self, error: NormalizeError) -> NormalizeFailure {
        warn!("Normalization of {:?} rejected: {}", self.input, error);
        NormalizeFailure::new(error, Some(self.info()))
    }

    fn tool_failure(self, step: Step, result: &RunResult) -> NormalizeFailure {
        let error = NormalizeError::ToolInvocation {
            step,
            path: self.input.clone(),
            message: result.failure_message(),
        };
        self.reject(error)
    }
}

/// Drives ffmpeg through probe, pad, measure, change and unpad steps
#[derive(Debug, Clone, Default)]
pub struct Normalizer<E = SystemExecutor> {
    executor: E,
    tools: ToolPaths,
}

impl Normalizer<SystemExecutor> {
    pub fn new(tools: ToolPaths) -> Self {
        Self::with_executor(SystemExecutor, tools)
    }
}

impl<E: Executor> Normalizer<E> {
    pub fn with_executor(executor: E, tools: ToolPaths) -> Self {
        Self { executor, tools }
    }

    #[inline]
    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }

    #[inline]
    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub async fn normalize(&self, request: NormalizeRequest) -> Result<Normalized, NormalizeFailure> {
        let job = validate(request).map_err(|e| NormalizeFailure::new(e, None))?;
        let runner = Runner::new(&self.executor, job.verbose);

        let job = self.check_audio(&runner, job).await?;
        let job = self.pad_if_short(&runner, job).await?;
        let job = if job.method.measures_first() {
            self.measure(&runner, job).await
        } else {
            job
        };
        let job = self.change(&runner, job).await?;
        let job = self.unpad_if_padded(&runner, job).await?;

        info!("Normalized {:?} -> {:?}", job.input, job.output);
        Ok(Normalized {
            normalized: true,
            info: job.info(),
        })
    }

    async fn check_audio(
        &self,
        runner: &Runner<'_, E>,
        job: NormalizationJob,
    ) -> Result<NormalizationJob, NormalizeFailure> {
        let result = runner
            .run(&audio_stream_probe_command(&self.tools, &job.input))
            .await;
        // a failed probe counts as no audio
        let streams = match (&result.processed, result.is_ok()) {
            (Some(Processed::AudioStreams(n)), true) => *n,
            _ => 0,
        };
        debug!("{:?} has {} audio stream(s)", job.input, streams);
        if streams == 0 {
            let path = job.input.clone();
            return Err(job.reject(NormalizeError::NoAudioStream(path)));
        }
        Ok(job)
    }

    async fn pad_if_short(
        &self,
        runner: &Runner<'_, E>,
        mut job: NormalizationJob,
    ) -> Result<NormalizationJob, NormalizeFailure> {
        let result = runner
            .run(&duration_probe_command(&self.tools, &job.source))
            .await;
        if !result.is_ok() {
            return Err(job.tool_failure(Step::DurationProbe, &result));
        }
        let duration = match &result.processed {
            Some(Processed::Duration(d)) => *d,
            _ => {
                warn!("Duration of {:?} unknown, skipping padding", job.input);
                return Ok(job);
            }
        };
        if duration >= MIN_DURATION_SECS {
            return Ok(job);
        }

        debug!(
            "{:?} is {}s long, padding to {}s",
            job.input, duration, MIN_DURATION_SECS
        );
        let temporary = TemporaryFile::new(temporary_path(&job.output));
        let pad = pad_command(&self.tools, &job.source, temporary.path());
        job.source = temporary.path().to_path_buf();
        job.padding = Some(Padding {
            original_duration: duration,
            file: temporary,
        });

        let result = runner.run(&pad).await;
        if !result.is_ok() {
            return Err(job.tool_failure(Step::Pad, &result));
        }
        Ok(job)
    }

    /// Never fails: without a measurement the correction runs single-pass
    async fn measure(&self, runner: &Runner<'_, E>, mut job: NormalizationJob) -> NormalizationJob {
        let result = runner
            .run(&measure_command(&self.tools, &job.source, &job.target))
            .await;
        if !result.is_ok() {
            warn!(
                "Measurement of {:?} failed ({}), correcting single-pass",
                job.input,
                result.failure_message()
            );
            return job;
        }
        if let Some(Processed::Measurements(measured)) = result.processed {
            job.measured = Some(measured);
        }
        job
    }

    async fn change(
        &self,
        runner: &Runner<'_, E>,
        job: NormalizationJob,
    ) -> Result<NormalizationJob, NormalizeFailure> {
        let change = change_command(
            &self.tools,
            &job.source,
            &job.output,
            &job.target,
            job.measured.as_ref(),
        );
        let result = runner.run(&change).await;
        if !result.is_ok() {
            return Err(job.tool_failure(Step::Change, &result));
        }
        Ok(job)
    }

    async fn unpad_if_padded(
        &self,
        runner: &Runner<'_, E>,
        mut job: NormalizationJob,
    ) -> Result<NormalizationJob, NormalizeFailure> {
        let Some((temporary, original_duration)) = job
            .padding
            .as_ref()
            .map(|p| (p.file.path().to_path_buf(), p.original_duration))
        else {
            return Ok(job);
        };

        // the padded source is no longer needed, the corrected file takes its place
        if let Err(source) = tokio::fs::rename(&job.output, &temporary).await {
            let path = job.output.clone();
            return Err(job.reject(NormalizeError::Io { path, source }));
        }

        let unpad = unpad_command(
            &self.tools,
            &temporary,
            &job.output,
            original_duration,
            &temporary,
        );
        let result = runner.run(&unpad).await;
        if let Some(message) = result.cleanup_error.clone() {
            // removal was already attempted, the guard must not retry it
            job.disarm_padding();
            return Err(job.reject(NormalizeError::Cleanup {
                path: temporary,
                message,
            }));
        }
        if !result.is_ok() {
            return Err(job.tool_failure(Step::Unpad, &result));
        }

        job.disarm_padding();
        job.source = job.input.clone();
        Ok(job)
    }
}

fn validate(request: NormalizeRequest) -> Result<NormalizationJob, NormalizeError> {
    let method: NormalizationMethod = request.loudness.normalization.parse()?;
    let target = build_target(method, &request.loudness.target);
    Ok(NormalizationJob {
        source: request.input.clone(),
        input: request.input,
        output: request.output,
        method,
        target,
        measured: None,
        padding: None,
        verbose: request.verbose,
    })
}
