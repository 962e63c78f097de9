use crate::command::{Invocation, PostProcess};
use crate::loudness::LoudnessProfile;
use crate::parser::{count_audio_streams, parse_duration, parse_measurements};
use log::{debug, info};
use std::ffi::OsString;
use std::future::Future;
use std::io;
use std::path::Path;
use std::process::Stdio;
use strum_macros::Display;

/// Captured result of one finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Spawns external processes and waits for them to exit
pub trait Executor: Send + Sync {
    fn execute(
        &self,
        program: &Path,
        args: &[OsString],
    ) -> impl Future<Output = io::Result<ProcessOutput>> + Send;
}

/// Runs tools as real child processes through tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    async fn execute(&self, program: &Path, args: &[OsString]) -> io::Result<ProcessOutput> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(ProcessOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum RunState {
    Initialized,
    Running,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RunStatus {
    Ok,
    Failed,
}

/// Value produced by an invocation's post-processing step
#[derive(Debug, Clone, PartialEq)]
pub enum Processed {
    Measurements(LoudnessProfile),
    Duration(f64),
    AudioStreams(usize),
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub state: RunState,
    pub status: RunStatus,
    pub stdout: String,
    pub stderr: String,
    pub processed: Option<Processed>,
    /// Set when the tool succeeded but removing a file afterwards did not
    pub cleanup_error: Option<String>,
}

impl RunResult {
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.status == RunStatus::Ok
    }

    /// Short failure description for error messages
    pub fn failure_message(&self) -> String {
        if let Some(e) = &self.cleanup_error {
            return e.clone();
        }
        let stderr = self.stderr.trim();
        match stderr.lines().last() {
            Some(line) if !line.is_empty() => line.to_string(),
            _ => "process exited unsuccessfully".to_string(),
        }
    }
}

/// Executes invocations one at a time and interprets their output
#[derive(Debug)]
pub struct Runner<'a, E> {
    executor: &'a E,
    verbose: bool,
}

impl<'a, E: Executor> Runner<'a, E> {
    pub fn new(executor: &'a E, verbose: bool) -> Self {
        Self { executor, verbose }
    }

    pub async fn run(&self, invocation: &Invocation) -> RunResult {
        let mut state = RunState::Initialized;
        debug!("[{}] {}: {}", invocation.step(), state, invocation.command_line());

        state = RunState::Running;
        if self.verbose {
            info!("Executing: {}", invocation.command_line());
        } else {
            debug!("[{}] {}", invocation.step(), state);
        }

        let output = self
            .executor
            .execute(invocation.program(), invocation.args())
            .await;
        state = RunState::Finished;
        debug!("[{}] {}", invocation.step(), state);

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                return RunResult {
                    state,
                    status: RunStatus::Failed,
                    stdout: String::new(),
                    stderr: format!("failed to spawn {}: {}", invocation.program().display(), e),
                    processed: None,
                    cleanup_error: None,
                };
            }
        };

        if self.verbose {
            info!("{}{}", output.stdout, output.stderr);
        }

        if !output.success {
            debug!("[{}] exited with {:?}", invocation.step(), output.code);
            return RunResult {
                state,
                status: RunStatus::Failed,
                stdout: output.stdout,
                stderr: output.stderr,
                processed: None,
                cleanup_error: None,
            };
        }

        let (processed, cleanup_error) = match post_process(invocation.post_process(), &output).await {
            Ok(processed) => (processed, None),
            Err(e) => (None, Some(e)),
        };
        RunResult {
            state,
            status: if cleanup_error.is_some() {
                RunStatus::Failed
            } else {
                RunStatus::Ok
            },
            stdout: output.stdout,
            stderr: output.stderr,
            processed,
            cleanup_error,
        }
    }
}

/// Parse failures become `Ok(None)`; only file removal can fail the run
async fn post_process(step: &PostProcess, output: &ProcessOutput) -> Result<Option<Processed>, String> {
    Ok(match step {
        PostProcess::Nothing => None,
        PostProcess::Measurements => parse_measurements(&output.stderr).map(Processed::Measurements),
        PostProcess::Duration => parse_duration(&output.stderr).map(Processed::Duration),
        PostProcess::AudioStreams => Some(Processed::AudioStreams(count_audio_streams(&output.stdout))),
        PostProcess::RemoveFile(path) => {
            tokio::fs::remove_file(path)
                .await
                .map_err(|e| format!("failed to remove {}: {}", path.display(), e))?;
            debug!("Removed temporary file {:?}", path);
            Some(Processed::Removed)
        }
    })
}
