/// Module for building ffmpeg/ffprobe invocations
pub mod command;
/// Module for error handling
pub mod error;
/// Module for loudness values and profiles
pub mod loudness;
/// Module for the probe, pad, measure, change and unpad pipeline
pub mod normalizer;
/// Module for parsing tool output
pub mod parser;
/// Module for running external processes
pub mod runner;
/// Module for per-method parameter ranges
pub mod validator;

pub use crate::command::ToolPaths;
pub use crate::error::{Error, FailureKind, NormalizeError};
pub use crate::loudness::{LoudnessProfile, LoudnessTarget, LoudnessValue};
pub use crate::normalizer::{
    JobInfo, LoudnessRequest, NormalizeFailure, NormalizeRequest, Normalized, Normalizer,
};
pub use crate::runner::{Executor, SystemExecutor};
pub use crate::validator::NormalizationMethod;

use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strum_macros::Display;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use walkdir::WalkDir;

/// Media formats picked up by folder normalization
#[derive(Debug, PartialEq, Display)]
#[strum(serialize_all = "camelCase")]
pub enum MediaFormats {
    Wav,
    Mp3,
    Flac,
    Ogg,
    M4a,
    Aac,
    Opus,
    Mp4,
    Mkv,
    Mov,
    Webm,
}

impl MediaFormats {
    /// Returns a list of supported file extensions
    #[inline]
    pub fn supported_extensions() -> &'static [&'static str] {
        &[
            "wav", "mp3", "flac", "ogg", "m4a", "aac", "opus", "mp4", "mkv", "mov", "webm",
        ]
    }

    /// Creates a MediaFormats enum from a file path based on its extension
    #[inline]
    pub fn from_path(value: impl AsRef<Path>) -> Option<Self> {
        Some(
            match value
                .as_ref()
                .extension()
                .unwrap_or_default()
                .to_string_lossy()
                .to_lowercase()
                .as_ref()
            {
                "wav" => Self::Wav,
                "mp3" => Self::Mp3,
                "flac" => Self::Flac,
                "ogg" => Self::Ogg,
                "m4a" => Self::M4a,
                "aac" => Self::Aac,
                "opus" => Self::Opus,
                "mp4" => Self::Mp4,
                "mkv" => Self::Mkv,
                "mov" => Self::Mov,
                "webm" => Self::Webm,
                _ => return None,
            },
        )
    }
}

/// Normalizes one file with ffmpeg/ffprobe located through [`ToolPaths::from_env`]
pub async fn normalize(request: NormalizeRequest) -> Result<Normalized, NormalizeFailure> {
    Normalizer::new(ToolPaths::from_env())
        .normalize(request)
        .await
}

/// Configuration options for normalizing a whole folder
#[derive(Debug, Clone)]
pub struct FolderOptions {
    /// Input directory containing media files to process
    pub input_dir: PathBuf,
    /// Output directory; the input tree is mirrored below it
    pub output_dir: PathBuf,
    /// Method and target applied to every file
    pub loudness: LoudnessRequest,
    /// Number of files processed at once, default to CPU core count
    pub jobs: Option<usize>,
    /// Echo every tool invocation and its output
    pub verbose: bool,
}

impl Default for FolderOptions {
    fn default() -> Self {
        FolderOptions {
            input_dir: PathBuf::from("."),
            output_dir: PathBuf::from("normalized"),
            loudness: LoudnessRequest::default(),
            jobs: None,
            verbose: false,
        }
    }
}

/// Normalize every media file below `options.input_dir`
pub async fn normalize_folder<E>(
    normalizer: Arc<Normalizer<E>>,
    options: &FolderOptions,
) -> Result<(), Error>
where
    E: Executor + 'static,
{
    // 1. Validate options
    validate_options(options)?;

    // Reject an unknown method once instead of once per file
    if let Err(e) = options.loudness.normalization.parse::<NormalizationMethod>() {
        return Err(Error::InvalidOptions(e.to_string()));
    }

    // 2. Discover media files
    info!("Discovering media files in {:?}...", options.input_dir);
    let files = find_media_files(&options.input_dir);
    if files.is_empty() {
        info!("No media files found.");
        return Ok(());
    }
    info!("Found {} media files.", files.len());

    // 3. Build one request per file
    let mut requests = Vec::with_capacity(files.len());
    for input in files {
        let output = output_path_for(&input, &options.input_dir, &options.output_dir)?;
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        requests.push(NormalizeRequest {
            input,
            output,
            loudness: options.loudness.clone(),
            verbose: options.verbose,
        });
    }

    // 4. Run them concurrently
    let jobs = options
        .jobs
        .filter(|&n| n > 0)
        .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()));
    info!("Using {} concurrent jobs.", jobs);

    let pb = ProgressBar::new(requests.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_message("Normalizing files");

    let permits = Arc::new(Semaphore::new(jobs));
    let mut set = JoinSet::new();
    for request in requests {
        let normalizer = Arc::clone(&normalizer);
        let permits = Arc::clone(&permits);
        set.spawn(async move {
            let _permit = permits.acquire_owned().await;
            normalizer.normalize(request).await
        });
    }

    // 5. Report final status and errors
    let mut success_count = 0;
    let mut error_count = 0;
    while let Some(joined) = set.join_next().await {
        pb.inc(1);
        match joined {
            Ok(Ok(_)) => success_count += 1,
            Ok(Err(failure)) => {
                error!("Error: {}", failure);
                error_count += 1;
            }
            Err(e) => {
                error!("Normalization task panicked: {}", e);
                error_count += 1;
            }
        }
    }
    pb.finish_with_message("Processing done");

    info!(
        "Processing complete. {} files succeeded, {} files failed.",
        success_count, error_count
    );

    if error_count > 0 {
        Err(Error::FilesFailed(error_count))
    } else {
        Ok(())
    }
}

/// Mirrors `input`'s position below `input_dir` into `output_dir`
fn output_path_for(input: &Path, input_dir: &Path, output_dir: &Path) -> Result<PathBuf, Error> {
    let relative = pathdiff::diff_paths(input, input_dir).ok_or_else(|| Error::Io {
        path: input.to_path_buf(),
        source: std::io::Error::other("Failed to calculate relative path"),
    })?;
    Ok(output_dir.join(relative))
}

/// Validates folder options for correctness
fn validate_options(options: &FolderOptions) -> Result<(), Error> {
    if !options.input_dir.is_dir() {
        return Err(Error::InvalidOptions(format!(
            "Input path is not a valid directory: {:?}",
            options.input_dir
        )));
    }
    let output_dir = &options.output_dir;
    if !output_dir.exists() {
        std::fs::create_dir_all(output_dir).map_err(|e| Error::Io {
            path: output_dir.to_path_buf(),
            source: e,
        })?;
        info!("Created output directory: {:?}", output_dir);
    } else if !output_dir.is_dir() {
        return Err(Error::InvalidOptions(format!(
            "Output path exists but is not a directory: {:?}",
            output_dir
        )));
    }
    if is_within(output_dir, &options.input_dir) {
        return Err(Error::InvalidOptions(format!(
            "Output directory {:?} must not be the input directory or lie inside it",
            output_dir
        )));
    }
    if options.jobs == Some(0) {
        warn!("0 jobs requested, falling back to the CPU core count.");
    }
    Ok(())
}

/// Whether `dir` is `parent` or one of its descendants
fn is_within(dir: &Path, parent: &Path) -> bool {
    match (dir.canonicalize(), parent.canonicalize()) {
        (Ok(dir), Ok(parent)) => dir.starts_with(parent),
        _ => dir.starts_with(parent),
    }
}

/// Finds all supported media files in the specified directory, skipping
/// leftovers of interrupted padding runs
fn find_media_files(input_dir: impl AsRef<Path>) -> Vec<PathBuf> {
    WalkDir::new(input_dir)
        .into_iter()
        .filter_map(|e| e.ok()) // Filter out directory reading errors
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| MediaFormats::from_path(path).is_some())
        .filter(|path| {
            !path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .starts_with("__temporary.")
        })
        .collect()
}
