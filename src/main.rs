use anyhow::Result;
use clap::Parser;
use ffmpeg_loudnorm::{
    FolderOptions, LoudnessRequest, LoudnessTarget, NormalizeRequest, Normalizer, ToolPaths,
    normalize_folder,
};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// input media file, or a directory to normalize every media file in it
    input: PathBuf,

    /// output file, or output directory when input is a directory
    output: PathBuf,

    /// normalization method: ebuR128, peak or rms
    #[arg(short, long, default_value = "ebuR128")]
    normalization: String,

    /// target integrated loudness
    #[arg(long, allow_hyphen_values = true)]
    input_i: Option<f64>,

    /// target loudness range (ebuR128 only)
    #[arg(long, allow_hyphen_values = true)]
    input_lra: Option<f64>,

    /// target true peak (ebuR128 only)
    #[arg(long, allow_hyphen_values = true)]
    input_tp: Option<f64>,

    /// number of files normalized at once in directory mode, default to CPU core count
    #[arg(short, long)]
    jobs: Option<usize>,

    /// echo every ffmpeg invocation and its output
    #[arg(short, long)]
    verbose: bool,

    /// ffmpeg executable
    #[arg(long, env = "FFMPEG_PATH", default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// ffprobe executable
    #[arg(long, env = "FFPROBE_PATH", default_value = "ffprobe")]
    ffprobe: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    _ = pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .parse_default_env()
        .try_init();

    let cli = Cli::parse();

    // --- Configuration ---
    let loudness = LoudnessRequest {
        normalization: cli.normalization,
        target: LoudnessTarget {
            input_i: cli.input_i.map(Into::into),
            input_lra: cli.input_lra.map(Into::into),
            input_tp: cli.input_tp.map(Into::into),
            ..Default::default()
        },
    };
    let normalizer = Normalizer::new(ToolPaths {
        ffmpeg: cli.ffmpeg,
        ffprobe: cli.ffprobe,
    });

    info!("Starting loudness normalization with options:");
    info!("  Input: {:?}", cli.input);
    info!("  Output: {:?}", cli.output);
    info!("  Normalization: {}", loudness.normalization);
    info!("  ffmpeg: {:?}", normalizer.tools().ffmpeg);
    info!("  ffprobe: {:?}", normalizer.tools().ffprobe);
    info!("---");

    if cli.input.is_dir() {
        let options = FolderOptions {
            input_dir: cli.input,
            output_dir: cli.output,
            loudness,
            jobs: cli.jobs,
            verbose: cli.verbose,
        };
        return match normalize_folder(Arc::new(normalizer), &options).await {
            Ok(_) => {
                info!("Normalization finished successfully!");
                Ok(())
            }
            Err(e) => {
                error!("Normalization failed: {}", e);
                Err(e)?
            }
        };
    }

    let request = NormalizeRequest {
        input: cli.input,
        output: cli.output,
        loudness,
        verbose: cli.verbose,
    };
    match normalizer.normalize(request).await {
        Ok(normalized) => {
            println!("{}", serde_json::to_string_pretty(&normalized)?);
            info!("Normalization finished successfully!");
            Ok(())
        }
        Err(failure) => {
            println!("{}", serde_json::to_string_pretty(&failure)?);
            error!("Normalization failed: {}", failure);
            Err(failure)?
        }
    }
}
