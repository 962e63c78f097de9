//! Interpretation of the text ffmpeg and ffprobe print.

use crate::loudness::{LoudnessProfile, MeasurementReport, build_measured};
use log::warn;
use regex::Regex;
use std::sync::LazyLock;

static DURATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("valid duration regex")
});

const STREAM_MARKER: &str = "[STREAM]";

/// Parses the last `{ ... }` block of ffmpeg's stderr as the loudnorm JSON
/// report. Newer ffmpeg builds print a muxer summary after it, so the block
/// is located by its braces rather than by position.
pub fn parse_measurements(diagnostics: &str) -> Option<LoudnessProfile> {
    let Some(report) = last_json_block(diagnostics) else {
        warn!("No loudnorm measurement report in ffmpeg output");
        return None;
    };

    match serde_json::from_str::<MeasurementReport>(report) {
        Ok(report) => Some(build_measured(&report)),
        Err(e) => {
            warn!("Failed to parse loudnorm measurement report: {}", e);
            None
        }
    }
}

fn last_json_block(text: &str) -> Option<&str> {
    let end = text.rfind('}')?;
    let start = text[..end].rfind('{')?;
    Some(&text[start..=end])
}

/// Parses `Duration: HH:MM:SS.ff` into seconds
pub fn parse_duration(diagnostics: &str) -> Option<f64> {
    let Some(caps) = DURATION_REGEX.captures(diagnostics) else {
        warn!("No duration found in ffmpeg output");
        return None;
    };
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(3600.0 * hours + 60.0 * minutes + seconds)
}

/// Counts `[STREAM]` sections in `ffprobe -show_streams` output
pub fn count_audio_streams(probe_output: &str) -> usize {
    probe_output.matches(STREAM_MARKER).count()
}
