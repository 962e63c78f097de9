use crate::validator::{NormalizationMethod, Parameter, RangeValidator};
use serde::{Deserialize, Serialize};

/// A loudness value as it arrives from a caller or from ffmpeg's report:
/// either a JSON number or a numeric string such as `"-25.05"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoudnessValue {
    Number(f64),
    Text(String),
}

impl LoudnessValue {
    /// Numeric coercion; `None` for text that is not a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl From<f64> for LoudnessValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// Unvalidated loudness fields, as requested by a caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoudnessTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_i: Option<LoudnessValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_lra: Option<LoudnessValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tp: Option<LoudnessValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_thresh: Option<LoudnessValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_offset: Option<LoudnessValue>,
}

/// The measurement report loudnorm prints with `print_format=json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementReport {
    pub input_i: Option<LoudnessValue>,
    pub input_tp: Option<LoudnessValue>,
    pub input_lra: Option<LoudnessValue>,
    pub input_thresh: Option<LoudnessValue>,
    pub output_i: Option<LoudnessValue>,
    pub output_tp: Option<LoudnessValue>,
    pub output_lra: Option<LoudnessValue>,
    pub output_thresh: Option<LoudnessValue>,
    pub normalization_type: Option<String>,
    pub target_offset: Option<LoudnessValue>,
}

/// Resolved loudness values, used both as a correction target and as the
/// result of a measurement pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoudnessProfile {
    pub input_i: Option<f64>,
    pub input_lra: Option<f64>,
    pub input_tp: Option<f64>,
    pub input_thresh: Option<f64>,
    pub target_offset: Option<f64>,
}

impl LoudnessProfile {
    /// Coerces every field without range checks
    pub fn raw(target: &LoudnessTarget) -> Self {
        let coerce = |v: &Option<LoudnessValue>| v.as_ref().and_then(LoudnessValue::as_number);
        Self {
            input_i: coerce(&target.input_i),
            input_lra: coerce(&target.input_lra),
            input_tp: coerce(&target.input_tp),
            input_thresh: coerce(&target.input_thresh),
            target_offset: coerce(&target.target_offset),
        }
    }

    /// Passes every field through `validator`
    pub fn validated(target: &LoudnessTarget, validator: &RangeValidator) -> Self {
        Self {
            input_i: validator.validate(Parameter::InputI, target.input_i.as_ref()),
            input_lra: validator.validate(Parameter::InputLra, target.input_lra.as_ref()),
            input_tp: validator.validate(Parameter::InputTp, target.input_tp.as_ref()),
            input_thresh: validator.validate(Parameter::InputThresh, target.input_thresh.as_ref()),
            target_offset: validator
                .validate(Parameter::TargetOffset, target.target_offset.as_ref()),
        }
    }
}

/// Builds the correction target, clamped to the ranges of `method`
pub fn build_target(method: NormalizationMethod, target: &LoudnessTarget) -> LoudnessProfile {
    LoudnessProfile::validated(target, &method.validator())
}

/// Measured values are observations and are never clamped
pub fn build_measured(report: &MeasurementReport) -> LoudnessProfile {
    LoudnessProfile::raw(&LoudnessTarget {
        input_i: report.input_i.clone(),
        input_lra: report.input_lra.clone(),
        input_tp: report.input_tp.clone(),
        input_thresh: report.input_thresh.clone(),
        target_offset: report.target_offset.clone(),
    })
}
