use crate::error::NormalizeError;
use crate::loudness::LoudnessValue;
use log::debug;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum_macros::Display;

/// Normalization methods understood by the loudnorm pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum NormalizationMethod {
    EbuR128,
    Peak,
    Rms,
}

impl NormalizationMethod {
    /// Whether a measurement pass runs before correction
    #[inline]
    pub fn measures_first(self) -> bool {
        matches!(self, Self::EbuR128)
    }

    #[inline]
    pub fn validator(self) -> RangeValidator {
        RangeValidator::for_method(self)
    }
}

impl FromStr for NormalizationMethod {
    type Err = NormalizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ebuR128" => Ok(Self::EbuR128),
            "peak" => Ok(Self::Peak),
            "rms" => Ok(Self::Rms),
            other => Err(NormalizeError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// Tunable loudness parameters a method may define a range for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Parameter {
    InputI,
    InputLra,
    InputTp,
    InputThresh,
    TargetOffset,
}

/// Accepted range of one parameter, with the value substituted when a
/// request falls outside of it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeSetting {
    pub base: f64,
    pub min: f64,
    pub max: f64,
}

impl RangeSetting {
    pub const fn new(base: f64, min: f64, max: f64) -> Self {
        Self { base, min, max }
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

const EBU_R128_RANGES: &[(Parameter, RangeSetting)] = &[
    (Parameter::InputI, RangeSetting::new(-23.0, -70.0, -5.0)),
    (Parameter::InputLra, RangeSetting::new(7.0, 1.0, 20.0)),
    (Parameter::InputTp, RangeSetting::new(-2.0, -9.0, 0.0)),
];

// shared by peak and rms
const PEAK_RANGES: &[(Parameter, RangeSetting)] =
    &[(Parameter::InputI, RangeSetting::new(-23.0, -99.0, 0.0))];

/// Clamps requested loudness values into the ranges of one method
#[derive(Debug, Clone, Copy)]
pub struct RangeValidator {
    method: NormalizationMethod,
    ranges: &'static [(Parameter, RangeSetting)],
}

impl RangeValidator {
    pub fn for_method(method: NormalizationMethod) -> Self {
        let ranges = match method {
            NormalizationMethod::EbuR128 => EBU_R128_RANGES,
            NormalizationMethod::Peak | NormalizationMethod::Rms => PEAK_RANGES,
        };
        Self { method, ranges }
    }

    #[inline]
    pub fn method(&self) -> NormalizationMethod {
        self.method
    }

    pub fn setting(&self, parameter: Parameter) -> Option<&RangeSetting> {
        self.ranges
            .iter()
            .find(|(p, _)| *p == parameter)
            .map(|(_, setting)| setting)
    }

    /// Resolves a requested value for `parameter`.
    ///
    /// Returns `None` when the method has no range for the parameter. A value
    /// that is missing, not numeric or out of range resolves to the range's base.
    pub fn validate(&self, parameter: Parameter, value: Option<&LoudnessValue>) -> Option<f64> {
        let Some(setting) = self.setting(parameter) else {
            debug!(
                "Loudness parameter {} is not defined for {} normalization.",
                parameter, self.method
            );
            return None;
        };
        match value.and_then(LoudnessValue::as_number) {
            Some(v) if setting.contains(v) => {
                debug!("Loudness parameter {} is in range.", parameter);
                Some(v)
            }
            _ => {
                debug!(
                    "Loudness parameter {} is not in range, using default {}.",
                    parameter, setting.base
                );
                Some(setting.base)
            }
        }
    }
}
