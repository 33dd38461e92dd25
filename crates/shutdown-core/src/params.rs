use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

pub const INPUT_VOLTAGE_RANGE: RangeInclusive<f64> = 0.0..=1000.0;
pub const INPUT_CURRENT_RANGE: RangeInclusive<f64> = 0.0..=100.0;
pub const TEMPERATURE_RANGE: RangeInclusive<f64> = -40.0..=85.0;
pub const LIGHT_INTENSITY_RANGE: RangeInclusive<f64> = 0.0..=1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterField {
    InputVoltage,
    InputCurrent,
    Temperature,
    LightIntensity,
}

impl ParameterField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InputVoltage => "input_voltage",
            Self::InputCurrent => "input_current",
            Self::Temperature => "temperature",
            Self::LightIntensity => "light_intensity",
        }
    }

    pub fn range(&self) -> RangeInclusive<f64> {
        match self {
            Self::InputVoltage => INPUT_VOLTAGE_RANGE,
            Self::InputCurrent => INPUT_CURRENT_RANGE,
            Self::Temperature => TEMPERATURE_RANGE,
            Self::LightIntensity => LIGHT_INTENSITY_RANGE,
        }
    }
}

impl fmt::Display for ParameterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejection produced by [`SimulationParameters::validate`] at the input boundary.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum ParameterViolation {
    #[error("{field} is not a finite number ({value})")]
    NonFinite { field: ParameterField, value: f64 },
    #[error("{field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: ParameterField,
        value: f64,
        min: f64,
        max: f64,
    },
}

impl ParameterViolation {
    pub fn field(&self) -> ParameterField {
        match self {
            Self::NonFinite { field, .. } | Self::OutOfRange { field, .. } => *field,
        }
    }
}

/// Operator-configured input conditions for a simulated shutdown run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParameters {
    /// Volts, [0, 1000].
    pub input_voltage: f64,
    /// Amperes, [0, 100].
    pub input_current: f64,
    /// Ambient temperature in °C, [-40, 85].
    pub temperature: f64,
    /// Irradiance in W/m², [0, 1000].
    pub light_intensity: f64,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            input_voltage: 600.0,
            input_current: 10.0,
            temperature: 25.0,
            light_intensity: 800.0,
        }
    }
}

impl SimulationParameters {
    pub fn new(input_voltage: f64, input_current: f64, temperature: f64, light_intensity: f64) -> Self {
        Self {
            input_voltage,
            input_current,
            temperature,
            light_intensity,
        }
    }

    fn fields(&self) -> [(ParameterField, f64); 4] {
        [
            (ParameterField::InputVoltage, self.input_voltage),
            (ParameterField::InputCurrent, self.input_current),
            (ParameterField::Temperature, self.temperature),
            (ParameterField::LightIntensity, self.light_intensity),
        ]
    }

    /// Boundary check for operator input. The engine itself never calls this.
    pub fn validate(&self) -> Result<(), ParameterViolation> {
        for (field, value) in self.fields() {
            if !value.is_finite() {
                return Err(ParameterViolation::NonFinite { field, value });
            }
            let range = field.range();
            if !range.contains(&value) {
                return Err(ParameterViolation::OutOfRange {
                    field,
                    value,
                    min: *range.start(),
                    max: *range.end(),
                });
            }
        }
        Ok(())
    }

    /// Copy with every field forced into its valid range. Non-finite values
    /// fall back to the field's default.
    pub fn clamped(&self) -> Self {
        let defaults = Self::default();
        Self {
            input_voltage: clamp_or(self.input_voltage, INPUT_VOLTAGE_RANGE, defaults.input_voltage),
            input_current: clamp_or(self.input_current, INPUT_CURRENT_RANGE, defaults.input_current),
            temperature: clamp_or(self.temperature, TEMPERATURE_RANGE, defaults.temperature),
            light_intensity: clamp_or(
                self.light_intensity,
                LIGHT_INTENSITY_RANGE,
                defaults.light_intensity,
            ),
        }
    }

    pub fn input_power_w(&self) -> f64 {
        self.input_voltage * self.input_current
    }
}

pub(crate) fn clamp_or(value: f64, range: RangeInclusive<f64>, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(*range.start(), *range.end())
    } else {
        fallback
    }
}
