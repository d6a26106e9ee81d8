use thiserror::Error;

/// Failures raised by the simulation core.
///
/// All of these surface before the year loop starts; depletion inside a run is
/// a state transition, not an error.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("data unavailable or malformed: {0}")]
    Data(String),

    #[error("unknown strategy '{name}' (available: {available})")]
    StrategyNotFound { name: String, available: String },
}

impl SimError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        SimError::Configuration(msg.into())
    }

    pub(crate) fn data(msg: impl Into<String>) -> Self {
        SimError::Data(msg.into())
    }
}

pub type SimResult<T> = Result<T, SimError>;

pub(crate) fn require_unit_interval(name: &str, value: f64) -> SimResult<f64> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(SimError::config(format!(
            "{name} must be between 0 and 1, got {value}"
        )))
    }
}

pub(crate) fn require_open_unit_interval(name: &str, value: f64) -> SimResult<f64> {
    if value.is_finite() && value > 0.0 && value < 1.0 {
        Ok(value)
    } else {
        Err(SimError::config(format!(
            "{name} must be strictly between 0 and 1, got {value}"
        )))
    }
}

pub(crate) fn require_non_negative(name: &str, value: f64) -> SimResult<f64> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(SimError::config(format!(
            "{name} must be a finite value >= 0, got {value}"
        )))
    }
}
