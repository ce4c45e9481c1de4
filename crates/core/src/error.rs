//! Error taxonomy for the avalanche core
//!
//! The engine is a closed numerical system, so the surface is narrow: bad
//! configuration and degenerate input are rejected up front, and the text
//! formats consumed at load time can fail to parse. A particle leaving the
//! terrain is not an error (see [`crate::physics::StepOutcome::OutOfDomain`]).

/// Errors reported while building or reconfiguring a simulation
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationError {
    /// A configuration value is out of its valid range
    InvalidConfiguration {
        /// Name of the offending parameter (e.g. `"timestep"`)
        parameter: &'static str,
        /// Why the value was rejected
        reason: String,
    },
    /// Input data is too small or empty to simulate on
    DegenerateInput(String),
    /// A text input (elevation grid, settings file) could not be parsed
    Parse(String),
    /// Failed to read or write a file
    Io(String),
    /// Failed to encode or decode JSON
    Serialization(String),
}

impl SimulationError {
    /// Shorthand for a parameter that must be finite and strictly positive
    pub(crate) fn non_positive(parameter: &'static str, value: f32) -> Self {
        SimulationError::InvalidConfiguration {
            parameter,
            reason: format!("must be finite and positive, got {value}"),
        }
    }
}

impl std::fmt::Display for SimulationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimulationError::InvalidConfiguration { parameter, reason } => {
                write!(f, "Invalid configuration: {parameter} {reason}")
            }
            SimulationError::DegenerateInput(msg) => write!(f, "Degenerate input: {msg}"),
            SimulationError::Parse(msg) => write!(f, "Failed to parse: {msg}"),
            SimulationError::Io(msg) => write!(f, "I/O failure: {msg}"),
            SimulationError::Serialization(msg) => write!(f, "Failed to serialize: {msg}"),
        }
    }
}

impl std::error::Error for SimulationError {}
