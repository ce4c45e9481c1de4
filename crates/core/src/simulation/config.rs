//! Simulation parameters
//!
//! All tunables live in [`SimulationConfig`]. They can be changed between
//! steps through [`crate::Simulation::set_config`]; a change of
//! `grid_resolution` rebuilds the velocity grid.
//!
//! Two on-disk forms are supported: JSON (via serde) and the plain
//! `key value` settings text used by older avalanche tools.

use crate::error::SimulationError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Tunable parameters of the avalanche model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Vertical acceleration (m/s², negative is down)
    pub gravity: f32,
    /// Step duration (s)
    pub timestep: f32,
    /// Fraction of speed kept after a bounce (0-1)
    pub restitution: f32,
    /// Fraction of velocity removed per free-flight step (0-1)
    pub damping: f32,
    /// Strength of the density-driven horizontal jitter on impact
    pub turbulence: f32,
    /// Blend weight toward the neighbourhood mean velocity (0-1)
    pub clumping: f32,
    /// Strength of the neighbourhood velocity subtraction
    pub viscosity: f32,
    /// Velocity grid resolution (cells per 512 terrain samples)
    pub grid_resolution: u32,
    /// Seeding height above the terrain (m)
    pub initial_height: f32,
    /// Step ceiling; the simulation is static once reached
    pub max_steps: u64,
    /// Impacts with `speed * timestep` below this come to rest (0 disables)
    pub stickiness: f32,
    /// Seed for turbulence and seeding jitter
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            gravity: -9.8,
            timestep: 0.1667,
            restitution: 0.55,
            damping: 0.02,
            turbulence: 0.2,
            clumping: 0.05,
            viscosity: 0.025,
            grid_resolution: 128,
            initial_height: 100.0,
            max_steps: 20_000,
            stickiness: 0.0,
            seed: 0,
        }
    }
}

fn require_finite(parameter: &'static str, value: f32) -> Result<(), SimulationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SimulationError::InvalidConfiguration {
            parameter,
            reason: format!("must be finite, got {value}"),
        })
    }
}

fn require_unit_interval(parameter: &'static str, value: f32) -> Result<(), SimulationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SimulationError::InvalidConfiguration {
            parameter,
            reason: format!("must be within [0, 1], got {value}"),
        })
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str, line_no: usize) -> Result<T, SimulationError> {
    raw.parse().map_err(|_| {
        SimulationError::Parse(format!("line {line_no}: bad value '{raw}' for '{key}'"))
    })
}

impl SimulationConfig {
    /// Check every parameter is usable
    ///
    /// # Errors
    /// Returns [`SimulationError::InvalidConfiguration`] naming the first bad parameter.
    pub fn validate(&self) -> Result<(), SimulationError> {
        if !(self.timestep.is_finite() && self.timestep > 0.0) {
            return Err(SimulationError::non_positive("timestep", self.timestep));
        }
        if self.grid_resolution == 0 {
            return Err(SimulationError::InvalidConfiguration {
                parameter: "grid_resolution",
                reason: "must be positive, got 0".to_string(),
            });
        }

        require_finite("gravity", self.gravity)?;
        require_finite("turbulence", self.turbulence)?;
        require_finite("viscosity", self.viscosity)?;
        require_finite("initial_height", self.initial_height)?;
        require_unit_interval("restitution", self.restitution)?;
        require_unit_interval("damping", self.damping)?;
        require_unit_interval("clumping", self.clumping)?;

        if !(self.stickiness.is_finite() && self.stickiness >= 0.0) {
            return Err(SimulationError::InvalidConfiguration {
                parameter: "stickiness",
                reason: format!("must be finite and non-negative, got {}", self.stickiness),
            });
        }

        Ok(())
    }

    /// Parse a JSON document; missing fields take their defaults
    ///
    /// # Errors
    /// Returns [`SimulationError::Serialization`] for malformed JSON and
    /// [`SimulationError::InvalidConfiguration`] if the result fails validation.
    pub fn from_json(json: &str) -> Result<Self, SimulationError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SimulationError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Encode as pretty-printed JSON
    ///
    /// # Errors
    /// Returns [`SimulationError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<String, SimulationError> {
        serde_json::to_string_pretty(self).map_err(|e| SimulationError::Serialization(e.to_string()))
    }

    /// Load a JSON config file
    ///
    /// # Errors
    /// Returns [`SimulationError::Io`] if the file can't be read, plus any
    /// error from [`SimulationConfig::from_json`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SimulationError> {
        let contents = fs::read_to_string(path).map_err(|e| SimulationError::Io(e.to_string()))?;
        Self::from_json(&contents)
    }

    /// Save as a JSON config file
    ///
    /// # Errors
    /// Returns [`SimulationError::Io`] if the file can't be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SimulationError> {
        let contents = self.to_json()?;
        fs::write(path, contents).map_err(|e| SimulationError::Io(e.to_string()))
    }

    /// Parse `key value` settings text on top of the defaults
    ///
    /// Blank lines and lines starting with `#` are skipped. Both the field
    /// names above and the camel-case names of older settings files
    /// are accepted; `bounceFriction` is stored as `restitution = 1 - value`.
    /// File paths and view flags from those files are skipped. Unknown keys
    /// are logged and ignored.
    ///
    /// # Errors
    /// Returns [`SimulationError::Parse`] for a key without a value or a value
    /// of the wrong type, and [`SimulationError::InvalidConfiguration`] if the
    /// result fails validation.
    pub fn from_settings_text(text: &str) -> Result<Self, SimulationError> {
        let mut config = Self::default();

        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let mut tokens = line.split_whitespace();
            let Some(key) = tokens.next() else {
                continue;
            };
            if key.starts_with('#') {
                continue;
            }
            let raw = tokens.next().ok_or_else(|| {
                SimulationError::Parse(format!("line {line_no}: '{key}' has no value"))
            })?;

            match key {
                "gravity" => config.gravity = parse_value(key, raw, line_no)?,
                "timestep" => config.timestep = parse_value(key, raw, line_no)?,
                "restitution" => config.restitution = parse_value(key, raw, line_no)?,
                "damping" => config.damping = parse_value(key, raw, line_no)?,
                "turbulence" => config.turbulence = parse_value(key, raw, line_no)?,
                "clumping" => config.clumping = parse_value(key, raw, line_no)?,
                "viscosity" => config.viscosity = parse_value(key, raw, line_no)?,
                "grid_resolution" => config.grid_resolution = parse_value(key, raw, line_no)?,
                "initial_height" => config.initial_height = parse_value(key, raw, line_no)?,
                "max_steps" => config.max_steps = parse_value(key, raw, line_no)?,
                "stickiness" => config.stickiness = parse_value(key, raw, line_no)?,
                "seed" => config.seed = parse_value(key, raw, line_no)?,

                // Camel-case names used by older settings files
                "initialHeight" => config.initial_height = parse_value(key, raw, line_no)?,
                "bounceFriction" => {
                    let friction: f32 = parse_value(key, raw, line_no)?;
                    config.restitution = 1.0 - friction;
                }
                "stickyness" => config.stickiness = parse_value(key, raw, line_no)?,
                "dampingForce" => config.damping = parse_value(key, raw, line_no)?,
                "turbulanceForce" => config.turbulence = parse_value(key, raw, line_no)?,
                "clumpingFactor" => config.clumping = parse_value(key, raw, line_no)?,
                "gridSize" => config.grid_resolution = parse_value(key, raw, line_no)?,
                "maxIterations" => config.max_steps = parse_value(key, raw, line_no)?,
                "elevationDEMFile" | "terrainColorFile" | "startingZoneFile" | "flowPathOutputFile"
                | "pathFile" | "pathDistanceMap" | "disableView" | "verboseOutput" => {
                    debug!("Skipping '{}' on line {}: not an engine parameter", key, line_no);
                }

                other => warn!("Ignoring unknown setting '{}' on line {}", other, line_no),
            }
        }

        config.validate()?;
        Ok(config)
    }
}
