// Stage catalog: calibration constants for known Xeryon stages

use tracing::warn;

/// Calibration of one stage type
#[derive(Debug, Clone, PartialEq)]
pub struct StageProfile {
    pub is_linear: bool,
    /// Device command selecting the encoder scaling, e.g. "XLS3=312" (may be empty)
    pub encoder_resolution_command: String,
    /// nm/step for linear stages, deg/step for rotary stages
    pub encoder_resolution: f64,
    /// Velocity units per count: 1 um/s (linear) or 0.01 deg/s (rotary)
    pub velocity_factor: u32,
}

impl StageProfile {
    fn new(is_linear: bool, command: &str, encoder_resolution: f64, velocity_factor: u32) -> Self {
        Self {
            is_linear,
            encoder_resolution_command: command.to_string(),
            encoder_resolution,
            velocity_factor,
        }
    }

    /// Linear stage without scaling, used for unknown stage names
    pub fn unscaled() -> Self {
        Self::new(true, "", 1.0, 1)
    }

    /// Split the encoder resolution command into (name, value)
    pub fn encoder_command_parts(&self) -> Option<(&str, &str)> {
        if self.encoder_resolution_command.is_empty() {
            return None;
        }
        self.encoder_resolution_command.split_once('=')
    }

    pub fn report(&self) -> String {
        format!(
            "isLinear:       {}\nencoderRes:     {}\nencoderResCmd:  {}\nvelocityFactor: {}",
            self.is_linear,
            self.encoder_resolution,
            self.encoder_resolution_command,
            self.velocity_factor
        )
    }
}

impl Default for StageProfile {
    fn default() -> Self {
        Self::unscaled()
    }
}

/// Known stages: (identifier, is_linear, encoder resolution command,
/// encoder resolution, velocity factor)
const STAGE_TABLE: [(&str, bool, &str, f64, u32); 2] = [
    ("XLS_312_3N", true, "XLS3=312", 312.5, 1000),
    ("XRTU_30_3", false, "XRT1=3", 360.0 / 1_843_200.0, 100),
];

/// Identifiers of all known stages
pub fn known_stages() -> impl Iterator<Item = &'static str> {
    STAGE_TABLE.iter().map(|entry| entry.0)
}

/// Look up a stage by exact name; unknown names fall back to [`StageProfile::unscaled`]
pub fn lookup(type_name: &str) -> StageProfile {
    match STAGE_TABLE.iter().find(|entry| entry.0 == type_name) {
        Some(&(_, is_linear, command, resolution, velocity_factor)) => {
            StageProfile::new(is_linear, command, resolution, velocity_factor)
        }
        None => {
            warn!(
                "Undefined stage type '{}', defaulting to linear stage without scaling",
                type_name
            );
            StageProfile::unscaled()
        }
    }
}
